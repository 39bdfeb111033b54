//! Serial port backed link.

use std::{
    fmt,
    io::{self, Read, Write},
    thread,
    time::Duration,
};

use hexplay::HexViewBuilder;
use log::{debug, info, log_enabled, trace, Level::Trace};
use serialport::{available_ports as enumerate, SerialPort, SerialPortType};

use super::Link;
use crate::error::{Error, Result};
use crate::Settings;

/// How long DTR is held low when resetting the device.
const RESET_PULSE: Duration = Duration::from_millis(100);

//==============================================================================
// Public Interface
//==============================================================================

/// A [`Link`] over a serial port, opened and configured from [`Settings`].
pub struct SerialLink {
    port: Option<Box<dyn SerialPort>>,
    name: String,
    baud_rate: u32,
}
impl SerialLink {
    /// Open the port named in `settings` and configure it. There is no retry
    /// here; a port that cannot be claimed fails immediately.
    pub fn open(settings: &Settings) -> Result<Self> {
        let path = match &settings.path {
            Some(path) => path.clone(),
            None => {
                return Err(Error::Connection {
                    port: String::new(),
                    baud_rate: settings.baud_rate,
                    source: serialport::Error::new(
                        serialport::ErrorKind::InvalidInput,
                        "no serial port was selected",
                    ),
                })
            }
        };
        let connection_error = |source| Error::Connection {
            port: path.clone(),
            baud_rate: settings.baud_rate,
            source,
        };

        let port = serialport::new(&path, settings.baud_rate)
            .data_bits(settings.data_bits)
            .stop_bits(settings.stop_bits)
            .parity(settings.parity)
            .flow_control(settings.flow_control)
            .timeout(settings.timeout)
            .open()
            .map_err(connection_error)?;

        let actual = port.baud_rate().map_err(connection_error)?;
        if actual != settings.baud_rate {
            return Err(connection_error(serialport::Error::new(
                serialport::ErrorKind::InvalidInput,
                format!("the driver settled on {} baud", actual),
            )));
        }

        info!("Connected to {} at {} baud", path, settings.baud_rate);
        debug!("data_bits    : {:#?}", settings.data_bits);
        debug!("stop_bits    : {:#?}", settings.stop_bits);
        debug!("parity       : {:#?}", settings.parity);
        debug!("flow control : {:#?}", settings.flow_control);

        Ok(SerialLink {
            port: Some(port),
            name: path,
            baud_rate: settings.baud_rate,
        })
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>> {
        let name = &self.name;
        self.port.as_mut().ok_or_else(|| {
            Error::io(
                format!("link `{}`", name),
                io::Error::from(io::ErrorKind::NotConnected),
            )
        })
    }
}

impl Link for SerialLink {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let name = self.name.clone();
        let port = self.port()?;
        port.write_all(bytes)
            .map_err(|e| Error::io(format!("write to `{}`", name), e))?;
        trace!("{} bytes written to serial port", bytes.len());

        // Dump what went on the wire for debugging
        if log_enabled!(Trace) {
            let view = HexViewBuilder::new(bytes)
                .address_offset(0)
                .row_width(16)
                .finish();
            trace!("\n{}", view);
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let name = self.name.clone();
        match self.port()?.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(Error::io(format!("read from `{}`", name), e)),
        }
    }

    fn flush(&mut self) -> Result<()> {
        let name = self.name.clone();
        self.port()?
            .flush()
            .map_err(|e| Error::io(format!("flush `{}`", name), e))
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            info!("Closed {}", self.name);
        }
    }

    fn reset_device(&mut self) -> Result<()> {
        let name = self.name.clone();
        let port = self.port()?;
        let to_io = |e: serialport::Error| Error::io(format!("reset through `{}`", name), e.into());

        port.write_data_terminal_ready(false).map_err(to_io)?;
        thread::sleep(RESET_PULSE);
        port.write_data_terminal_ready(true).map_err(to_io)?;
        info!("Device on {} reset", name);
        Ok(())
    }
}

impl fmt::Debug for SerialLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SerialLink")
            .field(&self.name)
            .field(&self.baud_rate)
            .field(&self.is_open())
            .finish()
    }
}

/// A serial port found on the system.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PortEntry {
    /// The name to open the port with.
    pub name: String,
    /// Manufacturer and product of USB serial controllers.
    pub description: Option<String>,
}
impl fmt::Display for PortEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.description {
            Some(description) => write!(f, "{}: ({})", self.name, description),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Enumerates the serial devices on the system. Enumeration failures are
/// logged and yield an empty list.
pub fn available_ports() -> Vec<PortEntry> {
    match enumerate() {
        Ok(ports) => ports
            .into_iter()
            .map(|p| match p.port_type {
                // USB ports give us more info about the connected serial
                // controller
                SerialPortType::UsbPort(info) => PortEntry {
                    name: p.port_name,
                    description: Some(format!(
                        "{} / {}",
                        info.manufacturer.as_deref().unwrap_or(""),
                        info.product.as_deref().unwrap_or("")
                    )),
                },
                // We're also interested in the other devices, such as virtual
                // ports for testing
                _ => PortEntry {
                    name: p.port_name,
                    description: None,
                },
            })
            .collect(),
        Err(ref e) => {
            info!("error: {}", e.to_string());
            vec![]
        }
    }
}

//==============================================================================
// Unit Tests
//==============================================================================
