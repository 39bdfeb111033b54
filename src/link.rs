//! The byte-stream connection to the device being flashed.
//!
//! A [`Link`] is either open or closed, there is no intermediate state. The
//! engine never opens a link by itself: the caller opens one (usually a
//! [`SerialLink`]) and moves it into the engine for the duration of a run.
//!
//! No retry logic lives here. Retrying to open a port, or re-running a failed
//! payload, is left to the caller.

mod mock;
mod serial;

pub use mock::MockLink;
pub use serial::{available_ports, PortEntry, SerialLink};

use std::fmt;

use crate::error::Result;

// =============================================================================
// Public Interface
// =============================================================================

/// A duplex byte-stream connection to a device.
pub trait Link: Send + fmt::Debug {
    /// A human readable name for the link, usually the port name.
    fn name(&self) -> String;

    fn is_open(&self) -> bool;

    /// Write all the given bytes. Writing to a closed link fails with an I/O
    /// error.
    fn write(&mut self, bytes: &[u8]) -> Result<()>;

    /// Read whatever is available into `buf`, waiting at most for the
    /// configured timeout. A timeout is not an error and reads zero bytes.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    fn flush(&mut self) -> Result<()>;

    /// Close the link. Closing an already closed link does nothing.
    fn close(&mut self);

    /// Ask the device to reset, if the link has a way to do it.
    fn reset_device(&mut self) -> Result<()> {
        Ok(())
    }
}
