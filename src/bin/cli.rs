//! Serflash command line interface.

use std::{
    process,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use clap::{
    crate_authors, crate_description, crate_name, crate_version, value_t, App, AppSettings::*, Arg,
    ArgMatches,
};
use console::{style, Term};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, trace, Level, LevelFilter};
use simplelog::*;

use serflash::{
    self as sf, DataBits, Engine, EngineEvent, FlashOptions, FlowControl, Link, Observer,
    Outcome, Parity, PayloadClass, ProgressScope, SerialLink, Settings, StopBits, TransferJob,
};

const EXIT_FAILURE: i32 = 1;
const EXIT_CANCELLED: i32 = 2;

fn main() {
    println!("[SF] serflash v{}", crate_version!());

    let matches = App::new(crate_name!())
        .version(format!("v{}", crate_version!()).as_str())
        .author(crate_authors!())
        .about(crate_description!())
        .long_about(
            "\n\
            Serflash pushes firmware images and resource files to a device \
            listening on a serial port. Firmware files are always pushed \
            first, then resource files, each in the order given on the \
            command line.\n\
            \n\
            Every file is framed by a start and an end marker and sent in \
            chunks: \n\
               \t* firmware: FLASH_START, 1024 byte chunks, FLASH_END \n\
               \t* resource: RESOURCE_START, 512 byte chunks, RESOURCE_END \n\
            \n\
            A file that fails is reported and the next one is pushed anyway. \
            Hit Ctrl+C to stop after the chunk being sent.\
        ",
        )
        .max_term_width(80)
        .setting(ColoredHelp)
        .setting(NextLineHelp)
        .arg(
            Arg::with_name("DEVICE_TTY")
                .help("the serial device to use")
                .long_help(
                    "the serial device to use; when not set, `serflash` lists \
                     the serial ports found on the system and asks which one \
                     to use.",
                )
                .short("-t")
                .long("--tty")
                .takes_value(true)
                .require_equals(true),
        )
        .arg(
            Arg::with_name("BAUD_RATE")
                .help("serial port baud rate")
                .short("-b")
                .long("--baud-rate")
                .takes_value(true)
                .default_value("115200")
                .validator(|value| match value.parse::<u32>() {
                    Ok(rate) if sf::BAUD_RATES.contains(&rate) => Ok(()),
                    _ => Err(format!("expected one of {:?}", sf::BAUD_RATES)),
                })
                .require_equals(true),
        )
        .arg(
            Arg::with_name("DATA_BITS")
                .help("number of bits per character")
                .short("-d")
                .long("--data-bits")
                .takes_value(true)
                .possible_values(&["5", "6", "7", "8"])
                .default_value("8")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("STOP_BITS")
                .help("number of stop bits per byte")
                .short("-s")
                .long("--stop-bits")
                .takes_value(true)
                .possible_values(&["1", "2"])
                .default_value("1")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("PARITY")
                .help("parity checking protocol")
                .short("-p")
                .long("--parity")
                .takes_value(true)
                .possible_values(&["none", "odd", "even"])
                .default_value("none")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("FLOW_CONTROL")
                .help("flow control mode")
                .short("-f")
                .long("--flow-control")
                .takes_value(true)
                .possible_values(&["none", "soft", "hard"])
                .default_value("none")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("FIRMWARE")
                .help("a firmware image to push, may be repeated")
                .short("-F")
                .long("--firmware")
                .takes_value(true)
                .multiple(true)
                .number_of_values(1),
        )
        .arg(
            Arg::with_name("RESOURCE")
                .help("a resource file to push, may be repeated")
                .short("-R")
                .long("--resource")
                .takes_value(true)
                .multiple(true)
                .number_of_values(1),
        )
        .arg(
            Arg::with_name("NO_VERIFY")
                .help("do not ask for a verification of the flash")
                .long("--no-verify"),
        )
        .arg(
            Arg::with_name("NO_AUTO_RESET")
                .help("do not reset the device once everything is pushed")
                .long("--no-auto-reset"),
        )
        .arg(
            Arg::with_name("LIST_PORTS")
                .help("list the serial ports found on the system and exit")
                .long("--list-ports"),
        )
        .arg(Arg::with_name("v").short("v").multiple(true).help(
            "Sets the logging level of verbosity, repeat several times for \
                higher verbosity",
        ))
        .get_matches();

    // Vary the output based on how many times the user used the "verbose" flag
    // (i.e. 'serflash -v -v -v' or 'serflash -vvv' vs 'serflash -v'
    let log_level = match matches.occurrences_of("v") {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    if let Err(e) = TermLogger::init(
        log_level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    ) {
        eprintln!("could not set up logging: {}", e);
    }

    trace!("{:#?}", matches);

    if matches.is_present("LIST_PORTS") {
        for port in sf::available_ports() {
            println!("{}", port);
        }
        return;
    }

    let settings = settings_from(&matches);
    let job = job_from(&matches);
    let options = FlashOptions {
        auto_reset: !matches.is_present("NO_AUTO_RESET"),
        verify: !matches.is_present("NO_VERIFY"),
    };

    let link = open_link(&settings);

    // Run the engine ==========================================================

    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("[SF] ⏩ {prefix} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>3}%")
            .progress_chars("=>-"),
    );
    bar.set_prefix("job   0%");

    let engine = Engine::new(CliObserver { bar: bar.clone() });

    let token = engine.cancel_token();
    let interrupted = Arc::new(AtomicBool::new(false));
    let interrupt = Arc::clone(&interrupted);
    ctrlc::set_handler(move || {
        println!("🛑 received Ctrl+C!");
        interrupt.store(true, Ordering::SeqCst);
        token.cancel();
    })
    .expect("Failed to install my Ctrl-C handler!");

    if let Err(e) = start_run(&engine, &interrupted, job, Box::new(link), options) {
        println!("{}: {}", style("error").red(), e);
        process::exit(EXIT_FAILURE);
    }
    let report = match engine.wait() {
        Some(report) => report,
        None => unreachable!("a run was started"),
    };
    bar.finish_and_clear();

    // Report ==================================================================

    for failure in &report.failures {
        if !failure.error.is_cancellation() {
            println!(
                "[SF] 💥 {} {}: {}",
                failure.class,
                style(&failure.name).red(),
                failure.error
            );
        }
    }
    let exit_code = match report.outcome {
        Outcome::Completed if report.failures.is_empty() => {
            println!(
                "[SF] 👍 {} file(s) pushed",
                style(report.succeeded.len()).green()
            );
            if report.verify_requested {
                info!("verification of the flash was requested");
            }
            0
        }
        Outcome::Completed => {
            println!(
                "[SF] 🙁 {} of {} file(s) failed",
                style(report.failures.len()).red(),
                report.started
            );
            EXIT_FAILURE
        }
        Outcome::Cancelled => {
            println!(
                "[SF] ❌ stopped after {} of {} file(s)",
                report.succeeded.len(),
                report.started
            );
            EXIT_CANCELLED
        }
        Outcome::Failed => {
            println!("{}", style("[SF] 💥 Flashing aborted!").red());
            EXIT_FAILURE
        }
    };

    if let Some(mut link) = report.link {
        link.close();
    }
    debug!("exit code: {}", exit_code);
    process::exit(exit_code);
}

/// Start the run. The running flag is only armed by the start, so a Ctrl+C
/// received before it is replayed here.
fn start_run(
    engine: &Engine,
    interrupted: &AtomicBool,
    job: TransferJob,
    link: Box<dyn Link>,
    options: FlashOptions,
) -> sf::Result<()> {
    engine.start(job, link, options)?;
    if interrupted.load(Ordering::SeqCst) {
        engine.cancel();
    }
    Ok(())
}

/// Shows the engine progress on a progress bar and prints its log above it.
struct CliObserver {
    bar: ProgressBar,
}
impl Observer for CliObserver {
    fn on_event(&self, event: &EngineEvent) {
        match event {
            EngineEvent::Progress {
                scope: ProgressScope::Payload,
                percent,
            } => self.bar.set_position(*percent as u64),
            EngineEvent::Progress {
                scope: ProgressScope::Job,
                percent,
            } => self.bar.set_prefix(format!("job {:>3.0}%", percent)),
            EngineEvent::Log(line) => {
                let text = match line.level {
                    Level::Error => style(line.to_string()).red(),
                    Level::Warn => style(line.to_string()).yellow(),
                    _ => style(line.to_string()),
                };
                self.bar.println(text.to_string());
            }
            EngineEvent::StateChanged { state } => debug!("engine {}", state),
        }
    }
}

fn settings_from(matches: &ArgMatches) -> Settings {
    // Arguments with default values ===========================================

    // It's safe to call unwrap on all command line arguments with default
    // values, because the value with either be what the user input at runtime
    // or the default value

    let baud_rate = value_t!(matches.value_of("BAUD_RATE"), u32).unwrap_or_else(|e| e.exit());

    let data_bits = match matches.value_of("DATA_BITS").unwrap() {
        "5" => DataBits::Five,
        "6" => DataBits::Six,
        "7" => DataBits::Seven,
        "8" => DataBits::Eight,
        _ => unreachable!(),
    };

    let stop_bits = match matches.value_of("STOP_BITS").unwrap() {
        "1" => StopBits::One,
        "2" => StopBits::Two,
        _ => unreachable!(),
    };

    let parity = match matches.value_of("PARITY").unwrap() {
        "none" => Parity::None,
        "even" => Parity::Even,
        "odd" => Parity::Odd,
        _ => unreachable!(),
    };

    let flow_control = match matches.value_of("FLOW_CONTROL").unwrap() {
        "none" => FlowControl::None,
        "soft" => FlowControl::Software,
        "hard" => FlowControl::Hardware,
        _ => unreachable!(),
    };

    let builder = sf::SettingsBuilder::new()
        .baud_rate(baud_rate)
        .data_bits(data_bits)
        .stop_bits(stop_bits)
        .parity(parity)
        .flow_control(flow_control);

    // Arguments with NO default values ========================================

    let path = match matches.value_of("DEVICE_TTY") {
        Some(path) => path.to_owned(),
        None => select_port(),
    };
    builder.path(path).finalize()
}

fn job_from(matches: &ArgMatches) -> TransferJob {
    let mut job = TransferJob::new();
    let files = [
        ("FIRMWARE", PayloadClass::Firmware),
        ("RESOURCE", PayloadClass::Resource),
    ];
    for (arg, class) in files.iter() {
        for path in matches.values_of(arg).into_iter().flatten() {
            match job.add(path, *class) {
                Ok(payload) => info!("{} queued", payload),
                Err(e) => {
                    println!("{}: {}", style("error").red(), e);
                    process::exit(EXIT_FAILURE);
                }
            }
        }
    }
    if job.is_empty() {
        println!(
            "{}: nothing to push, use `{}` or `{}`",
            style("error").red(),
            style("--firmware").cyan(),
            style("--resource").cyan()
        );
        process::exit(EXIT_FAILURE);
    }
    job
}

/// Attempts at opening the serial port before giving up.
const OPEN_ATTEMPTS: usize = 3;

/// The pauses between two attempts at opening the port.
fn open_delays() -> impl Iterator<Item = Duration> {
    retry::delay::Fixed::from_millis(1000).take(OPEN_ATTEMPTS - 1)
}

/// Opening the port is retried for a little while, to give a device that was
/// just plugged in the time to show up.
fn open_link(settings: &Settings) -> SerialLink {
    use retry::retry_with_index;

    let result = retry_with_index(open_delays(), |index| {
        debug!("Trying to connect {}", index);
        SerialLink::open(settings)
    });
    match result {
        Ok(link) => {
            println!(
                "[SF] 🔌 {} is open at {} baud",
                style(link.name()).green(),
                link.baud_rate()
            );
            link
        }
        Err(retry::Error::Operation { error, tries, .. }) => {
            println!(
                "{}: {} (after {} tries)",
                style("error").red(),
                error,
                tries
            );
            process::exit(EXIT_FAILURE);
        }
        Err(retry::Error::Internal(e)) => {
            println!("{}: {}", style("error").red(), e);
            process::exit(EXIT_FAILURE);
        }
    }
}

/// Ask the user which of the serial ports found on the system to use.
fn select_port() -> String {
    use dialoguer::{theme::ColorfulTheme, Select};

    let ports = sf::available_ports();
    if ports.is_empty() {
        println!(
            "{}: no serial port found, use `{}` to name one",
            style("error").red(),
            style("--tty").cyan()
        );
        process::exit(EXIT_FAILURE);
    }

    let items: Vec<String> = ports.iter().map(ToString::to_string).collect();
    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select a port to be used")
        .items(&items)
        .default(0)
        .interact_on_opt(&Term::stderr());
    match selection {
        Ok(Some(index)) => ports[index].name.clone(),
        Ok(None) => {
            println!("❌ Selection canceled");
            process::exit(EXIT_CANCELLED);
        }
        Err(e) => {
            println!("{}: {}", style("error").red(), e);
            process::exit(EXIT_FAILURE);
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
