//! Errors reported by `serflash`.
//!
//! Construction and start-time errors are returned to the caller directly.
//! Errors happening while a payload is being pushed are absorbed by the engine
//! and end up in the [`RunReport`](crate::RunReport) failure records.

use std::{io, path::PathBuf};

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// The serial port could not be claimed or configured.
    #[error("could not open `{port}` at {baud_rate} baud: {source}")]
    Connection {
        port: String,
        baud_rate: u32,
        #[source]
        source: serialport::Error,
    },

    /// A read, write or stat failed.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    /// The payload file does not have the length recorded when it was added.
    #[error("`{}` changed size: expected {expected} bytes, read {actual}", .path.display())]
    SizeMismatch {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    #[error("`{}` is already queued", .0.display())]
    DuplicatePath(PathBuf),

    #[error("`{}` not found", .0.display())]
    NotFound(PathBuf),

    #[error("a transfer is already running")]
    Busy,

    #[error("link `{0}` is not open")]
    LinkNotOpen(String),

    #[error("nothing to transfer")]
    EmptyJob,

    /// The transfer was stopped on request. Not a malfunction.
    #[error("transfer cancelled")]
    Cancelled,
}

impl Error {
    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        Error::Io {
            context: context.into(),
            source,
        }
    }

    /// `true` when the error only records a deliberate stop.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[test]
fn cancellation_is_told_apart() {
    assert!(Error::Cancelled.is_cancellation());
    assert!(!Error::Busy.is_cancellation());
    assert!(!Error::io("write", io::Error::from(io::ErrorKind::BrokenPipe)).is_cancellation());
}

#[test]
fn messages_name_the_path() {
    let err = Error::SizeMismatch {
        path: "fw.bin".into(),
        expected: 10,
        actual: 8,
    };
    assert_eq!(
        err.to_string(),
        "`fw.bin` changed size: expected 10 bytes, read 8"
    );
    assert_eq!(
        Error::DuplicatePath("a.bin".into()).to_string(),
        "`a.bin` is already queued"
    );
}
