//! Serflash is a utility to push firmware images and resource blobs to an
//! embedded target over a serial connection, one chunk at a time, while
//! reporting progress and allowing the transfer to be stopped at any time.
//!
//! The pieces, leaf first:
//!
//! * a [`Link`] is an open byte-stream connection to the device, usually a
//!   [`SerialLink`] configured from [`Settings`];
//! * a [`Payload`] describes one file to push, tagged as firmware or resource;
//! * a [`TransferJob`] queues payloads, firmware always going before resources;
//! * a [`ChunkProtocol`] decides how a payload goes on the wire: framing
//!   markers, chunk size and pacing. The [`SimulatedProtocol`] frames payloads
//!   with fixed literal markers and paces them with fixed delays;
//! * the [`Engine`] runs a job over a link on a worker thread and reports to an
//!   [`Observer`].
//!
//! The run of a job is implemented as a state machine, in terms of **states**
//! and **transitions** between them with the following characteristics:
//!
//! * Can only be in one state at any time.
//! * Each state can have its own associated data if needed.
//! * It is possible to have some shared data between **all** states.
//! * Transitions between states are triggered via typed **events** and follow
//!   defined semantics.
//! * Only explicitly defined transitions should be permitted and as many errors
//!   should be detected at **compile-time**.
//! * Transitioning from one state to another consumes the original state and
//!   renders it unusable. Any transition back to that state would create a new
//!   state.
//! * Data can be transferred from one state to the next by attaching it to the
//!   transition event.
//!
//! The implementation of state transitions leverages `rust`'s `From` and `Into`
//! pattern: only transitions for which the `From` trait is implemented are
//! authorized and any other transition would be detected at compile-time as an
//! error.
//!
//! Failures of a single payload never stop the job; they are recorded in the
//! [`RunReport`] and the next payload is pushed. Only a cancellation request
//! stops a job early.

mod engine;
mod error;
mod link;
mod payload;
mod protocol;
mod settings;

pub use engine::{
    CancelToken, ChannelObserver, Engine, EngineEvent, EngineState, LogLine, LogObserver,
    NullObserver, Observer, Outcome, PayloadFailure, ProgressScope, RunReport,
};
pub use error::{Error, Result};
pub use link::{available_ports, Link, MockLink, PortEntry, SerialLink};
pub use payload::{format_size, Payload, PayloadClass, TransferJob};
pub use protocol::{send_payload, ChunkProtocol, Pacing, SimulatedProtocol};
pub use settings::{
    DataBits, FlashOptions, FlowControl, Parity, Settings, SettingsBuilder, StopBits, BAUD_RATES,
};
