//! The chunked send protocol.
//!
//! Pushing a payload follows the same shape whatever the device on the other
//! side expects:
//!
//! ```text
//!   start marker ── settle ── chunk ── pace ── chunk ── pace ── … ── end marker
//! ```
//!
//! What goes on the wire is decided by a [`ChunkProtocol`]: the framing
//! markers, the chunk size, the delays and the way a chunk is delivered (a
//! plain write, or a write followed by waiting for an acknowledgement). The
//! [`SimulatedProtocol`] uses fixed literal markers and fixed delays in place of
//! a real bootloader handshake.
//!
//! [`send_payload`] drives one payload through a protocol over an open
//! [`Link`], checking for cancellation before every chunk.

mod chunked;
mod simulated;

pub use chunked::send_payload;
pub use simulated::{Pacing, SimulatedProtocol};

use std::time::Duration;

use crate::{error::Result, link::Link, payload::PayloadClass};

/// What a device protocol has to provide for the engine to push payloads.
pub trait ChunkProtocol: Send + Sync {
    /// Sent before the first chunk of a payload.
    fn start_marker(&self, class: PayloadClass) -> &[u8];

    /// Sent after the last chunk of a payload.
    fn end_marker(&self, class: PayloadClass) -> &[u8];

    /// Maximum number of payload bytes in one chunk. Never zero.
    fn chunk_size(&self, class: PayloadClass) -> usize;

    /// Time the device needs after the start marker before data can follow.
    fn settle_time(&self, _class: PayloadClass) -> Duration {
        Duration::from_millis(0)
    }

    /// Pause after each chunk.
    fn chunk_delay(&self, _class: PayloadClass) -> Duration {
        Duration::from_millis(0)
    }

    /// Deliver one chunk. A protocol with acknowledgements waits for it here.
    fn send_chunk(&self, link: &mut dyn Link, _class: PayloadClass, chunk: &[u8]) -> Result<()> {
        link.write(chunk)
    }

    /// Ask the device to restart once everything has been pushed.
    fn reset(&self, link: &mut dyn Link) -> Result<()> {
        link.reset_device()
    }
}
