//! Pushing one payload, chunk by chunk.

use std::{fs, thread};

use log::{debug, trace};

use super::ChunkProtocol;
use crate::{
    engine::CancelToken,
    error::{Error, Result},
    link::Link,
    payload::Payload,
};

/// Push `payload` over `link` and return the number of data bytes sent.
///
/// The whole file is read first and its length checked against the length
/// recorded when the payload was queued; on mismatch nothing is written. Then
/// the start marker, the chunks and the end marker are written in order.
/// `progress` receives the payload-relative percentage after every chunk.
///
/// `running` is checked before each chunk. Once it is cleared, no further
/// chunk is written, the end marker is skipped and [`Error::Cancelled`] is
/// returned. A chunk already handed to the link is never rolled back.
pub fn send_payload(
    link: &mut dyn Link,
    payload: &Payload,
    protocol: &dyn ChunkProtocol,
    running: &CancelToken,
    progress: &mut dyn FnMut(f64),
) -> Result<u64> {
    let path = payload.path();
    let data = fs::read(path).map_err(|e| Error::io(format!("read `{}`", path.display()), e))?;
    if data.len() as u64 != payload.size_bytes() {
        return Err(Error::SizeMismatch {
            path: path.to_path_buf(),
            expected: payload.size_bytes(),
            actual: data.len() as u64,
        });
    }

    let class = payload.class();
    let chunk_size = protocol.chunk_size(class).max(1);

    link.write(protocol.start_marker(class))?;
    if data.is_empty() {
        // Nothing follows, the device does not need time to get ready.
        progress(100.0);
        link.write(protocol.end_marker(class))?;
        debug!("{} is empty, sent framing only", payload.name());
        return Ok(0);
    }
    thread::sleep(protocol.settle_time(class));

    let total = data.len();
    let mut sent = 0usize;
    for (index, chunk) in data.chunks(chunk_size).enumerate() {
        if !running.is_running() {
            debug!(
                "{} interrupted after {} of {} bytes",
                payload.name(),
                sent,
                total
            );
            return Err(Error::Cancelled);
        }

        protocol.send_chunk(link, class, chunk)?;
        sent += chunk.len();
        trace!("chunk {} of {}: {} bytes", index, payload.name(), chunk.len());

        progress(percent(sent, total));
        thread::sleep(protocol.chunk_delay(class));
    }

    link.write(protocol.end_marker(class))?;
    Ok(sent as u64)
}

fn percent(sent: usize, total: usize) -> f64 {
    (sent as f64 / total as f64 * 100.0).min(100.0)
}

// =============================================================================
// Unit Tests
// =============================================================================
