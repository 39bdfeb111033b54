//! In-memory link for tests and dry runs.

use std::{
    collections::VecDeque,
    io,
    sync::{Arc, Mutex, MutexGuard},
};

use super::Link;
use crate::error::{Error, Result};

#[derive(Debug)]
struct Inner {
    open: bool,
    writes: Vec<Vec<u8>>,
    reads: VecDeque<Vec<u8>>,
    fail_writes: Vec<usize>,
    attempts: usize,
    resets: usize,
    flushes: usize,
}

/// A link that records every write in memory.
///
/// Clones share the same recording, so a test can keep one handle while the
/// engine owns the other.
#[derive(Debug, Clone)]
pub struct MockLink {
    name: String,
    inner: Arc<Mutex<Inner>>,
}

impl MockLink {
    /// An open mock link.
    pub fn new() -> Self {
        MockLink {
            name: "mock".into(),
            inner: Arc::new(Mutex::new(Inner {
                open: true,
                writes: Vec::new(),
                reads: VecDeque::new(),
                fail_writes: Vec::new(),
                attempts: 0,
                resets: 0,
                flushes: 0,
            })),
        }
    }

    /// A mock link that was never opened.
    pub fn closed() -> Self {
        let link = Self::new();
        link.lock().open = false;
        link
    }

    /// Make the `n`-th write attempt (0-based, counting all writes) fail with
    /// a broken pipe.
    pub fn fail_write(self, n: usize) -> Self {
        self.lock().fail_writes.push(n);
        self
    }

    /// Queue bytes to be returned by the next read.
    pub fn queue_read(&self, bytes: &[u8]) {
        self.lock().reads.push_back(bytes.to_vec());
    }

    /// Every successful write, in order.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.lock().writes.clone()
    }

    /// All successfully written bytes as one stream.
    pub fn written(&self) -> Vec<u8> {
        self.lock().writes.concat()
    }

    pub fn resets(&self) -> usize {
        self.lock().resets
    }

    pub fn flushes(&self) -> usize {
        self.lock().flushes
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn not_connected(&self, what: &str) -> Error {
        Error::io(
            format!("{} `{}`", what, self.name),
            io::Error::from(io::ErrorKind::NotConnected),
        )
    }
}

impl Default for MockLink {
    fn default() -> Self {
        Self::new()
    }
}

impl Link for MockLink {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn is_open(&self) -> bool {
        self.lock().open
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let mut inner = self.lock();
        if !inner.open {
            drop(inner);
            return Err(self.not_connected("write to"));
        }
        let attempt = inner.attempts;
        inner.attempts += 1;
        if inner.fail_writes.contains(&attempt) {
            return Err(Error::io(
                format!("write to `{}`", self.name),
                io::Error::from(io::ErrorKind::BrokenPipe),
            ));
        }
        inner.writes.push(bytes.to_vec());
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut inner = self.lock();
        if !inner.open {
            drop(inner);
            return Err(self.not_connected("read from"));
        }
        match inner.reads.pop_front() {
            Some(mut pending) => {
                let n = pending.len().min(buf.len());
                buf[..n].copy_from_slice(&pending[..n]);
                if n < pending.len() {
                    inner.reads.push_front(pending.split_off(n));
                }
                Ok(n)
            }
            // Silence from the device reads like a timeout.
            None => Ok(0),
        }
    }

    fn flush(&mut self) -> Result<()> {
        let mut inner = self.lock();
        if !inner.open {
            drop(inner);
            return Err(self.not_connected("flush"));
        }
        inner.flushes += 1;
        Ok(())
    }

    fn close(&mut self) {
        self.lock().open = false;
    }

    fn reset_device(&mut self) -> Result<()> {
        let mut inner = self.lock();
        if !inner.open {
            drop(inner);
            return Err(self.not_connected("reset through"));
        }
        inner.resets += 1;
        Ok(())
    }
}

//==============================================================================
// Unit Tests
//==============================================================================
