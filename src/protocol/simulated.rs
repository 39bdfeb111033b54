//! Fixed-marker protocol with artificial pacing.

use std::time::Duration;

use super::ChunkProtocol;
use crate::payload::PayloadClass;

const FLASH_START: &[u8] = b"FLASH_START\n";
const FLASH_END: &[u8] = b"FLASH_END\n";
const RESOURCE_START: &[u8] = b"RESOURCE_START\n";
const RESOURCE_END: &[u8] = b"RESOURCE_END\n";

const FIRMWARE_CHUNK_SIZE: usize = 1024;
const RESOURCE_CHUNK_SIZE: usize = 512;

/// Delays inserted by the [`SimulatedProtocol`].
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Pacing {
    /// Wait after a start marker.
    pub settle: Duration,
    /// Wait after each firmware chunk.
    pub firmware_chunk: Duration,
    /// Wait after each resource chunk. Resources go slower than firmware.
    pub resource_chunk: Duration,
}
impl Pacing {
    /// No delay at all. Useful with links that have nothing on the other end.
    pub fn none() -> Self {
        Pacing {
            settle: Duration::from_millis(0),
            firmware_chunk: Duration::from_millis(0),
            resource_chunk: Duration::from_millis(0),
        }
    }
}
impl Default for Pacing {
    fn default() -> Self {
        Pacing {
            settle: Duration::from_millis(100),
            firmware_chunk: Duration::from_millis(10),
            resource_chunk: Duration::from_millis(20),
        }
    }
}

/// Frames firmware with `FLASH_START\n`/`FLASH_END\n` in 1024 byte chunks and
/// resources with `RESOURCE_START\n`/`RESOURCE_END\n` in 512 byte chunks.
/// Chunks are written as they are, flow control is modelled by delays.
#[derive(Debug, Clone, Default)]
pub struct SimulatedProtocol {
    pacing: Pacing,
}
impl SimulatedProtocol {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pacing(pacing: Pacing) -> Self {
        SimulatedProtocol { pacing }
    }

    pub fn pacing(&self) -> Pacing {
        self.pacing
    }
}

impl ChunkProtocol for SimulatedProtocol {
    fn start_marker(&self, class: PayloadClass) -> &[u8] {
        match class {
            PayloadClass::Firmware => FLASH_START,
            PayloadClass::Resource => RESOURCE_START,
        }
    }

    fn end_marker(&self, class: PayloadClass) -> &[u8] {
        match class {
            PayloadClass::Firmware => FLASH_END,
            PayloadClass::Resource => RESOURCE_END,
        }
    }

    fn chunk_size(&self, class: PayloadClass) -> usize {
        match class {
            PayloadClass::Firmware => FIRMWARE_CHUNK_SIZE,
            PayloadClass::Resource => RESOURCE_CHUNK_SIZE,
        }
    }

    fn settle_time(&self, _class: PayloadClass) -> Duration {
        self.pacing.settle
    }

    fn chunk_delay(&self, class: PayloadClass) -> Duration {
        match class {
            PayloadClass::Firmware => self.pacing.firmware_chunk,
            PayloadClass::Resource => self.pacing.resource_chunk,
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
