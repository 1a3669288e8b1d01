//! Ingest throughput measurement.

use mdcache_book::OrderBookStore;
use mdcache_core::EventDecoder;
use std::time::{Duration, Instant};

/// Result of an ingest run.
#[derive(Debug, Clone)]
pub struct IngestResult {
    /// Frames processed.
    pub frames: u64,
    /// Frames that failed to decode.
    pub rejected: u64,
    /// Total bytes processed.
    pub bytes: u64,
    /// Total duration.
    pub duration: Duration,
}

impl IngestResult {
    /// Returns frames per second.
    #[must_use]
    pub fn frames_per_second(&self) -> f64 {
        self.frames as f64 / self.duration.as_secs_f64()
    }

    /// Returns megabytes per second.
    #[must_use]
    pub fn mb_per_second(&self) -> f64 {
        self.bytes as f64 / self.duration.as_secs_f64() / (1024.0 * 1024.0)
    }
}

/// Decodes every frame and applies it to `store`, the way the ingest task does.
pub fn run_ingest<F: AsRef<[u8]>>(
    frames: &[F],
    decoder: &EventDecoder,
    store: &mut OrderBookStore,
) -> IngestResult {
    let mut bytes = 0u64;
    let mut rejected = 0u64;
    let start = Instant::now();

    for frame in frames {
        let frame = frame.as_ref();
        bytes += frame.len() as u64;
        match decoder.decode_frame(frame) {
            Ok(events) => {
                store.apply_all(events);
            }
            Err(_) => {
                rejected += 1;
                store.record_decode_error();
            }
        }
    }

    IngestResult {
        frames: frames.len() as u64,
        rejected,
        bytes,
        duration: start.elapsed(),
    }
}
