//! Nanosecond wall-clock timestamps for exported points and log lines.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;

/// Current wall time in nanoseconds since the Unix epoch.
pub fn unix_nanos() -> u64 {
    let now = Utc::now();
    now.timestamp_nanos_opt()
        .map(|n| n.max(0) as u64)
        .unwrap_or_else(|| now.timestamp_millis().max(0) as u64 * 1_000_000)
}

/// Wall-clock nanoseconds that never repeat or go backwards.
///
/// Loki drops out-of-order or duplicate timestamps within a stream, and many
/// entries can be created in the same nanosecond on a coarse clock.
#[derive(Debug, Default)]
pub struct MonotonicNanos {
    last: AtomicU64,
}

impl MonotonicNanos {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> u64 {
        let wall = unix_nanos();
        let prev = self
            .last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(wall.max(last + 1))
            })
            .unwrap_or(wall);
        wall.max(prev + 1)
    }
}
