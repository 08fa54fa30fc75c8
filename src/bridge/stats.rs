//! Receive-loop counters.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Drops are logged at warn on the first one and every this many after.
const DROP_WARN_EVERY: u64 = 100;

/// Counters updated by the bridge thread, readable from any thread.
#[derive(Debug, Default)]
pub struct BridgeStats {
    received: AtomicU64,
    forwarded: AtomicU64,
    dropped: AtomicU64,
    errors: AtomicU64,
}

/// Point-in-time copy of [`BridgeStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub received: u64,
    pub forwarded: u64,
    pub dropped: u64,
    pub errors: u64,
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "received {}, forwarded {}, dropped {}, errors {}",
            self.received, self.forwarded, self.dropped, self.errors
        )
    }
}

impl BridgeStats {
    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_forwarded(&self) {
        self.forwarded.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a dropped datagram and log it.
    pub fn record_dropped(&self, reason: &str) {
        let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        if dropped == 1 || dropped % DROP_WARN_EVERY == 0 {
            log::warn!("UDP bridge: dropped {} datagrams so far ({})", dropped, reason);
        } else {
            log::debug!("UDP bridge: datagram dropped ({})", reason);
        }
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}
