//! Lock-free frame counters. Makes the per-frame drop policy observable: every
//! inbound frame ends up either dispatched, rejected by the decoder, or
//! discarded (non-text frames). Dispatched frames whose callback panicked are
//! counted once more under `callback_panics`.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct FrameStats {
    received: AtomicU64,
    dispatched: AtomicU64,
    decode_errors: AtomicU64,
    discarded: AtomicU64,
    callback_panics: AtomicU64,
}

/// Point-in-time copy of [`FrameStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FrameStatsSnapshot {
    pub received: u64,
    pub dispatched: u64,
    pub decode_errors: u64,
    pub discarded: u64,
    pub callback_panics: u64,
}

impl FrameStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatched(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_discarded(&self) {
        self.discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_callback_panic(&self) {
        self.callback_panics.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> FrameStatsSnapshot {
        FrameStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            callback_panics: self.callback_panics.load(Ordering::Relaxed),
        }
    }
}
