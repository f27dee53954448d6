//! Per-channel flow accounting

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam::utils::CachePadded;

/// Counters bumped on the delivery path; reads are relaxed snapshots.
#[derive(Default)]
pub struct ChannelCounters {
    inner: CachePadded<Counters>,
}

#[derive(Default)]
struct Counters {
    received: AtomicU64,
    published: AtomicU64,
    stale_dropped: AtomicU64,
    runt_dropped: AtomicU64,
    preview_forwarded: AtomicU64,
    preview_dropped: AtomicU64,
}

/// Point-in-time view of one channel's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    /// Deliveries that reached the controller, kept or not.
    pub received: u64,
    /// Frames that made it into the slot.
    pub published: u64,
    /// Stale or duplicate sequence numbers, dropped silently.
    pub stale_dropped: u64,
    /// Payloads whose length disagreed with their geometry.
    pub runt_dropped: u64,
    /// Preview messages handed to subscribers.
    pub preview_forwarded: u64,
    /// Preview messages lost to a full subscriber queue.
    pub preview_dropped: u64,
}

impl ChannelCounters {
    pub fn record_received(&self) {
        self.inner.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_published(&self) {
        self.inner.published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale_dropped(&self) {
        self.inner.stale_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_runt_dropped(&self) {
        self.inner.runt_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_preview_forwarded(&self) {
        self.inner.preview_forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_preview_dropped(&self) {
        self.inner.preview_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ChannelStats {
        ChannelStats {
            received: self.inner.received.load(Ordering::Relaxed),
            published: self.inner.published.load(Ordering::Relaxed),
            stale_dropped: self.inner.stale_dropped.load(Ordering::Relaxed),
            runt_dropped: self.inner.runt_dropped.load(Ordering::Relaxed),
            preview_forwarded: self.inner.preview_forwarded.load(Ordering::Relaxed),
            preview_dropped: self.inner.preview_dropped.load(Ordering::Relaxed),
        }
    }
}
