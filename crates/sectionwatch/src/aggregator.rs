//! Debounced aggregation of visibility notifications.
//!
//! Scrolling produces bursts of threshold crossings. The aggregator buffers
//! them and only publishes a [`VisibilitySnapshot`] once the stream has been
//! quiet for a full settling window:
//!
//! - every accepted event re-arms the window (debounce, not throttle)
//! - within a window only the latest event per anchor is kept
//! - a window that elapses with nothing buffered emits nothing
//! - events for anchors outside the registry are dropped
//!
//! The aggregator owns its timer state, so independent trackers never share
//! a pending window.

use std::collections::{HashMap, HashSet};

use tracing::{debug, trace};

use crate::anchor::AnchorId;
use crate::registry::{AnchorRegistry, RegistryDiff};
use crate::visibility::{Millis, VisibilityEntry, VisibilityEvent, VisibilitySnapshot};

/// Coalesces visibility events into one snapshot per settled window.
#[derive(Debug, Clone)]
pub struct DebouncedAggregator {
    /// Length of the quiet period required before emitting.
    window: Millis,

    /// Anchors currently under observation.
    tracked: HashSet<AnchorId>,

    /// Latest buffered event per anchor for the open window.
    pending: HashMap<AnchorId, VisibilityEvent>,

    /// When the open window settles.
    deadline: Option<Millis>,

    /// Last settled visibility of every tracked anchor.
    settled: HashMap<AnchorId, VisibilityEntry>,

    /// Number of snapshots emitted so far.
    tick: u64,
}

impl DebouncedAggregator {
    /// Create an aggregator with the given settling window.
    #[must_use]
    pub fn new(window: Millis) -> Self {
        Self {
            window,
            tracked: HashSet::new(),
            pending: HashMap::new(),
            deadline: None,
            settled: HashMap::new(),
            tick: 0,
        }
    }

    /// Length of the settling window.
    #[must_use]
    pub fn window(&self) -> Millis {
        self.window
    }

    /// Number of snapshots emitted so far.
    #[must_use]
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// When the open window settles, if one is open.
    #[must_use]
    pub fn deadline(&self) -> Option<Millis> {
        self.deadline
    }

    /// Number of anchors with a buffered event.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Apply a registry change.
    ///
    /// State for removed anchors is discarded, added anchors start hidden,
    /// and retained anchors keep both their settled entry and any buffered
    /// event. The outstanding window is cancelled; if retained events are
    /// still buffered a fresh window is opened at `now`.
    pub fn track(&mut self, diff: &RegistryDiff, now: Millis) {
        for id in &diff.removed {
            self.tracked.remove(id);
            self.settled.remove(id);
            if self.pending.remove(id).is_some() {
                trace!(anchor = %id, "Discarded buffered event for removed anchor");
            }
        }
        for id in &diff.added {
            self.tracked.insert(id.clone());
            self.settled.insert(id.clone(), VisibilityEntry::HIDDEN);
        }

        let cancelled = self.deadline.take();
        if !self.pending.is_empty() {
            self.deadline = Some(now.saturating_add(self.window));
        }
        if cancelled.is_some() {
            debug!(
                retained_pending = self.pending.len(),
                "Cancelled debounce window on re-registration"
            );
        }
    }

    /// Buffer an event and re-arm the settling window.
    ///
    /// Returns `false` if the anchor is not tracked; such events are dropped.
    pub fn push(&mut self, event: VisibilityEvent, now: Millis) -> bool {
        if !self.tracked.contains(&event.anchor_id) {
            trace!(anchor = %event.anchor_id, "Dropping event for untracked anchor");
            return false;
        }
        trace!(
            anchor = %event.anchor_id,
            visible = event.is_visible,
            ratio = event.intersection_ratio,
            "Buffered visibility event"
        );
        self.pending.insert(event.anchor_id.clone(), event);
        self.deadline = Some(now.saturating_add(self.window));
        true
    }

    /// Emit a snapshot if the window has settled by `now`.
    pub fn poll(&mut self, now: Millis, registry: &AnchorRegistry) -> Option<VisibilitySnapshot> {
        match self.deadline {
            Some(deadline) if now >= deadline => {}
            _ => return None,
        }
        self.deadline = None;
        self.settle(registry)
    }

    /// Emit immediately, ignoring the window.
    pub fn flush(&mut self, registry: &AnchorRegistry) -> Option<VisibilitySnapshot> {
        self.deadline = None;
        self.settle(registry)
    }

    /// Snapshot of the settled state without the open window.
    #[must_use]
    pub fn current(&self, registry: &AnchorRegistry) -> VisibilitySnapshot {
        VisibilitySnapshot::from_entries(registry, &self.settled, self.tick)
    }

    fn settle(&mut self, registry: &AnchorRegistry) -> Option<VisibilitySnapshot> {
        if self.pending.is_empty() {
            return None;
        }
        let merged = self.pending.len();
        for (id, event) in self.pending.drain() {
            self.settled.insert(id, event.entry());
        }
        self.tick += 1;
        debug!(tick = self.tick, merged, "Visibility settled");
        Some(self.current(registry))
    }
}
