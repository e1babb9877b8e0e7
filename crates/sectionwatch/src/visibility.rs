//! Visibility notifications, settled snapshots and document layout.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::anchor::AnchorId;
use crate::registry::AnchorRegistry;

/// Milliseconds since the tracker epoch.
pub type Millis = u64;

const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Maps tokio time onto the tracker's millisecond timeline.
///
/// Under a paused tokio clock this is fully deterministic.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    epoch: Instant,
}

impl Clock {
    /// Start a clock whose epoch is now.
    #[must_use]
    pub fn start() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    /// Milliseconds elapsed since the epoch.
    #[must_use]
    pub fn now_ms(&self) -> Millis {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// The tokio instant corresponding to a timeline position.
    ///
    /// Positions beyond what the platform clock can represent map to a
    /// point about thirty years ahead.
    #[must_use]
    pub fn instant_at(&self, at: Millis) -> Instant {
        self.epoch
            .checked_add(Duration::from_millis(at))
            .unwrap_or_else(|| Instant::now() + FAR_FUTURE)
    }
}

/// Clamp a reported ratio into `[0, 1]`, mapping NaN to zero.
fn sanitize_ratio(ratio: f64) -> f64 {
    if ratio.is_nan() {
        0.0
    } else {
        ratio.clamp(0.0, 1.0)
    }
}

/// A single threshold crossing reported by the visibility source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisibilityEvent {
    /// The anchor that crossed a threshold.
    pub anchor_id: AnchorId,
    /// Whether any part of the anchor intersects the viewport.
    pub is_visible: bool,
    /// Fraction of the anchor inside the viewport.
    pub intersection_ratio: f64,
    /// When the source observed the crossing.
    pub timestamp: Millis,
}

impl VisibilityEvent {
    /// Create an event, clamping the ratio into `[0, 1]`.
    #[must_use]
    pub fn new(
        anchor_id: impl Into<AnchorId>,
        is_visible: bool,
        intersection_ratio: f64,
        timestamp: Millis,
    ) -> Self {
        Self {
            anchor_id: anchor_id.into(),
            is_visible,
            intersection_ratio: sanitize_ratio(intersection_ratio),
            timestamp,
        }
    }

    /// The visibility entry this event sets.
    #[must_use]
    pub fn entry(&self) -> VisibilityEntry {
        VisibilityEntry::new(self.is_visible, self.intersection_ratio)
    }
}

/// Visibility of one anchor inside a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct VisibilityEntry {
    /// Whether the anchor intersects the viewport.
    pub is_visible: bool,
    /// Fraction of the anchor inside the viewport.
    pub intersection_ratio: f64,
}

impl VisibilityEntry {
    /// The entry used for anchors nobody has reported on.
    pub const HIDDEN: Self = Self {
        is_visible: false,
        intersection_ratio: 0.0,
    };

    /// Create an entry, clamping the ratio into `[0, 1]`.
    #[must_use]
    pub fn new(is_visible: bool, intersection_ratio: f64) -> Self {
        Self {
            is_visible,
            intersection_ratio: sanitize_ratio(intersection_ratio),
        }
    }
}

/// Settled visibility of every registered anchor, in registry order.
///
/// A snapshot is always total over the registry it was built from: anchors
/// without a report are present as [`VisibilityEntry::HIDDEN`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VisibilitySnapshot {
    tick: u64,
    entries: Vec<(AnchorId, VisibilityEntry)>,
}

impl VisibilitySnapshot {
    /// A snapshot in which nothing is visible.
    #[must_use]
    pub fn hidden(registry: &AnchorRegistry, tick: u64) -> Self {
        Self::from_entries(registry, &HashMap::new(), tick)
    }

    /// Build a snapshot over `registry`, defaulting absent anchors to hidden.
    #[must_use]
    pub fn from_entries(
        registry: &AnchorRegistry,
        known: &HashMap<AnchorId, VisibilityEntry>,
        tick: u64,
    ) -> Self {
        let entries = registry
            .ids()
            .iter()
            .map(|id| {
                let entry = known.get(id).copied().unwrap_or(VisibilityEntry::HIDDEN);
                (id.clone(), entry)
            })
            .collect();
        Self { tick, entries }
    }

    /// Aggregation tick that produced this snapshot.
    #[must_use]
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Number of anchors covered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the snapshot covers no anchors.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Visibility of an anchor; hidden if it is not covered.
    #[must_use]
    pub fn get(&self, id: &str) -> VisibilityEntry {
        self.entries
            .iter()
            .find(|(anchor, _)| anchor.as_str() == id)
            .map_or(VisibilityEntry::HIDDEN, |(_, entry)| *entry)
    }

    /// All entries in registry order.
    pub fn iter(&self) -> impl Iterator<Item = (&AnchorId, &VisibilityEntry)> + '_ {
        self.entries.iter().map(|(id, entry)| (id, entry))
    }
}

/// Position and size of an anchor's region.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnchorGeometry {
    /// Distance from the viewport top to the region top; negative once
    /// the region has been scrolled past.
    pub top: f64,
    /// Height of the region.
    #[serde(default)]
    pub height: f64,
}

impl AnchorGeometry {
    /// Create a geometry record.
    #[must_use]
    pub fn new(top: f64, height: f64) -> Self {
        Self { top, height }
    }

    /// Whether the region intersects a viewport of the given height.
    #[must_use]
    pub fn is_on_screen(&self, viewport_height: f64) -> bool {
        if self.height <= 0.0 {
            return self.top >= 0.0 && self.top < viewport_height;
        }
        self.top < viewport_height && self.top + self.height > 0.0
    }

    /// Fraction of the region inside a viewport of the given height.
    #[must_use]
    pub fn intersection_ratio(&self, viewport_height: f64) -> f64 {
        if self.height <= 0.0 {
            return if self.is_on_screen(viewport_height) {
                1.0
            } else {
                0.0
            };
        }
        let overlap = (self.top + self.height).min(viewport_height) - self.top.max(0.0);
        sanitize_ratio(overlap.max(0.0) / self.height)
    }
}

/// Measured layout of the document and its anchors.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LayoutSnapshot {
    /// Height of the viewport.
    pub viewport_height: f64,
    /// Current vertical scroll offset of the document.
    #[serde(default)]
    pub scroll_top: f64,
    /// Total scrollable height of the document.
    #[serde(default)]
    pub document_height: f64,
    /// Geometry per anchor.
    #[serde(default)]
    pub anchors: BTreeMap<AnchorId, AnchorGeometry>,
}

impl LayoutSnapshot {
    /// Create a layout with no anchor geometry.
    #[must_use]
    pub fn new(viewport_height: f64, scroll_top: f64, document_height: f64) -> Self {
        Self {
            viewport_height,
            scroll_top,
            document_height,
            anchors: BTreeMap::new(),
        }
    }

    /// Add geometry for an anchor.
    #[must_use]
    pub fn with_anchor(mut self, id: impl Into<AnchorId>, top: f64, height: f64) -> Self {
        self.anchors.insert(id.into(), AnchorGeometry::new(top, height));
        self
    }

    /// Vertical midline of the viewport.
    #[must_use]
    pub fn midline(&self) -> f64 {
        self.viewport_height / 2.0
    }

    /// Geometry of an anchor, if measured.
    #[must_use]
    pub fn geometry(&self, id: &str) -> Option<&AnchorGeometry> {
        self.anchors.get(id)
    }

    /// Scroll position as a fraction of the scrollable range.
    ///
    /// `None` when the document does not scroll.
    #[must_use]
    pub fn scroll_ratio(&self) -> Option<f64> {
        let range = self.document_height - self.viewport_height;
        if range <= 0.0 {
            return None;
        }
        Some(sanitize_ratio(self.scroll_top / range))
    }
}
