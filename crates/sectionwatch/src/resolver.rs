//! Mapping a settled snapshot to the single active anchor.
//!
//! [`resolve`] is a pure function of the snapshot, the registry order, the
//! optional layout and the previous state. Choice order:
//!
//! 1. the visible anchor with the highest intersection ratio, ties going to
//!    the lowest registry index
//! 2. with nothing visible, the anchor whose top has scrolled furthest while
//!    staying at or above the viewport midline
//! 3. the first registered anchor
//!
//! When the choice matches the previous state the previous `Arc` is returned
//! as-is, so observers can detect "nothing changed" by pointer identity.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::anchor::AnchorId;
use crate::registry::AnchorRegistry;
use crate::visibility::{LayoutSnapshot, VisibilitySnapshot};

/// Why an anchor became active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveReason {
    /// Highest intersection ratio among visible anchors.
    HighestRatio,
    /// Nothing visible; last anchor above the viewport midline.
    FallbackAboveMidline,
    /// Registry-order default (seeding, or nothing else applies).
    InitialDefault,
    /// Optimistic target of a user navigation.
    UserClick,
}

impl std::fmt::Display for ResolveReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HighestRatio => write!(f, "highest_ratio"),
            Self::FallbackAboveMidline => write!(f, "fallback_above_midline"),
            Self::InitialDefault => write!(f, "initial_default"),
            Self::UserClick => write!(f, "user_click"),
        }
    }
}

/// The current active anchor.
///
/// `active` is `None` only for the sentinel state of an empty registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveState {
    /// The active anchor, or `None` for the sentinel.
    pub active: Option<AnchorId>,
    /// Aggregation tick the state was resolved at.
    pub resolved_at_tick: u64,
    /// Why this anchor was chosen.
    pub reason: ResolveReason,
}

impl ActiveState {
    /// Create a state for an active anchor.
    #[must_use]
    pub fn new(active: AnchorId, resolved_at_tick: u64, reason: ResolveReason) -> Self {
        Self {
            active: Some(active),
            resolved_at_tick,
            reason,
        }
    }

    /// The sentinel state: nothing is active.
    #[must_use]
    pub fn none(resolved_at_tick: u64) -> Self {
        Self {
            active: None,
            resolved_at_tick,
            reason: ResolveReason::InitialDefault,
        }
    }

    /// The active anchor id.
    #[must_use]
    pub fn active_id(&self) -> Option<&AnchorId> {
        self.active.as_ref()
    }

    /// Whether this is the sentinel state.
    #[must_use]
    pub fn is_none(&self) -> bool {
        self.active.is_none()
    }

    /// Whether `id` is the active anchor.
    #[must_use]
    pub fn is_active(&self, id: &str) -> bool {
        self.active.as_ref().is_some_and(|active| active.as_str() == id)
    }
}

impl Default for ActiveState {
    fn default() -> Self {
        Self::none(0)
    }
}

/// Resolve the next active state.
///
/// Never fails: an empty registry yields the sentinel.
#[must_use]
pub fn resolve(
    snapshot: &VisibilitySnapshot,
    registry: &AnchorRegistry,
    layout: Option<&LayoutSnapshot>,
    previous: &Arc<ActiveState>,
) -> Arc<ActiveState> {
    let Some((id, reason)) = choose(snapshot, registry, layout) else {
        if previous.is_none() {
            return Arc::clone(previous);
        }
        return Arc::new(ActiveState::none(snapshot.tick()));
    };

    if previous.active_id() == Some(id) {
        return Arc::clone(previous);
    }
    Arc::new(ActiveState::new(id.clone(), snapshot.tick(), reason))
}

fn choose<'a>(
    snapshot: &VisibilitySnapshot,
    registry: &'a AnchorRegistry,
    layout: Option<&LayoutSnapshot>,
) -> Option<(&'a AnchorId, ResolveReason)> {
    if let Some(id) = highest_ratio(snapshot, registry) {
        return Some((id, ResolveReason::HighestRatio));
    }
    if let Some(id) = layout.and_then(|layout| last_above_midline(registry, layout)) {
        return Some((id, ResolveReason::FallbackAboveMidline));
    }
    registry
        .first()
        .map(|id| (id, ResolveReason::InitialDefault))
}

/// Visible anchor with the greatest ratio; strict comparison keeps the
/// lowest index on ties.
fn highest_ratio<'a>(
    snapshot: &VisibilitySnapshot,
    registry: &'a AnchorRegistry,
) -> Option<&'a AnchorId> {
    let mut best: Option<(&AnchorId, f64)> = None;
    for id in registry.ids() {
        let entry = snapshot.get(id.as_str());
        if !entry.is_visible {
            continue;
        }
        match best {
            Some((_, ratio)) if entry.intersection_ratio <= ratio => {}
            _ => best = Some((id, entry.intersection_ratio)),
        }
    }
    best.map(|(id, _)| id)
}

/// Anchor with the greatest top that is still at or above the midline.
fn last_above_midline<'a>(
    registry: &'a AnchorRegistry,
    layout: &LayoutSnapshot,
) -> Option<&'a AnchorId> {
    let midline = layout.midline();
    let mut best: Option<(&AnchorId, f64)> = None;
    for id in registry.ids() {
        let Some(geometry) = layout.geometry(id.as_str()) else {
            continue;
        };
        if geometry.top > midline {
            continue;
        }
        match best {
            Some((_, top)) if geometry.top <= top => {}
            _ => best = Some((id, geometry.top)),
        }
    }
    best.map(|(id, _)| id)
}
