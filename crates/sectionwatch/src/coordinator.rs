//! Programmatic scrolling and the suppression window.
//!
//! A user-initiated jump sets the active anchor optimistically and then
//! ignores resolver output for a short window, so intermediate anchors the
//! viewport passes on the way are never highlighted. The window is a plain
//! timeout: scroll completion is not observable reliably. A newer intent
//! replaces the open window (latest wins).

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::anchor::AnchorId;
use crate::visibility::Millis;

/// Where a navigation request came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NavigationOrigin {
    /// A click on a navigation link.
    UserClick,
    /// The location fragment changed externally.
    HashChange,
}

impl std::fmt::Display for NavigationOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UserClick => write!(f, "user_click"),
            Self::HashChange => write!(f, "hash_change"),
        }
    }
}

/// A request to jump to an anchor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationIntent {
    /// Anchor to scroll to.
    pub target_anchor_id: AnchorId,
    /// Where the request came from.
    pub origin: NavigationOrigin,
    /// How long resolver output is ignored after the jump.
    pub suppress_ms: Millis,
}

impl NavigationIntent {
    /// An intent triggered by a navigation click.
    #[must_use]
    pub fn user_click(target: impl Into<AnchorId>, suppress_ms: Millis) -> Self {
        Self {
            target_anchor_id: target.into(),
            origin: NavigationOrigin::UserClick,
            suppress_ms,
        }
    }

    /// An intent triggered by an external fragment change.
    #[must_use]
    pub fn hash_change(target: impl Into<AnchorId>, suppress_ms: Millis) -> Self {
        Self {
            target_anchor_id: target.into(),
            origin: NavigationOrigin::HashChange,
            suppress_ms,
        }
    }
}

/// How the viewport moves to a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScrollBehavior {
    /// Animated scroll.
    #[default]
    Smooth,
    /// Jump immediately.
    Instant,
}

/// Moves the viewport to an anchor.
pub trait Scroller {
    /// Start scrolling to `target`. A later call supersedes an earlier one.
    fn scroll_to(&mut self, target: &AnchorId, behavior: ScrollBehavior);
}

/// Scroller for headless use: records the request in the log only.
#[derive(Debug, Default, Clone, Copy)]
pub struct TraceScroller;

impl Scroller for TraceScroller {
    fn scroll_to(&mut self, target: &AnchorId, behavior: ScrollBehavior) {
        debug!(anchor = %target, ?behavior, "Scroll requested");
    }
}

/// An open suppression window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suppression {
    /// Target of the navigation that opened the window.
    pub target: AnchorId,
    /// Origin of that navigation.
    pub origin: NavigationOrigin,
    /// When the window closes.
    pub until: Millis,
    /// Monotonic number of the navigation; later intents have larger values.
    pub sequence: u64,
    /// Whether a snapshot settled while the window was open.
    pub held: bool,
}

/// Tracks the suppression window for programmatic scrolls.
#[derive(Debug, Default)]
pub struct ScrollCoordinator {
    current: Option<Suppression>,
    sequence: u64,
}

impl ScrollCoordinator {
    /// Create a coordinator with no open window.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a window for `intent`, replacing any open one.
    ///
    /// A snapshot held by the replaced window stays held, so it is still
    /// resolved when the new window closes.
    pub fn begin(&mut self, intent: &NavigationIntent, now: Millis) -> &Suppression {
        self.sequence += 1;
        let mut held = false;
        if let Some(replaced) = self.current.take() {
            debug!(
                previous = %replaced.target,
                next = %intent.target_anchor_id,
                held = replaced.held,
                "Navigation superseded"
            );
            held = replaced.held;
        }
        self.current.insert(Suppression {
            target: intent.target_anchor_id.clone(),
            origin: intent.origin,
            until: now.saturating_add(intent.suppress_ms),
            sequence: self.sequence,
            held,
        })
    }

    /// The open window, if any.
    #[must_use]
    pub fn current(&self) -> Option<&Suppression> {
        self.current.as_ref()
    }

    /// Whether resolver output is suppressed at `now`.
    #[must_use]
    pub fn is_suppressing(&self, now: Millis) -> bool {
        self.current.as_ref().is_some_and(|s| now < s.until)
    }

    /// When the open window closes.
    #[must_use]
    pub fn deadline(&self) -> Option<Millis> {
        self.current.as_ref().map(|s| s.until)
    }

    /// Record that a snapshot arrived while suppressing.
    ///
    /// Returns `true` if the snapshot must not be resolved now.
    pub fn hold(&mut self, now: Millis) -> bool {
        match self.current.as_mut() {
            Some(window) if now < window.until => {
                trace!(target = %window.target, "Snapshot held during suppression");
                window.held = true;
                true
            }
            _ => false,
        }
    }

    /// Close the window if it has elapsed by `now`.
    pub fn expire(&mut self, now: Millis) -> Option<Suppression> {
        match &self.current {
            Some(window) if now >= window.until => {}
            _ => return None,
        }
        let ended = self.current.take();
        if let Some(window) = &ended {
            debug!(target = %window.target, held = window.held, "Suppression window closed");
        }
        ended
    }

    /// Close the window unconditionally.
    pub fn cancel(&mut self) -> Option<Suppression> {
        self.current.take()
    }
}
