//! The active-section tracker.
//!
//! [`SectionTracker`] owns the registry, the debounced aggregator and the
//! scroll coordinator, and is the only writer of the shared
//! [`ActiveState`]. It is a synchronous state machine on an explicit
//! millisecond timeline: callers feed it events and commands stamped with
//! `now`, ask for [`next_deadline`](SectionTracker::next_deadline), and call
//! [`advance`](SectionTracker::advance) when that time arrives. The async
//! [`driver`](crate::driver) does exactly this on a tokio clock; tests and
//! the replay tool do it by hand.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::anchor::{AnchorId, AnchorRecord};
use crate::aggregator::DebouncedAggregator;
use crate::config::{self, Config};
use crate::coordinator::{NavigationIntent, ScrollBehavior, ScrollCoordinator, Scroller, Suppression, TraceScroller};
use crate::error::{Error, Result};
use crate::navigation::{self, Crumb, ProgressMode, TocEntry};
use crate::registry::{AnchorRegistry, RegistryDiff};
use crate::resolver::{self, ActiveState, ResolveReason};
use crate::subscription::{Subscribers, Subscription};
use crate::visibility::{LayoutSnapshot, Millis, VisibilityEvent, VisibilitySnapshot};

/// Timing parameters of a tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerSettings {
    /// Debounce settling window.
    pub settle_ms: Millis,
    /// Suppression window after a programmatic scroll.
    pub suppress_ms: Millis,
    /// How programmatic scrolls move the viewport.
    pub scroll_behavior: ScrollBehavior,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl TrackerSettings {
    /// Check both windows against the configured maximum.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigValidation`] if either window is too long.
    pub fn validate(&self) -> Result<()> {
        config::validate_window("settle_ms", self.settle_ms)?;
        config::validate_window("suppress_ms", self.suppress_ms)
    }
}

impl From<&Config> for TrackerSettings {
    fn from(config: &Config) -> Self {
        Self {
            settle_ms: config.aggregator.settle_ms,
            suppress_ms: config.navigation.suppress_ms,
            scroll_behavior: config.scroll_behavior(),
        }
    }
}

/// Decides which single anchor is active.
pub struct SectionTracker {
    settings: TrackerSettings,
    registry: AnchorRegistry,
    aggregator: DebouncedAggregator,
    coordinator: ScrollCoordinator,
    snapshot: VisibilitySnapshot,
    layout: Option<LayoutSnapshot>,
    state: Arc<ActiveState>,
    subscribers: Subscribers,
    scroller: Box<dyn Scroller>,
    observer_available: bool,
}

impl SectionTracker {
    /// Create a tracker that only logs scroll requests.
    #[must_use]
    pub fn new(settings: TrackerSettings) -> Self {
        Self::with_scroller(settings, Box::new(TraceScroller))
    }

    /// Create a tracker that scrolls through `scroller`.
    #[must_use]
    pub fn with_scroller(settings: TrackerSettings, scroller: Box<dyn Scroller>) -> Self {
        Self {
            settings,
            registry: AnchorRegistry::new(),
            aggregator: DebouncedAggregator::new(settings.settle_ms),
            coordinator: ScrollCoordinator::new(),
            snapshot: VisibilitySnapshot::default(),
            layout: None,
            state: Arc::new(ActiveState::none(0)),
            subscribers: Subscribers::default(),
            scroller,
            observer_available: true,
        }
    }

    /// The tracker's timing parameters.
    #[must_use]
    pub fn settings(&self) -> TrackerSettings {
        self.settings
    }

    // === Registration ===

    /// Replace the tracked anchors for the displayed section.
    ///
    /// Outstanding debounce and suppression windows are cancelled. The
    /// current active anchor is kept if it is still registered; otherwise a
    /// default is seeded: the first anchor already on screen, else the first
    /// registered anchor.
    pub fn register_anchors(
        &mut self,
        ids: Vec<AnchorId>,
        hierarchy: Vec<AnchorRecord>,
        now: Millis,
    ) -> RegistryDiff {
        let diff = self.registry.register(ids, hierarchy);
        self.aggregator.track(&diff, now);
        if let Some(cancelled) = self.coordinator.cancel() {
            debug!(target = %cancelled.target, "Cancelled suppression on re-registration");
        }
        self.snapshot = self.aggregator.current(&self.registry);

        let keep = self
            .state
            .active_id()
            .is_some_and(|id| self.registry.contains(id.as_str()));
        if !keep {
            let seeded = self.seed_default();
            self.publish(seeded);
        }

        info!(
            anchors = self.registry.len(),
            added = diff.added.len(),
            removed = diff.removed.len(),
            "Registered anchors"
        );
        diff
    }

    /// Register anchors straight from hierarchy records, in record order.
    pub fn register_hierarchy(&mut self, hierarchy: Vec<AnchorRecord>, now: Millis) -> RegistryDiff {
        let ids = hierarchy.iter().map(|record| record.id.clone()).collect();
        self.register_anchors(ids, hierarchy, now)
    }

    fn seed_default(&self) -> Arc<ActiveState> {
        let tick = self.aggregator.tick();
        let on_screen = self.registry.ids().iter().find(|id| {
            self.snapshot.get(id.as_str()).is_visible
                || self.layout.as_ref().is_some_and(|layout| {
                    layout
                        .geometry(id.as_str())
                        .is_some_and(|g| g.is_on_screen(layout.viewport_height))
                })
        });
        match on_screen.or_else(|| self.registry.first()) {
            Some(id) => Arc::new(ActiveState::new(id.clone(), tick, ResolveReason::InitialDefault)),
            None => Arc::new(ActiveState::none(tick)),
        }
    }

    // === Observation ===

    /// Feed a visibility event. Returns `false` if it was discarded as stale.
    pub fn handle_event(&mut self, event: VisibilityEvent, now: Millis) -> bool {
        self.aggregator.push(event, now)
    }

    /// Record the latest measured layout.
    pub fn update_layout(&mut self, layout: LayoutSnapshot) {
        self.layout = Some(layout);
    }

    /// Switch to registry-order defaults because the visibility source
    /// could not start.
    pub fn mark_observer_unavailable(&mut self) {
        if self.observer_available {
            warn!("Visibility source unavailable, highlighting by registry order");
        }
        self.observer_available = false;
        self.layout = None;
    }

    /// Whether a visibility source is feeding the tracker.
    #[must_use]
    pub fn observer_available(&self) -> bool {
        self.observer_available
    }

    // === Navigation ===

    /// Jump to an anchor on behalf of the user.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingAnchor`] if the anchor is not registered; the
    /// state is left unchanged.
    pub fn navigate_to(&mut self, anchor_id: &str, now: Millis) -> Result<()> {
        let intent = NavigationIntent::user_click(anchor_id, self.settings.suppress_ms);
        self.navigate(&intent, now)
    }

    /// Execute a navigation intent.
    ///
    /// Scrolls to the target, makes it active immediately, and suppresses
    /// resolver output for `intent.suppress_ms`. A newer intent replaces an
    /// open window.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingAnchor`] if the target is not registered; the
    /// state is left unchanged.
    pub fn navigate(&mut self, intent: &NavigationIntent, now: Millis) -> Result<()> {
        let target = &intent.target_anchor_id;
        if !self.registry.contains(target.as_str()) {
            warn!(anchor = %target, origin = %intent.origin, "Navigation target not registered");
            return Err(Error::missing_anchor(target));
        }

        let window = self.coordinator.begin(intent, now);
        debug!(anchor = %target, origin = %intent.origin, until = window.until, "Navigating");
        self.scroller.scroll_to(target, self.settings.scroll_behavior);

        if !self.state.is_active(target.as_str()) {
            let optimistic = ActiveState::new(
                target.clone(),
                self.aggregator.tick(),
                ResolveReason::UserClick,
            );
            self.publish(Arc::new(optimistic));
        }
        Ok(())
    }

    /// Whether resolver output is being suppressed at `now`.
    #[must_use]
    pub fn is_suppressing(&self, now: Millis) -> bool {
        self.coordinator.is_suppressing(now)
    }

    // === Time ===

    /// The earliest pending timer, if any.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Millis> {
        match (self.aggregator.deadline(), self.coordinator.deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Run every timer due at or before `now`, in time order.
    ///
    /// On equal deadlines the debounce window settles before the suppression
    /// window closes.
    pub fn advance(&mut self, now: Millis) {
        while let Some(at) = self.next_deadline().filter(|at| *at <= now) {
            if self.aggregator.deadline() == Some(at) {
                if let Some(snapshot) = self.aggregator.poll(at, &self.registry) {
                    self.on_snapshot(snapshot, at);
                }
            } else if let Some(ended) = self.coordinator.expire(at) {
                self.on_suppression_end(&ended);
            }
        }
    }

    /// Settle the open debounce window immediately.
    pub fn flush(&mut self, now: Millis) {
        if let Some(snapshot) = self.aggregator.flush(&self.registry) {
            self.on_snapshot(snapshot, now);
        }
    }

    fn on_snapshot(&mut self, snapshot: VisibilitySnapshot, at: Millis) {
        self.snapshot = snapshot;
        if self.coordinator.hold(at) {
            return;
        }
        self.resolve_now();
    }

    fn on_suppression_end(&mut self, ended: &Suppression) {
        if ended.held {
            self.resolve_now();
        }
    }

    fn resolve_now(&mut self) {
        let next = resolver::resolve(
            &self.snapshot,
            &self.registry,
            self.layout.as_ref(),
            &self.state,
        );
        self.publish(next);
    }

    fn publish(&mut self, next: Arc<ActiveState>) {
        if Arc::ptr_eq(&next, &self.state) {
            return;
        }
        debug!(
            from = ?self.state.active_id().map(AnchorId::as_str),
            to = ?next.active_id().map(AnchorId::as_str),
            reason = %next.reason,
            tick = next.resolved_at_tick,
            "Active anchor changed"
        );
        self.state = next;
        self.subscribers.notify(&self.state);
    }

    // === Observers ===

    /// Call `callback` whenever the active state changes.
    ///
    /// The callback runs until the returned [`Subscription`] is dropped.
    pub fn on_active_change(
        &self,
        callback: impl FnMut(&Arc<ActiveState>) + 'static,
    ) -> Subscription {
        self.subscribers.subscribe(callback)
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    // === Read-only views ===

    /// The current active state.
    #[must_use]
    pub fn active_state(&self) -> Arc<ActiveState> {
        Arc::clone(&self.state)
    }

    /// The top-level section containing the active anchor.
    #[must_use]
    pub fn top_level_active(&self) -> Option<&AnchorId> {
        self.state
            .active_id()
            .and_then(|id| self.registry.top_level_of(id.as_str()))
    }

    /// Progress through the displayed section, in `[0, 100]`.
    #[must_use]
    pub fn progress(&self, mode: ProgressMode) -> f64 {
        navigation::progress(mode, &self.state, &self.registry, self.layout.as_ref())
    }

    /// Table of contents for the displayed section.
    #[must_use]
    pub fn table_of_contents(&self) -> Vec<TocEntry> {
        navigation::table_of_contents(&self.registry, &self.snapshot, &self.state)
    }

    /// Title path to the active anchor.
    #[must_use]
    pub fn breadcrumb(&self) -> Vec<Crumb> {
        navigation::breadcrumb(&self.registry, &self.state)
    }

    /// The tracked anchors.
    #[must_use]
    pub fn registry(&self) -> &AnchorRegistry {
        &self.registry
    }

    /// The latest settled snapshot.
    #[must_use]
    pub fn snapshot(&self) -> &VisibilitySnapshot {
        &self.snapshot
    }

    /// The latest measured layout.
    #[must_use]
    pub fn layout(&self) -> Option<&LayoutSnapshot> {
        self.layout.as_ref()
    }
}

impl fmt::Debug for SectionTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SectionTracker")
            .field("settings", &self.settings)
            .field("anchors", &self.registry.len())
            .field("state", &self.state)
            .field("suppression", &self.coordinator.current())
            .field("subscribers", &self.subscribers)
            .field("observer_available", &self.observer_available)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    fn settings(settle_ms: Millis, suppress_ms: Millis) -> TrackerSettings {
        TrackerSettings {
            settle_ms,
            suppress_ms,
            scroll_behavior: ScrollBehavior::Smooth,
        }
    }

    fn ids(raw: &[&str]) -> Vec<AnchorId> {
        raw.iter().map(|id| AnchorId::from(*id)).collect()
    }

    fn active(tracker: &SectionTracker) -> Option<String> {
        tracker.active_state().active.clone().map(|id| id.to_string())
    }

    #[derive(Debug, Default, Clone)]
    struct RecordingScroller {
        calls: Rc<RefCell<Vec<String>>>,
    }

    impl Scroller for RecordingScroller {
        fn scroll_to(&mut self, target: &AnchorId, _behavior: ScrollBehavior) {
            self.calls.borrow_mut().push(target.to_string());
        }
    }

    #[test]
    fn test_settings_validate_window_limits() {
        assert!(settings(120, 150).validate().is_ok());
        assert!(settings(10_000, 10_000).validate().is_ok());

        let err = settings(60_000, 150).validate().unwrap_err();
        assert!(matches!(err, Error::ConfigValidation { .. }));
        assert!(settings(120, 10_001).validate().is_err());
    }

    #[test]
    fn test_empty_tracker_returns_sentinel() {
        let tracker = SectionTracker::new(settings(100, 150));
        assert!(tracker.active_state().is_none());
        assert!(tracker.progress(ProgressMode::Section).abs() < f64::EPSILON);
        assert!(tracker.breadcrumb().is_empty());
        assert!(tracker.table_of_contents().is_empty());
        assert!(tracker.next_deadline().is_none());
    }

    #[test]
    fn test_first_registration_seeds_first_anchor() {
        let mut tracker = SectionTracker::new(settings(100, 150));
        tracker.register_anchors(ids(&["a", "b", "c"]), Vec::new(), 0);

        let state = tracker.active_state();
        assert!(state.is_active("a"));
        assert_eq!(state.reason, ResolveReason::InitialDefault);
    }

    #[test]
    fn test_first_registration_seeds_on_screen_anchor() {
        let mut tracker = SectionTracker::new(settings(100, 150));
        tracker.update_layout(
            LayoutSnapshot::new(800.0, 2000.0, 6000.0)
                .with_anchor("a", -1500.0, 500.0)
                .with_anchor("b", 100.0, 500.0),
        );
        tracker.register_anchors(ids(&["a", "b", "c"]), Vec::new(), 0);
        assert_eq!(active(&tracker).as_deref(), Some("b"));
    }

    #[test]
    fn test_settled_event_resolves() {
        let mut tracker = SectionTracker::new(settings(100, 150));
        tracker.register_anchors(ids(&["a", "b", "c"]), Vec::new(), 0);

        tracker.handle_event(VisibilityEvent::new("b", true, 0.6, 10), 10);
        assert_eq!(tracker.next_deadline(), Some(110));
        tracker.advance(109);
        assert_eq!(active(&tracker).as_deref(), Some("a"));

        tracker.advance(110);
        assert_eq!(active(&tracker).as_deref(), Some("b"));
        assert_eq!(tracker.active_state().reason, ResolveReason::HighestRatio);
    }

    #[test]
    fn test_notifications_only_on_change() {
        let mut tracker = SectionTracker::new(settings(50, 150));
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let _subscription = tracker.on_active_change(move |state| {
            sink.borrow_mut().push(state.active.clone());
        });

        tracker.register_anchors(ids(&["a", "b"]), Vec::new(), 0);
        tracker.handle_event(VisibilityEvent::new("a", true, 1.0, 0), 0);
        tracker.advance(100);
        tracker.handle_event(VisibilityEvent::new("a", true, 0.9, 100), 100);
        tracker.advance(200);

        assert_eq!(seen.borrow().len(), 1);
    }

    #[test]
    fn test_navigate_is_optimistic_and_scrolls() {
        let scroller = RecordingScroller::default();
        let calls = Rc::clone(&scroller.calls);
        let mut tracker = SectionTracker::with_scroller(settings(20, 150), Box::new(scroller));
        tracker.register_anchors(ids(&["a", "b", "c"]), Vec::new(), 0);

        tracker.navigate_to("c", 0).unwrap();

        let state = tracker.active_state();
        assert!(state.is_active("c"));
        assert_eq!(state.reason, ResolveReason::UserClick);
        assert_eq!(calls.borrow().as_slice(), ["c".to_string()]);
        assert!(tracker.is_suppressing(149));
    }

    #[test]
    fn test_navigate_missing_anchor_is_noop() {
        let scroller = RecordingScroller::default();
        let calls = Rc::clone(&scroller.calls);
        let mut tracker = SectionTracker::with_scroller(settings(20, 150), Box::new(scroller));
        tracker.register_anchors(ids(&["a", "b"]), Vec::new(), 0);
        let before = tracker.active_state();

        let err = tracker.navigate_to("zzz", 0).unwrap_err();

        assert!(err.is_missing_anchor());
        assert!(Arc::ptr_eq(&before, &tracker.active_state()));
        assert!(calls.borrow().is_empty());
        assert!(!tracker.is_suppressing(0));
    }

    #[test]
    fn test_suppression_holds_then_resolves() {
        let mut tracker = SectionTracker::new(settings(20, 150));
        tracker.register_anchors(ids(&["a", "b", "c"]), Vec::new(), 0);
        tracker.navigate_to("c", 0).unwrap();

        tracker.handle_event(VisibilityEvent::new("a", true, 1.0, 50), 50);
        tracker.advance(100);
        assert_eq!(active(&tracker).as_deref(), Some("c"));

        tracker.advance(200);
        assert_eq!(active(&tracker).as_deref(), Some("a"));
        assert_eq!(tracker.active_state().reason, ResolveReason::HighestRatio);
    }

    #[test]
    fn test_suppression_without_snapshot_keeps_target() {
        let mut tracker = SectionTracker::new(settings(20, 150));
        tracker.register_anchors(ids(&["a", "b", "c"]), Vec::new(), 0);
        tracker.navigate_to("c", 0).unwrap();
        tracker.advance(500);
        assert_eq!(active(&tracker).as_deref(), Some("c"));
    }

    #[test]
    fn test_newer_navigation_resets_window() {
        let mut tracker = SectionTracker::new(settings(20, 150));
        tracker.register_anchors(ids(&["a", "b", "c"]), Vec::new(), 0);
        tracker.navigate_to("b", 0).unwrap();
        tracker.navigate_to("c", 100).unwrap();

        tracker.handle_event(VisibilityEvent::new("a", true, 1.0, 180), 180);
        tracker.advance(220);
        assert_eq!(active(&tracker).as_deref(), Some("c"));

        tracker.advance(250);
        assert_eq!(active(&tracker).as_deref(), Some("a"));
    }

    #[test]
    fn test_snapshot_held_before_newer_navigation_resolves_at_end() {
        let mut tracker = SectionTracker::new(settings(20, 150));
        tracker.register_anchors(ids(&["a", "b", "c"]), Vec::new(), 0);
        tracker.navigate_to("c", 0).unwrap();
        tracker.handle_event(VisibilityEvent::new("a", true, 1.0, 10), 10);
        tracker.advance(30);
        assert_eq!(active(&tracker).as_deref(), Some("c"));

        tracker.navigate_to("b", 100).unwrap();
        tracker.advance(249);
        assert_eq!(active(&tracker).as_deref(), Some("b"));

        tracker.advance(1000);
        let state = tracker.active_state();
        assert!(state.is_active("a"));
        assert_eq!(state.reason, ResolveReason::HighestRatio);
    }

    #[test]
    fn test_reregistration_resets_removed_active() {
        let mut tracker = SectionTracker::new(settings(100, 150));
        tracker.register_anchors(ids(&["a", "b", "c"]), Vec::new(), 0);
        tracker.navigate_to("b", 0).unwrap();
        tracker.handle_event(VisibilityEvent::new("c", true, 0.5, 10), 10);

        tracker.register_anchors(ids(&["a", "d", "e"]), Vec::new(), 20);

        assert_eq!(active(&tracker).as_deref(), Some("a"));
        assert!(tracker.next_deadline().is_none());
        assert!(!tracker.is_suppressing(21));
        assert!(!tracker.handle_event(VisibilityEvent::new("b", true, 1.0, 30), 30));
    }

    #[test]
    fn test_reregistration_keeps_surviving_active() {
        let mut tracker = SectionTracker::new(settings(100, 150));
        tracker.register_anchors(ids(&["a", "b"]), Vec::new(), 0);
        tracker.navigate_to("b", 0).unwrap();
        let before = tracker.active_state();

        tracker.register_anchors(ids(&["b", "c"]), Vec::new(), 10);
        assert!(Arc::ptr_eq(&before, &tracker.active_state()));
    }

    #[test]
    fn test_observer_unavailable_uses_registry_order() {
        let mut tracker = SectionTracker::new(settings(100, 150));
        tracker.update_layout(LayoutSnapshot::new(800.0, 0.0, 2000.0).with_anchor("b", 0.0, 100.0));
        tracker.mark_observer_unavailable();
        tracker.register_anchors(ids(&["a", "b"]), Vec::new(), 0);

        assert!(!tracker.observer_available());
        assert!(tracker.layout().is_none());
        assert_eq!(active(&tracker).as_deref(), Some("a"));
    }

    #[test]
    fn test_flush_settles_immediately() {
        let mut tracker = SectionTracker::new(settings(1_000, 150));
        tracker.register_anchors(ids(&["a", "b"]), Vec::new(), 0);
        tracker.handle_event(VisibilityEvent::new("b", true, 0.4, 0), 0);
        tracker.flush(0);
        assert_eq!(active(&tracker).as_deref(), Some("b"));
        assert!(tracker.next_deadline().is_none());
    }

    #[test]
    fn test_top_level_active_and_views() {
        let mut tracker = SectionTracker::new(settings(10, 150));
        tracker.register_hierarchy(
            vec![
                AnchorRecord::new("ethics", 1, "Ethics"),
                AnchorRecord::new("virtue", 2, "Virtue").with_parent("ethics"),
                AnchorRecord::new("duty", 2, "Duty").with_parent("ethics"),
            ],
            0,
        );
        tracker.handle_event(VisibilityEvent::new("duty", true, 0.7, 0), 0);
        tracker.handle_event(VisibilityEvent::new("virtue", true, 0.2, 0), 0);
        tracker.advance(10);

        assert_eq!(tracker.top_level_active().map(AnchorId::as_str), Some("ethics"));
        assert_eq!(tracker.breadcrumb().len(), 2);
        let toc = tracker.table_of_contents();
        assert!(toc[2].is_active);
        assert!(toc[1].is_near_active);
        assert!((tracker.progress(ProgressMode::Section) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_subscription_dispose_stops_notifications() {
        let mut tracker = SectionTracker::new(settings(10, 150));
        let count = Rc::new(RefCell::new(0));
        let counter = Rc::clone(&count);
        let subscription = tracker.on_active_change(move |_| *counter.borrow_mut() += 1);
        assert_eq!(tracker.subscriber_count(), 1);

        tracker.register_anchors(ids(&["a", "b"]), Vec::new(), 0);
        subscription.dispose();
        tracker.navigate_to("b", 0).unwrap();

        assert_eq!(*count.borrow(), 1);
        assert_eq!(tracker.subscriber_count(), 0);
    }

    #[test]
    fn test_settings_from_config() {
        let settings = TrackerSettings::default();
        assert_eq!(settings.settle_ms, 120);
        assert_eq!(settings.suppress_ms, 150);
        assert_eq!(settings.scroll_behavior, ScrollBehavior::Smooth);
    }
}
