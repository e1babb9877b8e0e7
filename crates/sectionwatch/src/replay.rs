//! Deterministic scenario replay.
//!
//! A scenario is a JSON list of timed steps (registrations, visibility
//! reports, layout measurements, navigation clicks and fragment changes).
//! [`replay`] feeds them to a [`SectionTracker`] on its logical clock,
//! running every timer that falls due between steps, and reports each
//! active-state transition.
//!
//! ```json
//! {
//!   "settle_ms": 100,
//!   "steps": [
//!     { "at": 0, "action": "register", "ids": ["a", "b", "c"] },
//!     { "at": 10, "action": "visibility", "anchor": "b", "visible": true, "ratio": 0.6 }
//!   ]
//! }
//! ```

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::anchor::{AnchorId, AnchorRecord};
use crate::error::{Error, Result};
use crate::navigation::{self, ProgressMode, TocEntry};
use crate::resolver::{ActiveState, ResolveReason};
use crate::route::{apply_route_command, Fragment, HierarchyProvider, MemoryLocation, RouteSync, StaticHierarchy};
use crate::tracker::{SectionTracker, TrackerSettings};
use crate::visibility::{AnchorGeometry, LayoutSnapshot, Millis, VisibilityEvent};

/// A recorded interaction to replay.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Scenario {
    /// Overrides the configured settling window.
    #[serde(default)]
    pub settle_ms: Option<Millis>,
    /// Overrides the configured suppression window.
    #[serde(default)]
    pub suppress_ms: Option<Millis>,
    /// Sections available to fragment navigation, keyed by top-level id.
    #[serde(default)]
    pub sections: BTreeMap<AnchorId, Vec<AnchorRecord>>,
    /// Steps in time order.
    pub steps: Vec<Step>,
}

/// One timed step.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Step {
    /// When the step happens.
    pub at: Millis,
    /// What happens.
    #[serde(flatten)]
    pub action: Action,
}

/// What a step does.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// Replace the tracked anchors.
    ///
    /// `section` loads a section from the scenario's `sections`; otherwise
    /// `ids` (or the ids of `hierarchy`) are registered.
    Register {
        /// Anchor ids in document order.
        #[serde(default)]
        ids: Vec<AnchorId>,
        /// Hierarchy records for the ids.
        #[serde(default)]
        hierarchy: Vec<AnchorRecord>,
        /// Section to load instead.
        #[serde(default)]
        section: Option<AnchorId>,
    },
    /// A visibility source report.
    Visibility {
        /// The anchor that crossed a threshold.
        anchor: AnchorId,
        /// Whether it intersects the viewport.
        visible: bool,
        /// Fraction inside the viewport.
        #[serde(default)]
        ratio: f64,
    },
    /// A layout measurement.
    Layout {
        /// Height of the viewport.
        viewport_height: f64,
        /// Scroll offset.
        #[serde(default)]
        scroll_top: f64,
        /// Scrollable height.
        #[serde(default)]
        document_height: f64,
        /// Geometry per anchor.
        #[serde(default)]
        anchors: BTreeMap<AnchorId, AnchorGeometry>,
    },
    /// A click on a navigation link.
    Navigate {
        /// Target anchor.
        anchor: AnchorId,
    },
    /// An external change of the location fragment.
    Fragment {
        /// Raw fragment text, e.g. `#ethics`.
        fragment: String,
    },
}

impl Scenario {
    /// Parse a scenario from JSON text.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a scenario file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}

/// Knobs for a replay run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayOptions {
    /// Timing, before scenario overrides.
    pub settings: TrackerSettings,
    /// How progress is reported.
    pub progress: ProgressMode,
    /// Mirror the active section into a location fragment.
    pub sync_fragment: bool,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            settings: TrackerSettings::default(),
            progress: ProgressMode::default(),
            sync_fragment: true,
        }
    }
}

/// One active-state change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transition {
    /// When it happened.
    pub at: Millis,
    /// New active anchor.
    pub active: Option<AnchorId>,
    /// Why it was chosen.
    pub reason: ResolveReason,
    /// Aggregation tick of the state.
    pub tick: u64,
    /// Progress after the change.
    pub progress: f64,
    /// Title path after the change.
    pub breadcrumb: Vec<String>,
}

/// A step the tracker refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    /// When the step happened.
    pub at: Millis,
    /// Why it was refused.
    pub error: String,
}

/// Outcome of a replay.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplayReport {
    /// Every active-state change, in order.
    pub transitions: Vec<Transition>,
    /// Steps that were refused; the tracker kept its state for each.
    pub rejected: Vec<Rejection>,
    /// Active state at the end.
    pub final_state: ActiveState,
    /// Table of contents at the end.
    pub toc: Vec<TocEntry>,
    /// Location fragment at the end.
    pub fragment: Option<String>,
}

impl ReplayReport {
    /// The active anchor at the end, if any.
    #[must_use]
    pub fn final_active(&self) -> Option<&str> {
        self.final_state.active_id().map(AnchorId::as_str)
    }
}

struct Replayer {
    tracker: SectionTracker,
    route: Option<RouteSync>,
    provider: StaticHierarchy,
    progress: ProgressMode,
    changes: Rc<RefCell<Vec<Arc<ActiveState>>>>,
    transitions: Vec<Transition>,
    rejected: Vec<Rejection>,
}

impl Replayer {
    fn run_until(&mut self, until: Millis) {
        while let Some(deadline) = self.tracker.next_deadline().filter(|d| *d <= until) {
            self.tracker.advance(deadline);
            self.record(deadline);
        }
    }

    fn step(&mut self, step: &Step) {
        let now = step.at;
        let result = match &step.action {
            Action::Register {
                ids,
                hierarchy,
                section,
            } => self.register(ids, hierarchy, section.as_ref(), now),
            Action::Visibility {
                anchor,
                visible,
                ratio,
            } => {
                let event = VisibilityEvent::new(anchor.clone(), *visible, *ratio, now);
                if !self.tracker.handle_event(event, now) {
                    debug!(anchor = %anchor, at = now, "Replay event for unregistered anchor dropped");
                }
                Ok(())
            }
            Action::Layout {
                viewport_height,
                scroll_top,
                document_height,
                anchors,
            } => {
                let mut layout = LayoutSnapshot::new(*viewport_height, *scroll_top, *document_height);
                layout.anchors.clone_from(anchors);
                self.tracker.update_layout(layout);
                Ok(())
            }
            Action::Navigate { anchor } => self.tracker.navigate_to(anchor.as_str(), now),
            Action::Fragment { fragment } => self.fragment(fragment, now),
        };
        if let Err(e) = result {
            warn!(at = now, error = %e, "Replay step rejected");
            self.rejected.push(Rejection {
                at: now,
                error: e.to_string(),
            });
        }
        self.record(now);
    }

    fn register(
        &mut self,
        ids: &[AnchorId],
        hierarchy: &[AnchorRecord],
        section: Option<&AnchorId>,
        now: Millis,
    ) -> Result<()> {
        if let Some(section) = section {
            let records = self
                .provider
                .section_for(section.as_str())
                .ok_or_else(|| Error::missing_anchor(section))?;
            self.tracker.register_hierarchy(records, now);
        } else if ids.is_empty() {
            self.tracker.register_hierarchy(hierarchy.to_vec(), now);
        } else {
            self.tracker.register_anchors(ids.to_vec(), hierarchy.to_vec(), now);
        }
        Ok(())
    }

    fn fragment(&mut self, raw: &str, now: Millis) -> Result<()> {
        let fragment = Fragment::parse(raw)?;
        let Some(route) = self.route.as_mut() else {
            return Ok(());
        };
        if let Some(command) = route.on_fragment_changed(&fragment, &self.tracker) {
            apply_route_command(command, &mut self.tracker, Some(&self.provider), now)?;
        }
        Ok(())
    }

    fn record(&mut self, at: Millis) {
        let changes: Vec<_> = self.changes.borrow_mut().drain(..).collect();
        for state in changes {
            let registry = self.tracker.registry();
            self.transitions.push(Transition {
                at,
                active: state.active.clone(),
                reason: state.reason,
                tick: state.resolved_at_tick,
                progress: navigation::progress(self.progress, &state, registry, self.tracker.layout()),
                breadcrumb: navigation::breadcrumb(registry, &state)
                    .into_iter()
                    .map(|crumb| crumb.title)
                    .collect(),
            });
        }
        if let Some(route) = self.route.as_mut() {
            route.sync_from_state(&self.tracker);
        }
    }
}

/// Replay a scenario and report what the tracker did.
///
/// Steps are applied in time order (ties keep file order). Timers that fall
/// due between steps run first; after the last step every outstanding timer
/// runs to completion.
///
/// # Errors
///
/// Returns [`Error::ConfigValidation`] if the effective settle or suppress
/// window is out of range. Refused steps are not errors: they are listed in
/// [`ReplayReport::rejected`] and the run continues.
pub fn replay(scenario: &Scenario, options: &ReplayOptions) -> Result<ReplayReport> {
    let mut settings = options.settings;
    if let Some(settle_ms) = scenario.settle_ms {
        settings.settle_ms = settle_ms;
    }
    if let Some(suppress_ms) = scenario.suppress_ms {
        settings.suppress_ms = suppress_ms;
    }
    settings.validate()?;

    let tracker = SectionTracker::new(settings);
    let changes = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&changes);
    let _subscription = tracker.on_active_change(move |state| sink.borrow_mut().push(Arc::clone(state)));

    let mut replayer = Replayer {
        tracker,
        route: options
            .sync_fragment
            .then(|| RouteSync::new(Box::new(MemoryLocation::new()))),
        provider: StaticHierarchy::new(scenario.sections.clone()),
        progress: options.progress,
        changes,
        transitions: Vec::new(),
        rejected: Vec::new(),
    };

    let mut steps: Vec<&Step> = scenario.steps.iter().collect();
    steps.sort_by_key(|step| step.at);
    for step in steps {
        replayer.run_until(step.at);
        replayer.step(step);
    }
    replayer.run_until(Millis::MAX);

    let final_state = replayer.tracker.active_state();
    Ok(ReplayReport {
        transitions: replayer.transitions,
        rejected: replayer.rejected,
        final_state: final_state.as_ref().clone(),
        toc: replayer.tracker.table_of_contents(),
        fragment: replayer
            .route
            .as_ref()
            .and_then(RouteSync::current)
            .map(|fragment| fragment.to_string()),
    })
}
