//! Location fragment synchronization.
//!
//! The top-level active anchor is mirrored into a location fragment, and an
//! external fragment change (history navigation, a pasted link) becomes a
//! navigation request. Writes compare before storing and incoming fragments
//! are checked against the last write, so the tracker and the location never
//! chase each other.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use tracing::{debug, trace};

use crate::anchor::{AnchorId, AnchorRecord};
use crate::coordinator::NavigationIntent;
use crate::error::{Error, Result};
use crate::registry::RegistryDiff;
use crate::tracker::SectionTracker;
use crate::visibility::Millis;

/// A location fragment naming an anchor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fragment(AnchorId);

impl Fragment {
    /// Create a fragment for an anchor.
    #[must_use]
    pub fn new(id: impl Into<AnchorId>) -> Self {
        Self(id.into())
    }

    /// Parse `#id`, `#/id` or a bare `id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidFragment`] if no anchor id remains after the
    /// prefix, or the id contains whitespace.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let id = trimmed.strip_prefix('#').unwrap_or(trimmed);
        let id = id.strip_prefix('/').unwrap_or(id);
        if id.is_empty() || id.chars().any(char::is_whitespace) {
            return Err(Error::InvalidFragment {
                fragment: raw.to_string(),
            });
        }
        Ok(Self(AnchorId::from(id)))
    }

    /// The anchor the fragment names.
    #[must_use]
    pub fn anchor_id(&self) -> &AnchorId {
        &self.0
    }
}

impl FromStr for Fragment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where the current fragment is persisted.
pub trait LocationStore {
    /// The stored fragment, if any.
    fn read(&self) -> Option<Fragment>;

    /// Replace the stored fragment.
    fn write(&mut self, fragment: &Fragment);
}

/// In-session fragment storage.
#[derive(Debug, Clone, Default)]
pub struct MemoryLocation {
    current: Option<Fragment>,
    writes: usize,
}

impl MemoryLocation {
    /// Create an empty location.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of writes performed.
    #[must_use]
    pub fn writes(&self) -> usize {
        self.writes
    }
}

impl LocationStore for MemoryLocation {
    fn read(&self) -> Option<Fragment> {
        self.current.clone()
    }

    fn write(&mut self, fragment: &Fragment) {
        self.current = Some(fragment.clone());
        self.writes += 1;
    }
}

/// Supplies the anchor tree for a top-level section.
pub trait HierarchyProvider {
    /// Records for the section containing `anchor`, in document order.
    ///
    /// `anchor` may name the section itself or any anchor inside it.
    fn section_for(&self, anchor: &str) -> Option<Vec<AnchorRecord>>;
}

/// A fixed set of sections.
#[derive(Debug, Clone, Default)]
pub struct StaticHierarchy {
    sections: BTreeMap<AnchorId, Vec<AnchorRecord>>,
}

impl StaticHierarchy {
    /// Create a provider over `sections`, keyed by top-level id.
    #[must_use]
    pub fn new(sections: BTreeMap<AnchorId, Vec<AnchorRecord>>) -> Self {
        Self { sections }
    }

    /// Number of sections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sections.len()
    }

    /// Whether no sections are known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
}

impl HierarchyProvider for StaticHierarchy {
    fn section_for(&self, anchor: &str) -> Option<Vec<AnchorRecord>> {
        if let Some(records) = self.sections.get(anchor) {
            return Some(records.clone());
        }
        self.sections
            .values()
            .find(|records| records.iter().any(|record| record.id.as_str() == anchor))
            .cloned()
    }
}

/// What the host must do about an external fragment change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteCommand {
    /// The target is registered: scroll to it.
    Navigate(NavigationIntent),
    /// The target lives in another section: load it, then scroll.
    SwitchSection(AnchorId),
}

/// Keeps the location fragment and the tracker in step.
pub struct RouteSync {
    store: Box<dyn LocationStore>,
    last_written: Option<Fragment>,
}

impl RouteSync {
    /// Create a synchronizer over `store`.
    #[must_use]
    pub fn new(store: Box<dyn LocationStore>) -> Self {
        Self {
            store,
            last_written: None,
        }
    }

    /// The fragment currently stored.
    #[must_use]
    pub fn current(&self) -> Option<Fragment> {
        self.store.read()
    }

    /// Write the top-level active anchor if it differs from the stored one.
    ///
    /// Returns `true` if the store was written.
    pub fn sync_from_state(&mut self, tracker: &SectionTracker) -> bool {
        let Some(top) = tracker.top_level_active() else {
            return false;
        };
        let fragment = Fragment::new(top);
        if self.store.read().as_ref() == Some(&fragment) {
            return false;
        }
        debug!(%fragment, "Updating location fragment");
        self.store.write(&fragment);
        self.last_written = Some(fragment);
        true
    }

    /// Decide what an externally changed fragment means.
    ///
    /// Echoes of this synchronizer's own last write and fragments naming the
    /// current top-level anchor are ignored.
    pub fn on_fragment_changed(
        &mut self,
        fragment: &Fragment,
        tracker: &SectionTracker,
    ) -> Option<RouteCommand> {
        // Only the next change can be the echo of our write.
        if self.last_written.take().as_ref() == Some(fragment) {
            trace!(%fragment, "Ignoring echo of own fragment write");
            return None;
        }
        if self.store.read().as_ref() != Some(fragment) {
            self.store.write(fragment);
        }

        let target = fragment.anchor_id();
        if tracker.top_level_active() == Some(target) {
            trace!(%fragment, "Fragment already matches active section");
            return None;
        }
        if tracker.registry().contains(target.as_str()) {
            let intent = NavigationIntent::hash_change(target, tracker.settings().suppress_ms);
            return Some(RouteCommand::Navigate(intent));
        }
        Some(RouteCommand::SwitchSection(target.clone()))
    }
}

impl fmt::Debug for RouteSync {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteSync")
            .field("current", &self.store.read())
            .field("last_written", &self.last_written)
            .finish_non_exhaustive()
    }
}

/// Carry out a [`RouteCommand`].
///
/// Switching section re-registers the tracker from `provider` and then
/// navigates to the target; the resulting registry diff is returned so the
/// caller can update its visibility source.
///
/// # Errors
///
/// Returns [`Error::MissingAnchor`] if the target is unknown to both the
/// tracker and the provider.
pub fn apply_route_command(
    command: RouteCommand,
    tracker: &mut SectionTracker,
    provider: Option<&dyn HierarchyProvider>,
    now: Millis,
) -> Result<Option<RegistryDiff>> {
    match command {
        RouteCommand::Navigate(intent) => {
            tracker.navigate(&intent, now)?;
            Ok(None)
        }
        RouteCommand::SwitchSection(target) => {
            let records = provider
                .and_then(|provider| provider.section_for(target.as_str()))
                .ok_or_else(|| Error::missing_anchor(&target))?;
            debug!(anchor = %target, "Switching section for fragment");
            let diff = tracker.register_hierarchy(records, now);
            let intent = NavigationIntent::hash_change(target, tracker.settings().suppress_ms);
            tracker.navigate(&intent, now)?;
            Ok(Some(diff))
        }
    }
}
