//! The ordered set of anchors tracked for the displayed section.

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use crate::anchor::{AnchorId, AnchorRecord};

/// Result of replacing the registry contents.
///
/// Each list preserves the order the ids had in their own registration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryDiff {
    /// Ids tracked now but not before.
    pub added: Vec<AnchorId>,
    /// Ids tracked before but not now.
    pub removed: Vec<AnchorId>,
    /// Ids tracked both before and after.
    pub retained: Vec<AnchorId>,
}

impl RegistryDiff {
    /// Whether the registration changed the tracked set at all.
    #[must_use]
    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Ordered, duplicate-free registry of anchors in document order.
#[derive(Debug, Clone, Default)]
pub struct AnchorRegistry {
    order: Vec<AnchorId>,
    index: HashMap<AnchorId, usize>,
    records: HashMap<AnchorId, AnchorRecord>,
}

impl AnchorRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically replace the tracked set.
    ///
    /// `ids` gives document order. Records in `hierarchy` for ids outside
    /// that list are ignored; ids without a record get a placeholder.
    /// Repeated ids keep their first position.
    pub fn register(&mut self, ids: Vec<AnchorId>, hierarchy: Vec<AnchorRecord>) -> RegistryDiff {
        let mut order = Vec::with_capacity(ids.len());
        let mut index = HashMap::with_capacity(ids.len());
        for id in ids {
            if index.contains_key(&id) {
                warn!(anchor = %id, "Duplicate anchor id in registration, keeping first");
                continue;
            }
            index.insert(id.clone(), order.len());
            order.push(id);
        }

        let mut described: HashMap<AnchorId, AnchorRecord> = hierarchy
            .into_iter()
            .filter(|record| index.contains_key(&record.id))
            .map(|record| (record.id.clone(), record))
            .collect();
        let records = order
            .iter()
            .map(|id| {
                let record = described
                    .remove(id)
                    .unwrap_or_else(|| AnchorRecord::placeholder(id));
                (id.clone(), record)
            })
            .collect();

        let previous: HashSet<&AnchorId> = self.order.iter().collect();
        let diff = RegistryDiff {
            added: order
                .iter()
                .filter(|id| !previous.contains(id))
                .cloned()
                .collect(),
            removed: self
                .order
                .iter()
                .filter(|id| !index.contains_key(*id))
                .cloned()
                .collect(),
            retained: order
                .iter()
                .filter(|id| previous.contains(id))
                .cloned()
                .collect(),
        };

        debug!(
            added = diff.added.len(),
            removed = diff.removed.len(),
            retained = diff.retained.len(),
            "Registry replaced"
        );

        self.order = order;
        self.index = index;
        self.records = records;
        diff
    }

    /// Number of tracked anchors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether no anchors are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Tracked ids in document order.
    #[must_use]
    pub fn ids(&self) -> &[AnchorId] {
        &self.order
    }

    /// The first anchor in document order.
    #[must_use]
    pub fn first(&self) -> Option<&AnchorId> {
        self.order.first()
    }

    /// Position of an anchor in document order.
    #[must_use]
    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Whether an anchor is tracked.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// The registered record for an anchor.
    #[must_use]
    pub fn record(&self, id: &str) -> Option<&AnchorRecord> {
        self.records.get(id)
    }

    /// Records in document order.
    pub fn records(&self) -> impl Iterator<Item = &AnchorRecord> + '_ {
        self.order.iter().filter_map(|id| self.records.get(id))
    }

    /// Walk `parent_id` links from `id` up to the outermost tracked ancestor.
    ///
    /// Stops at the first parent that is not tracked, and after at most
    /// `len()` hops so a malformed hierarchy cannot loop.
    #[must_use]
    pub fn top_level_of(&self, id: &str) -> Option<&AnchorId> {
        let mut current = self.records.get(id)?;
        for _ in 0..self.order.len() {
            match current.parent_id.as_ref().and_then(|p| self.records.get(p)) {
                Some(parent) => current = parent,
                None => break,
            }
        }
        Some(&current.id)
    }
}
