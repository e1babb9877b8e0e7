//! Table of contents for the displayed section.

use serde::Serialize;

use crate::anchor::AnchorId;
use crate::registry::AnchorRegistry;
use crate::resolver::ActiveState;
use crate::visibility::VisibilitySnapshot;

/// One line of the table of contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TocEntry {
    /// Anchor the entry links to.
    pub id: AnchorId,
    /// Title to show.
    pub title: String,
    /// Hierarchy depth, for indentation.
    pub level: u8,
    /// The entry is the active anchor.
    pub is_active: bool,
    /// The anchor is visible but was not chosen as active.
    pub is_near_active: bool,
}

/// Build the table of contents in document order.
#[must_use]
pub fn table_of_contents(
    registry: &AnchorRegistry,
    snapshot: &VisibilitySnapshot,
    state: &ActiveState,
) -> Vec<TocEntry> {
    registry
        .records()
        .map(|record| {
            let is_active = state.is_active(record.id.as_str());
            TocEntry {
                id: record.id.clone(),
                title: record.display_title.clone(),
                level: record.level,
                is_active,
                is_near_active: !is_active && snapshot.get(record.id.as_str()).is_visible,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::anchor::AnchorRecord;
    use crate::resolver::ResolveReason;
    use crate::visibility::VisibilityEntry;

    #[test]
    fn test_toc_flags() {
        let mut registry = AnchorRegistry::new();
        registry.register(
            vec!["ethics".into(), "ethics-1".into(), "ethics-2".into()],
            vec![
                AnchorRecord::new("ethics", 1, "Ethics"),
                AnchorRecord::new("ethics-1", 2, "Virtue").with_parent("ethics"),
                AnchorRecord::new("ethics-2", 2, "Duty").with_parent("ethics"),
            ],
        );
        let mut known = HashMap::new();
        known.insert(AnchorId::from("ethics-1"), VisibilityEntry::new(true, 0.9));
        known.insert(AnchorId::from("ethics-2"), VisibilityEntry::new(true, 0.1));
        let snapshot = VisibilitySnapshot::from_entries(&registry, &known, 1);
        let state = ActiveState::new("ethics-1".into(), 1, ResolveReason::HighestRatio);

        let toc = table_of_contents(&registry, &snapshot, &state);

        assert_eq!(toc.len(), 3);
        assert_eq!(toc[0].title, "Ethics");
        assert!(!toc[0].is_active && !toc[0].is_near_active);
        assert!(toc[1].is_active && !toc[1].is_near_active);
        assert_eq!(toc[1].level, 2);
        assert!(!toc[2].is_active && toc[2].is_near_active);
    }

    #[test]
    fn test_toc_sentinel_state() {
        let mut registry = AnchorRegistry::new();
        registry.register(vec!["a".into()], Vec::new());
        let toc = table_of_contents(
            &registry,
            &VisibilitySnapshot::hidden(&registry, 0),
            &ActiveState::none(0),
        );
        assert_eq!(toc.len(), 1);
        assert!(!toc[0].is_active);
    }
}
