//! Title path to the active anchor.

use serde::Serialize;

use crate::anchor::AnchorId;
use crate::registry::AnchorRegistry;
use crate::resolver::ActiveState;

/// One step of the breadcrumb.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Crumb {
    /// Anchor the crumb links to.
    pub id: AnchorId,
    /// Title to show.
    pub title: String,
}

/// Walk `parent_id` links from the active anchor to its top-level section.
///
/// The path is ordered outermost first. The walk stops at a parent that is
/// not registered, and at any anchor seen twice.
#[must_use]
pub fn breadcrumb(registry: &AnchorRegistry, state: &ActiveState) -> Vec<Crumb> {
    let mut path = Vec::new();
    let mut next = state.active_id().and_then(|id| registry.record(id.as_str()));
    while let Some(record) = next {
        if path.iter().any(|crumb: &Crumb| crumb.id == record.id) {
            break;
        }
        path.push(Crumb {
            id: record.id.clone(),
            title: record.display_title.clone(),
        });
        next = record
            .parent_id
            .as_ref()
            .and_then(|parent| registry.record(parent.as_str()));
    }
    path.reverse();
    path
}
