//! Reading progress indicator.

use serde::{Deserialize, Serialize};

use crate::registry::AnchorRegistry;
use crate::resolver::ActiveState;
use crate::visibility::LayoutSnapshot;

/// How progress is measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressMode {
    /// Document scroll ratio.
    Scroll,
    /// Registry position of the active anchor.
    #[default]
    Section,
}

impl std::fmt::Display for ProgressMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Scroll => write!(f, "scroll"),
            Self::Section => write!(f, "section"),
        }
    }
}

/// Progress through the displayed section, in `[0, 100]`.
///
/// The sentinel state is always 0. Scroll mode falls back to section mode
/// when no layout is known or the document does not scroll. In section mode
/// a single-anchor registry reports 100.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn progress(
    mode: ProgressMode,
    state: &ActiveState,
    registry: &AnchorRegistry,
    layout: Option<&LayoutSnapshot>,
) -> f64 {
    let Some(index) = state
        .active_id()
        .and_then(|id| registry.index_of(id.as_str()))
    else {
        return 0.0;
    };

    if mode == ProgressMode::Scroll {
        if let Some(ratio) = layout.and_then(LayoutSnapshot::scroll_ratio) {
            return ratio * 100.0;
        }
    }

    let count = registry.len();
    if count <= 1 {
        return 100.0;
    }
    (index as f64 / (count - 1) as f64 * 100.0).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchor::AnchorId;
    use crate::resolver::ResolveReason;

    fn registry(ids: &[&str]) -> AnchorRegistry {
        let mut registry = AnchorRegistry::new();
        registry.register(ids.iter().map(|id| AnchorId::from(*id)).collect(), Vec::new());
        registry
    }

    fn active(id: &str) -> ActiveState {
        ActiveState::new(id.into(), 1, ResolveReason::HighestRatio)
    }

    #[test]
    fn test_section_progress() {
        let registry = registry(&["a", "b", "c", "d", "e"]);
        let value = progress(ProgressMode::Section, &active("c"), &registry, None);
        assert!((value - 50.0).abs() < 1e-9);
        let value = progress(ProgressMode::Section, &active("e"), &registry, None);
        assert!((value - 100.0).abs() < 1e-9);
        let value = progress(ProgressMode::Section, &active("a"), &registry, None);
        assert!(value.abs() < 1e-9);
    }

    #[test]
    fn test_single_anchor_is_complete() {
        let registry = registry(&["only"]);
        let value = progress(ProgressMode::Section, &active("only"), &registry, None);
        assert!((value - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_sentinel_is_zero() {
        let registry = registry(&["a", "b"]);
        let layout = LayoutSnapshot::new(800.0, 400.0, 1600.0);
        for mode in [ProgressMode::Scroll, ProgressMode::Section] {
            assert!(progress(mode, &ActiveState::none(0), &registry, Some(&layout)).abs() < 1e-9);
        }
    }

    #[test]
    fn test_scroll_progress() {
        let registry = registry(&["a", "b"]);
        let layout = LayoutSnapshot::new(800.0, 200.0, 1600.0);
        let value = progress(ProgressMode::Scroll, &active("a"), &registry, Some(&layout));
        assert!((value - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_scroll_progress_without_layout_uses_section() {
        let registry = registry(&["a", "b", "c"]);
        let value = progress(ProgressMode::Scroll, &active("b"), &registry, None);
        assert!((value - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_mode_serde() {
        let mode: ProgressMode = serde_json::from_str("\"scroll\"").unwrap();
        assert_eq!(mode, ProgressMode::Scroll);
        assert_eq!(ProgressMode::default().to_string(), "section");
    }
}
