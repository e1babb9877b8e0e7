//! Anchor identifiers and hierarchy records.
//!
//! An anchor is a named, navigable region of the document: the top-level
//! section being displayed or one of its subsections. The content provider
//! supplies the records; the tracker never owns prose.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque, document-unique identifier of an anchor.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnchorId(String);

impl AnchorId {
    /// Create an anchor id from any string-like value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AnchorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AnchorId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for AnchorId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&AnchorId> for AnchorId {
    fn from(id: &AnchorId) -> Self {
        id.clone()
    }
}

impl Borrow<str> for AnchorId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for AnchorId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// One node of the section hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorRecord {
    /// The anchor this record describes.
    pub id: AnchorId,

    /// Hierarchy depth (1 for a top-level section).
    #[serde(default = "default_level")]
    pub level: u8,

    /// Enclosing anchor, absent for a top-level section.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<AnchorId>,

    /// Title shown in navigation.
    #[serde(alias = "title")]
    pub display_title: String,
}

fn default_level() -> u8 {
    1
}

impl AnchorRecord {
    /// Create a record with no parent.
    #[must_use]
    pub fn new(id: impl Into<AnchorId>, level: u8, display_title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            level,
            parent_id: None,
            display_title: display_title.into(),
        }
    }

    /// Set the enclosing anchor.
    #[must_use]
    pub fn with_parent(mut self, parent_id: impl Into<AnchorId>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Placeholder record for an id the content provider did not describe.
    #[must_use]
    pub fn placeholder(id: &AnchorId) -> Self {
        Self::new(id.clone(), 1, id.as_str())
    }

    /// Whether this record is a top-level section.
    #[must_use]
    pub fn is_top_level(&self) -> bool {
        self.parent_id.is_none()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_anchor_id_display() {
        assert_eq!(AnchorId::new("virtue").to_string(), "virtue");
    }

    #[test]
    fn test_anchor_id_borrow_lookup() {
        let mut map = HashMap::new();
        map.insert(AnchorId::from("stoics"), 3);
        assert_eq!(map.get("stoics"), Some(&3));
    }

    #[test]
    fn test_anchor_id_serializes_as_string() {
        let json = serde_json::to_string(&AnchorId::from("a")).unwrap();
        assert_eq!(json, "\"a\"");
    }

    #[test]
    fn test_record_with_parent() {
        let record = AnchorRecord::new("virtue-intro", 2, "Introduction").with_parent("virtue");
        assert_eq!(record.parent_id, Some(AnchorId::from("virtue")));
        assert!(!record.is_top_level());
    }

    #[test]
    fn test_record_placeholder_uses_id_as_title() {
        let record = AnchorRecord::placeholder(&AnchorId::from("misc"));
        assert_eq!(record.display_title, "misc");
        assert!(record.is_top_level());
    }

    #[test]
    fn test_record_deserialize_defaults() {
        let record: AnchorRecord = serde_json::from_str(r#"{"id": "a", "title": "A"}"#).unwrap();
        assert_eq!(record.level, 1);
        assert!(record.parent_id.is_none());
        assert_eq!(record.display_title, "A");
    }
}
