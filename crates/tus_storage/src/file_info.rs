use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Canonical upload metadata, serialized to JSON alongside the upload's data.
///
/// Field names and casing mirror the wire shape exactly; this struct is
/// serialized directly into `.info` files and S3 object tags, so renames
/// here are a wire-format break.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileInfo {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Size")]
    pub size: i64,
    #[serde(rename = "SizeIsDeferred")]
    pub size_is_deferred: bool,
    #[serde(rename = "Offset")]
    pub offset: i64,
    #[serde(rename = "MetaData")]
    pub metadata: IndexMap<String, String>,
    #[serde(rename = "IsPartial")]
    pub is_partial: bool,
    #[serde(rename = "IsFinal")]
    pub is_final: bool,
    #[serde(rename = "PartialUploads", skip_serializing_if = "Option::is_none")]
    pub partial_uploads: Option<Vec<String>>,
    #[serde(rename = "Storage", skip_serializing_if = "Option::is_none")]
    pub storage: Option<IndexMap<String, String>>,
}

impl FileInfo {
    pub fn new(id: impl Into<String>, size: Option<i64>) -> Self {
        Self {
            id: id.into(),
            size: size.unwrap_or(0),
            size_is_deferred: size.is_none(),
            offset: 0,
            metadata: IndexMap::new(),
            is_partial: false,
            is_final: false,
            partial_uploads: None,
            storage: None,
        }
    }

    /// True once offset has caught up with a known, non-deferred size.
    pub fn is_complete(&self) -> bool {
        !self.size_is_deferred && self.offset >= self.size
    }

    pub fn remaining(&self) -> Option<i64> {
        if self.size_is_deferred {
            None
        } else {
            Some(self.size - self.offset)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_shape_matches_wire_format() {
        let mut info = FileInfo::new("abc123de", Some(100));
        info.metadata.insert("filename".into(), "a.txt".into());
        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains("\"ID\":\"abc123de\""));
        assert!(json.contains("\"Size\":100"));
        assert!(json.contains("\"SizeIsDeferred\":false"));
        assert!(!json.contains("PartialUploads"));
        assert!(!json.contains("\"Storage\""));
    }

    #[test]
    fn deferred_length_has_no_size_bound() {
        let info = FileInfo::new("abc123de", None);
        assert!(info.size_is_deferred);
        assert_eq!(info.remaining(), None);
        assert!(!info.is_complete());
    }

    #[test]
    fn completion_tracks_offset_against_size() {
        let mut info = FileInfo::new("abc123de", Some(10));
        info.offset = 9;
        assert!(!info.is_complete());
        info.offset = 10;
        assert!(info.is_complete());
    }
}
