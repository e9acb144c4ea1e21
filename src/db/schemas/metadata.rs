//! Common metadata for all documents
//!
//! Tracks creation, update, and soft deletion timestamps. Reads filter
//! on `is_deleted`, so a soft-deleted row disappears from the API
//! without losing its history.

use bson::DateTime;
use serde::{Deserialize, Serialize};

/// Common metadata for all documents
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Metadata {
    /// Whether this document has been soft-deleted
    #[serde(default)]
    pub is_deleted: bool,

    /// When the document was soft-deleted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime>,

    /// When the document was last updated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime>,

    /// When the document was created
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime>,
}

impl Metadata {
    /// Create new metadata with current timestamps
    pub fn new() -> Self {
        let now = DateTime::now();
        Self {
            is_deleted: false,
            deleted_at: None,
            updated_at: Some(now),
            created_at: Some(now),
        }
    }

    /// Reset bookkeeping at insert time. Collections call this so a
    /// recycled struct can never smuggle in stale timestamps or a
    /// deleted flag.
    pub fn stamp_created(&mut self) {
        let now = DateTime::now();
        self.is_deleted = false;
        self.deleted_at = None;
        self.created_at = Some(now);
        self.updated_at = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stamp_created_clears_deletion() {
        let mut metadata = Metadata {
            is_deleted: true,
            deleted_at: Some(DateTime::now()),
            updated_at: None,
            created_at: None,
        };
        metadata.stamp_created();
        assert!(!metadata.is_deleted);
        assert!(metadata.deleted_at.is_none());
        assert!(metadata.created_at.is_some());
        assert!(metadata.updated_at.is_some());
    }
}
