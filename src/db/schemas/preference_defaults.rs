//! Preference defaults document schema
//!
//! Account-level dietary defaults. Copied onto a participant row at
//! claim time when the row has no preferences of its own, so returning
//! users stop re-typing their allergies for every trip.

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for preference defaults
pub const PREFERENCE_DEFAULTS_COLLECTION: &str = "preference_defaults";

/// Preference defaults document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct PreferenceDefaultsDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata (created_at, updated_at, is_deleted)
    #[serde(default)]
    pub metadata: Metadata,

    /// External account id these defaults belong to
    pub user_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub food_preferences: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub allergies: Option<String>,
}

impl PreferenceDefaultsDoc {
    /// Create a new preference defaults document
    pub fn new(user_id: String) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            user_id,
            food_preferences: None,
            allergies: None,
        }
    }
}

impl IntoIndexes for PreferenceDefaultsDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // One defaults row per account
            (
                doc! { "user_id": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("user_id_unique".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for PreferenceDefaultsDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
