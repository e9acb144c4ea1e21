//! Item document schema
//!
//! Shared checklist rows: food, equipment and everything else a trip
//! needs. Items can be assigned to a participant who brings them.

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for items
pub const ITEM_COLLECTION: &str = "items";

/// Unit applied to equipment items created without one.
pub const DEFAULT_EQUIPMENT_UNIT: &str = "pcs";

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ItemCategory {
    /// Food rows must carry a unit
    Food,
    Equipment,
    #[default]
    Other,
}

impl ItemCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemCategory::Food => "food",
            ItemCategory::Equipment => "equipment",
            ItemCategory::Other => "other",
        }
    }
}

/// Item document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ItemDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata (created_at, updated_at, is_deleted)
    #[serde(default)]
    pub metadata: Metadata,

    /// Plan this item belongs to
    pub plan_id: ObjectId,

    pub name: String,

    #[serde(default)]
    pub category: ItemCategory,

    #[serde(default = "default_quantity")]
    pub quantity: i64,

    /// Measurement unit ("kg", "pcs"). Required for food.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,

    /// Participant bringing this item, if anyone signed up for it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_participant_id: Option<ObjectId>,
}

fn default_quantity() -> i64 {
    1
}

impl ItemDoc {
    /// Create a new item document
    pub fn new(plan_id: ObjectId, name: String, category: ItemCategory) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            plan_id,
            name,
            category,
            quantity: 1,
            unit: None,
            notes: None,
            assigned_participant_id: None,
        }
    }
}

impl IntoIndexes for ItemDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // Checklist lookups
            (
                doc! { "plan_id": 1 },
                Some(
                    IndexOptions::builder()
                        .name("plan_id_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for ItemDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
