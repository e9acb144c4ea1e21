//! Plan document schema
//!
//! A plan is the root aggregate: participants and items hang off it
//! and its visibility setting drives every read decision.

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for plans
pub const PLAN_COLLECTION: &str = "plans";

/// Who can read a plan without being linked to it.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// Anyone with the link, signed in or not
    Public,
    /// Members, plus anyone holding a live invite token
    #[default]
    InviteOnly,
    /// Members only
    Private,
}

impl Visibility {
    /// Wire and storage spelling. Matches the serde rename.
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::InviteOnly => "invite_only",
            Visibility::Private => "private",
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Plan document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct PlanDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata (created_at, updated_at, is_deleted)
    #[serde(default)]
    pub metadata: Metadata,

    /// Trip title
    pub title: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    /// ISO date (YYYY-MM-DD); treated as an opaque string by the API
    #[serde(skip_serializing_if = "Option::is_none")]
    pub starts_on: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ends_on: Option<String>,

    #[serde(default)]
    pub visibility: Visibility,

    /// External id of the creating account; absent for plans created
    /// anonymously
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by_user_id: Option<String>,

    /// The owner-role participant created alongside the plan
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_participant_id: Option<ObjectId>,
}

impl PlanDoc {
    /// Create a new plan document
    pub fn new(title: String, visibility: Visibility, created_by_user_id: Option<String>) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            title,
            description: None,
            location: None,
            starts_on: None,
            ends_on: None,
            visibility,
            created_by_user_id,
            owner_participant_id: None,
        }
    }
}

impl IntoIndexes for PlanDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // Creator's plan list
            (
                doc! { "created_by_user_id": 1 },
                Some(
                    IndexOptions::builder()
                        .name("created_by_index".to_string())
                        .build(),
                ),
            ),
            // Discovery scans filter on visibility
            (
                doc! { "visibility": 1 },
                Some(
                    IndexOptions::builder()
                        .name("visibility_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for PlanDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
