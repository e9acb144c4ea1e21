//! Participant document schema
//!
//! One row per person on a plan, whether or not they have an account.
//! The row starts life unclaimed with an invite token; a successful
//! claim links it to a user id and retires the token for good.

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for participants
pub const PARTICIPANT_COLLECTION: &str = "participants";

/// Role within a plan. Exactly one owner exists per plan.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    Owner,
    #[default]
    Participant,
    Viewer,
}

impl ParticipantRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantRole::Owner => "owner",
            ParticipantRole::Participant => "participant",
            ParticipantRole::Viewer => "viewer",
        }
    }
}

/// Where the invite stands.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InviteStatus {
    /// Row created without a named invitee yet
    #[default]
    Pending,
    /// Named and waiting on the invite link
    Invited,
    /// Claimed by an account
    Accepted,
}

impl InviteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InviteStatus::Pending => "pending",
            InviteStatus::Invited => "invited",
            InviteStatus::Accepted => "accepted",
        }
    }
}

/// Attendance answer.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RsvpStatus {
    #[default]
    Pending,
    Confirmed,
    NotSure,
}

impl RsvpStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RsvpStatus::Pending => "pending",
            RsvpStatus::Confirmed => "confirmed",
            RsvpStatus::NotSure => "not_sure",
        }
    }
}

/// Participant document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ParticipantDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata (created_at, updated_at, is_deleted)
    #[serde(default)]
    pub metadata: Metadata,

    /// Plan this row belongs to
    pub plan_id: ObjectId,

    /// Linked account id. Set exactly once, by a successful claim;
    /// never reassigned afterwards.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    #[serde(default)]
    pub role: ParticipantRole,

    /// Guest credential. Present exactly while the row is unclaimed;
    /// a claim unsets the field so the sparse unique index forgets it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invite_token: Option<String>,

    #[serde(default)]
    pub invite_status: InviteStatus,

    /// First name or display name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_email: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_phone: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub food_preferences: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub allergies: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,

    /// How many adults this participant brings (themselves included)
    #[serde(default = "default_adults_count")]
    pub adults_count: i32,

    #[serde(default)]
    pub kids_count: i32,

    #[serde(default)]
    pub rsvp_status: RsvpStatus,

    /// Last time the invite link was used
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_activity_at: Option<DateTime>,
}

fn default_adults_count() -> i32 {
    1
}

impl ParticipantDoc {
    /// Create a fresh unclaimed participant holding a newly minted
    /// invite token.
    pub fn new(
        plan_id: ObjectId,
        role: ParticipantRole,
        name: Option<String>,
        invite_token: String,
    ) -> Self {
        let invite_status = if name.is_some() {
            InviteStatus::Invited
        } else {
            InviteStatus::Pending
        };
        Self {
            _id: None,
            metadata: Metadata::new(),
            plan_id,
            user_id: None,
            role,
            invite_token: Some(invite_token),
            invite_status,
            name,
            last_name: None,
            contact_email: None,
            contact_phone: None,
            avatar_url: None,
            food_preferences: None,
            allergies: None,
            notes: None,
            adults_count: 1,
            kids_count: 0,
            rsvp_status: RsvpStatus::Pending,
            last_activity_at: None,
        }
    }

    pub fn is_claimed(&self) -> bool {
        self.user_id.is_some()
    }
}

impl IntoIndexes for ParticipantDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // Roster lookups
            (
                doc! { "plan_id": 1 },
                Some(
                    IndexOptions::builder()
                        .name("plan_id_index".to_string())
                        .build(),
                ),
            ),
            // One row per live token; sparse so claimed rows (token
            // unset) stay out of the index
            (
                doc! { "invite_token": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .sparse(true)
                        .name("invite_token_unique".to_string())
                        .build(),
                ),
            ),
            // One membership per account per plan; partial so the many
            // unclaimed rows do not collide on a missing user_id
            (
                doc! { "plan_id": 1, "user_id": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .partial_filter_expression(doc! { "user_id": { "$type": "string" } })
                        .name("plan_user_unique".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for ParticipantDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
