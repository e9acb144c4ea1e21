//! Identity sync service
//!
//! The identity provider owns the user's profile; participant rows keep
//! a copy for display. This service derives a partial field set from
//! token claims and reconciles it into every row linked to the account.
//! Absent claims never erase stored values, and rows that already match
//! are left untouched so their `updated_at` stays honest.

use bson::{doc, oid::ObjectId, DateTime, Document};
use tracing::{debug, info};

use crate::auth::claims::IdentityClaims;
use crate::auth::principal::UserIdentity;
use crate::db::schemas::{ParticipantDoc, PARTICIPANT_COLLECTION};
use crate::db::{MongoClient, MongoCollection};
use crate::types::{Result, WaymarkError};

/// Profile fields derivable from identity claims. `None` means the
/// claims had nothing to say about that field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileFields {
    pub name: Option<String>,
    pub last_name: Option<String>,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
    pub avatar_url: Option<String>,
}

impl ProfileFields {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.last_name.is_none()
            && self.contact_email.is_none()
            && self.contact_phone.is_none()
            && self.avatar_url.is_none()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

/// Derive profile fields from token claims.
///
/// First and last name prefer their dedicated metadata fields and fall
/// back to splitting the display name at its first space; a one-word
/// display name becomes the first name with no last name.
pub fn derive_profile(claims: &IdentityClaims) -> ProfileFields {
    let meta = claims.user_metadata.as_ref();

    let (split_first, split_last) = match claims.display_name() {
        Some(full) => {
            let full = full.trim();
            match full.split_once(' ') {
                Some((first, rest)) => (Some(first.to_string()), Some(rest.trim().to_string())),
                None => (Some(full.to_string()), None),
            }
        }
        None => (None, None),
    };

    ProfileFields {
        name: non_empty(meta.and_then(|m| m.first_name.clone())).or(split_first),
        last_name: non_empty(meta.and_then(|m| m.last_name.clone())).or(split_last),
        contact_email: non_empty(claims.email.clone()),
        contact_phone: non_empty(meta.and_then(|m| m.phone.clone())),
        avatar_url: non_empty(meta.and_then(|m| m.avatar_url.clone())),
    }
}

fn differs(stored: &Option<String>, derived: &Option<String>) -> bool {
    match derived {
        Some(value) => stored.as_deref() != Some(value.as_str()),
        // An absent claim never drives a write.
        None => false,
    }
}

/// Would applying these fields change the row?
pub fn needs_sync(participant: &ParticipantDoc, fields: &ProfileFields) -> bool {
    differs(&participant.name, &fields.name)
        || differs(&participant.last_name, &fields.last_name)
        || differs(&participant.contact_email, &fields.contact_email)
        || differs(&participant.contact_phone, &fields.contact_phone)
        || differs(&participant.avatar_url, &fields.avatar_url)
}

/// `$set` payload carrying exactly the present fields.
pub fn profile_set_doc(fields: &ProfileFields) -> Document {
    let mut set = Document::new();
    if let Some(name) = &fields.name {
        set.insert("name", name);
    }
    if let Some(last_name) = &fields.last_name {
        set.insert("last_name", last_name);
    }
    if let Some(email) = &fields.contact_email {
        set.insert("contact_email", email);
    }
    if let Some(phone) = &fields.contact_phone {
        set.insert("contact_phone", phone);
    }
    if let Some(avatar_url) = &fields.avatar_url {
        set.insert("avatar_url", avatar_url);
    }
    set
}

/// Result of syncing a single participant row.
#[derive(Debug)]
pub enum SyncOutcome {
    /// Row already matched the derived fields; nothing written
    Unchanged(ParticipantDoc),
    /// Row differed and was rewritten
    Updated(ParticipantDoc),
}

impl SyncOutcome {
    pub fn into_participant(self) -> ParticipantDoc {
        match self {
            SyncOutcome::Unchanged(p) | SyncOutcome::Updated(p) => p,
        }
    }
}

/// Reconciles identity claims into participant rows.
#[derive(Clone)]
pub struct IdentitySyncService {
    mongo: MongoClient,
}

impl IdentitySyncService {
    pub fn new(mongo: MongoClient) -> Self {
        IdentitySyncService { mongo }
    }

    async fn participants(&self) -> Result<MongoCollection<ParticipantDoc>> {
        self.mongo.collection(PARTICIPANT_COLLECTION).await
    }

    /// Sync one row. No write happens when nothing differs.
    pub async fn sync_one(
        &self,
        participant: ParticipantDoc,
        fields: &ProfileFields,
    ) -> Result<SyncOutcome> {
        if !needs_sync(&participant, fields) {
            return Ok(SyncOutcome::Unchanged(participant));
        }

        let id = participant
            ._id
            .ok_or_else(|| WaymarkError::Internal("participant row missing id".to_string()))?;

        let mut set = profile_set_doc(fields);
        set.insert("metadata.updated_at", DateTime::now());

        let participants = self.participants().await?;
        let updated = participants
            .find_one_and_update(doc! { "_id": id }, doc! { "$set": set })
            .await?
            .ok_or_else(|| WaymarkError::NotFound("Participant not found".to_string()))?;

        Ok(SyncOutcome::Updated(updated))
    }

    /// Sync every row linked to the account in one batch write that
    /// covers exactly the rows that differ. Returns the count written.
    pub async fn sync_all(&self, identity: &UserIdentity) -> Result<u64> {
        let fields = derive_profile(&identity.claims);
        if fields.is_empty() {
            return Ok(0);
        }

        let participants = self.participants().await?;
        let rows = participants
            .find_many(doc! { "user_id": &identity.id })
            .await?;

        let stale: Vec<ObjectId> = rows
            .iter()
            .filter(|p| needs_sync(p, &fields))
            .filter_map(|p| p._id)
            .collect();

        if stale.is_empty() {
            debug!(user_id = %identity.id, "profile already in sync");
            return Ok(0);
        }

        let mut set = profile_set_doc(&fields);
        set.insert("metadata.updated_at", DateTime::now());

        let result = participants
            .update_many(doc! { "_id": { "$in": stale } }, doc! { "$set": set })
            .await?;

        info!(
            user_id = %identity.id,
            rows = result.modified_count,
            "participant profiles synced"
        );
        Ok(result.modified_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::claims::UserMetadata;
    use crate::db::schemas::ParticipantRole;

    fn claims_with_meta(meta: UserMetadata) -> IdentityClaims {
        IdentityClaims {
            sub: "u1".to_string(),
            user_metadata: Some(meta),
            ..Default::default()
        }
    }

    fn linked_row() -> ParticipantDoc {
        let mut p = ParticipantDoc::new(
            ObjectId::new(),
            ParticipantRole::Participant,
            None,
            "f".repeat(64),
        );
        p._id = Some(ObjectId::new());
        p.user_id = Some("u1".to_string());
        p.invite_token = None;
        p
    }

    #[test]
    fn test_dedicated_name_fields_win() {
        let claims = claims_with_meta(UserMetadata {
            first_name: Some("Ada".to_string()),
            last_name: Some("Byron".to_string()),
            full_name: Some("Ada Lovelace".to_string()),
            ..Default::default()
        });
        let fields = derive_profile(&claims);
        assert_eq!(fields.name.as_deref(), Some("Ada"));
        assert_eq!(fields.last_name.as_deref(), Some("Byron"));
    }

    #[test]
    fn test_full_name_splits_at_first_space() {
        let claims = claims_with_meta(UserMetadata {
            full_name: Some("Ada Lovelace King".to_string()),
            ..Default::default()
        });
        let fields = derive_profile(&claims);
        assert_eq!(fields.name.as_deref(), Some("Ada"));
        assert_eq!(fields.last_name.as_deref(), Some("Lovelace King"));
    }

    #[test]
    fn test_single_word_name_has_no_last_name() {
        let claims = claims_with_meta(UserMetadata {
            name: Some("Cher".to_string()),
            ..Default::default()
        });
        let fields = derive_profile(&claims);
        assert_eq!(fields.name.as_deref(), Some("Cher"));
        assert!(fields.last_name.is_none());
    }

    #[test]
    fn test_email_and_phone_and_avatar() {
        let mut claims = claims_with_meta(UserMetadata {
            phone: Some("+4587654321".to_string()),
            avatar_url: Some("https://cdn.example.com/a.png".to_string()),
            ..Default::default()
        });
        claims.email = Some("ada@example.com".to_string());

        let fields = derive_profile(&claims);
        assert_eq!(fields.contact_email.as_deref(), Some("ada@example.com"));
        assert_eq!(fields.contact_phone.as_deref(), Some("+4587654321"));
        assert_eq!(
            fields.avatar_url.as_deref(),
            Some("https://cdn.example.com/a.png")
        );
    }

    #[test]
    fn test_empty_claims_derive_nothing() {
        let claims = IdentityClaims {
            sub: "u1".to_string(),
            email: Some("  ".to_string()),
            ..Default::default()
        };
        let fields = derive_profile(&claims);
        assert!(fields.is_empty());
    }

    #[test]
    fn test_needs_sync_detects_difference() {
        let mut row = linked_row();
        row.name = Some("Old".to_string());

        let fields = ProfileFields {
            name: Some("New".to_string()),
            ..Default::default()
        };
        assert!(needs_sync(&row, &fields));
    }

    #[test]
    fn test_matching_row_needs_no_sync() {
        let mut row = linked_row();
        row.name = Some("Ada".to_string());
        row.contact_email = Some("ada@example.com".to_string());

        let fields = ProfileFields {
            name: Some("Ada".to_string()),
            contact_email: Some("ada@example.com".to_string()),
            ..Default::default()
        };
        assert!(!needs_sync(&row, &fields));
    }

    #[test]
    fn test_absent_claim_never_erases_stored_value() {
        let mut row = linked_row();
        row.contact_phone = Some("+4511111111".to_string());

        // Claims carry no phone, so the stored one must not count as a
        // difference, and the update doc must not mention it.
        let fields = ProfileFields::default();
        assert!(!needs_sync(&row, &fields));
        assert!(profile_set_doc(&fields).is_empty());
    }

    #[test]
    fn test_set_doc_carries_only_present_fields() {
        let fields = ProfileFields {
            name: Some("Ada".to_string()),
            avatar_url: Some("https://cdn.example.com/a.png".to_string()),
            ..Default::default()
        };
        let set = profile_set_doc(&fields);
        assert_eq!(set.len(), 2);
        assert!(set.contains_key("name"));
        assert!(set.contains_key("avatar_url"));
        assert!(!set.contains_key("last_name"));
    }
}
