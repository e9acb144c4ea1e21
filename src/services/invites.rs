//! Invite lifecycle service
//!
//! Issue, regenerate, resolve and claim invite tokens. A token is born
//! with its participant row, can be reissued while the row is
//! unclaimed, resolves guests to their row, and dies the moment an
//! account claims the row.
//!
//! Claiming is the delicate part: the link between a participant row
//! and an account is written with a compare-and-set so two concurrent
//! claims of the same invite can never both win, and the partial unique
//! index on (plan_id, user_id) backstops the one-membership-per-plan
//! rule even across different invites.

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::ReturnDocument;
use tracing::{debug, info, warn};

use crate::auth::invite_token::{generate_invite_token, is_well_formed};
use crate::auth::principal::UserIdentity;
use crate::db::mongo::{is_duplicate_key, storage_error};
use crate::db::schemas::{
    ParticipantDoc, PreferenceDefaultsDoc, PARTICIPANT_COLLECTION,
    PREFERENCE_DEFAULTS_COLLECTION,
};
use crate::db::{MongoClient, MongoCollection};
use crate::services::identity_sync::{derive_profile, ProfileFields};
use crate::types::{Result, WaymarkError};

/// Conflict message when the invite is linked to a different account.
pub const ALREADY_LINKED: &str = "Invite already linked to another account";

/// Conflict message when the account already holds a seat on the plan.
pub const ALREADY_PARTICIPANT: &str = "Already a participant in this plan";

/// Outcome of a claim. Both variants are success on the wire; the
/// repeat case exists so callers can skip side effects.
#[derive(Debug)]
pub enum ClaimOutcome {
    /// The row was linked to the account just now
    Claimed(ParticipantDoc),
    /// The row was already linked to this same account
    AlreadyClaimed(ParticipantDoc),
}

impl ClaimOutcome {
    pub fn into_participant(self) -> ParticipantDoc {
        match self {
            ClaimOutcome::Claimed(p) | ClaimOutcome::AlreadyClaimed(p) => p,
        }
    }
}

/// How an existing link on the row relates to the claiming account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkState {
    Unclaimed,
    LinkedToSelf,
    LinkedToOther,
}

fn link_state(participant: &ParticipantDoc, user_id: &str) -> LinkState {
    match participant.user_id.as_deref() {
        None => LinkState::Unclaimed,
        Some(linked) if linked == user_id => LinkState::LinkedToSelf,
        Some(_) => LinkState::LinkedToOther,
    }
}

/// Decide a claim whose token no longer resolves. The token may have
/// been consumed by this same account earlier: its row (found by
/// `user_id` instead) makes the repeat claim succeed unchanged.
/// Without such a row the invite is simply gone.
fn consumed_token_outcome(linked_row: Option<ParticipantDoc>) -> Result<ClaimOutcome> {
    match linked_row {
        Some(row) => Ok(ClaimOutcome::AlreadyClaimed(row)),
        None => Err(WaymarkError::NotFound("Invite not found".to_string())),
    }
}

fn has_text(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|s| !s.trim().is_empty())
}

/// Draw tokens until one differs from the current value. The
/// replacement must actually replace.
fn replacement_token<F>(current: Option<&str>, mut draw: F) -> String
where
    F: FnMut() -> String,
{
    let mut fresh = draw();
    while current == Some(fresh.as_str()) {
        fresh = draw();
    }
    fresh
}

/// Build the `$set`/`$unset` update that turns an unclaimed row into a
/// claimed one: link the account, retire the token, stamp the identity
/// profile over the row, and backfill dietary prefs from the account's
/// saved defaults.
fn claim_update(
    user_id: &str,
    profile: &ProfileFields,
    participant: &ParticipantDoc,
    defaults: Option<&PreferenceDefaultsDoc>,
) -> Document {
    let mut set = doc! {
        "user_id": user_id,
        "invite_status": "accepted",
        "metadata.updated_at": DateTime::now(),
    };

    // Present identity claims overwrite the profile fields; absent
    // claims leave whatever the invite carried.
    if let Some(name) = &profile.name {
        set.insert("name", name);
    }
    if let Some(last_name) = &profile.last_name {
        set.insert("last_name", last_name);
    }
    if let Some(email) = &profile.contact_email {
        set.insert("contact_email", email);
    }
    if let Some(phone) = &profile.contact_phone {
        set.insert("contact_phone", phone);
    }
    if let Some(avatar_url) = &profile.avatar_url {
        set.insert("avatar_url", avatar_url);
    }

    // Saved account defaults backfill empty dietary fields.
    if let Some(defaults) = defaults {
        if !has_text(&participant.food_preferences) && has_text(&defaults.food_preferences) {
            set.insert(
                "food_preferences",
                defaults.food_preferences.as_deref().unwrap_or_default(),
            );
        }
        if !has_text(&participant.allergies) && has_text(&defaults.allergies) {
            set.insert(
                "allergies",
                defaults.allergies.as_deref().unwrap_or_default(),
            );
        }
    }

    doc! {
        "$set": set,
        "$unset": { "invite_token": "" },
    }
}

/// Invite lifecycle operations against the participants collection.
#[derive(Clone)]
pub struct InviteService {
    mongo: MongoClient,
}

impl InviteService {
    pub fn new(mongo: MongoClient) -> Self {
        InviteService { mongo }
    }

    async fn participants(&self) -> Result<MongoCollection<ParticipantDoc>> {
        self.mongo.collection(PARTICIPANT_COLLECTION).await
    }

    async fn defaults_for(&self, user_id: &str) -> Result<Option<PreferenceDefaultsDoc>> {
        let collection: MongoCollection<PreferenceDefaultsDoc> =
            self.mongo.collection(PREFERENCE_DEFAULTS_COLLECTION).await?;
        collection.find_one(doc! { "user_id": user_id }).await
    }

    /// Replace an unclaimed participant's token with a fresh one. The
    /// old link stops working immediately.
    pub async fn regenerate(
        &self,
        plan_id: ObjectId,
        participant_id: ObjectId,
    ) -> Result<ParticipantDoc> {
        let participants = self.participants().await?;

        let current = participants
            .find_one(doc! { "_id": participant_id, "plan_id": plan_id })
            .await?
            .ok_or_else(|| WaymarkError::NotFound("Participant not found".to_string()))?;

        if current.is_claimed() {
            // A claimed row has no token and never gets one back.
            return Err(WaymarkError::Conflict(
                "Participant already claimed".to_string(),
            ));
        }

        let fresh = replacement_token(current.invite_token.as_deref(), generate_invite_token);
        let updated = participants
            .find_one_and_update(
                doc! { "_id": participant_id, "plan_id": plan_id },
                doc! {
                    "$set": {
                        "invite_token": &fresh,
                        "metadata.updated_at": DateTime::now(),
                    }
                },
            )
            .await?
            .ok_or_else(|| WaymarkError::NotFound("Participant not found".to_string()))?;

        info!(
            participant_id = %participant_id,
            plan_id = %plan_id,
            "invite token regenerated"
        );
        Ok(updated)
    }

    /// Resolve an invite token to its participant row within one plan.
    ///
    /// Malformed tokens are rejected before any lookup. A hit stamps
    /// `last_activity_at` best-effort; a failure to stamp never fails
    /// the resolution.
    pub async fn resolve_guest(
        &self,
        plan_id: ObjectId,
        token: &str,
    ) -> Result<ParticipantDoc> {
        if !is_well_formed(token) {
            return Err(WaymarkError::NotFound("Invite not found".to_string()));
        }

        let participants = self.participants().await?;
        let participant = participants
            .find_one(doc! { "plan_id": plan_id, "invite_token": token })
            .await?
            .ok_or_else(|| WaymarkError::NotFound("Invite not found".to_string()))?;

        if let Some(id) = participant._id {
            let stamp = participants
                .update_one(
                    doc! { "_id": id },
                    doc! { "$set": { "last_activity_at": DateTime::now() } },
                )
                .await;
            if let Err(e) = stamp {
                debug!(error = %e, "failed to stamp invite activity");
            }
        }

        Ok(participant)
    }

    /// Link an invite's participant row to a signed-in account.
    ///
    /// Repeat claims by the same account succeed without changing
    /// anything. A row linked elsewhere, or a second seat in the same
    /// plan, conflicts.
    pub async fn claim(
        &self,
        identity: &UserIdentity,
        plan_id: ObjectId,
        token: &str,
    ) -> Result<ClaimOutcome> {
        if !is_well_formed(token) {
            return Err(WaymarkError::NotFound("Invite not found".to_string()));
        }

        let participants = self.participants().await?;
        let participant = participants
            .find_one(doc! { "plan_id": plan_id, "invite_token": token })
            .await?;

        let participant = match participant {
            Some(p) => p,
            None => {
                let linked = participants
                    .find_one(doc! { "plan_id": plan_id, "user_id": &identity.id })
                    .await?;
                return consumed_token_outcome(linked);
            }
        };

        match link_state(&participant, &identity.id) {
            LinkState::LinkedToSelf => {
                return Ok(ClaimOutcome::AlreadyClaimed(participant));
            }
            LinkState::LinkedToOther => {
                return Err(WaymarkError::Conflict(ALREADY_LINKED.to_string()));
            }
            LinkState::Unclaimed => {}
        }

        // A different row in this plan may already belong to the
        // account.
        if let Some(existing) = participants
            .find_one(doc! { "plan_id": plan_id, "user_id": &identity.id })
            .await?
        {
            if existing._id != participant._id {
                return Err(WaymarkError::Conflict(ALREADY_PARTICIPANT.to_string()));
            }
        }

        let defaults = self.defaults_for(&identity.id).await?;
        let profile = derive_profile(&identity.claims);
        let update = claim_update(&identity.id, &profile, &participant, defaults.as_ref());

        let participant_id = participant
            ._id
            .ok_or_else(|| WaymarkError::Internal("participant row missing id".to_string()))?;

        // Compare-and-set: only an unclaimed row takes the link. The
        // raw collection is used so a unique-index race is visible as a
        // duplicate-key error rather than a generic storage failure.
        let cas = participants
            .inner()
            .find_one_and_update(
                doc! {
                    "_id": participant_id,
                    "plan_id": plan_id,
                    "user_id": bson::Bson::Null,
                    "metadata.is_deleted": { "$ne": true },
                },
                update,
            )
            .return_document(ReturnDocument::After)
            .await;

        match cas {
            Ok(Some(updated)) => {
                info!(
                    participant_id = %participant_id,
                    plan_id = %plan_id,
                    "invite claimed"
                );
                Ok(ClaimOutcome::Claimed(updated))
            }
            Ok(None) => {
                // Lost a race. Whoever won decides the outcome.
                let now = participants
                    .find_one(doc! { "_id": participant_id })
                    .await?;
                match now {
                    Some(row) if row.user_id.as_deref() == Some(identity.id.as_str()) => {
                        Ok(ClaimOutcome::AlreadyClaimed(row))
                    }
                    Some(_) => Err(WaymarkError::Conflict(ALREADY_LINKED.to_string())),
                    None => Err(WaymarkError::NotFound("Invite not found".to_string())),
                }
            }
            Err(e) if is_duplicate_key(&e) => {
                // The (plan_id, user_id) unique index caught a
                // concurrent claim through a different invite.
                warn!(plan_id = %plan_id, "duplicate membership blocked by index");
                Err(WaymarkError::Conflict(ALREADY_PARTICIPANT.to_string()))
            }
            Err(e) => Err(storage_error("Claim update failed", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::claims::{IdentityClaims, UserMetadata};
    use crate::db::schemas::ParticipantRole;

    fn unclaimed_row() -> ParticipantDoc {
        let mut p = ParticipantDoc::new(
            ObjectId::new(),
            ParticipantRole::Participant,
            None,
            "a".repeat(64),
        );
        p._id = Some(ObjectId::new());
        p
    }

    fn profile_from(claims: &IdentityClaims) -> ProfileFields {
        derive_profile(claims)
    }

    #[test]
    fn test_link_state() {
        let mut row = unclaimed_row();
        assert_eq!(link_state(&row, "u1"), LinkState::Unclaimed);

        row.user_id = Some("u1".to_string());
        assert_eq!(link_state(&row, "u1"), LinkState::LinkedToSelf);
        assert_eq!(link_state(&row, "u2"), LinkState::LinkedToOther);
    }

    #[test]
    fn test_replacement_token_rejects_the_incumbent() {
        let old = "a".repeat(64);
        let fresh = "b".repeat(64);

        // A draw that first repeats the old token must be redrawn.
        let mut draws = vec![old.clone(), old.clone(), fresh.clone()].into_iter();
        let replacement = replacement_token(Some(old.as_str()), || draws.next().unwrap());
        assert_eq!(replacement, fresh);
        assert_eq!(draws.next(), None);

        // With no incumbent the first draw stands.
        let mut draws = vec![old.clone()].into_iter();
        assert_eq!(replacement_token(None, || draws.next().unwrap()), old);
    }

    #[test]
    fn test_consumed_token_repeat_claim_stays_idempotent() {
        // The row was claimed earlier and its token cleared; the repeat
        // claim finds it by user_id and succeeds without a write.
        let mut row = unclaimed_row();
        row.user_id = Some("u1".to_string());
        row.invite_token = None;
        let row_id = row._id;

        match consumed_token_outcome(Some(row)).unwrap() {
            ClaimOutcome::AlreadyClaimed(p) => {
                assert_eq!(p._id, row_id);
                assert!(p.invite_token.is_none());
            }
            ClaimOutcome::Claimed(_) => panic!("repeat claim must not re-link"),
        }
    }

    #[test]
    fn test_consumed_token_without_linked_row_is_gone() {
        let err = consumed_token_outcome(None).unwrap_err();
        assert!(matches!(err, WaymarkError::NotFound(_)));
    }

    #[test]
    fn test_claim_update_links_and_retires_token() {
        let row = unclaimed_row();
        let claims = IdentityClaims {
            sub: "u1".to_string(),
            ..Default::default()
        };
        let update = claim_update("u1", &profile_from(&claims), &row, None);

        let set = update.get_document("$set").unwrap();
        assert_eq!(set.get_str("user_id").unwrap(), "u1");
        assert_eq!(set.get_str("invite_status").unwrap(), "accepted");
        assert!(set.contains_key("metadata.updated_at"));

        let unset = update.get_document("$unset").unwrap();
        assert!(unset.contains_key("invite_token"));
    }

    #[test]
    fn test_claim_update_applies_identity_fields() {
        let row = unclaimed_row();
        let claims = IdentityClaims {
            sub: "u1".to_string(),
            email: Some("mara@example.com".to_string()),
            user_metadata: Some(UserMetadata {
                full_name: Some("Mara Lund".to_string()),
                phone: Some("+4512345678".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let update = claim_update("u1", &profile_from(&claims), &row, None);

        let set = update.get_document("$set").unwrap();
        assert_eq!(set.get_str("name").unwrap(), "Mara");
        assert_eq!(set.get_str("last_name").unwrap(), "Lund");
        assert_eq!(set.get_str("contact_email").unwrap(), "mara@example.com");
        assert_eq!(set.get_str("contact_phone").unwrap(), "+4512345678");
    }

    #[test]
    fn test_claim_update_overwrites_invite_placeholder_fields() {
        let mut row = unclaimed_row();
        row.name = Some("Nickname".to_string());
        row.contact_email = Some("placeholder@example.com".to_string());

        let claims = IdentityClaims {
            sub: "u1".to_string(),
            email: Some("real@example.com".to_string()),
            user_metadata: Some(UserMetadata {
                full_name: Some("Real Name".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let update = claim_update("u1", &profile_from(&claims), &row, None);

        // The claiming account's identity wins over whatever the
        // inviter typed in.
        let set = update.get_document("$set").unwrap();
        assert_eq!(set.get_str("name").unwrap(), "Real");
        assert_eq!(set.get_str("last_name").unwrap(), "Name");
        assert_eq!(set.get_str("contact_email").unwrap(), "real@example.com");
    }

    #[test]
    fn test_claim_update_leaves_fields_without_claims_alone() {
        let mut row = unclaimed_row();
        row.name = Some("Kept".to_string());

        let claims = IdentityClaims {
            sub: "u1".to_string(),
            ..Default::default()
        };
        let update = claim_update("u1", &profile_from(&claims), &row, None);

        let set = update.get_document("$set").unwrap();
        assert!(!set.contains_key("name"));
        assert!(!set.contains_key("contact_email"));
        assert!(!set.contains_key("avatar_url"));
    }

    #[test]
    fn test_claim_update_backfills_preference_defaults() {
        let row = unclaimed_row();
        let claims = IdentityClaims {
            sub: "u1".to_string(),
            ..Default::default()
        };
        let defaults = PreferenceDefaultsDoc {
            user_id: "u1".to_string(),
            food_preferences: Some("vegetarian".to_string()),
            allergies: Some("peanuts".to_string()),
            ..Default::default()
        };
        let update = claim_update("u1", &profile_from(&claims), &row, Some(&defaults));

        let set = update.get_document("$set").unwrap();
        assert_eq!(set.get_str("food_preferences").unwrap(), "vegetarian");
        assert_eq!(set.get_str("allergies").unwrap(), "peanuts");
    }

    #[test]
    fn test_claim_update_keeps_row_preferences_over_defaults() {
        let mut row = unclaimed_row();
        row.food_preferences = Some("omnivore".to_string());

        let claims = IdentityClaims {
            sub: "u1".to_string(),
            ..Default::default()
        };
        let defaults = PreferenceDefaultsDoc {
            user_id: "u1".to_string(),
            food_preferences: Some("vegetarian".to_string()),
            allergies: None,
            ..Default::default()
        };
        let update = claim_update("u1", &profile_from(&claims), &row, Some(&defaults));

        let set = update.get_document("$set").unwrap();
        assert!(!set.contains_key("food_preferences"));
        assert!(!set.contains_key("allergies"));
    }

    #[test]
    fn test_whitespace_preference_counts_as_empty_for_backfill() {
        let mut row = unclaimed_row();
        row.allergies = Some("   ".to_string());

        let claims = IdentityClaims {
            sub: "u1".to_string(),
            ..Default::default()
        };
        let defaults = PreferenceDefaultsDoc {
            user_id: "u1".to_string(),
            food_preferences: None,
            allergies: Some("shellfish".to_string()),
            ..Default::default()
        };
        let update = claim_update("u1", &profile_from(&claims), &row, Some(&defaults));
        let set = update.get_document("$set").unwrap();
        assert_eq!(set.get_str("allergies").unwrap(), "shellfish");
    }
}
