//! Participant routes
//!
//! Roster management under `/api/plans/{id}/participants`, plus the
//! claim endpoint that links an invite to a signed-in account. Roster
//! writes require plan write access; the roster listing is readable by
//! anyone who can read the plan, with invite tokens redacted unless the
//! caller is a plan writer.
//!
//! Owner rows are load-bearing: exactly one per plan, role immutable,
//! never deletable.

use std::sync::Arc;

use bson::{doc, oid::ObjectId, DateTime, Document};
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::plans::{can_write_plan, load_plan_for_read};
use super::{
    cors_preflight, error_to_response, get_auth_header, json_response, parse_json_body,
    parse_object_id, plan_not_found_error, rfc3339, rfc3339_opt,
};
use crate::auth::invite_token::generate_invite_token;
use crate::db::schemas::{
    InviteStatus, ItemDoc, ParticipantDoc, ParticipantRole, RsvpStatus, ITEM_COLLECTION,
    PARTICIPANT_COLLECTION,
};
use crate::db::MongoCollection;
use crate::server::AppState;
use crate::services::invites::ClaimOutcome;
use crate::types::{Result, WaymarkError};

pub const OWNER_ROLE_IMMUTABLE: &str = "The owner role cannot be changed";
pub const ONE_OWNER_PER_PLAN: &str = "A plan has exactly one owner";
pub const OWNER_NOT_REMOVABLE: &str = "The plan owner cannot be removed";

// =============================================================================
// Views
// =============================================================================

/// Participant as rendered on the wire. The invite token is a live
/// credential, so it only renders for plan writers (and for the guest
/// holding it).
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantView {
    pub id: String,
    pub plan_id: String,
    pub role: ParticipantRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invite_token: Option<String>,
    pub invite_status: InviteStatus,
    pub rsvp_status: RsvpStatus,
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
    pub adults_count: i32,
    pub kids_count: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_activity_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl ParticipantView {
    pub fn from_doc(participant: &ParticipantDoc, include_token: bool) -> Self {
        ParticipantView {
            id: participant._id.map(|id| id.to_hex()).unwrap_or_default(),
            plan_id: participant.plan_id.to_hex(),
            role: participant.role,
            user_id: participant.user_id.clone(),
            invite_token: if include_token {
                participant.invite_token.clone()
            } else {
                None
            },
            invite_status: participant.invite_status,
            rsvp_status: participant.rsvp_status,
            name: participant.name.clone(),
            last_name: participant.last_name.clone(),
            contact_email: participant.contact_email.clone(),
            contact_phone: participant.contact_phone.clone(),
            avatar_url: participant.avatar_url.clone(),
            food_preferences: participant.food_preferences.clone(),
            allergies: participant.allergies.clone(),
            notes: participant.notes.clone(),
            adults_count: participant.adults_count,
            kids_count: participant.kids_count,
            last_activity_at: participant.last_activity_at.map(rfc3339),
            created_at: rfc3339_opt(participant.metadata.created_at),
            updated_at: rfc3339_opt(participant.metadata.updated_at),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ParticipantListResponse {
    participants: Vec<ParticipantView>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ParticipantDeletedResponse {
    deleted: bool,
    id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ClaimResponse {
    claimed: bool,
    /// True when the row was already linked to this same account
    already_claimed: bool,
    participant: ParticipantView,
}

// =============================================================================
// Request bodies
// =============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateParticipantRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub contact_email: Option<String>,
    #[serde(default)]
    pub contact_phone: Option<String>,
    #[serde(default)]
    pub role: Option<ParticipantRole>,
    #[serde(default)]
    pub rsvp_status: Option<RsvpStatus>,
    #[serde(default)]
    pub food_preferences: Option<String>,
    #[serde(default)]
    pub allergies: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub adults_count: Option<i32>,
    #[serde(default)]
    pub kids_count: Option<i32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateParticipantRequest {
    /// Empty string clears the field
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub contact_email: Option<String>,
    #[serde(default)]
    pub contact_phone: Option<String>,
    #[serde(default)]
    pub role: Option<ParticipantRole>,
    #[serde(default)]
    pub rsvp_status: Option<RsvpStatus>,
    #[serde(default)]
    pub food_preferences: Option<String>,
    #[serde(default)]
    pub allergies: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub adults_count: Option<i32>,
    #[serde(default)]
    pub kids_count: Option<i32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimRequest {
    #[serde(default)]
    pub invite_token: String,
}

// =============================================================================
// Update document construction
// =============================================================================

fn clean(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

/// Field rules for a roster patch. Never touches `user_id`,
/// `invite_token` or `invite_status`; those move only through the
/// invite lifecycle.
pub(crate) fn participant_update_doc(
    target: &ParticipantDoc,
    body: &UpdateParticipantRequest,
) -> Result<Document> {
    if let Some(role) = body.role {
        if target.role == ParticipantRole::Owner && role != ParticipantRole::Owner {
            return Err(WaymarkError::Validation(OWNER_ROLE_IMMUTABLE.to_string()));
        }
        if role == ParticipantRole::Owner && target.role != ParticipantRole::Owner {
            return Err(WaymarkError::Validation(ONE_OWNER_PER_PLAN.to_string()));
        }
    }

    let mut set = Document::new();
    let mut unset = Document::new();

    for (field, value) in [
        ("name", &body.name),
        ("last_name", &body.last_name),
        ("contact_email", &body.contact_email),
        ("contact_phone", &body.contact_phone),
        ("food_preferences", &body.food_preferences),
        ("allergies", &body.allergies),
        ("notes", &body.notes),
    ] {
        if let Some(value) = value {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                unset.insert(field, "");
            } else {
                set.insert(field, trimmed);
            }
        }
    }

    if let Some(role) = body.role {
        if role != target.role {
            set.insert("role", role.as_str());
        }
    }
    if let Some(rsvp) = body.rsvp_status {
        set.insert("rsvp_status", rsvp.as_str());
    }
    if let Some(adults) = body.adults_count {
        if adults < 1 {
            return Err(WaymarkError::Validation(
                "adultsCount must be at least 1".to_string(),
            ));
        }
        set.insert("adults_count", adults);
    }
    if let Some(kids) = body.kids_count {
        if kids < 0 {
            return Err(WaymarkError::Validation(
                "kidsCount cannot be negative".to_string(),
            ));
        }
        set.insert("kids_count", kids);
    }

    if set.is_empty() && unset.is_empty() {
        return Err(WaymarkError::Validation("No fields to update".to_string()));
    }

    set.insert("metadata.updated_at", DateTime::now());
    let mut update = doc! { "$set": set };
    if !unset.is_empty() {
        update.insert("$unset", unset);
    }
    Ok(update)
}

// =============================================================================
// Handlers
// =============================================================================

/// Routes under /api/plans/{id}/participants.
///
/// `tail` is the path remainder after the prefix: "" for the
/// collection, "{pid}" for one row, "{pid}/regenerate-token" for token
/// reissue.
pub async fn handle_participants_request(
    req: Request<Incoming>,
    state: Arc<AppState>,
    plan_raw: &str,
    tail: &str,
) -> Response<Full<Bytes>> {
    let method = req.method().clone();
    if method == Method::OPTIONS {
        return cors_preflight();
    }

    let (pid_raw, action) = match tail.find('/') {
        Some(i) => (&tail[..i], &tail[i + 1..]),
        None => (tail, ""),
    };

    let result = match (method, pid_raw, action) {
        (Method::GET, "", "") => list_participants(req, state, plan_raw).await,
        (Method::POST, "", "") => create_participant(req, state, plan_raw).await,
        (Method::PATCH, pid, "") if !pid.is_empty() => {
            update_participant(req, state, plan_raw, pid).await
        }
        (Method::DELETE, pid, "") if !pid.is_empty() => {
            delete_participant(req, state, plan_raw, pid).await
        }
        (Method::POST, pid, "regenerate-token") if !pid.is_empty() => {
            regenerate_token(req, state, plan_raw, pid).await
        }
        _ => Err(WaymarkError::NotFound("Route not found".to_string())),
    };
    result.unwrap_or_else(|e| error_to_response(&e))
}

/// POST /api/plans/{id}/claim
pub async fn handle_claim_request(
    req: Request<Incoming>,
    state: Arc<AppState>,
    plan_raw: &str,
) -> Response<Full<Bytes>> {
    let method = req.method().clone();
    let result = match method {
        Method::POST => claim_invite(req, state, plan_raw).await,
        Method::OPTIONS => return cors_preflight(),
        _ => Err(WaymarkError::NotFound("Route not found".to_string())),
    };
    result.unwrap_or_else(|e| error_to_response(&e))
}

async fn list_participants(
    req: Request<Incoming>,
    state: Arc<AppState>,
    plan_raw: &str,
) -> Result<Response<Full<Bytes>>> {
    let principal = state.resolver.resolve_optional(get_auth_header(&req)).await;
    let (plan, membership) = load_plan_for_read(&state, &principal, plan_raw).await?;
    let plan_id = plan
        ._id
        .ok_or_else(|| WaymarkError::Internal("plan row missing id".to_string()))?;

    let include_tokens = can_write_plan(&principal, &plan, membership.is_some());

    let participants: MongoCollection<ParticipantDoc> =
        state.mongo.collection(PARTICIPANT_COLLECTION).await?;
    let roster = participants.find_many(doc! { "plan_id": plan_id }).await?;

    let response = ParticipantListResponse {
        participants: roster
            .iter()
            .map(|p| ParticipantView::from_doc(p, include_tokens))
            .collect(),
    };
    Ok(json_response(StatusCode::OK, &response))
}

/// Add a participant row with a freshly issued invite token.
async fn create_participant(
    req: Request<Incoming>,
    state: Arc<AppState>,
    plan_raw: &str,
) -> Result<Response<Full<Bytes>>> {
    let principal = state.resolver.resolve_optional(get_auth_header(&req)).await;
    let (plan, membership) = load_plan_for_read(&state, &principal, plan_raw).await?;
    if !can_write_plan(&principal, &plan, membership.is_some()) {
        return Err(plan_not_found_error());
    }
    let plan_id = plan
        ._id
        .ok_or_else(|| WaymarkError::Internal("plan row missing id".to_string()))?;

    let body: CreateParticipantRequest = parse_json_body(req, state.args.max_body_bytes).await?;

    let role = body.role.unwrap_or(ParticipantRole::Participant);
    if role == ParticipantRole::Owner {
        return Err(WaymarkError::Validation(ONE_OWNER_PER_PLAN.to_string()));
    }

    let mut participant =
        ParticipantDoc::new(plan_id, role, clean(&body.name), generate_invite_token());
    participant.last_name = clean(&body.last_name);
    participant.contact_email = clean(&body.contact_email);
    participant.contact_phone = clean(&body.contact_phone);
    participant.food_preferences = clean(&body.food_preferences);
    participant.allergies = clean(&body.allergies);
    participant.notes = clean(&body.notes);
    if let Some(rsvp) = body.rsvp_status {
        participant.rsvp_status = rsvp;
    }
    if let Some(adults) = body.adults_count {
        if adults < 1 {
            return Err(WaymarkError::Validation(
                "adultsCount must be at least 1".to_string(),
            ));
        }
        participant.adults_count = adults;
    }
    if let Some(kids) = body.kids_count {
        if kids < 0 {
            return Err(WaymarkError::Validation(
                "kidsCount cannot be negative".to_string(),
            ));
        }
        participant.kids_count = kids;
    }

    let participants: MongoCollection<ParticipantDoc> =
        state.mongo.collection(PARTICIPANT_COLLECTION).await?;
    let id = participants.insert_one(participant).await?;
    let created = participants
        .find_one(doc! { "_id": id })
        .await?
        .ok_or_else(|| WaymarkError::Internal("participant vanished after insert".to_string()))?;

    info!(plan_id = %plan_id, participant_id = %id, "participant created");
    Ok(json_response(
        StatusCode::CREATED,
        &ParticipantView::from_doc(&created, true),
    ))
}

async fn update_participant(
    req: Request<Incoming>,
    state: Arc<AppState>,
    plan_raw: &str,
    pid_raw: &str,
) -> Result<Response<Full<Bytes>>> {
    let principal = state.resolver.resolve_optional(get_auth_header(&req)).await;
    let (plan, membership) = load_plan_for_read(&state, &principal, plan_raw).await?;
    if !can_write_plan(&principal, &plan, membership.is_some()) {
        return Err(plan_not_found_error());
    }
    let plan_id = plan
        ._id
        .ok_or_else(|| WaymarkError::Internal("plan row missing id".to_string()))?;
    let participant_id = parse_object_id(pid_raw, "Participant")?;

    let participants: MongoCollection<ParticipantDoc> =
        state.mongo.collection(PARTICIPANT_COLLECTION).await?;
    let target = participants
        .find_one(doc! { "_id": participant_id, "plan_id": plan_id })
        .await?
        .ok_or_else(|| WaymarkError::NotFound("Participant not found".to_string()))?;

    let body: UpdateParticipantRequest = parse_json_body(req, state.args.max_body_bytes).await?;
    let update = participant_update_doc(&target, &body)?;

    let updated = participants
        .find_one_and_update(doc! { "_id": participant_id, "plan_id": plan_id }, update)
        .await?
        .ok_or_else(|| WaymarkError::NotFound("Participant not found".to_string()))?;

    Ok(json_response(
        StatusCode::OK,
        &ParticipantView::from_doc(&updated, true),
    ))
}

/// Remove a participant row. Their item assignments revert to
/// unassigned; the items themselves stay on the plan.
async fn delete_participant(
    req: Request<Incoming>,
    state: Arc<AppState>,
    plan_raw: &str,
    pid_raw: &str,
) -> Result<Response<Full<Bytes>>> {
    let principal = state.resolver.resolve_optional(get_auth_header(&req)).await;
    let (plan, membership) = load_plan_for_read(&state, &principal, plan_raw).await?;
    if !can_write_plan(&principal, &plan, membership.is_some()) {
        return Err(plan_not_found_error());
    }
    let plan_id = plan
        ._id
        .ok_or_else(|| WaymarkError::Internal("plan row missing id".to_string()))?;
    let participant_id = parse_object_id(pid_raw, "Participant")?;

    let participants: MongoCollection<ParticipantDoc> =
        state.mongo.collection(PARTICIPANT_COLLECTION).await?;
    let target = participants
        .find_one(doc! { "_id": participant_id, "plan_id": plan_id })
        .await?
        .ok_or_else(|| WaymarkError::NotFound("Participant not found".to_string()))?;

    if target.role == ParticipantRole::Owner {
        return Err(WaymarkError::Validation(OWNER_NOT_REMOVABLE.to_string()));
    }

    participants
        .delete_one(doc! { "_id": participant_id, "plan_id": plan_id })
        .await?;

    let items: MongoCollection<ItemDoc> = state.mongo.collection(ITEM_COLLECTION).await?;
    let released = items
        .update_many(
            doc! { "plan_id": plan_id, "assigned_participant_id": participant_id },
            doc! {
                "$unset": { "assigned_participant_id": "" },
                "$set": { "metadata.updated_at": DateTime::now() },
            },
        )
        .await?;

    info!(
        plan_id = %plan_id,
        participant_id = %participant_id,
        items_released = released.modified_count,
        "participant removed"
    );

    let response = ParticipantDeletedResponse {
        deleted: true,
        id: participant_id.to_hex(),
    };
    Ok(json_response(StatusCode::OK, &response))
}

/// Issue a fresh invite token for an unclaimed row, invalidating the
/// old link.
async fn regenerate_token(
    req: Request<Incoming>,
    state: Arc<AppState>,
    plan_raw: &str,
    pid_raw: &str,
) -> Result<Response<Full<Bytes>>> {
    let principal = state.resolver.resolve_optional(get_auth_header(&req)).await;
    let (plan, membership) = load_plan_for_read(&state, &principal, plan_raw).await?;
    if !can_write_plan(&principal, &plan, membership.is_some()) {
        return Err(plan_not_found_error());
    }
    let plan_id = plan
        ._id
        .ok_or_else(|| WaymarkError::Internal("plan row missing id".to_string()))?;
    let participant_id = parse_object_id(pid_raw, "Participant")?;

    let updated = state.invites.regenerate(plan_id, participant_id).await?;

    Ok(json_response(
        StatusCode::OK,
        &ParticipantView::from_doc(&updated, true),
    ))
}

/// Link the caller's account to the invite's participant row.
async fn claim_invite(
    req: Request<Incoming>,
    state: Arc<AppState>,
    plan_raw: &str,
) -> Result<Response<Full<Bytes>>> {
    let principal = state
        .resolver
        .resolve_required(get_auth_header(&req))
        .await?;
    let identity = principal
        .identity()
        .cloned()
        .ok_or_else(|| WaymarkError::Unauthorized("Missing bearer token".to_string()))?;

    // An unparsable plan id looks like any other dead invite link.
    let plan_id = ObjectId::parse_str(plan_raw)
        .map_err(|_| WaymarkError::NotFound("Invite not found".to_string()))?;

    let body: ClaimRequest = parse_json_body(req, state.args.max_body_bytes).await?;
    let token = body.invite_token.trim();
    if token.is_empty() {
        return Err(WaymarkError::Validation(
            "inviteToken is required".to_string(),
        ));
    }

    let outcome = state.invites.claim(&identity, plan_id, token).await?;
    let (already_claimed, participant) = match outcome {
        ClaimOutcome::Claimed(p) => (false, p),
        ClaimOutcome::AlreadyClaimed(p) => (true, p),
    };

    let response = ClaimResponse {
        claimed: true,
        already_claimed,
        participant: ParticipantView::from_doc(&participant, true),
    };
    Ok(json_response(StatusCode::OK, &response))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(role: ParticipantRole) -> ParticipantDoc {
        let mut p = ParticipantDoc::new(ObjectId::new(), role, None, "a".repeat(64));
        p._id = Some(ObjectId::new());
        p
    }

    #[test]
    fn test_owner_role_is_immutable() {
        let owner = row(ParticipantRole::Owner);
        let body = UpdateParticipantRequest {
            role: Some(ParticipantRole::Viewer),
            ..Default::default()
        };
        let err = participant_update_doc(&owner, &body).unwrap_err();
        assert_eq!(err.public_message(), OWNER_ROLE_IMMUTABLE);

        // Redundantly restating "owner" on the owner row is a no-op,
        // not an error.
        let body = UpdateParticipantRequest {
            role: Some(ParticipantRole::Owner),
            rsvp_status: Some(RsvpStatus::Confirmed),
            ..Default::default()
        };
        let update = participant_update_doc(&owner, &body).unwrap();
        assert!(!update.get_document("$set").unwrap().contains_key("role"));
    }

    #[test]
    fn test_no_second_owner_via_patch() {
        let member = row(ParticipantRole::Participant);
        let body = UpdateParticipantRequest {
            role: Some(ParticipantRole::Owner),
            ..Default::default()
        };
        let err = participant_update_doc(&member, &body).unwrap_err();
        assert_eq!(err.public_message(), ONE_OWNER_PER_PLAN);
    }

    #[test]
    fn test_update_doc_sets_and_clears_fields() {
        let member = row(ParticipantRole::Participant);
        let body = UpdateParticipantRequest {
            name: Some("Mara".to_string()),
            notes: Some("".to_string()),
            rsvp_status: Some(RsvpStatus::NotSure),
            adults_count: Some(2),
            ..Default::default()
        };

        let update = participant_update_doc(&member, &body).unwrap();
        let set = update.get_document("$set").unwrap();
        assert_eq!(set.get_str("name").unwrap(), "Mara");
        assert_eq!(set.get_str("rsvp_status").unwrap(), "not_sure");
        assert_eq!(set.get_i32("adults_count").unwrap(), 2);
        assert!(set.contains_key("metadata.updated_at"));
        assert!(update.get_document("$unset").unwrap().contains_key("notes"));
    }

    #[test]
    fn test_update_doc_rejects_empty_and_bad_counts() {
        let member = row(ParticipantRole::Participant);

        let err = participant_update_doc(&member, &UpdateParticipantRequest::default())
            .unwrap_err();
        assert_eq!(err.public_message(), "No fields to update");

        let body = UpdateParticipantRequest {
            adults_count: Some(0),
            ..Default::default()
        };
        assert!(participant_update_doc(&member, &body).is_err());

        let body = UpdateParticipantRequest {
            kids_count: Some(-1),
            ..Default::default()
        };
        assert!(participant_update_doc(&member, &body).is_err());
    }

    #[test]
    fn test_update_doc_never_touches_link_fields() {
        let member = row(ParticipantRole::Participant);
        let body = UpdateParticipantRequest {
            name: Some("Mara".to_string()),
            ..Default::default()
        };
        let update = participant_update_doc(&member, &body).unwrap();
        let set = update.get_document("$set").unwrap();
        assert!(!set.contains_key("user_id"));
        assert!(!set.contains_key("invite_token"));
        assert!(!set.contains_key("invite_status"));
    }

    #[test]
    fn test_view_redacts_token_for_non_writers() {
        let member = row(ParticipantRole::Participant);

        let visible = ParticipantView::from_doc(&member, true);
        assert!(visible.invite_token.is_some());

        let redacted = ParticipantView::from_doc(&member, false);
        assert!(redacted.invite_token.is_none());

        let json = serde_json::to_value(&redacted).unwrap();
        assert!(json.get("inviteToken").is_none());
        assert_eq!(json["rsvpStatus"], "pending");
    }
}
