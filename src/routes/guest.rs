//! Invite-scoped guest routes
//!
//! Everything under `/api/plans/{id}/guest` authenticates with the
//! invite token alone (`X-Invite-Token` header or `?token=`), no
//! account involved. The token resolves to exactly one participant
//! row; a missing token is a 401, a dead one a 404.
//!
//! Guests see the plan summary and gear list, edit their own row, and
//! batch-edit items under the ownership rule enforced by the bulk
//! service.

use std::sync::Arc;

use bson::{doc, oid::ObjectId};
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::items::{BulkCreatedResponse, BulkUpdatedResponse, ItemView};
use super::participants::{participant_update_doc, ParticipantView, UpdateParticipantRequest};
use super::{
    cors_preflight, error_to_response, get_invite_token, json_response, parse_json_body,
    plan_not_found_error,
};
use crate::auth::principal::{GuestContext, Principal};
use crate::db::schemas::{
    ItemDoc, ParticipantDoc, PlanDoc, Visibility, ITEM_COLLECTION, PARTICIPANT_COLLECTION,
    PLAN_COLLECTION,
};
use crate::db::MongoCollection;
use crate::server::AppState;
use crate::services::bulk::{CreateItemSpec, UpdateItemSpec};
use crate::types::{Result, WaymarkError};

// =============================================================================
// Views
// =============================================================================

/// What a guest learns about the plan: the trip itself, not its
/// administrative trail.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanSummary {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub starts_on: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ends_on: Option<String>,
    pub visibility: Visibility,
}

impl PlanSummary {
    fn from_doc(plan: &PlanDoc) -> Self {
        PlanSummary {
            id: plan._id.map(|id| id.to_hex()).unwrap_or_default(),
            title: plan.title.clone(),
            description: plan.description.clone(),
            location: plan.location.clone(),
            starts_on: plan.starts_on.clone(),
            ends_on: plan.ends_on.clone(),
            visibility: plan.visibility,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GuestViewResponse {
    plan: PlanSummary,
    participant: ParticipantView,
    items: Vec<ItemView>,
}

/// Guest edits to their own row. Deliberately narrower than the roster
/// patch: no role, no invite fields.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestParticipantUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub contact_email: Option<String>,
    #[serde(default)]
    pub contact_phone: Option<String>,
    #[serde(default)]
    pub rsvp_status: Option<crate::db::schemas::RsvpStatus>,
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

impl GuestParticipantUpdate {
    fn into_roster_update(self) -> UpdateParticipantRequest {
        UpdateParticipantRequest {
            name: self.name,
            last_name: self.last_name,
            contact_email: self.contact_email,
            contact_phone: self.contact_phone,
            role: None,
            rsvp_status: self.rsvp_status,
            food_preferences: self.food_preferences,
            allergies: self.allergies,
            notes: self.notes,
            adults_count: self.adults_count,
            kids_count: self.kids_count,
        }
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Routes under /api/plans/{id}/guest.
pub async fn handle_guest_request(
    req: Request<Incoming>,
    state: Arc<AppState>,
    plan_raw: &str,
    tail: &str,
) -> Response<Full<Bytes>> {
    let method = req.method().clone();
    if method == Method::OPTIONS {
        return cors_preflight();
    }

    let result = match (method, tail) {
        (Method::GET, "") => guest_view(req, state, plan_raw).await,
        (Method::PATCH, "participant") => guest_update_participant(req, state, plan_raw).await,
        (Method::POST, "items/bulk") => guest_bulk_create(req, state, plan_raw).await,
        (Method::PATCH, "items/bulk") => guest_bulk_update(req, state, plan_raw).await,
        _ => Err(WaymarkError::NotFound("Route not found".to_string())),
    };
    result.unwrap_or_else(|e| error_to_response(&e))
}

/// Wrap a resolved participant row as the request's principal, so the
/// rest of the handler sees the same principal model as every other
/// route.
fn guest_principal(plan_id: ObjectId, participant: &ParticipantDoc) -> Result<Principal> {
    let participant_id = participant
        ._id
        .ok_or_else(|| WaymarkError::Internal("participant row missing id".to_string()))?;
    Ok(Principal::guest(plan_id, participant_id))
}

/// The guest scope baked into the principal at resolution time.
fn guest_scope(principal: &Principal) -> Result<GuestContext> {
    principal
        .guest_context()
        .copied()
        .ok_or_else(|| WaymarkError::Internal("guest route without guest principal".to_string()))
}

/// Resolve the invite credential before the request body is consumed.
/// No token at all is a 401; a token that does not resolve is a 404.
async fn resolve_guest(
    state: &AppState,
    plan_raw: &str,
    token: Option<String>,
) -> Result<(Principal, ParticipantDoc)> {
    let token = token.ok_or_else(|| {
        WaymarkError::Unauthorized("Missing invite token".to_string())
    })?;
    let plan_id = ObjectId::parse_str(plan_raw).map_err(|_| plan_not_found_error())?;

    let participant = state.invites.resolve_guest(plan_id, &token).await?;
    let principal = guest_principal(plan_id, &participant)?;
    Ok((principal, participant))
}

async fn guest_view(
    req: Request<Incoming>,
    state: Arc<AppState>,
    plan_raw: &str,
) -> Result<Response<Full<Bytes>>> {
    let token = get_invite_token(&req);
    let (principal, participant) = resolve_guest(&state, plan_raw, token).await?;
    let scope = guest_scope(&principal)?;

    let plans: MongoCollection<PlanDoc> = state.mongo.collection(PLAN_COLLECTION).await?;
    let plan = plans
        .find_one(doc! { "_id": scope.plan_id })
        .await?
        .ok_or_else(plan_not_found_error)?;

    let items: MongoCollection<ItemDoc> = state.mongo.collection(ITEM_COLLECTION).await?;
    let gear = items.find_many(doc! { "plan_id": scope.plan_id }).await?;

    let response = GuestViewResponse {
        plan: PlanSummary::from_doc(&plan),
        // The guest already holds this token; echoing it back is safe.
        participant: ParticipantView::from_doc(&participant, true),
        items: gear.iter().map(ItemView::from_doc).collect(),
    };
    Ok(json_response(StatusCode::OK, &response))
}

async fn guest_update_participant(
    req: Request<Incoming>,
    state: Arc<AppState>,
    plan_raw: &str,
) -> Result<Response<Full<Bytes>>> {
    let token = get_invite_token(&req);
    let (principal, participant) = resolve_guest(&state, plan_raw, token).await?;
    let scope = guest_scope(&principal)?;

    let body: GuestParticipantUpdate = parse_json_body(req, state.args.max_body_bytes).await?;
    let update = participant_update_doc(&participant, &body.into_roster_update())?;

    let participants: MongoCollection<ParticipantDoc> =
        state.mongo.collection(PARTICIPANT_COLLECTION).await?;
    let updated = participants
        .find_one_and_update(
            doc! { "_id": scope.participant_id, "plan_id": scope.plan_id },
            update,
        )
        .await?
        .ok_or_else(|| WaymarkError::NotFound("Participant not found".to_string()))?;

    info!(
        principal = principal.kind(),
        plan_id = %scope.plan_id,
        participant_id = %scope.participant_id,
        "guest updated their row"
    );
    Ok(json_response(
        StatusCode::OK,
        &ParticipantView::from_doc(&updated, true),
    ))
}

async fn guest_bulk_create(
    req: Request<Incoming>,
    state: Arc<AppState>,
    plan_raw: &str,
) -> Result<Response<Full<Bytes>>> {
    let token = get_invite_token(&req);
    let (principal, _participant) = resolve_guest(&state, plan_raw, token).await?;
    let scope = guest_scope(&principal)?;

    let specs: Vec<CreateItemSpec> = parse_json_body(req, state.args.max_body_bytes).await?;

    let outcome = state
        .bulk
        .bulk_create(scope.plan_id, specs, Some(scope.participant_id))
        .await?;
    info!(
        principal = principal.kind(),
        plan_id = %scope.plan_id,
        participant_id = %scope.participant_id,
        created = outcome.created.len(),
        errors = outcome.errors.len(),
        "guest bulk item create"
    );

    let status = outcome.status();
    let response = BulkCreatedResponse {
        created: outcome.created.iter().map(ItemView::from_doc).collect(),
        errors: outcome.errors,
    };
    Ok(json_response(status, &response))
}

async fn guest_bulk_update(
    req: Request<Incoming>,
    state: Arc<AppState>,
    plan_raw: &str,
) -> Result<Response<Full<Bytes>>> {
    let token = get_invite_token(&req);
    let (principal, _participant) = resolve_guest(&state, plan_raw, token).await?;
    let scope = guest_scope(&principal)?;

    let specs: Vec<UpdateItemSpec> = parse_json_body(req, state.args.max_body_bytes).await?;

    let outcome = state
        .bulk
        .bulk_update(scope.plan_id, specs, Some(scope.participant_id))
        .await?;

    let status = outcome.status();
    let response = BulkUpdatedResponse {
        updated: outcome.updated.iter().map(ItemView::from_doc).collect(),
        errors: outcome.errors,
    };
    Ok(json_response(status, &response))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolved_participant_becomes_guest_principal() {
        let plan_id = ObjectId::new();
        let participant_id = ObjectId::new();
        let mut participant = ParticipantDoc::new(
            plan_id,
            crate::db::schemas::ParticipantRole::Participant,
            Some("Noor".to_string()),
            crate::auth::generate_invite_token(),
        );
        participant._id = Some(participant_id);

        let principal = guest_principal(plan_id, &participant).unwrap();
        assert_eq!(principal.kind(), "guest");
        assert!(principal.user_id().is_none());

        let scope = guest_scope(&principal).unwrap();
        assert_eq!(scope.plan_id, plan_id);
        assert_eq!(scope.participant_id, participant_id);
    }

    #[test]
    fn test_guest_principal_requires_stored_row() {
        let plan_id = ObjectId::new();
        let participant = ParticipantDoc::new(
            plan_id,
            crate::db::schemas::ParticipantRole::Participant,
            None,
            crate::auth::generate_invite_token(),
        );
        // No _id: the row never came out of storage.
        assert!(guest_principal(plan_id, &participant).is_err());
    }

    #[test]
    fn test_guest_update_never_carries_role() {
        let body = GuestParticipantUpdate {
            name: Some("Mara".to_string()),
            rsvp_status: Some(crate::db::schemas::RsvpStatus::Confirmed),
            ..Default::default()
        };
        let update = body.into_roster_update();
        assert!(update.role.is_none());
        assert_eq!(update.name.as_deref(), Some("Mara"));
    }

    #[test]
    fn test_plan_summary_omits_administrative_fields() {
        let mut plan = PlanDoc::new(
            "Kayak weekend".to_string(),
            Visibility::InviteOnly,
            Some("u1".to_string()),
        );
        plan._id = Some(ObjectId::new());

        let json = serde_json::to_value(PlanSummary::from_doc(&plan)).unwrap();
        assert_eq!(json["title"], "Kayak weekend");
        assert!(json.get("createdByUserId").is_none());
        assert!(json.get("ownerParticipantId").is_none());
    }
}
