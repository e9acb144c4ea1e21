//! Plan routes
//!
//! Plan CRUD under `/api/plans`. Every read goes through the visibility
//! policy, and every denial renders the shared not-found response so a
//! plan the caller may not see looks exactly like a plan that does not
//! exist. Write access is the creator (by token subject), an admin, or
//! anyone who can read an anonymously created plan.

use std::sync::Arc;

use bson::{doc, oid::ObjectId, DateTime, Document};
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{
    cors_preflight, error_to_response, get_auth_header, json_response, parse_json_body,
    parse_plan_id, plan_not_found_error, rfc3339_opt,
};
use crate::auth::invite_token::generate_invite_token;
use crate::auth::principal::Principal;
use crate::db::schemas::{
    InviteStatus, ItemDoc, ParticipantDoc, ParticipantRole, PlanDoc, Visibility,
    ITEM_COLLECTION, PARTICIPANT_COLLECTION, PLAN_COLLECTION,
};
use crate::db::MongoCollection;
use crate::policy::{can_read, can_set_visibility, default_visibility, read_decision, ReadDecision};
use crate::routes::items::ItemView;
use crate::routes::participants::ParticipantView;
use crate::server::AppState;
use crate::types::{Result, WaymarkError};

// =============================================================================
// Views
// =============================================================================

/// Plan as rendered on the wire.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanView {
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
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by_user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_participant_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl PlanView {
    pub fn from_doc(plan: &PlanDoc) -> Self {
        PlanView {
            id: plan._id.map(|id| id.to_hex()).unwrap_or_default(),
            title: plan.title.clone(),
            description: plan.description.clone(),
            location: plan.location.clone(),
            starts_on: plan.starts_on.clone(),
            ends_on: plan.ends_on.clone(),
            visibility: plan.visibility,
            created_by_user_id: plan.created_by_user_id.clone(),
            owner_participant_id: plan.owner_participant_id.map(|id| id.to_hex()),
            created_at: rfc3339_opt(plan.metadata.created_at),
            updated_at: rfc3339_opt(plan.metadata.updated_at),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PlanDetailResponse {
    plan: PlanView,
    participants: Vec<ParticipantView>,
    items: Vec<ItemView>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PlanCreatedResponse {
    plan: PlanView,
    owner_participant: ParticipantView,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PlanDeletedResponse {
    deleted: bool,
    id: String,
}

// =============================================================================
// Request bodies
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePlanRequest {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub starts_on: Option<String>,
    #[serde(default)]
    pub ends_on: Option<String>,
    #[serde(default)]
    pub visibility: Option<Visibility>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePlanRequest {
    #[serde(default)]
    pub title: Option<String>,
    /// Empty string clears the field
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub starts_on: Option<String>,
    #[serde(default)]
    pub ends_on: Option<String>,
    #[serde(default)]
    pub visibility: Option<Visibility>,
}

// =============================================================================
// Access helpers
// =============================================================================

/// Who may change a plan: admins, the recorded creator, or for plans
/// created without a signed-in subject, anyone who can read them.
pub fn can_write_plan(principal: &Principal, plan: &PlanDoc, is_linked_member: bool) -> bool {
    if principal.is_admin() {
        return true;
    }
    match &plan.created_by_user_id {
        Some(creator) => principal.user_id() == Some(creator.as_str()),
        None => can_read(principal, plan, is_linked_member),
    }
}

/// The caller's claimed participant row in the plan, when one exists.
pub(crate) async fn linked_participant(
    state: &AppState,
    plan_id: ObjectId,
    principal: &Principal,
) -> Result<Option<ParticipantDoc>> {
    let Some(user_id) = principal.user_id() else {
        return Ok(None);
    };
    let participants: MongoCollection<ParticipantDoc> =
        state.mongo.collection(PARTICIPANT_COLLECTION).await?;
    participants
        .find_one(doc! { "plan_id": plan_id, "user_id": user_id })
        .await
}

/// Load a plan for a read, enforcing visibility. Malformed ids, missing
/// plans and denied reads all surface the same error.
pub(crate) async fn load_plan_for_read(
    state: &AppState,
    principal: &Principal,
    plan_raw: &str,
) -> Result<(PlanDoc, Option<ParticipantDoc>)> {
    let plan_id = parse_plan_id(plan_raw)?;

    let plans: MongoCollection<PlanDoc> = state.mongo.collection(PLAN_COLLECTION).await?;
    let plan = plans
        .find_one(doc! { "_id": plan_id })
        .await?
        .ok_or_else(plan_not_found_error)?;

    let membership = linked_participant(state, plan_id, principal).await?;
    let allowed = match read_decision(principal, &plan) {
        ReadDecision::Allow => true,
        ReadDecision::RequiresMembership => membership.is_some(),
        ReadDecision::Deny => false,
    };
    if !allowed {
        return Err(plan_not_found_error());
    }

    Ok((plan, membership))
}

fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Build the `$set`/`$unset` document for a plan patch. Pure so the
/// field rules are testable without storage.
fn plan_update_doc(principal: &Principal, body: &UpdatePlanRequest) -> Result<Document> {
    let mut set = Document::new();
    let mut unset = Document::new();

    if let Some(title) = &body.title {
        let title = title.trim();
        if title.is_empty() {
            return Err(WaymarkError::Validation("Title is required".to_string()));
        }
        set.insert("title", title);
    }

    for (field, value) in [
        ("description", &body.description),
        ("location", &body.location),
        ("starts_on", &body.starts_on),
        ("ends_on", &body.ends_on),
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

    if let Some(visibility) = body.visibility {
        if !can_set_visibility(principal, visibility) {
            return Err(WaymarkError::Validation(format!(
                "Visibility '{}' is not allowed for this caller",
                visibility
            )));
        }
        set.insert("visibility", visibility.as_str());
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

/// POST /api/plans
pub async fn handle_plans_request(
    req: Request<Incoming>,
    state: Arc<AppState>,
) -> Response<Full<Bytes>> {
    let method = req.method().clone();
    let result = match method {
        Method::POST => create_plan(req, state).await,
        Method::OPTIONS => return cors_preflight(),
        _ => Err(WaymarkError::NotFound("Route not found".to_string())),
    };
    result.unwrap_or_else(|e| error_to_response(&e))
}

/// GET/PATCH/DELETE /api/plans/{id}
pub async fn handle_plan_request(
    req: Request<Incoming>,
    state: Arc<AppState>,
    plan_raw: &str,
) -> Response<Full<Bytes>> {
    let method = req.method().clone();
    let result = match method {
        Method::GET => get_plan(req, state, plan_raw).await,
        Method::PATCH => update_plan(req, state, plan_raw).await,
        Method::DELETE => delete_plan(req, state, plan_raw).await,
        Method::OPTIONS => return cors_preflight(),
        _ => Err(WaymarkError::NotFound("Route not found".to_string())),
    };
    result.unwrap_or_else(|e| error_to_response(&e))
}

/// Create a plan and its owner participant row.
///
/// Anyone can create; visibility defaults by principal and is policed
/// by `can_set_visibility`. The owner row starts unclaimed even for
/// signed-in creators because `user_id` is only ever set by a claim.
async fn create_plan(req: Request<Incoming>, state: Arc<AppState>) -> Result<Response<Full<Bytes>>> {
    let principal = state.resolver.resolve_optional(get_auth_header(&req)).await;
    let body: CreatePlanRequest = parse_json_body(req, state.args.max_body_bytes).await?;

    let title = body.title.trim();
    if title.is_empty() {
        return Err(WaymarkError::Validation("Title is required".to_string()));
    }

    let visibility = body
        .visibility
        .unwrap_or_else(|| default_visibility(&principal));
    if !can_set_visibility(&principal, visibility) {
        return Err(WaymarkError::Validation(format!(
            "Visibility '{}' is not allowed for this caller",
            visibility
        )));
    }

    let mut plan = PlanDoc::new(
        title.to_string(),
        visibility,
        principal.user_id().map(String::from),
    );
    plan.description = clean(body.description);
    plan.location = clean(body.location);
    plan.starts_on = clean(body.starts_on);
    plan.ends_on = clean(body.ends_on);

    let plans: MongoCollection<PlanDoc> = state.mongo.collection(PLAN_COLLECTION).await?;
    let plan_id = plans.insert_one(plan).await?;

    // The creator holds the owner seat through a token like everyone
    // else; their account links to it via claim.
    let owner_name = principal
        .identity()
        .and_then(|i| i.claims.display_name())
        .map(String::from);
    let mut owner = ParticipantDoc::new(
        plan_id,
        ParticipantRole::Owner,
        owner_name,
        generate_invite_token(),
    );
    // The owner seat is self-held, not an outbound invite.
    owner.invite_status = InviteStatus::Pending;
    if let Some(identity) = principal.identity() {
        owner.contact_email = identity.claims.email.clone();
    }

    let participants: MongoCollection<ParticipantDoc> =
        state.mongo.collection(PARTICIPANT_COLLECTION).await?;
    let owner_id = participants.insert_one(owner).await?;

    let plan = plans
        .find_one_and_update(
            doc! { "_id": plan_id },
            doc! { "$set": {
                "owner_participant_id": owner_id,
                "metadata.updated_at": DateTime::now(),
            }},
        )
        .await?
        .ok_or_else(|| WaymarkError::Internal("plan vanished after insert".to_string()))?;
    let owner = participants
        .find_one(doc! { "_id": owner_id })
        .await?
        .ok_or_else(|| WaymarkError::Internal("owner row vanished after insert".to_string()))?;

    info!(
        plan_id = %plan_id,
        visibility = %visibility,
        principal = principal.kind(),
        "plan created"
    );

    let response = PlanCreatedResponse {
        plan: PlanView::from_doc(&plan),
        owner_participant: ParticipantView::from_doc(&owner, true),
    };
    Ok(json_response(StatusCode::CREATED, &response))
}

/// Read a plan with its roster and gear list embedded.
async fn get_plan(
    req: Request<Incoming>,
    state: Arc<AppState>,
    plan_raw: &str,
) -> Result<Response<Full<Bytes>>> {
    let principal = state.resolver.resolve_optional(get_auth_header(&req)).await;
    let (plan, membership) = load_plan_for_read(&state, &principal, plan_raw).await?;
    let plan_id = plan
        ._id
        .ok_or_else(|| WaymarkError::Internal("plan row missing id".to_string()))?;

    // Keep the caller's linked rows in step with their token identity.
    // Best-effort: a sync failure never fails the read.
    if membership.is_some() {
        if let Some(identity) = principal.identity() {
            if let Err(e) = state.identity_sync.sync_all(identity).await {
                warn!(error = %e, plan_id = %plan_id, "implicit identity sync failed");
            }
        }
    }

    let include_tokens = can_write_plan(&principal, &plan, membership.is_some());

    let participants: MongoCollection<ParticipantDoc> =
        state.mongo.collection(PARTICIPANT_COLLECTION).await?;
    let roster = participants.find_many(doc! { "plan_id": plan_id }).await?;

    let items: MongoCollection<ItemDoc> = state.mongo.collection(ITEM_COLLECTION).await?;
    let gear = items.find_many(doc! { "plan_id": plan_id }).await?;

    let response = PlanDetailResponse {
        plan: PlanView::from_doc(&plan),
        participants: roster
            .iter()
            .map(|p| ParticipantView::from_doc(p, include_tokens))
            .collect(),
        items: gear.iter().map(ItemView::from_doc).collect(),
    };
    Ok(json_response(StatusCode::OK, &response))
}

/// Patch plan fields; a visibility change re-runs the policy check.
async fn update_plan(
    req: Request<Incoming>,
    state: Arc<AppState>,
    plan_raw: &str,
) -> Result<Response<Full<Bytes>>> {
    let principal = state.resolver.resolve_optional(get_auth_header(&req)).await;
    let (plan, membership) = load_plan_for_read(&state, &principal, plan_raw).await?;
    if !can_write_plan(&principal, &plan, membership.is_some()) {
        // Writers-only, but the refusal must not confirm existence.
        return Err(plan_not_found_error());
    }
    let plan_id = plan
        ._id
        .ok_or_else(|| WaymarkError::Internal("plan row missing id".to_string()))?;

    let body: UpdatePlanRequest = parse_json_body(req, state.args.max_body_bytes).await?;
    let update = plan_update_doc(&principal, &body)?;

    let plans: MongoCollection<PlanDoc> = state.mongo.collection(PLAN_COLLECTION).await?;
    let updated = plans
        .find_one_and_update(doc! { "_id": plan_id }, update)
        .await?
        .ok_or_else(plan_not_found_error)?;

    info!(plan_id = %plan_id, "plan updated");
    Ok(json_response(StatusCode::OK, &PlanView::from_doc(&updated)))
}

/// Soft-delete a plan and drop its participants and items with it.
async fn delete_plan(
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

    let plans: MongoCollection<PlanDoc> = state.mongo.collection(PLAN_COLLECTION).await?;
    plans.soft_delete(doc! { "_id": plan_id }).await?;

    // Participant and item rows are owned by the plan. They go for
    // real, so their unique indexes never block a future re-invite.
    let participants: MongoCollection<ParticipantDoc> =
        state.mongo.collection(PARTICIPANT_COLLECTION).await?;
    let removed_participants = participants.delete_many(doc! { "plan_id": plan_id }).await?;

    let items: MongoCollection<ItemDoc> = state.mongo.collection(ITEM_COLLECTION).await?;
    let removed_items = items.delete_many(doc! { "plan_id": plan_id }).await?;

    info!(
        plan_id = %plan_id,
        participants = removed_participants,
        items = removed_items,
        "plan deleted"
    );

    let response = PlanDeletedResponse {
        deleted: true,
        id: plan_id.to_hex(),
    };
    Ok(json_response(StatusCode::OK, &response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::claims::IdentityClaims;

    fn user(sub: &str) -> Principal {
        Principal::from_claims(IdentityClaims {
            sub: sub.to_string(),
            ..Default::default()
        })
    }

    fn admin(sub: &str) -> Principal {
        let mut claims = IdentityClaims {
            sub: sub.to_string(),
            ..Default::default()
        };
        claims.role = Some("admin".to_string());
        Principal::from_claims(claims)
    }

    fn plan_by(creator: Option<&str>, visibility: Visibility) -> PlanDoc {
        let mut plan = PlanDoc::new(
            "Weekend hike".to_string(),
            visibility,
            creator.map(String::from),
        );
        plan._id = Some(ObjectId::new());
        plan
    }

    #[test]
    fn test_creator_and_admin_can_write() {
        let plan = plan_by(Some("u1"), Visibility::InviteOnly);

        assert!(can_write_plan(&user("u1"), &plan, false));
        assert!(!can_write_plan(&user("u2"), &plan, false));
        assert!(can_write_plan(&admin("root"), &plan, false));
        assert!(!can_write_plan(&Principal::Anonymous, &plan, false));
    }

    #[test]
    fn test_membership_alone_does_not_grant_write() {
        let plan = plan_by(Some("u1"), Visibility::InviteOnly);
        // u2 is a linked member, still not a writer.
        assert!(!can_write_plan(&user("u2"), &plan, true));
    }

    #[test]
    fn test_anonymously_created_plan_writable_by_readers() {
        let plan = plan_by(None, Visibility::Public);

        assert!(can_write_plan(&Principal::Anonymous, &plan, false));
        assert!(can_write_plan(&user("u2"), &plan, false));

        // If such a plan was later made invite-only, only members and
        // admins keep write access.
        let hidden = plan_by(None, Visibility::InviteOnly);
        assert!(!can_write_plan(&Principal::Anonymous, &hidden, false));
        assert!(!can_write_plan(&user("u2"), &hidden, false));
        assert!(can_write_plan(&user("u2"), &hidden, true));
    }

    #[test]
    fn test_plan_update_doc_field_rules() {
        let principal = user("u1");

        let body = UpdatePlanRequest {
            title: Some("  ".to_string()),
            ..Default::default()
        };
        assert!(plan_update_doc(&principal, &body).is_err());

        let body = UpdatePlanRequest::default();
        let err = plan_update_doc(&principal, &body).unwrap_err();
        assert_eq!(err.public_message(), "No fields to update");

        let body = UpdatePlanRequest {
            title: Some("New title".to_string()),
            description: Some("".to_string()),
            ..Default::default()
        };
        let update = plan_update_doc(&principal, &body).unwrap();
        let set = update.get_document("$set").unwrap();
        assert_eq!(set.get_str("title").unwrap(), "New title");
        assert!(set.contains_key("metadata.updated_at"));
        assert!(update
            .get_document("$unset")
            .unwrap()
            .contains_key("description"));
    }

    #[test]
    fn test_plan_update_doc_checks_visibility_policy() {
        // A signed-in non-admin cannot make a plan public.
        let body = UpdatePlanRequest {
            visibility: Some(Visibility::Public),
            ..Default::default()
        };
        assert!(plan_update_doc(&user("u1"), &body).is_err());
        assert!(plan_update_doc(&admin("root"), &body).is_ok());

        let body = UpdatePlanRequest {
            visibility: Some(Visibility::Private),
            ..Default::default()
        };
        let update = plan_update_doc(&user("u1"), &body).unwrap();
        assert_eq!(
            update
                .get_document("$set")
                .unwrap()
                .get_str("visibility")
                .unwrap(),
            "private"
        );
    }

    #[test]
    fn test_plan_view_rendering() {
        let plan = plan_by(Some("u1"), Visibility::Private);
        let view = PlanView::from_doc(&plan);

        assert_eq!(view.id, plan._id.unwrap().to_hex());
        assert_eq!(view.title, "Weekend hike");
        assert_eq!(view.created_by_user_id.as_deref(), Some("u1"));
        assert!(view.created_at.contains('T'));

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["visibility"], "private");
        assert_eq!(json["createdByUserId"], "u1");
        assert!(json.get("ownerParticipantId").is_none());
    }
}
