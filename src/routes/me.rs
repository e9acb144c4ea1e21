//! Account-scoped routes
//!
//! Everything under `/api/me` requires a signed-in principal: explicit
//! identity sync, the caller's plan overview, and their saved
//! preference defaults (consumed at claim time).

use std::collections::HashSet;
use std::sync::Arc;

use bson::{doc, oid::ObjectId, DateTime, Document};
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::plans::PlanView;
use super::{
    cors_preflight, error_to_response, get_auth_header, json_response, parse_json_body,
};
use crate::auth::principal::UserIdentity;
use crate::db::schemas::{
    ParticipantDoc, PlanDoc, PreferenceDefaultsDoc, PARTICIPANT_COLLECTION, PLAN_COLLECTION,
    PREFERENCE_DEFAULTS_COLLECTION,
};
use crate::db::MongoCollection;
use crate::server::AppState;
use crate::types::{Result, WaymarkError};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SyncResponse {
    /// Participant rows rewritten to match the token identity
    updated: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MyPlansResponse {
    plans: Vec<PlanView>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PreferenceDefaultsView {
    user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    food_preferences: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    allergies: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferenceDefaultsRequest {
    /// Empty string clears the saved value
    #[serde(default)]
    pub food_preferences: Option<String>,
    #[serde(default)]
    pub allergies: Option<String>,
}

/// Routes under /api/me. `tail` is the remainder after the prefix.
pub async fn handle_me_request(
    req: Request<Incoming>,
    state: Arc<AppState>,
    tail: &str,
) -> Response<Full<Bytes>> {
    let method = req.method().clone();
    if method == Method::OPTIONS {
        return cors_preflight();
    }

    let result = match (method, tail) {
        (Method::POST, "sync") => sync_identity(req, state).await,
        (Method::GET, "plans") => my_plans(req, state).await,
        (Method::PUT, "preference-defaults") => put_preference_defaults(req, state).await,
        _ => Err(WaymarkError::NotFound("Route not found".to_string())),
    };
    result.unwrap_or_else(|e| error_to_response(&e))
}

async fn require_identity(
    req: &Request<Incoming>,
    state: &AppState,
) -> Result<UserIdentity> {
    let principal = state
        .resolver
        .resolve_required(get_auth_header(req))
        .await?;
    principal
        .identity()
        .cloned()
        .ok_or_else(|| WaymarkError::Unauthorized("Missing bearer token".to_string()))
}

/// POST /api/me/sync - push the token's identity onto every linked row.
async fn sync_identity(
    req: Request<Incoming>,
    state: Arc<AppState>,
) -> Result<Response<Full<Bytes>>> {
    let identity = require_identity(&req, &state).await?;

    let updated = state.identity_sync.sync_all(&identity).await?;
    info!(user_id = %identity.id, updated, "explicit identity sync");

    Ok(json_response(StatusCode::OK, &SyncResponse { updated }))
}

/// GET /api/me/plans - plans the caller created plus plans they joined.
async fn my_plans(req: Request<Incoming>, state: Arc<AppState>) -> Result<Response<Full<Bytes>>> {
    let identity = require_identity(&req, &state).await?;

    let plans: MongoCollection<PlanDoc> = state.mongo.collection(PLAN_COLLECTION).await?;
    let created = plans
        .find_many(doc! { "created_by_user_id": &identity.id })
        .await?;

    let participants: MongoCollection<ParticipantDoc> =
        state.mongo.collection(PARTICIPANT_COLLECTION).await?;
    let memberships = participants
        .find_many(doc! { "user_id": &identity.id })
        .await?;

    let mut seen: HashSet<ObjectId> = created.iter().filter_map(|p| p._id).collect();
    let joined_ids: Vec<ObjectId> = memberships
        .iter()
        .map(|m| m.plan_id)
        .filter(|id| !seen.contains(id))
        .collect();

    let mut all = created;
    if !joined_ids.is_empty() {
        let joined = plans
            .find_many(doc! { "_id": { "$in": joined_ids } })
            .await?;
        for plan in joined {
            if let Some(id) = plan._id {
                if seen.insert(id) {
                    all.push(plan);
                }
            }
        }
    }

    let response = MyPlansResponse {
        plans: all.iter().map(PlanView::from_doc).collect(),
    };
    Ok(json_response(StatusCode::OK, &response))
}

/// PUT /api/me/preference-defaults - upsert the caller's saved dietary
/// defaults. Claims read these to backfill fresh memberships.
async fn put_preference_defaults(
    req: Request<Incoming>,
    state: Arc<AppState>,
) -> Result<Response<Full<Bytes>>> {
    let identity = require_identity(&req, &state).await?;
    let body: PreferenceDefaultsRequest = parse_json_body(req, state.args.max_body_bytes).await?;

    let mut set = Document::new();
    let mut unset = Document::new();
    for (field, value) in [
        ("food_preferences", &body.food_preferences),
        ("allergies", &body.allergies),
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
    if set.is_empty() && unset.is_empty() {
        return Err(WaymarkError::Validation("No fields to update".to_string()));
    }

    set.insert("metadata.updated_at", DateTime::now());
    let mut update = doc! {
        "$set": set,
        "$setOnInsert": {
            "metadata.created_at": DateTime::now(),
            "metadata.is_deleted": false,
        },
    };
    if !unset.is_empty() {
        update.insert("$unset", unset);
    }

    let collection: MongoCollection<PreferenceDefaultsDoc> =
        state.mongo.collection(PREFERENCE_DEFAULTS_COLLECTION).await?;
    let stored = collection
        .upsert_one(doc! { "user_id": &identity.id }, update)
        .await?
        .ok_or_else(|| WaymarkError::Internal("upsert returned no document".to_string()))?;

    let response = PreferenceDefaultsView {
        user_id: stored.user_id,
        food_preferences: stored.food_preferences,
        allergies: stored.allergies,
    };
    Ok(json_response(StatusCode::OK, &response))
}
