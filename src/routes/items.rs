//! Item routes
//!
//! Gear-list plumbing under `/api/plans/{id}/items`. Single-item CRUD
//! is open to anyone who can read the plan; the `/items/bulk` endpoints
//! require a signed-in account and report partial success with 207.
//! All validation lives in the bulk service so single and batch writes
//! enforce identical rules.

use std::sync::Arc;

use bson::doc;
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use serde::Serialize;
use tracing::info;

use super::plans::load_plan_for_read;
use super::{
    cors_preflight, error_to_response, get_auth_header, json_response, parse_json_body, rfc3339_opt,
};
use crate::db::schemas::{ItemCategory, ItemDoc, ITEM_COLLECTION};
use crate::db::MongoCollection;
use crate::server::AppState;
use crate::services::bulk::{
    CreateItemSpec, ItemError, UpdateItemSpec, ITEM_NOT_IN_PLAN,
};
use crate::types::{Result, WaymarkError};

// =============================================================================
// Views
// =============================================================================

/// Item as rendered on the wire.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemView {
    pub id: String,
    pub plan_id: String,
    pub name: String,
    pub category: ItemCategory,
    pub quantity: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_participant_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl ItemView {
    pub fn from_doc(item: &ItemDoc) -> Self {
        ItemView {
            id: item._id.map(|id| id.to_hex()).unwrap_or_default(),
            plan_id: item.plan_id.to_hex(),
            name: item.name.clone(),
            category: item.category,
            quantity: item.quantity,
            unit: item.unit.clone(),
            notes: item.notes.clone(),
            assigned_participant_id: item.assigned_participant_id.map(|id| id.to_hex()),
            created_at: rfc3339_opt(item.metadata.created_at),
            updated_at: rfc3339_opt(item.metadata.updated_at),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ItemListResponse {
    items: Vec<ItemView>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkCreatedResponse {
    pub created: Vec<ItemView>,
    pub errors: Vec<ItemError>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkUpdatedResponse {
    pub updated: Vec<ItemView>,
    pub errors: Vec<ItemError>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ItemDeletedResponse {
    deleted: bool,
    id: String,
}

/// Single-item writes go through the batch machinery; their one error,
/// if any, surfaces as a plain domain error.
fn single_item_error(message: &str) -> WaymarkError {
    if message == ITEM_NOT_IN_PLAN {
        WaymarkError::NotFound(message.to_string())
    } else {
        WaymarkError::Validation(message.to_string())
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Routes under /api/plans/{id}/items (single-item plumbing).
///
/// `tail` is "" for the collection or "{itemId}" for one row; the
/// `/bulk` suffix is routed separately.
pub async fn handle_items_request(
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
        (Method::GET, "") => list_items(req, state, plan_raw).await,
        (Method::POST, "") => create_item(req, state, plan_raw).await,
        (Method::PATCH, item) if !item.is_empty() => {
            update_item(req, state, plan_raw, item).await
        }
        (Method::DELETE, item) if !item.is_empty() => {
            delete_item(req, state, plan_raw, item).await
        }
        _ => Err(WaymarkError::NotFound("Route not found".to_string())),
    };
    result.unwrap_or_else(|e| error_to_response(&e))
}

/// POST/PATCH /api/plans/{id}/items/bulk (signed-in callers only).
pub async fn handle_bulk_items_request(
    req: Request<Incoming>,
    state: Arc<AppState>,
    plan_raw: &str,
) -> Response<Full<Bytes>> {
    let method = req.method().clone();
    let result = match method {
        Method::POST => bulk_create(req, state, plan_raw).await,
        Method::PATCH => bulk_update(req, state, plan_raw).await,
        Method::OPTIONS => return cors_preflight(),
        _ => Err(WaymarkError::NotFound("Route not found".to_string())),
    };
    result.unwrap_or_else(|e| error_to_response(&e))
}

async fn list_items(
    req: Request<Incoming>,
    state: Arc<AppState>,
    plan_raw: &str,
) -> Result<Response<Full<Bytes>>> {
    let principal = state.resolver.resolve_optional(get_auth_header(&req)).await;
    let (plan, _) = load_plan_for_read(&state, &principal, plan_raw).await?;
    let plan_id = plan
        ._id
        .ok_or_else(|| WaymarkError::Internal("plan row missing id".to_string()))?;

    let items: MongoCollection<ItemDoc> = state.mongo.collection(ITEM_COLLECTION).await?;
    let gear = items.find_many(doc! { "plan_id": plan_id }).await?;

    let response = ItemListResponse {
        items: gear.iter().map(ItemView::from_doc).collect(),
    };
    Ok(json_response(StatusCode::OK, &response))
}

async fn create_item(
    req: Request<Incoming>,
    state: Arc<AppState>,
    plan_raw: &str,
) -> Result<Response<Full<Bytes>>> {
    let principal = state.resolver.resolve_optional(get_auth_header(&req)).await;
    let (plan, _) = load_plan_for_read(&state, &principal, plan_raw).await?;
    let plan_id = plan
        ._id
        .ok_or_else(|| WaymarkError::Internal("plan row missing id".to_string()))?;

    let spec: CreateItemSpec = parse_json_body(req, state.args.max_body_bytes).await?;

    let outcome = state.bulk.bulk_create(plan_id, vec![spec], None).await?;
    if let Some(err) = outcome.errors.first() {
        return Err(single_item_error(&err.message));
    }
    let item = outcome
        .created
        .into_iter()
        .next()
        .ok_or_else(|| WaymarkError::Internal("created item missing from batch".to_string()))?;

    Ok(json_response(StatusCode::CREATED, &ItemView::from_doc(&item)))
}

async fn update_item(
    req: Request<Incoming>,
    state: Arc<AppState>,
    plan_raw: &str,
    item_raw: &str,
) -> Result<Response<Full<Bytes>>> {
    let principal = state.resolver.resolve_optional(get_auth_header(&req)).await;
    let (plan, _) = load_plan_for_read(&state, &principal, plan_raw).await?;
    let plan_id = plan
        ._id
        .ok_or_else(|| WaymarkError::Internal("plan row missing id".to_string()))?;

    let mut spec: UpdateItemSpec = parse_json_body(req, state.args.max_body_bytes).await?;
    // The path wins over whatever id the body carries.
    spec.id = item_raw.to_string();

    let outcome = state.bulk.bulk_update(plan_id, vec![spec], None).await?;
    if let Some(err) = outcome.errors.first() {
        return Err(single_item_error(&err.message));
    }
    let item = outcome
        .updated
        .into_iter()
        .next()
        .ok_or_else(|| WaymarkError::Internal("updated item missing from batch".to_string()))?;

    Ok(json_response(StatusCode::OK, &ItemView::from_doc(&item)))
}

async fn delete_item(
    req: Request<Incoming>,
    state: Arc<AppState>,
    plan_raw: &str,
    item_raw: &str,
) -> Result<Response<Full<Bytes>>> {
    let principal = state.resolver.resolve_optional(get_auth_header(&req)).await;
    let (plan, _) = load_plan_for_read(&state, &principal, plan_raw).await?;
    let plan_id = plan
        ._id
        .ok_or_else(|| WaymarkError::Internal("plan row missing id".to_string()))?;

    let item_id = bson::oid::ObjectId::parse_str(item_raw)
        .map_err(|_| WaymarkError::NotFound(ITEM_NOT_IN_PLAN.to_string()))?;

    let items: MongoCollection<ItemDoc> = state.mongo.collection(ITEM_COLLECTION).await?;
    let removed = items
        .delete_one(doc! { "_id": item_id, "plan_id": plan_id })
        .await?;
    if removed == 0 {
        return Err(WaymarkError::NotFound(ITEM_NOT_IN_PLAN.to_string()));
    }

    let response = ItemDeletedResponse {
        deleted: true,
        id: item_id.to_hex(),
    };
    Ok(json_response(StatusCode::OK, &response))
}

async fn bulk_create(
    req: Request<Incoming>,
    state: Arc<AppState>,
    plan_raw: &str,
) -> Result<Response<Full<Bytes>>> {
    let principal = state
        .resolver
        .resolve_required(get_auth_header(&req))
        .await?;
    let (plan, _) = load_plan_for_read(&state, &principal, plan_raw).await?;
    let plan_id = plan
        ._id
        .ok_or_else(|| WaymarkError::Internal("plan row missing id".to_string()))?;

    let specs: Vec<CreateItemSpec> = parse_json_body(req, state.args.max_body_bytes).await?;

    let outcome = state.bulk.bulk_create(plan_id, specs, None).await?;
    info!(
        plan_id = %plan_id,
        created = outcome.created.len(),
        errors = outcome.errors.len(),
        "bulk item create"
    );

    let status = outcome.status();
    let response = BulkCreatedResponse {
        created: outcome.created.iter().map(ItemView::from_doc).collect(),
        errors: outcome.errors,
    };
    Ok(json_response(status, &response))
}

async fn bulk_update(
    req: Request<Incoming>,
    state: Arc<AppState>,
    plan_raw: &str,
) -> Result<Response<Full<Bytes>>> {
    let principal = state
        .resolver
        .resolve_required(get_auth_header(&req))
        .await?;
    let (plan, _) = load_plan_for_read(&state, &principal, plan_raw).await?;
    let plan_id = plan
        ._id
        .ok_or_else(|| WaymarkError::Internal("plan row missing id".to_string()))?;

    let specs: Vec<UpdateItemSpec> = parse_json_body(req, state.args.max_body_bytes).await?;

    let outcome = state.bulk.bulk_update(plan_id, specs, None).await?;
    info!(
        plan_id = %plan_id,
        updated = outcome.updated.len(),
        errors = outcome.errors.len(),
        "bulk item update"
    );

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
    use bson::oid::ObjectId;

    #[test]
    fn test_single_item_error_mapping() {
        let missing = single_item_error(ITEM_NOT_IN_PLAN);
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let invalid = single_item_error("Unit is required for food items");
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_item_view_rendering() {
        let mut item = ItemDoc::new(ObjectId::new(), "Tent".to_string(), ItemCategory::Equipment);
        item._id = Some(ObjectId::new());
        item.unit = Some("pcs".to_string());

        let view = ItemView::from_doc(&item);
        assert_eq!(view.name, "Tent");

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["category"], "equipment");
        assert_eq!(json["unit"], "pcs");
        assert_eq!(json["quantity"], 1);
        assert!(json.get("assignedParticipantId").is_none());
        assert_eq!(json["planId"], item.plan_id.to_hex());
    }
}
