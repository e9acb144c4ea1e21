//! Bulk item mutation coordinator
//!
//! Batch create and batch update over a plan's items. Validation runs
//! per item: bad rows land in an error list, good rows are written, and
//! the whole batch reports 207 the moment anything failed, even when
//! everything did. Only a storage failure aborts a batch outright.
//!
//! The guest variant adds an ownership predicate (guests touch their
//! own and unassigned items only) and pins created items to the guest's
//! participant row.

use std::collections::HashMap;

use bson::{doc, oid::ObjectId, DateTime, Document};
use hyper::StatusCode;
use serde::{Deserialize, Serialize};

use crate::db::schemas::{
    ItemCategory, ItemDoc, Metadata, DEFAULT_EQUIPMENT_UNIT, ITEM_COLLECTION,
};
use crate::db::{MongoClient, MongoCollection};
use crate::types::Result;

/// Validation message for food rows without a unit.
pub const FOOD_UNIT_REQUIRED: &str = "Unit is required for food items";

/// Ownership message for guests touching someone else's item.
pub const GUEST_OWNERSHIP: &str = "You can only edit items assigned to you";

pub const ITEM_NOT_IN_PLAN: &str = "Item not found in this plan";
pub const NAME_REQUIRED: &str = "Name is required";
pub const QUANTITY_INVALID: &str = "Quantity must be at least 1";
pub const EMPTY_UPDATE: &str = "No fields to update";
pub const ASSIGNEE_INVALID: &str = "Assigned participant id is not valid";
pub const GUEST_REASSIGN: &str = "Guests cannot reassign items";

// ============================================================================
// Batch input/output types
// ============================================================================

/// One item to create.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateItemSpec {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub category: ItemCategory,

    #[serde(default = "default_quantity")]
    pub quantity: i64,

    #[serde(default)]
    pub unit: Option<String>,

    #[serde(default)]
    pub notes: Option<String>,

    /// Hex ObjectId of the participant bringing the item
    #[serde(default)]
    pub assigned_participant_id: Option<String>,
}

fn default_quantity() -> i64 {
    1
}

/// One partial update, addressed by item id.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateItemSpec {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub category: Option<ItemCategory>,

    #[serde(default)]
    pub quantity: Option<i64>,

    /// New unit; an empty string clears it
    #[serde(default)]
    pub unit: Option<String>,

    /// New notes; an empty string clears them
    #[serde(default)]
    pub notes: Option<String>,

    /// New assignee as hex ObjectId; an empty string unassigns
    #[serde(default)]
    pub assigned_participant_id: Option<String>,
}

impl UpdateItemSpec {
    /// True when the spec names an item but changes nothing.
    pub fn is_noop(&self) -> bool {
        self.name.is_none()
            && self.category.is_none()
            && self.quantity.is_none()
            && self.unit.is_none()
            && self.notes.is_none()
            && self.assigned_participant_id.is_none()
    }
}

/// Per-item failure, reported without aborting the batch.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ItemError {
    /// Best available label for the failed row
    pub name: String,
    pub message: String,
}

#[derive(Debug)]
pub struct BulkCreateOutcome {
    pub created: Vec<ItemDoc>,
    pub errors: Vec<ItemError>,
}

impl BulkCreateOutcome {
    pub fn status(&self) -> StatusCode {
        batch_status(self.errors.len())
    }
}

#[derive(Debug)]
pub struct BulkUpdateOutcome {
    pub updated: Vec<ItemDoc>,
    pub errors: Vec<ItemError>,
}

impl BulkUpdateOutcome {
    pub fn status(&self) -> StatusCode {
        batch_status(self.errors.len())
    }
}

/// 200 for a clean batch, 207 the moment anything failed. A batch
/// where every row failed is still 207, not 400.
pub fn batch_status(error_count: usize) -> StatusCode {
    if error_count == 0 {
        StatusCode::OK
    } else {
        StatusCode::MULTI_STATUS
    }
}

// ============================================================================
// Per-item validation
// ============================================================================

fn has_text(value: Option<&str>) -> bool {
    value.is_some_and(|s| !s.trim().is_empty())
}

/// Unit a stored row ends up with: explicit value wins, equipment
/// falls back to [`DEFAULT_EQUIPMENT_UNIT`], everything else stays
/// unitless.
pub fn resolved_unit(category: ItemCategory, unit: Option<&str>) -> Option<String> {
    match unit {
        Some(u) if !u.trim().is_empty() => Some(u.trim().to_string()),
        _ if category == ItemCategory::Equipment => Some(DEFAULT_EQUIPMENT_UNIT.to_string()),
        _ => None,
    }
}

pub fn validate_create_spec(spec: &CreateItemSpec) -> std::result::Result<(), String> {
    if spec.name.trim().is_empty() {
        return Err(NAME_REQUIRED.to_string());
    }
    if spec.quantity < 1 {
        return Err(QUANTITY_INVALID.to_string());
    }
    if spec.category == ItemCategory::Food && !has_text(spec.unit.as_deref()) {
        return Err(FOOD_UNIT_REQUIRED.to_string());
    }
    Ok(())
}

/// Turn a validated create spec into a storable row. The id is
/// assigned here so the response can echo exactly what was stored.
fn build_item(
    plan_id: ObjectId,
    spec: &CreateItemSpec,
    forced_assignee: Option<ObjectId>,
) -> std::result::Result<ItemDoc, String> {
    let assigned_participant_id = match forced_assignee {
        // Guest-created items always belong to the guest.
        Some(guest_id) => Some(guest_id),
        None => match spec.assigned_participant_id.as_deref() {
            Some(raw) if !raw.trim().is_empty() => Some(
                ObjectId::parse_str(raw.trim()).map_err(|_| ASSIGNEE_INVALID.to_string())?,
            ),
            _ => None,
        },
    };

    Ok(ItemDoc {
        _id: Some(ObjectId::new()),
        metadata: Metadata::new(),
        plan_id,
        name: spec.name.trim().to_string(),
        category: spec.category,
        quantity: spec.quantity,
        unit: resolved_unit(spec.category, spec.unit.as_deref()),
        notes: spec.notes.clone().filter(|n| !n.trim().is_empty()),
        assigned_participant_id,
    })
}

/// Split a create batch into storable rows and per-item errors. Bad
/// rows never block their neighbors.
fn partition_create_specs(
    plan_id: ObjectId,
    specs: &[CreateItemSpec],
    guest: Option<ObjectId>,
) -> (Vec<ItemDoc>, Vec<ItemError>) {
    let mut to_insert = Vec::new();
    let mut errors = Vec::new();

    for spec in specs {
        if let Err(message) = validate_create_spec(spec) {
            errors.push(ItemError {
                name: spec.name.clone(),
                message,
            });
            continue;
        }
        match build_item(plan_id, spec, guest) {
            Ok(item) => to_insert.push(item),
            Err(message) => errors.push(ItemError {
                name: spec.name.clone(),
                message,
            }),
        }
    }

    (to_insert, errors)
}

/// Validate one update spec against the stored row and produce the
/// `(item id, update document)` pair to apply.
pub fn plan_item_update(
    spec: &UpdateItemSpec,
    existing: Option<&ItemDoc>,
    guest: Option<ObjectId>,
) -> std::result::Result<(ObjectId, Document), String> {
    let item = existing.ok_or_else(|| ITEM_NOT_IN_PLAN.to_string())?;
    let item_id = item._id.ok_or_else(|| ITEM_NOT_IN_PLAN.to_string())?;

    if let Some(guest_id) = guest {
        // Guests may touch their own and unassigned items only.
        if item
            .assigned_participant_id
            .is_some_and(|assigned| assigned != guest_id)
        {
            return Err(GUEST_OWNERSHIP.to_string());
        }
        if spec.assigned_participant_id.is_some() {
            return Err(GUEST_REASSIGN.to_string());
        }
    }

    if spec.is_noop() {
        return Err(EMPTY_UPDATE.to_string());
    }

    let mut set = Document::new();
    let mut unset = Document::new();

    if let Some(name) = &spec.name {
        let name = name.trim();
        if name.is_empty() {
            return Err(NAME_REQUIRED.to_string());
        }
        set.insert("name", name);
    }

    if let Some(quantity) = spec.quantity {
        if quantity < 1 {
            return Err(QUANTITY_INVALID.to_string());
        }
        set.insert("quantity", quantity);
    }

    // Category and unit interact, so the food rule is checked against
    // the row as it will look after the update.
    let category = spec.category.unwrap_or(item.category);
    let requested_unit = match &spec.unit {
        Some(u) if !u.trim().is_empty() => Some(u.trim().to_string()),
        Some(_) => None,
        None => item.unit.clone(),
    };
    let final_unit = match requested_unit {
        Some(u) => Some(u),
        None if category == ItemCategory::Equipment => {
            Some(DEFAULT_EQUIPMENT_UNIT.to_string())
        }
        None => None,
    };
    if category == ItemCategory::Food && final_unit.is_none() {
        return Err(FOOD_UNIT_REQUIRED.to_string());
    }

    if let Some(new_category) = spec.category {
        set.insert("category", new_category.as_str());
    }
    if final_unit != item.unit {
        match &final_unit {
            Some(u) => {
                set.insert("unit", u.as_str());
            }
            None => {
                unset.insert("unit", "");
            }
        }
    }

    if let Some(notes) = &spec.notes {
        let trimmed = notes.trim();
        if trimmed.is_empty() {
            unset.insert("notes", "");
        } else {
            set.insert("notes", trimmed);
        }
    }

    if guest.is_none() {
        if let Some(raw) = &spec.assigned_participant_id {
            let raw = raw.trim();
            if raw.is_empty() {
                unset.insert("assigned_participant_id", "");
            } else {
                let assignee =
                    ObjectId::parse_str(raw).map_err(|_| ASSIGNEE_INVALID.to_string())?;
                set.insert("assigned_participant_id", assignee);
            }
        }
    }

    set.insert("metadata.updated_at", DateTime::now());

    let mut update = doc! { "$set": set };
    if !unset.is_empty() {
        update.insert("$unset", unset);
    }
    Ok((item_id, update))
}

fn error_label(spec: &UpdateItemSpec, existing: Option<&ItemDoc>) -> String {
    if let Some(name) = spec.name.as_deref().filter(|n| !n.trim().is_empty()) {
        return name.trim().to_string();
    }
    if let Some(item) = existing {
        return item.name.clone();
    }
    spec.id.clone()
}

// ============================================================================
// Service
// ============================================================================

/// Batch item writes against one plan.
#[derive(Clone)]
pub struct BulkItemService {
    mongo: MongoClient,
}

impl BulkItemService {
    pub fn new(mongo: MongoClient) -> Self {
        BulkItemService { mongo }
    }

    async fn items(&self) -> Result<MongoCollection<ItemDoc>> {
        self.mongo.collection(ITEM_COLLECTION).await
    }

    /// Validate every spec, then insert the valid ones in a single
    /// batch write. `guest` pins created rows to that participant.
    pub async fn bulk_create(
        &self,
        plan_id: ObjectId,
        specs: Vec<CreateItemSpec>,
        guest: Option<ObjectId>,
    ) -> Result<BulkCreateOutcome> {
        let (to_insert, errors) = partition_create_specs(plan_id, &specs, guest);

        let created = if to_insert.is_empty() {
            Vec::new()
        } else {
            self.items().await?.insert_many(to_insert).await?
        };

        Ok(BulkCreateOutcome { created, errors })
    }

    /// Apply every update spec that passes validation. One batched
    /// lookup resolves the whole batch; writes are per item so one bad
    /// row never blocks its neighbors.
    pub async fn bulk_update(
        &self,
        plan_id: ObjectId,
        specs: Vec<UpdateItemSpec>,
        guest: Option<ObjectId>,
    ) -> Result<BulkUpdateOutcome> {
        let items = self.items().await?;

        let ids: Vec<ObjectId> = specs
            .iter()
            .filter_map(|s| ObjectId::parse_str(s.id.trim()).ok())
            .collect();

        let by_id: HashMap<ObjectId, ItemDoc> = if ids.is_empty() {
            HashMap::new()
        } else {
            items
                .find_many(doc! { "_id": { "$in": ids }, "plan_id": plan_id })
                .await?
                .into_iter()
                .filter_map(|item| item._id.map(|id| (id, item)))
                .collect()
        };

        let mut updated = Vec::new();
        let mut errors = Vec::new();

        for spec in &specs {
            let current = ObjectId::parse_str(spec.id.trim())
                .ok()
                .and_then(|id| by_id.get(&id));
            let label = error_label(spec, current);

            match plan_item_update(spec, current, guest) {
                Err(message) => errors.push(ItemError {
                    name: label,
                    message,
                }),
                Ok((item_id, update)) => {
                    let row = items
                        .find_one_and_update(doc! { "_id": item_id, "plan_id": plan_id }, update)
                        .await?;
                    match row {
                        Some(row) => updated.push(row),
                        None => errors.push(ItemError {
                            name: label,
                            message: ITEM_NOT_IN_PLAN.to_string(),
                        }),
                    }
                }
            }
        }

        Ok(BulkUpdateOutcome { updated, errors })
    }
}
