//! Database schemas for Waymark
//!
//! Defines MongoDB document structures for plans, participants, items,
//! and per-account preference defaults.

mod item;
mod metadata;
mod participant;
mod plan;
mod preference_defaults;

pub use item::{ItemCategory, ItemDoc, DEFAULT_EQUIPMENT_UNIT, ITEM_COLLECTION};
pub use metadata::Metadata;
pub use participant::{
    InviteStatus, ParticipantDoc, ParticipantRole, RsvpStatus, PARTICIPANT_COLLECTION,
};
pub use plan::{PlanDoc, Visibility, PLAN_COLLECTION};
pub use preference_defaults::{PreferenceDefaultsDoc, PREFERENCE_DEFAULTS_COLLECTION};
