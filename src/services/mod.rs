//! Services layer for Waymark
//!
//! This module contains business logic services that coordinate between
//! the storage layer, the auth layer, and the HTTP routes.
//!
//! ## Services
//!
//! - **Invites**: invite token issue/regenerate, guest resolution, and
//!   the claim flow that links an invite to a signed-in account
//! - **IdentitySync**: convergence of participant rows with a
//!   principal's current identity claims
//! - **BulkItems**: batch create/update of plan items with per-item
//!   error reporting

pub mod bulk;
pub mod identity_sync;
pub mod invites;

pub use bulk::{
    batch_status, BulkCreateOutcome, BulkItemService, BulkUpdateOutcome, CreateItemSpec,
    ItemError, UpdateItemSpec,
};
pub use identity_sync::{derive_profile, IdentitySyncService, ProfileFields, SyncOutcome};
pub use invites::{ClaimOutcome, InviteService};
