//! Waymark - identity and access resolution for collaborative trip plans
//!
//! Waymark fronts a MongoDB-backed plan store with an HTTP API that
//! resolves callers into principals (signed-in users, invite-token
//! guests, admins, or anonymous), enforces plan visibility, and manages
//! the invite-token lifecycle that links guest participants to
//! accounts.
//!
//! ## Services
//!
//! - **Principal resolution**: JWT (JWKS or shared-secret) and invite
//!   token credentials resolved into a single `Principal` type
//! - **Visibility policy**: pure read/write decisions per plan, with
//!   denied reads indistinguishable from missing plans
//! - **Invites**: token generation, regeneration, guest resolution and
//!   the compare-and-set claim that links a participant to an account
//! - **Identity sync**: keeps participant rows aligned with the
//!   caller's token profile
//! - **Bulk items**: per-item validated batch create/update with
//!   200/207 partial-success reporting

pub mod auth;
pub mod config;
pub mod db;
pub mod policy;
pub mod routes;
pub mod server;
pub mod services;
pub mod types;

pub use config::Args;
pub use server::{run, AppState};
pub use types::{Result, WaymarkError};
