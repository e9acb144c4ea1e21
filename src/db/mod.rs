//! Database layer for Waymark
//!
//! MongoDB access through typed collections plus the document schemas.

pub mod mongo;
pub mod schemas;

pub use mongo::{classify_error, is_duplicate_key, MongoClient, MongoCollection};
