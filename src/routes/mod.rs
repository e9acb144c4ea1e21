//! HTTP routes for Waymark
//!
//! Shared response/request plumbing lives here; each route module owns
//! its handlers and view types. Error bodies are always
//! `{"error": "...", "code": "..."}`.

pub mod guest;
pub mod health;
pub mod items;
pub mod me;
pub mod participants;
pub mod plans;

pub use guest::handle_guest_request;
pub use health::{health_check, readiness_check, version_info};
pub use items::{handle_bulk_items_request, handle_items_request};
pub use me::handle_me_request;
pub use participants::{handle_claim_request, handle_participants_request};
pub use plans::{handle_plan_request, handle_plans_request};

use bson::oid::ObjectId;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde::{Deserialize, Serialize};

use crate::types::{Result, WaymarkError};

/// The one message every plan-level denial renders with. Reads that are
/// denied and ids that do not resolve must be indistinguishable on the
/// wire, so everything funnels through [`plan_not_found`].
pub const PLAN_NOT_FOUND: &str = "Plan not found";

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
}

// =============================================================================
// Response Helpers
// =============================================================================

pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    let json = serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string());

    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(Full::new(Bytes::from(json)))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::from_static(b"{}"))))
}

/// Build a JSON error response
pub fn error_response(
    status: StatusCode,
    message: &str,
    code: &'static str,
) -> Response<Full<Bytes>> {
    let body = ErrorBody {
        error: message.to_string(),
        code,
    };
    json_response(status, &body)
}

/// Render a domain error. Storage and internal details are redacted by
/// `public_message`.
pub fn error_to_response(err: &WaymarkError) -> Response<Full<Bytes>> {
    error_response(err.status(), &err.public_message(), err.code())
}

/// The anti-enumeration 404. Every path that must hide a plan's
/// existence returns exactly this response.
pub fn plan_not_found() -> Response<Full<Bytes>> {
    error_to_response(&plan_not_found_error())
}

/// Same response as [`plan_not_found`], for code still inside a
/// `Result` chain.
pub fn plan_not_found_error() -> WaymarkError {
    WaymarkError::NotFound(PLAN_NOT_FOUND.to_string())
}

pub fn cors_preflight() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::NO_CONTENT)
        .header("Access-Control-Allow-Origin", "*")
        .header(
            "Access-Control-Allow-Methods",
            "GET, POST, PATCH, PUT, DELETE, OPTIONS",
        )
        .header(
            "Access-Control-Allow-Headers",
            "Content-Type, Authorization, X-Invite-Token",
        )
        .header("Access-Control-Max-Age", "86400")
        .body(Full::new(Bytes::new()))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())))
}

// =============================================================================
// Request Helpers
// =============================================================================

pub async fn parse_json_body<T: for<'de> Deserialize<'de>>(
    req: Request<Incoming>,
    max_bytes: usize,
) -> Result<T> {
    let body = req
        .collect()
        .await
        .map_err(|e| WaymarkError::BadRequest(format!("Failed to read body: {}", e)))?;

    let bytes = body.to_bytes();
    if bytes.len() > max_bytes {
        return Err(WaymarkError::BadRequest("Request body too large".into()));
    }

    serde_json::from_slice(&bytes)
        .map_err(|e| WaymarkError::BadRequest(format!("Invalid JSON: {}", e)))
}

pub fn get_auth_header(req: &Request<Incoming>) -> Option<&str> {
    req.headers()
        .get(hyper::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
}

/// Invite token credential: `X-Invite-Token` header, else `?token=`.
pub fn get_invite_token(req: &Request<Incoming>) -> Option<String> {
    if let Some(header) = req
        .headers()
        .get("x-invite-token")
        .and_then(|v| v.to_str().ok())
    {
        let header = header.trim();
        if !header.is_empty() {
            return Some(header.to_string());
        }
    }

    query_param(req.uri().query(), "token")
}

/// Pull one key out of the query string, percent-decoded.
pub fn query_param(query: Option<&str>, key: &str) -> Option<String> {
    let query = query?;
    for pair in query.split('&') {
        let mut parts = pair.splitn(2, '=');
        if parts.next() != Some(key) {
            continue;
        }
        let raw = parts.next().unwrap_or("");
        let decoded = urlencoding::decode(raw)
            .map(|v| v.into_owned())
            .unwrap_or_else(|_| raw.to_string());
        if !decoded.is_empty() {
            return Some(decoded);
        }
    }
    None
}

/// Parse a path segment as an ObjectId. Used for sub-resources; plan
/// ids go through [`parse_plan_id`] so bad ids stay indistinguishable
/// from missing plans.
pub fn parse_object_id(raw: &str, what: &str) -> Result<ObjectId> {
    ObjectId::parse_str(raw).map_err(|_| WaymarkError::NotFound(format!("{} not found", what)))
}

/// Plan ids that do not parse behave exactly like plans that do not
/// exist.
pub fn parse_plan_id(raw: &str) -> Result<ObjectId> {
    ObjectId::parse_str(raw).map_err(|_| plan_not_found_error())
}

/// Render a BSON timestamp the way the JSON surface expects it.
pub fn rfc3339(dt: bson::DateTime) -> String {
    dt.to_chrono().to_rfc3339()
}

/// Metadata timestamps are optional in storage but not on the wire.
pub fn rfc3339_opt(dt: Option<bson::DateTime>) -> String {
    dt.map(rfc3339).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_denied_read_matches_missing_plan_exactly() {
        // The wire bytes must be identical, not merely similar.
        let denied = plan_not_found();
        let missing = error_to_response(&WaymarkError::NotFound(PLAN_NOT_FOUND.to_string()));

        assert_eq!(denied.status(), StatusCode::NOT_FOUND);
        assert_eq!(denied.status(), missing.status());
        assert_eq!(
            format!("{:?}", denied.body()),
            format!("{:?}", missing.body())
        );
    }

    #[test]
    fn test_error_body_shape() {
        let response = error_response(StatusCode::CONFLICT, "Already a participant", "CONFLICT");
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(
            response.headers().get("Content-Type").unwrap(),
            "application/json"
        );
    }

    #[test]
    fn test_query_param_decoding() {
        assert_eq!(
            query_param(Some("token=abc123"), "token").as_deref(),
            Some("abc123")
        );
        assert_eq!(
            query_param(Some("a=1&token=x%20y"), "token").as_deref(),
            Some("x y")
        );
        assert_eq!(query_param(Some("token="), "token"), None);
        assert_eq!(query_param(Some("other=1"), "token"), None);
        assert_eq!(query_param(None, "token"), None);
    }

    #[test]
    fn test_plan_id_parse_hides_malformed_ids() {
        let err = parse_plan_id("definitely-not-an-oid").unwrap_err();
        assert_eq!(err.public_message(), PLAN_NOT_FOUND);

        let ok = parse_plan_id(&ObjectId::new().to_hex());
        assert!(ok.is_ok());
    }
}
