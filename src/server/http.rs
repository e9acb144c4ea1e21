//! HTTP server implementation
//!
//! hyper http1 with TokioIo for async handling. One accept loop, one
//! `handle_request` router, per-connection tasks.

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::auth::PrincipalResolver;
use crate::config::Args;
use crate::db::MongoClient;
use crate::routes;
use crate::services::{BulkItemService, IdentitySyncService, InviteService};
use crate::types::WaymarkError;

/// Shared application state
pub struct AppState {
    pub args: Args,
    pub mongo: MongoClient,
    pub resolver: PrincipalResolver,
    pub invites: InviteService,
    pub identity_sync: IdentitySyncService,
    pub bulk: BulkItemService,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(args: Args, mongo: MongoClient, resolver: PrincipalResolver) -> Self {
        let invites = InviteService::new(mongo.clone());
        let identity_sync = IdentitySyncService::new(mongo.clone());
        let bulk = BulkItemService::new(mongo.clone());
        Self {
            args,
            mongo,
            resolver,
            invites,
            identity_sync,
            bulk,
            started_at: Instant::now(),
        }
    }
}

pub async fn run(state: Arc<AppState>) -> Result<(), WaymarkError> {
    let listener = TcpListener::bind(state.args.listen).await?;

    info!("Waymark listening on {}", state.args.listen);

    if state.args.dev_mode {
        warn!("Development mode enabled");
    }

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new()
                        .preserve_header_case(true)
                        .title_case_headers(true)
                        .serve_connection(io, service)
                        .await
                    {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

/// Route incoming HTTP requests
async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    info!("[{}] {} {}", addr, method, path);

    // Plan-scoped routes consume the request, so dispatch them before
    // the flat match.
    if let Some(rest) = path.strip_prefix("/api/plans/") {
        let rest = rest.to_string();
        return Ok(handle_plan_scoped(state, req, &rest).await);
    }

    if let Some(tail) = path.strip_prefix("/api/me/") {
        let tail = tail.to_string();
        return Ok(routes::handle_me_request(req, state, &tail).await);
    }

    let response = match (method, path.as_str()) {
        // Liveness probe - returns 200 if the process is up
        (Method::GET, "/health") | (Method::GET, "/healthz") => {
            routes::health_check(state).await
        }

        // Readiness probe - returns 200 only if MongoDB answers a ping
        (Method::GET, "/ready") | (Method::GET, "/readyz") => {
            routes::readiness_check(state).await
        }

        // Version info for deployment verification
        (Method::GET, "/version") => routes::version_info(),

        // CORS preflight
        (Method::OPTIONS, _) => routes::cors_preflight(),

        (_, "/api/plans") => routes::handle_plans_request(req, state).await,

        _ => not_found_response(&path),
    };

    Ok(response)
}

/// Dispatch `/api/plans/{id}[/...]`.
///
/// `rest` is everything after the prefix: the plan id, optionally
/// followed by a sub-resource path. The id is passed through raw;
/// handlers parse it so malformed ids render as missing plans.
async fn handle_plan_scoped(
    state: Arc<AppState>,
    req: Request<Incoming>,
    rest: &str,
) -> Response<Full<Bytes>> {
    let (plan_raw, sub) = match rest.find('/') {
        Some(i) => (&rest[..i], &rest[i + 1..]),
        None => (rest, ""),
    };

    if plan_raw.is_empty() {
        return not_found_response(req.uri().path());
    }

    match sub {
        "" => routes::handle_plan_request(req, state, plan_raw).await,
        "claim" => routes::handle_claim_request(req, state, plan_raw).await,
        "items/bulk" => routes::handle_bulk_items_request(req, state, plan_raw).await,
        s if s == "participants" || s.starts_with("participants/") => {
            let tail = s.strip_prefix("participants/").unwrap_or("");
            routes::handle_participants_request(req, state, plan_raw, tail).await
        }
        s if s == "items" || s.starts_with("items/") => {
            let tail = s.strip_prefix("items/").unwrap_or("");
            routes::handle_items_request(req, state, plan_raw, tail).await
        }
        s if s == "guest" || s.starts_with("guest/") => {
            let tail = s.strip_prefix("guest/").unwrap_or("");
            routes::handle_guest_request(req, state, plan_raw, tail).await
        }
        _ => not_found_response(req.uri().path()),
    }
}

fn not_found_response(path: &str) -> Response<Full<Bytes>> {
    routes::error_response(
        StatusCode::NOT_FOUND,
        &format!("Route not found: {}", path),
        "NOT_FOUND",
    )
}
