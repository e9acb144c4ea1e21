//! Waymark - identity and access resolution for collaborative trip plans

use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use waymark::{
    auth::{JwksVerifier, PrincipalResolver, SharedSecretVerifier, TokenVerifier},
    config::Args,
    db::schemas::{
        ItemDoc, ParticipantDoc, PlanDoc, PreferenceDefaultsDoc, ITEM_COLLECTION,
        PARTICIPANT_COLLECTION, PLAN_COLLECTION, PREFERENCE_DEFAULTS_COLLECTION,
    },
    db::MongoClient,
    server::{self, AppState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    // Parse command line arguments
    let args = Args::parse();

    // Initialize tracing/logging
    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("waymark={},info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Validate configuration
    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    // Print startup banner
    info!("======================================");
    info!("  Waymark - Trip Planning API");
    info!("======================================");
    info!("Listen: {}", args.listen);
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("MongoDB: {}", args.mongodb_uri);
    match &args.jwks_url {
        Some(url) => info!("Identity: JWKS at {} (refresh {}s)", url, args.jwks_refresh_seconds),
        None => info!("Identity: HS256 shared secret"),
    }
    info!("======================================");

    // Pick the token verifier. validate() guarantees at least one
    // source exists outside dev mode.
    let verifier: Arc<dyn TokenVerifier> = if let Some(jwks_url) = args.jwks_url.clone() {
        Arc::new(JwksVerifier::new(
            jwks_url,
            args.jwt_issuer.clone(),
            Duration::from_secs(args.jwks_refresh_seconds),
        ))
    } else {
        let secret = match args.shared_secret() {
            Some(s) => s,
            None => {
                error!("No JWKS_URL and no JWT_SECRET configured");
                std::process::exit(1);
            }
        };
        Arc::new(SharedSecretVerifier::new(&secret, args.jwt_issuer.clone()))
    };
    let resolver = PrincipalResolver::new(verifier);

    // Connect to MongoDB. Every route needs storage, so a failed
    // connection is fatal even in dev mode.
    let mongo = match MongoClient::new(&args.mongodb_uri, &args.mongodb_db).await {
        Ok(client) => {
            info!("MongoDB connected successfully");
            client
        }
        Err(e) => {
            error!("MongoDB connection failed: {}", e);
            std::process::exit(1);
        }
    };

    // Open each collection once so indexes (including the claim CAS
    // partial-unique and the sparse invite-token unique) exist before
    // the first request.
    mongo.collection::<PlanDoc>(PLAN_COLLECTION).await?;
    mongo
        .collection::<ParticipantDoc>(PARTICIPANT_COLLECTION)
        .await?;
    mongo.collection::<ItemDoc>(ITEM_COLLECTION).await?;
    mongo
        .collection::<PreferenceDefaultsDoc>(PREFERENCE_DEFAULTS_COLLECTION)
        .await?;
    info!("Indexes ensured");

    let state = Arc::new(AppState::new(args, mongo, resolver));

    server::run(state).await?;

    Ok(())
}
