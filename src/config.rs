//! Configuration for Waymark
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::net::SocketAddr;

/// Waymark - trip planning API
///
/// Plans, participants and shared gear lists, with invite-link access
/// for people who never sign up.
#[derive(Parser, Debug, Clone)]
#[command(name = "waymark")]
#[command(about = "Trip planning API with invite-link guest access")]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "waymark")]
    pub mongodb_db: String,

    /// Enable development mode (HS256 fallback secret, relaxed startup checks)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// JWKS endpoint of the external identity provider
    /// (e.g. "https://id.example.com/.well-known/jwks.json")
    /// When set, bearer tokens are verified against these keys
    #[arg(long, env = "JWKS_URL")]
    pub jwks_url: Option<String>,

    /// Expected `iss` claim on identity tokens (optional)
    /// When unset, issuer is not checked
    #[arg(long, env = "JWT_ISSUER")]
    pub jwt_issuer: Option<String>,

    /// Shared HS256 secret for identity tokens
    /// Used when JWKS_URL is not configured (local stacks, tests)
    #[arg(long, env = "JWT_SECRET")]
    pub jwt_secret: Option<String>,

    /// How long a fetched JWKS document stays fresh, in seconds
    /// An unknown key id forces an early refresh regardless
    #[arg(long, env = "JWKS_REFRESH_SECONDS", default_value = "900")]
    pub jwks_refresh_seconds: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Maximum accepted JSON request body, in bytes
    #[arg(long, env = "MAX_BODY_BYTES", default_value = "65536")]
    pub max_body_bytes: usize,
}

impl Args {
    /// Get effective HS256 secret (uses default in dev mode)
    pub fn shared_secret(&self) -> Option<String> {
        if self.dev_mode {
            Some(
                self.jwt_secret
                    .clone()
                    .unwrap_or_else(|| "dev-only-insecure-secret".to_string()),
            )
        } else {
            self.jwt_secret.clone()
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !self.dev_mode && self.jwks_url.is_none() && self.jwt_secret.is_none() {
            return Err("JWKS_URL or JWT_SECRET is required in production mode".to_string());
        }

        if self.max_body_bytes == 0 {
            return Err("MAX_BODY_BYTES must be greater than zero".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prod_requires_verifier_source() {
        let args = Args::parse_from(["waymark"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_dev_mode_passes_without_secret() {
        let args = Args::parse_from(["waymark", "--dev-mode"]);
        assert!(args.validate().is_ok());
        assert_eq!(
            args.shared_secret().as_deref(),
            Some("dev-only-insecure-secret")
        );
    }

    #[test]
    fn test_jwks_url_satisfies_prod_check() {
        let args = Args::parse_from([
            "waymark",
            "--jwks-url",
            "https://id.example.com/.well-known/jwks.json",
        ]);
        assert!(args.validate().is_ok());
        assert!(args.shared_secret().is_none());
    }

    #[test]
    fn test_explicit_secret_survives_dev_mode() {
        let args = Args::parse_from(["waymark", "--dev-mode", "--jwt-secret", "hunter2"]);
        assert_eq!(args.shared_secret().as_deref(), Some("hunter2"));
    }
}
