//! Identity token verification
//!
//! Bearer tokens come from an external identity provider. In production
//! they are verified against the provider's JWKS document; locally a
//! shared HS256 secret does the job. The JWKS document is fetched
//! lazily, cached, and refreshed when it goes stale or when a token
//! arrives with an unknown key id (key rotation).

use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

use crate::auth::claims::IdentityClaims;

/// Floor on forced refreshes so tokens with bogus key ids cannot make
/// us hammer the provider's JWKS endpoint.
const FORCED_REFRESH_FLOOR: Duration = Duration::from_secs(30);

/// Why a token failed verification.
///
/// Required-auth routes map every variant to 401; optional-auth routes
/// degrade to an anonymous principal instead. The distinction exists
/// for logs.
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("token signature mismatch")]
    InvalidSignature,

    #[error("token expired")]
    Expired,

    #[error("token issuer mismatch")]
    IssuerMismatch,

    #[error("no key found for token key id")]
    KeyNotFound,

    #[error("key set unavailable: {0}")]
    Unavailable(String),
}

/// Something that can turn a bearer token into verified claims.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<IdentityClaims, VerifyError>;
}

fn map_decode_error(err: jsonwebtoken::errors::Error) -> VerifyError {
    use jsonwebtoken::errors::ErrorKind;
    match err.kind() {
        ErrorKind::ExpiredSignature => VerifyError::Expired,
        ErrorKind::InvalidSignature => VerifyError::InvalidSignature,
        ErrorKind::InvalidIssuer => VerifyError::IssuerMismatch,
        ErrorKind::ImmatureSignature => {
            VerifyError::Malformed("token not yet valid".to_string())
        }
        _ => VerifyError::Malformed(err.to_string()),
    }
}

fn base_validation(alg: Algorithm, issuer: Option<&str>) -> Validation {
    let mut validation = Validation::new(alg);
    validation.validate_aud = false;
    if let Some(iss) = issuer {
        validation.set_issuer(&[iss]);
    }
    validation
}

struct CachedKeys {
    set: JwkSet,
    fetched_at: Instant,
}

/// Verifies tokens against a remote JWKS document (RS256/ES256 family).
pub struct JwksVerifier {
    jwks_url: String,
    issuer: Option<String>,
    refresh_interval: Duration,
    http: reqwest::Client,
    cache: RwLock<Option<CachedKeys>>,
}

impl JwksVerifier {
    pub fn new(jwks_url: String, issuer: Option<String>, refresh_interval: Duration) -> Self {
        JwksVerifier {
            jwks_url,
            issuer,
            refresh_interval,
            http: reqwest::Client::new(),
            cache: RwLock::new(None),
        }
    }

    async fn fetch(&self) -> Result<JwkSet, VerifyError> {
        debug!(url = %self.jwks_url, "refreshing JWKS");
        let response = self
            .http
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| VerifyError::Unavailable(format!("JWKS fetch failed: {e}")))?
            .error_for_status()
            .map_err(|e| VerifyError::Unavailable(format!("JWKS endpoint error: {e}")))?;

        response
            .json::<JwkSet>()
            .await
            .map_err(|e| VerifyError::Unavailable(format!("invalid JWKS document: {e}")))
    }

    /// Current key set, refreshed when stale. A forced refresh still
    /// honors [`FORCED_REFRESH_FLOOR`].
    async fn key_set(&self, force: bool) -> Result<JwkSet, VerifyError> {
        let floor = if force {
            FORCED_REFRESH_FLOOR
        } else {
            self.refresh_interval
        };

        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.fetched_at.elapsed() < floor {
                    return Ok(cached.set.clone());
                }
            }
        }

        let mut cache = self.cache.write().await;
        // Another task may have refreshed while we waited for the lock.
        if let Some(cached) = cache.as_ref() {
            if cached.fetched_at.elapsed() < floor {
                return Ok(cached.set.clone());
            }
        }

        let set = self.fetch().await?;
        *cache = Some(CachedKeys {
            set: set.clone(),
            fetched_at: Instant::now(),
        });
        Ok(set)
    }

    async fn find_key(
        &self,
        kid: Option<&str>,
        force: bool,
    ) -> Result<Option<DecodingKey>, VerifyError> {
        let set = self.key_set(force).await?;
        let jwk = match kid {
            Some(kid) => set.find(kid).cloned(),
            // Single-key providers often omit the kid entirely.
            None if set.keys.len() == 1 => set.keys.first().cloned(),
            None => None,
        };

        match jwk {
            Some(jwk) => DecodingKey::from_jwk(&jwk)
                .map(Some)
                .map_err(|e| VerifyError::Unavailable(format!("unusable key in JWKS: {e}"))),
            None => Ok(None),
        }
    }

    async fn decoding_key(&self, kid: Option<&str>) -> Result<DecodingKey, VerifyError> {
        if let Some(key) = self.find_key(kid, false).await? {
            return Ok(key);
        }
        // Unknown kid: the provider may have rotated keys since the
        // last fetch.
        if let Some(key) = self.find_key(kid, true).await? {
            return Ok(key);
        }
        Err(VerifyError::KeyNotFound)
    }
}

#[async_trait]
impl TokenVerifier for JwksVerifier {
    async fn verify(&self, token: &str) -> Result<IdentityClaims, VerifyError> {
        let header = decode_header(token)
            .map_err(|e| VerifyError::Malformed(format!("invalid token header: {e}")))?;

        // JWKS keys are asymmetric. Refusing HS* here closes the
        // classic algorithm-confusion hole.
        if matches!(
            header.alg,
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
        ) {
            return Err(VerifyError::Malformed(
                "symmetric algorithm not accepted".to_string(),
            ));
        }

        let key = self.decoding_key(header.kid.as_deref()).await?;
        let validation = base_validation(header.alg, self.issuer.as_deref());

        decode::<IdentityClaims>(token, &key, &validation)
            .map(|data| data.claims)
            .map_err(map_decode_error)
    }
}

/// Verifies tokens with a shared HS256 secret. Development and test
/// stacks use this instead of a real identity provider.
pub struct SharedSecretVerifier {
    key: DecodingKey,
    issuer: Option<String>,
}

impl SharedSecretVerifier {
    pub fn new(secret: &str, issuer: Option<String>) -> Self {
        SharedSecretVerifier {
            key: DecodingKey::from_secret(secret.as_bytes()),
            issuer,
        }
    }
}

#[async_trait]
impl TokenVerifier for SharedSecretVerifier {
    async fn verify(&self, token: &str) -> Result<IdentityClaims, VerifyError> {
        let validation = base_validation(Algorithm::HS256, self.issuer.as_deref());
        decode::<IdentityClaims>(token, &self.key, &validation)
            .map(|data| data.claims)
            .map_err(map_decode_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use std::time::{SystemTime, UNIX_EPOCH};

    const SECRET: &str = "test-secret";

    fn now_secs() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs()
    }

    fn make_token(claims: &IdentityClaims, secret: &str) -> String {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn valid_claims() -> IdentityClaims {
        IdentityClaims {
            sub: "user-42".to_string(),
            email: Some("hiker@example.com".to_string()),
            exp: Some(now_secs() + 3600),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_shared_secret_accepts_valid_token() {
        let verifier = SharedSecretVerifier::new(SECRET, None);
        let token = make_token(&valid_claims(), SECRET);

        let claims = verifier.verify(&token).await.unwrap();
        assert_eq!(claims.sub, "user-42");
        assert_eq!(claims.email.as_deref(), Some("hiker@example.com"));
    }

    #[tokio::test]
    async fn test_expired_token_rejected() {
        let verifier = SharedSecretVerifier::new(SECRET, None);
        let mut claims = valid_claims();
        claims.exp = Some(now_secs() - 7200);
        let token = make_token(&claims, SECRET);

        match verifier.verify(&token).await {
            Err(VerifyError::Expired) => {}
            other => panic!("expected Expired, got {:?}", other.map(|c| c.sub)),
        }
    }

    #[tokio::test]
    async fn test_wrong_secret_rejected() {
        let verifier = SharedSecretVerifier::new(SECRET, None);
        let token = make_token(&valid_claims(), "some-other-secret");

        match verifier.verify(&token).await {
            Err(VerifyError::InvalidSignature) => {}
            other => panic!("expected InvalidSignature, got {:?}", other.map(|c| c.sub)),
        }
    }

    #[tokio::test]
    async fn test_garbage_token_is_malformed() {
        let verifier = SharedSecretVerifier::new(SECRET, None);

        match verifier.verify("not-a-jwt").await {
            Err(VerifyError::Malformed(_)) => {}
            other => panic!("expected Malformed, got {:?}", other.map(|c| c.sub)),
        }
    }

    #[tokio::test]
    async fn test_issuer_mismatch_rejected() {
        let verifier =
            SharedSecretVerifier::new(SECRET, Some("https://id.example.com".to_string()));
        let mut claims = valid_claims();
        claims.iss = Some("https://evil.example.com".to_string());
        let token = make_token(&claims, SECRET);

        match verifier.verify(&token).await {
            Err(VerifyError::IssuerMismatch) => {}
            other => panic!("expected IssuerMismatch, got {:?}", other.map(|c| c.sub)),
        }
    }

    #[tokio::test]
    async fn test_matching_issuer_accepted() {
        let verifier =
            SharedSecretVerifier::new(SECRET, Some("https://id.example.com".to_string()));
        let mut claims = valid_claims();
        claims.iss = Some("https://id.example.com".to_string());
        let token = make_token(&claims, SECRET);

        assert!(verifier.verify(&token).await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_exp_rejected() {
        let verifier = SharedSecretVerifier::new(SECRET, None);
        let mut claims = valid_claims();
        claims.exp = None;
        let token = make_token(&claims, SECRET);

        assert!(verifier.verify(&token).await.is_err());
    }
}
