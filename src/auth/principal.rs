//! Principals and bearer token resolution
//!
//! Every request resolves to exactly one principal before any policy
//! decision runs. The two resolution modes differ only in how they
//! treat a bad credential: required-auth routes reject it, optional-auth
//! routes degrade to anonymous so a stale token in a shared link never
//! breaks a public page.

use std::sync::Arc;

use bson::oid::ObjectId;
use tracing::debug;

use crate::auth::claims::{IdentityClaims, ADMIN_ROLE};
use crate::auth::verifier::TokenVerifier;
use crate::types::WaymarkError;

/// A verified external identity.
#[derive(Debug, Clone)]
pub struct UserIdentity {
    /// External identity id (the token's `sub`)
    pub id: String,
    /// Effective application role
    pub role: String,
    /// Full claim set, kept for profile syncing
    pub claims: IdentityClaims,
}

/// A participant acting through an invite token, scoped to one plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuestContext {
    pub plan_id: ObjectId,
    pub participant_id: ObjectId,
}

/// Who is making the request.
#[derive(Debug, Clone)]
pub enum Principal {
    /// No credential presented, or an optional credential that failed
    /// verification
    Anonymous,
    /// Verified identity token, non-admin role
    User(UserIdentity),
    /// Verified identity token with the admin role
    Admin(UserIdentity),
    /// Invite token resolved to a participant row
    Guest(GuestContext),
}

impl Principal {
    /// Build a principal from verified claims. The role ladder is
    /// decided here and nowhere else.
    pub fn from_claims(claims: IdentityClaims) -> Self {
        let role = claims.app_role().to_string();
        let identity = UserIdentity {
            id: claims.sub.clone(),
            role,
            claims,
        };
        if identity.role == ADMIN_ROLE {
            Principal::Admin(identity)
        } else {
            Principal::User(identity)
        }
    }

    pub fn guest(plan_id: ObjectId, participant_id: ObjectId) -> Self {
        Principal::Guest(GuestContext {
            plan_id,
            participant_id,
        })
    }

    /// External user id, present only for token-verified principals.
    /// Guests deliberately have none: an invite token never grants the
    /// standing of an account.
    pub fn user_id(&self) -> Option<&str> {
        match self {
            Principal::User(identity) | Principal::Admin(identity) => Some(&identity.id),
            _ => None,
        }
    }

    pub fn identity(&self) -> Option<&UserIdentity> {
        match self {
            Principal::User(identity) | Principal::Admin(identity) => Some(identity),
            _ => None,
        }
    }

    /// Invite-token scope, present only for guests.
    pub fn guest_context(&self) -> Option<&GuestContext> {
        match self {
            Principal::Guest(context) => Some(context),
            _ => None,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Principal::Admin(_))
    }

    /// True for token-verified principals (user or admin).
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Principal::User(_) | Principal::Admin(_))
    }

    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Principal::Anonymous => "anonymous",
            Principal::User(_) => "user",
            Principal::Admin(_) => "admin",
            Principal::Guest(_) => "guest",
        }
    }
}

/// Pull the token out of an `Authorization: Bearer <token>` header.
pub fn extract_bearer(header: Option<&str>) -> Option<&str> {
    let token = header?.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

/// Turns Authorization headers into principals.
#[derive(Clone)]
pub struct PrincipalResolver {
    verifier: Arc<dyn TokenVerifier>,
}

impl PrincipalResolver {
    pub fn new(verifier: Arc<dyn TokenVerifier>) -> Self {
        PrincipalResolver { verifier }
    }

    /// Optional-auth resolution: a missing or failing credential yields
    /// `Anonymous` instead of an error.
    pub async fn resolve_optional(&self, authorization: Option<&str>) -> Principal {
        let Some(token) = extract_bearer(authorization) else {
            return Principal::Anonymous;
        };

        match self.verifier.verify(token).await {
            Ok(claims) => Principal::from_claims(claims),
            Err(e) => {
                debug!(error = %e, "optional credential failed verification, treating as anonymous");
                Principal::Anonymous
            }
        }
    }

    /// Required-auth resolution: any absent or failing credential is a
    /// 401.
    pub async fn resolve_required(
        &self,
        authorization: Option<&str>,
    ) -> Result<Principal, WaymarkError> {
        let token = extract_bearer(authorization)
            .ok_or_else(|| WaymarkError::Unauthorized("Missing bearer token".to_string()))?;

        let claims = self
            .verifier
            .verify(token)
            .await
            .map_err(|e| WaymarkError::Unauthorized(format!("Invalid token: {e}")))?;

        Ok(Principal::from_claims(claims))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::claims::AppMetadata;
    use crate::auth::verifier::VerifyError;
    use async_trait::async_trait;

    struct StaticVerifier {
        result: Result<IdentityClaims, VerifyError>,
    }

    impl StaticVerifier {
        fn ok(claims: IdentityClaims) -> Arc<Self> {
            Arc::new(StaticVerifier { result: Ok(claims) })
        }

        fn err(err: VerifyError) -> Arc<Self> {
            Arc::new(StaticVerifier { result: Err(err) })
        }
    }

    #[async_trait]
    impl TokenVerifier for StaticVerifier {
        async fn verify(&self, _token: &str) -> Result<IdentityClaims, VerifyError> {
            match &self.result {
                Ok(claims) => Ok(claims.clone()),
                Err(VerifyError::Expired) => Err(VerifyError::Expired),
                Err(VerifyError::InvalidSignature) => Err(VerifyError::InvalidSignature),
                Err(e) => Err(VerifyError::Malformed(e.to_string())),
            }
        }
    }

    fn user_claims(sub: &str) -> IdentityClaims {
        IdentityClaims {
            sub: sub.to_string(),
            ..Default::default()
        }
    }

    fn admin_claims(sub: &str) -> IdentityClaims {
        IdentityClaims {
            sub: sub.to_string(),
            app_metadata: Some(AppMetadata {
                role: Some("admin".to_string()),
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_extract_bearer() {
        assert_eq!(extract_bearer(Some("Bearer abc123")), Some("abc123"));
        assert_eq!(extract_bearer(Some("Bearer ")), None);
        assert_eq!(extract_bearer(Some("Basic abc123")), None);
        assert_eq!(extract_bearer(None), None);
    }

    #[test]
    fn test_role_ladder() {
        let user = Principal::from_claims(user_claims("u1"));
        assert!(matches!(user, Principal::User(_)));
        assert!(!user.is_admin());
        assert!(user.is_authenticated());
        assert_eq!(user.user_id(), Some("u1"));

        let admin = Principal::from_claims(admin_claims("a1"));
        assert!(admin.is_admin());
        assert!(admin.is_authenticated());
    }

    #[test]
    fn test_guest_has_no_user_id() {
        let guest = Principal::guest(ObjectId::new(), ObjectId::new());
        assert!(guest.user_id().is_none());
        assert!(!guest.is_authenticated());
        assert!(!guest.is_admin());
        assert_eq!(guest.kind(), "guest");
    }

    #[tokio::test]
    async fn test_resolve_optional_without_header() {
        let resolver = PrincipalResolver::new(StaticVerifier::ok(user_claims("u1")));
        let principal = resolver.resolve_optional(None).await;
        assert!(matches!(principal, Principal::Anonymous));
    }

    #[tokio::test]
    async fn test_resolve_optional_degrades_on_bad_token() {
        let resolver = PrincipalResolver::new(StaticVerifier::err(VerifyError::Expired));
        let principal = resolver
            .resolve_optional(Some("Bearer expired-token"))
            .await;
        assert!(matches!(principal, Principal::Anonymous));
    }

    #[tokio::test]
    async fn test_resolve_optional_with_valid_token() {
        let resolver = PrincipalResolver::new(StaticVerifier::ok(admin_claims("a1")));
        let principal = resolver.resolve_optional(Some("Bearer good")).await;
        assert!(principal.is_admin());
    }

    #[tokio::test]
    async fn test_resolve_required_rejects_missing_header() {
        let resolver = PrincipalResolver::new(StaticVerifier::ok(user_claims("u1")));
        let err = resolver.resolve_required(None).await.unwrap_err();
        assert!(matches!(err, WaymarkError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_resolve_required_rejects_bad_token() {
        let resolver = PrincipalResolver::new(StaticVerifier::err(VerifyError::InvalidSignature));
        let err = resolver
            .resolve_required(Some("Bearer forged"))
            .await
            .unwrap_err();
        assert!(matches!(err, WaymarkError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_resolve_required_accepts_valid_token() {
        let resolver = PrincipalResolver::new(StaticVerifier::ok(user_claims("u7")));
        let principal = resolver
            .resolve_required(Some("Bearer good"))
            .await
            .unwrap();
        assert_eq!(principal.user_id(), Some("u7"));
    }
}
