//! Identity token claims
//!
//! Shape of the JWT payload issued by the external identity provider.
//! Role and profile data arrive in a handful of places depending on the
//! provider's configuration, so the accessors here centralize the
//! precedence rules instead of spreading optional chains across routes.

use serde::{Deserialize, Serialize};

/// Role granted when the token carries no usable role claim.
pub const DEFAULT_ROLE: &str = "authenticated";

/// Role that unlocks administrative access.
pub const ADMIN_ROLE: &str = "admin";

/// Claims carried by a verified identity token.
///
/// `sub` is the provider's stable user id and the only required field.
/// Everything else is best-effort profile material.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityClaims {
    /// Subject: the external identity id
    pub sub: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Provider's coarse top-level role claim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    /// Expiry, seconds since epoch. Enforced by the verifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_metadata: Option<AppMetadata>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_metadata: Option<UserMetadata>,
}

/// Application-controlled metadata block. The role here wins over the
/// top-level role claim.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// User-controlled profile block.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl IdentityClaims {
    /// Effective application role.
    ///
    /// Precedence: `app_metadata.role`, then the top-level `role`
    /// claim, then [`DEFAULT_ROLE`]. Empty strings count as absent.
    pub fn app_role(&self) -> &str {
        self.app_metadata
            .as_ref()
            .and_then(|m| m.role.as_deref())
            .filter(|r| !r.is_empty())
            .or_else(|| self.role.as_deref().filter(|r| !r.is_empty()))
            .unwrap_or(DEFAULT_ROLE)
    }

    pub fn is_admin(&self) -> bool {
        self.app_role() == ADMIN_ROLE
    }

    /// Best available full-name source: `full_name`, then `name`.
    pub fn display_name(&self) -> Option<&str> {
        let meta = self.user_metadata.as_ref()?;
        meta.full_name
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .or_else(|| meta.name.as_deref().filter(|s| !s.trim().is_empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims_with(
        role: Option<&str>,
        app_role: Option<&str>,
    ) -> IdentityClaims {
        IdentityClaims {
            sub: "user-1".to_string(),
            role: role.map(String::from),
            app_metadata: app_role.map(|r| AppMetadata {
                role: Some(r.to_string()),
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_app_metadata_role_wins() {
        let claims = claims_with(Some("authenticated"), Some("admin"));
        assert_eq!(claims.app_role(), "admin");
        assert!(claims.is_admin());
    }

    #[test]
    fn test_top_level_role_used_when_no_app_metadata() {
        let claims = claims_with(Some("admin"), None);
        assert_eq!(claims.app_role(), "admin");
    }

    #[test]
    fn test_default_role_when_nothing_set() {
        let claims = claims_with(None, None);
        assert_eq!(claims.app_role(), DEFAULT_ROLE);
        assert!(!claims.is_admin());
    }

    #[test]
    fn test_empty_role_treated_as_absent() {
        let claims = claims_with(Some(""), Some(""));
        assert_eq!(claims.app_role(), DEFAULT_ROLE);
    }

    #[test]
    fn test_display_name_prefers_full_name() {
        let claims = IdentityClaims {
            sub: "user-1".to_string(),
            user_metadata: Some(UserMetadata {
                full_name: Some("Ada Lovelace".to_string()),
                name: Some("ada".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(claims.display_name(), Some("Ada Lovelace"));
    }

    #[test]
    fn test_display_name_falls_back_to_name() {
        let claims = IdentityClaims {
            sub: "user-1".to_string(),
            user_metadata: Some(UserMetadata {
                full_name: Some("   ".to_string()),
                name: Some("ada".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(claims.display_name(), Some("ada"));
    }

    #[test]
    fn test_claims_deserialize_with_minimal_payload() {
        let claims: IdentityClaims =
            serde_json::from_str(r#"{"sub":"abc123"}"#).unwrap();
        assert_eq!(claims.sub, "abc123");
        assert_eq!(claims.app_role(), DEFAULT_ROLE);
        assert!(claims.display_name().is_none());
    }
}
