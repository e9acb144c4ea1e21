//! Authentication and identity for Waymark
//!
//! Provides:
//! - Identity token verification (JWKS or shared secret)
//! - Principal resolution with required/optional modes
//! - Invite token generation for guest access

pub mod claims;
pub mod invite_token;
pub mod principal;
pub mod verifier;

pub use claims::{IdentityClaims, ADMIN_ROLE, DEFAULT_ROLE};
pub use invite_token::{generate_invite_token, is_well_formed, INVITE_TOKEN_LEN};
pub use principal::{extract_bearer, GuestContext, Principal, PrincipalResolver, UserIdentity};
pub use verifier::{JwksVerifier, SharedSecretVerifier, TokenVerifier, VerifyError};
