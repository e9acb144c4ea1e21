//! Invite token generation and shape checks
//!
//! An invite token is the bearer credential for guest access to a
//! single plan. 32 random bytes, hex-encoded, so the token is URL-safe
//! without further escaping and carries enough entropy that guessing
//! is not a concern.

use rand::Rng;

/// Length of an encoded invite token in characters.
pub const INVITE_TOKEN_LEN: usize = 64;

/// Generate a fresh invite token: 32 random bytes as lowercase hex.
pub fn generate_invite_token() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.gen();
    hex::encode(bytes)
}

/// Cheap shape check performed before any storage lookup, so obviously
/// bogus tokens never touch the database.
pub fn is_well_formed(token: &str) -> bool {
    token.len() == INVITE_TOKEN_LEN
        && token
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_token_shape() {
        let token = generate_invite_token();
        assert_eq!(token.len(), INVITE_TOKEN_LEN);
        assert!(is_well_formed(&token));
    }

    #[test]
    fn test_tokens_are_unique() {
        let a = generate_invite_token();
        let b = generate_invite_token();
        assert_ne!(a, b);
    }

    #[test]
    fn test_rejects_wrong_length() {
        assert!(!is_well_formed(""));
        assert!(!is_well_formed("abc123"));
        assert!(!is_well_formed(&"a".repeat(63)));
        assert!(!is_well_formed(&"a".repeat(65)));
    }

    #[test]
    fn test_rejects_non_hex() {
        let mut token = "a".repeat(63);
        token.push('g');
        assert!(!is_well_formed(&token));

        let upper = "A".repeat(64);
        assert!(!is_well_formed(&upper));
    }

    #[test]
    fn test_accepts_all_hex_digits() {
        let token = "0123456789abcdef".repeat(4);
        assert_eq!(token.len(), 64);
        assert!(is_well_formed(&token));
    }
}
