//! Opaque bearer tokens.
//!
//! Tokens are random bytes rendered as lowercase hex. Only SHA-256 hashes of
//! issued tokens are kept, and hashes are compared in constant time.

use async_trait::async_trait;
use dashmap::DashMap;
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::{Auth, AuthError, Identity};

/// Default token entropy in bytes.
pub const DEFAULT_TOKEN_BYTES: usize = 32;

/// Generate a random token of `n_bytes` bytes, hex-encoded (length `2 * n_bytes`).
pub fn generate_token(n_bytes: usize) -> Result<String, AuthError> {
    if n_bytes == 0 {
        return Err(AuthError::Generation("n_bytes must be > 0".to_string()));
    }
    let mut buf = vec![0u8; n_bytes];
    OsRng
        .try_fill_bytes(&mut buf)
        .map_err(|e| AuthError::Generation(e.to_string()))?;
    Ok(to_hex(&buf))
}

/// Hex-encoded SHA-256 of `token`.
pub fn hash_token(token: &str) -> String {
    to_hex(&Sha256::digest(token.as_bytes()))
}

/// Whether `token` hashes to `hash_hex`, compared in constant time.
pub fn compare_token_hash(hash_hex: &str, token: &str) -> bool {
    if hash_hex.is_empty() || token.is_empty() {
        return false;
    }
    constant_time_eq(hash_token(token).as_bytes(), hash_hex.as_bytes())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn to_hex(bytes: &[u8]) -> String {
    const DIGITS: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push(DIGITS[(b >> 4) as usize] as char);
        out.push(DIGITS[(b & 0x0f) as usize] as char);
    }
    out
}

/// Issues and verifies bearer tokens held in memory.
#[derive(Debug)]
pub struct TokenAuth {
    /// Token hash -> subject.
    tokens: DashMap<String, String>,
    token_bytes: usize,
}

impl Default for TokenAuth {
    fn default() -> Self {
        Self::new(DEFAULT_TOKEN_BYTES)
    }
}

impl TokenAuth {
    pub fn new(token_bytes: usize) -> Self {
        Self {
            tokens: DashMap::new(),
            token_bytes,
        }
    }

    /// Issue a new token for `subject`. The plaintext is returned once and
    /// never stored.
    pub fn issue(&self, subject: impl Into<String>) -> Result<String, AuthError> {
        let token = generate_token(self.token_bytes)?;
        let subject = subject.into();
        debug!(subject = %subject, "issued token");
        self.tokens.insert(hash_token(&token), subject);
        Ok(token)
    }

    /// Trust an already-issued token by its hash.
    pub fn insert_hash(&self, hash_hex: impl Into<String>, subject: impl Into<String>) {
        self.tokens.insert(hash_hex.into(), subject.into());
    }

    /// Revoke `token`. Returns whether it was known.
    pub fn revoke(&self, token: &str) -> bool {
        self.tokens.remove(&hash_token(token)).is_some()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl Auth for TokenAuth {
    async fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }
        // Scan every entry so timing does not depend on which hash matched.
        let mut subject = None;
        for entry in self.tokens.iter() {
            if compare_token_hash(entry.key(), token) && subject.is_none() {
                subject = Some(entry.value().clone());
            }
        }
        subject
            .map(|subject| Identity { subject })
            .ok_or(AuthError::InvalidToken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_generate_token_length_and_charset() {
        let token = generate_token(16).unwrap();
        assert_eq!(token.len(), 32);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_generate_token_rejects_zero() {
        assert!(matches!(generate_token(0), Err(AuthError::Generation(_))));
    }

    #[test]
    fn test_tokens_are_unique() {
        let a = generate_token(32).unwrap();
        let b = generate_token(32).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_hash_token_known_vector() {
        assert_eq!(
            hash_token("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_compare_token_hash() {
        let hash = hash_token("secret");
        assert!(compare_token_hash(&hash, "secret"));
        assert!(!compare_token_hash(&hash, "Secret"));
        assert!(!compare_token_hash("", "secret"));
        assert!(!compare_token_hash(&hash, ""));
        assert!(!compare_token_hash(&hash[..10], "secret"));
    }

    #[tokio::test]
    async fn test_issue_verify_revoke() {
        let auth = TokenAuth::default();
        let token = auth.issue("scheduler").unwrap();
        assert_eq!(token.len(), DEFAULT_TOKEN_BYTES * 2);

        let identity = auth.verify(&token).await.unwrap();
        assert_eq!(identity.subject, "scheduler");

        assert!(auth.revoke(&token));
        assert_eq!(auth.verify(&token).await, Err(AuthError::InvalidToken));
        assert!(!auth.revoke(&token));
    }

    #[tokio::test]
    async fn test_verify_empty_and_unknown() {
        let auth = TokenAuth::default();
        auth.issue("a").unwrap();
        assert_eq!(auth.verify("").await, Err(AuthError::MissingToken));
        assert_eq!(auth.verify("deadbeef").await, Err(AuthError::InvalidToken));
    }

    #[tokio::test]
    async fn test_insert_hash_trusts_external_token() {
        let auth = TokenAuth::default();
        auth.insert_hash(hash_token("from-config"), "ops");
        assert_eq!(auth.verify("from-config").await.unwrap().subject, "ops");
    }

    proptest! {
        #[test]
        fn hash_matches_only_its_token(a in "[ -~]{1,40}", b in "[ -~]{1,40}") {
            let hash = hash_token(&a);
            prop_assert!(compare_token_hash(&hash, &a));
            prop_assert_eq!(compare_token_hash(&hash, &b), a == b);
        }

        #[test]
        fn hex_is_twice_the_bytes(n in 1usize..64) {
            prop_assert_eq!(generate_token(n).unwrap().len(), n * 2);
        }
    }
}
