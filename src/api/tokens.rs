//! Opaque bearer tokens: generation, hashing, and scoped resolution.
//!
//! A token's plaintext is handed out exactly once (to the issuing request
//! and, for activation, the mail that carries it); only the SHA-256 hash is
//! stored. Lookup requires hash, scope and a live expiry in one predicate,
//! so "never existed" and "expired" are indistinguishable to callers.

use crate::api::store::{Store, StoreError, User};
use chrono::{DateTime, Duration, Utc};
use rand::{rngs::OsRng, RngCore};
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Length of an encoded plaintext: 16 random bytes in unpadded base32.
pub const TOKEN_LENGTH: usize = 26;

const SECRET_BYTES: usize = 16;
const BASE32_ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Activation,
    Authentication,
}

impl Scope {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Activation => "activation",
            Self::Authentication => "authentication",
        }
    }
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("must be 26 bytes long")]
    Malformed,
    #[error("record not found")]
    NotFound,
    #[error("failed to generate token secret")]
    Generate(#[source] rand::Error),
    #[error(transparent)]
    Store(StoreError),
}

/// An issued credential. Only `token` and `expiry` are client-visible.
#[derive(Debug, Clone, Serialize)]
pub struct Token {
    #[serde(rename = "token")]
    pub plaintext: String,
    pub expiry: DateTime<Utc>,
    #[serde(skip)]
    pub hash: Vec<u8>,
    #[serde(skip)]
    pub user_id: i64,
    #[serde(skip)]
    pub scope: Scope,
}

fn generate(user_id: i64, ttl: Duration, scope: Scope) -> Result<Token, TokenError> {
    let mut secret = [0u8; SECRET_BYTES];
    OsRng
        .try_fill_bytes(&mut secret)
        .map_err(TokenError::Generate)?;

    let plaintext = base32_encode(&secret);
    let hash = hash_plaintext(&plaintext);

    Ok(Token {
        plaintext,
        expiry: Utc::now() + ttl,
        hash,
        user_id,
        scope,
    })
}

/// RFC 4648 base32, no padding.
fn base32_encode(data: &[u8]) -> String {
    let mut encoded = String::with_capacity(data.len().div_ceil(5) * 8);
    let mut buffer: u32 = 0;
    let mut bits = 0;

    for &byte in data {
        buffer = (buffer << 8) | u32::from(byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            encoded.push(BASE32_ALPHABET[((buffer >> bits) & 0x1f) as usize] as char);
        }
    }
    if bits > 0 {
        encoded.push(BASE32_ALPHABET[((buffer << (5 - bits)) & 0x1f) as usize] as char);
    }

    encoded
}

/// Hash a plaintext token for storage or lookup; raw tokens never reach the
/// database.
#[must_use]
pub fn hash_plaintext(plaintext: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(plaintext.as_bytes());
    hasher.finalize().to_vec()
}

/// Pure shape check; runs before any storage round trip.
///
/// # Errors
/// Returns [`TokenError::Malformed`] unless the plaintext is exactly
/// [`TOKEN_LENGTH`] bytes.
pub fn validate_plaintext(plaintext: &str) -> Result<(), TokenError> {
    if plaintext.is_empty() || plaintext.len() != TOKEN_LENGTH {
        return Err(TokenError::Malformed);
    }
    Ok(())
}

/// Create and persist a credential for `user_id`.
///
/// # Errors
/// Returns an error if secret generation or persistence fails; the plaintext
/// is dropped with the token and never logged.
pub async fn issue(
    store: &dyn Store,
    user_id: i64,
    ttl: Duration,
    scope: Scope,
) -> Result<Token, TokenError> {
    let token = generate(user_id, ttl, scope)?;
    store.insert_token(&token).await.map_err(TokenError::Store)?;
    Ok(token)
}

/// Resolve a presented plaintext back to its owner.
///
/// # Errors
/// [`TokenError::Malformed`] on a bad shape (no storage call),
/// [`TokenError::NotFound`] when no live credential matches hash + scope.
pub async fn resolve(store: &dyn Store, scope: Scope, plaintext: &str) -> Result<User, TokenError> {
    validate_plaintext(plaintext)?;

    let hash = hash_plaintext(plaintext);
    match store.user_for_token(scope, &hash, Utc::now()).await {
        Ok(user) => Ok(user),
        Err(StoreError::RecordNotFound) => Err(TokenError::NotFound),
        Err(err) => Err(TokenError::Store(err)),
    }
}

/// Delete every credential for the owner and scope. Idempotent.
///
/// # Errors
/// Returns an error only when storage fails; deleting zero rows is fine.
pub async fn revoke_all(store: &dyn Store, scope: Scope, user_id: i64) -> Result<(), TokenError> {
    store
        .delete_tokens(scope, user_id)
        .await
        .map_err(TokenError::Store)
}
