//! session-auth — first-party credential and session-token adapter.
//!
//! Purpose
//! - Hash and verify operator passwords (salted SHA-256 digests in a
//!   versioned `sha256$<salt>$<hex>` format).
//! - Issue and verify signed session tokens (HS256 JWT) for the admin APIs.
//!
//! API
//! - `hash_password(password, salt)` → digest string for storage
//! - `verify_password(password, digest)` → `Result<(), AuthError>`
//! - `issue_token(secret, sub, email, ttl)` → `Result<String, AuthError>`
//! - `verify_token(token, secret)` → `Result<VerifiedUser, AuthError>`
//!
//! Notes
//! - Tokens are self-contained; no network round-trip is needed to verify.
//! - Keeps a small public surface so apps don't need to know the internals.

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedUser {
    pub email: String,
    pub sub: String,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing or malformed token")]
    Malformed,
    #[error("signature invalid")]
    SignatureInvalid,
    #[error("token expired")]
    Expired,
    #[error("token signing failed")]
    Signing,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("malformed password digest")]
    BadDigest,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    email: String,
    iat: u64,
    exp: u64,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Issue a session token for the given user, valid for `ttl`.
pub fn issue_token(
    secret: &str,
    sub: &str,
    email: &str,
    ttl: Duration,
) -> Result<String, AuthError> {
    let iat = unix_now();
    let claims = Claims {
        sub: sub.to_string(),
        email: email.to_string(),
        iat,
        exp: iat.saturating_add(ttl.as_secs()),
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|_| AuthError::Signing)
}

/// Verify a session token and return the identity it carries.
pub fn verify_token(token: &str, secret: &str) -> Result<VerifiedUser, AuthError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::InvalidSignature => AuthError::SignatureInvalid,
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::Expired,
        _ => AuthError::Malformed,
    })?;

    let claims = token_data.claims;
    trace!(sub = %claims.sub, "session token verified");
    Ok(VerifiedUser {
        email: claims.email,
        sub: claims.sub,
    })
}

const DIGEST_SCHEME: &str = "sha256";

fn sha256_hex(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b"$");
    hasher.update(password.as_bytes());
    let out = hasher.finalize();
    let mut hex = String::with_capacity(out.len() * 2);
    for b in out {
        let _ = write!(hex, "{:02x}", b);
    }
    hex
}

/// Produce a storable digest for a password. The salt must be unique per
/// user; the caller generates it.
pub fn hash_password(password: &str, salt: &str) -> String {
    format!("{}${}${}", DIGEST_SCHEME, salt, sha256_hex(salt, password))
}

/// Check a password against a stored digest.
pub fn verify_password(password: &str, digest: &str) -> Result<(), AuthError> {
    let mut parts = digest.splitn(3, '$');
    let scheme = parts.next().ok_or(AuthError::BadDigest)?;
    let salt = parts.next().ok_or(AuthError::BadDigest)?;
    let expected = parts.next().ok_or(AuthError::BadDigest)?;
    if scheme != DIGEST_SCHEME || salt.is_empty() || expected.is_empty() {
        return Err(AuthError::BadDigest);
    }
    if sha256_hex(salt, password) == expected {
        Ok(())
    } else {
        Err(AuthError::InvalidCredentials)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret-with-enough-entropy";

    #[test]
    fn token_round_trip() {
        let token =
            issue_token(SECRET, "usr-1", "agent@carebase.example", Duration::from_secs(3600))
                .expect("issued");
        let user = verify_token(&token, SECRET).expect("verified");
        assert_eq!(user.sub, "usr-1");
        assert_eq!(user.email, "agent@carebase.example");
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token =
            issue_token(SECRET, "usr-1", "agent@carebase.example", Duration::from_secs(3600))
                .expect("issued");
        let err = verify_token(&token, "another-secret").unwrap_err();
        assert_eq!(err, AuthError::SignatureInvalid);
    }

    #[test]
    fn expired_token_is_rejected() {
        // Craft a token whose exp is in the past
        let past = unix_now().saturating_sub(3600);
        let claims = Claims {
            sub: "usr-1".into(),
            email: "agent@carebase.example".into(),
            iat: past,
            exp: past + 60,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .expect("encoded");
        let err = verify_token(&token, SECRET).unwrap_err();
        assert_eq!(err, AuthError::Expired);
    }

    #[test]
    fn garbage_token_is_malformed() {
        assert_eq!(verify_token("not.a.jwt", SECRET).unwrap_err(), AuthError::Malformed);
        assert_eq!(verify_token("", SECRET).unwrap_err(), AuthError::Malformed);
    }

    #[test]
    fn password_digest_round_trip() {
        let digest = hash_password("hunter2", "salt-123");
        assert!(digest.starts_with("sha256$salt-123$"));
        assert!(verify_password("hunter2", &digest).is_ok());
        assert_eq!(
            verify_password("wrong", &digest).unwrap_err(),
            AuthError::InvalidCredentials
        );
    }

    #[test]
    fn different_salts_differ() {
        let a = hash_password("hunter2", "salt-a");
        let b = hash_password("hunter2", "salt-b");
        assert_ne!(a, b);
    }

    #[test]
    fn malformed_digests_are_rejected() {
        assert_eq!(
            verify_password("x", "not-a-digest").unwrap_err(),
            AuthError::BadDigest
        );
        assert_eq!(
            verify_password("x", "md5$salt$abcd").unwrap_err(),
            AuthError::BadDigest
        );
        assert_eq!(verify_password("x", "sha256$$").unwrap_err(), AuthError::BadDigest);
    }
}
