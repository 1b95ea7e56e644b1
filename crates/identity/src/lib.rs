//! Credential handling for the built-in identity service: Argon2id password
//! hashes and HS256 bearer tokens.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use shared::domain::{User, UserId};
use thiserror::Error;

pub const TOKEN_ISSUER: &str = "maklerbuero-identity";
pub const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub secret: String,
    pub ttl_seconds: i64,
}

#[derive(Debug, Error)]
pub enum IdentityError {
    /// Malformed, forged or expired token. Callers surface this as 401.
    #[error("invalid or expired session token")]
    InvalidToken,
    #[error("password hashing failed: {0}")]
    Hash(String),
    #[error("session token signing failed: {0}")]
    Signing(String),
}

#[derive(Debug, Serialize, Deserialize)]
struct SessionClaims {
    iss: String,
    sub: UserId,
    email: String,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

pub fn mint_session_token(cfg: &SessionConfig, user: &User) -> Result<IssuedToken, IdentityError> {
    let now = Utc::now();
    let exp = now + Duration::seconds(cfg.ttl_seconds);
    let claims = SessionClaims {
        iss: TOKEN_ISSUER.to_string(),
        sub: user.id,
        email: user.email.clone(),
        iat: now.timestamp(),
        exp: exp.timestamp(),
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(cfg.secret.as_bytes()),
    )
    .map_err(|e| IdentityError::Signing(e.to_string()))?;

    let expires_at = Utc
        .timestamp_opt(claims.exp, 0)
        .single()
        .unwrap_or(exp);
    Ok(IssuedToken { token, expires_at })
}

/// Resolves a bearer token to the user it was minted for.
pub fn verify_session_token(cfg: &SessionConfig, token: &str) -> Result<User, IdentityError> {
    let mut validation = Validation::default();
    validation.set_issuer(&[TOKEN_ISSUER]);
    validation.leeway = 0;

    let data = decode::<SessionClaims>(
        token,
        &DecodingKey::from_secret(cfg.secret.as_bytes()),
        &validation,
    )
    .map_err(|e| match e.kind() {
        ErrorKind::InvalidKeyFormat | ErrorKind::Crypto(_) => {
            IdentityError::Signing(e.to_string())
        }
        _ => IdentityError::InvalidToken,
    })?;

    Ok(User {
        id: data.claims.sub,
        email: data.claims.email,
    })
}

pub fn hash_password(password: &str) -> Result<String, IdentityError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| IdentityError::Hash(e.to_string()))
}

/// Parameters are read from the stored PHC string, not from the defaults.
pub fn verify_password(password: &str, stored_hash: &str) -> Result<bool, IdentityError> {
    let parsed = PasswordHash::new(stored_hash).map_err(|e| IdentityError::Hash(e.to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

/// Extracts the credential from an `Authorization` header value.
pub fn bearer_token(header_value: &str) -> Option<&str> {
    let (scheme, token) = header_value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
