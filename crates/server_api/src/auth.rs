use identity::{
    bearer_token, hash_password, mint_session_token, verify_password, verify_session_token,
    IdentityError, MIN_PASSWORD_LEN,
};
use shared::{
    domain::User,
    error::{ApiError, ErrorCode},
    protocol::{Credentials, SessionResponse},
};
use tracing::{info, warn};

use crate::{internal, ApiContext};

const INVALID_CREDENTIALS: &str = "Invalid login credentials";

pub async fn sign_up(ctx: &ApiContext, credentials: &Credentials) -> Result<User, ApiError> {
    let email = normalize_email(&credentials.email)?;
    if credentials.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::new(
            ErrorCode::Validation,
            format!("password must be at least {MIN_PASSWORD_LEN} characters"),
        ));
    }

    let password_hash = hash_password(&credentials.password).map_err(identity_failure)?;
    let user = ctx
        .storage
        .create_user(&email, &password_hash)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::Conflict, "user already registered"))?;

    info!(user_id = %user.id, "user signed up");
    Ok(user)
}

pub async fn sign_in(
    ctx: &ApiContext,
    credentials: &Credentials,
) -> Result<SessionResponse, ApiError> {
    let email = normalize_email(&credentials.email)?;
    let Some(stored) = ctx
        .storage
        .user_by_email(&email)
        .await
        .map_err(internal)?
    else {
        return Err(ApiError::new(ErrorCode::Unauthenticated, INVALID_CREDENTIALS));
    };

    if !verify_password(&credentials.password, &stored.password_hash).map_err(identity_failure)? {
        warn!(user_id = %stored.user.id, "rejected sign-in with wrong password");
        return Err(ApiError::new(ErrorCode::Unauthenticated, INVALID_CREDENTIALS));
    }

    let issued = mint_session_token(&ctx.sessions, &stored.user).map_err(identity_failure)?;
    Ok(SessionResponse {
        access_token: issued.token,
        token_type: "bearer".into(),
        expires_at: issued.expires_at,
        user: stored.user,
    })
}

/// Resolves the `Authorization` header of a request to the calling user.
pub fn authenticate(ctx: &ApiContext, authorization: Option<&str>) -> Result<User, ApiError> {
    let token = authorization
        .and_then(bearer_token)
        .ok_or_else(ApiError::unauthenticated)?;
    verify_session_token(&ctx.sessions, token).map_err(identity_failure)
}

fn normalize_email(raw: &str) -> Result<String, ApiError> {
    let email = raw.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "a valid email address is required",
        ));
    }
    Ok(email)
}

fn identity_failure(err: IdentityError) -> ApiError {
    match err {
        IdentityError::InvalidToken => ApiError::unauthenticated(),
        other => ApiError::new(ErrorCode::Internal, other.to_string()),
    }
}

#[cfg(test)]
#[path = "tests/auth_tests.rs"]
mod tests;
