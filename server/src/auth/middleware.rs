//! Authentication middleware.
//!
//! Devices present the shared `AUTH_SECRET` as a bearer token. Without a
//! configured secret the server runs open, which is how local development
//! and the test suite use it.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};

use crate::error::AppError;
use crate::AppState;

/// Authenticated caller extracted from the request.
#[derive(Debug, Clone)]
pub struct AuthUser {
    /// The bearer token, or "anonymous" when auth is off
    pub token: String,
}

impl AuthUser {
    pub fn is_anonymous(&self) -> bool {
        self.token == "anonymous"
    }
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());

        match (auth_header, state.config.auth_secret.as_deref()) {
            (Some(header), secret) if header.starts_with("Bearer ") => {
                let token = header.trim_start_matches("Bearer ").to_string();
                if token.is_empty() {
                    return Err(AppError::Unauthorized("empty bearer token"));
                }
                if secret.is_some_and(|secret| !tokens_match(secret, &token)) {
                    return Err(AppError::Unauthorized("invalid bearer token"));
                }
                Ok(AuthUser { token })
            }
            (Some(_), _) => Err(AppError::Unauthorized(
                "invalid authorization header format",
            )),
            (None, None) => Ok(AuthUser {
                token: "anonymous".to_string(),
            }),
            (None, Some(_)) => Err(AppError::Unauthorized("missing authorization header")),
        }
    }
}

/// Compare without short-circuiting on the first differing byte.
fn tokens_match(expected: &str, given: &str) -> bool {
    let (a, b) = (expected.as_bytes(), given.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_comparison() {
        assert!(tokens_match("s3cret", "s3cret"));
        assert!(!tokens_match("s3cret", "s3creT"));
        assert!(!tokens_match("s3cret", "s3cret2"));
    }
}
