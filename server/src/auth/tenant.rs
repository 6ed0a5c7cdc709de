//! Tenant identity from the `X-Tenant-Id` header.

use axum::{extract::FromRequestParts, http::request::Parts};

use crate::error::AppError;
use crate::AppState;

pub const TENANT_HEADER: &str = "x-tenant-id";

/// Tenant every record in the request belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tenant(pub String);

impl Tenant {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromRequestParts<AppState> for Tenant {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(TENANT_HEADER)
            .ok_or_else(|| AppError::BadRequest("missing X-Tenant-Id header".to_string()))?;

        let tenant = value
            .to_str()
            .map_err(|_| AppError::BadRequest("X-Tenant-Id is not valid text".to_string()))?
            .trim();

        if tenant.is_empty() {
            return Err(AppError::BadRequest("empty X-Tenant-Id header".to_string()));
        }

        Ok(Tenant(tenant.to_string()))
    }
}
