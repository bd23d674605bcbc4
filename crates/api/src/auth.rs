//! Service-credential authentication.
//!
//! The worker has a single long-lived credential (`SERVICE_KEY`) that the
//! calling platform presents as a bearer token. Download retrieval may
//! alternatively present a signed, time-limited download token; that path
//! is handled in the download handler itself.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use subtle::ConstantTimeEq;

use prebake_core::error::CoreError;

use crate::error::AppError;
use crate::state::AppState;

/// Proof that the request carried the long-lived service credential.
///
/// Use as an extractor parameter in any handler that requires it:
///
/// ```ignore
/// async fn my_handler(_key: ServiceKey) -> AppResult<Json<()>> { ... }
/// ```
#[derive(Debug, Clone, Copy)]
pub struct ServiceKey;

impl FromRequestParts<AppState> for ServiceKey {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                AppError::Core(CoreError::Unauthorized(
                    "Missing Authorization header".into(),
                ))
            })?;

        let presented = auth_header.strip_prefix("Bearer ").ok_or_else(|| {
            AppError::Core(CoreError::Unauthorized(
                "Invalid Authorization format. Expected: Bearer <key>".into(),
            ))
        })?;

        if key_matches(presented, &state.config.service_key) {
            Ok(ServiceKey)
        } else {
            Err(AppError::Core(CoreError::Unauthorized(
                "Invalid service key".into(),
            )))
        }
    }
}

/// Constant-time comparison; length mismatch yields a zero choice
/// without short-circuiting.
pub fn key_matches(presented: &str, expected: &str) -> bool {
    presented.as_bytes().ct_eq(expected.as_bytes()).into()
}
