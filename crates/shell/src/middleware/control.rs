//! Bearer-token guard for the cache control endpoints.
//!
//! `POST /_shell/install` and `POST /_shell/activate` make the shell fetch
//! the whole manifest from upstream or swap the serving generation, so they
//! require `Authorization: Bearer <SHELL_CONTROL_TOKEN>`. With no token
//! configured they are refused outright.

use axum::{
    extract::FromRequestParts,
    http::{StatusCode, header, request::Parts},
    response::{IntoResponse, Response},
};
use secrecy::ExposeSecret;
use tracing::warn;

use crate::state::AppState;

/// Extractor that requires the control token.
///
/// ```rust,ignore
/// async fn install(_: RequireControlToken, State(state): State<AppState>) { .. }
/// ```
pub struct RequireControlToken;

/// Why a control request was refused.
#[derive(Debug, PartialEq, Eq)]
pub enum ControlRejection {
    /// No token is configured.
    Disabled,
    /// Missing or wrong bearer token.
    Unauthorized,
}

impl IntoResponse for ControlRejection {
    fn into_response(self) -> Response {
        match self {
            Self::Disabled => (StatusCode::FORBIDDEN, "Control endpoints are disabled").into_response(),
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                [(header::WWW_AUTHENTICATE, "Bearer")],
                "Unauthorized",
            )
                .into_response(),
        }
    }
}

impl FromRequestParts<AppState> for RequireControlToken {
    type Rejection = ControlRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected) = &state.config().control_token else {
            return Err(ControlRejection::Disabled);
        };

        let presented = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim);

        match presented {
            Some(token) if constant_time_eq(token.as_bytes(), expected.expose_secret().as_bytes()) => {
                Ok(Self)
            }
            _ => {
                warn!(path = %parts.uri.path(), "Rejected control request");
                Err(ControlRejection::Unauthorized)
            }
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
