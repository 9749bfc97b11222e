use std::time::Duration;

use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

use super::gate::found;
use crate::credential::SessionErrorKind;

/// Authentication errors for the middleware layer.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No session cookie, or one that failed to decrypt.
    #[error("Not authenticated")]
    Unauthenticated,

    /// The session carries a sticky error and needs a new sign-in.
    #[error("Session expired: {0}")]
    SessionExpired(SessionErrorKind),

    /// Too many sign-in attempts.
    #[error("Too many sign-in attempts, retry in {} seconds", retry_after_secs(.retry_after))]
    RateLimited { retry_after: Duration },

    /// The identity provider cannot be reached.
    #[error("Authentication service unavailable: {0}")]
    ProviderUnavailable(String),

    /// The identity provider rejected an operation.
    #[error("OAuth error: {0}")]
    OAuth(String),

    /// Missing or invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        match self {
            Self::Unauthenticated => (StatusCode::UNAUTHORIZED, self.to_string()).into_response(),
            Self::SessionExpired(kind) => {
                (StatusCode::UNAUTHORIZED, kind.user_message()).into_response()
            }
            Self::RateLimited { retry_after } => {
                let mut response =
                    (StatusCode::TOO_MANY_REQUESTS, self.to_string()).into_response();
                response.headers_mut().insert(
                    RETRY_AFTER,
                    HeaderValue::from(retry_after_secs(&retry_after)),
                );
                response
            }
            Self::ProviderUnavailable(ref reason) => {
                tracing::warn!(reason = %reason, "Identity provider unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Authentication service is currently unavailable. Please try again later.",
                )
                    .into_response()
            }
            Self::OAuth(ref msg) => {
                tracing::warn!(error = %msg, "OAuth operation failed");
                found("/login?error=Callback")
            }
            Self::Config(_) => {
                tracing::error!(error = %self, "Auth internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal error").into_response()
            }
        }
    }
}

impl From<crate::error::Error> for AuthError {
    fn from(e: crate::error::Error) -> Self {
        use crate::error::Error;
        match e {
            Error::RateLimited { retry_after } => Self::RateLimited { retry_after },
            Error::ProviderUnavailable(reason) => Self::ProviderUnavailable(reason),
            Error::Config(msg) => Self::Config(msg),
            Error::InvalidTokens => Self::SessionExpired(SessionErrorKind::InvalidTokens),
            Error::RefreshAccessToken(_) => {
                Self::SessionExpired(SessionErrorKind::RefreshAccessTokenError)
            }
            other => Self::OAuth(other.to_string()),
        }
    }
}

// Whole seconds, rounded up so clients never retry early.
fn retry_after_secs(retry_after: &Duration) -> u64 {
    let secs = retry_after.as_secs();
    if retry_after.subsec_nanos() > 0 || secs == 0 {
        secs + 1
    } else {
        secs
    }
}
