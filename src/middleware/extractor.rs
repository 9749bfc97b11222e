use std::convert::Infallible;

use axum::extract::{FromRequestParts, OptionalFromRequestParts};
use axum::http::HeaderValue;
use axum::http::request::Parts;
use time::OffsetDateTime;

use super::error::AuthError;
use crate::credential::{SessionCredential, UserSnapshot};
use crate::session::SessionLifecycleManager;
use crate::traits::{TokenEndpoint, TokenRevoker};

/// A valid session, placed in request extensions by
/// [`route_gate`](super::route_gate).
///
/// Use as an Axum extractor in handlers behind the gate. Returns
/// `401 Unauthorized` when the gate did not attach a session.
///
/// # Example
///
/// ```rust,ignore
/// async fn balances(session: ActiveSession, State(api): State<Api>) -> impl IntoResponse {
///     api.get("/balances").header(AUTHORIZATION, session.authorization.clone()).send().await
/// }
///
/// // Anonymous visitors welcome
/// async fn home(session: Option<ActiveSession>) -> impl IntoResponse {
///     match session.and_then(|s| s.user) {
///         Some(user) => format!("Welcome back, {}", user.id),
///         None => "Welcome".to_string(),
///     }
/// }
/// ```
#[derive(Debug, Clone)]
pub struct ActiveSession {
    pub user: Option<UserSnapshot>,
    /// `Bearer <access token>`, marked sensitive.
    pub authorization: HeaderValue,
    pub expires_at: OffsetDateTime,
}

impl ActiveSession {
    pub(super) fn from_credential<E: TokenEndpoint, R: TokenRevoker>(
        credential: &SessionCredential,
        sessions: &SessionLifecycleManager<E, R>,
    ) -> Option<Self> {
        let authorization = sessions.authorization_header(credential)?;
        Some(Self {
            user: credential.user().cloned(),
            authorization,
            expires_at: credential.expires_at(),
        })
    }
}

impl<S: Send + Sync> FromRequestParts<S> for ActiveSession {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<ActiveSession>()
            .cloned()
            .ok_or(AuthError::Unauthenticated)
    }
}

impl<S: Send + Sync> OptionalFromRequestParts<S> for ActiveSession {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> Result<Option<Self>, Self::Rejection> {
        Ok(parts.extensions.get::<ActiveSession>().cloned())
    }
}
