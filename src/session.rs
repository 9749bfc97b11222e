use std::sync::Arc;
use std::time::Duration;

use http::HeaderValue;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::credential::{CredentialState, SessionCredential, SessionErrorKind, UserSnapshot};
use crate::refresh::RefreshCoordinator;
use crate::traits::{TokenEndpoint, TokenRevoker};
use crate::types::{AccessToken, RefreshToken};

/// Upper bound for the provider revocation call during sign-out.
pub const REVOCATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Token pair handed over by the (external) authorization-code exchange.
///
/// `expires_at` is in seconds since the Unix epoch, as OIDC providers
/// report it; `expires_in` is used when `expires_at` is absent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderHandshake {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_at: Option<i64>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub user: Option<UserSnapshot>,
}

impl ProviderHandshake {
    #[must_use]
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: Some(access_token.into()),
            refresh_token: Some(refresh_token.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_expires_at(mut self, unix_seconds: i64) -> Self {
        self.expires_at = Some(unix_seconds);
        self
    }

    #[must_use]
    pub fn with_expires_in(mut self, seconds: u64) -> Self {
        self.expires_in = Some(seconds);
        self
    }

    #[must_use]
    pub fn with_user(mut self, user: UserSnapshot) -> Self {
        self.user = Some(user);
        self
    }
}

/// What prompted a freshness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionTrigger {
    /// Ordinary request: errored credentials are returned as they are.
    #[default]
    Request,
    /// Explicit session update: an errored credential gets one forced
    /// refresh attempt.
    Update,
}

/// The only session view that may reach presentation code.
///
/// Raw tokens are not representable here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicSessionView {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<SessionErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserSnapshot>,
    pub token_present: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub expires: OffsetDateTime,
}

impl PublicSessionView {
    /// No error and not past `expires` at `now`.
    #[must_use]
    pub fn is_valid_at(&self, now: OffsetDateTime) -> bool {
        self.error.is_none() && self.token_present && now < self.expires
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.is_valid_at(OffsetDateTime::now_utc())
    }
}

impl From<&SessionCredential> for PublicSessionView {
    fn from(credential: &SessionCredential) -> Self {
        Self {
            error: credential.error(),
            user: credential.user().cloned(),
            token_present: credential.access_token().is_some(),
            expires: credential.expires_at(),
        }
    }
}

/// Result of the remote half of sign-out. Informational: the local
/// credential is discarded regardless.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignOutOutcome {
    Revoked,
    Failed,
    TimedOut,
    /// No refresh token, nothing to revoke.
    Skipped,
}

/// Error codes the provider redirect may carry back to the login surface
/// (`/login?error=<code>`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginErrorCode {
    Configuration,
    AccessDenied,
    Verification,
    Callback,
    OAuthAccountNotLinked,
    Other(String),
}

impl LoginErrorCode {
    #[must_use]
    pub fn parse(code: &str) -> Self {
        match code {
            "Configuration" => Self::Configuration,
            "AccessDenied" => Self::AccessDenied,
            "Verification" => Self::Verification,
            "Callback" => Self::Callback,
            "OAuthAccountNotLinked" => Self::OAuthAccountNotLinked,
            other => Self::Other(other.to_owned()),
        }
    }

    /// Message shown on the login page.
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Configuration => {
                "Authentication service configuration error. Please contact support."
            }
            Self::AccessDenied => "Access denied. Please check your credentials.",
            Self::Verification => "Unable to verify your identity. Please try again.",
            Self::Callback => "Authentication callback failed. Please try again.",
            Self::OAuthAccountNotLinked => {
                "Account not linked. Please use the same authentication method."
            }
            Self::Other(_) => "Authentication failed. Please try again.",
        }
    }

    /// A configuration error means the provider is unusable; sign-in
    /// controls should be disabled.
    #[must_use]
    pub fn disables_sign_in(&self) -> bool {
        matches!(self, Self::Configuration)
    }
}

/// Orchestrates credential creation, renewal, projection and teardown.
pub struct SessionLifecycleManager<E, R = E> {
    coordinator: RefreshCoordinator<E>,
    revoker: Arc<R>,
    revocation_timeout: Duration,
}

// Manual Clone: avoid derive adding `E: Clone, R: Clone` bounds.
impl<E, R> Clone for SessionLifecycleManager<E, R> {
    fn clone(&self) -> Self {
        Self {
            coordinator: self.coordinator.clone(),
            revoker: self.revoker.clone(),
            revocation_timeout: self.revocation_timeout,
        }
    }
}

impl<P: TokenEndpoint + TokenRevoker> SessionLifecycleManager<P, P> {
    /// One provider serving both refresh and revocation.
    #[must_use]
    pub fn new(provider: P) -> Self {
        let provider = Arc::new(provider);
        Self {
            coordinator: RefreshCoordinator::from_shared(Arc::clone(&provider)),
            revoker: provider,
            revocation_timeout: REVOCATION_TIMEOUT,
        }
    }

    #[must_use]
    pub fn provider(&self) -> &P {
        &self.revoker
    }
}

impl<E: TokenEndpoint, R: TokenRevoker> SessionLifecycleManager<E, R> {
    #[must_use]
    pub fn with_parts(endpoint: E, revoker: R) -> Self {
        Self {
            coordinator: RefreshCoordinator::new(endpoint),
            revoker: Arc::new(revoker),
            revocation_timeout: REVOCATION_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_revocation_timeout(mut self, timeout: Duration) -> Self {
        self.revocation_timeout = timeout;
        self
    }

    #[must_use]
    pub fn coordinator(&self) -> &RefreshCoordinator<E> {
        &self.coordinator
    }

    /// Build the initial credential from a provider handshake.
    ///
    /// A handshake missing either token yields an
    /// [`InvalidTokens`](SessionErrorKind::InvalidTokens) credential that
    /// carries no tokens at all.
    #[must_use]
    pub fn materialize(&self, handshake: ProviderHandshake) -> SessionCredential {
        let access = handshake.access_token.filter(|t| !t.is_empty());
        let refresh = handshake.refresh_token.filter(|t| !t.is_empty());

        let (Some(access), Some(refresh)) = (access, refresh) else {
            tracing::error!("Provider handshake missing required tokens");
            return SessionCredential::errored(SessionErrorKind::InvalidTokens, handshake.user);
        };

        let now = OffsetDateTime::now_utc();
        let expires_at = match (handshake.expires_at, handshake.expires_in) {
            (Some(secs), _) => OffsetDateTime::from_unix_timestamp(secs).ok(),
            (None, Some(secs)) => i64::try_from(secs)
                .ok()
                .and_then(|secs| now.checked_add(time::Duration::seconds(secs))),
            (None, None) => None,
        }
        // Unknown expiry: stale right away, so the first use refreshes.
        .unwrap_or(OffsetDateTime::UNIX_EPOCH);

        if let Some(user) = &handshake.user {
            tracing::info!(user_id = %user.id, "Session established");
        }

        SessionCredential::new(
            AccessToken::new(access),
            RefreshToken::new(refresh),
            expires_at,
            handshake.user,
        )
    }

    /// Return a credential that is fresh, or errored if it cannot be.
    ///
    /// Fresh credentials are returned unchanged. Stale ones go through the
    /// refresh coordinator. Errored ones are returned unchanged unless
    /// `trigger` is [`SessionTrigger::Update`], which forces exactly one
    /// refresh attempt.
    pub async fn ensure_fresh(
        &self,
        credential: SessionCredential,
        trigger: SessionTrigger,
    ) -> SessionCredential {
        match credential.state() {
            CredentialState::Fresh => credential,
            CredentialState::Stale => self.refresh_or_error(credential).await,
            CredentialState::Errored(kind) => match trigger {
                SessionTrigger::Update => {
                    tracing::info!(error = %kind, "Forcing refresh of errored session on update");
                    self.refresh_or_error(credential).await
                }
                SessionTrigger::Request => credential,
            },
        }
    }

    async fn refresh_or_error(&self, credential: SessionCredential) -> SessionCredential {
        match self.coordinator.refresh(&credential).await {
            Ok(renewed) => renewed,
            Err(e) => {
                tracing::warn!(error = %e, "Session refresh failed, re-authentication required");
                credential.into_errored(SessionErrorKind::RefreshAccessTokenError)
            }
        }
    }

    /// Presentation-safe projection of `credential`.
    #[must_use]
    pub fn project_for_client(&self, credential: &SessionCredential) -> PublicSessionView {
        PublicSessionView::from(credential)
    }

    /// `Authorization: Bearer …` for outbound API calls, only while the
    /// credential is fresh.
    #[must_use]
    pub fn authorization_header(&self, credential: &SessionCredential) -> Option<HeaderValue> {
        if !credential.is_valid() {
            return None;
        }
        let token = credential.access_token()?;
        let mut value = HeaderValue::try_from(format!("Bearer {}", token.expose())).ok()?;
        value.set_sensitive(true);
        Some(value)
    }

    /// Discard `credential`, revoking its provider session on a best-effort
    /// basis within the revocation timeout.
    pub async fn sign_out(&self, credential: SessionCredential) -> SignOutOutcome {
        let Some(refresh_token) = credential.refresh_token() else {
            return SignOutOutcome::Skipped;
        };

        let outcome = match tokio::time::timeout(
            self.revocation_timeout,
            self.revoker.revoke(refresh_token),
        )
        .await
        {
            Ok(Ok(())) => SignOutOutcome::Revoked,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Provider logout failed, signing out locally");
                SignOutOutcome::Failed
            }
            Err(_) => {
                tracing::warn!(
                    timeout_secs = self.revocation_timeout.as_secs(),
                    "Provider logout timed out, signing out locally"
                );
                SignOutOutcome::TimedOut
            }
        };

        drop(credential);
        outcome
    }
}
