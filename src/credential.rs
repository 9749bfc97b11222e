//! The session credential and its state machine.
//!
//! A [`SessionCredential`] is the whole session: it is serialized into an
//! encrypted cookie and never stored server-side. Its observable state is
//! derived on demand from the clock:
//!
//! ```text
//! Fresh ──(now >= expires_at - 60s)──▶ Stale ──refresh ok──▶ Fresh
//!                                        │
//!                                        └──refresh failed──▶ Errored
//! ```
//!
//! `Errored` is sticky until a forced refresh succeeds.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::{Duration, OffsetDateTime};

use crate::types::{AccessToken, RefreshToken, UserId};

/// Safety margin subtracted from `expires_at` when deciding staleness, so a
/// refresh can finish before the old access token stops working.
pub const EXPIRY_BUFFER: Duration = Duration::seconds(60);

/// Session error codes.
///
/// The lifecycle records only `InvalidTokens` and `RefreshAccessTokenError`
/// on a credential. `NetworkError` and `ExpiredSession` are codes the login
/// surface may receive from clients, so they parse and carry a message too.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionErrorKind {
    /// The provider handshake lacked the access or refresh token.
    InvalidTokens,
    /// Renewing the access token failed.
    RefreshAccessTokenError,
    /// The client could not reach the application or the provider.
    NetworkError,
    /// The session outlived its cookie or provider session.
    ExpiredSession,
}

/// Message for codes that are not recognized.
pub const GENERIC_SESSION_ERROR_MESSAGE: &str =
    "Authentication error occurred. Please sign in again.";

impl SessionErrorKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidTokens => "InvalidTokens",
            Self::RefreshAccessTokenError => "RefreshAccessTokenError",
            Self::NetworkError => "NetworkError",
            Self::ExpiredSession => "ExpiredSession",
        }
    }

    /// Parse a wire code such as `"RefreshAccessTokenError"`.
    #[must_use]
    pub fn parse(code: &str) -> Option<Self> {
        match code {
            "InvalidTokens" => Some(Self::InvalidTokens),
            "RefreshAccessTokenError" => Some(Self::RefreshAccessTokenError),
            "NetworkError" => Some(Self::NetworkError),
            "ExpiredSession" => Some(Self::ExpiredSession),
            _ => None,
        }
    }

    /// Message suitable for the login surface.
    #[must_use]
    pub fn user_message(self) -> &'static str {
        match self {
            Self::InvalidTokens => "Authentication failed. Please sign in again.",
            Self::RefreshAccessTokenError | Self::ExpiredSession => {
                "Your session has expired. Please sign in again."
            }
            Self::NetworkError => "Network error occurred. Please check your connection.",
        }
    }

    /// [`user_message`](Self::user_message) for a raw code, with a generic
    /// fallback for unknown codes.
    #[must_use]
    pub fn message_for_code(code: &str) -> &'static str {
        Self::parse(code).map_or(GENERIC_SESSION_ERROR_MESSAGE, Self::user_message)
    }
}

impl std::fmt::Display for SessionErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity captured at sign-in. Never updated by refreshes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSnapshot {
    pub id: UserId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
}

impl UserSnapshot {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: UserId(id.into()),
            name: None,
            email: None,
            image: None,
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    #[must_use]
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }
}

/// Derived state of a credential at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialState {
    Fresh,
    Stale,
    Errored(SessionErrorKind),
}

/// Access/refresh token pair plus expiry, error and identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCredential {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    access_token: Option<AccessToken>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<RefreshToken>,
    #[serde(with = "time::serde::rfc3339")]
    expires_at: OffsetDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<SessionErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user: Option<UserSnapshot>,
}

impl SessionCredential {
    /// A usable credential. Both tokens are required by construction.
    #[must_use]
    pub fn new(
        access_token: AccessToken,
        refresh_token: RefreshToken,
        expires_at: OffsetDateTime,
        user: Option<UserSnapshot>,
    ) -> Self {
        Self {
            access_token: Some(access_token),
            refresh_token: Some(refresh_token),
            expires_at,
            error: None,
            user,
        }
    }

    /// A credential carrying only an error (and the identity, if known).
    #[must_use]
    pub fn errored(kind: SessionErrorKind, user: Option<UserSnapshot>) -> Self {
        Self {
            access_token: None,
            refresh_token: None,
            expires_at: OffsetDateTime::UNIX_EPOCH,
            error: Some(kind),
            user,
        }
    }

    /// Moves this credential into an error state.
    ///
    /// The access token is dropped; the refresh token is kept so an explicit
    /// update trigger can still attempt a forced refresh.
    #[must_use]
    pub fn into_errored(mut self, kind: SessionErrorKind) -> Self {
        self.access_token = None;
        self.error = Some(kind);
        self
    }

    /// Successor credential after a successful refresh.
    ///
    /// The refresh token is replaced only when the provider rotated it.
    #[must_use]
    pub fn renewed(
        &self,
        access_token: AccessToken,
        expires_at: OffsetDateTime,
        rotated_refresh_token: Option<RefreshToken>,
    ) -> Self {
        Self {
            access_token: Some(access_token),
            refresh_token: rotated_refresh_token.or_else(|| self.refresh_token.clone()),
            expires_at,
            error: None,
            user: self.user.clone(),
        }
    }

    #[must_use]
    pub fn access_token(&self) -> Option<&AccessToken> {
        self.access_token.as_ref()
    }

    #[must_use]
    pub fn refresh_token(&self) -> Option<&RefreshToken> {
        self.refresh_token.as_ref()
    }

    #[must_use]
    pub fn expires_at(&self) -> OffsetDateTime {
        self.expires_at
    }

    /// `expires_at` in milliseconds since the Unix epoch.
    #[must_use]
    pub fn expires_at_millis(&self) -> i64 {
        i64::try_from(self.expires_at.unix_timestamp_nanos() / 1_000_000).unwrap_or(i64::MAX)
    }

    #[must_use]
    pub fn error(&self) -> Option<SessionErrorKind> {
        self.error
    }

    #[must_use]
    pub fn user(&self) -> Option<&UserSnapshot> {
        self.user.as_ref()
    }

    /// Classifies the credential at `now`.
    ///
    /// A credential without an access token and without a recorded error is
    /// `Stale`: only a refresh can make it usable again.
    #[must_use]
    pub fn state_at(&self, now: OffsetDateTime) -> CredentialState {
        if let Some(kind) = self.error {
            return CredentialState::Errored(kind);
        }
        if self.access_token.is_none() || now >= self.expires_at - EXPIRY_BUFFER {
            return CredentialState::Stale;
        }
        CredentialState::Fresh
    }

    #[must_use]
    pub fn state(&self) -> CredentialState {
        self.state_at(OffsetDateTime::now_utc())
    }

    /// Holds a fresh, error-free access token right now.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.state() == CredentialState::Fresh
    }
}

/// Short, non-reversible identifier of a token for log fields.
#[must_use]
pub fn token_fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    hex::encode(&digest[..6])
}
