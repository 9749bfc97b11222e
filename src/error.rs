use std::time::Duration;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("provider handshake is missing the access or refresh token")]
    InvalidTokens,
    #[error("failed to refresh access token: {0}")]
    RefreshAccessToken(#[from] RefreshError),
    #[error("identity provider unavailable: {0}")]
    ProviderUnavailable(String),
    #[error("{operation} failed with status {status}: {detail}")]
    Provider {
        operation: &'static str,
        status: u16,
        detail: String,
    },
    #[error("too many attempts, retry in {} seconds", retry_after.as_secs())]
    RateLimited { retry_after: Duration },
    #[error("configuration error: {0}")]
    Config(String),
    #[cfg(feature = "provider")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Why a token refresh did not produce a usable credential.
///
/// `Clone` because every caller attached to one coalesced refresh receives
/// the same outcome.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum RefreshError {
    #[error("credential has no refresh token")]
    MissingRefreshToken,
    #[error("token endpoint returned {status}: {detail}")]
    Rejected { status: u16, detail: String },
    #[error("malformed token response: {0}")]
    MalformedResponse(String),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("refresh task aborted")]
    Aborted,
}

#[cfg(feature = "provider")]
impl From<reqwest::Error> for RefreshError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::MalformedResponse(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}
