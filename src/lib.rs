#![doc = include_str!("../README.md")]

pub mod credential;
pub mod error;
#[cfg(feature = "axum")]
pub mod middleware;
#[cfg(feature = "provider")]
pub mod oauth;
pub mod rate_limit;
pub mod redirect;
pub mod refresh;
pub mod session;
pub mod traits;
pub mod types;
pub mod well_known;

// Re-exports for convenient access
pub use credential::{CredentialState, SessionCredential, SessionErrorKind, UserSnapshot};
pub use error::{Error, RefreshError};
#[cfg(feature = "provider")]
pub use oauth::{OidcConfig, ProviderClient};
pub use rate_limit::RateLimiter;
pub use redirect::{RedirectValidator, SafeRelativePath};
pub use refresh::RefreshCoordinator;
pub use session::{
    LoginErrorCode, ProviderHandshake, PublicSessionView, SessionLifecycleManager,
    SessionTrigger, SignOutOutcome,
};
pub use traits::{IdentityProvider, ProviderProbe, TokenEndpoint, TokenRevoker};
pub use types::{AccessToken, RefreshToken, TokenResponse, UserId};
pub use well_known::OpenIdConfiguration;
