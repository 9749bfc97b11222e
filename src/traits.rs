use std::future::Future;

use crate::error::{Error, RefreshError};
use crate::types::{RefreshToken, TokenResponse};

/// The identity provider's token endpoint, as seen by the refresh path.
///
/// [`ProviderClient`](crate::oauth::ProviderClient) is the production
/// implementation. Tests substitute counting or failing endpoints.
///
/// # Example
///
/// ```rust,ignore
/// impl TokenEndpoint for StaticEndpoint {
///     async fn refresh_token(
///         &self,
///         _refresh_token: &RefreshToken,
///     ) -> Result<TokenResponse, RefreshError> {
///         Ok(TokenResponse::new("new-access-token", 300))
///     }
/// }
/// ```
pub trait TokenEndpoint: Send + Sync + 'static {
    /// Perform one `grant_type=refresh_token` exchange.
    ///
    /// Implementations must not retry.
    fn refresh_token(
        &self,
        refresh_token: &RefreshToken,
    ) -> impl Future<Output = Result<TokenResponse, RefreshError>> + Send;
}

/// Provider-side session revocation, called on sign-out.
pub trait TokenRevoker: Send + Sync + 'static {
    /// End the provider session bound to `refresh_token`.
    ///
    /// Callers bound this with a timeout; implementations may block for as
    /// long as the network does.
    fn revoke(&self, refresh_token: &RefreshToken)
    -> impl Future<Output = Result<(), Error>> + Send;
}

/// Cheap reachability check used before starting a sign-in.
pub trait ProviderProbe: Send + Sync + 'static {
    fn check_availability(&self) -> impl Future<Output = Result<(), Error>> + Send;
}

/// Everything the route gate needs from an identity provider.
pub trait IdentityProvider: TokenEndpoint + TokenRevoker + ProviderProbe {}

impl<T: TokenEndpoint + TokenRevoker + ProviderProbe> IdentityProvider for T {}
