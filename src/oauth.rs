use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use url::Url;

use crate::error::{Error, RefreshError};
use crate::traits::{ProviderProbe, TokenEndpoint, TokenRevoker};
use crate::types::{RefreshToken, TokenResponse};
use crate::well_known::{OPENID_CONFIGURATION_PATH, OpenIdConfiguration};

/// Upper bound for the discovery probe.
pub const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Default upper bound for one refresh-grant exchange.
pub const REFRESH_TIMEOUT: Duration = Duration::from_secs(10);

/// OIDC client configuration for a Keycloak-style issuer.
///
/// Required fields are constructor parameters. Endpoint URLs default to the
/// Keycloak layout under the issuer and can be overridden.
///
/// ```rust,ignore
/// use oidc_session_gate::OidcConfig;
///
/// let config = OidcConfig::new(
///     "https://idp.example/realms/bank".parse()?,
///     "web-frontend",
///     "client-secret",
/// )?
/// .with_token_url("https://idp.example/custom/token".parse()?);
/// ```
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct OidcConfig {
    pub(crate) issuer: Url,
    pub(crate) client_id: String,
    pub(crate) client_secret: SecretString,
    pub(crate) token_url: Url,
    pub(crate) logout_url: Url,
    pub(crate) discovery_url: Url,
}

impl OidcConfig {
    /// Create a configuration rooted at `issuer`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the derived endpoint URLs are invalid.
    pub fn new(
        issuer: Url,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Result<Self, Error> {
        let token_url = issuer_endpoint(&issuer, "protocol/openid-connect/token")?;
        let logout_url = issuer_endpoint(&issuer, "protocol/openid-connect/logout")?;
        let discovery_url = issuer_endpoint(&issuer, OPENID_CONFIGURATION_PATH)?;

        Ok(Self {
            issuer,
            client_id: client_id.into(),
            client_secret: SecretString::from(client_secret.into()),
            token_url,
            logout_url,
            discovery_url,
        })
    }

    /// Create config from environment variables.
    ///
    /// # Required env vars
    /// - `OIDC_ISSUER`: issuer URL (e.g. `https://idp.example/realms/bank`)
    /// - `OIDC_CLIENT_ID`: OAuth2 client ID
    /// - `OIDC_CLIENT_SECRET`: OAuth2 client secret
    ///
    /// # Optional env vars
    /// - `OIDC_TOKEN_URL`: override the token endpoint
    /// - `OIDC_LOGOUT_URL`: override the logout endpoint
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if required env vars are missing or URLs are invalid.
    pub fn from_env() -> Result<Self, Error> {
        let issuer: Url = required_env("OIDC_ISSUER")?
            .parse()
            .map_err(|e| Error::Config(format!("OIDC_ISSUER: {e}")))?;
        let client_id = required_env("OIDC_CLIENT_ID")?;
        let client_secret = required_env("OIDC_CLIENT_SECRET")?;

        let mut config = Self::new(issuer, client_id, client_secret)?;

        if let Ok(url_str) = std::env::var("OIDC_TOKEN_URL") {
            let url: Url = url_str
                .parse()
                .map_err(|e| Error::Config(format!("OIDC_TOKEN_URL: {e}")))?;
            config = config.with_token_url(url);
        }
        if let Ok(url_str) = std::env::var("OIDC_LOGOUT_URL") {
            let url: Url = url_str
                .parse()
                .map_err(|e| Error::Config(format!("OIDC_LOGOUT_URL: {e}")))?;
            config = config.with_logout_url(url);
        }

        Ok(config)
    }

    /// Override the token endpoint.
    #[must_use]
    pub fn with_token_url(mut self, url: Url) -> Self {
        self.token_url = url;
        self
    }

    /// Override the logout (revocation) endpoint.
    #[must_use]
    pub fn with_logout_url(mut self, url: Url) -> Self {
        self.logout_url = url;
        self
    }

    #[must_use]
    pub fn issuer(&self) -> &Url {
        &self.issuer
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[must_use]
    pub fn token_url(&self) -> &Url {
        &self.token_url
    }

    #[must_use]
    pub fn logout_url(&self) -> &Url {
        &self.logout_url
    }

    #[must_use]
    pub fn discovery_url(&self) -> &Url {
        &self.discovery_url
    }
}

fn issuer_endpoint(issuer: &Url, suffix: &str) -> Result<Url, Error> {
    let base = issuer.as_str().trim_end_matches('/');
    format!("{base}/{suffix}")
        .parse()
        .map_err(|e| Error::Config(format!("invalid endpoint derived from issuer: {e}")))
}

fn required_env(name: &str) -> Result<String, Error> {
    std::env::var(name).map_err(|_| Error::Config(format!("{name} is required")))
}

/// HTTP client for the identity provider's discovery, token and logout
/// endpoints.
#[derive(Debug, Clone)]
pub struct ProviderClient {
    config: OidcConfig,
    http: reqwest::Client,
    refresh_timeout: Duration,
}

#[derive(Deserialize)]
struct ProviderErrorBody {
    error: Option<String>,
    error_description: Option<String>,
}

impl ProviderClient {
    #[must_use]
    pub fn new(config: OidcConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
            refresh_timeout: REFRESH_TIMEOUT,
        }
    }

    /// Use a custom HTTP client (for connection pool reuse or testing).
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    /// Bound on the token-endpoint call. A refresh that outlives it fails
    /// with [`RefreshError::Transport`].
    #[must_use]
    pub fn with_refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = timeout;
        self
    }

    #[must_use]
    pub fn config(&self) -> &OidcConfig {
        &self.config
    }

    /// Fetch the discovery document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProviderUnavailable`] when the endpoint is unreachable,
    /// answers with a non-success status, or serves an unparseable document.
    pub async fn discover(&self) -> Result<OpenIdConfiguration, Error> {
        let response = self
            .http
            .get(self.config.discovery_url.clone())
            .timeout(DISCOVERY_TIMEOUT)
            .send()
            .await
            .map_err(|e| Error::ProviderUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::ProviderUnavailable(format!(
                "discovery returned HTTP {}",
                response.status().as_u16()
            )));
        }

        response
            .json::<OpenIdConfiguration>()
            .await
            .map_err(|e| Error::ProviderUnavailable(format!("invalid discovery document: {e}")))
    }

    /// Probe whether sign-in is currently possible.
    ///
    /// # Errors
    ///
    /// Same as [`discover`](Self::discover).
    pub async fn check_availability(&self) -> Result<(), Error> {
        self.discover().await.map(|_| ())
    }

    /// Replace the configured token endpoint with the one advertised by
    /// discovery.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProviderUnavailable`] if discovery fails, or
    /// [`Error::Config`] if the advertised endpoint is not a valid URL.
    pub async fn with_discovered_endpoints(mut self) -> Result<Self, Error> {
        let document = self.discover().await?;
        let token_url: Url = document
            .token_endpoint
            .parse()
            .map_err(|e| Error::Config(format!("discovered token_endpoint: {e}")))?;
        self.config.token_url = token_url;
        if let Some(end_session) = document.end_session_endpoint {
            if let Ok(url) = end_session.parse() {
                self.config.logout_url = url;
            }
        }
        Ok(self)
    }

    /// Exchange a refresh token for a new access token.
    ///
    /// # Errors
    ///
    /// [`RefreshError::Rejected`] on a non-success status,
    /// [`RefreshError::MalformedResponse`] when the body is not a token
    /// response, [`RefreshError::Transport`] on network failure or when the
    /// refresh timeout elapses.
    pub async fn refresh(&self, refresh_token: &RefreshToken) -> Result<TokenResponse, RefreshError> {
        let params = [
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.expose_secret()),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.expose()),
        ];

        let response = self
            .http
            .post(self.config.token_url.clone())
            .form(&params)
            .timeout(self.refresh_timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RefreshError::Rejected {
                status: status.as_u16(),
                detail: error_detail(&body),
            });
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| RefreshError::MalformedResponse(e.to_string()))
    }

    /// End the provider session for `refresh_token`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] on network failure, or [`Error::Provider`]
    /// if the logout endpoint answers with a non-success status.
    pub async fn logout(&self, refresh_token: &RefreshToken) -> Result<(), Error> {
        let params = [
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.expose_secret()),
            ("refresh_token", refresh_token.expose()),
        ];

        let response = self
            .http
            .post(self.config.logout_url.clone())
            .form(&params)
            .send()
            .await?;

        Self::ensure_success(response, "logout").await.map(|_| ())
    }

    /// Checks HTTP response status; returns the response on success or an error with details.
    async fn ensure_success(
        response: reqwest::Response,
        operation: &'static str,
    ) -> Result<reqwest::Response, Error> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(Error::Provider {
            operation,
            status,
            detail: error_detail(&body),
        })
    }
}

/// Prefer the OAuth2 `error_description`/`error` fields; fall back to a
/// truncated body.
fn error_detail(body: &str) -> String {
    if let Ok(parsed) = serde_json::from_str::<ProviderErrorBody>(body) {
        if let Some(detail) = parsed.error_description.or(parsed.error) {
            return detail;
        }
    }
    body.chars().take(200).collect()
}

impl TokenEndpoint for ProviderClient {
    async fn refresh_token(
        &self,
        refresh_token: &RefreshToken,
    ) -> Result<TokenResponse, RefreshError> {
        self.refresh(refresh_token).await
    }
}

impl TokenRevoker for ProviderClient {
    async fn revoke(&self, refresh_token: &RefreshToken) -> Result<(), Error> {
        self.logout(refresh_token).await
    }
}

impl ProviderProbe for ProviderClient {
    async fn check_availability(&self) -> Result<(), Error> {
        ProviderClient::check_availability(self).await
    }
}
