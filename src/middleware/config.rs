use std::time::Duration;

use axum::http::HeaderName;
use axum_extra::extract::cookie::Key;
use url::Url;

use super::error::AuthError;
use super::gate::RouteTable;
use crate::oauth::{OidcConfig, ProviderClient};
use crate::rate_limit::{AUTH_ATTEMPT_LIMIT, SIGN_IN_BURST_WINDOW};
use crate::redirect::{DEFAULT_LOGIN_PATH, DEFAULT_SAFE_PATH};
use crate::session::REVOCATION_TIMEOUT;

/// Shared gate settings used by both config and runtime state.
#[derive(Clone)]
pub(crate) struct GateSettings {
    pub(crate) cookie_key: Key,
    pub(crate) session_cookie_name: String,
    pub(crate) session_max_age: time::Duration,
    pub(crate) secure_cookies: bool,
    pub(crate) auth_path: String,
    pub(crate) login_path: String,
    pub(crate) landing_path: String,
    pub(crate) logout_redirect: String,
    pub(crate) routes: RouteTable,
    pub(crate) revocation_timeout: Duration,
    pub(crate) sign_in_limit: u32,
    pub(crate) sign_in_window: Duration,
    pub(crate) trusted_proxy_header: Option<HeaderName>,
}

impl GateSettings {
    fn defaults() -> Self {
        Self {
            cookie_key: Key::generate(),
            session_cookie_name: "__session_credential".into(),
            session_max_age: time::Duration::hours(24),
            secure_cookies: true,
            auth_path: "/api/auth".into(),
            login_path: DEFAULT_LOGIN_PATH.into(),
            landing_path: DEFAULT_SAFE_PATH.into(),
            logout_redirect: DEFAULT_LOGIN_PATH.into(),
            routes: RouteTable::default(),
            revocation_timeout: REVOCATION_TIMEOUT,
            sign_in_limit: AUTH_ATTEMPT_LIMIT,
            sign_in_window: SIGN_IN_BURST_WINDOW,
            trusted_proxy_header: None,
        }
    }
}

/// Session gate configuration.
///
/// The identity provider and the application's public origin are
/// constructor parameters; everything else has a default and a `with_*`
/// override.
///
/// Use [`from_env()`](GateConfig::from_env) for convention-based setup.
pub struct GateConfig<P = ProviderClient> {
    pub(super) provider: P,
    pub(super) app_origin: Url,
    pub(super) settings: GateSettings,
}

impl GateConfig<ProviderClient> {
    /// Create config from environment variables.
    ///
    /// # Required env vars
    /// - `OIDC_ISSUER`, `OIDC_CLIENT_ID`, `OIDC_CLIENT_SECRET`: see
    ///   [`OidcConfig::from_env`]
    /// - `APP_ORIGIN`: public origin of the application, e.g.
    ///   `https://bank.example`
    ///
    /// # Optional env vars
    /// - `OIDC_TOKEN_URL`, `OIDC_LOGOUT_URL`: endpoint overrides
    /// - `COOKIE_KEY`: cookie encryption key bytes (at least 64)
    /// - `SECURE_COOKIES`: `"0"` or `"false"` to allow plain-HTTP development
    /// - `REVOCATION_TIMEOUT_SECS`: bound on the provider logout call
    /// - `REFRESH_TIMEOUT_SECS`: bound on the token-endpoint call
    /// - `TRUSTED_PROXY_HEADER`: client-address header set by the reverse
    ///   proxy, e.g. `x-forwarded-for`
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if required env vars are missing or
    /// values are invalid.
    pub fn from_env() -> Result<Self, AuthError> {
        let oidc = OidcConfig::from_env().map_err(AuthError::from)?;

        let origin_str = std::env::var("APP_ORIGIN")
            .map_err(|_| AuthError::Config("APP_ORIGIN is required".into()))?;
        let app_origin: Url = origin_str
            .parse()
            .map_err(|e| AuthError::Config(format!("APP_ORIGIN: {e}")))?;

        let cookie_key = match std::env::var("COOKIE_KEY") {
            Ok(k) => Key::try_from(k.as_bytes()).map_err(|_| {
                AuthError::Config(
                    "COOKIE_KEY is set but invalid (must be at least 64 bytes). \
                     Remove the env var to use an ephemeral key, or provide a valid key."
                        .into(),
                )
            })?,
            Err(_) => {
                tracing::warn!("COOKIE_KEY not set, sessions will not survive a restart");
                Key::generate()
            }
        };

        let secure_cookies = !matches!(
            std::env::var("SECURE_COOKIES").as_deref(),
            Ok("0") | Ok("false"),
        );

        let mut provider = ProviderClient::new(oidc);
        if let Ok(secs) = std::env::var("REFRESH_TIMEOUT_SECS") {
            let secs: u64 = secs
                .parse()
                .map_err(|e| AuthError::Config(format!("REFRESH_TIMEOUT_SECS: {e}")))?;
            provider = provider.with_refresh_timeout(Duration::from_secs(secs));
        }

        let mut config = Self::new(provider, app_origin)
            .with_cookie_key(cookie_key)
            .with_secure_cookies(secure_cookies);

        if let Ok(secs) = std::env::var("REVOCATION_TIMEOUT_SECS") {
            let secs: u64 = secs
                .parse()
                .map_err(|e| AuthError::Config(format!("REVOCATION_TIMEOUT_SECS: {e}")))?;
            config = config.with_revocation_timeout(Duration::from_secs(secs));
        }

        if let Ok(name) = std::env::var("TRUSTED_PROXY_HEADER") {
            let header = HeaderName::try_from(name.as_str())
                .map_err(|e| AuthError::Config(format!("TRUSTED_PROXY_HEADER: {e}")))?;
            config = config.with_trusted_proxy_header(header);
        }

        Ok(config)
    }
}

impl<P> GateConfig<P> {
    /// Create config with the required provider and trusted origin.
    #[must_use]
    pub fn new(provider: P, app_origin: Url) -> Self {
        Self {
            provider,
            app_origin,
            settings: GateSettings::defaults(),
        }
    }

    #[must_use]
    pub fn app_origin(&self) -> &Url {
        &self.app_origin
    }

    #[must_use]
    pub fn with_cookie_key(mut self, key: Key) -> Self {
        self.settings.cookie_key = key;
        self
    }

    #[must_use]
    pub fn with_session_cookie_name(mut self, name: impl Into<String>) -> Self {
        self.settings.session_cookie_name = name.into();
        self
    }

    #[must_use]
    pub fn with_session_max_age(mut self, max_age: time::Duration) -> Self {
        self.settings.session_max_age = max_age;
        self
    }

    #[must_use]
    pub fn with_secure_cookies(mut self, secure: bool) -> Self {
        self.settings.secure_cookies = secure;
        self
    }

    #[must_use]
    pub fn with_auth_path(mut self, path: impl Into<String>) -> Self {
        self.settings.auth_path = path.into();
        self
    }

    #[must_use]
    pub fn with_login_path(mut self, path: impl Into<String>) -> Self {
        self.settings.login_path = path.into();
        self
    }

    /// Landing page for signed-in users and fallback for rejected
    /// callback URLs.
    #[must_use]
    pub fn with_landing_path(mut self, path: impl Into<String>) -> Self {
        self.settings.landing_path = path.into();
        self
    }

    #[must_use]
    pub fn with_logout_redirect(mut self, path: impl Into<String>) -> Self {
        self.settings.logout_redirect = path.into();
        self
    }

    #[must_use]
    pub fn with_routes(mut self, routes: RouteTable) -> Self {
        self.settings.routes = routes;
        self
    }

    #[must_use]
    pub fn with_revocation_timeout(mut self, timeout: Duration) -> Self {
        self.settings.revocation_timeout = timeout;
        self
    }

    /// Budget for `POST {auth_path}/signin` per client.
    #[must_use]
    pub fn with_sign_in_limit(mut self, limit: u32, window: Duration) -> Self {
        self.settings.sign_in_limit = limit;
        self.settings.sign_in_window = window;
        self
    }

    /// Key sign-in rate limiting on the client address reported by a
    /// reverse proxy in `header`, instead of the socket peer address.
    ///
    /// Only enable this behind a proxy that overwrites or appends to the
    /// header. The rightmost entry of a comma-separated list is used.
    #[must_use]
    pub fn with_trusted_proxy_header(mut self, header: HeaderName) -> Self {
        self.settings.trusted_proxy_header = Some(header);
        self
    }
}
