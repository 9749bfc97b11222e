use std::sync::Arc;

use axum::extract::FromRef;
use axum_extra::extract::cookie::Key;

use super::config::{GateConfig, GateSettings};
use crate::oauth::ProviderClient;
use crate::rate_limit::RateLimiter;
use crate::redirect::RedirectValidator;
use crate::session::SessionLifecycleManager;
use crate::traits::IdentityProvider;

/// Shared state for the gate middleware and the auth route handlers.
///
/// Cloning is cheap; clones share the refresh coordinator and the sign-in
/// rate limiter.
pub struct GateState<P = ProviderClient> {
    pub(super) sessions: SessionLifecycleManager<P>,
    pub(super) redirects: RedirectValidator,
    pub(super) sign_in_limiter: Arc<RateLimiter>,
    pub(super) settings: GateSettings,
}

// Manual Clone: avoid derive adding a `P: Clone` bound.
impl<P> Clone for GateState<P> {
    fn clone(&self) -> Self {
        Self {
            sessions: self.sessions.clone(),
            redirects: self.redirects.clone(),
            sign_in_limiter: self.sign_in_limiter.clone(),
            settings: self.settings.clone(),
        }
    }
}

impl<P: IdentityProvider> GateState<P> {
    #[must_use]
    pub fn new(config: GateConfig<P>) -> Self {
        let GateConfig {
            provider,
            app_origin,
            settings,
        } = config;

        let redirects = RedirectValidator::new(app_origin)
            .with_default_path(settings.landing_path.clone())
            .with_login_path(settings.login_path.clone());
        let sessions = SessionLifecycleManager::new(provider)
            .with_revocation_timeout(settings.revocation_timeout);
        let sign_in_limiter = Arc::new(RateLimiter::new(
            settings.sign_in_limit,
            settings.sign_in_window,
        ));

        Self {
            sessions,
            redirects,
            sign_in_limiter,
            settings,
        }
    }

    /// Lifecycle manager, for handlers that need to freshen or project a
    /// credential themselves.
    #[must_use]
    pub fn sessions(&self) -> &SessionLifecycleManager<P> {
        &self.sessions
    }

    #[must_use]
    pub fn redirects(&self) -> &RedirectValidator {
        &self.redirects
    }
}

// PrivateCookieJar requires Key to be extractable from state
impl<P> FromRef<GateState<P>> for Key {
    fn from_ref(state: &GateState<P>) -> Self {
        state.settings.cookie_key.clone()
    }
}
