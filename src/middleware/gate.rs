//! Per-request session gate.
//!
//! Classifies the request path, freshens the session credential where the
//! route needs one, and either passes the request on or redirects it. All
//! responses leaving the gate carry the security headers.

use axum::extract::{Request, State};
use axum::http::header::{
    HeaderName, HeaderValue, LOCATION, REFERRER_POLICY, X_CONTENT_TYPE_OPTIONS, X_FRAME_OPTIONS,
};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum_extra::extract::PrivateCookieJar;

use super::cookies;
use super::extractor::ActiveSession;
use super::state::GateState;
use crate::credential::{CredentialState, SessionCredential, SessionErrorKind};
use crate::redirect::has_parent_segment;
use crate::session::SessionTrigger;
use crate::traits::IdentityProvider;

const PERMISSIONS_POLICY: HeaderName = HeaderName::from_static("permissions-policy");

/// Routes that require a valid session.
pub const PROTECTED_ROUTES: [&str; 10] = [
    "/dashboard",
    "/accounts",
    "/payments",
    "/fx",
    "/transactions",
    "/settings",
    "/profile",
    "/admin",
    "/reports",
    "/audit",
];
/// Sign-in pages; signed-in users are bounced to the landing page.
pub const AUTH_SURFACE_ROUTES: [&str; 2] = ["/login", "/auth"];
/// Always reachable. `/` matches the root only.
pub const PUBLIC_ROUTES: [&str; 9] = [
    "/",
    "/api/auth",
    "/api/health",
    "/favicon.ico",
    "/_next",
    "/images",
    "/icons",
    "/robots.txt",
    "/sitemap.xml",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteClass {
    Protected,
    AuthSurface,
    Public,
}

/// Prefix lists deciding a path's [`RouteClass`].
///
/// Lists are checked in the order protected, auth surface, public. Paths on
/// none of them, and paths with `..` segments, are protected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTable {
    protected: Vec<String>,
    auth_surface: Vec<String>,
    public: Vec<String>,
}

impl Default for RouteTable {
    fn default() -> Self {
        Self {
            protected: to_owned_list(&PROTECTED_ROUTES),
            auth_surface: to_owned_list(&AUTH_SURFACE_ROUTES),
            public: to_owned_list(&PUBLIC_ROUTES),
        }
    }
}

impl RouteTable {
    #[must_use]
    pub fn with_protected(mut self, prefix: impl Into<String>) -> Self {
        self.protected.push(prefix.into());
        self
    }

    #[must_use]
    pub fn with_auth_surface(mut self, prefix: impl Into<String>) -> Self {
        self.auth_surface.push(prefix.into());
        self
    }

    #[must_use]
    pub fn with_public(mut self, prefix: impl Into<String>) -> Self {
        self.public.push(prefix.into());
        self
    }

    #[must_use]
    pub fn classify(&self, path: &str) -> RouteClass {
        if has_parent_segment(path) {
            return RouteClass::Protected;
        }
        let listed = |prefixes: &[String]| prefixes.iter().any(|p| matches_path_prefix(path, p));

        if listed(&self.protected) {
            RouteClass::Protected
        } else if listed(&self.auth_surface) {
            RouteClass::AuthSurface
        } else if listed(&self.public) {
            RouteClass::Public
        } else {
            RouteClass::Protected
        }
    }
}

fn to_owned_list(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_owned()).collect()
}

/// Segment-boundary prefix match: `/fx` matches `/fx` and `/fx/rates`,
/// not `/fxfoo`. The root prefix `/` matches only `/`.
#[must_use]
pub fn matches_path_prefix(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return path == "/";
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// What the gate knows about the caller's session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Absent,
    Valid,
    /// Present but unusable (stale, or carrying an error).
    Invalid(Option<SessionErrorKind>),
}

impl SessionStatus {
    #[must_use]
    pub fn of(credential: Option<&SessionCredential>) -> Self {
        match credential.map(SessionCredential::state) {
            None => Self::Absent,
            Some(CredentialState::Fresh) => Self::Valid,
            Some(CredentialState::Stale) => Self::Invalid(None),
            Some(CredentialState::Errored(kind)) => Self::Invalid(Some(kind)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Pass,
    RedirectToLogin,
    RedirectToLanding,
}

impl GateDecision {
    #[must_use]
    pub fn decide(class: RouteClass, session: SessionStatus) -> Self {
        match (class, session) {
            (RouteClass::Protected, SessionStatus::Valid) => Self::Pass,
            (RouteClass::Protected, _) => Self::RedirectToLogin,
            (RouteClass::AuthSurface, SessionStatus::Valid) => Self::RedirectToLanding,
            (RouteClass::AuthSurface | RouteClass::Public, _) => Self::Pass,
        }
    }
}

/// Axum middleware enforcing the gate.
///
/// # Example
///
/// ```rust,ignore
/// let app = Router::new()
///     .route("/dashboard", get(dashboard))
///     .layer(axum::middleware::from_fn_with_state(state.clone(), route_gate::<ProviderClient>));
/// ```
pub async fn route_gate<P: IdentityProvider>(
    State(state): State<GateState<P>>,
    jar: PrivateCookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_owned();
    let class = state.settings.routes.classify(&path);

    let stored = cookies::read_credential(&jar, &state.settings.session_cookie_name);
    let (credential, changed) = match stored {
        // Public routes never pay for a refresh.
        Some(credential) if class != RouteClass::Public => {
            let renewed = state
                .sessions
                .ensure_fresh(credential.clone(), SessionTrigger::Request)
                .await;
            let changed = renewed != credential;
            (Some(renewed), changed)
        }
        other => (other, false),
    };

    let status = SessionStatus::of(credential.as_ref());
    let decision = GateDecision::decide(class, status);

    let jar = match (&credential, changed) {
        (Some(credential), true) => cookies::store_credential(jar, &state.settings, credential),
        _ => jar,
    };

    let response = match decision {
        GateDecision::Pass => {
            if let Some(active) = credential
                .as_ref()
                .and_then(|c| ActiveSession::from_credential(c, &state.sessions))
            {
                request.extensions_mut().insert(active);
            }
            next.run(request).await
        }
        GateDecision::RedirectToLogin => {
            if let SessionStatus::Invalid(Some(kind)) = status {
                tracing::info!(error = %kind, path = %path, "Session unusable, forcing re-authentication");
            }
            let target = request
                .uri()
                .path_and_query()
                .map_or(path.as_str(), |pq| pq.as_str());
            found(&state.redirects.login_redirect(target))
        }
        GateDecision::RedirectToLanding => found(state.redirects.default_path().as_str()),
    };

    let mut response = (jar, response).into_response();
    apply_security_headers(response.headers_mut());
    response
}

/// `302 Found` to a same-origin location.
pub(crate) fn found(location: &str) -> Response {
    match HeaderValue::try_from(location) {
        Ok(value) => (StatusCode::FOUND, [(LOCATION, value)]).into_response(),
        Err(_) => {
            tracing::error!("Redirect location is not a valid header value");
            (StatusCode::FOUND, [(LOCATION, HeaderValue::from_static("/"))]).into_response()
        }
    }
}

/// Set the fixed security headers, replacing any set by inner handlers.
pub fn apply_security_headers(headers: &mut HeaderMap) {
    headers.insert(X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    headers.insert(
        REFERRER_POLICY,
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert(
        PERMISSIONS_POLICY,
        HeaderValue::from_static("camera=(), microphone=(), geolocation=()"),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_matching_respects_segments() {
        assert!(matches_path_prefix("/fx", "/fx"));
        assert!(matches_path_prefix("/fx/rates", "/fx"));
        assert!(!matches_path_prefix("/fxfoo", "/fx"));
        assert!(matches_path_prefix("/", "/"));
        assert!(!matches_path_prefix("/anything", "/"));
    }

    #[test]
    fn classification_order() {
        let routes = RouteTable::default();
        assert_eq!(routes.classify("/dashboard"), RouteClass::Protected);
        assert_eq!(routes.classify("/accounts/42"), RouteClass::Protected);
        assert_eq!(routes.classify("/login"), RouteClass::AuthSurface);
        assert_eq!(routes.classify("/auth/error"), RouteClass::AuthSurface);
        assert_eq!(routes.classify("/"), RouteClass::Public);
        assert_eq!(routes.classify("/api/auth/session"), RouteClass::Public);
        assert_eq!(routes.classify("/_next/static/app.js"), RouteClass::Public);
    }

    #[test]
    fn unlisted_and_traversal_paths_are_protected() {
        let routes = RouteTable::default();
        assert_eq!(routes.classify("/internal-tools"), RouteClass::Protected);
        assert_eq!(routes.classify("/loginx"), RouteClass::Protected);
        assert_eq!(routes.classify("/images/../admin"), RouteClass::Protected);
        assert_eq!(routes.classify("/_next/%2e%2e/admin"), RouteClass::Protected);
    }

    #[test]
    fn non_utf8_public_asset_stays_public() {
        let routes = RouteTable::default();
        assert_eq!(routes.classify("/images/%FF.png"), RouteClass::Public);
        assert_eq!(routes.classify("/images/%FF/../admin"), RouteClass::Protected);
    }

    #[test]
    fn custom_routes_extend_defaults() {
        let routes = RouteTable::default().with_public("/status");
        assert_eq!(routes.classify("/status"), RouteClass::Public);
    }

    #[test]
    fn decision_table() {
        use GateDecision::*;
        use RouteClass::*;
        use SessionStatus::*;

        let errored = Invalid(Some(SessionErrorKind::RefreshAccessTokenError));
        let cases = [
            (Protected, Absent, RedirectToLogin),
            (Protected, Invalid(None), RedirectToLogin),
            (Protected, errored, RedirectToLogin),
            (Protected, Valid, Pass),
            (AuthSurface, Absent, Pass),
            (AuthSurface, errored, Pass),
            (AuthSurface, Valid, RedirectToLanding),
            (Public, Absent, Pass),
            (Public, errored, Pass),
            (Public, Valid, Pass),
        ];
        for (class, status, expected) in cases {
            assert_eq!(GateDecision::decide(class, status), expected, "{class:?} {status:?}");
        }
    }

    #[test]
    fn security_headers_are_set() {
        let mut headers = HeaderMap::new();
        headers.insert(X_FRAME_OPTIONS, HeaderValue::from_static("SAMEORIGIN"));

        apply_security_headers(&mut headers);

        assert_eq!(headers[X_FRAME_OPTIONS], "DENY");
        assert_eq!(headers[X_CONTENT_TYPE_OPTIONS], "nosniff");
        assert_eq!(headers[REFERRER_POLICY], "strict-origin-when-cross-origin");
        assert_eq!(headers["permissions-policy"], "camera=(), microphone=(), geolocation=()");
    }

    #[test]
    fn found_is_302() {
        let response = found("/login?callbackUrl=%2Fdashboard");
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers()[LOCATION], "/login?callbackUrl=%2Fdashboard");
    }
}
