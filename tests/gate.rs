mod common;

use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::header::{COOKIE, LOCATION, RETRY_AFTER, SET_COOKIE};
use axum::http::{HeaderName, Request, Response, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum_extra::extract::PrivateCookieJar;
use common::{LOGOUT_PATH, MockProvider};
use http_body_util::BodyExt;
use oidc_session_gate::middleware::{
    ActiveSession, CookieKey, GateConfig, GateState, establish_session, protect,
};
use oidc_session_gate::{
    AccessToken, RefreshToken, SessionCredential, SessionErrorKind, UserSnapshot,
};
use time::OffsetDateTime;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

struct Harness {
    provider: MockProvider,
    state: GateState,
    key: CookieKey,
    app: Router,
}

async fn dashboard(session: ActiveSession) -> String {
    session.user.map(|u| u.id.to_string()).unwrap_or_default()
}

async fn harness() -> Harness {
    harness_with(|config| config).await
}

async fn harness_with(configure: impl FnOnce(GateConfig) -> GateConfig) -> Harness {
    let provider = MockProvider::start().await;
    let key = CookieKey::generate();
    let config = GateConfig::new(provider.client(), "https://bank.example".parse().unwrap())
        .with_cookie_key(key.clone())
        .with_revocation_timeout(Duration::from_millis(500));
    let state = GateState::new(configure(config));

    let pages = Router::new()
        .route("/", get(|| async { "home" }))
        .route("/dashboard", get(dashboard))
        .route("/login", get(|| async { "login" }))
        .route("/internal", get(|| async { "internal" }));
    let app = protect(pages, state.clone());

    Harness {
        provider,
        state,
        key,
        app,
    }
}

impl Harness {
    fn cookie_for(&self, credential: &SessionCredential) -> String {
        let jar = establish_session(PrivateCookieJar::new(self.key.clone()), &self.state, credential);
        let response = jar.into_response();
        let set_cookie = response.headers()[SET_COOKIE].to_str().unwrap();
        set_cookie.split(';').next().unwrap().to_owned()
    }

    async fn get(&self, uri: &str, cookie: Option<&str>) -> Response<Body> {
        self.send("GET", uri, cookie).await
    }

    async fn send(&self, method: &str, uri: &str, cookie: Option<&str>) -> Response<Body> {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(cookie) = cookie {
            request = request.header(COOKIE, cookie);
        }
        self.app
            .clone()
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    /// Sign-in attempt from socket peer `peer` carrying `forwarded_for`.
    async fn sign_in_from(&self, peer: Option<&str>, forwarded_for: &str) -> Response<Body> {
        let mut request = Request::builder()
            .method("POST")
            .uri("/api/auth/signin")
            .header("x-forwarded-for", forwarded_for)
            .body(Body::empty())
            .unwrap();
        if let Some(peer) = peer {
            let addr: SocketAddr = peer.parse().unwrap();
            request.extensions_mut().insert(ConnectInfo(addr));
        }
        self.app.clone().oneshot(request).await.unwrap()
    }
}

fn credential_expiring_in(secs: i64) -> SessionCredential {
    SessionCredential::new(
        AccessToken::new("at-secret-value"),
        RefreshToken::new("rt-secret-value"),
        OffsetDateTime::now_utc() + time::Duration::seconds(secs),
        Some(UserSnapshot::new("user-1").with_name("Ada")),
    )
}

async fn body_string(response: Response<Body>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn assert_security_headers(response: &Response<Body>) {
    let headers = response.headers();
    assert_eq!(headers["x-frame-options"], "DENY");
    assert_eq!(headers["x-content-type-options"], "nosniff");
    assert_eq!(headers["referrer-policy"], "strict-origin-when-cross-origin");
    assert_eq!(
        headers["permissions-policy"],
        "camera=(), microphone=(), geolocation=()"
    );
}

// ── Gate ───────────────────────────────────────────────────────────

#[tokio::test]
async fn anonymous_protected_request_redirects_with_sanitized_callback() {
    let h = harness().await;

    let response = h.get("/dashboard?tab=accounts&token=secret123", None).await;

    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        response.headers()[LOCATION],
        "/login?callbackUrl=%2Fdashboard%3Ftab%3Daccounts"
    );
    assert_security_headers(&response);
}

#[tokio::test]
async fn unlisted_paths_are_protected() {
    let h = harness().await;

    let response = h.get("/internal", None).await;

    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()[LOCATION], "/login?callbackUrl=%2Finternal");
}

#[tokio::test]
async fn anonymous_public_and_login_pages_pass() {
    let h = harness().await;

    for uri in ["/", "/login"] {
        let response = h.get(uri, None).await;
        assert_eq!(response.status(), StatusCode::OK, "{uri}");
        assert_security_headers(&response);
    }
}

#[tokio::test]
async fn valid_session_reaches_protected_handler() {
    let h = harness().await;
    let cookie = h.cookie_for(&credential_expiring_in(3600));

    let response = h.get("/dashboard", Some(&cookie)).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get(SET_COOKIE).is_none());
    assert_security_headers(&response);
    assert_eq!(body_string(response).await, "user-1");
}

#[tokio::test]
async fn signed_in_user_is_bounced_from_login() {
    let h = harness().await;
    let cookie = h.cookie_for(&credential_expiring_in(3600));

    let response = h.get("/login", Some(&cookie)).await;

    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()[LOCATION], "/dashboard");
}

#[tokio::test]
async fn errored_session_forces_reauthentication() {
    let h = harness().await;
    let errored = credential_expiring_in(3600).into_errored(SessionErrorKind::RefreshAccessTokenError);
    let cookie = h.cookie_for(&errored);

    let response = h.get("/dashboard", Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()[LOCATION], "/login?callbackUrl=%2Fdashboard");

    // The login page stays reachable so the user can sign in again.
    let response = h.get("/login", Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn tampered_cookie_counts_as_anonymous() {
    let h = harness().await;

    let response = h
        .get("/dashboard", Some("__session_credential=not-encrypted"))
        .await;

    assert_eq!(response.status(), StatusCode::FOUND);
}

#[tokio::test]
async fn stale_session_is_refreshed_and_cookie_rewritten() {
    let h = harness().await;
    h.provider
        .mount_refresh_ok("at-renewed", Duration::ZERO, 1)
        .await;
    let cookie = h.cookie_for(&credential_expiring_in(30));

    let response = h.get("/dashboard", Some(&cookie)).await;

    assert_eq!(response.status(), StatusCode::OK);
    let set_cookie = response.headers()[SET_COOKIE].to_str().unwrap();
    assert!(set_cookie.starts_with("__session_credential="));
    assert!(!set_cookie.contains("at-renewed"));
}

#[tokio::test]
async fn failed_refresh_redirects_and_stores_error() {
    let h = harness().await;
    h.provider.mount_refresh_rejected().await;
    let cookie = h.cookie_for(&credential_expiring_in(30));

    let response = h.get("/dashboard", Some(&cookie)).await;

    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()[LOCATION], "/login?callbackUrl=%2Fdashboard");
    assert!(response.headers().get(SET_COOKIE).is_some());
}

#[tokio::test]
async fn public_routes_skip_refresh() {
    let h = harness().await;
    h.provider.mount_refresh_ok("at-renewed", Duration::ZERO, 0).await;
    let cookie = h.cookie_for(&credential_expiring_in(30));

    let response = h.get("/", Some(&cookie)).await;

    assert_eq!(response.status(), StatusCode::OK);
}

// ── Auth routes ────────────────────────────────────────────────────

#[tokio::test]
async fn session_endpoint_without_cookie_is_null() {
    let h = harness().await;

    let response = h.get("/api/auth/session", None).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_security_headers(&response);
    assert_eq!(body_string(response).await, "null");
}

#[tokio::test]
async fn session_endpoint_projects_without_tokens() {
    let h = harness().await;
    let cookie = h.cookie_for(&credential_expiring_in(3600));

    let response = h.get("/api/auth/session", Some(&cookie)).await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["tokenPresent"], true);
    assert_eq!(json["user"]["name"], "Ada");
    assert!(json.get("error").is_none());
    assert!(!body.contains("at-secret-value"));
    assert!(!body.contains("rt-secret-value"));
}

#[tokio::test]
async fn session_update_retries_errored_session() {
    let h = harness().await;
    h.provider
        .mount_refresh_ok("at-renewed", Duration::ZERO, 1)
        .await;
    let errored = credential_expiring_in(3600).into_errored(SessionErrorKind::RefreshAccessTokenError);
    let cookie = h.cookie_for(&errored);

    let plain = h.get("/api/auth/session", Some(&cookie)).await;
    let json: serde_json::Value = serde_json::from_str(&body_string(plain).await).unwrap();
    assert_eq!(json["error"], "RefreshAccessTokenError");

    let updated = h.get("/api/auth/session?update=1", Some(&cookie)).await;
    assert!(updated.headers().get(SET_COOKIE).is_some());
    let json: serde_json::Value = serde_json::from_str(&body_string(updated).await).unwrap();
    assert!(json.get("error").is_none());
    assert_eq!(json["tokenPresent"], true);
}

#[tokio::test]
async fn sign_in_returns_sanitized_redirect() {
    let h = harness().await;
    h.provider.mount_discovery().await;

    let response = h
        .send("POST", "/api/auth/signin?callbackUrl=https%3A%2F%2Fevil.com%2Fsteal", None)
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let json: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(json["redirect"], "/dashboard");
}

#[tokio::test]
async fn sign_in_is_rate_limited() {
    let h = harness().await;
    h.provider.mount_discovery().await;

    for _ in 0..5 {
        let response = h.send("POST", "/api/auth/signin", None).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = h.send("POST", "/api/auth/signin", None).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = response.headers()[RETRY_AFTER]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(retry_after > 0 && retry_after <= 60);
    assert_security_headers(&response);
}

#[tokio::test]
async fn sign_in_limit_ignores_rotated_forwarding_header() {
    let h = harness().await;
    h.provider.mount_discovery().await;

    for i in 0..5 {
        let response = h
            .sign_in_from(Some("192.0.2.10:40000"), &format!("10.0.0.{i}"))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = h.sign_in_from(Some("192.0.2.10:40001"), "10.0.0.99").await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn sign_in_budget_is_per_peer_address() {
    let h = harness().await;
    h.provider.mount_discovery().await;

    for _ in 0..5 {
        h.sign_in_from(Some("192.0.2.10:40000"), "10.0.0.1").await;
    }
    let exhausted = h.sign_in_from(Some("192.0.2.10:40000"), "10.0.0.1").await;
    let other = h.sign_in_from(Some("192.0.2.11:40000"), "10.0.0.1").await;

    assert_eq!(exhausted.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(other.status(), StatusCode::OK);
}

#[tokio::test]
async fn trusted_proxy_header_keys_the_sign_in_limit() {
    let h = harness_with(|config| {
        config.with_trusted_proxy_header(HeaderName::from_static("x-forwarded-for"))
    })
    .await;
    h.provider.mount_discovery().await;

    for _ in 0..5 {
        h.sign_in_from(Some("127.0.0.1:8000"), "203.0.113.5").await;
    }
    let exhausted = h.sign_in_from(Some("127.0.0.1:8000"), "203.0.113.5").await;
    let other = h.sign_in_from(Some("127.0.0.1:8000"), "203.0.113.6").await;

    assert_eq!(exhausted.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(other.status(), StatusCode::OK);
}

#[tokio::test]
async fn sign_in_refused_when_provider_unavailable() {
    let h = harness().await;
    h.provider.mount_discovery_down().await;

    let response = h.send("POST", "/api/auth/signin", None).await;

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn provider_status_reports_availability() {
    let h = harness().await;
    h.provider.mount_discovery_down().await;

    let response = h.get("/api/auth/provider/status", None).await;

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_string(response).await, r#"{"available":false}"#);
}

#[tokio::test]
async fn logout_revokes_and_clears_cookie() {
    let h = harness().await;
    Mock::given(method("POST"))
        .and(path(LOGOUT_PATH))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&h.provider.server)
        .await;
    let cookie = h.cookie_for(&credential_expiring_in(3600));

    let response = h.send("POST", "/api/auth/logout", Some(&cookie)).await;

    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()[LOCATION], "/login");
    let set_cookie = response.headers()[SET_COOKIE].to_str().unwrap();
    assert!(set_cookie.starts_with("__session_credential="));
    assert!(set_cookie.contains("Max-Age=0"));
}

#[tokio::test]
async fn logout_completes_when_provider_hangs() {
    let h = harness().await;
    h.provider.mount_logout(204, Duration::from_secs(30)).await;
    let cookie = h.cookie_for(&credential_expiring_in(3600));

    let started = std::time::Instant::now();
    let response = h.send("POST", "/api/auth/logout", Some(&cookie)).await;

    assert_eq!(response.status(), StatusCode::FOUND);
    assert!(started.elapsed() < Duration::from_secs(5));

    // Without the cookie the session projection is gone.
    let response = h.get("/api/auth/session", None).await;
    assert_eq!(body_string(response).await, "null");
}

#[tokio::test]
async fn logout_rejects_get() {
    let h = harness().await;
    Mock::given(method("POST"))
        .and(path(LOGOUT_PATH))
        .respond_with(ResponseTemplate::new(204))
        .expect(0)
        .mount(&h.provider.server)
        .await;
    let cookie = h.cookie_for(&credential_expiring_in(3600));

    let response = h.get("/api/auth/logout", Some(&cookie)).await;

    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert!(response.headers().get(SET_COOKIE).is_none());
}
