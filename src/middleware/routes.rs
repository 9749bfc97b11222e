use std::net::SocketAddr;

use axum::{Json, Router};
use axum::extract::{ConnectInfo, Query, Request, State};
use axum::http::{HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum_extra::extract::PrivateCookieJar;
use serde::{Deserialize, Serialize};

use super::cookies;
use super::error::AuthError;
use super::gate::{found, route_gate};
use super::state::GateState;
use crate::credential::SessionCredential;
use crate::session::{PublicSessionView, SessionTrigger};
use crate::traits::{IdentityProvider, ProviderProbe};

/// Create the session router, mounted under the configured auth path.
///
/// - `GET  {auth_path}/session`: client projection (`?update=1` forces a
///   refresh of an errored session)
/// - `POST {auth_path}/signin`: rate-limited sign-in trigger
/// - `POST {auth_path}/logout`
/// - `GET  {auth_path}/provider/status`
pub fn auth_routes<P: IdentityProvider>(state: GateState<P>) -> Router {
    let auth_path = state.settings.auth_path.clone();

    Router::new()
        .route(&format!("{auth_path}/session"), get(session::<P>))
        .route(&format!("{auth_path}/signin"), post(sign_in::<P>))
        .route(&format!("{auth_path}/logout"), post(logout::<P>))
        .route(
            &format!("{auth_path}/provider/status"),
            get(provider_status::<P>),
        )
        .with_state(state)
}

/// Mount [`auth_routes`] into `router` and put everything behind
/// [`route_gate`].
pub fn protect<P: IdentityProvider>(router: Router, state: GateState<P>) -> Router {
    router
        .merge(auth_routes(state.clone()))
        .layer(axum::middleware::from_fn_with_state(state, route_gate::<P>))
}

/// Write a freshly materialized credential into the session cookie.
///
/// Call from the application's authorization-code callback once the code
/// has been exchanged.
///
/// ```rust,ignore
/// let credential = state.sessions().materialize(handshake);
/// let jar = establish_session(jar, &state, &credential);
/// (jar, Redirect::to(state.redirects().validate(&callback_url).as_str()))
/// ```
pub fn establish_session<P>(
    jar: PrivateCookieJar,
    state: &GateState<P>,
    credential: &SessionCredential,
) -> PrivateCookieJar {
    cookies::store_credential(jar, &state.settings, credential)
}

// ── Session ────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct SessionParams {
    update: Option<String>,
}

async fn session<P: IdentityProvider>(
    State(state): State<GateState<P>>,
    jar: PrivateCookieJar,
    Query(params): Query<SessionParams>,
) -> (PrivateCookieJar, Json<Option<PublicSessionView>>) {
    let Some(credential) = cookies::read_credential(&jar, &state.settings.session_cookie_name)
    else {
        return (jar, Json(None));
    };

    let trigger = match params.update.as_deref() {
        Some("1" | "true") => SessionTrigger::Update,
        _ => SessionTrigger::Request,
    };

    let renewed = state.sessions.ensure_fresh(credential.clone(), trigger).await;
    let view = state.sessions.project_for_client(&renewed);

    let jar = if renewed == credential {
        jar
    } else {
        cookies::store_credential(jar, &state.settings, &renewed)
    };

    (jar, Json(Some(view)))
}

// ── Sign-in ────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignInParams {
    callback_url: Option<String>,
}

#[derive(Serialize)]
struct SignInResponse {
    redirect: String,
}

async fn sign_in<P: IdentityProvider>(
    State(state): State<GateState<P>>,
    Query(params): Query<SignInParams>,
    request: Request,
) -> Result<Json<SignInResponse>, AuthError> {
    let client = client_address(&request, state.settings.trusted_proxy_header.as_ref());
    let key = format!("signin:{}", client.as_deref().unwrap_or("unknown"));
    state.sign_in_limiter.check(&key)?;

    state.sessions.provider().check_availability().await?;

    let redirect = match params.callback_url.as_deref() {
        Some(candidate) => state.redirects.validate(candidate),
        None => state.redirects.default_path(),
    };

    tracing::info!(redirect = %redirect, "Sign-in started");
    Ok(Json(SignInResponse {
        redirect: redirect.into_string(),
    }))
}

// ── Logout ─────────────────────────────────────────────────────────

async fn logout<P: IdentityProvider>(
    State(state): State<GateState<P>>,
    jar: PrivateCookieJar,
) -> (PrivateCookieJar, Response) {
    let name = &state.settings.session_cookie_name;
    if let Some(credential) = cookies::read_credential(&jar, name) {
        let outcome = state.sessions.sign_out(credential).await;
        tracing::info!(outcome = ?outcome, "Signed out");
    }

    let clear_cookie = cookies::clear_credential_cookie(name);
    (
        jar.remove(clear_cookie),
        found(&state.settings.logout_redirect),
    )
}

// ── Provider status ────────────────────────────────────────────────

#[derive(Serialize)]
struct ProviderStatus {
    available: bool,
}

async fn provider_status<P: IdentityProvider>(State(state): State<GateState<P>>) -> Response {
    match state.sessions.provider().check_availability().await {
        Ok(()) => Json(ProviderStatus { available: true }).into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "Provider availability check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ProviderStatus { available: false }),
            )
                .into_response()
        }
    }
}

// ── Helpers ────────────────────────────────────────────────────────

/// Client address for rate limiting.
///
/// The socket peer, unless a trusted proxy header is configured. Without
/// `ConnectInfo` (no `into_make_service_with_connect_info`) all clients
/// share one budget.
fn client_address(request: &Request, trusted_header: Option<&HeaderName>) -> Option<String> {
    if let Some(header) = trusted_header {
        return request
            .headers()
            .get(header)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.rsplit(',').map(str::trim).find(|s| !s.is_empty()))
            .map(str::to_string);
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
}
