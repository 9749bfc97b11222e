//! Session gate middleware for Axum.
//!
//! Keeps the OIDC session credential in an encrypted cookie, refreshes it
//! in the background of ordinary requests, and redirects unauthenticated
//! visitors of protected pages to the login surface with a sanitized
//! `callbackUrl`.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use oidc_session_gate::middleware::{GateConfig, GateState, protect};
//!
//! // 1. Configure from environment
//! let state = GateState::new(GateConfig::from_env()?);
//!
//! // 2. Mount your pages and put them behind the gate
//! let pages = axum::Router::new().route("/dashboard", get(dashboard));
//! let app = protect(pages, state.clone());
//!
//! // 3. In the authorization-code callback, store the session
//! let credential = state.sessions().materialize(handshake);
//! let jar = establish_session(jar, &state, &credential);
//! ```

mod config;
mod cookies;
mod error;
mod extractor;
mod gate;
mod routes;
mod state;

pub use config::GateConfig;
pub use error::AuthError;
pub use extractor::ActiveSession;
pub use gate::{
    AUTH_SURFACE_ROUTES, GateDecision, PROTECTED_ROUTES, PUBLIC_ROUTES, RouteClass, RouteTable,
    SessionStatus, apply_security_headers, matches_path_prefix, route_gate,
};
pub use routes::{auth_routes, establish_session, protect};
pub use state::GateState;

/// Re-export cookie key type for builder API.
pub use axum_extra::extract::cookie::Key as CookieKey;
