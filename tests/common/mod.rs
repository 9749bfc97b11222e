//! Mock identity provider for integration testing.
//!
//! Serves a Keycloak-style realm (`/realms/bank`) from a wiremock server.

#![allow(dead_code)]

use std::time::Duration;

use oidc_session_gate::{OidcConfig, ProviderClient};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const CLIENT_ID: &str = "web-frontend";
pub const CLIENT_SECRET: &str = "test-secret";

pub const TOKEN_PATH: &str = "/realms/bank/protocol/openid-connect/token";
pub const LOGOUT_PATH: &str = "/realms/bank/protocol/openid-connect/logout";
pub const DISCOVERY_PATH: &str = "/realms/bank/.well-known/openid-configuration";

pub struct MockProvider {
    pub server: MockServer,
}

impl MockProvider {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    pub fn issuer(&self) -> String {
        format!("{}/realms/bank", self.server.uri())
    }

    pub fn client(&self) -> ProviderClient {
        let config =
            OidcConfig::new(self.issuer().parse().unwrap(), CLIENT_ID, CLIENT_SECRET).unwrap();
        ProviderClient::new(config)
    }

    /// Token endpoint answering every refresh with `access_token`.
    pub async fn mount_refresh_ok(&self, access_token: &str, delay: Duration, expected_calls: u64) {
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({
                        "access_token": access_token,
                        "token_type": "Bearer",
                        "expires_in": 300,
                        "refresh_token": "rt-rotated",
                    }))
                    .set_delay(delay),
            )
            .expect(expected_calls)
            .mount(&self.server)
            .await;
    }

    pub async fn mount_refresh_rejected(&self) {
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_grant",
                "error_description": "Token is not active",
            })))
            .mount(&self.server)
            .await;
    }

    pub async fn mount_logout(&self, status: u16, delay: Duration) {
        Mock::given(method("POST"))
            .and(path(LOGOUT_PATH))
            .respond_with(ResponseTemplate::new(status).set_delay(delay))
            .mount(&self.server)
            .await;
    }

    pub async fn mount_discovery(&self) {
        let issuer = self.issuer();
        Mock::given(method("GET"))
            .and(path(DISCOVERY_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "issuer": issuer,
                "authorization_endpoint": format!("{issuer}/protocol/openid-connect/auth"),
                "token_endpoint": format!("{issuer}/protocol/openid-connect/token"),
                "end_session_endpoint": format!("{issuer}/protocol/openid-connect/logout"),
            })))
            .mount(&self.server)
            .await;
    }

    pub async fn mount_discovery_down(&self) {
        Mock::given(method("GET"))
            .and(path(DISCOVERY_PATH))
            .respond_with(ResponseTemplate::new(503))
            .mount(&self.server)
            .await;
    }
}
