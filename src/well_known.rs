use serde::{Deserialize, Serialize};

/// Path of the OIDC discovery document relative to the issuer.
pub const OPENID_CONFIGURATION_PATH: &str = ".well-known/openid-configuration";

/// Subset of the OIDC discovery document this crate consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[non_exhaustive]
pub struct OpenIdConfiguration {
    pub issuer: String,
    pub token_endpoint: String,
    #[serde(default)]
    pub authorization_endpoint: Option<String>,
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,
    #[serde(default)]
    pub end_session_endpoint: Option<String>,
    #[serde(default)]
    pub revocation_endpoint: Option<String>,
}
