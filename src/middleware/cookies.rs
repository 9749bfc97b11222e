use axum_extra::extract::PrivateCookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};
use time::Duration;

use super::config::GateSettings;
use crate::credential::SessionCredential;

/// Largest `name=value` pair browsers reliably store.
pub(crate) const MAX_COOKIE_BYTES: usize = 4096;

// AES-GCM nonce and tag wrapped around the plaintext by the private jar.
const SEALING_OVERHEAD: usize = 12 + 16;

/// Create the encrypted credential cookie.
///
/// `None` only if the credential cannot be serialized, which is logged.
pub(super) fn credential_cookie(
    settings: &GateSettings,
    credential: &SessionCredential,
) -> Option<Cookie<'static>> {
    let payload = serde_json::to_string(credential)
        .inspect_err(|e| tracing::error!(error = %e, "Credential serialization failed"))
        .ok()?;

    let sealed_len = sealed_cookie_len(&settings.session_cookie_name, payload.len());
    if sealed_len > MAX_COOKIE_BYTES {
        tracing::warn!(
            bytes = sealed_len,
            limit = MAX_COOKIE_BYTES,
            "Credential cookie exceeds the browser size limit and will be dropped by the client"
        );
    }

    Some(
        Cookie::build((settings.session_cookie_name.clone(), payload))
            .http_only(true)
            .secure(settings.secure_cookies)
            .same_site(SameSite::Lax)
            .path("/".to_string())
            .max_age(settings.session_max_age)
            .build(),
    )
}

/// Length of `name=value` once the private jar has encrypted and
/// base64-encoded a payload of `payload_len` bytes.
pub(crate) fn sealed_cookie_len(name: &str, payload_len: usize) -> usize {
    let sealed = payload_len + SEALING_OVERHEAD;
    name.len() + 1 + sealed.div_ceil(3) * 4
}

/// Create removal cookie for the credential.
pub(super) fn clear_credential_cookie(name: &str) -> Cookie<'static> {
    Cookie::build((name.to_string(), ""))
        .path("/".to_string())
        .max_age(Duration::ZERO)
        .build()
}

/// Decrypt and decode the credential, if any.
///
/// Cookies that fail authentication are dropped by the jar; payloads that
/// no longer decode are treated as absent.
pub(super) fn read_credential(jar: &PrivateCookieJar, name: &str) -> Option<SessionCredential> {
    let cookie = jar.get(name)?;
    serde_json::from_str(cookie.value())
        .inspect_err(|e| tracing::debug!(error = %e, "Discarding undecodable credential cookie"))
        .ok()
}

/// Add (or replace) the credential cookie.
pub(super) fn store_credential(
    jar: PrivateCookieJar,
    settings: &GateSettings,
    credential: &SessionCredential,
) -> PrivateCookieJar {
    match credential_cookie(settings, credential) {
        Some(cookie) => jar.add(cookie),
        None => jar,
    }
}
