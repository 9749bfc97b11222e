//! Coalesced access-token refresh.
//!
//! Concurrent callers holding the same refresh token share one network
//! exchange. The in-flight table maps a refresh token to the shared handle
//! of the exchange currently running for it:
//!
//! - lookup and insert happen under one lock acquisition, so two callers can
//!   never both start an exchange for the same token;
//! - the exchange runs on its own task and removes its table entry (success,
//!   failure or panic) before its result becomes visible to any waiter, so a
//!   caller that observed the result can immediately start a new exchange.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};
use time::OffsetDateTime;

use crate::credential::{SessionCredential, token_fingerprint};
use crate::error::RefreshError;
use crate::traits::TokenEndpoint;
use crate::types::{AccessToken, RefreshToken, TokenResponse};

/// Lifetime assumed when the provider omits `expires_in`.
pub const DEFAULT_EXPIRES_IN_SECS: u64 = 300;

type RefreshOutcome = Result<SessionCredential, RefreshError>;
type InFlight = Shared<BoxFuture<'static, RefreshOutcome>>;
type InFlightTable = Arc<Mutex<HashMap<RefreshToken, InFlight>>>;

/// De-duplicates refresh exchanges per refresh token.
pub struct RefreshCoordinator<E> {
    endpoint: Arc<E>,
    in_flight: InFlightTable,
}

// Manual Clone: avoid derive adding `E: Clone`.
impl<E> Clone for RefreshCoordinator<E> {
    fn clone(&self) -> Self {
        Self {
            endpoint: self.endpoint.clone(),
            in_flight: self.in_flight.clone(),
        }
    }
}

impl<E: TokenEndpoint> RefreshCoordinator<E> {
    #[must_use]
    pub fn new(endpoint: E) -> Self {
        Self::from_shared(Arc::new(endpoint))
    }

    #[must_use]
    pub fn from_shared(endpoint: Arc<E>) -> Self {
        Self {
            endpoint,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Renew `credential`, joining an exchange already running for its
    /// refresh token if there is one.
    ///
    /// Must be called within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// [`RefreshError::MissingRefreshToken`] without touching the network
    /// when the credential has no refresh token; otherwise whatever the
    /// shared exchange produced. Failures are never retried here.
    pub async fn refresh(&self, credential: &SessionCredential) -> RefreshOutcome {
        let Some(refresh_token) = credential.refresh_token().cloned() else {
            tracing::warn!("Refresh requested for credential without refresh token");
            return Err(RefreshError::MissingRefreshToken);
        };

        let operation = {
            let mut table = lock(&self.in_flight);
            if let Some(existing) = table.get(&refresh_token) {
                tracing::debug!(
                    token = %token_fingerprint(refresh_token.expose()),
                    "Joining in-flight token refresh"
                );
                existing.clone()
            } else {
                let operation = self.start(refresh_token.clone(), credential.clone());
                table.insert(refresh_token, operation.clone());
                operation
            }
        };

        operation.await
    }

    /// Whether an exchange is currently running for `refresh_token`.
    #[must_use]
    pub fn is_refreshing(&self, refresh_token: &RefreshToken) -> bool {
        lock(&self.in_flight).contains_key(refresh_token)
    }

    /// Number of exchanges currently running.
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        lock(&self.in_flight).len()
    }

    // Called with the table lock held. The guard's removal needs the same
    // lock, so it cannot run before the caller has inserted the entry.
    fn start(&self, refresh_token: RefreshToken, credential: SessionCredential) -> InFlight {
        let endpoint = Arc::clone(&self.endpoint);
        let guard = InFlightGuard {
            table: Arc::clone(&self.in_flight),
            key: refresh_token.clone(),
        };

        let task = tokio::spawn(async move {
            let _guard = guard;
            let fingerprint = token_fingerprint(refresh_token.expose());
            tracing::debug!(token = %fingerprint, "Refreshing access token");

            let outcome = match endpoint.refresh_token(&refresh_token).await {
                Ok(response) => renew(&credential, response, OffsetDateTime::now_utc()),
                Err(e) => Err(e),
            };

            match &outcome {
                Ok(_) => tracing::info!(token = %fingerprint, "Access token refreshed"),
                Err(e) => tracing::warn!(token = %fingerprint, error = %e, "Token refresh failed"),
            }
            outcome
        });

        async move {
            task.await.unwrap_or_else(|e| {
                tracing::error!(error = %e, "Token refresh task did not complete");
                Err(RefreshError::Aborted)
            })
        }
        .boxed()
        .shared()
    }
}

/// Build the successor credential from a token endpoint response.
fn renew(
    credential: &SessionCredential,
    response: TokenResponse,
    now: OffsetDateTime,
) -> RefreshOutcome {
    let access_token = response
        .access_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| RefreshError::MalformedResponse("missing access_token".into()))?;

    let expires_in = response.expires_in.unwrap_or_else(|| {
        tracing::warn!(
            default_secs = DEFAULT_EXPIRES_IN_SECS,
            "Token response without expires_in"
        );
        DEFAULT_EXPIRES_IN_SECS
    });
    let expires_at = i64::try_from(expires_in)
        .ok()
        .and_then(|secs| now.checked_add(time::Duration::seconds(secs)))
        .ok_or_else(|| RefreshError::MalformedResponse("expires_in out of range".into()))?;

    let rotated = response
        .refresh_token
        .filter(|t| !t.is_empty())
        .map(RefreshToken::new);

    Ok(credential.renewed(AccessToken::new(access_token), expires_at, rotated))
}

/// Removes one in-flight entry when the owning exchange ends, however it ends.
struct InFlightGuard {
    table: InFlightTable,
    key: RefreshToken,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        lock(&self.table).remove(&self.key);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
