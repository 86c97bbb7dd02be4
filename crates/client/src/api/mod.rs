//! Authenticated request gateway.
//!
//! Every outbound call to the order backend goes through [`ApiGateway`].
//! The gateway attaches the current access token and handles exactly one
//! class of recoverable failure: HTTP 401 (expired/invalid access token).
//!
//! # Refresh single-flight
//!
//! Concurrent requests can all hit 401 in the same expiry episode. The
//! gateway collapses them into **one** refresh call: a caller that loses
//! the race waits for the winner's outcome instead of issuing its own
//! refresh. On refresh success the original request is replayed once with
//! the new token; on refresh failure the credential store is cleared and
//! every waiter gets [`ApiError::SessionExpired`], which callers can tell
//! apart from ordinary failures. A replayed request that still comes back
//! 401 is treated the same as a refresh failure, so a misbehaving backend
//! cannot cause a refresh loop.
//!
//! Success and non-401 errors pass through untouched; the gateway never
//! retries them.

pub mod transport;
pub mod types;

pub use transport::{ApiRequest, ApiResponse, HttpTransport, Method, Transport, TransportError};

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::instrument;

use crate::session::{AuthTokens, CredentialStore};
use types::{RefreshRequest, RefreshResponse};

/// Backend endpoint paths.
pub mod paths {
    use crate::cart::CartKey;
    use tablefare_core::ItemId;

    pub const REFRESH: &str = "/auth/refresh-token";
    pub const LOGIN: &str = "/auth/login";
    pub const SIGNUP: &str = "/auth/signup";
    pub const LOGOUT: &str = "/auth/logout";
    pub const CHECKOUT_INITIATE: &str = "/checkout/initiate";
    pub const CHECKOUT_FINALIZE: &str = "/checkout/finalize";
    pub const ORDERS: &str = "/orders";

    /// The cart for one table.
    #[must_use]
    pub fn cart(key: &CartKey) -> String {
        format!("/carts/{}/{}", key.food_court_id, key.table_id)
    }

    /// The item collection of one table's cart.
    #[must_use]
    pub fn cart_items(key: &CartKey) -> String {
        format!("{}/items", cart(key))
    }

    /// One item line in a table's cart.
    #[must_use]
    pub fn cart_item(key: &CartKey, item_id: &ItemId) -> String {
        format!("{}/items/{item_id}", cart(key))
    }
}

/// Errors surfaced by the gateway.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request never produced an HTTP response.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The backend answered with a non-success status. Passed through
    /// untouched; the gateway does not retry these.
    #[error("backend returned {status}: {message}")]
    Status { status: u16, message: String },

    /// The session could not be refreshed (or a refreshed token was
    /// rejected). The credential store has been cleared; the caller must
    /// send the user back to login.
    #[error("session expired")]
    SessionExpired,

    /// The response body was not the JSON shape the endpoint promises.
    #[error("response parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

impl ApiError {
    /// Whether this is the distinguished session-fatal error.
    #[must_use]
    pub const fn is_session_expired(&self) -> bool {
        matches!(self, Self::SessionExpired)
    }

    fn from_response(response: &ApiResponse) -> Self {
        Self::Status {
            status: response.status,
            message: response.body.chars().take(200).collect(),
        }
    }
}

// =============================================================================
// RefreshCoordinator
// =============================================================================

/// Serializes refresh attempts so one expiry episode produces at most one
/// backend refresh call.
///
/// Callers record the epoch before issuing their request. On 401 they
/// acquire the lock; if the epoch advanced while they waited, another
/// caller already refreshed and they reuse the new token. If the store no
/// longer holds a refresh token, a concurrent refresh already failed and
/// they inherit that outcome without a second call.
struct RefreshCoordinator {
    lock: tokio::sync::Mutex<()>,
    epoch: AtomicU64,
}

impl RefreshCoordinator {
    fn new() -> Self {
        Self {
            lock: tokio::sync::Mutex::new(()),
            epoch: AtomicU64::new(0),
        }
    }

    fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    fn advance(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
    }
}

// =============================================================================
// ApiGateway
// =============================================================================

/// The authenticated request gateway.
///
/// Cheaply cloneable; all clones share the credential store and the
/// refresh coordinator.
pub struct ApiGateway<T> {
    inner: Arc<GatewayInner<T>>,
}

struct GatewayInner<T> {
    transport: T,
    credentials: CredentialStore,
    refresh: RefreshCoordinator,
}

impl<T> Clone for ApiGateway<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport> ApiGateway<T> {
    /// Create a gateway over `transport` and `credentials`.
    #[must_use]
    pub fn new(transport: T, credentials: CredentialStore) -> Self {
        Self {
            inner: Arc::new(GatewayInner {
                transport,
                credentials,
                refresh: RefreshCoordinator::new(),
            }),
        }
    }

    /// The credential store this gateway reads and (on refresh) writes.
    #[must_use]
    pub fn credentials(&self) -> &CredentialStore {
        &self.inner.credentials
    }

    /// Issue an authenticated request, refreshing the session once if it
    /// comes back 401.
    ///
    /// # Errors
    ///
    /// [`ApiError::SessionExpired`] when the session cannot be refreshed;
    /// transport errors otherwise. Non-401 HTTP statuses are returned in
    /// the `Ok` response for the caller to interpret.
    #[instrument(skip(self, request), fields(path = %request.path))]
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        // Epoch is read before the token: if a refresh lands in between,
        // the request simply goes out with the fresh token.
        let observed_epoch = self.inner.refresh.current_epoch();
        let authed = request
            .clone()
            .with_bearer(self.inner.credentials.access_token());

        let response = self.inner.transport.send(authed).await?;
        if response.status != ApiResponse::UNAUTHORIZED {
            // Success or any other error passes through untouched.
            return Ok(response);
        }

        self.refresh_session(observed_epoch).await?;

        // Replay exactly once with the refreshed token.
        let replayed = request.with_bearer(self.inner.credentials.access_token());
        let response = self.inner.transport.send(replayed).await?;
        if response.status == ApiResponse::UNAUTHORIZED {
            // A freshly refreshed token was rejected; do not loop.
            tracing::warn!("replayed request rejected after refresh; clearing session");
            self.inner.credentials.clear();
            return Err(ApiError::SessionExpired);
        }
        Ok(response)
    }

    /// Refresh the access token, collapsing concurrent callers into one
    /// backend call per expiry episode.
    async fn refresh_session(&self, observed_epoch: u64) -> Result<(), ApiError> {
        let _guard = self.inner.refresh.lock.lock().await;

        if self.inner.refresh.current_epoch() != observed_epoch {
            // Someone refreshed while we waited for the lock; share their
            // outcome.
            return if self.inner.credentials.is_authenticated() {
                Ok(())
            } else {
                Err(ApiError::SessionExpired)
            };
        }

        let Some(refresh_token) = self.inner.credentials.refresh_token() else {
            // No refresh token: either never logged in, or a concurrent
            // refresh failed and cleared the store.
            return Err(ApiError::SessionExpired);
        };

        let request = ApiRequest::new(Method::Post, paths::REFRESH).with_body(
            serde_json::to_value(RefreshRequest { refresh_token })?,
        );

        match self.inner.transport.send(request).await {
            Ok(response) if response.is_success() => {
                match serde_json::from_str::<RefreshResponse>(&response.body) {
                    Ok(tokens) => {
                        // Store both tokens atomically; the backend rotates
                        // the refresh token on every use.
                        self.inner.credentials.set_tokens(AuthTokens::new(
                            tokens.access_token,
                            tokens.refresh_token,
                        ));
                        self.inner.refresh.advance();
                        tracing::debug!("access token refreshed");
                        Ok(())
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "unreadable refresh response; clearing session");
                        self.inner.credentials.clear();
                        Err(ApiError::SessionExpired)
                    }
                }
            }
            Ok(response) => {
                tracing::warn!(status = response.status, "refresh token rejected; clearing session");
                self.inner.credentials.clear();
                Err(ApiError::SessionExpired)
            }
            Err(err) => {
                // Network failure during refresh is session-fatal too: the
                // caller cannot tell whether the rotation landed server-side.
                tracing::warn!(error = %err, "refresh call failed; clearing session");
                self.inner.credentials.clear();
                Err(ApiError::SessionExpired)
            }
        }
    }

    // =========================================================================
    // Typed helpers
    // =========================================================================

    /// GET `path` and deserialize the JSON response.
    ///
    /// # Errors
    ///
    /// See [`ApiGateway::send`]; additionally maps non-2xx statuses to
    /// [`ApiError::Status`] and parse failures to [`ApiError::Parse`].
    pub async fn get<R: DeserializeOwned>(&self, path: &str) -> Result<R, ApiError> {
        self.request_json(Method::Get, path, None).await
    }

    /// POST `body` to `path` and deserialize the JSON response.
    ///
    /// # Errors
    ///
    /// See [`ApiGateway::get`].
    pub async fn post<R: DeserializeOwned>(
        &self,
        path: &str,
        body: &impl Serialize,
    ) -> Result<R, ApiError> {
        self.request_json(Method::Post, path, Some(serde_json::to_value(body)?))
            .await
    }

    /// PATCH `body` to `path` and deserialize the JSON response.
    ///
    /// # Errors
    ///
    /// See [`ApiGateway::get`].
    pub async fn patch<R: DeserializeOwned>(
        &self,
        path: &str,
        body: &impl Serialize,
    ) -> Result<R, ApiError> {
        self.request_json(Method::Patch, path, Some(serde_json::to_value(body)?))
            .await
    }

    /// DELETE `path` and deserialize the JSON response.
    ///
    /// # Errors
    ///
    /// See [`ApiGateway::get`].
    pub async fn delete<R: DeserializeOwned>(&self, path: &str) -> Result<R, ApiError> {
        self.request_json(Method::Delete, path, None).await
    }

    /// DELETE `path`, expecting an empty (or ignorable) response body.
    ///
    /// # Errors
    ///
    /// See [`ApiGateway::get`].
    pub async fn delete_unit(&self, path: &str) -> Result<(), ApiError> {
        self.request_unit(Method::Delete, path, None).await
    }

    /// POST `body` to `path`, expecting an empty (or ignorable) response.
    ///
    /// # Errors
    ///
    /// See [`ApiGateway::get`].
    pub async fn post_unit(&self, path: &str, body: &impl Serialize) -> Result<(), ApiError> {
        self.request_unit(Method::Post, path, Some(serde_json::to_value(body)?))
            .await
    }

    /// POST without authentication and without the 401 refresh path.
    ///
    /// Used by login/signup, where a 401 means bad credentials, not an
    /// expired session.
    ///
    /// # Errors
    ///
    /// Maps non-2xx statuses to [`ApiError::Status`], parse failures to
    /// [`ApiError::Parse`].
    pub async fn post_public<R: DeserializeOwned>(
        &self,
        path: &str,
        body: &impl Serialize,
    ) -> Result<R, ApiError> {
        let request =
            ApiRequest::new(Method::Post, path).with_body(serde_json::to_value(body)?);
        let response = self.inner.transport.send(request).await?;
        if !response.is_success() {
            return Err(ApiError::from_response(&response));
        }
        Ok(serde_json::from_str(&response.body)?)
    }

    async fn request_json<R: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<R, ApiError> {
        let mut request = ApiRequest::new(method, path);
        if let Some(body) = body {
            request = request.with_body(body);
        }
        let response = self.send(request).await?;
        if !response.is_success() {
            return Err(ApiError::from_response(&response));
        }
        Ok(serde_json::from_str(&response.body)?)
    }

    async fn request_unit(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<(), ApiError> {
        let mut request = ApiRequest::new(method, path);
        if let Some(body) = body {
            request = request.with_body(body);
        }
        let response = self.send(request).await?;
        if !response.is_success() {
            return Err(ApiError::from_response(&response));
        }
        Ok(())
    }
}

impl<T> std::fmt::Debug for ApiGateway<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiGateway").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_display() {
        let err = ApiError::Status {
            status: 404,
            message: "no such cart".to_string(),
        };
        assert_eq!(err.to_string(), "backend returned 404: no such cart");

        assert_eq!(ApiError::SessionExpired.to_string(), "session expired");
        assert!(ApiError::SessionExpired.is_session_expired());
    }

    #[test]
    fn test_error_message_truncated() {
        let response = ApiResponse {
            status: 500,
            body: "x".repeat(1000),
        };
        let err = ApiError::from_response(&response);
        match err {
            ApiError::Status { message, .. } => assert_eq!(message.len(), 200),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_cart_paths() {
        let key = crate::cart::CartKey::new("fc_1", "t_4");
        assert_eq!(paths::cart(&key), "/carts/fc_1/t_4");
        assert_eq!(paths::cart_items(&key), "/carts/fc_1/t_4/items");
        assert_eq!(
            paths::cart_item(&key, &tablefare_core::ItemId::new("itm_9")),
            "/carts/fc_1/t_4/items/itm_9"
        );
    }
}
