//! Login, signup, and logout against the auth backend.
//!
//! These are the only operations that create a session; the credential
//! store is written here and by the gateway's refresh path, nowhere else.

use tracing::instrument;

use tablefare_core::Email;

use crate::api::types::{AuthResponse, LoginRequest, LogoutRequest, SignupRequest};
use crate::api::{ApiError, ApiGateway, Transport, paths};
use crate::session::{AuthTokens, CurrentUser, Session};

/// Session lifecycle operations.
pub struct AuthService<T> {
    gateway: ApiGateway<T>,
}

impl<T> Clone for AuthService<T> {
    fn clone(&self) -> Self {
        Self {
            gateway: self.gateway.clone(),
        }
    }
}

impl<T: Transport> AuthService<T> {
    /// Create the service over a gateway.
    #[must_use]
    pub const fn new(gateway: ApiGateway<T>) -> Self {
        Self { gateway }
    }

    /// Log in with email and password, storing the issued session.
    ///
    /// # Errors
    ///
    /// [`ApiError::Status`] with status 401 means invalid credentials;
    /// other statuses and transport failures pass through.
    #[instrument(skip(self, password), fields(email = %email))]
    pub async fn login(&self, email: &Email, password: &str) -> Result<CurrentUser, ApiError> {
        let request = LoginRequest {
            email: email.as_str().to_owned(),
            password: password.to_owned(),
        };
        let response: AuthResponse = self.gateway.post_public(paths::LOGIN, &request).await?;
        Ok(self.store_session(response))
    }

    /// Create an account and store the issued session.
    ///
    /// # Errors
    ///
    /// Backend validation failures surface as [`ApiError::Status`].
    #[instrument(skip(self, password), fields(email = %email))]
    pub async fn signup(
        &self,
        name: &str,
        email: &Email,
        password: &str,
    ) -> Result<CurrentUser, ApiError> {
        let request = SignupRequest {
            name: name.to_owned(),
            email: email.as_str().to_owned(),
            password: password.to_owned(),
        };
        let response: AuthResponse = self.gateway.post_public(paths::SIGNUP, &request).await?;
        Ok(self.store_session(response))
    }

    /// Log out: best-effort server-side revocation, then clear the store.
    ///
    /// The store is cleared even when the revocation call fails; being
    /// logged out locally must never depend on the network.
    #[instrument(skip(self))]
    pub async fn logout(&self) {
        if let Some(refresh_token) = self.gateway.credentials().refresh_token() {
            let request = LogoutRequest { refresh_token };
            if let Err(err) = self.gateway.post_unit(paths::LOGOUT, &request).await {
                tracing::warn!(error = %err, "server-side logout failed; clearing local session anyway");
            }
        }
        self.gateway.credentials().clear();
    }

    fn store_session(&self, response: AuthResponse) -> CurrentUser {
        let user = CurrentUser {
            id: response.user.id,
            roles: response.user.roles,
        };
        self.gateway.credentials().set(Session {
            tokens: Some(AuthTokens::new(
                response.access_token,
                response.refresh_token,
            )),
            user: Some(user.clone()),
        });
        user
    }
}

impl<T> std::fmt::Debug for AuthService<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthService").finish_non_exhaustive()
    }
}
