//! Session types and the credential store.
//!
//! The [`CredentialStore`] is the single source of truth for "are we
//! logged in". It owns the current access/refresh token pair and the
//! authenticated user identity, persists them through [`Storage`] so a
//! restart does not force re-login, and notifies watchers on login and
//! logout. Every other component reads it only through the request
//! gateway.

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use tablefare_core::{UserId, UserRole};

use crate::storage::Storage;

/// Storage keys for persisted client state.
pub mod storage_keys {
    /// Key for the serialized [`super::Session`].
    pub const SESSION: &str = "session";

    /// Prefix for per-table cart caches (`cart:<food_court>:<table>`).
    pub const CART_PREFIX: &str = "cart:";

    /// Prefix for in-flight checkout attempt records
    /// (`checkout:attempt:<intent_id>`).
    pub const CHECKOUT_ATTEMPT_PREFIX: &str = "checkout:attempt:";
}

/// Access/refresh token pair issued by the auth backend.
///
/// Tokens are opaque bearer strings. `Debug` redacts them so they never
/// land in logs.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthTokens {
    /// Short-lived token attached to authorized requests.
    pub access_token: String,
    /// Long-lived token exchanged for a new access token on expiry.
    pub refresh_token: String,
    /// When the pair was obtained (unix seconds).
    pub obtained_at: i64,
}

impl AuthTokens {
    /// Build a pair stamped with the current time.
    #[must_use]
    pub fn new(access_token: String, refresh_token: String) -> Self {
        Self {
            access_token,
            refresh_token,
            obtained_at: chrono::Utc::now().timestamp(),
        }
    }
}

impl std::fmt::Debug for AuthTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthTokens")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("obtained_at", &self.obtained_at)
            .finish()
    }
}

/// Identity of the authenticated user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CurrentUser {
    /// User's backend id.
    pub id: UserId,
    /// Roles granted to the user.
    pub roles: Vec<UserRole>,
}

/// The whole authenticated session. `Default` is logged out.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    /// Current token pair, absent when logged out.
    pub tokens: Option<AuthTokens>,
    /// Authenticated user, absent when logged out.
    pub user: Option<CurrentUser>,
}

impl Session {
    /// Whether the session holds credentials.
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        self.tokens.is_some()
    }
}

// =============================================================================
// CredentialStore
// =============================================================================

/// Owner of the current [`Session`], persisted across restarts.
///
/// The in-memory copy is authoritative for the process lifetime; a failed
/// storage write costs durability, not correctness, and is logged as a
/// warning. Token swaps happen under the write lock so two refreshes can
/// never interleave their read-modify-write.
#[derive(Clone)]
pub struct CredentialStore {
    inner: Arc<CredentialStoreInner>,
}

struct CredentialStoreInner {
    storage: Arc<dyn Storage>,
    session: RwLock<Session>,
    auth_tx: watch::Sender<bool>,
}

impl CredentialStore {
    /// Create a store, restoring any persisted session.
    ///
    /// An unreadable persisted session is discarded with a warning; the
    /// user logs in again rather than the client refusing to start.
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        let session = match storage.load(storage_keys::SESSION) {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|err| {
                tracing::warn!(error = %err, "discarding unreadable persisted session");
                Session::default()
            }),
            Ok(None) => Session::default(),
            Err(err) => {
                tracing::warn!(error = %err, "could not read persisted session");
                Session::default()
            }
        };

        let (auth_tx, _) = watch::channel(session.is_authenticated());

        Self {
            inner: Arc::new(CredentialStoreInner {
                storage,
                session: RwLock::new(session),
                auth_tx,
            }),
        }
    }

    /// Snapshot of the current session.
    #[must_use]
    pub fn get(&self) -> Session {
        self.read().clone()
    }

    /// Replace the whole session (login, signup).
    pub fn set(&self, session: Session) {
        let mut guard = self.write();
        *guard = session;
        self.persist(&guard);
        drop(guard);
        self.notify();
    }

    /// Swap the token pair atomically, leaving the user identity intact.
    /// Used by the gateway after a successful refresh.
    pub fn set_tokens(&self, tokens: AuthTokens) {
        let mut guard = self.write();
        guard.tokens = Some(tokens);
        self.persist(&guard);
        drop(guard);
        self.notify();
    }

    /// Clear the session entirely (logout, irrecoverable refresh failure).
    pub fn clear(&self) {
        let mut guard = self.write();
        *guard = Session::default();
        if let Err(err) = self.inner.storage.remove(storage_keys::SESSION) {
            tracing::warn!(error = %err, "could not remove persisted session");
        }
        drop(guard);
        self.notify();
    }

    /// Current access token, if logged in.
    #[must_use]
    pub fn access_token(&self) -> Option<String> {
        self.read().tokens.as_ref().map(|t| t.access_token.clone())
    }

    /// Current refresh token, if logged in.
    #[must_use]
    pub fn refresh_token(&self) -> Option<String> {
        self.read()
            .tokens
            .as_ref()
            .map(|t| t.refresh_token.clone())
    }

    /// Authenticated user identity, if logged in.
    #[must_use]
    pub fn current_user(&self) -> Option<CurrentUser> {
        self.read().user.clone()
    }

    /// Whether a session is currently held.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.read().is_authenticated()
    }

    /// Subscribe to login/logout transitions.
    #[must_use]
    pub fn watch_authenticated(&self) -> watch::Receiver<bool> {
        self.inner.auth_tx.subscribe()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Session> {
        self.inner
            .session
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Session> {
        self.inner
            .session
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Persist under the caller's write guard so swap+write is one
    /// critical section.
    fn persist(&self, session: &Session) {
        let raw = match serde_json::to_string(session) {
            Ok(raw) => raw,
            Err(err) => {
                tracing::warn!(error = %err, "could not serialize session");
                return;
            }
        };
        if let Err(err) = self.inner.storage.store(storage_keys::SESSION, &raw) {
            // Durability lost, but the in-memory session stays authoritative.
            tracing::warn!(error = %err, "could not persist session");
        }
    }

    fn notify(&self) {
        let authenticated = self.is_authenticated();
        self.inner.auth_tx.send_if_modified(|state| {
            let changed = *state != authenticated;
            *state = authenticated;
            changed
        });
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("authenticated", &self.is_authenticated())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStorage, StorageError};

    fn logged_in_session() -> Session {
        Session {
            tokens: Some(AuthTokens::new("acc".into(), "ref".into())),
            user: Some(CurrentUser {
                id: UserId::new("u1"),
                roles: vec![UserRole::Customer],
            }),
        }
    }

    #[test]
    fn test_set_get_clear() {
        let store = CredentialStore::new(Arc::new(MemoryStorage::new()));
        assert!(!store.is_authenticated());

        store.set(logged_in_session());
        assert!(store.is_authenticated());
        assert_eq!(store.access_token().as_deref(), Some("acc"));
        assert_eq!(store.refresh_token().as_deref(), Some("ref"));

        store.clear();
        assert!(!store.is_authenticated());
        assert_eq!(store.get(), Session::default());
    }

    #[test]
    fn test_survives_restart() {
        let storage = Arc::new(MemoryStorage::new());
        let store = CredentialStore::new(Arc::clone(&storage) as Arc<dyn Storage>);
        store.set(logged_in_session());

        // A second store over the same storage restores the session
        let restored = CredentialStore::new(storage);
        assert!(restored.is_authenticated());
        assert_eq!(restored.access_token().as_deref(), Some("acc"));
    }

    #[test]
    fn test_set_tokens_keeps_user() {
        let store = CredentialStore::new(Arc::new(MemoryStorage::new()));
        store.set(logged_in_session());

        store.set_tokens(AuthTokens::new("acc2".into(), "ref2".into()));
        assert_eq!(store.access_token().as_deref(), Some("acc2"));
        assert_eq!(
            store.current_user().unwrap().id,
            UserId::new("u1"),
        );
    }

    #[test]
    fn test_watch_notification() {
        let store = CredentialStore::new(Arc::new(MemoryStorage::new()));
        let mut rx = store.watch_authenticated();
        assert!(!*rx.borrow_and_update());

        store.set(logged_in_session());
        assert!(rx.has_changed().unwrap());
        assert!(*rx.borrow_and_update());

        // Token swap does not flap the authenticated flag
        store.set_tokens(AuthTokens::new("a2".into(), "r2".into()));
        assert!(!rx.has_changed().unwrap());

        store.clear();
        assert!(rx.has_changed().unwrap());
        assert!(!*rx.borrow_and_update());
    }

    #[test]
    fn test_storage_failure_is_not_fatal() {
        struct FailingStorage;
        impl Storage for FailingStorage {
            fn load(&self, _key: &str) -> Result<Option<String>, StorageError> {
                Ok(None)
            }
            fn store(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
                Err(StorageError::Io(std::io::Error::other("disk full")))
            }
            fn remove(&self, _key: &str) -> Result<(), StorageError> {
                Err(StorageError::Io(std::io::Error::other("disk full")))
            }
            fn keys_with_prefix(&self, _prefix: &str) -> Result<Vec<String>, StorageError> {
                Ok(Vec::new())
            }
        }

        let store = CredentialStore::new(Arc::new(FailingStorage));
        store.set(logged_in_session());

        // In-memory copy stays authoritative despite the failed write
        assert!(store.is_authenticated());
        store.clear();
        assert!(!store.is_authenticated());
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let tokens = AuthTokens::new("super-secret-access".into(), "super-secret-refresh".into());
        let debug = format!("{tokens:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("super-secret-access"));
        assert!(!debug.contains("super-secret-refresh"));
    }
}
