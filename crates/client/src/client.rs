//! Top-level client facade wiring the components together.
//!
//! The UI shell holds one [`TablefareClient`] and reaches every
//! subsystem through it. Construction is the composition root: one
//! storage handle, one credential store, one gateway shared by all
//! services, so refresh single-flight and cart state hold across the
//! whole client.

use std::sync::Arc;

use tokio::sync::watch;

use crate::api::{ApiGateway, HttpTransport, Transport};
use crate::auth::AuthService;
use crate::cart::CartReconciler;
use crate::checkout::{CheckoutOrchestrator, PaymentPrompt};
use crate::config::ClientConfig;
use crate::orders::OrdersService;
use crate::session::CredentialStore;
use crate::storage::{FileStorage, Storage, StorageError};

/// The assembled ordering client.
pub struct TablefareClient<T, P> {
    credentials: CredentialStore,
    auth: AuthService<T>,
    carts: CartReconciler<T>,
    orders: OrdersService<T>,
    checkout: CheckoutOrchestrator<T, P>,
}

/// The production client: HTTP transport, file-backed storage.
pub type Client<P> = TablefareClient<HttpTransport, P>;

impl<P: PaymentPrompt> Client<P> {
    /// Build a client from configuration, opening the durable store under
    /// the configured directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage directory cannot be opened.
    pub fn new(config: &ClientConfig, prompt: P) -> Result<Self, StorageError> {
        let storage: Arc<dyn Storage> = Arc::new(FileStorage::open(&config.storage_dir)?);
        let transport = HttpTransport::new(config);
        Ok(Self::with_parts(config, transport, storage, prompt))
    }
}

impl<T: Transport, P: PaymentPrompt> TablefareClient<T, P> {
    /// Assemble a client from explicit parts. Tests use this with an
    /// in-memory store and a scripted transport/prompt.
    #[must_use]
    pub fn with_parts(
        config: &ClientConfig,
        transport: T,
        storage: Arc<dyn Storage>,
        prompt: P,
    ) -> Self {
        let credentials = CredentialStore::new(Arc::clone(&storage));
        let gateway = ApiGateway::new(transport, credentials.clone());
        let auth = AuthService::new(gateway.clone());
        let carts = CartReconciler::new(gateway.clone(), Arc::clone(&storage), config);
        let orders = OrdersService::new(gateway.clone());
        let checkout = CheckoutOrchestrator::new(
            gateway,
            prompt,
            carts.clone(),
            orders.clone(),
            storage,
        );

        Self {
            credentials,
            auth,
            carts,
            orders,
            checkout,
        }
    }

    /// Session lifecycle operations.
    #[must_use]
    pub const fn auth(&self) -> &AuthService<T> {
        &self.auth
    }

    /// The per-table cart reconciler.
    #[must_use]
    pub const fn carts(&self) -> &CartReconciler<T> {
        &self.carts
    }

    /// Order history.
    #[must_use]
    pub const fn orders(&self) -> &OrdersService<T> {
        &self.orders
    }

    /// The checkout orchestrator.
    #[must_use]
    pub const fn checkout(&self) -> &CheckoutOrchestrator<T, P> {
        &self.checkout
    }

    /// The credential store (read-only interest; writes happen through
    /// [`Self::auth`] and the gateway's refresh path).
    #[must_use]
    pub const fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    /// Whether a session is currently held.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.credentials.is_authenticated()
    }

    /// Subscribe to login/logout transitions.
    #[must_use]
    pub fn watch_authenticated(&self) -> watch::Receiver<bool> {
        self.credentials.watch_authenticated()
    }
}

impl<T, P> std::fmt::Debug for TablefareClient<T, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TablefareClient")
            .field("authenticated", &self.credentials.is_authenticated())
            .finish_non_exhaustive()
    }
}
