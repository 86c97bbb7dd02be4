//! Cart reconciliation between the optimistic local cache and the
//! server-authoritative store.
//!
//! The server's copy of a cart is authoritative; the local copy is a
//! cache that may be briefly stale or ahead. Every mutation is applied to
//! the cache **before** its network call resolves so the UI reflects
//! intent immediately, then:
//!
//! - on success, the server's full-cart response replaces the cache (once
//!   no other mutations are in flight);
//! - on failure, the cache rolls back to the last confirmed server state
//!   and the failure is reported - the cache never silently diverges.
//!
//! Mutations are not globally ordered: a response is applied only if it
//! belongs to the most recently issued mutation for that item, so a slow
//! response can never clobber a newer intent ("last issued wins").
//!
//! Only one client session manipulates a given table's cart, so mutations
//! are last-writer-wins against the server; no merge is attempted.

mod types;

pub use types::{Cart, CartKey, CartLine, CartTotals, MenuItemRef};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rust_decimal::Decimal;
use thiserror::Error;
use tokio::sync::watch;
use tracing::instrument;

use tablefare_core::{CurrencyCode, ItemId};

use crate::api::types::{AddItemRequest, CartLinePayload, CartPayload, SetQuantityRequest};
use crate::api::{ApiError, ApiGateway, Transport, paths};
use crate::config::ClientConfig;
use crate::storage::Storage;

/// Errors from cart operations.
#[derive(Debug, Error)]
pub enum CartError {
    /// The backend call failed; the optimistic change was rolled back.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// A quantity change was requested for an item the cart does not hold.
    #[error("item {0} is not in the cart")]
    UnknownItem(ItemId),
}

impl CartError {
    /// Whether the underlying failure is the session-fatal one.
    #[must_use]
    pub const fn is_session_expired(&self) -> bool {
        matches!(self, Self::Api(err) if err.is_session_expired())
    }
}

/// Result of a [`CartReconciler::load`]. When the server was unreachable
/// the cart comes from the durable local cache (possibly stale) and
/// `offline` carries the failure that was swallowed.
#[derive(Debug)]
pub struct LoadedCart {
    pub cart: Cart,
    pub offline: Option<ApiError>,
}

// =============================================================================
// CartReconciler
// =============================================================================

/// Presents a single current [`Cart`] per (food court, table) key, backed
/// by server state and tolerant of transient network loss.
///
/// Cheaply cloneable; all clones share the per-table state.
pub struct CartReconciler<T> {
    inner: Arc<ReconcilerInner<T>>,
}

impl<T> Clone for CartReconciler<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct ReconcilerInner<T> {
    gateway: ApiGateway<T>,
    storage: Arc<dyn Storage>,
    tax_rate: Decimal,
    currency: CurrencyCode,
    tables: Mutex<HashMap<CartKey, TableState>>,
}

/// Reconciliation state for one table.
struct TableState {
    /// What the UI sees: confirmed server state plus unresolved
    /// optimistic mutations.
    cache: Cart,
    /// Last state confirmed by the server; the rollback target.
    confirmed: Cart,
    /// Monotonic sequence of issued mutations for this table.
    next_seq: u64,
    /// Latest issued mutation per item; responses for superseded
    /// mutations are discarded.
    latest_by_item: HashMap<ItemId, u64>,
    /// Mutations still waiting on the network.
    pending: u32,
    tx: watch::Sender<Cart>,
}

impl TableState {
    fn restore(key: &CartKey, storage: &dyn Storage) -> Self {
        let cache = match storage.load(&key.storage_key()) {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|err| {
                tracing::warn!(%key, error = %err, "discarding unreadable cached cart");
                Cart::empty(key.clone())
            }),
            Ok(None) => Cart::empty(key.clone()),
            Err(err) => {
                tracing::warn!(%key, error = %err, "could not read cached cart");
                Cart::empty(key.clone())
            }
        };

        let confirmed = cache.clone();
        let (tx, _) = watch::channel(cache.clone());
        Self {
            cache,
            confirmed,
            next_seq: 0,
            latest_by_item: HashMap::new(),
            pending: 0,
            tx,
        }
    }

    /// Record a newly issued mutation for `item_id` and return its
    /// sequence number.
    fn issue(&mut self, item_id: &ItemId) -> u64 {
        self.next_seq += 1;
        self.latest_by_item.insert(item_id.clone(), self.next_seq);
        self.pending += 1;
        self.next_seq
    }

    fn publish(&self) {
        self.tx.send_replace(self.cache.clone());
    }
}

impl<T: Transport> CartReconciler<T> {
    /// Create a reconciler over a gateway and durable storage.
    #[must_use]
    pub fn new(gateway: ApiGateway<T>, storage: Arc<dyn Storage>, config: &ClientConfig) -> Self {
        Self {
            inner: Arc::new(ReconcilerInner {
                gateway,
                storage,
                tax_rate: config.tax_rate,
                currency: config.currency,
                tables: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Fetch the server cart, replacing the local cache on success.
    ///
    /// On failure the durable local cache (or an empty cart) is served
    /// instead and the swallowed error is reported in
    /// [`LoadedCart::offline`]. A load that resolves while a mutation is
    /// still in flight updates only the confirmed snapshot, never the
    /// optimistic cache.
    ///
    /// # Errors
    ///
    /// Only [`ApiError::SessionExpired`] is fatal here.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn load(&self, key: &CartKey) -> Result<LoadedCart, CartError> {
        match self
            .inner
            .gateway
            .get::<CartPayload>(&paths::cart(key))
            .await
        {
            Ok(payload) => {
                let cart = self.with_state(key, |this, st| {
                    st.confirmed = Cart::from_payload(key.clone(), payload);
                    if st.pending == 0 {
                        st.cache = st.confirmed.clone();
                        this.persist_cache(st);
                        st.publish();
                    } else {
                        tracing::debug!(%key, "load resolved with mutations in flight; keeping optimistic cache");
                    }
                    st.cache.clone()
                });
                Ok(LoadedCart {
                    cart,
                    offline: None,
                })
            }
            Err(err) if err.is_session_expired() => Err(err.into()),
            Err(err) => {
                tracing::warn!(%key, error = %err, "cart load failed; serving local cache");
                let cart = self.with_state(key, |_, st| st.cache.clone());
                Ok(LoadedCart {
                    cart,
                    offline: Some(err),
                })
            }
        }
    }

    /// Add `quantity` units of `item`, merging into an existing line.
    ///
    /// # Errors
    ///
    /// On backend failure the optimistic change is rolled back and the
    /// error returned.
    #[instrument(skip(self, item), fields(key = %key, item_id = %item.item_id))]
    pub async fn add_item(
        &self,
        key: &CartKey,
        item: MenuItemRef,
        quantity: u32,
    ) -> Result<Cart, CartError> {
        let quantity = quantity.max(1);

        let (seq, cart_version) = self.with_state(key, |this, st| {
            let seq = st.issue(&item.item_id);
            st.cache.apply_add(&item, quantity);
            this.persist_cache(st);
            st.publish();
            (seq, st.cache.last_server_version.clone())
        });

        let request = AddItemRequest {
            line: CartLinePayload {
                item_id: item.item_id.clone(),
                name: item.name.clone(),
                unit_price: item.unit_price,
                quantity,
                outlet_id: item.outlet_id.clone(),
                special_instructions: item.special_instructions.clone(),
            },
            cart_version,
        };

        let result = self
            .inner
            .gateway
            .post::<CartPayload>(&paths::cart_items(key), &request)
            .await;

        self.resolve(key, &item.item_id, seq, result)
    }

    /// Set the quantity of an existing line. Quantity 0 removes the line.
    ///
    /// # Errors
    ///
    /// [`CartError::UnknownItem`] if the cart holds no such line; backend
    /// failures roll back the optimistic change.
    #[instrument(skip(self), fields(key = %key, item_id = %item_id, quantity))]
    pub async fn set_quantity(
        &self,
        key: &CartKey,
        item_id: &ItemId,
        quantity: u32,
    ) -> Result<Cart, CartError> {
        if quantity == 0 {
            // A line at 0 is a removal, never a persisted state.
            return self.remove_item(key, item_id).await;
        }

        let issued = self.with_state(key, |this, st| {
            if st.cache.line(item_id).is_none() {
                return None;
            }
            let seq = st.issue(item_id);
            st.cache.apply_set_quantity(item_id, quantity);
            this.persist_cache(st);
            st.publish();
            Some((seq, st.cache.last_server_version.clone()))
        });

        let Some((seq, cart_version)) = issued else {
            return Err(CartError::UnknownItem(item_id.clone()));
        };

        let request = SetQuantityRequest {
            quantity,
            cart_version,
        };

        let result = self
            .inner
            .gateway
            .patch::<CartPayload>(&paths::cart_item(key, item_id), &request)
            .await;

        self.resolve(key, item_id, seq, result)
    }

    /// Remove the line for `item_id`. Removing an absent line is a no-op.
    ///
    /// # Errors
    ///
    /// Backend failures roll back the optimistic change.
    #[instrument(skip(self), fields(key = %key, item_id = %item_id))]
    pub async fn remove_item(&self, key: &CartKey, item_id: &ItemId) -> Result<Cart, CartError> {
        let issued = self.with_state(key, |this, st| {
            if st.cache.line(item_id).is_none() {
                return None;
            }
            let seq = st.issue(item_id);
            st.cache.apply_remove(item_id);
            this.persist_cache(st);
            st.publish();
            Some(seq)
        });

        let Some(seq) = issued else {
            return Ok(self.with_state(key, |_, st| st.cache.clone()));
        };

        let result = self
            .inner
            .gateway
            .delete::<CartPayload>(&paths::cart_item(key, item_id))
            .await;

        self.resolve(key, item_id, seq, result)
    }

    /// Empty both the local and the server cart.
    ///
    /// The local cache is cleared unconditionally; a failure of the
    /// server-side clear is returned so explicit user actions can
    /// re-load, but it never resurrects the local cart.
    ///
    /// # Errors
    ///
    /// Returns the backend failure, if any.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn clear(&self, key: &CartKey) -> Result<(), CartError> {
        self.with_state(key, |this, st| {
            st.cache = Cart::empty(key.clone());
            st.confirmed = Cart::empty(key.clone());
            // In-flight responses become stale and will be discarded.
            st.latest_by_item.clear();
            if let Err(err) = this.inner.storage.remove(&key.storage_key()) {
                tracing::warn!(%key, error = %err, "could not remove cached cart");
            }
            st.publish();
        });

        match self.inner.gateway.delete_unit(&paths::cart(key)).await {
            Ok(()) => Ok(()),
            Err(err) => {
                tracing::warn!(%key, error = %err, "server-side cart clear failed");
                Err(err.into())
            }
        }
    }

    /// Current local cart for `key` (optimistic state).
    #[must_use]
    pub fn snapshot(&self, key: &CartKey) -> Cart {
        self.with_state(key, |_, st| st.cache.clone())
    }

    /// Advisory display totals for the current local cart.
    #[must_use]
    pub fn totals(&self, key: &CartKey) -> CartTotals {
        self.with_state(key, |this, st| {
            CartTotals::compute(&st.cache, this.inner.tax_rate, this.inner.currency)
        })
    }

    /// Advisory totals for an arbitrary cart snapshot.
    #[must_use]
    pub fn totals_for(&self, cart: &Cart) -> CartTotals {
        CartTotals::compute(cart, self.inner.tax_rate, self.inner.currency)
    }

    /// Subscribe to changes of this table's cart.
    #[must_use]
    pub fn watch_cart(&self, key: &CartKey) -> watch::Receiver<Cart> {
        self.with_state(key, |_, st| st.tx.subscribe())
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Apply a resolved mutation to the table state.
    ///
    /// The response is applied only if it belongs to the most recently
    /// issued mutation for the item; stale responses are discarded. On
    /// failure of the latest mutation the cache rolls back to the last
    /// confirmed server state.
    fn resolve(
        &self,
        key: &CartKey,
        item_id: &ItemId,
        seq: u64,
        result: Result<CartPayload, ApiError>,
    ) -> Result<Cart, CartError> {
        self.with_state(key, |this, st| {
            st.pending = st.pending.saturating_sub(1);
            let is_latest = st.latest_by_item.get(item_id) == Some(&seq);

            match result {
                Ok(payload) => {
                    if !is_latest {
                        tracing::debug!(%key, %item_id, "discarding stale cart response");
                        return Ok(st.cache.clone());
                    }

                    st.confirmed = Cart::from_payload(key.clone(), payload);
                    st.latest_by_item.remove(item_id);

                    if st.pending == 0 {
                        st.cache = st.confirmed.clone();
                        this.persist_cache(st);
                        st.publish();
                    } else {
                        // Other optimistic updates are still outstanding;
                        // only pick up the fresh server version token.
                        st.cache.last_server_version = st.confirmed.last_server_version.clone();
                    }
                    Ok(st.cache.clone())
                }
                Err(err) => {
                    if is_latest {
                        tracing::warn!(%key, %item_id, error = %err, "cart mutation failed; rolling back");
                        st.latest_by_item.remove(item_id);
                        st.cache = st.confirmed.clone();
                        this.persist_cache(st);
                        st.publish();
                    } else {
                        tracing::debug!(%key, %item_id, "superseded cart mutation failed; cache untouched");
                    }
                    Err(err.into())
                }
            }
        })
    }

    fn with_state<R>(&self, key: &CartKey, f: impl FnOnce(&Self, &mut TableState) -> R) -> R {
        let mut tables = self
            .inner
            .tables
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let state = tables
            .entry(key.clone())
            .or_insert_with(|| TableState::restore(key, &*self.inner.storage));
        f(self, state)
    }

    fn persist_cache(&self, state: &TableState) {
        let raw = match serde_json::to_string(&state.cache) {
            Ok(raw) => raw,
            Err(err) => {
                tracing::warn!(error = %err, "could not serialize cart cache");
                return;
            }
        };
        if let Err(err) = self
            .inner
            .storage
            .store(&state.cache.key.storage_key(), &raw)
        {
            // Durability lost, not correctness; the in-memory cart stands.
            tracing::warn!(error = %err, "could not persist cart cache");
        }
    }
}

impl<T> std::fmt::Debug for CartReconciler<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CartReconciler").finish_non_exhaustive()
    }
}
