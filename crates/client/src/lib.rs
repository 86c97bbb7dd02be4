//! Tablefare client core - session, cart, and checkout reconciliation.
//!
//! This crate is the engine underneath the Tablefare ordering UI. The UI
//! shell renders menus and pages; everything with real state lives here:
//!
//! - [`session`] - the credential store, the single source of truth for
//!   "are we logged in", persisted across restarts
//! - [`api`] - the authenticated request gateway with single-flight token
//!   refresh: concurrent 401s collapse into one refresh call per expiry
//!   episode
//! - [`cart`] - the per-table cart reconciler: optimistic local mutations
//!   rolled back to the server-authoritative state on failure
//! - [`checkout`] - the payment handshake state machine driving
//!   client -> payment gateway -> client -> backend to a single terminal
//!   outcome
//! - [`orders`] - order history, cached briefly and invalidated when a
//!   checkout lands
//!
//! # Architecture
//!
//! The backend is the source of truth for carts and orders; local state is
//! a cache that may be briefly stale or ahead. The payment gateway widget
//! is an opaque third-party actor reached through the [`checkout::PaymentPrompt`]
//! seam; its capture proof is forwarded to the backend verbatim, never
//! verified client-side.
//!
//! # Example
//!
//! ```rust,ignore
//! use tablefare_client::{Client, config::ClientConfig};
//!
//! let config = ClientConfig::from_env()?;
//! let _telemetry = tablefare_client::telemetry::init(&config);
//! let client = Client::new(config, my_payment_prompt)?;
//!
//! client.auth().login(&email, &password).await?;
//! client.carts().add_item(&key, burger, 2).await?;
//! let outcome = client.checkout().begin_checkout(&key).await?;
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod api;
pub mod auth;
pub mod cart;
pub mod checkout;
mod client;
pub mod config;
pub mod orders;
pub mod session;
pub mod storage;
pub mod telemetry;

pub use api::{ApiError, ApiGateway, HttpTransport, Transport, TransportError};
pub use auth::AuthService;
pub use cart::{Cart, CartError, CartKey, CartLine, CartReconciler, CartTotals, LoadedCart, MenuItemRef};
pub use checkout::{
    CheckoutError, CheckoutOrchestrator, CheckoutState, GatewayOutcome, PaymentIntent,
    PaymentPrompt, TerminalOutcome,
};
pub use client::{Client, TablefareClient};
pub use orders::{OrderSummary, OrdersService};
pub use session::{AuthTokens, CredentialStore, CurrentUser, Session};
pub use storage::{FileStorage, MemoryStorage, Storage, StorageError};
