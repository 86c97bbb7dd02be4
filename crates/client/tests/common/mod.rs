//! Shared test doubles: a scriptable transport and payment prompt.
#![allow(dead_code)]
#![allow(clippy::unwrap_used)]

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::json;

use tablefare_client::api::{ApiRequest, ApiResponse, Transport, TransportError};
use tablefare_client::checkout::{GatewayOutcome, PaymentIntent, PaymentPrompt, PromptError};
use tablefare_client::config::ClientConfig;
use tablefare_client::{
    AuthTokens, CredentialStore, CurrentUser, MemoryStorage, Session, Storage, TablefareClient,
};
use tablefare_core::{CurrencyCode, UserId, UserRole};

// =============================================================================
// MockTransport
// =============================================================================

type TransportFuture = Pin<Box<dyn Future<Output = Result<ApiResponse, TransportError>> + Send>>;
type TransportHandler = Box<dyn Fn(ApiRequest) -> TransportFuture + Send + Sync>;

/// Transport driven by a scripted async handler; records every request.
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<MockTransportInner>,
}

struct MockTransportInner {
    handler: TransportHandler,
    calls: Mutex<Vec<ApiRequest>>,
}

impl MockTransport {
    pub fn new<F, Fut>(handler: F) -> Self
    where
        F: Fn(ApiRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ApiResponse, TransportError>> + Send + 'static,
    {
        Self {
            inner: Arc::new(MockTransportInner {
                handler: Box::new(move |request| Box::pin(handler(request))),
                calls: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Every request seen so far, in arrival order.
    pub fn calls(&self) -> Vec<ApiRequest> {
        self.inner.calls.lock().unwrap().clone()
    }

    /// How many requests hit `path`.
    pub fn count_path(&self, path: &str) -> usize {
        self.inner
            .calls
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.path == path)
            .count()
    }
}

impl Transport for MockTransport {
    fn send(
        &self,
        request: ApiRequest,
    ) -> impl Future<Output = Result<ApiResponse, TransportError>> + Send {
        let inner = Arc::clone(&self.inner);
        async move {
            inner.calls.lock().unwrap().push(request.clone());
            (inner.handler)(request).await
        }
    }
}

// =============================================================================
// MockPrompt
// =============================================================================

type PromptFuture = Pin<Box<dyn Future<Output = Result<GatewayOutcome, PromptError>> + Send>>;
type PromptHandler = Box<dyn Fn(PaymentIntent) -> PromptFuture + Send + Sync>;

/// Payment widget double driven by a scripted async handler.
#[derive(Clone)]
pub struct MockPrompt {
    inner: Arc<MockPromptInner>,
}

struct MockPromptInner {
    handler: PromptHandler,
    presented: AtomicUsize,
}

impl MockPrompt {
    pub fn new<F, Fut>(handler: F) -> Self
    where
        F: Fn(PaymentIntent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<GatewayOutcome, PromptError>> + Send + 'static,
    {
        Self {
            inner: Arc::new(MockPromptInner {
                handler: Box::new(move |intent| Box::pin(handler(intent))),
                presented: AtomicUsize::new(0),
            }),
        }
    }

    /// Always captures, echoing the intent's gateway order id into the
    /// proof.
    pub fn captured(payment_id: &str, signature: &str) -> Self {
        let payment_id = payment_id.to_owned();
        let signature = signature.to_owned();
        Self::new(move |intent| {
            let proof = tablefare_client::checkout::CapturedPayment {
                gateway_payment_id: payment_id.clone(),
                gateway_order_id: intent.gateway_order_id,
                gateway_signature: signature.clone(),
            };
            async move { Ok(GatewayOutcome::Captured(proof)) }
        })
    }

    /// Always dismissed by the user.
    pub fn cancelled() -> Self {
        Self::new(|_| async { Ok(GatewayOutcome::Cancelled) })
    }

    /// Always fails gateway-side.
    pub fn failed(reason: &str) -> Self {
        let reason = reason.to_owned();
        Self::new(move |_| {
            let reason = reason.clone();
            async move { Ok(GatewayOutcome::Failed(reason)) }
        })
    }

    /// How many times the widget was opened.
    pub fn presented(&self) -> usize {
        self.inner.presented.load(Ordering::SeqCst)
    }
}

impl PaymentPrompt for MockPrompt {
    fn present(
        &self,
        intent: &PaymentIntent,
    ) -> impl Future<Output = Result<GatewayOutcome, PromptError>> + Send {
        let inner = Arc::clone(&self.inner);
        let intent = intent.clone();
        async move {
            inner.presented.fetch_add(1, Ordering::SeqCst);
            (inner.handler)(intent).await
        }
    }
}

// =============================================================================
// Fixtures
// =============================================================================

pub fn test_config() -> ClientConfig {
    ClientConfig {
        api_base_url: "http://backend.test".parse().unwrap(),
        storage_dir: std::path::PathBuf::from("unused-in-tests"),
        payment_key_id: "key_test".into(),
        tax_rate: "0.18".parse().unwrap(),
        currency: CurrencyCode::INR,
        request_timeout: std::time::Duration::from_secs(5),
        sentry_dsn: None,
        sentry_environment: None,
    }
}

/// Assemble a client over in-memory storage; the storage handle is shared
/// so tests can reuse it across client instances.
pub fn test_client(
    transport: MockTransport,
    prompt: MockPrompt,
) -> (TablefareClient<MockTransport, MockPrompt>, Arc<MemoryStorage>) {
    let storage = Arc::new(MemoryStorage::new());
    let client = test_client_with_storage(transport, prompt, Arc::clone(&storage));
    (client, storage)
}

pub fn test_client_with_storage(
    transport: MockTransport,
    prompt: MockPrompt,
    storage: Arc<MemoryStorage>,
) -> TablefareClient<MockTransport, MockPrompt> {
    TablefareClient::with_parts(
        &test_config(),
        transport,
        storage as Arc<dyn Storage>,
        prompt,
    )
}

/// Seed a logged-in session with a stale access token.
pub fn seed_session(credentials: &CredentialStore) {
    credentials.set(Session {
        tokens: Some(AuthTokens::new("stale".into(), "r1".into())),
        user: Some(CurrentUser {
            id: UserId::new("u1"),
            roles: vec![UserRole::Customer],
        }),
    });
}

// =============================================================================
// Response builders
// =============================================================================

pub fn ok_json(value: serde_json::Value) -> Result<ApiResponse, TransportError> {
    Ok(ApiResponse {
        status: 200,
        body: value.to_string(),
    })
}

pub fn status_only(status: u16) -> Result<ApiResponse, TransportError> {
    Ok(ApiResponse {
        status,
        body: String::new(),
    })
}

pub fn no_content() -> Result<ApiResponse, TransportError> {
    Ok(ApiResponse {
        status: 204,
        body: String::new(),
    })
}

/// A backend cart payload: `(item_id, name, unit_price, quantity, outlet_id)`.
pub fn cart_json(version: &str, lines: &[(&str, &str, &str, u32, &str)]) -> serde_json::Value {
    json!({
        "version": version,
        "items": lines
            .iter()
            .map(|(item_id, name, price, quantity, outlet_id)| {
                json!({
                    "itemId": item_id,
                    "name": name,
                    "unitPrice": price,
                    "quantity": quantity,
                    "outletId": outlet_id,
                })
            })
            .collect::<Vec<_>>(),
    })
}

pub const BURGER: (&str, &str, &str, u32, &str) =
    ("itm_burger", "Smash Burger", "150", 2, "out_grill");
pub const SALAD: (&str, &str, &str, u32, &str) = ("itm_salad", "Greek Salad", "90", 1, "out_deli");

/// Turn a cart line spec into the menu item reference plus quantity the
/// reconciler API takes.
pub fn menu_item(
    (item_id, name, price, quantity, outlet_id): (&str, &str, &str, u32, &str),
) -> (tablefare_client::MenuItemRef, u32) {
    (
        tablefare_client::MenuItemRef {
            item_id: tablefare_core::ItemId::new(item_id),
            name: name.to_owned(),
            unit_price: price.parse().unwrap(),
            outlet_id: tablefare_core::OutletId::new(outlet_id),
            special_instructions: None,
        },
        quantity,
    )
}
