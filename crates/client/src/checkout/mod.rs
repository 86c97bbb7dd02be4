//! Checkout orchestration: cart -> payment intent -> gateway widget ->
//! finalize.
//!
//! Three independent actors (client, backend, payment gateway) can each
//! fail or be abandoned on their own, and a mistake here risks charging a
//! diner without recording an order. The flow is therefore an explicit
//! state machine with every terminal outcome enumerable:
//!
//! ```text
//! Idle -> IntentRequested -> GatewayPresented
//!      -> GatewayResolved{captured|cancelled|failed}
//!      -> Finalizing -> Terminal{Success|PaymentLostOrderFailed|Cancelled|Failed}
//! ```
//!
//! Capture is the single boundary where real money moves. Before it,
//! failure is safe: the attempt is discarded and a fresh one (with a
//! fresh intent) is the correct retry. After it, the finalize call is
//! retried exactly once (it is idempotent per intent id server-side); a
//! second failure lands in `PaymentLostOrderFailed`, which keeps the cart,
//! persists the attempt's identifiers for manual reconciliation, and must
//! be surfaced as "contact support" - never as "try again".

mod types;

pub use types::{
    AttemptRecord, AttemptRecordState, CapturedPayment, CheckoutState, GatewayOutcome,
    GatewayResolution, PaymentIntent, PaymentPrompt, PromptError, TerminalOutcome,
};

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;
use tracing::instrument;

use tablefare_core::IntentId;

use crate::api::types::{FinalizeRequest, FinalizeResponse, InitiateCheckoutRequest, InitiateCheckoutResponse};
use crate::api::{ApiGateway, Transport, paths};
use crate::cart::{CartKey, CartReconciler};
use crate::orders::OrdersService;
use crate::session::storage_keys;
use crate::storage::Storage;
use types::CheckoutAttempt;

/// Pre-flight rejections of `begin_checkout`. Everything after takeoff
/// resolves to a [`TerminalOutcome`] instead.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// A checkout attempt for this client is already in flight.
    #[error("a checkout attempt is already in flight")]
    AlreadyInProgress,

    /// The cart has no lines to check out.
    #[error("cannot check out an empty cart")]
    EmptyCart,

    /// The computed total cannot be expressed as a charge amount.
    #[error("order total {0} cannot be charged")]
    UnchargeableTotal(String),
}

// =============================================================================
// CheckoutOrchestrator
// =============================================================================

/// Drives a cart to a finalized order.
///
/// Cheaply cloneable; all clones share the in-flight guard and state
/// channel, so re-entry is barred across the whole client.
pub struct CheckoutOrchestrator<T, P> {
    inner: Arc<OrchestratorInner<T, P>>,
}

impl<T, P> Clone for CheckoutOrchestrator<T, P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct OrchestratorInner<T, P> {
    gateway: ApiGateway<T>,
    prompt: P,
    carts: CartReconciler<T>,
    orders: OrdersService<T>,
    storage: Arc<dyn Storage>,
    state_tx: watch::Sender<CheckoutState>,
    in_flight: tokio::sync::Mutex<()>,
}

impl<T: Transport, P: PaymentPrompt> CheckoutOrchestrator<T, P> {
    /// Wire the orchestrator to its collaborators.
    #[must_use]
    pub fn new(
        gateway: ApiGateway<T>,
        prompt: P,
        carts: CartReconciler<T>,
        orders: OrdersService<T>,
        storage: Arc<dyn Storage>,
    ) -> Self {
        let (state_tx, _) = watch::channel(CheckoutState::Idle);
        Self {
            inner: Arc::new(OrchestratorInner {
                gateway,
                prompt,
                carts,
                orders,
                storage,
                state_tx,
                in_flight: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Current orchestrator state.
    #[must_use]
    pub fn state(&self) -> CheckoutState {
        self.inner.state_tx.borrow().clone()
    }

    /// Subscribe to state transitions.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<CheckoutState> {
        self.inner.state_tx.subscribe()
    }

    /// Drive the current cart for `key` to a terminal outcome.
    ///
    /// The cart and its advisory total are snapshotted at entry; the
    /// backend recomputes the total authoritatively when it creates the
    /// payment intent.
    ///
    /// # Errors
    ///
    /// Only pre-flight rejections ([`CheckoutError`]); once the attempt
    /// is underway every failure is a [`TerminalOutcome`].
    #[instrument(skip(self), fields(key = %key))]
    pub async fn begin_checkout(&self, key: &CartKey) -> Result<TerminalOutcome, CheckoutError> {
        // One attempt at a time; the UI must not re-enter while
        // non-terminal.
        let Ok(_guard) = self.inner.in_flight.try_lock() else {
            return Err(CheckoutError::AlreadyInProgress);
        };

        let snapshot = self.inner.carts.snapshot(key);
        if snapshot.is_empty() {
            return Err(CheckoutError::EmptyCart);
        }

        let totals = self.inner.carts.totals_for(&snapshot);
        let Some(amount) = totals.total.charge_amount() else {
            return Err(CheckoutError::UnchargeableTotal(totals.total.to_string()));
        };

        let mut attempt = CheckoutAttempt::new(snapshot);
        let outcome = self.drive(&mut attempt, key, amount).await;

        tracing::info!(
            attempt_id = %attempt.attempt_id,
            cart_snapshot_id = %attempt.cart_snapshot_id,
            lines = attempt.snapshot.lines.len(),
            intent_id = ?attempt.intent_id,
            gateway_result = ?attempt.gateway_result,
            finalize_ok = ?attempt.finalize_result,
            outcome = ?outcome,
            "checkout attempt reached terminal state"
        );
        self.set_state(CheckoutState::Terminal(outcome.clone()));
        Ok(outcome)
    }

    /// Post-capture attempts persisted by earlier sessions that never
    /// reached a clean end, for the shell to surface on startup.
    #[must_use]
    pub fn unresolved_attempts(&self) -> Vec<AttemptRecord> {
        let keys = match self
            .inner
            .storage
            .keys_with_prefix(storage_keys::CHECKOUT_ATTEMPT_PREFIX)
        {
            Ok(keys) => keys,
            Err(err) => {
                tracing::warn!(error = %err, "could not scan checkout attempt records");
                return Vec::new();
            }
        };

        keys.iter()
            .filter_map(|key| match self.inner.storage.load(key) {
                Ok(Some(raw)) => serde_json::from_str(&raw)
                    .map_err(|err| {
                        tracing::warn!(key = %key, error = %err, "skipping unreadable attempt record");
                    })
                    .ok(),
                Ok(None) => None,
                Err(err) => {
                    tracing::warn!(key = %key, error = %err, "could not read attempt record");
                    None
                }
            })
            .collect()
    }

    /// Drop the persisted record for `intent_id` once support has
    /// reconciled it.
    pub fn discard_attempt(&self, intent_id: &IntentId) {
        if let Err(err) = self
            .inner
            .storage
            .remove(&AttemptRecord::storage_key_for(intent_id))
        {
            tracing::warn!(%intent_id, error = %err, "could not remove attempt record");
        }
    }

    // =========================================================================
    // State machine legs
    // =========================================================================

    async fn drive(
        &self,
        attempt: &mut CheckoutAttempt,
        key: &CartKey,
        amount: i64,
    ) -> TerminalOutcome {
        // Idle -> IntentRequested. No charge risk exists yet; failure
        // leaves the cart untouched and a fresh attempt is the retry.
        self.set_state(CheckoutState::IntentRequested);
        let request = InitiateCheckoutRequest {
            amount,
            food_court_id: key.food_court_id.clone(),
            table_number: key.table_id.clone(),
        };
        let intent = match self
            .inner
            .gateway
            .post::<InitiateCheckoutResponse>(paths::CHECKOUT_INITIATE, &request)
            .await
        {
            Ok(response) => PaymentIntent {
                intent_id: response.intent_id,
                amount: response.amount,
                currency: response.currency,
                gateway_order_id: response.gateway_order_id,
            },
            Err(err) => {
                tracing::warn!(error = %err, "payment intent creation failed");
                return TerminalOutcome::Failed {
                    reason: format!("could not start checkout: {err}"),
                };
            }
        };
        attempt.intent_id = Some(intent.intent_id.clone());

        // IntentRequested -> GatewayPresented. Client-side only.
        self.set_state(CheckoutState::GatewayPresented);
        let outcome = match self.inner.prompt.present(&intent).await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::warn!(error = %err, "payment prompt failed to open");
                return TerminalOutcome::Failed {
                    reason: err.to_string(),
                };
            }
        };

        match outcome {
            GatewayOutcome::Cancelled => {
                attempt.gateway_result = Some(GatewayResolution::Cancelled);
                self.set_state(CheckoutState::GatewayResolved(GatewayResolution::Cancelled));
                // No funds moved; cart left intact for a retry.
                TerminalOutcome::Cancelled
            }
            GatewayOutcome::Failed(reason) => {
                attempt.gateway_result = Some(GatewayResolution::Failed);
                self.set_state(CheckoutState::GatewayResolved(GatewayResolution::Failed));
                TerminalOutcome::Failed { reason }
            }
            GatewayOutcome::Captured(proof) => {
                attempt.gateway_result = Some(GatewayResolution::Captured);
                self.set_state(CheckoutState::GatewayResolved(GatewayResolution::Captured));
                self.finalize(attempt, key, &intent, &proof).await
            }
        }
    }

    /// Funds are secured once this runs; every path out must leave a
    /// reconcilable trail.
    async fn finalize(
        &self,
        attempt: &mut CheckoutAttempt,
        key: &CartKey,
        intent: &PaymentIntent,
        proof: &CapturedPayment,
    ) -> TerminalOutcome {
        let mut record = AttemptRecord::new(attempt, key, intent, proof);
        // Persisted before the finalize call so a page load can surface
        // an attempt that dies in the capture-to-confirmation window.
        self.persist_record(&record);

        self.set_state(CheckoutState::Finalizing);
        let request = FinalizeRequest {
            intent_id: intent.intent_id.clone(),
            gateway_payment_id: proof.gateway_payment_id.clone(),
            gateway_order_id: proof.gateway_order_id.clone(),
            gateway_signature: proof.gateway_signature.clone(),
        };

        let result = match self
            .inner
            .gateway
            .post::<FinalizeResponse>(paths::CHECKOUT_FINALIZE, &request)
            .await
        {
            Ok(response) => Ok(response),
            Err(err) => {
                // Finalize is idempotent per intent id; one automatic retry.
                tracing::warn!(
                    intent_id = %intent.intent_id,
                    error = %err,
                    "finalize failed, retrying once"
                );
                self.inner
                    .gateway
                    .post::<FinalizeResponse>(paths::CHECKOUT_FINALIZE, &request)
                    .await
            }
        };

        match result {
            Ok(response) => {
                attempt.finalize_result = Some(true);
                self.remove_record(&record);
                if let Err(err) = self.inner.carts.clear(key).await {
                    tracing::warn!(%key, error = %err, "cart clear after checkout failed");
                }
                // The new order must show up in history immediately.
                self.inner.orders.invalidate().await;
                tracing::info!(order_id = %response.order_id, "order confirmed");
                TerminalOutcome::Success {
                    order_id: response.order_id,
                }
            }
            Err(err) => {
                attempt.finalize_result = Some(false);
                record.state = AttemptRecordState::PaymentLostOrderFailed;
                self.persist_record(&record);

                // Captured funds without a confirmed order. The cart is
                // deliberately NOT cleared, and the user goes to support;
                // re-running checkout would request a second charge.
                tracing::error!(
                    intent_id = %intent.intent_id,
                    gateway_payment_id = %proof.gateway_payment_id,
                    error = %err,
                    "payment captured but order confirmation failed; manual reconciliation required"
                );
                sentry::capture_error(&err);

                TerminalOutcome::PaymentLostOrderFailed {
                    intent_id: intent.intent_id.clone(),
                    gateway_payment_id: proof.gateway_payment_id.clone(),
                }
            }
        }
    }

    fn set_state(&self, state: CheckoutState) {
        tracing::debug!(state = ?state, "checkout state");
        self.inner.state_tx.send_replace(state);
    }

    fn persist_record(&self, record: &AttemptRecord) {
        let raw = match serde_json::to_string(record) {
            Ok(raw) => raw,
            Err(err) => {
                tracing::warn!(error = %err, "could not serialize attempt record");
                return;
            }
        };
        if let Err(err) = self.inner.storage.store(&record.storage_key(), &raw) {
            // The identifiers are still in the log/monitoring trail above,
            // so reconciliation remains possible without local storage.
            tracing::warn!(
                intent_id = %record.intent_id,
                error = %err,
                "could not persist attempt record"
            );
        }
    }

    fn remove_record(&self, record: &AttemptRecord) {
        if let Err(err) = self.inner.storage.remove(&record.storage_key()) {
            tracing::warn!(
                intent_id = %record.intent_id,
                error = %err,
                "could not remove attempt record"
            );
        }
    }
}

impl<T, P> std::fmt::Debug for CheckoutOrchestrator<T, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckoutOrchestrator")
            .field("state", &self.inner.state_tx.borrow().clone())
            .finish_non_exhaustive()
    }
}
