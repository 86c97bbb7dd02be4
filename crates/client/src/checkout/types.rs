//! Checkout state machine types.

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use tablefare_core::{CurrencyCode, FoodCourtId, IntentId, OrderId, TableId};

use crate::cart::{Cart, CartKey};
use crate::session::storage_keys;

/// A backend-issued record authorizing a specific charge, matched to a
/// gateway-side order id. Immutable; referenced by exactly one finalize
/// call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentIntent {
    pub intent_id: IntentId,
    /// Whole-unit charge amount, as confirmed by the backend.
    pub amount: i64,
    pub currency: CurrencyCode,
    /// The payment gateway's id for this charge; handed to the widget.
    pub gateway_order_id: String,
}

/// Proof of capture reported by the payment widget. All fields are opaque
/// to the client and forwarded verbatim to finalize for server-side
/// verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedPayment {
    pub gateway_payment_id: String,
    pub gateway_order_id: String,
    pub gateway_signature: String,
}

/// The single asynchronous outcome the payment widget reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayOutcome {
    /// Funds secured. Everything downstream of this is mandatory.
    Captured(CapturedPayment),
    /// User dismissed the widget; no funds moved.
    Cancelled,
    /// Gateway-side failure; no funds moved.
    Failed(String),
}

/// The widget could not be opened at all.
#[derive(Debug, Clone, Error)]
#[error("payment prompt unavailable: {0}")]
pub struct PromptError(pub String);

/// The opaque third-party payment widget.
///
/// Implemented by the UI shell over the real gateway widget; tests
/// substitute scripted prompts. `present` must yield exactly one outcome
/// per invocation.
pub trait PaymentPrompt: Send + Sync + 'static {
    /// Open the widget for `intent` and wait for its single outcome.
    fn present(
        &self,
        intent: &PaymentIntent,
    ) -> impl Future<Output = Result<GatewayOutcome, PromptError>> + Send;
}

/// How the gateway leg resolved, without its payload (for state
/// observation).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayResolution {
    Captured,
    Cancelled,
    Failed,
}

/// Observable state of the checkout orchestrator.
///
/// Transitions are strictly linear; `Finalizing` is reachable only from
/// `GatewayResolved(Captured)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckoutState {
    Idle,
    IntentRequested,
    GatewayPresented,
    GatewayResolved(GatewayResolution),
    Finalizing,
    Terminal(TerminalOutcome),
}

impl CheckoutState {
    /// Whether a new checkout attempt may begin.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Idle | Self::Terminal(_))
    }
}

/// The single authoritative outcome of a checkout attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalOutcome {
    /// Order confirmed; cart cleared; order visible in history.
    Success { order_id: OrderId },
    /// User aborted at the widget; no funds moved, cart intact.
    Cancelled,
    /// Failed before any funds moved; cart intact, a fresh attempt is the
    /// correct retry.
    Failed { reason: String },
    /// Funds captured but the order was never confirmed. The cart is
    /// retained, the identifiers below are persisted for manual
    /// reconciliation, and the user must be directed to support - never
    /// to "try again".
    PaymentLostOrderFailed {
        intent_id: IntentId,
        gateway_payment_id: String,
    },
}

impl TerminalOutcome {
    /// Whether the user may simply start a fresh checkout attempt.
    ///
    /// `false` for [`Self::Success`] (nothing to retry) and for
    /// [`Self::PaymentLostOrderFailed`], where a retry would request a
    /// second charge for the same goods.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Failed { .. })
    }
}

/// In-memory bookkeeping for one checkout attempt. Created when checkout
/// begins and discarded at its terminal state; a retry is always a fresh
/// attempt with a fresh intent.
#[derive(Debug)]
pub(crate) struct CheckoutAttempt {
    pub attempt_id: Uuid,
    pub cart_snapshot_id: Uuid,
    pub snapshot: Cart,
    pub intent_id: Option<IntentId>,
    pub gateway_result: Option<GatewayResolution>,
    pub finalize_result: Option<bool>,
}

impl CheckoutAttempt {
    pub(crate) fn new(snapshot: Cart) -> Self {
        Self {
            attempt_id: Uuid::new_v4(),
            cart_snapshot_id: Uuid::new_v4(),
            snapshot,
            intent_id: None,
            gateway_result: None,
            finalize_result: None,
        }
    }
}

/// Durable record of a post-capture attempt, written **before** the
/// finalize call so a later page load can detect an attempt that died in
/// the capture-to-confirmation window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AttemptRecord {
    pub attempt_id: Uuid,
    pub cart_snapshot_id: Uuid,
    pub intent_id: IntentId,
    pub gateway_order_id: String,
    pub gateway_payment_id: String,
    pub food_court_id: FoodCourtId,
    pub table_id: TableId,
    pub amount: i64,
    pub currency: CurrencyCode,
    pub captured_at: DateTime<Utc>,
    pub state: AttemptRecordState,
}

/// Persisted lifecycle of an [`AttemptRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptRecordState {
    /// Finalize was about to be (or is being) attempted.
    Finalizing,
    /// Finalize failed after capture; awaiting manual reconciliation.
    PaymentLostOrderFailed,
}

impl AttemptRecord {
    pub(crate) fn new(
        attempt: &CheckoutAttempt,
        key: &CartKey,
        intent: &PaymentIntent,
        proof: &CapturedPayment,
    ) -> Self {
        Self {
            attempt_id: attempt.attempt_id,
            cart_snapshot_id: attempt.cart_snapshot_id,
            intent_id: intent.intent_id.clone(),
            gateway_order_id: proof.gateway_order_id.clone(),
            gateway_payment_id: proof.gateway_payment_id.clone(),
            food_court_id: key.food_court_id.clone(),
            table_id: key.table_id.clone(),
            amount: intent.amount,
            currency: intent.currency,
            captured_at: Utc::now(),
            state: AttemptRecordState::Finalizing,
        }
    }

    /// Durable-storage key for this record.
    #[must_use]
    pub fn storage_key(&self) -> String {
        Self::storage_key_for(&self.intent_id)
    }

    /// Durable-storage key for the record of `intent_id`.
    #[must_use]
    pub fn storage_key_for(intent_id: &IntentId) -> String {
        format!("{}{intent_id}", storage_keys::CHECKOUT_ATTEMPT_PREFIX)
    }
}
