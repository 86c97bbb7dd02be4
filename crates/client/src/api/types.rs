//! Wire types for the order backend's REST API.
//!
//! The backend speaks camelCase JSON; these types are the exact shapes it
//! sends and receives. Conversion into domain types happens at the module
//! that owns the domain type (see `cart::types`).

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tablefare_core::{
    CurrencyCode, FoodCourtId, IntentId, ItemId, OrderId, OrderStatus, OutletId, PaymentStatus,
    TableId, UserId, UserRole,
};

// =============================================================================
// Auth
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub user: UserPayload,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPayload {
    pub id: UserId,
    pub roles: Vec<UserRole>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogoutRequest {
    pub refresh_token: String,
}

// =============================================================================
// Cart
// =============================================================================

/// Full current cart, as the backend returns it from every cart endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartPayload {
    /// Opaque server version token, echoed back on mutations.
    pub version: String,
    pub items: Vec<CartLinePayload>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLinePayload {
    pub item_id: ItemId,
    pub name: String,
    pub unit_price: Decimal,
    pub quantity: u32,
    pub outlet_id: OutletId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub special_instructions: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddItemRequest {
    #[serde(flatten)]
    pub line: CartLinePayload,
    /// Last server version seen by this client, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cart_version: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetQuantityRequest {
    pub quantity: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cart_version: Option<String>,
}

// =============================================================================
// Checkout
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateCheckoutRequest {
    /// Whole-unit charge amount; the backend recomputes and enforces it.
    pub amount: i64,
    pub food_court_id: FoodCourtId,
    pub table_number: TableId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateCheckoutResponse {
    pub gateway_order_id: String,
    pub intent_id: IntentId,
    pub amount: i64,
    pub currency: CurrencyCode,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeRequest {
    pub intent_id: IntentId,
    pub gateway_payment_id: String,
    pub gateway_order_id: String,
    pub gateway_signature: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeResponse {
    pub order_id: OrderId,
}

// =============================================================================
// Orders
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrdersResponse {
    pub orders: Vec<OrderSummaryPayload>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderSummaryPayload {
    pub order_id: OrderId,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub total: Decimal,
    pub currency: CurrencyCode,
    pub placed_at: chrono::DateTime<chrono::Utc>,
}
