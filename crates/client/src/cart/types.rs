//! Cart domain types and totals arithmetic.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tablefare_core::{CurrencyCode, FoodCourtId, ItemId, Money, OutletId, TableId};

use crate::api::types::{CartLinePayload, CartPayload};

/// Compound key scoping one cart: one cart per (food court, table) per
/// device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CartKey {
    pub food_court_id: FoodCourtId,
    pub table_id: TableId,
}

impl CartKey {
    /// Build a key from raw ids.
    pub fn new(food_court_id: impl Into<FoodCourtId>, table_id: impl Into<TableId>) -> Self {
        Self {
            food_court_id: food_court_id.into(),
            table_id: table_id.into(),
        }
    }

    /// Namespaced durable-storage key for this table's cart cache.
    #[must_use]
    pub fn storage_key(&self) -> String {
        format!(
            "{}{}:{}",
            crate::session::storage_keys::CART_PREFIX,
            self.food_court_id,
            self.table_id
        )
    }
}

impl std::fmt::Display for CartKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.food_court_id, self.table_id)
    }
}

/// The catalog fields a cart line needs to reference a menu item, plus
/// optional per-line instructions entered by the diner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuItemRef {
    pub item_id: ItemId,
    pub name: String,
    pub unit_price: Decimal,
    pub outlet_id: OutletId,
    pub special_instructions: Option<String>,
}

/// One line of a cart. Quantity is always >= 1; a line reduced to 0 is
/// removed, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub item_id: ItemId,
    pub name: String,
    pub unit_price: Decimal,
    pub quantity: u32,
    pub outlet_id: OutletId,
    pub special_instructions: Option<String>,
}

impl CartLine {
    /// Price of the whole line.
    #[must_use]
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }

    pub(crate) fn from_payload(payload: CartLinePayload) -> Self {
        Self {
            item_id: payload.item_id,
            name: payload.name,
            unit_price: payload.unit_price,
            quantity: payload.quantity,
            outlet_id: payload.outlet_id,
            special_instructions: payload.special_instructions,
        }
    }
}

/// A table's cart: lines unique by item id plus the opaque server version
/// of the last confirmed state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    pub key: CartKey,
    pub lines: Vec<CartLine>,
    /// Opaque token identifying the last server state this cart was
    /// synchronized against.
    pub last_server_version: Option<String>,
}

impl Cart {
    /// An empty cart for `key`.
    #[must_use]
    pub const fn empty(key: CartKey) -> Self {
        Self {
            key,
            lines: Vec::new(),
            last_server_version: None,
        }
    }

    /// Whether the cart has no lines.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// The line for `item_id`, if present.
    #[must_use]
    pub fn line(&self, item_id: &ItemId) -> Option<&CartLine> {
        self.lines.iter().find(|l| &l.item_id == item_id)
    }

    /// Total number of units across all lines.
    #[must_use]
    pub fn total_quantity(&self) -> u32 {
        self.lines.iter().map(|l| l.quantity).sum()
    }

    /// Merge `quantity` units of `item` into the cart (optimistic apply).
    pub(crate) fn apply_add(&mut self, item: &MenuItemRef, quantity: u32) {
        if let Some(line) = self.lines.iter_mut().find(|l| l.item_id == item.item_id) {
            line.quantity += quantity;
            if item.special_instructions.is_some() {
                line.special_instructions.clone_from(&item.special_instructions);
            }
        } else {
            self.lines.push(CartLine {
                item_id: item.item_id.clone(),
                name: item.name.clone(),
                unit_price: item.unit_price,
                quantity,
                outlet_id: item.outlet_id.clone(),
                special_instructions: item.special_instructions.clone(),
            });
        }
    }

    /// Set the quantity of an existing line; 0 removes the line.
    pub(crate) fn apply_set_quantity(&mut self, item_id: &ItemId, quantity: u32) {
        if quantity == 0 {
            self.apply_remove(item_id);
        } else if let Some(line) = self.lines.iter_mut().find(|l| &l.item_id == item_id) {
            line.quantity = quantity;
        }
    }

    /// Remove the line for `item_id`, if present.
    pub(crate) fn apply_remove(&mut self, item_id: &ItemId) {
        self.lines.retain(|l| &l.item_id != item_id);
    }

    pub(crate) fn from_payload(key: CartKey, payload: CartPayload) -> Self {
        Self {
            key,
            lines: payload
                .items
                .into_iter()
                .map(CartLine::from_payload)
                .collect(),
            last_server_version: Some(payload.version),
        }
    }
}

/// Advisory display totals for a cart. The backend recomputes these
/// authoritatively at checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CartTotals {
    pub subtotal: Money,
    pub tax: Money,
    pub total: Money,
}

impl CartTotals {
    /// Compute subtotal + tax for `cart` at `tax_rate`.
    #[must_use]
    pub fn compute(cart: &Cart, tax_rate: Decimal, currency: CurrencyCode) -> Self {
        let subtotal: Decimal = cart.lines.iter().map(CartLine::line_total).sum();
        let tax = (subtotal * tax_rate).round_dp_with_strategy(
            2,
            rust_decimal::RoundingStrategy::MidpointAwayFromZero,
        );
        Self {
            subtotal: Money::new(subtotal, currency),
            tax: Money::new(tax, currency),
            total: Money::new(subtotal + tax, currency),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn burger() -> MenuItemRef {
        MenuItemRef {
            item_id: ItemId::new("itm_burger"),
            name: "Smash Burger".into(),
            unit_price: "150".parse().unwrap(),
            outlet_id: OutletId::new("out_grill"),
            special_instructions: None,
        }
    }

    fn salad() -> MenuItemRef {
        MenuItemRef {
            item_id: ItemId::new("itm_salad"),
            name: "Greek Salad".into(),
            unit_price: "90".parse().unwrap(),
            outlet_id: OutletId::new("out_deli"),
            special_instructions: None,
        }
    }

    fn key() -> CartKey {
        CartKey::new("fc_1", "t_4")
    }

    #[test]
    fn test_apply_add_merges_existing_line() {
        let mut cart = Cart::empty(key());
        cart.apply_add(&burger(), 1);
        cart.apply_add(&burger(), 1);

        assert_eq!(cart.lines.len(), 1);
        assert_eq!(cart.line(&ItemId::new("itm_burger")).unwrap().quantity, 2);
    }

    #[test]
    fn test_set_quantity_zero_removes_line() {
        let mut cart = Cart::empty(key());
        cart.apply_add(&burger(), 2);
        cart.apply_set_quantity(&ItemId::new("itm_burger"), 0);

        assert!(cart.is_empty());
        // Never a quantity-0 line
        assert!(cart.lines.iter().all(|l| l.quantity >= 1));
    }

    #[test]
    fn test_totals_match_menu_scenario() {
        let mut cart = Cart::empty(key());
        cart.apply_add(&burger(), 2);
        cart.apply_add(&salad(), 1);

        let totals = CartTotals::compute(&cart, "0.18".parse().unwrap(), CurrencyCode::INR);
        assert_eq!(totals.subtotal.amount.to_string(), "390");
        assert_eq!(totals.tax.amount.to_string(), "70.20");
        assert_eq!(totals.total.amount.to_string(), "460.20");
        assert_eq!(totals.total.charge_amount(), Some(460));
    }

    #[test]
    fn test_storage_key_is_namespaced() {
        assert_eq!(key().storage_key(), "cart:fc_1:t_4");
    }

    #[test]
    fn test_from_payload_keeps_version() {
        let payload = CartPayload {
            version: "v3".into(),
            items: vec![],
        };
        let cart = Cart::from_payload(key(), payload);
        assert_eq!(cart.last_server_version.as_deref(), Some("v3"));
        assert!(cart.is_empty());
    }
}
