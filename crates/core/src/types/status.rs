//! Status enums for orders and users.

use serde::{Deserialize, Serialize};

/// Kitchen-side lifecycle of a confirmed order.
///
/// Maps to the values the order backend reports in order history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    #[default]
    Placed,
    Accepted,
    Preparing,
    Ready,
    Served,
    Cancelled,
}

/// Payment state of an order as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Paid,
    Refunded,
    Failed,
}

/// Roles carried by an authenticated user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Customer,
    OutletStaff,
    CourtManager,
    Admin,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_order_status_wire_format() {
        let json = serde_json::to_string(&OrderStatus::Preparing).unwrap();
        assert_eq!(json, "\"PREPARING\"");
    }

    #[test]
    fn test_user_role_wire_format() {
        let json = serde_json::to_string(&UserRole::CourtManager).unwrap();
        assert_eq!(json, "\"court_manager\"");

        let parsed: UserRole = serde_json::from_str("\"customer\"").unwrap();
        assert_eq!(parsed, UserRole::Customer);
    }
}
