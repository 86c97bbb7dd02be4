//! Order history for the authenticated session.
//!
//! Responses are cached briefly so dashboards polling the list do not
//! hammer the backend; a successful checkout invalidates the cache so the
//! new order is visible immediately.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use moka::future::Cache;
use tracing::{debug, instrument};

use tablefare_core::{Money, OrderId, OrderStatus, PaymentStatus};

use crate::api::types::{OrderSummaryPayload, OrdersResponse};
use crate::api::{ApiError, ApiGateway, Transport, paths};

const RECENT_ORDERS_CACHE_KEY: &str = "recent";
const ORDERS_CACHE_TTL: Duration = Duration::from_secs(60);
const ORDERS_CACHE_CAPACITY: u64 = 8;

/// One order in the session's history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderSummary {
    pub order_id: OrderId,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub total: Money,
    pub placed_at: DateTime<Utc>,
}

impl OrderSummary {
    fn from_payload(payload: OrderSummaryPayload) -> Self {
        Self {
            order_id: payload.order_id,
            status: payload.status,
            payment_status: payload.payment_status,
            total: Money::new(payload.total, payload.currency),
            placed_at: payload.placed_at,
        }
    }
}

/// Order history reads, cached for [`ORDERS_CACHE_TTL`].
pub struct OrdersService<T> {
    inner: Arc<OrdersInner<T>>,
}

impl<T> Clone for OrdersService<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct OrdersInner<T> {
    gateway: ApiGateway<T>,
    cache: Cache<&'static str, Arc<Vec<OrderSummary>>>,
}

impl<T: Transport> OrdersService<T> {
    /// Create the service over a gateway.
    #[must_use]
    pub fn new(gateway: ApiGateway<T>) -> Self {
        let cache = Cache::builder()
            .max_capacity(ORDERS_CACHE_CAPACITY)
            .time_to_live(ORDERS_CACHE_TTL)
            .build();

        Self {
            inner: Arc::new(OrdersInner { gateway, cache }),
        }
    }

    /// The session's recent orders, newest first as the backend returns
    /// them.
    ///
    /// # Errors
    ///
    /// Gateway errors pass through, including the session-fatal
    /// [`ApiError::SessionExpired`].
    #[instrument(skip(self))]
    pub async fn recent_orders(&self) -> Result<Vec<OrderSummary>, ApiError> {
        if let Some(orders) = self.inner.cache.get(RECENT_ORDERS_CACHE_KEY).await {
            debug!("cache hit for recent orders");
            return Ok(orders.as_ref().clone());
        }

        let response: OrdersResponse = self.inner.gateway.get(paths::ORDERS).await?;
        let orders: Vec<OrderSummary> = response
            .orders
            .into_iter()
            .map(OrderSummary::from_payload)
            .collect();

        self.inner
            .cache
            .insert(RECENT_ORDERS_CACHE_KEY, Arc::new(orders.clone()))
            .await;

        Ok(orders)
    }

    /// Drop the cached list (a new order just landed).
    pub async fn invalidate(&self) {
        self.inner.cache.invalidate(RECENT_ORDERS_CACHE_KEY).await;
    }
}

impl<T> std::fmt::Debug for OrdersService<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrdersService").finish_non_exhaustive()
    }
}
