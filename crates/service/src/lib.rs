//! Business logic layer for order intake.
//!
//! This module defines the [`OrderService`] trait and its implementation
//! [`OrderServiceImpl`]. The service coordinates payload sanitization,
//! duplicate cash-order suppression, persistence through the resolved
//! repository, the in-process "new order" event, and best-effort
//! notification fan-out. Persistence failures surface to the caller;
//! notification failures never do, because they happen after the order is
//! already stored.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use events::{OrderEvent, OrderEvents};
use model::{CASH_ON_DELIVERY, Order};
use notifier::{NotificationService, NotifyContext};
use ports::{Clock, IdGenerator};
use repository::{ProvideRepository, RepositoryError};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, instrument, warn};

/// The main error type for all operations in [`OrderService`].
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The payload is missing contact info or items; nothing was persisted.
    #[error("invalid order: {0}")]
    InvalidOrder(String),
    /// A recent cash order with the same phone already exists.
    #[error("duplicate recent order")]
    DuplicateOrder,
    /// A repository operation failed with no fallback remaining.
    #[error("storage error: {0}")]
    Storage(#[from] RepositoryError),
}

impl ServiceError {
    /// HTTP-equivalent classification for the transport layer.
    pub fn status_code(&self) -> u16 {
        match self {
            ServiceError::InvalidOrder(_) => 400,
            ServiceError::DuplicateOrder => 409,
            ServiceError::Storage(_) => 500,
        }
    }
}

/// Result of a successful order placement.
///
/// `stored` is exactly what the repository holds; `clean` is the
/// caller-facing projection with internal fields stripped.
#[derive(Debug, Clone)]
pub struct PlacedOrder {
    pub stored: Order,
    pub clean: Order,
}

/// Trait describing the order intake operations.
#[async_trait]
pub trait OrderService: Send + Sync {
    /// Sanitize, validate, deduplicate, persist and announce a new order.
    ///
    /// # Errors
    /// [`ServiceError::InvalidOrder`] when contact info or items are
    /// missing, [`ServiceError::DuplicateOrder`] on a recent matching cash
    /// order, [`ServiceError::Storage`] when even the fallback stores
    /// cannot accept the write.
    async fn create_order(&self, raw: &Value) -> Result<PlacedOrder, ServiceError>;

    /// Set the status of an existing order. Returns `None` when no order
    /// matches `id`.
    async fn update_order_status(
        &self,
        id: &str,
        status: &str,
    ) -> Result<Option<Order>, ServiceError>;

    /// Most recent orders first.
    async fn list_orders(&self, limit: usize) -> Result<Vec<Order>, ServiceError>;
}

/// Production implementation of [`OrderService`].
///
/// All collaborators are injected: the repository provider, the customer
/// mail channel, the operations fan-out, the event topic, and the
/// clock/id ports for deterministic tests.
pub struct OrderServiceImpl {
    provider: Arc<dyn ProvideRepository>,
    customer_mailer: Arc<dyn NotificationService>,
    ops_notifier: Arc<dyn NotificationService>,
    events: OrderEvents,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    duplicate_window: ChronoDuration,
    ops_recipient: String,
}

impl OrderServiceImpl {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        provider: Arc<dyn ProvideRepository>,
        customer_mailer: Arc<dyn NotificationService>,
        ops_notifier: Arc<dyn NotificationService>,
        events: OrderEvents,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        duplicate_window: std::time::Duration,
        ops_recipient: String,
    ) -> Self {
        Self {
            provider,
            customer_mailer,
            ops_notifier,
            events,
            clock,
            ids,
            duplicate_window: ChronoDuration::from_std(duplicate_window)
                .unwrap_or_else(|_| ChronoDuration::minutes(2)),
            ops_recipient,
        }
    }

    fn confirmation_message(order: &Order) -> String {
        format!(
            "Hi {},\n\nwe received your order {} for {} {}. \
             We will contact you on {} to confirm delivery.\n\nThank you!",
            order.customer.name,
            order.order_code,
            order.totals.grand_total,
            order.totals.currency,
            order.customer.phone,
        )
    }

    fn ops_summary(order: &Order) -> String {
        let payment = if order.payment_method == CASH_ON_DELIVERY {
            "cash on delivery"
        } else {
            order.payment_method.as_str()
        };
        format!(
            "Order {}\nCustomer: {} ({})\nCity: {}\nItems: {}\nTotal: {} {}\nPayment: {}",
            order.order_code,
            order.customer.name,
            order.customer.phone,
            order.customer.city,
            order.items.len(),
            order.totals.grand_total,
            order.totals.currency,
            payment,
        )
    }
}

#[async_trait]
impl OrderService for OrderServiceImpl {
    #[instrument(skip(self, raw))]
    async fn create_order(&self, raw: &Value) -> Result<PlacedOrder, ServiceError> {
        let mut order = sanitizer::sanitize(raw, self.ids.as_ref());

        if !order.has_contact_info() {
            return Err(ServiceError::InvalidOrder("missing contact info".to_string()));
        }
        if order.items.is_empty() {
            // Second chance: pull items straight off the raw body with
            // looser field names before rejecting the order.
            order.items = sanitizer::extract_items_loose(raw);
            if order.items.is_empty() {
                return Err(ServiceError::InvalidOrder("missing items".to_string()));
            }
            order.totals = sanitizer::resolve_totals(raw, &order.items);
        }

        let repo = self.provider.repository().await;
        let now = self.clock.now();

        if order.payment_method == CASH_ON_DELIVERY {
            let since = now - self.duplicate_window;
            let recent = repo
                .find_recent_cash_order_by_phone(&order.customer.phone, since)
                .await?;
            if recent.is_some() {
                return Err(ServiceError::DuplicateOrder);
            }
        }

        order.created_at = sanitizer::parse_datetime(&raw["createdAt"]).unwrap_or(now);
        order.updated_at =
            sanitizer::parse_datetime(&raw["updatedAt"]).unwrap_or(order.created_at);
        if order.id.is_empty() {
            order.id = self.ids.id();
        }
        if order.order_code.is_empty() {
            order.order_code = self.ids.order_code();
        }

        let stored = repo.create(order).await?;
        let clean = stored.clean();
        info!(order_id = %clean.id, order_code = %clean.order_code, "order persisted");

        if !clean.customer.email.is_empty() {
            let ctx = NotifyContext {
                subject: format!("Order {} confirmed", clean.order_code),
            };
            let message = Self::confirmation_message(&clean);
            if let Err(err) = self
                .customer_mailer
                .notify(&clean.customer.email, &message, &ctx)
                .await
            {
                warn!(error = %err, "customer confirmation email failed");
            }
        }

        self.events.publish(OrderEvent::Placed(Box::new(clean.clone())));

        let ctx = NotifyContext {
            subject: format!("New order {}", clean.order_code),
        };
        if let Err(err) = self
            .ops_notifier
            .notify(&self.ops_recipient, &Self::ops_summary(&clean), &ctx)
            .await
        {
            warn!(error = %err, "operations notification failed");
        }

        Ok(PlacedOrder { stored, clean })
    }

    #[instrument(skip(self))]
    async fn update_order_status(
        &self,
        id: &str,
        status: &str,
    ) -> Result<Option<Order>, ServiceError> {
        let status = status.trim();
        if status.is_empty() {
            return Err(ServiceError::InvalidOrder("missing status".to_string()));
        }
        let repo = self.provider.repository().await;
        Ok(repo.update_status(id, status, self.clock.now()).await?)
    }

    #[instrument(skip(self))]
    async fn list_orders(&self, limit: usize) -> Result<Vec<Order>, ServiceError> {
        let repo = self.provider.repository().await;
        Ok(repo.list(limit).await?)
    }
}
