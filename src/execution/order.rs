//! Orders sent to the exchange and the acknowledgements that come back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::OrderSide;

/// Generate a client-side idempotency key.
///
/// Format: `at_{uuid}` with the uuid in simple form, 35 characters in total so
/// it fits the exchange's 36 character client order id limit.
pub fn generate_idempotency_key() -> String {
    format!("at_{}", Uuid::new_v4().as_simple())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Created locally, not yet acknowledged by the exchange.
    Pending,
    /// Accepted by the exchange, not filled yet.
    Acknowledged,
    Filled,
    PartiallyFilled,
    Cancelled,
    /// Rejected, expired, or never accepted.
    Failed,
}

impl OrderStatus {
    /// Check if this is a terminal status (order is done).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Filled | Self::Cancelled | Self::Failed)
    }

    /// Still working on the exchange.
    pub fn is_working(&self) -> bool {
        matches!(self, Self::Acknowledged | Self::PartiallyFilled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Acknowledged => "ACKNOWLEDGED",
            Self::Filled => "FILLED",
            Self::PartiallyFilled => "PARTIALLY_FILLED",
            Self::Cancelled => "CANCELLED",
            Self::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "ACKNOWLEDGED" => Some(Self::Acknowledged),
            "FILLED" => Some(Self::Filled),
            "PARTIALLY_FILLED" => Some(Self::PartiallyFilled),
            "CANCELLED" => Some(Self::Cancelled),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Whether an order opens or closes its position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderPurpose {
    Entry,
    Exit,
}

impl OrderPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Entry => "entry",
            Self::Exit => "exit",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "entry" => Some(Self::Entry),
            "exit" => Some(Self::Exit),
            _ => None,
        }
    }
}

/// One logical market order intent, as submitted to the exchange.
///
/// The idempotency key is fixed at construction; retries submit the same
/// request value so the exchange can deduplicate them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub idempotency_key: String,
    pub pair: String,
    pub side: OrderSide,
    pub quantity: f64,
    /// `None` for market orders.
    pub price: Option<f64>,
    pub reduce_only: bool,
}

impl OrderRequest {
    pub fn market(pair: &str, side: OrderSide, quantity: f64) -> Self {
        Self {
            idempotency_key: generate_idempotency_key(),
            pair: pair.to_string(),
            side,
            quantity,
            price: None,
            reduce_only: false,
        }
    }

    pub fn reduce_only(mut self) -> Self {
        self.reduce_only = true;
        self
    }
}

/// Exchange acknowledgement of an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAck {
    pub exchange_order_id: String,
    pub status: OrderStatus,
    pub filled_quantity: f64,
    /// Average fill price, when anything filled.
    pub avg_price: Option<f64>,
}

/// An order owned by exactly one position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub idempotency_key: String,
    pub exchange_order_id: Option<String>,
    pub pair: String,
    pub side: OrderSide,
    pub purpose: OrderPurpose,
    pub quantity: f64,
    pub requested_price: Option<f64>,
    pub fill_price: Option<f64>,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Local record of a request that has not been acknowledged yet
    pub fn pending(request: &OrderRequest, purpose: OrderPurpose) -> Self {
        let now = Utc::now();
        Self {
            idempotency_key: request.idempotency_key.clone(),
            exchange_order_id: None,
            pair: request.pair.clone(),
            side: request.side,
            purpose,
            quantity: request.quantity,
            requested_price: request.price,
            fill_price: None,
            status: OrderStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    /// Fold an exchange acknowledgement into the order.
    ///
    /// A bare "new" acknowledgement leaves the order `Acknowledged`; fills
    /// reported in the same response are kept.
    pub fn apply_ack(&mut self, ack: &OrderAck) {
        self.exchange_order_id = Some(ack.exchange_order_id.clone());
        self.status = match ack.status {
            OrderStatus::Pending => OrderStatus::Acknowledged,
            other => other,
        };
        if ack.avg_price.is_some() {
            self.fill_price = ack.avg_price;
        }
        self.updated_at = Utc::now();
    }

    pub fn mark(&mut self, status: OrderStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    /// Build the ledger copy of an acknowledged request
    pub fn acknowledged(request: &OrderRequest, purpose: OrderPurpose, ack: &OrderAck) -> Self {
        let mut order = Self::pending(request, purpose);
        order.apply_ack(ack);
        order
    }
}
