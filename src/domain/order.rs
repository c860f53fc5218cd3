use crate::domain::payment::PaymentStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderPaymentStatus {
    #[default]
    Unpaid,
    Paid,
    Refunded,
}

/// The payment-facing projection of a work order owned by another subsystem.
///
/// Only `payment_status` and `payment_reference` are written by the payment core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRecord {
    pub id: String,
    pub owner_id: String,
    pub payment_status: OrderPaymentStatus,
    pub payment_reference: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl OrderRecord {
    pub fn new(id: String, owner_id: String) -> Self {
        Self {
            id,
            owner_id,
            payment_status: OrderPaymentStatus::Unpaid,
            payment_reference: None,
            updated_at: Utc::now(),
        }
    }
}

/// A pending write to an order's mirrored payment fields.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderMirror {
    pub order_id: String,
    /// `None` leaves the status as-is and only records the reference.
    pub payment_status: Option<OrderPaymentStatus>,
    pub payment_reference: String,
}

impl OrderMirror {
    /// Mirror for a payment status, if that status is one the order tracks.
    pub fn for_status(order_id: &str, status: PaymentStatus, reference: &str) -> Option<Self> {
        let payment_status = match status {
            PaymentStatus::Paid => OrderPaymentStatus::Paid,
            PaymentStatus::Refunded => OrderPaymentStatus::Refunded,
            PaymentStatus::Pending | PaymentStatus::Failed => return None,
        };
        Some(Self {
            order_id: order_id.to_string(),
            payment_status: Some(payment_status),
            payment_reference: reference.to_string(),
        })
    }

    pub fn reference_only(order_id: &str, reference: &str) -> Self {
        Self {
            order_id: order_id.to_string(),
            payment_status: None,
            payment_reference: reference.to_string(),
        }
    }

    pub fn apply(&self, order: &mut OrderRecord) {
        if let Some(status) = self.payment_status {
            order.payment_status = status;
        }
        order.payment_reference = Some(self.payment_reference.clone());
        order.updated_at = Utc::now();
    }
}
