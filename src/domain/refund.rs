use crate::domain::money::Currency;
use crate::domain::payment::Provider;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RefundStatus {
    Pending,
    Completed,
    Failed,
}

impl RefundStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RefundStatus::Pending)
    }

    /// Whether the refund still counts against the payment's refundable balance.
    pub fn is_committed(self) -> bool {
        !matches!(self, RefundStatus::Failed)
    }
}

/// A request to return some or all of a payment's amount.
///
/// The row is written before the gateway is asked, so its amount is reserved against
/// the payment while the request is in flight. `provider_refund_id` is filled in once
/// the gateway accepts; a refused request leaves the row FAILED.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Refund {
    pub id: String,
    pub payment_id: String,
    pub provider: Provider,
    pub amount: Decimal,
    pub currency: Currency,
    pub reason: String,
    pub requested_by: String,
    pub status: RefundStatus,
    pub provider_refund_id: Option<String>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Refund {
    pub fn new(
        payment_id: String,
        provider: Provider,
        amount: Decimal,
        currency: Currency,
        reason: String,
        requested_by: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            payment_id,
            provider,
            amount,
            currency,
            reason,
            requested_by,
            status: RefundStatus::Pending,
            provider_refund_id: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Sum of refunds that have not failed, i.e. money already promised back to the payer.
pub fn committed_total(refunds: &[Refund]) -> Decimal {
    refunds
        .iter()
        .filter(|r| r.status.is_committed())
        .map(|r| r.amount)
        .sum()
}

/// Sum of non-failed refunds the gateway has acknowledged with its own id.
pub fn accepted_total(refunds: &[Refund]) -> Decimal {
    refunds
        .iter()
        .filter(|r| r.status.is_committed() && r.provider_refund_id.is_some())
        .map(|r| r.amount)
        .sum()
}
