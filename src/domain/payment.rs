use crate::domain::money::Currency;
use crate::error::PaymentError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Caller-supplied context carried alongside a payment (service type, device, ...).
pub type Metadata = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Paystack,
    Flutterwave,
    Stripe,
}

impl Provider {
    pub fn as_str(self) -> &'static str {
        match self {
            Provider::Paystack => "paystack",
            Provider::Flutterwave => "flutterwave",
            Provider::Stripe => "stripe",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "paystack" => Ok(Provider::Paystack),
            "flutterwave" | "flw" => Ok(Provider::Flutterwave),
            "stripe" => Ok(Provider::Stripe),
            other => Err(PaymentError::ValidationError(format!(
                "Unknown payment provider: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }

    /// PENDING may settle either way; PAID may only be refunded.
    pub fn can_transition_to(self, next: PaymentStatus) -> bool {
        matches!(
            (self, next),
            (PaymentStatus::Pending, PaymentStatus::Paid)
                | (PaymentStatus::Pending, PaymentStatus::Failed)
                | (PaymentStatus::Paid, PaymentStatus::Refunded)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Paid => "PAID",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Refunded => "REFUNDED",
        }
    }
}

/// One monetary transaction attempt.
///
/// The `id` doubles as the idempotency key sent to gateways. `version` is bumped by
/// the ledger on every committed write and is what concurrent writers compare against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: String,
    pub owner_id: String,
    pub order_id: Option<String>,
    pub amount: Decimal,
    pub currency: Currency,
    pub status: PaymentStatus,
    pub provider: Provider,
    pub provider_reference: Option<String>,
    pub access_code: Option<String>,
    /// Gateway-side transaction id learned on confirmation (needed by some refund APIs).
    pub gateway_transaction_id: Option<String>,
    pub authorization_code: Option<String>,
    pub webhook_verified: bool,
    pub verified_at: Option<DateTime<Utc>>,
    pub metadata: Metadata,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    pub fn new(
        owner_id: String,
        order_id: Option<String>,
        amount: Decimal,
        currency: Currency,
        provider: Provider,
        metadata: Metadata,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id,
            order_id,
            amount,
            currency,
            status: PaymentStatus::Pending,
            provider,
            provider_reference: None,
            access_code: None,
            gateway_transaction_id: None,
            authorization_code: None,
            webhook_verified: false,
            verified_at: None,
            metadata,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// The reference gateways correlate on; falls back to our own id before initialization.
    pub fn reference(&self) -> &str {
        self.provider_reference.as_deref().unwrap_or(&self.id)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
