use crate::domain::money::Currency;
use crate::domain::payment::Provider;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure,
    Unknown,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
            Outcome::Unknown => "unknown",
        }
    }
}

/// What a normalized event is about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EventSubject {
    /// A charge, identified by the provider reference handed out at initialization.
    Payment { reference: String },
    /// A refund, identified by the gateway-assigned refund id.
    Refund { provider_refund_id: String },
}

/// The provider-agnostic outcome produced by an adapter from a verify response or a
/// webhook payload. The orchestrator never sees anything provider-specific except `raw`,
/// which it only stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedEvent {
    pub provider: Provider,
    pub subject: EventSubject,
    pub outcome: Outcome,
    pub amount: Option<Decimal>,
    pub currency: Option<Currency>,
    pub provider_event_id: Option<String>,
    pub gateway_transaction_id: Option<String>,
    pub authorization_code: Option<String>,
    pub raw: serde_json::Value,
}

impl NormalizedEvent {
    pub fn payment(provider: Provider, reference: impl Into<String>, outcome: Outcome) -> Self {
        Self {
            provider,
            subject: EventSubject::Payment {
                reference: reference.into(),
            },
            outcome,
            amount: None,
            currency: None,
            provider_event_id: None,
            gateway_transaction_id: None,
            authorization_code: None,
            raw: serde_json::Value::Null,
        }
    }

    pub fn refund(
        provider: Provider,
        provider_refund_id: impl Into<String>,
        outcome: Outcome,
    ) -> Self {
        Self {
            subject: EventSubject::Refund {
                provider_refund_id: provider_refund_id.into(),
            },
            ..Self::payment(provider, String::new(), outcome)
        }
    }

    /// The gateway has no record of the reference; never treated as success.
    pub fn unknown(provider: Provider, reference: impl Into<String>) -> Self {
        Self::payment(provider, reference, Outcome::Unknown)
    }

    pub fn with_amount(mut self, amount: Decimal, currency: Option<Currency>) -> Self {
        self.amount = Some(amount);
        self.currency = currency;
        self
    }

    pub fn with_event_id(mut self, id: impl Into<String>) -> Self {
        self.provider_event_id = Some(id.into());
        self
    }

    pub fn with_raw(mut self, raw: serde_json::Value) -> Self {
        self.raw = raw;
        self
    }

    /// Key used to recognize a redelivered webhook.
    ///
    /// Prefers the gateway's own event id; gateways without one fall back to the
    /// subject, outcome and amount, which is stable across redeliveries of the same
    /// notification.
    pub fn dedup_key(&self) -> String {
        match &self.provider_event_id {
            Some(id) => format!("{}:{}", self.provider, id),
            None => {
                let subject = match &self.subject {
                    EventSubject::Payment { reference } => format!("payment:{}", reference),
                    EventSubject::Refund { provider_refund_id } => {
                        format!("refund:{}", provider_refund_id)
                    }
                };
                let amount = self
                    .amount
                    .map(|a| a.normalize().to_string())
                    .unwrap_or_else(|| "-".to_string());
                format!(
                    "{}:{}:{}:{}",
                    self.provider,
                    subject,
                    self.outcome.as_str(),
                    amount
                )
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Initialized,
    Verified,
    WebhookReceived,
    RefundRequested,
    RefundSettled,
}

/// One row of the append-only audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentEvent {
    pub id: String,
    pub payment_id: String,
    pub kind: EventKind,
    pub outcome: Option<Outcome>,
    /// Unique across the ledger when present.
    pub dedup_key: Option<String>,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl PaymentEvent {
    pub fn new(payment_id: &str, kind: EventKind, payload: serde_json::Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            payment_id: payment_id.to_string(),
            kind,
            outcome: None,
            dedup_key: None,
            payload,
            created_at: Utc::now(),
        }
    }

    pub fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    pub fn with_dedup_key(mut self, key: Option<String>) -> Self {
        self.dedup_key = key;
        self
    }
}
