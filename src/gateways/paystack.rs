use super::http::{build_client, ensure_success, parse, send};
use super::signature::{hex_digest_matches, hmac_sha512_hex};
use super::{CheckoutContext, GatewayAdapter, Initialization, RefundRequest};
use crate::domain::event::{NormalizedEvent, Outcome};
use crate::domain::money::{Currency, from_minor_units, to_minor_units};
use crate::domain::payment::{Payment, Provider};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.paystack.co";
pub const SIGNATURE_HEADER: &str = "x-paystack-signature";

#[derive(Debug, Clone)]
pub struct PaystackConfig {
    pub secret_key: String,
    pub base_url: String,
}

#[derive(Debug, Serialize)]
struct InitializeRequest<'a> {
    email: &'a str,
    /// Kobo (or pesewas, cents) as an integer.
    amount: i64,
    currency: &'a str,
    reference: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    callback_url: Option<&'a str>,
    metadata: Value,
}

/// Every Paystack response is wrapped in `{ status, message, data }`.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: bool,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct InitializeData {
    authorization_url: String,
    access_code: String,
    reference: String,
}

#[derive(Debug, Deserialize)]
struct Authorization {
    authorization_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TransactionData {
    id: Value,
    status: String,
    reference: String,
    amount: i64,
    currency: String,
    authorization: Option<Authorization>,
}

#[derive(Debug, Deserialize)]
struct WebhookEnvelope {
    event: String,
    data: Value,
}

#[derive(Debug, Deserialize)]
struct RefundData {
    id: Value,
}

/// Paystack: JSON API, amounts in integer minor units, HMAC-SHA512 webhook signatures
/// keyed with the secret key.
#[derive(Debug, Clone)]
pub struct PaystackGateway {
    client: Client,
    config: PaystackConfig,
}

impl PaystackGateway {
    pub fn new(config: PaystackConfig, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            config,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn unwrap_envelope<T>(envelope: Envelope<T>) -> Result<T> {
        if !envelope.status {
            return Err(PaymentError::ExternalServiceError(format!(
                "paystack rejected the request: {}",
                envelope.message
            )));
        }
        envelope.data.ok_or_else(|| {
            PaymentError::ExternalServiceError("paystack response missing data".to_string())
        })
    }

    fn transaction_event(&self, tx: TransactionData, raw: Value) -> NormalizedEvent {
        let outcome = match tx.status.as_str() {
            "success" => Outcome::Success,
            "failed" | "reversed" => Outcome::Failure,
            // abandoned, ongoing, pending, processing, queued: the payer may still finish
            _ => Outcome::Unknown,
        };
        let currency = tx.currency.parse::<Currency>().ok();
        let mut event = NormalizedEvent::payment(Provider::Paystack, tx.reference, outcome)
            .with_raw(raw);
        if let Some(currency) = currency {
            event = event.with_amount(from_minor_units(tx.amount, currency), Some(currency));
        }
        event.gateway_transaction_id = id_string(&tx.id);
        event.authorization_code = tx.authorization.and_then(|a| a.authorization_code);
        event
    }
}

/// Paystack ids come back as numbers in some payloads and strings in others.
fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[async_trait]
impl GatewayAdapter for PaystackGateway {
    fn provider(&self) -> Provider {
        Provider::Paystack
    }

    fn supports_currency(&self, currency: Currency) -> bool {
        matches!(
            currency,
            Currency::Ngn | Currency::Ghs | Currency::Kes | Currency::Zar | Currency::Usd
        )
    }

    fn signature_header(&self) -> &'static str {
        SIGNATURE_HEADER
    }

    async fn initialize(
        &self,
        payment: &Payment,
        ctx: &CheckoutContext,
    ) -> Result<Initialization> {
        let email = ctx.customer_email.as_deref().ok_or_else(|| {
            PaymentError::ValidationError("Paystack requires a customer email".to_string())
        })?;

        let mut metadata = json!({
            "payment_id": payment.id,
            "owner_id": payment.owner_id,
            "order_id": payment.order_id,
        });
        if let Some(map) = metadata.as_object_mut() {
            for (key, value) in &ctx.metadata {
                map.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }

        let body = InitializeRequest {
            email,
            amount: to_minor_units(payment.amount, payment.currency)?,
            currency: payment.currency.code(),
            reference: &payment.id,
            callback_url: ctx.callback_url.as_deref(),
            metadata,
        };

        let request = self
            .client
            .post(self.url("/transaction/initialize"))
            .bearer_auth(&self.config.secret_key)
            .json(&body);
        let (status, body) = send(Provider::Paystack, request).await?;
        ensure_success(Provider::Paystack, status, &body)?;

        let data = Self::unwrap_envelope(parse::<Envelope<InitializeData>>(Provider::Paystack, body)?)?;
        Ok(Initialization {
            redirect_url: data.authorization_url,
            provider_reference: data.reference,
            access_code: Some(data.access_code),
        })
    }

    async fn verify(&self, provider_reference: &str) -> Result<NormalizedEvent> {
        let request = self
            .client
            .get(self.url(&format!("/transaction/verify/{}", provider_reference)))
            .bearer_auth(&self.config.secret_key);
        let (status, body) = send(Provider::Paystack, request).await?;

        if status == StatusCode::NOT_FOUND
            || (status == StatusCode::BAD_REQUEST
                && body
                    .get("message")
                    .and_then(Value::as_str)
                    .is_some_and(|m| m.to_lowercase().contains("not found")))
        {
            tracing::info!(reference = provider_reference, "Paystack has no record of reference");
            return Ok(NormalizedEvent::unknown(Provider::Paystack, provider_reference).with_raw(body));
        }
        ensure_success(Provider::Paystack, status, &body)?;

        let raw = body.clone();
        let tx = Self::unwrap_envelope(parse::<Envelope<TransactionData>>(Provider::Paystack, body)?)?;
        Ok(self.transaction_event(tx, raw))
    }

    fn normalize_webhook(
        &self,
        signature: Option<&str>,
        payload: &[u8],
    ) -> Result<Option<NormalizedEvent>> {
        let signature = signature.ok_or_else(|| {
            PaymentError::SignatureError(format!("Missing {} header", SIGNATURE_HEADER))
        })?;
        let expected = hmac_sha512_hex(self.config.secret_key.as_bytes(), payload)?;
        if !hex_digest_matches(&expected, signature) {
            return Err(PaymentError::SignatureError(
                "Paystack signature mismatch".to_string(),
            ));
        }

        let raw: Value = serde_json::from_slice(payload)
            .map_err(|e| PaymentError::ValidationError(format!("Invalid Paystack payload: {}", e)))?;
        let envelope: WebhookEnvelope = serde_json::from_value(raw.clone())
            .map_err(|e| PaymentError::ValidationError(format!("Invalid Paystack payload: {}", e)))?;

        match envelope.event.as_str() {
            "charge.success" | "charge.failed" => {
                let tx: TransactionData = serde_json::from_value(envelope.data).map_err(|e| {
                    PaymentError::ValidationError(format!("Invalid Paystack charge: {}", e))
                })?;
                let event_id = id_string(&tx.id).map(|id| format!("{}:{}", envelope.event, id));
                let mut event = self.transaction_event(tx, raw);
                if envelope.event == "charge.failed" {
                    event.outcome = Outcome::Failure;
                }
                event.provider_event_id = event_id;
                Ok(Some(event))
            }
            "refund.processed" | "refund.failed" => {
                let Some(refund_id) = envelope.data.get("id").and_then(id_string) else {
                    tracing::warn!(event = %envelope.event, "Paystack refund webhook without id");
                    return Ok(None);
                };
                let outcome = if envelope.event == "refund.processed" {
                    Outcome::Success
                } else {
                    Outcome::Failure
                };
                Ok(Some(
                    NormalizedEvent::refund(Provider::Paystack, refund_id.clone(), outcome)
                        .with_event_id(format!("{}:{}", envelope.event, refund_id))
                        .with_raw(raw),
                ))
            }
            _ => Ok(None),
        }
    }

    async fn refund(&self, request: &RefundRequest) -> Result<String> {
        let body = json!({
            "transaction": request.provider_reference,
            "amount": request.amount_minor,
            "currency": request.currency.code(),
            "merchant_note": request.reason,
        });
        let http_request = self
            .client
            .post(self.url("/refund"))
            .bearer_auth(&self.config.secret_key)
            .json(&body);
        let (status, body) = send(Provider::Paystack, http_request).await?;
        ensure_success(Provider::Paystack, status, &body)?;

        let data = Self::unwrap_envelope(parse::<Envelope<RefundData>>(Provider::Paystack, body)?)?;
        id_string(&data.id).ok_or_else(|| {
            PaymentError::ExternalServiceError("paystack refund response missing id".to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> PaystackGateway {
        PaystackGateway::new(
            PaystackConfig {
                secret_key: "sk_test_secret".to_string(),
                base_url: DEFAULT_BASE_URL.to_string(),
            },
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn sign(payload: &[u8]) -> String {
        hmac_sha512_hex(b"sk_test_secret", payload).unwrap()
    }

    #[test]
    fn test_charge_success_webhook() {
        let payload = json!({
            "event": "charge.success",
            "data": {
                "id": 302961,
                "status": "success",
                "reference": "pay-1",
                "amount": 8200000,
                "currency": "NGN",
                "authorization": { "authorization_code": "AUTH_8dfhjjdt" }
            }
        })
        .to_string();

        let event = gateway()
            .normalize_webhook(Some(&sign(payload.as_bytes())), payload.as_bytes())
            .unwrap()
            .unwrap();

        assert_eq!(event.outcome, Outcome::Success);
        assert_eq!(event.amount, Some(rust_decimal_macros::dec!(82000)));
        assert_eq!(event.currency, Some(Currency::Ngn));
        assert_eq!(event.provider_event_id.as_deref(), Some("charge.success:302961"));
        assert_eq!(event.gateway_transaction_id.as_deref(), Some("302961"));
        assert_eq!(event.authorization_code.as_deref(), Some("AUTH_8dfhjjdt"));
    }

    #[test]
    fn test_bad_signature_rejected() {
        let payload = br#"{"event":"charge.success","data":{}}"#;
        let result = gateway().normalize_webhook(Some("deadbeef"), payload);
        assert!(matches!(result, Err(PaymentError::SignatureError(_))));

        let missing = gateway().normalize_webhook(None, payload);
        assert!(matches!(missing, Err(PaymentError::SignatureError(_))));
    }

    #[test]
    fn test_unhandled_event_ignored() {
        let payload = br#"{"event":"transfer.success","data":{"id":1}}"#;
        let event = gateway()
            .normalize_webhook(Some(&sign(payload)), payload)
            .unwrap();
        assert!(event.is_none());
    }

    #[test]
    fn test_refund_processed_webhook() {
        let payload = br#"{"event":"refund.processed","data":{"id":"3018284","status":"processed"}}"#;
        let event = gateway()
            .normalize_webhook(Some(&sign(payload)), payload)
            .unwrap()
            .unwrap();
        assert_eq!(
            event.subject,
            crate::domain::event::EventSubject::Refund {
                provider_refund_id: "3018284".to_string()
            }
        );
        assert_eq!(event.outcome, Outcome::Success);
    }

    #[test]
    fn test_abandoned_transaction_is_unknown() {
        let tx = TransactionData {
            id: json!(1),
            status: "abandoned".to_string(),
            reference: "pay-1".to_string(),
            amount: 100,
            currency: "NGN".to_string(),
            authorization: None,
        };
        let event = gateway().transaction_event(tx, Value::Null);
        assert_eq!(event.outcome, Outcome::Unknown);
    }
}
