use super::http::{build_client, ensure_success, parse, send};
use super::signature::constant_time_eq;
use super::{CheckoutContext, GatewayAdapter, Initialization, RefundRequest};
use crate::domain::event::{NormalizedEvent, Outcome};
use crate::domain::money::{Currency, from_minor_units};
use crate::domain::payment::{Payment, Provider};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{Value, json};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.flutterwave.com";
pub const SIGNATURE_HEADER: &str = "verif-hash";

#[derive(Debug, Clone)]
pub struct FlutterwaveConfig {
    pub secret_key: String,
    /// Shared secret echoed back verbatim in the `verif-hash` header of every webhook.
    pub secret_hash: String,
    pub base_url: String,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: String,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct PaymentLink {
    link: String,
}

#[derive(Debug, Deserialize)]
struct Transaction {
    id: Value,
    tx_ref: String,
    status: String,
    amount: Value,
    currency: String,
}

#[derive(Debug, Deserialize)]
struct WebhookEnvelope {
    event: String,
    data: Value,
}

/// Flutterwave: JSON API with major-unit decimal amounts and a shared-secret
/// `verif-hash` header instead of a computed signature.
#[derive(Debug, Clone)]
pub struct FlutterwaveGateway {
    client: Client,
    config: FlutterwaveConfig,
}

impl FlutterwaveGateway {
    pub fn new(config: FlutterwaveConfig, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            config,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn unwrap_envelope<T>(envelope: Envelope<T>) -> Result<T> {
        if envelope.status != "success" {
            return Err(PaymentError::ExternalServiceError(format!(
                "flutterwave rejected the request: {}",
                envelope.message
            )));
        }
        envelope.data.ok_or_else(|| {
            PaymentError::ExternalServiceError("flutterwave response missing data".to_string())
        })
    }

    fn transaction_event(tx: Transaction, raw: Value) -> NormalizedEvent {
        let outcome = match tx.status.as_str() {
            "successful" => Outcome::Success,
            "failed" | "cancelled" => Outcome::Failure,
            _ => Outcome::Unknown,
        };
        let currency = tx.currency.parse::<Currency>().ok();
        let mut event = NormalizedEvent::payment(Provider::Flutterwave, tx.tx_ref, outcome)
            .with_raw(raw);
        if let Some(currency) = currency
            && let Some(amount) = major_amount(&tx.amount)
        {
            event = event.with_amount(amount, Some(currency));
        }
        event.gateway_transaction_id = id_string(&tx.id);
        event
    }

    async fn lookup(&self, tx_ref: &str) -> Result<Option<(Transaction, Value)>> {
        let request = self
            .client
            .get(self.url("/v3/transactions/verify_by_reference"))
            .query(&[("tx_ref", tx_ref)])
            .bearer_auth(&self.config.secret_key);
        let (status, body) = send(Provider::Flutterwave, request).await?;

        let no_record = body
            .get("message")
            .and_then(Value::as_str)
            .is_some_and(|m| m.to_lowercase().contains("no transaction"));
        if status == StatusCode::NOT_FOUND || (status.is_client_error() && no_record) {
            return Ok(None);
        }
        ensure_success(Provider::Flutterwave, status, &body)?;

        let raw = body.clone();
        let tx = Self::unwrap_envelope(parse::<Envelope<Transaction>>(Provider::Flutterwave, body)?)?;
        Ok(Some((tx, raw)))
    }
}

/// Flutterwave reports major units as a JSON number or string. The value is kept
/// exactly as reported, so a figure finer than the currency's minor unit stays
/// visible to the amount check instead of being dropped or rounded.
fn major_amount(value: &Value) -> Option<Decimal> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        _ => return None,
    };
    Decimal::from_str(&text).ok()
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[async_trait]
impl GatewayAdapter for FlutterwaveGateway {
    fn provider(&self) -> Provider {
        Provider::Flutterwave
    }

    fn supports_currency(&self, currency: Currency) -> bool {
        !matches!(currency, Currency::Jpy)
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
            PaymentError::ValidationError("Flutterwave requires a customer email".to_string())
        })?;
        let redirect_url = ctx.callback_url.as_deref().ok_or_else(|| {
            PaymentError::ValidationError("Flutterwave requires a redirect URL".to_string())
        })?;

        let mut meta = json!({
            "payment_id": payment.id,
            "owner_id": payment.owner_id,
        });
        if let Some(order_id) = &payment.order_id {
            meta["order_id"] = json!(order_id);
        }

        let body = json!({
            "tx_ref": payment.id,
            "amount": payment.amount.normalize().to_string(),
            "currency": payment.currency.code(),
            "redirect_url": redirect_url,
            "customer": { "email": email },
            "meta": meta,
            "customizations": {
                "title": ctx.description.clone().unwrap_or_else(|| "Device repair".to_string()),
            },
        });

        let request = self
            .client
            .post(self.url("/v3/payments"))
            .bearer_auth(&self.config.secret_key)
            .json(&body);
        let (status, body) = send(Provider::Flutterwave, request).await?;
        ensure_success(Provider::Flutterwave, status, &body)?;

        let data = Self::unwrap_envelope(parse::<Envelope<PaymentLink>>(Provider::Flutterwave, body)?)?;
        Ok(Initialization {
            redirect_url: data.link,
            provider_reference: payment.id.clone(),
            access_code: None,
        })
    }

    async fn verify(&self, provider_reference: &str) -> Result<NormalizedEvent> {
        match self.lookup(provider_reference).await? {
            Some((tx, raw)) => Ok(Self::transaction_event(tx, raw)),
            None => {
                tracing::info!(reference = provider_reference, "Flutterwave has no record of reference");
                Ok(NormalizedEvent::unknown(Provider::Flutterwave, provider_reference))
            }
        }
    }

    fn normalize_webhook(
        &self,
        signature: Option<&str>,
        payload: &[u8],
    ) -> Result<Option<NormalizedEvent>> {
        let provided = signature.ok_or_else(|| {
            PaymentError::SignatureError(format!("Missing {} header", SIGNATURE_HEADER))
        })?;
        if !constant_time_eq(self.config.secret_hash.as_bytes(), provided.trim().as_bytes()) {
            return Err(PaymentError::SignatureError(
                "Flutterwave verif-hash mismatch".to_string(),
            ));
        }

        let raw: Value = serde_json::from_slice(payload).map_err(|e| {
            PaymentError::ValidationError(format!("Invalid Flutterwave payload: {}", e))
        })?;
        let envelope: WebhookEnvelope = serde_json::from_value(raw.clone()).map_err(|e| {
            PaymentError::ValidationError(format!("Invalid Flutterwave payload: {}", e))
        })?;

        if envelope.event != "charge.completed" {
            return Ok(None);
        }

        let tx: Transaction = serde_json::from_value(envelope.data).map_err(|e| {
            PaymentError::ValidationError(format!("Invalid Flutterwave charge: {}", e))
        })?;
        // No top-level event id: the transaction id plus its status identifies a delivery.
        let event_id = id_string(&tx.id).map(|id| format!("{}:{}:{}", envelope.event, id, tx.status));
        let mut event = Self::transaction_event(tx, raw);
        event.provider_event_id = event_id;
        Ok(Some(event))
    }

    async fn refund(&self, request: &RefundRequest) -> Result<String> {
        let transaction_id = match &request.gateway_transaction_id {
            Some(id) => id.clone(),
            None => self
                .lookup(&request.provider_reference)
                .await?
                .and_then(|(tx, _)| id_string(&tx.id))
                .ok_or_else(|| {
                    PaymentError::NotFound(format!(
                        "Flutterwave transaction for {}",
                        request.provider_reference
                    ))
                })?,
        };

        let amount = from_minor_units(request.amount_minor, request.currency);
        let body = json!({
            "amount": amount.normalize().to_string(),
            "comments": request.reason,
        });
        let http_request = self
            .client
            .post(self.url(&format!("/v3/transactions/{}/refund", transaction_id)))
            .bearer_auth(&self.config.secret_key)
            .json(&body);
        let (status, body) = send(Provider::Flutterwave, http_request).await?;
        ensure_success(Provider::Flutterwave, status, &body)?;

        let data = Self::unwrap_envelope(parse::<Envelope<Value>>(Provider::Flutterwave, body)?)?;
        data.get("id").and_then(id_string).ok_or_else(|| {
            PaymentError::ExternalServiceError("flutterwave refund response missing id".to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn gateway() -> FlutterwaveGateway {
        FlutterwaveGateway::new(
            FlutterwaveConfig {
                secret_key: "FLWSECK_TEST".to_string(),
                secret_hash: "my-hash".to_string(),
                base_url: DEFAULT_BASE_URL.to_string(),
            },
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_major_amount_parsing() {
        assert_eq!(major_amount(&json!(82000)), Some(dec!(82000)));
        assert_eq!(major_amount(&json!(19.99)), Some(dec!(19.99)));
        assert_eq!(major_amount(&json!("150.5")), Some(dec!(150.50)));
        assert_eq!(major_amount(&json!("8200.005")), Some(dec!(8200.005)));
        assert_eq!(major_amount(&json!("lots")), None);
        assert_eq!(major_amount(&Value::Null), None);
    }

    #[test]
    fn test_charge_completed_webhook() {
        let payload = json!({
            "event": "charge.completed",
            "data": {
                "id": 285959875,
                "tx_ref": "pay-1",
                "status": "successful",
                "amount": 82000,
                "currency": "NGN"
            }
        })
        .to_string();

        let event = gateway()
            .normalize_webhook(Some("my-hash"), payload.as_bytes())
            .unwrap()
            .unwrap();

        assert_eq!(event.outcome, Outcome::Success);
        assert_eq!(event.amount, Some(dec!(82000)));
        assert_eq!(
            event.provider_event_id.as_deref(),
            Some("charge.completed:285959875:successful")
        );
        assert_eq!(event.gateway_transaction_id.as_deref(), Some("285959875"));
    }

    #[test]
    fn test_sub_minor_amount_is_reported_verbatim() {
        let payload = json!({
            "event": "charge.completed",
            "data": {
                "id": 285959876,
                "tx_ref": "pay-1",
                "status": "successful",
                "amount": "8200.005",
                "currency": "NGN"
            }
        })
        .to_string();

        let event = gateway()
            .normalize_webhook(Some("my-hash"), payload.as_bytes())
            .unwrap()
            .unwrap();

        assert_eq!(event.amount, Some(dec!(8200.005)));
        assert_eq!(event.currency, Some(Currency::Ngn));
    }

    #[test]
    fn test_wrong_hash_rejected() {
        let result = gateway().normalize_webhook(Some("other"), b"{}");
        assert!(matches!(result, Err(PaymentError::SignatureError(_))));
    }

    #[test]
    fn test_other_events_ignored() {
        let payload = br#"{"event":"transfer.completed","data":{"id":1}}"#;
        assert!(gateway()
            .normalize_webhook(Some("my-hash"), payload)
            .unwrap()
            .is_none());
    }
}
