use super::http::{build_client, ensure_success, parse, send};
use super::signature::{hex_digest_matches, hmac_sha256_hex};
use super::{CheckoutContext, GatewayAdapter, Initialization, RefundRequest};
use crate::domain::event::{NormalizedEvent, Outcome};
use crate::domain::money::{Currency, from_minor_units, to_minor_units};
use crate::domain::payment::{Payment, Provider};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.stripe.com";
pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Maximum age of a signed webhook before it is treated as a replay.
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub base_url: String,
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Deserialize)]
struct CheckoutSession {
    id: String,
    url: Option<String>,
    status: Option<String>,
    payment_status: Option<String>,
    amount_total: Option<i64>,
    currency: Option<String>,
    payment_intent: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct StripeEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: EventData,
}

#[derive(Debug, Deserialize)]
struct EventData {
    object: Value,
}

#[derive(Debug, Deserialize)]
struct StripeRefund {
    id: String,
    status: Option<String>,
}

/// Stripe Checkout: form-encoded API, amounts in minor units (zero-decimal for JPY),
/// `t=...,v1=...` HMAC-SHA256 webhook signatures over `"{t}.{body}"`.
#[derive(Debug, Clone)]
pub struct StripeGateway {
    client: Client,
    config: StripeConfig,
}

impl StripeGateway {
    pub fn new(config: StripeConfig, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            config,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn session_event(session: CheckoutSession, raw: Value) -> NormalizedEvent {
        let outcome = match (session.status.as_deref(), session.payment_status.as_deref()) {
            (_, Some("paid")) | (_, Some("no_payment_required")) => Outcome::Success,
            (Some("expired"), _) => Outcome::Failure,
            _ => Outcome::Unknown,
        };
        let mut event =
            NormalizedEvent::payment(Provider::Stripe, session.id, outcome).with_raw(raw);
        if let (Some(total), Some(currency)) = (
            session.amount_total,
            session.currency.and_then(|c| c.parse::<Currency>().ok()),
        ) {
            event = event.with_amount(from_minor_units(total, currency), Some(currency));
        }
        event.gateway_transaction_id = session.payment_intent.as_ref().and_then(intent_id);
        event
    }

    async fn retrieve_session(&self, session_id: &str) -> Result<Option<(CheckoutSession, Value)>> {
        let request = self
            .client
            .get(self.url(&format!("/v1/checkout/sessions/{}", session_id)))
            .bearer_auth(&self.config.secret_key);
        let (status, body) = send(Provider::Stripe, request).await?;
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        ensure_success(Provider::Stripe, status, &body)?;
        let raw = body.clone();
        Ok(Some((parse::<CheckoutSession>(Provider::Stripe, body)?, raw)))
    }

    /// Checks a `Stripe-Signature` header: `t=<unix>,v1=<hex>[,v1=<hex>...]`.
    fn verify_signature(&self, header: &str, payload: &[u8]) -> Result<()> {
        let mut timestamp = None;
        let mut candidates = Vec::new();
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
                Some(("v1", value)) => candidates.push(value),
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or_else(|| {
            PaymentError::SignatureError("Stripe signature missing timestamp".to_string())
        })?;
        if (Utc::now().timestamp() - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
            return Err(PaymentError::SignatureError(
                "Stripe signature timestamp outside tolerance".to_string(),
            ));
        }

        let mut signed = timestamp.to_string().into_bytes();
        signed.push(b'.');
        signed.extend_from_slice(payload);
        let expected = hmac_sha256_hex(self.config.webhook_secret.as_bytes(), &signed)?;

        if candidates.iter().any(|c| hex_digest_matches(&expected, c)) {
            Ok(())
        } else {
            Err(PaymentError::SignatureError(
                "Stripe signature mismatch".to_string(),
            ))
        }
    }
}

/// `payment_intent` is either an id or an expanded object.
fn intent_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map.get("id").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

fn invalid_payload(e: serde_json::Error) -> PaymentError {
    PaymentError::ValidationError(format!("Invalid Stripe payload: {}", e))
}

#[async_trait]
impl GatewayAdapter for StripeGateway {
    fn provider(&self) -> Provider {
        Provider::Stripe
    }

    fn supports_currency(&self, _currency: Currency) -> bool {
        true
    }

    fn signature_header(&self) -> &'static str {
        SIGNATURE_HEADER
    }

    async fn initialize(
        &self,
        payment: &Payment,
        ctx: &CheckoutContext,
    ) -> Result<Initialization> {
        let unit_amount = to_minor_units(payment.amount, payment.currency)?;
        let success_url = ctx
            .callback_url
            .clone()
            .unwrap_or_else(|| self.config.success_url.clone());
        let product_name = ctx
            .description
            .clone()
            .unwrap_or_else(|| "Device repair".to_string());

        let mut form: Vec<(String, String)> = vec![
            ("mode".into(), "payment".into()),
            ("client_reference_id".into(), payment.id.clone()),
            ("success_url".into(), success_url),
            ("cancel_url".into(), self.config.cancel_url.clone()),
            ("line_items[0][quantity]".into(), "1".into()),
            (
                "line_items[0][price_data][currency]".into(),
                payment.currency.code().to_lowercase(),
            ),
            (
                "line_items[0][price_data][unit_amount]".into(),
                unit_amount.to_string(),
            ),
            (
                "line_items[0][price_data][product_data][name]".into(),
                product_name,
            ),
            ("metadata[payment_id]".into(), payment.id.clone()),
            ("metadata[owner_id]".into(), payment.owner_id.clone()),
            (
                "payment_intent_data[metadata][payment_id]".into(),
                payment.id.clone(),
            ),
        ];
        if let Some(order_id) = &payment.order_id {
            form.push(("metadata[order_id]".into(), order_id.clone()));
        }
        if let Some(email) = &ctx.customer_email {
            form.push(("customer_email".into(), email.clone()));
        }

        let request = self
            .client
            .post(self.url("/v1/checkout/sessions"))
            .bearer_auth(&self.config.secret_key)
            .header("Idempotency-Key", payment.id.as_str())
            .form(&form);
        let (status, body) = send(Provider::Stripe, request).await?;
        ensure_success(Provider::Stripe, status, &body)?;

        let session = parse::<CheckoutSession>(Provider::Stripe, body)?;
        let redirect_url = session.url.ok_or_else(|| {
            PaymentError::ExternalServiceError("stripe session has no checkout url".to_string())
        })?;
        Ok(Initialization {
            redirect_url,
            provider_reference: session.id,
            access_code: None,
        })
    }

    async fn verify(&self, provider_reference: &str) -> Result<NormalizedEvent> {
        match self.retrieve_session(provider_reference).await? {
            Some((session, raw)) => Ok(Self::session_event(session, raw)),
            None => {
                tracing::info!(reference = provider_reference, "Stripe has no record of session");
                Ok(NormalizedEvent::unknown(Provider::Stripe, provider_reference))
            }
        }
    }

    fn normalize_webhook(
        &self,
        signature: Option<&str>,
        payload: &[u8],
    ) -> Result<Option<NormalizedEvent>> {
        let header = signature.ok_or_else(|| {
            PaymentError::SignatureError(format!("Missing {} header", SIGNATURE_HEADER))
        })?;
        self.verify_signature(header, payload)?;

        let raw: Value = serde_json::from_slice(payload).map_err(invalid_payload)?;
        let event: StripeEvent = serde_json::from_value(raw.clone()).map_err(invalid_payload)?;

        match event.event_type.as_str() {
            "checkout.session.completed"
            | "checkout.session.async_payment_succeeded"
            | "checkout.session.async_payment_failed"
            | "checkout.session.expired" => {
                let session: CheckoutSession =
                    serde_json::from_value(event.data.object).map_err(invalid_payload)?;
                let mut normalized = Self::session_event(session, raw);
                normalized.outcome = match event.event_type.as_str() {
                    "checkout.session.async_payment_succeeded" => Outcome::Success,
                    "checkout.session.async_payment_failed" | "checkout.session.expired" => {
                        Outcome::Failure
                    }
                    // completed but unpaid: a delayed method is still settling
                    _ if normalized.outcome != Outcome::Success => return Ok(None),
                    _ => Outcome::Success,
                };
                Ok(Some(normalized.with_event_id(event.id)))
            }
            "refund.updated" | "charge.refund.updated" => {
                let refund: StripeRefund =
                    serde_json::from_value(event.data.object).map_err(invalid_payload)?;
                let outcome = match refund.status.as_deref() {
                    Some("succeeded") => Outcome::Success,
                    Some("failed") | Some("canceled") => Outcome::Failure,
                    _ => return Ok(None),
                };
                Ok(Some(
                    NormalizedEvent::refund(Provider::Stripe, refund.id, outcome)
                        .with_event_id(event.id)
                        .with_raw(raw),
                ))
            }
            _ => Ok(None),
        }
    }

    async fn refund(&self, request: &RefundRequest) -> Result<String> {
        let payment_intent = match &request.gateway_transaction_id {
            Some(id) => id.clone(),
            None => self
                .retrieve_session(&request.provider_reference)
                .await?
                .and_then(|(session, _)| session.payment_intent.as_ref().and_then(intent_id))
                .ok_or_else(|| {
                    PaymentError::NotFound(format!(
                        "Stripe payment intent for {}",
                        request.provider_reference
                    ))
                })?,
        };

        let form = [
            ("payment_intent", payment_intent),
            ("amount", request.amount_minor.to_string()),
            ("metadata[reason]", request.reason.clone()),
        ];
        let http_request = self
            .client
            .post(self.url("/v1/refunds"))
            .bearer_auth(&self.config.secret_key)
            .form(&form);
        let (status, body) = send(Provider::Stripe, http_request).await?;
        ensure_success(Provider::Stripe, status, &body)?;

        Ok(parse::<StripeRefund>(Provider::Stripe, body)?.id)
    }
}
