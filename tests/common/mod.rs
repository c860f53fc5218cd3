#![allow(dead_code)]

use async_trait::async_trait;
use repairpay::application::{InitializeRequest, PaymentOrchestrator};
use repairpay::domain::event::{NormalizedEvent, Outcome};
use repairpay::domain::money::Currency;
use repairpay::domain::payment::{Metadata, Payment, Provider};
use repairpay::domain::ports::PaymentNotice;
use repairpay::error::{PaymentError, Result};
use repairpay::gateways::{CheckoutContext, GatewayAdapter, GatewayRegistry, Initialization, RefundRequest};
use repairpay::infrastructure::in_memory::InMemoryLedger;
use repairpay::infrastructure::notifier::ChannelNotifier;
use rust_decimal::Decimal;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

pub const VALID_SIGNATURE: &str = "valid";

#[derive(Debug, Default)]
struct Script {
    verify_outcome: Option<(Outcome, Option<(Decimal, Currency)>)>,
    verify_delay: Option<Duration>,
    fail_initialize: bool,
    fail_refund: bool,
    refund_delay: Option<Duration>,
    verify_calls: usize,
    initialize_calls: usize,
    refund_calls: Vec<RefundRequest>,
}

/// A gateway whose answers are set by the test.
///
/// Webhook payloads are plain JSON: `{"id", "reference", "outcome", "amount", "currency"}` for
/// charges or `{"id", "refund", "outcome"}` for refunds, accepted only with the
/// signature `"valid"`.
pub struct ScriptedGateway {
    provider: Provider,
    script: Mutex<Script>,
}

impl ScriptedGateway {
    pub fn new(provider: Provider) -> Arc<Self> {
        Arc::new(Self {
            provider,
            script: Mutex::new(Script::default()),
        })
    }

    pub fn verify_reports(&self, outcome: Outcome, amount: Option<(Decimal, Currency)>) {
        self.script.lock().unwrap().verify_outcome = Some((outcome, amount));
    }

    pub fn delay_verify(&self, delay: Duration) {
        self.script.lock().unwrap().verify_delay = Some(delay);
    }

    pub fn fail_initialize(&self, fail: bool) {
        self.script.lock().unwrap().fail_initialize = fail;
    }

    pub fn fail_refund(&self, fail: bool) {
        self.script.lock().unwrap().fail_refund = fail;
    }

    pub fn delay_refund(&self, delay: Duration) {
        self.script.lock().unwrap().refund_delay = Some(delay);
    }

    pub fn verify_calls(&self) -> usize {
        self.script.lock().unwrap().verify_calls
    }

    pub fn initialize_calls(&self) -> usize {
        self.script.lock().unwrap().initialize_calls
    }

    pub fn refund_calls(&self) -> Vec<RefundRequest> {
        self.script.lock().unwrap().refund_calls.clone()
    }

    pub fn reference_for(&self, payment_id: &str) -> String {
        format!("{}-{}", self.provider, payment_id)
    }
}

#[async_trait]
impl GatewayAdapter for ScriptedGateway {
    fn provider(&self) -> Provider {
        self.provider
    }

    fn supports_currency(&self, currency: Currency) -> bool {
        currency != Currency::Jpy
    }

    fn signature_header(&self) -> &'static str {
        "x-test-signature"
    }

    async fn initialize(&self, payment: &Payment, _ctx: &CheckoutContext) -> Result<Initialization> {
        let fail = {
            let mut script = self.script.lock().unwrap();
            script.initialize_calls += 1;
            script.fail_initialize
        };
        if fail {
            return Err(PaymentError::ExternalServiceError("gateway timed out".to_string()));
        }
        Ok(Initialization {
            redirect_url: format!("https://pay.test/checkout/{}", payment.id),
            provider_reference: self.reference_for(&payment.id),
            access_code: Some("access".to_string()),
        })
    }

    async fn verify(&self, provider_reference: &str) -> Result<NormalizedEvent> {
        let (scripted, delay) = {
            let mut script = self.script.lock().unwrap();
            script.verify_calls += 1;
            (script.verify_outcome, script.verify_delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let Some((outcome, amount)) = scripted else {
            return Ok(NormalizedEvent::unknown(self.provider, provider_reference));
        };
        let mut event = NormalizedEvent::payment(self.provider, provider_reference, outcome)
            .with_raw(json!({ "source": "verify" }));
        if let Some((amount, currency)) = amount {
            event = event.with_amount(amount, Some(currency));
        }
        event.gateway_transaction_id = Some("txn-1".to_string());
        Ok(event)
    }

    fn normalize_webhook(
        &self,
        signature: Option<&str>,
        payload: &[u8],
    ) -> Result<Option<NormalizedEvent>> {
        if signature != Some(VALID_SIGNATURE) {
            return Err(PaymentError::SignatureError("bad test signature".to_string()));
        }
        let body: Value = serde_json::from_slice(payload)?;
        let outcome = match body["outcome"].as_str() {
            Some("success") => Outcome::Success,
            Some("failure") => Outcome::Failure,
            Some("unknown") => Outcome::Unknown,
            _ => return Ok(None),
        };

        let mut event = if let Some(refund_id) = body["refund"].as_str() {
            NormalizedEvent::refund(self.provider, refund_id, outcome)
        } else {
            let reference = body["reference"].as_str().unwrap_or_default();
            let mut event = NormalizedEvent::payment(self.provider, reference, outcome);
            if let Some(amount) = body["amount"].as_str() {
                let currency = body["currency"].as_str().map(|c| c.parse().unwrap());
                event = event.with_amount(amount.parse().unwrap(), currency);
            }
            event
        };
        if let Some(id) = body["id"].as_str() {
            event = event.with_event_id(id);
        }
        Ok(Some(event.with_raw(body)))
    }

    async fn refund(&self, request: &RefundRequest) -> Result<String> {
        let delay = self.script.lock().unwrap().refund_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut script = self.script.lock().unwrap();
        if script.fail_refund {
            return Err(PaymentError::ExternalServiceError("refund rejected".to_string()));
        }
        script.refund_calls.push(request.clone());
        Ok(format!("rf_{}", script.refund_calls.len()))
    }
}

pub struct Harness {
    pub orchestrator: Arc<PaymentOrchestrator>,
    pub ledger: InMemoryLedger,
    pub gateway: Arc<ScriptedGateway>,
    pub notices: UnboundedReceiver<PaymentNotice>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_gateways(ScriptedGateway::new(Provider::Paystack), &[])
    }

    /// `gateway` is the primary one; `extra` are registered alongside it.
    pub fn with_gateways(gateway: Arc<ScriptedGateway>, extra: &[Arc<ScriptedGateway>]) -> Self {
        let ledger = InMemoryLedger::new();
        let mut registry = GatewayRegistry::new().register(gateway.clone());
        for other in extra {
            registry = registry.register(other.clone());
        }
        let (notifier, notices) = ChannelNotifier::new();
        let orchestrator = PaymentOrchestrator::new(
            Box::new(ledger.clone()),
            registry,
            Box::new(notifier),
        );
        Self {
            orchestrator: Arc::new(orchestrator),
            ledger,
            gateway,
            notices,
        }
    }

    pub fn drain_notices(&mut self) -> Vec<PaymentNotice> {
        let mut notices = Vec::new();
        while let Ok(notice) = self.notices.try_recv() {
            notices.push(notice);
        }
        notices
    }
}

pub fn initialize_request(owner: &str, amount: Decimal, order: Option<&str>) -> InitializeRequest {
    InitializeRequest {
        owner_id: owner.to_string(),
        amount,
        currency: Currency::Ngn,
        provider: Provider::Paystack,
        order_ref: order.map(str::to_string),
        existing_payment_id: None,
        customer_email: Some("customer@example.com".to_string()),
        callback_url: None,
        description: Some("Screen replacement".to_string()),
        metadata: Metadata::new(),
    }
}

pub fn charge_webhook(event_id: Option<&str>, reference: &str, outcome: &str, amount: &str) -> Vec<u8> {
    let mut body = json!({
        "reference": reference,
        "outcome": outcome,
        "amount": amount,
        "currency": "NGN"
    });
    if let Some(id) = event_id {
        body["id"] = json!(id);
    }
    body.to_string().into_bytes()
}

pub fn refund_webhook(event_id: &str, refund_id: &str, outcome: &str) -> Vec<u8> {
    json!({ "id": event_id, "refund": refund_id, "outcome": outcome })
        .to_string()
        .into_bytes()
}
