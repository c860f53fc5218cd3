use super::MAX_COMMIT_ATTEMPTS;
use super::reconcile::Reconciled;
use crate::domain::event::{EventKind, EventSubject, PaymentEvent};
use crate::domain::money::{Amount, Currency, to_minor_units};
use crate::domain::order::{OrderMirror, OrderPaymentStatus, OrderRecord};
use crate::domain::payment::{Metadata, Payment, PaymentStatus, Provider};
use crate::domain::ports::{
    CommitOutcome, Conflict, LedgerCommit, LedgerStoreBox, NotifierBox, VersionedWrite,
};
use crate::domain::refund::{Refund, committed_total};
use crate::error::{PaymentError, Result};
use crate::gateways::{CheckoutContext, GatewayRegistry, Initialization};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// A caller's request to open (or re-open) a checkout.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeRequest {
    pub owner_id: String,
    pub amount: Decimal,
    pub currency: Currency,
    pub provider: Provider,
    #[serde(default)]
    pub order_ref: Option<String>,
    /// Retry a PENDING payment, possibly against a different provider.
    #[serde(default)]
    pub existing_payment_id: Option<String>,
    #[serde(default)]
    pub customer_email: Option<String>,
    #[serde(default)]
    pub callback_url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResponse {
    pub payment_id: String,
    pub provider_reference: String,
    pub redirect_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_code: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RefundCommand {
    pub payment_id: String,
    /// `None` refunds whatever is still outstanding.
    pub amount: Option<Decimal>,
    pub reason: String,
    pub requested_by: String,
}

/// What a webhook delivery amounted to. Every variant is acknowledged to the provider.
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookDisposition {
    Applied(Payment),
    RefundSettled(Refund),
    /// The adapter recognized the payload but the core does not act on it.
    Ignored,
    UnknownReference,
    ProviderMismatch,
    Duplicate,
    AlreadyTerminal,
}

impl WebhookDisposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookDisposition::Applied(_) => "applied",
            WebhookDisposition::RefundSettled(_) => "refund_settled",
            WebhookDisposition::Ignored => "ignored",
            WebhookDisposition::UnknownReference => "unknown_reference",
            WebhookDisposition::ProviderMismatch => "provider_mismatch",
            WebhookDisposition::Duplicate => "duplicate",
            WebhookDisposition::AlreadyTerminal => "already_terminal",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentDetails {
    pub payment: Payment,
    pub refunds: Vec<Refund>,
    pub events: Vec<PaymentEvent>,
    pub refundable_balance: Decimal,
}

/// A payment with the total of its non-failed refunds, as exported.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentSummary {
    pub payment: Payment,
    pub refunded: Decimal,
}

/// The payment state machine.
///
/// Constructed once at startup with its collaborators and shared by reference
/// between request handlers.
pub struct PaymentOrchestrator {
    pub(super) ledger: LedgerStoreBox,
    pub(super) gateways: GatewayRegistry,
    pub(super) notifier: NotifierBox,
}

impl PaymentOrchestrator {
    pub fn new(ledger: LedgerStoreBox, gateways: GatewayRegistry, notifier: NotifierBox) -> Self {
        Self {
            ledger,
            gateways,
            notifier,
        }
    }

    pub fn gateways(&self) -> &GatewayRegistry {
        &self.gateways
    }

    /// Creates (or reuses) a PENDING payment and opens a checkout with the provider.
    ///
    /// The payment row is written before the gateway is called, so a gateway failure
    /// leaves a PENDING payment that the caller may retry via `existing_payment_id`.
    pub async fn initialize_payment(&self, request: InitializeRequest) -> Result<InitializeResponse> {
        let adapter = self.gateways.get(request.provider)?.clone();
        let check_currency = |currency: Currency| {
            if adapter.supports_currency(currency) {
                Ok(())
            } else {
                Err(PaymentError::ValidationError(format!(
                    "{} does not support {}",
                    request.provider, currency
                )))
            }
        };

        let payment = match &request.existing_payment_id {
            Some(payment_id) => {
                let payment = self.reusable_payment(payment_id, &request.owner_id).await?;
                check_currency(payment.currency)?;
                payment
            }
            None => {
                check_currency(request.currency)?;
                self.create_payment(&request).await?
            }
        };

        let ctx = CheckoutContext {
            customer_email: request.customer_email.clone(),
            callback_url: request.callback_url.clone(),
            description: request.description.clone(),
            metadata: payment.metadata.clone(),
        };
        let mut outbound = payment.clone();
        outbound.provider = request.provider;

        let init = adapter.initialize(&outbound, &ctx).await.inspect_err(|e| {
            tracing::warn!(payment_id = %payment.id, provider = %request.provider, error = %e, "Gateway initialization failed");
        })?;

        let payment = self
            .record_initialization(payment, request.provider, &init)
            .await?;
        tracing::info!(
            payment_id = %payment.id,
            provider = %payment.provider,
            reference = %init.provider_reference,
            "Payment initialized"
        );

        Ok(InitializeResponse {
            payment_id: payment.id,
            provider_reference: init.provider_reference,
            redirect_url: init.redirect_url,
            access_code: init.access_code,
        })
    }

    async fn reusable_payment(&self, payment_id: &str, owner_id: &str) -> Result<Payment> {
        let payment = self.load_payment(payment_id).await?;
        if payment.owner_id != owner_id {
            return Err(PaymentError::AuthorizationError(format!(
                "Payment {} belongs to another user",
                payment_id
            )));
        }
        if payment.status != PaymentStatus::Pending {
            return Err(PaymentError::PaymentStateError(
                "already processed".to_string(),
            ));
        }
        Ok(payment)
    }

    async fn create_payment(&self, request: &InitializeRequest) -> Result<Payment> {
        let amount = Amount::new(request.amount)?;
        to_minor_units(amount.value(), request.currency)?;

        let mut metadata = request.metadata.clone();
        if let Some(order_id) = &request.order_ref {
            self.check_order(order_id, &request.owner_id).await?;
            metadata.insert("orderId".to_string(), json!(order_id));
        }

        let payment = Payment::new(
            request.owner_id.clone(),
            request.order_ref.clone(),
            amount.value(),
            request.currency,
            request.provider,
            metadata,
        );
        match self
            .ledger
            .commit(LedgerCommit::new().with_payment(VersionedWrite::insert(payment)))
            .await?
        {
            CommitOutcome::Applied {
                payment: Some(payment),
                ..
            } => Ok(payment),
            _ => Err(PaymentError::internal("Generated payment id already exists")),
        }
    }

    async fn check_order(&self, order_id: &str, owner_id: &str) -> Result<()> {
        let order = self
            .ledger
            .get_order(order_id)
            .await?
            .ok_or_else(|| PaymentError::NotFound(format!("Order {}", order_id)))?;
        if order.owner_id != owner_id {
            return Err(PaymentError::AuthorizationError(format!(
                "Order {} belongs to another user",
                order_id
            )));
        }
        if order.payment_status != OrderPaymentStatus::Unpaid {
            return Err(PaymentError::PaymentStateError(format!(
                "Order {} is already paid",
                order_id
            )));
        }
        Ok(())
    }

    async fn record_initialization(
        &self,
        payment: Payment,
        provider: Provider,
        init: &Initialization,
    ) -> Result<Payment> {
        let mut current = payment;
        for _ in 0..MAX_COMMIT_ATTEMPTS {
            if current.is_terminal() {
                return Err(PaymentError::PaymentStateError(
                    "already processed".to_string(),
                ));
            }

            let mut next = current.clone();
            next.provider = provider;
            next.provider_reference = Some(init.provider_reference.clone());
            next.access_code = init.access_code.clone();
            next.updated_at = Utc::now();

            let event = PaymentEvent::new(
                &next.id,
                EventKind::Initialized,
                json!({
                    "provider": provider,
                    "reference": init.provider_reference,
                    "redirectUrl": init.redirect_url,
                }),
            );
            let mirror = next
                .order_id
                .as_deref()
                .map(|order_id| OrderMirror::reference_only(order_id, &init.provider_reference));
            let commit = LedgerCommit::new()
                .with_payment(VersionedWrite::update(next))
                .with_event(event)
                .with_order(mirror);

            match self.ledger.commit(commit).await? {
                CommitOutcome::Applied {
                    payment: Some(payment),
                    ..
                } => return Ok(payment),
                CommitOutcome::Rejected(Conflict::StaleVersion) => {
                    current = self.load_payment(&current.id).await?;
                }
                _ => return Err(PaymentError::internal("Unexpected ledger outcome")),
            }
        }
        Err(PaymentError::PaymentStateError(format!(
            "Payment {} is being modified concurrently",
            current.id
        )))
    }

    /// Pulls the provider's view of a payment and applies it.
    ///
    /// A payment that is already terminal is returned as stored without calling
    /// the gateway, so repeated verification has no further effect.
    pub async fn verify_payment(&self, reference: &str) -> Result<Payment> {
        let payment = self.find_by_reference(reference).await?.ok_or_else(|| {
            PaymentError::NotFound(format!("Payment with reference {}", reference))
        })?;
        if payment.is_terminal() {
            tracing::debug!(payment_id = %payment.id, status = payment.status.as_str(), "Verify on terminal payment");
            return Ok(payment);
        }

        let adapter = self.gateways.get(payment.provider)?;
        let event = adapter.verify(payment.reference()).await?;
        Ok(self
            .reconcile(payment, &event, EventKind::Verified, None)
            .await?
            .into_payment())
    }

    /// Authenticates, normalizes and applies a provider callback.
    ///
    /// Only a failed signature check is an error; everything else resolves to a
    /// disposition so the delivery can be acknowledged.
    pub async fn handle_webhook(
        &self,
        provider: Provider,
        signature: Option<&str>,
        payload: &[u8],
    ) -> Result<WebhookDisposition> {
        let adapter = self.gateways.get(provider)?;
        let Some(event) = adapter.normalize_webhook(signature, payload)? else {
            tracing::debug!(%provider, "Webhook ignored");
            return Ok(WebhookDisposition::Ignored);
        };

        let reference = match &event.subject {
            EventSubject::Refund { provider_refund_id } => {
                let provider_refund_id = provider_refund_id.clone();
                return self.settle_refund(provider, &provider_refund_id, event).await;
            }
            EventSubject::Payment { reference } => reference.clone(),
        };

        let Some(payment) = self.find_by_reference(&reference).await? else {
            tracing::info!(%provider, %reference, "Webhook for unknown reference");
            return Ok(WebhookDisposition::UnknownReference);
        };
        if payment.provider != provider {
            tracing::error!(
                payment_id = %payment.id,
                expected = %payment.provider,
                received = %provider,
                "Webhook provider does not own this payment"
            );
            return Ok(WebhookDisposition::ProviderMismatch);
        }

        let dedup_key = event.dedup_key();
        if self.ledger.event_exists(&dedup_key).await? {
            tracing::info!(payment_id = %payment.id, %dedup_key, "Duplicate webhook delivery");
            return Ok(WebhookDisposition::Duplicate);
        }
        if payment.is_terminal() {
            tracing::info!(payment_id = %payment.id, status = payment.status.as_str(), "Webhook for terminal payment");
            return Ok(WebhookDisposition::AlreadyTerminal);
        }

        match self
            .reconcile(payment, &event, EventKind::WebhookReceived, Some(dedup_key))
            .await?
        {
            Reconciled::Settled(payment) | Reconciled::Logged(payment) => {
                Ok(WebhookDisposition::Applied(payment))
            }
            Reconciled::Unchanged(_) => Ok(WebhookDisposition::AlreadyTerminal),
        }
    }

    pub async fn get_payment(&self, payment_id: &str) -> Result<Payment> {
        self.load_payment(payment_id).await
    }

    pub async fn payment_details(&self, payment_id: &str) -> Result<PaymentDetails> {
        let payment = self.load_payment(payment_id).await?;
        let refunds = self.ledger.refunds_for(payment_id).await?;
        let events = self.ledger.events_for(payment_id).await?;
        let refundable_balance = (payment.amount - committed_total(&refunds)).max(Decimal::ZERO);
        Ok(PaymentDetails {
            refundable_balance,
            payment,
            refunds,
            events,
        })
    }

    pub async fn payment_events(&self, payment_id: &str) -> Result<Vec<PaymentEvent>> {
        self.load_payment(payment_id).await?;
        self.ledger.events_for(payment_id).await
    }

    pub async fn payment_refunds(&self, payment_id: &str) -> Result<Vec<Refund>> {
        self.load_payment(payment_id).await?;
        self.ledger.refunds_for(payment_id).await
    }

    pub async fn payment_summaries(&self) -> Result<Vec<PaymentSummary>> {
        let payments = self.ledger.list_payments().await?;
        let mut summaries = Vec::with_capacity(payments.len());
        for payment in payments {
            let refunds = self.ledger.refunds_for(&payment.id).await?;
            summaries.push(PaymentSummary {
                refunded: committed_total(&refunds),
                payment,
            });
        }
        Ok(summaries)
    }

    pub async fn get_order(&self, order_id: &str) -> Result<OrderRecord> {
        self.ledger
            .get_order(order_id)
            .await?
            .ok_or_else(|| PaymentError::NotFound(format!("Order {}", order_id)))
    }

    /// Makes an order known to the ledger so payments can be linked to it.
    ///
    /// Registering an existing order for the same owner is a no-op.
    pub async fn register_order(&self, order_id: &str, owner_id: &str) -> Result<OrderRecord> {
        if let Some(existing) = self.ledger.get_order(order_id).await? {
            if existing.owner_id != owner_id {
                return Err(PaymentError::AuthorizationError(format!(
                    "Order {} belongs to another user",
                    order_id
                )));
            }
            return Ok(existing);
        }
        let order = OrderRecord::new(order_id.to_string(), owner_id.to_string());
        self.ledger.put_order(order.clone()).await?;
        Ok(order)
    }

    pub(super) async fn load_payment(&self, payment_id: &str) -> Result<Payment> {
        self.ledger
            .get_payment(payment_id)
            .await?
            .ok_or_else(|| PaymentError::NotFound(format!("Payment {}", payment_id)))
    }

    /// Resolves a provider reference, falling back to the payment id itself.
    async fn find_by_reference(&self, reference: &str) -> Result<Option<Payment>> {
        match self.ledger.find_payment_by_reference(reference).await? {
            Some(payment) => Ok(Some(payment)),
            None => self.ledger.get_payment(reference).await,
        }
    }
}
