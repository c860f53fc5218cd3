//! Gateway adapters: one per payment provider, all behind [`GatewayAdapter`].
//!
//! Adapters own every provider-specific detail (wire format, signing scheme,
//! minor-unit conventions). The orchestrator only ever sees [`NormalizedEvent`]s.

mod http;
pub mod flutterwave;
pub mod paystack;
pub mod signature;
pub mod stripe;

pub use flutterwave::{FlutterwaveConfig, FlutterwaveGateway};
pub use paystack::{PaystackConfig, PaystackGateway};
pub use stripe::{StripeConfig, StripeGateway};

use crate::domain::event::NormalizedEvent;
use crate::domain::money::Currency;
use crate::domain::payment::{Metadata, Payment, Provider};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Caller context an adapter may need to open a checkout.
#[derive(Debug, Clone, Default)]
pub struct CheckoutContext {
    pub customer_email: Option<String>,
    pub callback_url: Option<String>,
    pub description: Option<String>,
    pub metadata: Metadata,
}

/// What the gateway handed back for a newly opened checkout.
#[derive(Debug, Clone, PartialEq)]
pub struct Initialization {
    pub redirect_url: String,
    pub provider_reference: String,
    pub access_code: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RefundRequest {
    pub provider_reference: String,
    pub gateway_transaction_id: Option<String>,
    pub amount_minor: i64,
    pub currency: Currency,
    pub reason: String,
}

#[async_trait]
pub trait GatewayAdapter: Send + Sync {
    fn provider(&self) -> Provider;

    fn supports_currency(&self, currency: Currency) -> bool;

    /// Header carrying the webhook signature for this provider.
    fn signature_header(&self) -> &'static str;

    /// Opens a remote transaction. The payment id is always sent as the
    /// idempotency/reference key so retries never create a second remote charge.
    async fn initialize(&self, payment: &Payment, ctx: &CheckoutContext)
    -> Result<Initialization>;

    /// Pulls the current status. A reference the gateway does not know yields an
    /// `unknown` event, never an error and never success.
    async fn verify(&self, provider_reference: &str) -> Result<NormalizedEvent>;

    /// Authenticates and normalizes a webhook. `Ok(None)` means the event is not
    /// one the payment core acts on; `Err(SignatureError)` means authentication failed.
    fn normalize_webhook(
        &self,
        signature: Option<&str>,
        payload: &[u8],
    ) -> Result<Option<NormalizedEvent>>;

    /// Requests a refund and returns the gateway-assigned refund id.
    async fn refund(&self, request: &RefundRequest) -> Result<String>;
}

/// Lookup table from provider to adapter, built once at startup.
#[derive(Clone, Default)]
pub struct GatewayRegistry {
    adapters: HashMap<Provider, Arc<dyn GatewayAdapter>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, adapter: Arc<dyn GatewayAdapter>) -> Self {
        self.adapters.insert(adapter.provider(), adapter);
        self
    }

    pub fn get(&self, provider: Provider) -> Result<&Arc<dyn GatewayAdapter>> {
        self.adapters.get(&provider).ok_or_else(|| {
            PaymentError::ValidationError(format!("Payment provider {} is not configured", provider))
        })
    }

    pub fn providers(&self) -> Vec<Provider> {
        let mut providers: Vec<Provider> = self.adapters.keys().copied().collect();
        providers.sort_by_key(|p| p.as_str());
        providers
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}
