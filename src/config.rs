use crate::error::Result;
use crate::gateways::{
    FlutterwaveConfig, FlutterwaveGateway, GatewayRegistry, PaystackConfig, PaystackGateway,
    StripeConfig, StripeGateway, flutterwave, paystack, stripe,
};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: Option<PathBuf>,
    pub gateway_timeout: Duration,
    /// Where gateways send the payer back after checkout, unless a request overrides it.
    pub callback_url: Option<String>,
    pub paystack: Option<PaystackConfig>,
    pub flutterwave: Option<FlutterwaveConfig>,
    pub stripe: Option<StripeConfig>,
}

impl Config {
    /// Reads the process environment, after loading `.env` if one exists.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key lookup. A provider is only enabled
    /// when all of its secrets are present.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let host = var("HOST").unwrap_or_else(|| "127.0.0.1".to_string());
        let port = var("PORT").and_then(|p| p.parse().ok()).unwrap_or(3000);
        let timeout_secs = var("GATEWAY_TIMEOUT_SECS")
            .and_then(|t| t.parse().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let paystack = var("PAYSTACK_SECRET_KEY").map(|secret_key| PaystackConfig {
            secret_key,
            base_url: var("PAYSTACK_BASE_URL")
                .unwrap_or_else(|| paystack::DEFAULT_BASE_URL.to_string()),
        });

        let flutterwave = match (var("FLUTTERWAVE_SECRET_KEY"), var("FLUTTERWAVE_SECRET_HASH")) {
            (Some(secret_key), Some(secret_hash)) => Some(FlutterwaveConfig {
                secret_key,
                secret_hash,
                base_url: var("FLUTTERWAVE_BASE_URL")
                    .unwrap_or_else(|| flutterwave::DEFAULT_BASE_URL.to_string()),
            }),
            (Some(_), None) => {
                tracing::warn!("FLUTTERWAVE_SECRET_HASH missing; Flutterwave disabled");
                None
            }
            _ => None,
        };

        let callback_url = var("PAYMENT_CALLBACK_URL");
        let stripe = match (var("STRIPE_SECRET_KEY"), var("STRIPE_WEBHOOK_SECRET")) {
            (Some(secret_key), Some(webhook_secret)) => {
                let success_url = var("STRIPE_SUCCESS_URL")
                    .or_else(|| callback_url.clone())
                    .unwrap_or_else(|| format!("http://{}:{}/payments/complete", host, port));
                let cancel_url = var("STRIPE_CANCEL_URL").unwrap_or_else(|| success_url.clone());
                Some(StripeConfig {
                    secret_key,
                    webhook_secret,
                    base_url: var("STRIPE_BASE_URL")
                        .unwrap_or_else(|| stripe::DEFAULT_BASE_URL.to_string()),
                    success_url,
                    cancel_url,
                })
            }
            (Some(_), None) => {
                tracing::warn!("STRIPE_WEBHOOK_SECRET missing; Stripe disabled");
                None
            }
            _ => None,
        };

        Self {
            db_path: var("REPAIRPAY_DB_PATH").map(PathBuf::from),
            gateway_timeout: Duration::from_secs(timeout_secs),
            callback_url,
            paystack,
            flutterwave,
            stripe,
            host,
            port,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Instantiates an adapter for every configured provider.
    pub fn gateway_registry(&self) -> Result<GatewayRegistry> {
        let mut registry = GatewayRegistry::new();
        if let Some(config) = &self.paystack {
            registry = registry.register(Arc::new(PaystackGateway::new(
                config.clone(),
                self.gateway_timeout,
            )?));
        }
        if let Some(config) = &self.flutterwave {
            registry = registry.register(Arc::new(FlutterwaveGateway::new(
                config.clone(),
                self.gateway_timeout,
            )?));
        }
        if let Some(config) = &self.stripe {
            registry = registry.register(Arc::new(StripeGateway::new(
                config.clone(),
                self.gateway_timeout,
            )?));
        }
        Ok(registry)
    }
}
