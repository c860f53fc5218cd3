use crate::domain::payment::Provider;
use crate::error::{PaymentError, Result};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;

pub(crate) fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| PaymentError::InternalError(Box::new(e)))
}

/// Sends a request and returns the status with the body parsed as JSON.
///
/// Transport failures and timeouts surface as `ExternalServiceError`; the caller
/// decides what a non-2xx status means.
pub(crate) async fn send(provider: Provider, request: RequestBuilder) -> Result<(StatusCode, Value)> {
    let response = request.send().await.map_err(|e| {
        PaymentError::ExternalServiceError(format!("{} request failed: {}", provider, e))
    })?;

    let status = response.status();
    let text = response.text().await.map_err(|e| {
        PaymentError::ExternalServiceError(format!("{} response unreadable: {}", provider, e))
    })?;

    let body = if text.trim().is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&text).unwrap_or(Value::String(text))
    };
    Ok((status, body))
}

pub(crate) fn ensure_success(provider: Provider, status: StatusCode, body: &Value) -> Result<()> {
    if status.is_success() {
        return Ok(());
    }
    Err(PaymentError::ExternalServiceError(format!(
        "{} returned {}: {}",
        provider,
        status,
        error_message(body)
    )))
}

pub(crate) fn parse<T: DeserializeOwned>(provider: Provider, body: Value) -> Result<T> {
    serde_json::from_value(body).map_err(|e| {
        PaymentError::ExternalServiceError(format!("Unexpected {} response: {}", provider, e))
    })
}

/// Best-effort human-readable message out of a gateway error body.
fn error_message(body: &Value) -> String {
    body.get("message")
        .or_else(|| body.get("error").and_then(|e| e.get("message")))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string())
}
