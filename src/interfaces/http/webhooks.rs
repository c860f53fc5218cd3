use super::AppState;
use crate::domain::payment::Provider;
use crate::error::PaymentError;
use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
};
use serde_json::json;

pub fn router() -> Router<AppState> {
    Router::new().route("/webhooks/{provider}", post(receive))
}

/// Acknowledges every delivery with 200 except a failed signature check, so a
/// processing bug never turns into a provider retry storm.
async fn receive(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Ok(provider) = provider.parse::<Provider>() else {
        return PaymentError::NotFound(format!("Webhook endpoint for {}", provider)).into_response();
    };
    let header = match state.orchestrator.gateways().get(provider) {
        Ok(adapter) => adapter.signature_header(),
        Err(_) => {
            return PaymentError::NotFound(format!("{} is not configured", provider))
                .into_response();
        }
    };
    let signature = headers.get(header).and_then(|v| v.to_str().ok());

    match state
        .orchestrator
        .handle_webhook(provider, signature, &body)
        .await
    {
        Ok(disposition) => {
            tracing::debug!(%provider, disposition = disposition.as_str(), "Webhook handled");
            ack(disposition.as_str())
        }
        Err(e @ PaymentError::SignatureError(_)) => {
            tracing::warn!(%provider, error = %e, "Webhook signature rejected");
            e.into_response()
        }
        Err(e) => {
            tracing::error!(%provider, error = %e, "Webhook processing failed; acknowledging anyway");
            ack("error")
        }
    }
}

fn ack(disposition: &str) -> Response {
    (
        StatusCode::OK,
        Json(json!({ "received": true, "disposition": disposition })),
    )
        .into_response()
}
