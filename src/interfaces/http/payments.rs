use super::AppState;
use crate::application::{InitializeRequest, InitializeResponse, PaymentDetails, RefundCommand};
use crate::domain::money::Currency;
use crate::domain::payment::{Payment, PaymentStatus};
use crate::domain::refund::RefundStatus;
use crate::error::{PaymentError, Result};
use axum::{
    Json, Router,
    extract::{Path, State},
    http::HeaderMap,
    routing::{get, post},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Identity of the authenticated caller, set by the upstream auth layer.
pub const USER_HEADER: &str = "x-user-id";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/payments/initialize", post(initialize))
        .route("/payments/verify", post(verify))
        .route("/payments/refund", post(refund))
        .route("/payments/{id}", get(details))
}

#[derive(Debug, Deserialize)]
pub struct VerifyBody {
    pub reference: String,
}

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub status: PaymentStatus,
    pub amount: Decimal,
    pub currency: Currency,
    pub payment: Payment,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundBody {
    pub payment_id: String,
    #[serde(default)]
    pub amount: Option<Decimal>,
    pub reason: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundResponse {
    pub refund_id: String,
    pub amount: Decimal,
    pub status: RefundStatus,
}

/// The authenticated caller, when the fronting proxy supplied one.
fn caller(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
}

async fn initialize(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<InitializeRequest>,
) -> Result<Json<InitializeResponse>> {
    if let Some(user) = caller(&headers)
        && user != body.owner_id
    {
        return Err(PaymentError::AuthorizationError(format!(
            "{} does not match ownerId",
            USER_HEADER
        )));
    }
    let response = state.orchestrator.initialize_payment(body).await?;
    Ok(Json(response))
}

async fn verify(
    State(state): State<AppState>,
    Json(body): Json<VerifyBody>,
) -> Result<Json<VerifyResponse>> {
    let payment = state.orchestrator.verify_payment(&body.reference).await?;
    Ok(Json(VerifyResponse {
        status: payment.status,
        amount: payment.amount,
        currency: payment.currency,
        payment,
    }))
}

async fn refund(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<RefundBody>,
) -> Result<Json<RefundResponse>> {
    let requested_by = caller(&headers)
        .ok_or_else(|| {
            PaymentError::AuthorizationError(format!("Missing {} header", USER_HEADER))
        })?
        .to_string();

    let refund = state
        .orchestrator
        .initiate_refund(RefundCommand {
            payment_id: body.payment_id,
            amount: body.amount,
            reason: body.reason,
            requested_by,
        })
        .await?;

    Ok(Json(RefundResponse {
        refund_id: refund.id,
        amount: refund.amount,
        status: refund.status,
    }))
}

async fn details(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PaymentDetails>> {
    Ok(Json(state.orchestrator.payment_details(&id).await?))
}
