use crate::error::PaymentError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl PaymentError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            PaymentError::NotFound(_) => StatusCode::NOT_FOUND,
            PaymentError::AuthorizationError(_) => StatusCode::FORBIDDEN,
            PaymentError::PaymentStateError(_) => StatusCode::CONFLICT,
            PaymentError::ValidationError(_) => StatusCode::UNPROCESSABLE_ENTITY,
            PaymentError::ExternalServiceError(_) => StatusCode::BAD_GATEWAY,
            PaymentError::SignatureError(_) => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for PaymentError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let (error, details) = match &self {
            PaymentError::NotFound(msg) => ("Not found", Some(msg.clone())),
            PaymentError::AuthorizationError(msg) => ("Forbidden", Some(msg.clone())),
            PaymentError::PaymentStateError(msg) => ("Invalid payment state", Some(msg.clone())),
            PaymentError::ValidationError(msg) => ("Validation failed", Some(msg.clone())),
            PaymentError::ExternalServiceError(msg) => {
                tracing::warn!("Gateway error: {}", msg);
                ("Payment gateway error", Some(msg.clone()))
            }
            PaymentError::SignatureError(_) => ("Invalid signature", None),
            other => {
                tracing::error!("Internal error: {}", other);
                ("Internal server error", None)
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            kind: self.kind(),
            details,
        };
        (status, Json(body)).into_response()
    }
}
