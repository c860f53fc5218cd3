use thiserror::Error;

#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Not authorized: {0}")]
    AuthorizationError(String),
    #[error("Invalid payment state: {0}")]
    PaymentStateError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("External service error: {0}")]
    ExternalServiceError(String),
    #[error("Webhook signature rejected: {0}")]
    SignatureError(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[cfg(feature = "storage-rocksdb")]
    #[error("Storage error: {0}")]
    Storage(#[from] rocksdb::Error),
    #[error("Internal error: {0}")]
    InternalError(Box<dyn std::error::Error + Send + Sync>),
}

impl PaymentError {
    /// Stable machine-readable kind, so callers never have to match on message text.
    pub fn kind(&self) -> &'static str {
        match self {
            PaymentError::NotFound(_) => "not_found",
            PaymentError::AuthorizationError(_) => "forbidden",
            PaymentError::PaymentStateError(_) => "invalid_state",
            PaymentError::ValidationError(_) => "validation",
            PaymentError::ExternalServiceError(_) => "gateway_failure",
            PaymentError::SignatureError(_) => "invalid_signature",
            PaymentError::Serialization(_) => "serialization",
            PaymentError::CsvError(_) | PaymentError::IoError(_) => "io",
            #[cfg(feature = "storage-rocksdb")]
            PaymentError::Storage(_) => "storage",
            PaymentError::InternalError(_) => "internal",
        }
    }

    /// Only gateway failures may be retried blindly; nothing they leave in the ledger blocks a second attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PaymentError::ExternalServiceError(_))
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        PaymentError::InternalError(Box::new(std::io::Error::other(message.into())))
    }
}

pub type Result<T> = std::result::Result<T, PaymentError>;
