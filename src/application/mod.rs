//! Application layer: the payment orchestrator.
//!
//! `PaymentOrchestrator` is the only component that mutates payment or refund
//! status. Every write goes through a versioned `LedgerCommit`, so concurrent
//! verify and webhook calls for the same payment settle it at most once.

pub mod orchestrator;
mod reconcile;
mod refunds;

pub use orchestrator::{
    InitializeRequest, InitializeResponse, PaymentDetails, PaymentOrchestrator, PaymentSummary,
    RefundCommand, WebhookDisposition,
};

/// How many times a conflicting commit is re-read and retried before giving up.
pub(crate) const MAX_COMMIT_ATTEMPTS: usize = 3;
