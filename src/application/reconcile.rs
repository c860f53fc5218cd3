use super::MAX_COMMIT_ATTEMPTS;
use super::orchestrator::{PaymentOrchestrator, WebhookDisposition};
use crate::domain::event::{EventKind, NormalizedEvent, Outcome, PaymentEvent};
use crate::domain::order::OrderMirror;
use crate::domain::payment::{Payment, PaymentStatus, Provider};
use crate::domain::ports::{
    CommitOutcome, Conflict, LedgerCommit, PaymentNotice, VersionedWrite,
};
use crate::domain::refund::{Refund, RefundStatus};
use crate::error::{PaymentError, Result};
use chrono::Utc;

/// Result of applying an event to a payment.
#[derive(Debug)]
pub(super) enum Reconciled {
    /// The payment reached a terminal status through this event.
    Settled(Payment),
    /// The outcome was not conclusive; only the event was logged.
    Logged(Payment),
    /// Another writer settled the payment first; nothing was written.
    Unchanged(Payment),
}

impl Reconciled {
    pub(super) fn into_payment(self) -> Payment {
        match self {
            Reconciled::Settled(p) | Reconciled::Logged(p) | Reconciled::Unchanged(p) => p,
        }
    }
}

impl PaymentOrchestrator {
    /// Applies a normalized event to a payment.
    ///
    /// The status change, the event row and the order mirror are one ledger commit
    /// guarded by the payment's version. A writer that loses the race re-reads the
    /// payment and stops once it sees a terminal status.
    pub(super) async fn reconcile(
        &self,
        payment: Payment,
        event: &NormalizedEvent,
        kind: EventKind,
        dedup_key: Option<String>,
    ) -> Result<Reconciled> {
        let payload = serde_json::to_value(event)?;
        let mut current = payment;

        for attempt in 1..=MAX_COMMIT_ATTEMPTS {
            if current.is_terminal() {
                return Ok(Reconciled::Unchanged(current));
            }

            let outcome = effective_outcome(&current, event);
            let log = PaymentEvent::new(&current.id, kind, payload.clone())
                .with_outcome(outcome)
                .with_dedup_key(dedup_key.clone());

            let commit = match target_status(outcome) {
                None => LedgerCommit::new().with_event(log),
                Some(status) if !current.status.can_transition_to(status) => {
                    return Ok(Reconciled::Unchanged(current));
                }
                Some(status) => {
                    let now = Utc::now();
                    let mut next = current.clone();
                    next.status = status;
                    next.webhook_verified = true;
                    next.verified_at = Some(now);
                    next.updated_at = now;
                    if let Some(code) = &event.authorization_code {
                        next.authorization_code = Some(code.clone());
                    }
                    if let Some(id) = &event.gateway_transaction_id {
                        next.gateway_transaction_id = Some(id.clone());
                    }
                    let mirror = next.order_id.as_deref().and_then(|order_id| {
                        OrderMirror::for_status(order_id, status, next.reference())
                    });
                    LedgerCommit::new()
                        .with_payment(VersionedWrite::update(next))
                        .with_event(log)
                        .with_order(mirror)
                }
            };

            match self.ledger.commit(commit).await? {
                CommitOutcome::Applied {
                    payment: Some(updated),
                    ..
                } => {
                    tracing::info!(
                        payment_id = %updated.id,
                        status = updated.status.as_str(),
                        source = ?kind,
                        "Payment settled"
                    );
                    self.notifier.notify(match updated.status {
                        PaymentStatus::Paid => PaymentNotice::Paid(updated.clone()),
                        _ => PaymentNotice::Failed(updated.clone()),
                    });
                    return Ok(Reconciled::Settled(updated));
                }
                CommitOutcome::Applied { payment: None, .. } => {
                    tracing::info!(payment_id = %current.id, source = ?kind, "Outcome not yet known, event logged");
                    return Ok(Reconciled::Logged(current));
                }
                CommitOutcome::Rejected(Conflict::StaleVersion) => {
                    tracing::debug!(payment_id = %current.id, attempt, "Payment changed underneath, reloading");
                    current = self.load_payment(&current.id).await?;
                }
                CommitOutcome::Rejected(Conflict::DuplicateEvent) => {
                    tracing::info!(payment_id = %current.id, "Event already applied by a concurrent delivery");
                    return Ok(Reconciled::Unchanged(self.load_payment(&current.id).await?));
                }
            }
        }

        Err(PaymentError::PaymentStateError(format!(
            "Payment {} is being modified concurrently",
            current.id
        )))
    }

    /// Moves a refund out of PENDING from a provider callback.
    pub(super) async fn settle_refund(
        &self,
        provider: Provider,
        provider_refund_id: &str,
        event: NormalizedEvent,
    ) -> Result<WebhookDisposition> {
        let Some(mut refund) = self
            .ledger
            .find_refund_by_provider_id(provider, provider_refund_id)
            .await?
        else {
            tracing::info!(%provider, provider_refund_id, "Webhook for unknown refund");
            return Ok(WebhookDisposition::UnknownReference);
        };
        let payment = self.load_payment(&refund.payment_id).await?;

        let dedup_key = event.dedup_key();
        if self.ledger.event_exists(&dedup_key).await? {
            return Ok(WebhookDisposition::Duplicate);
        }
        let payload = serde_json::to_value(&event)?;

        for _ in 0..MAX_COMMIT_ATTEMPTS {
            if refund.status.is_terminal() {
                return Ok(WebhookDisposition::AlreadyTerminal);
            }

            let log = PaymentEvent::new(&refund.payment_id, EventKind::RefundSettled, payload.clone())
                .with_outcome(event.outcome)
                .with_dedup_key(Some(dedup_key.clone()));
            let next_status = match event.outcome {
                Outcome::Success => Some(RefundStatus::Completed),
                Outcome::Failure => Some(RefundStatus::Failed),
                Outcome::Unknown => None,
            };

            let commit = match next_status {
                None => LedgerCommit::new().with_event(log),
                Some(status) => {
                    let mut next = refund.clone();
                    next.status = status;
                    next.updated_at = Utc::now();
                    LedgerCommit::new()
                        .with_refund(VersionedWrite::update(next))
                        .with_event(log)
                }
            };

            match self.ledger.commit(commit).await? {
                CommitOutcome::Applied {
                    refund: Some(settled),
                    ..
                } => {
                    self.after_refund_settled(&payment, &settled);
                    return Ok(WebhookDisposition::RefundSettled(settled));
                }
                CommitOutcome::Applied { refund: None, .. } => {
                    return Ok(WebhookDisposition::RefundSettled(refund));
                }
                CommitOutcome::Rejected(Conflict::StaleVersion) => {
                    refund = self
                        .ledger
                        .find_refund_by_provider_id(provider, provider_refund_id)
                        .await?
                        .ok_or_else(|| {
                            PaymentError::NotFound(format!("Refund {}", provider_refund_id))
                        })?;
                }
                CommitOutcome::Rejected(Conflict::DuplicateEvent) => {
                    return Ok(WebhookDisposition::Duplicate);
                }
            }
        }

        Err(PaymentError::PaymentStateError(format!(
            "Refund {} is being modified concurrently",
            refund.id
        )))
    }

    fn after_refund_settled(&self, payment: &Payment, refund: &Refund) {
        tracing::info!(refund_id = %refund.id, status = ?refund.status, "Refund settled");
        if refund.status == RefundStatus::Failed && payment.status == PaymentStatus::Refunded {
            // Money was promised back in full but the gateway could not deliver it.
            tracing::error!(
                payment_id = %payment.id,
                refund_id = %refund.id,
                "Refund failed on a payment already marked REFUNDED; manual review required"
            );
        }
        self.notifier.notify(PaymentNotice::RefundSettled(refund.clone()));
    }
}

/// A success is only trusted when it reports the ledger's exact amount and currency.
fn effective_outcome(payment: &Payment, event: &NormalizedEvent) -> Outcome {
    if event.outcome != Outcome::Success {
        return event.outcome;
    }
    let (Some(amount), Some(currency)) = (event.amount, event.currency) else {
        tracing::error!(
            payment_id = %payment.id,
            reported_amount = ?event.amount,
            reported_currency = ?event.currency,
            "Gateway reported success without a usable amount; not settling"
        );
        return Outcome::Unknown;
    };
    if amount != payment.amount || currency != payment.currency {
        tracing::error!(
            payment_id = %payment.id,
            expected_amount = %payment.amount,
            expected_currency = %payment.currency,
            reported_amount = %amount,
            reported_currency = %currency,
            "Gateway reported success for a different amount; not settling"
        );
        return Outcome::Unknown;
    }
    Outcome::Success
}

fn target_status(outcome: Outcome) -> Option<PaymentStatus> {
    match outcome {
        Outcome::Success => Some(PaymentStatus::Paid),
        Outcome::Failure => Some(PaymentStatus::Failed),
        Outcome::Unknown => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::Currency;
    use crate::domain::payment::Metadata;
    use rust_decimal_macros::dec;

    fn payment() -> Payment {
        Payment::new(
            "user-1".to_string(),
            None,
            dec!(82000),
            Currency::Ngn,
            Provider::Paystack,
            Metadata::new(),
        )
    }

    #[test]
    fn test_matching_success_is_trusted() {
        let event = NormalizedEvent::payment(Provider::Paystack, "ref", Outcome::Success)
            .with_amount(dec!(82000.00), Some(Currency::Ngn));
        assert_eq!(effective_outcome(&payment(), &event), Outcome::Success);
    }

    #[test]
    fn test_underpaid_success_is_downgraded() {
        let event = NormalizedEvent::payment(Provider::Paystack, "ref", Outcome::Success)
            .with_amount(dec!(8200), Some(Currency::Ngn));
        assert_eq!(effective_outcome(&payment(), &event), Outcome::Unknown);

        let wrong_currency = NormalizedEvent::payment(Provider::Paystack, "ref", Outcome::Success)
            .with_amount(dec!(82000), Some(Currency::Usd));
        assert_eq!(effective_outcome(&payment(), &wrong_currency), Outcome::Unknown);
    }

    #[test]
    fn test_success_without_amount_is_not_trusted() {
        let bare = NormalizedEvent::payment(Provider::Paystack, "ref", Outcome::Success);
        assert_eq!(effective_outcome(&payment(), &bare), Outcome::Unknown);

        let no_currency = NormalizedEvent::payment(Provider::Paystack, "ref", Outcome::Success)
            .with_amount(dec!(82000), None);
        assert_eq!(effective_outcome(&payment(), &no_currency), Outcome::Unknown);

        let sub_minor = NormalizedEvent::payment(Provider::Flutterwave, "ref", Outcome::Success)
            .with_amount(dec!(82000.005), Some(Currency::Ngn));
        assert_eq!(effective_outcome(&payment(), &sub_minor), Outcome::Unknown);
    }

    #[test]
    fn test_failure_passes_through() {
        let event = NormalizedEvent::payment(Provider::Paystack, "ref", Outcome::Failure)
            .with_amount(dec!(1), None);
        assert_eq!(effective_outcome(&payment(), &event), Outcome::Failure);
        assert_eq!(target_status(Outcome::Failure), Some(PaymentStatus::Failed));
        assert_eq!(target_status(Outcome::Unknown), None);
    }
}
