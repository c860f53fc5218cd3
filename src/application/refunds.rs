use super::MAX_COMMIT_ATTEMPTS;
use super::orchestrator::{PaymentOrchestrator, RefundCommand};
use crate::domain::event::{EventKind, Outcome, PaymentEvent};
use crate::domain::money::to_minor_units;
use crate::domain::order::OrderMirror;
use crate::domain::payment::{Payment, PaymentStatus};
use crate::domain::ports::{
    CommitOutcome, Conflict, LedgerCommit, PaymentNotice, VersionedWrite,
};
use crate::domain::refund::{Refund, RefundStatus, accepted_total, committed_total};
use crate::error::{PaymentError, Result};
use crate::gateways::RefundRequest;
use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::json;

impl PaymentOrchestrator {
    /// Requests a refund from the gateway and records it as PENDING.
    ///
    /// The refundable balance is the payment amount minus every refund that has not
    /// failed. The amount is reserved in the ledger before the gateway is called, so
    /// concurrent requests can never promise back more than was paid. Once the
    /// gateway has acknowledged refunds covering the whole amount the payment moves
    /// to REFUNDED.
    pub async fn initiate_refund(&self, command: RefundCommand) -> Result<Refund> {
        let payment = self.load_payment(&command.payment_id).await?;
        let adapter = self.gateways.get(payment.provider)?;
        let (payment, reserved) = self.reserve_refund(payment, &command).await?;

        let request = RefundRequest {
            provider_reference: payment.reference().to_string(),
            gateway_transaction_id: payment.gateway_transaction_id.clone(),
            amount_minor: to_minor_units(reserved.amount, reserved.currency)?,
            currency: reserved.currency,
            reason: reserved.reason.clone(),
        };
        match adapter.refund(&request).await {
            Ok(provider_refund_id) => {
                self.confirm_refund(payment, reserved, provider_refund_id)
                    .await
            }
            Err(e) => {
                tracing::warn!(payment_id = %payment.id, refund_id = %reserved.id, error = %e, "Gateway refused refund");
                self.release_refund(reserved, &e).await;
                Err(e)
            }
        }
    }

    /// Validates the requested amount against the outstanding balance and writes a
    /// PENDING refund row in the same commit as a payment version bump. A concurrent
    /// reservation makes the bump stale, so the loser re-reads and re-validates.
    async fn reserve_refund(
        &self,
        payment: Payment,
        command: &RefundCommand,
    ) -> Result<(Payment, Refund)> {
        let mut current = payment;
        for attempt in 1..=MAX_COMMIT_ATTEMPTS {
            ensure_refundable(&current)?;

            let refunds = self.ledger.refunds_for(&current.id).await?;
            let outstanding = current.amount - committed_total(&refunds);
            let amount = command.amount.unwrap_or(outstanding);
            if amount <= Decimal::ZERO {
                return Err(PaymentError::ValidationError(
                    "Refund amount must be positive".to_string(),
                ));
            }
            if amount > outstanding {
                return Err(PaymentError::ValidationError(format!(
                    "Refund of {} exceeds refundable balance of {}",
                    amount, outstanding
                )));
            }
            to_minor_units(amount, current.currency)?;

            let refund = Refund::new(
                current.id.clone(),
                current.provider,
                amount,
                current.currency,
                command.reason.clone(),
                command.requested_by.clone(),
            );
            let mut touched = current.clone();
            touched.updated_at = Utc::now();
            let commit = LedgerCommit::new()
                .with_payment(VersionedWrite::update(touched))
                .with_refund(VersionedWrite::insert(refund));

            match self.ledger.commit(commit).await? {
                CommitOutcome::Applied {
                    payment: Some(payment),
                    refund: Some(reserved),
                } => {
                    tracing::debug!(payment_id = %payment.id, refund_id = %reserved.id, amount = %reserved.amount, "Refund reserved");
                    return Ok((payment, reserved));
                }
                CommitOutcome::Rejected(Conflict::StaleVersion) => {
                    tracing::debug!(payment_id = %current.id, attempt, "Payment changed underneath, re-validating refund");
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

    /// Records the gateway's refund id on the reserved row. The money has moved, so
    /// conflicts are retried against fresh state rather than re-validated.
    async fn confirm_refund(
        &self,
        payment: Payment,
        reserved: Refund,
        provider_refund_id: String,
    ) -> Result<Refund> {
        let mut current = payment;
        let mut refund = reserved;
        for _ in 0..MAX_COMMIT_ATTEMPTS {
            let mut accepted = refund.clone();
            accepted.provider_refund_id = Some(provider_refund_id.clone());
            accepted.updated_at = Utc::now();

            let mut refunds = self.ledger.refunds_for(&current.id).await?;
            refunds.retain(|r| r.id != accepted.id);
            refunds.push(accepted.clone());
            let fully_refunded = current.status.can_transition_to(PaymentStatus::Refunded)
                && accepted_total(&refunds) >= current.amount;

            let mut next = current.clone();
            next.updated_at = accepted.updated_at;
            let mirror = if fully_refunded {
                next.status = PaymentStatus::Refunded;
                next.order_id.as_deref().and_then(|order_id| {
                    OrderMirror::for_status(order_id, PaymentStatus::Refunded, next.reference())
                })
            } else {
                None
            };

            let event = PaymentEvent::new(
                &current.id,
                EventKind::RefundRequested,
                json!({
                    "refundId": accepted.id,
                    "providerRefundId": provider_refund_id,
                    "amount": accepted.amount,
                    "reason": accepted.reason,
                    "requestedBy": accepted.requested_by,
                }),
            );
            let commit = LedgerCommit::new()
                .with_payment(VersionedWrite::update(next))
                .with_refund(VersionedWrite::update(accepted))
                .with_event(event)
                .with_order(mirror);

            match self.ledger.commit(commit).await? {
                CommitOutcome::Applied {
                    payment: Some(payment),
                    refund: Some(recorded),
                } => {
                    tracing::info!(
                        payment_id = %payment.id,
                        refund_id = %recorded.id,
                        amount = %recorded.amount,
                        payment_status = payment.status.as_str(),
                        "Refund recorded"
                    );
                    self.notifier
                        .notify(PaymentNotice::RefundRequested(recorded.clone()));
                    if fully_refunded {
                        self.notifier.notify(PaymentNotice::Refunded(payment));
                    }
                    return Ok(recorded);
                }
                CommitOutcome::Rejected(Conflict::StaleVersion) => {
                    current = self.load_payment(&current.id).await?;
                    refund = self.load_refund(&refund).await?;
                }
                _ => return Err(PaymentError::internal("Unexpected ledger outcome")),
            }
        }

        tracing::error!(
            payment_id = %current.id,
            refund_id = %refund.id,
            provider_refund_id = %provider_refund_id,
            "Gateway accepted refund but the ledger write kept conflicting"
        );
        Err(PaymentError::PaymentStateError(format!(
            "Payment {} is being modified concurrently",
            current.id
        )))
    }

    /// Marks a reservation FAILED after the gateway refused it, returning its amount
    /// to the refundable balance.
    async fn release_refund(&self, reserved: Refund, cause: &PaymentError) {
        let mut refund = reserved;
        for _ in 0..MAX_COMMIT_ATTEMPTS {
            let mut failed = refund.clone();
            failed.status = RefundStatus::Failed;
            failed.updated_at = Utc::now();
            let event = PaymentEvent::new(
                &refund.payment_id,
                EventKind::RefundSettled,
                json!({ "refundId": refund.id, "error": cause.to_string() }),
            )
            .with_outcome(Outcome::Failure);
            let commit = LedgerCommit::new()
                .with_refund(VersionedWrite::update(failed))
                .with_event(event);

            match self.ledger.commit(commit).await {
                Ok(CommitOutcome::Applied { .. }) => return,
                Ok(CommitOutcome::Rejected(Conflict::StaleVersion)) => {
                    match self.load_refund(&refund).await {
                        Ok(latest) => refund = latest,
                        Err(e) => {
                            tracing::error!(refund_id = %refund.id, error = %e, "Could not reload refused refund");
                            return;
                        }
                    }
                }
                Ok(CommitOutcome::Rejected(conflict)) => {
                    tracing::error!(refund_id = %refund.id, ?conflict, "Could not release refused refund");
                    return;
                }
                Err(e) => {
                    tracing::error!(refund_id = %refund.id, error = %e, "Could not release refused refund");
                    return;
                }
            }
        }
        tracing::error!(refund_id = %refund.id, "Refused refund is still reserved; manual review required");
    }

    async fn load_refund(&self, refund: &Refund) -> Result<Refund> {
        self.ledger
            .refunds_for(&refund.payment_id)
            .await?
            .into_iter()
            .find(|r| r.id == refund.id)
            .ok_or_else(|| PaymentError::NotFound(format!("Refund {}", refund.id)))
    }
}

fn ensure_refundable(payment: &Payment) -> Result<()> {
    match payment.status {
        PaymentStatus::Paid => Ok(()),
        PaymentStatus::Refunded => Err(PaymentError::PaymentStateError(format!(
            "Payment {} is already refunded",
            payment.id
        ))),
        PaymentStatus::Pending | PaymentStatus::Failed => Err(PaymentError::PaymentStateError(
            format!("Payment {} is not paid", payment.id),
        )),
    }
}
