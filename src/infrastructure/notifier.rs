use crate::domain::ports::{Notifier, PaymentNotice};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

/// Writes notices to the log. The default when no dispatcher is wired in.
#[derive(Debug, Default, Clone)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notice: PaymentNotice) {
        match &notice {
            PaymentNotice::Paid(p) => {
                tracing::info!(payment_id = %p.id, order_id = ?p.order_id, "Payment confirmed")
            }
            PaymentNotice::Failed(p) => tracing::info!(payment_id = %p.id, "Payment failed"),
            PaymentNotice::Refunded(p) => tracing::info!(payment_id = %p.id, "Payment refunded"),
            PaymentNotice::RefundRequested(r) => {
                tracing::info!(refund_id = %r.id, payment_id = %r.payment_id, amount = %r.amount, "Refund requested")
            }
            PaymentNotice::RefundSettled(r) => {
                tracing::info!(refund_id = %r.id, status = ?r.status, "Refund settled")
            }
        }
    }
}

/// Hands notices to a consumer task (email dispatch, websocket push, ...).
///
/// Sending never blocks; a closed receiver only produces a warning.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: UnboundedSender<PaymentNotice>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, UnboundedReceiver<PaymentNotice>) {
        let (tx, rx) = unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, notice: PaymentNotice) {
        if self.tx.send(notice).is_err() {
            tracing::warn!("Notification dropped: receiver closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::Currency;
    use crate::domain::payment::{Metadata, Payment, Provider};
    use rust_decimal_macros::dec;

    fn payment() -> Payment {
        Payment::new(
            "user-1".to_string(),
            None,
            dec!(100),
            Currency::Usd,
            Provider::Stripe,
            Metadata::new(),
        )
    }

    #[tokio::test]
    async fn test_channel_notifier_delivers() {
        let (notifier, mut rx) = ChannelNotifier::new();
        let p = payment();
        notifier.notify(PaymentNotice::Paid(p.clone()));

        assert_eq!(rx.recv().await, Some(PaymentNotice::Paid(p)));
    }

    #[test]
    fn test_channel_notifier_survives_closed_receiver() {
        let (notifier, rx) = ChannelNotifier::new();
        drop(rx);
        notifier.notify(PaymentNotice::Failed(payment()));
    }
}
