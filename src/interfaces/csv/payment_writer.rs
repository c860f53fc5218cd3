use crate::application::PaymentSummary;
use crate::error::Result;
use rust_decimal::Decimal;
use serde::Serialize;
use std::io::Write;

#[derive(Debug, Serialize)]
struct PaymentRow<'a> {
    id: &'a str,
    owner: &'a str,
    order: &'a str,
    provider: &'a str,
    reference: &'a str,
    status: &'a str,
    currency: &'a str,
    amount: Decimal,
    refunded: Decimal,
    verified: bool,
}

impl<'a> From<&'a PaymentSummary> for PaymentRow<'a> {
    fn from(summary: &'a PaymentSummary) -> Self {
        let payment = &summary.payment;
        Self {
            id: &payment.id,
            owner: &payment.owner_id,
            order: payment.order_id.as_deref().unwrap_or(""),
            provider: payment.provider.as_str(),
            reference: payment.provider_reference.as_deref().unwrap_or(""),
            status: payment.status.as_str(),
            currency: payment.currency.code(),
            amount: payment.amount.normalize(),
            refunded: summary.refunded.normalize(),
            verified: payment.webhook_verified,
        }
    }
}

/// Writes a ledger snapshot as CSV, one row per payment.
pub struct PaymentWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> PaymentWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_payments(&mut self, summaries: &[PaymentSummary]) -> Result<()> {
        if summaries.is_empty() {
            // Serializing no rows would omit the header too.
            self.writer.write_record([
                "id", "owner", "order", "provider", "reference", "status", "currency", "amount",
                "refunded", "verified",
            ])?;
        }
        for summary in summaries {
            self.writer.serialize(PaymentRow::from(summary))?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
