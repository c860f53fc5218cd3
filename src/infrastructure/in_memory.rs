use crate::domain::event::PaymentEvent;
use crate::domain::order::OrderRecord;
use crate::domain::payment::{Payment, Provider};
use crate::domain::ports::{CommitOutcome, Conflict, LedgerCommit, LedgerStore};
use crate::domain::refund::Refund;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct LedgerState {
    payments: HashMap<String, Payment>,
    /// provider reference -> payment id; old references are kept so late callbacks still resolve.
    references: HashMap<String, String>,
    events: Vec<PaymentEvent>,
    dedup_keys: HashSet<String>,
    refunds: HashMap<String, Refund>,
    orders: HashMap<String, OrderRecord>,
}

/// A thread-safe in-memory ledger.
///
/// Every commit runs under a single write lock, which makes the version checks,
/// the dedup check and all writes one atomic step.
/// Ideal for testing or deployments where persistence is handled elsewhere.
#[derive(Default, Clone)]
pub struct InMemoryLedger {
    state: Arc<RwLock<LedgerState>>,
}

impl InMemoryLedger {
    /// Creates a new, empty in-memory ledger.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn get_payment(&self, payment_id: &str) -> Result<Option<Payment>> {
        let state = self.state.read().await;
        Ok(state.payments.get(payment_id).cloned())
    }

    async fn find_payment_by_reference(&self, reference: &str) -> Result<Option<Payment>> {
        let state = self.state.read().await;
        Ok(state
            .references
            .get(reference)
            .and_then(|id| state.payments.get(id))
            .cloned())
    }

    async fn list_payments(&self) -> Result<Vec<Payment>> {
        let state = self.state.read().await;
        let mut payments: Vec<Payment> = state.payments.values().cloned().collect();
        payments.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(payments)
    }

    async fn events_for(&self, payment_id: &str) -> Result<Vec<PaymentEvent>> {
        let state = self.state.read().await;
        Ok(state
            .events
            .iter()
            .filter(|e| e.payment_id == payment_id)
            .cloned()
            .collect())
    }

    async fn event_exists(&self, dedup_key: &str) -> Result<bool> {
        let state = self.state.read().await;
        Ok(state.dedup_keys.contains(dedup_key))
    }

    async fn refunds_for(&self, payment_id: &str) -> Result<Vec<Refund>> {
        let state = self.state.read().await;
        let mut refunds: Vec<Refund> = state
            .refunds
            .values()
            .filter(|r| r.payment_id == payment_id)
            .cloned()
            .collect();
        refunds.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(refunds)
    }

    async fn find_refund_by_provider_id(
        &self,
        provider: Provider,
        provider_refund_id: &str,
    ) -> Result<Option<Refund>> {
        let state = self.state.read().await;
        Ok(state
            .refunds
            .values()
            .find(|r| {
                r.provider == provider && r.provider_refund_id.as_deref() == Some(provider_refund_id)
            })
            .cloned())
    }

    async fn get_order(&self, order_id: &str) -> Result<Option<OrderRecord>> {
        let state = self.state.read().await;
        Ok(state.orders.get(order_id).cloned())
    }

    async fn put_order(&self, order: OrderRecord) -> Result<()> {
        let mut state = self.state.write().await;
        state.orders.insert(order.id.clone(), order);
        Ok(())
    }

    async fn commit(&self, mut commit: LedgerCommit) -> Result<CommitOutcome> {
        let mut state = self.state.write().await;

        // Validate everything before touching anything.
        if let Some(write) = commit.payment.as_mut() {
            let current = state.payments.get(&write.record.id);
            if let Err(conflict) = write.stage(current) {
                return Ok(CommitOutcome::Rejected(conflict));
            }
        }
        if let Some(write) = commit.refund.as_mut() {
            let current = state.refunds.get(&write.record.id);
            if let Err(conflict) = write.stage(current) {
                return Ok(CommitOutcome::Rejected(conflict));
            }
        }
        if let Some(key) = commit.event.as_ref().and_then(|e| e.dedup_key.as_ref())
            && state.dedup_keys.contains(key)
        {
            return Ok(CommitOutcome::Rejected(Conflict::DuplicateEvent));
        }

        let payment = commit.payment.map(|w| w.record);
        if let Some(payment) = &payment {
            if let Some(reference) = &payment.provider_reference {
                state
                    .references
                    .insert(reference.clone(), payment.id.clone());
            }
            state.payments.insert(payment.id.clone(), payment.clone());
        }

        let refund = commit.refund.map(|w| w.record);
        if let Some(refund) = &refund {
            state.refunds.insert(refund.id.clone(), refund.clone());
        }

        if let Some(event) = commit.event {
            if let Some(key) = &event.dedup_key {
                state.dedup_keys.insert(key.clone());
            }
            state.events.push(event);
        }

        if let Some(mirror) = commit.order {
            match state.orders.get_mut(&mirror.order_id) {
                Some(order) => mirror.apply(order),
                None => tracing::warn!(
                    order_id = %mirror.order_id,
                    "Order mirror skipped: order not registered with the ledger"
                ),
            }
        }

        Ok(CommitOutcome::Applied { payment, refund })
    }
}
