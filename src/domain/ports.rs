use super::event::PaymentEvent;
use super::order::{OrderMirror, OrderRecord};
use super::payment::{Payment, Provider};
use super::refund::Refund;
use crate::error::Result;
use async_trait::async_trait;

/// Records the ledger versions for optimistic concurrency.
pub trait Versioned {
    fn version(&self) -> u64;
    fn set_version(&mut self, version: u64);
}

impl Versioned for Payment {
    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}

impl Versioned for Refund {
    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}

/// A record write guarded by the version the writer last observed.
#[derive(Debug, Clone)]
pub struct VersionedWrite<T> {
    pub record: T,
    /// `None` inserts a record that must not exist yet.
    pub expected_version: Option<u64>,
}

impl<T: Versioned> VersionedWrite<T> {
    pub fn insert(record: T) -> Self {
        Self {
            record,
            expected_version: None,
        }
    }

    pub fn update(record: T) -> Self {
        let expected = record.version();
        Self {
            record,
            expected_version: Some(expected),
        }
    }

    /// Checks the write against the stored record and stamps the next version on success.
    pub fn stage(&mut self, current: Option<&T>) -> std::result::Result<(), Conflict> {
        match (self.expected_version, current) {
            (None, None) => {
                self.record.set_version(1);
                Ok(())
            }
            (Some(expected), Some(stored)) if stored.version() == expected => {
                self.record.set_version(expected + 1);
                Ok(())
            }
            _ => Err(Conflict::StaleVersion),
        }
    }
}

/// One atomic unit of ledger work: either every part is applied or none is.
#[derive(Debug, Clone, Default)]
pub struct LedgerCommit {
    pub payment: Option<VersionedWrite<Payment>>,
    pub refund: Option<VersionedWrite<Refund>>,
    pub event: Option<PaymentEvent>,
    pub order: Option<OrderMirror>,
}

impl LedgerCommit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_payment(mut self, write: VersionedWrite<Payment>) -> Self {
        self.payment = Some(write);
        self
    }

    pub fn with_refund(mut self, write: VersionedWrite<Refund>) -> Self {
        self.refund = Some(write);
        self
    }

    pub fn with_event(mut self, event: PaymentEvent) -> Self {
        self.event = Some(event);
        self
    }

    pub fn with_order(mut self, mirror: Option<OrderMirror>) -> Self {
        self.order = mirror;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conflict {
    /// Another writer committed first; reload and re-evaluate.
    StaleVersion,
    /// The event's dedup key is already in the log.
    DuplicateEvent,
}

#[derive(Debug, Clone)]
pub enum CommitOutcome {
    Applied {
        payment: Option<Payment>,
        refund: Option<Refund>,
    },
    Rejected(Conflict),
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn get_payment(&self, payment_id: &str) -> Result<Option<Payment>>;
    async fn find_payment_by_reference(&self, reference: &str) -> Result<Option<Payment>>;
    async fn list_payments(&self) -> Result<Vec<Payment>>;

    async fn events_for(&self, payment_id: &str) -> Result<Vec<PaymentEvent>>;
    async fn event_exists(&self, dedup_key: &str) -> Result<bool>;

    async fn refunds_for(&self, payment_id: &str) -> Result<Vec<Refund>>;
    /// Gateways issue refund ids independently, so a lookup is scoped to one provider.
    async fn find_refund_by_provider_id(
        &self,
        provider: Provider,
        provider_refund_id: &str,
    ) -> Result<Option<Refund>>;

    async fn get_order(&self, order_id: &str) -> Result<Option<OrderRecord>>;
    async fn put_order(&self, order: OrderRecord) -> Result<()>;

    /// Applies every part of `commit` atomically, or nothing when a version or
    /// dedup check fails. Order mirrors for unknown orders are skipped.
    async fn commit(&self, commit: LedgerCommit) -> Result<CommitOutcome>;
}

pub type LedgerStoreBox = Box<dyn LedgerStore>;
pub type LedgerStoreFactory = Box<dyn Fn() -> LedgerStoreBox + Send + Sync>;

/// Something worth telling the outside world about after a committed transition.
#[derive(Debug, Clone, PartialEq)]
pub enum PaymentNotice {
    Paid(Payment),
    Failed(Payment),
    Refunded(Payment),
    RefundRequested(Refund),
    RefundSettled(Refund),
}

/// Fire-and-forget dispatcher. Implementations must not block and must swallow
/// (and log) their own failures.
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: PaymentNotice);
}

pub type NotifierBox = Box<dyn Notifier>;
