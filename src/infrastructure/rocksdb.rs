use crate::domain::event::PaymentEvent;
use crate::domain::order::OrderRecord;
use crate::domain::payment::{Payment, Provider};
use crate::domain::ports::{CommitOutcome, Conflict, LedgerCommit, LedgerStore};
use crate::domain::refund::Refund;
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options, WriteBatch};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Column Family for payment records, keyed by payment id.
pub const CF_PAYMENTS: &str = "payments";
/// Column Family mapping provider references to payment ids.
pub const CF_REFERENCES: &str = "references";
/// Column Family for the event log, keyed by `payment_id/timestamp/event_id`.
pub const CF_EVENTS: &str = "events";
/// Column Family holding every event dedup key ever committed.
pub const CF_DEDUP: &str = "dedup";
/// Column Family for refunds, keyed by `payment_id/refund_id`.
pub const CF_REFUNDS: &str = "refunds";
/// Column Family mapping gateway refund ids to refund keys.
pub const CF_REFUND_IDS: &str = "refund_ids";
/// Column Family for order payment mirrors.
pub const CF_ORDERS: &str = "orders";

const COLUMN_FAMILIES: [&str; 7] = [
    CF_PAYMENTS,
    CF_REFERENCES,
    CF_EVENTS,
    CF_DEDUP,
    CF_REFUNDS,
    CF_REFUND_IDS,
    CF_ORDERS,
];

/// A persistent ledger implementation using RocksDB.
///
/// Commits are serialized by `commit_lock` and written as one `WriteBatch`, so the
/// version checks and the writes they guard form a single atomic step. RocksDB
/// holds an exclusive lock on the database directory, so no other process can
/// interleave writes.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDbLedger {
    db: Arc<DB>,
    commit_lock: Arc<Mutex<()>>,
}

impl RocksDbLedger {
    /// Opens or creates a RocksDB instance at the specified path.
    ///
    /// Ensures that every column family the ledger uses exists.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self {
            db: Arc::new(db),
            commit_lock: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| PaymentError::internal(format!("{} column family not found", name)))
    }

    fn read<T: DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        match self.db.get_pinned_cf(cf, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn read_string(&self, cf_name: &str, key: &[u8]) -> Result<Option<String>> {
        let cf = self.cf(cf_name)?;
        Ok(self
            .db
            .get_cf(cf, key)?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }

    fn scan_prefix<T: DeserializeOwned>(&self, cf_name: &str, prefix: &str) -> Result<Vec<T>> {
        let cf = self.cf(cf_name)?;
        let mut records = Vec::new();
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix.as_bytes(), Direction::Forward));
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            records.push(serde_json::from_slice(&value)?);
        }
        Ok(records)
    }

    fn put_json<T: Serialize>(
        &self,
        batch: &mut WriteBatch,
        cf_name: &str,
        key: &[u8],
        value: &T,
    ) -> Result<()> {
        let cf = self.cf(cf_name)?;
        batch.put_cf(cf, key, serde_json::to_vec(value)?);
        Ok(())
    }
}

fn refund_key(refund: &Refund) -> String {
    format!("{}/{}", refund.payment_id, refund.id)
}

fn refund_id_key(provider: Provider, provider_refund_id: &str) -> String {
    format!("{}:{}", provider, provider_refund_id)
}

fn event_key(event: &PaymentEvent) -> String {
    format!(
        "{}/{:020}/{}",
        event.payment_id,
        event.created_at.timestamp_nanos_opt().unwrap_or_default(),
        event.id
    )
}

#[async_trait]
impl LedgerStore for RocksDbLedger {
    async fn get_payment(&self, payment_id: &str) -> Result<Option<Payment>> {
        self.read(CF_PAYMENTS, payment_id.as_bytes())
    }

    async fn find_payment_by_reference(&self, reference: &str) -> Result<Option<Payment>> {
        match self.read_string(CF_REFERENCES, reference.as_bytes())? {
            Some(payment_id) => self.read(CF_PAYMENTS, payment_id.as_bytes()),
            None => Ok(None),
        }
    }

    async fn list_payments(&self) -> Result<Vec<Payment>> {
        let mut payments: Vec<Payment> = self.scan_prefix(CF_PAYMENTS, "")?;
        payments.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(payments)
    }

    async fn events_for(&self, payment_id: &str) -> Result<Vec<PaymentEvent>> {
        self.scan_prefix(CF_EVENTS, &format!("{}/", payment_id))
    }

    async fn event_exists(&self, dedup_key: &str) -> Result<bool> {
        let cf = self.cf(CF_DEDUP)?;
        Ok(self.db.get_pinned_cf(cf, dedup_key.as_bytes())?.is_some())
    }

    async fn refunds_for(&self, payment_id: &str) -> Result<Vec<Refund>> {
        let mut refunds: Vec<Refund> = self.scan_prefix(CF_REFUNDS, &format!("{}/", payment_id))?;
        refunds.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(refunds)
    }

    async fn find_refund_by_provider_id(
        &self,
        provider: Provider,
        provider_refund_id: &str,
    ) -> Result<Option<Refund>> {
        let index = refund_id_key(provider, provider_refund_id);
        match self.read_string(CF_REFUND_IDS, index.as_bytes())? {
            Some(key) => self.read(CF_REFUNDS, key.as_bytes()),
            None => Ok(None),
        }
    }

    async fn get_order(&self, order_id: &str) -> Result<Option<OrderRecord>> {
        self.read(CF_ORDERS, order_id.as_bytes())
    }

    async fn put_order(&self, order: OrderRecord) -> Result<()> {
        let _guard = self.commit_lock.lock().await;
        let cf = self.cf(CF_ORDERS)?;
        self.db
            .put_cf(cf, order.id.as_bytes(), serde_json::to_vec(&order)?)?;
        Ok(())
    }

    async fn commit(&self, mut commit: LedgerCommit) -> Result<CommitOutcome> {
        let _guard = self.commit_lock.lock().await;

        if let Some(write) = commit.payment.as_mut() {
            let current: Option<Payment> = self.read(CF_PAYMENTS, write.record.id.as_bytes())?;
            if let Err(conflict) = write.stage(current.as_ref()) {
                return Ok(CommitOutcome::Rejected(conflict));
            }
        }
        if let Some(write) = commit.refund.as_mut() {
            let current: Option<Refund> =
                self.read(CF_REFUNDS, refund_key(&write.record).as_bytes())?;
            if let Err(conflict) = write.stage(current.as_ref()) {
                return Ok(CommitOutcome::Rejected(conflict));
            }
        }
        if let Some(key) = commit.event.as_ref().and_then(|e| e.dedup_key.as_ref())
            && self.event_exists(key).await?
        {
            return Ok(CommitOutcome::Rejected(Conflict::DuplicateEvent));
        }

        let mut batch = WriteBatch::default();

        let payment = commit.payment.map(|w| w.record);
        if let Some(payment) = &payment {
            self.put_json(&mut batch, CF_PAYMENTS, payment.id.as_bytes(), payment)?;
            if let Some(reference) = &payment.provider_reference {
                batch.put_cf(
                    self.cf(CF_REFERENCES)?,
                    reference.as_bytes(),
                    payment.id.as_bytes(),
                );
            }
        }

        let refund = commit.refund.map(|w| w.record);
        if let Some(refund) = &refund {
            let key = refund_key(refund);
            self.put_json(&mut batch, CF_REFUNDS, key.as_bytes(), refund)?;
            if let Some(provider_refund_id) = &refund.provider_refund_id {
                batch.put_cf(
                    self.cf(CF_REFUND_IDS)?,
                    refund_id_key(refund.provider, provider_refund_id).as_bytes(),
                    key.as_bytes(),
                );
            }
        }

        if let Some(event) = &commit.event {
            self.put_json(&mut batch, CF_EVENTS, event_key(event).as_bytes(), event)?;
            if let Some(key) = &event.dedup_key {
                batch.put_cf(self.cf(CF_DEDUP)?, key.as_bytes(), event.id.as_bytes());
            }
        }

        if let Some(mirror) = &commit.order {
            match self.read::<OrderRecord>(CF_ORDERS, mirror.order_id.as_bytes())? {
                Some(mut order) => {
                    mirror.apply(&mut order);
                    self.put_json(&mut batch, CF_ORDERS, order.id.as_bytes(), &order)?;
                }
                None => tracing::warn!(
                    order_id = %mirror.order_id,
                    "Order mirror skipped: order not registered with the ledger"
                ),
            }
        }

        self.db.write(batch)?;

        Ok(CommitOutcome::Applied { payment, refund })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event::EventKind;
    use crate::domain::money::Currency;
    use crate::domain::order::{OrderMirror, OrderPaymentStatus};
    use crate::domain::payment::{Metadata, PaymentStatus};
    use crate::domain::ports::VersionedWrite;
    use rust_decimal_macros::dec;
    use tempfile::tempdir;

    fn pending_payment() -> Payment {
        Payment::new(
            "user-1".to_string(),
            Some("W1".to_string()),
            dec!(82000),
            Currency::Ngn,
            Provider::Paystack,
            Metadata::new(),
        )
    }

    #[tokio::test]
    async fn test_rocksdb_open_cf() {
        let dir = tempdir().unwrap();
        let store = RocksDbLedger::open(dir.path()).expect("Failed to open RocksDB");

        for name in COLUMN_FAMILIES {
            assert!(store.db.cf_handle(name).is_some(), "missing {}", name);
        }
    }

    #[tokio::test]
    async fn test_rocksdb_commit_and_reload() {
        let dir = tempdir().unwrap();
        let store = RocksDbLedger::open(dir.path()).unwrap();
        store
            .put_order(OrderRecord::new("W1".to_string(), "user-1".to_string()))
            .await
            .unwrap();

        let mut payment = pending_payment();
        payment.provider_reference = Some("ref-1".to_string());
        store
            .commit(LedgerCommit::new().with_payment(VersionedWrite::insert(payment.clone())))
            .await
            .unwrap();

        let mut paid = store.get_payment(&payment.id).await.unwrap().unwrap();
        assert_eq!(paid.version, 1);
        paid.status = PaymentStatus::Paid;
        let outcome = store
            .commit(
                LedgerCommit::new()
                    .with_payment(VersionedWrite::update(paid))
                    .with_event(
                        PaymentEvent::new(&payment.id, EventKind::Verified, serde_json::json!({}))
                            .with_dedup_key(Some("paystack:1".to_string())),
                    )
                    .with_order(OrderMirror::for_status("W1", PaymentStatus::Paid, "ref-1")),
            )
            .await
            .unwrap();
        assert!(matches!(outcome, CommitOutcome::Applied { .. }));

        let found = store.find_payment_by_reference("ref-1").await.unwrap().unwrap();
        assert_eq!(found.status, PaymentStatus::Paid);
        assert_eq!(found.version, 2);
        assert!(store.event_exists("paystack:1").await.unwrap());
        assert_eq!(store.events_for(&payment.id).await.unwrap().len(), 1);

        let order = store.get_order("W1").await.unwrap().unwrap();
        assert_eq!(order.payment_status, OrderPaymentStatus::Paid);
    }

    #[tokio::test]
    async fn test_rocksdb_stale_commit_rejected() {
        let dir = tempdir().unwrap();
        let store = RocksDbLedger::open(dir.path()).unwrap();
        let payment = pending_payment();
        store
            .commit(LedgerCommit::new().with_payment(VersionedWrite::insert(payment.clone())))
            .await
            .unwrap();

        // Version 0 was never stored; the insert stamped version 1.
        let outcome = store
            .commit(LedgerCommit::new().with_payment(VersionedWrite::update(payment)))
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            CommitOutcome::Rejected(Conflict::StaleVersion)
        ));
    }

    #[tokio::test]
    async fn test_rocksdb_refund_lookup() {
        let dir = tempdir().unwrap();
        let store = RocksDbLedger::open(dir.path()).unwrap();
        let reserved = Refund::new(
            "pay-1".to_string(),
            Provider::Paystack,
            dec!(50000),
            Currency::Ngn,
            "partial".to_string(),
            "admin".to_string(),
        );
        let inserted = match store
            .commit(LedgerCommit::new().with_refund(VersionedWrite::insert(reserved)))
            .await
            .unwrap()
        {
            CommitOutcome::Applied {
                refund: Some(r), ..
            } => r,
            other => panic!("unexpected outcome: {:?}", other),
        };
        assert!(
            store
                .find_refund_by_provider_id(Provider::Paystack, "rf_99")
                .await
                .unwrap()
                .is_none()
        );

        // The gateway id is indexed once it is recorded on the reserved row.
        let mut accepted = inserted.clone();
        accepted.provider_refund_id = Some("rf_99".to_string());
        store
            .commit(LedgerCommit::new().with_refund(VersionedWrite::update(accepted)))
            .await
            .unwrap();

        let found = store
            .find_refund_by_provider_id(Provider::Paystack, "rf_99")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, inserted.id);
        assert!(
            store
                .find_refund_by_provider_id(Provider::Flutterwave, "rf_99")
                .await
                .unwrap()
                .is_none()
        );
        assert_eq!(store.refunds_for("pay-1").await.unwrap().len(), 1);
        assert!(store.refunds_for("pay-2").await.unwrap().is_empty());
    }
}
