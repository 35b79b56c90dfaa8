//! In-memory store and ledger implementations.
//!
//! These implementations keep everything behind a single `RwLock`, so each
//! conditional operation runs under one write guard and the compare-and-set
//! contract of [`PaymentStore`] holds. Suitable for development, testing,
//! and single-instance deployments; not for jobs that need persistence
//! across restarts.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{PaymentLinkError, Result};
use crate::ledger::{Invoice, InvoiceLedger, InvoiceStatus, PaymentApplication};
use crate::storage::{
    InsertOutcome, Metadata, NewPayment, Payment, PaymentState, PaymentStatistics, PaymentStatus,
    PaymentStore, TransitionOutcome,
};

// =============================================================================
// Payment store
// =============================================================================

/// In-memory [`PaymentStore`].
///
/// Cheap to clone; clones share the same underlying data.
#[derive(Clone, Default)]
pub struct InMemoryPaymentStore {
    // Keyed by token; tokens are unique by construction.
    inner: Arc<RwLock<HashMap<String, Payment>>>,
}

impl InMemoryPaymentStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored payments (for tests).
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Whether the store is empty (for tests).
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    fn build_record(new_payment: NewPayment) -> Payment {
        Payment {
            id: Uuid::new_v4().to_string(),
            invoice_id: new_payment.invoice_id,
            token: new_payment.token,
            amount: new_payment.amount,
            currency: new_payment.currency,
            state: PaymentState::Pending,
            created_at: new_payment.created_at,
            expires_at: new_payment.expires_at,
            metadata: Metadata::new(),
        }
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn insert(&self, new_payment: NewPayment) -> Result<Payment> {
        let mut payments = self.inner.write().await;
        if payments.contains_key(&new_payment.token) {
            return Err(PaymentLinkError::TokenCollision {
                token: new_payment.token,
            });
        }
        let record = Self::build_record(new_payment);
        payments.insert(record.token.clone(), record.clone());
        Ok(record)
    }

    async fn insert_unless_active(
        &self,
        new_payment: NewPayment,
        now: DateTime<Utc>,
    ) -> Result<InsertOutcome> {
        // Lookup and insert under one write guard: the single-active
        // constraint must not be racy.
        let mut payments = self.inner.write().await;

        let active = payments
            .values()
            .find(|p| {
                p.invoice_id == new_payment.invoice_id
                    && p.state == PaymentState::Pending
                    && now < p.expires_at
            })
            .cloned();
        if let Some(existing) = active {
            return Ok(InsertOutcome::Existing(existing));
        }

        if payments.contains_key(&new_payment.token) {
            return Err(PaymentLinkError::TokenCollision {
                token: new_payment.token,
            });
        }
        let record = Self::build_record(new_payment);
        payments.insert(record.token.clone(), record.clone());
        Ok(InsertOutcome::Created(record))
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<Payment>> {
        Ok(self.inner.read().await.get(token).cloned())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Payment>> {
        Ok(self
            .inner
            .read()
            .await
            .values()
            .find(|p| p.id == id)
            .cloned())
    }

    async fn find_by_invoice(&self, invoice_id: &str) -> Result<Vec<Payment>> {
        let payments = self.inner.read().await;
        let mut matching: Vec<Payment> = payments
            .values()
            .filter(|p| p.invoice_id == invoice_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matching)
    }

    async fn transition(
        &self,
        token: &str,
        next: PaymentState,
        metadata: Option<Metadata>,
    ) -> Result<TransitionOutcome> {
        let mut payments = self.inner.write().await;
        let Some(payment) = payments.get_mut(token) else {
            return Ok(TransitionOutcome::NotFound);
        };
        if !payment.state.is_open() {
            return Ok(TransitionOutcome::Conflict(payment.clone()));
        }
        payment.state = next;
        if let Some(extra) = metadata {
            for (key, value) in extra {
                payment.metadata.insert(key, value);
            }
        }
        Ok(TransitionOutcome::Applied(payment.clone()))
    }

    async fn set_amount_if_pending(&self, token: &str, amount: i64) -> Result<TransitionOutcome> {
        let mut payments = self.inner.write().await;
        let Some(payment) = payments.get_mut(token) else {
            return Ok(TransitionOutcome::NotFound);
        };
        if payment.state != PaymentState::Pending {
            return Ok(TransitionOutcome::Conflict(payment.clone()));
        }
        payment.amount = amount;
        Ok(TransitionOutcome::Applied(payment.clone()))
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut payments = self.inner.write().await;
        let mut swept = 0;
        for payment in payments.values_mut() {
            if payment.state.is_open() && payment.expires_at < now {
                payment.state = PaymentState::Expired { processed_at: now };
                swept += 1;
            }
        }
        Ok(swept)
    }

    async fn list_by_status(&self, status: PaymentStatus) -> Result<Vec<Payment>> {
        let payments = self.inner.read().await;
        let mut matching: Vec<Payment> = payments
            .values()
            .filter(|p| p.status() == status)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(matching)
    }

    async fn statistics(&self) -> Result<PaymentStatistics> {
        let payments = self.inner.read().await;
        let mut stats = PaymentStatistics::default();
        for payment in payments.values() {
            stats.total += 1;
            match payment.status() {
                PaymentStatus::Pending => stats.pending += 1,
                PaymentStatus::Completed => {
                    stats.completed += 1;
                    stats.total_amount_collected += payment.amount;
                }
                PaymentStatus::Failed => stats.failed += 1,
                PaymentStatus::Expired => stats.expired += 1,
                PaymentStatus::Refunded => stats.refunded += 1,
            }
        }
        if stats.total > 0 {
            stats.success_rate = (stats.completed as f64 / stats.total as f64) * 100.0;
        }
        Ok(stats)
    }
}

// =============================================================================
// Invoice ledger
// =============================================================================

#[derive(Default)]
struct LedgerInner {
    invoices: HashMap<String, Invoice>,
    // Transaction ids already reconciled, for idempotent replay.
    applied_transactions: HashSet<String>,
}

/// In-memory [`InvoiceLedger`].
///
/// Cheap to clone; clones share the same underlying data.
#[derive(Clone, Default)]
pub struct InMemoryInvoiceLedger {
    inner: Arc<RwLock<LedgerInner>>,
}

impl InMemoryInvoiceLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace an invoice (seeding helper).
    pub async fn upsert_invoice(&self, invoice: Invoice) {
        let mut inner = self.inner.write().await;
        inner.invoices.insert(invoice.id.clone(), invoice);
    }

    /// Seed a fresh unpaid invoice and return it.
    pub async fn seed_unpaid(
        &self,
        invoice_id: impl Into<String>,
        customer_name: impl Into<String>,
        amount_due: i64,
        currency: impl Into<String>,
    ) -> Invoice {
        let invoice = Invoice {
            id: invoice_id.into(),
            customer_name: customer_name.into(),
            amount_due,
            currency: currency.into(),
            status: InvoiceStatus::Unpaid,
            payment_link: None,
            total_paid: 0,
        };
        self.upsert_invoice(invoice.clone()).await;
        invoice
    }
}

#[async_trait]
impl InvoiceLedger for InMemoryInvoiceLedger {
    async fn get_invoice(&self, invoice_id: &str) -> Result<Option<Invoice>> {
        Ok(self.inner.read().await.invoices.get(invoice_id).cloned())
    }

    async fn set_payment_link(&self, invoice_id: &str, link: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        let invoice = inner.invoices.get_mut(invoice_id).ok_or_else(|| {
            PaymentLinkError::InvoiceNotFound {
                invoice_id: invoice_id.to_string(),
            }
        })?;
        invoice.payment_link = Some(link.to_string());
        Ok(())
    }

    async fn set_payment_status(&self, invoice_id: &str, status: InvoiceStatus) -> Result<()> {
        let mut inner = self.inner.write().await;
        let invoice = inner.invoices.get_mut(invoice_id).ok_or_else(|| {
            PaymentLinkError::InvoiceNotFound {
                invoice_id: invoice_id.to_string(),
            }
        })?;
        invoice.status = status;
        Ok(())
    }

    async fn apply_payment(
        &self,
        invoice_id: &str,
        amount: i64,
        transaction_id: &str,
    ) -> Result<PaymentApplication> {
        let mut inner = self.inner.write().await;
        if !inner.invoices.contains_key(invoice_id) {
            return Err(PaymentLinkError::InvoiceNotFound {
                invoice_id: invoice_id.to_string(),
            });
        }
        if inner.applied_transactions.contains(transaction_id) {
            if let Some(invoice) = inner.invoices.get(invoice_id) {
                return Ok(PaymentApplication::AlreadyApplied(invoice.clone()));
            }
        }
        inner.applied_transactions.insert(transaction_id.to_string());
        let invoice = inner
            .invoices
            .get_mut(invoice_id)
            .ok_or_else(|| PaymentLinkError::internal("invoice vanished during apply"))?;
        invoice.total_paid += amount;
        invoice.status = if invoice.total_paid >= invoice.amount_due {
            InvoiceStatus::Paid
        } else {
            InvoiceStatus::Partial
        };
        Ok(PaymentApplication::Applied(invoice.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_payment(invoice_id: &str, token: &str) -> NewPayment {
        let now = Utc::now();
        NewPayment {
            invoice_id: invoice_id.to_string(),
            token: token.to_string(),
            amount: 500,
            currency: "USD".to_string(),
            created_at: now,
            expires_at: now + chrono::Duration::hours(24),
        }
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicate_token() {
        let store = InMemoryPaymentStore::new();
        store.insert(new_payment("inv1", "tok")).await.unwrap();

        let err = store.insert(new_payment("inv2", "tok")).await.unwrap_err();
        assert!(matches!(err, PaymentLinkError::TokenCollision { .. }));
    }

    #[tokio::test]
    async fn test_insert_unless_active_reuses_pending() {
        let store = InMemoryPaymentStore::new();
        let now = Utc::now();

        let first = store
            .insert_unless_active(new_payment("inv1", "tok1"), now)
            .await
            .unwrap();
        assert!(first.was_created());

        let second = store
            .insert_unless_active(new_payment("inv1", "tok2"), now)
            .await
            .unwrap();
        assert!(!second.was_created());
        assert_eq!(second.payment().token, "tok1");
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_insert_unless_active_ignores_expired_pending() {
        let store = InMemoryPaymentStore::new();
        let now = Utc::now();

        let mut stale = new_payment("inv1", "tok1");
        stale.expires_at = now - chrono::Duration::seconds(1);
        store.insert(stale).await.unwrap();

        let outcome = store
            .insert_unless_active(new_payment("inv1", "tok2"), now)
            .await
            .unwrap();
        assert!(outcome.was_created());
    }

    #[tokio::test]
    async fn test_transition_applies_only_from_open_states() {
        let store = InMemoryPaymentStore::new();
        store.insert(new_payment("inv1", "tok")).await.unwrap();

        let completed = PaymentState::Completed {
            transaction_id: "tx_1".to_string(),
            processed_at: Utc::now(),
        };
        let outcome = store.transition("tok", completed, None).await.unwrap();
        assert!(matches!(outcome, TransitionOutcome::Applied(_)));

        // Second transition out of a terminal state must conflict.
        let expired = PaymentState::Expired {
            processed_at: Utc::now(),
        };
        let outcome = store.transition("tok", expired, None).await.unwrap();
        let TransitionOutcome::Conflict(current) = outcome else {
            panic!("expected conflict");
        };
        assert_eq!(current.status(), PaymentStatus::Completed);
    }

    #[tokio::test]
    async fn test_transition_from_failed_is_allowed() {
        let store = InMemoryPaymentStore::new();
        store.insert(new_payment("inv1", "tok")).await.unwrap();

        let failed = PaymentState::Failed {
            reason: "declined".to_string(),
            processed_at: Utc::now(),
        };
        store.transition("tok", failed, None).await.unwrap();

        let completed = PaymentState::Completed {
            transaction_id: "tx_2".to_string(),
            processed_at: Utc::now(),
        };
        let outcome = store.transition("tok", completed, None).await.unwrap();
        assert!(matches!(outcome, TransitionOutcome::Applied(_)));
    }

    #[tokio::test]
    async fn test_set_amount_rejects_non_pending() {
        let store = InMemoryPaymentStore::new();
        store.insert(new_payment("inv1", "tok")).await.unwrap();

        let outcome = store.set_amount_if_pending("tok", 750).await.unwrap();
        let TransitionOutcome::Applied(payment) = outcome else {
            panic!("expected applied");
        };
        assert_eq!(payment.amount, 750);

        let expired = PaymentState::Expired {
            processed_at: Utc::now(),
        };
        store.transition("tok", expired, None).await.unwrap();

        let outcome = store.set_amount_if_pending("tok", 100).await.unwrap();
        assert!(matches!(outcome, TransitionOutcome::Conflict(_)));
    }

    #[tokio::test]
    async fn test_sweep_is_idempotent() {
        let store = InMemoryPaymentStore::new();
        let now = Utc::now();

        let mut stale = new_payment("inv1", "tok1");
        stale.expires_at = now - chrono::Duration::seconds(1);
        store.insert(stale).await.unwrap();
        store.insert(new_payment("inv2", "tok2")).await.unwrap();

        assert_eq!(store.sweep_expired(now).await.unwrap(), 1);
        assert_eq!(store.sweep_expired(now).await.unwrap(), 0);

        let swept = store.find_by_token("tok1").await.unwrap().unwrap();
        assert_eq!(swept.status(), PaymentStatus::Expired);
        assert_eq!(swept.processed_at(), Some(now));
    }

    #[tokio::test]
    async fn test_statistics() {
        let store = InMemoryPaymentStore::new();
        store.insert(new_payment("inv1", "tok1")).await.unwrap();
        store.insert(new_payment("inv2", "tok2")).await.unwrap();

        let completed = PaymentState::Completed {
            transaction_id: "tx_1".to_string(),
            processed_at: Utc::now(),
        };
        store.transition("tok1", completed, None).await.unwrap();

        let stats = store.statistics().await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.total_amount_collected, 500);
        assert!((stats.success_rate - 50.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_apply_payment_is_idempotent() {
        let ledger = InMemoryInvoiceLedger::new();
        ledger.seed_unpaid("inv1", "Acme Ltd", 500, "USD").await;

        let first = ledger.apply_payment("inv1", 500, "tx_1").await.unwrap();
        let PaymentApplication::Applied(invoice) = first else {
            panic!("expected applied");
        };
        assert_eq!(invoice.status, InvoiceStatus::Paid);
        assert_eq!(invoice.total_paid, 500);

        let replay = ledger.apply_payment("inv1", 500, "tx_1").await.unwrap();
        assert!(matches!(replay, PaymentApplication::AlreadyApplied(_)));
        assert_eq!(replay.invoice().total_paid, 500);
    }

    #[tokio::test]
    async fn test_partial_payment_marks_invoice_partial() {
        let ledger = InMemoryInvoiceLedger::new();
        ledger.seed_unpaid("inv1", "Acme Ltd", 500, "USD").await;

        let outcome = ledger.apply_payment("inv1", 200, "tx_1").await.unwrap();
        assert_eq!(outcome.invoice().status, InvoiceStatus::Partial);
        assert_eq!(outcome.invoice().total_paid, 200);
    }
}
