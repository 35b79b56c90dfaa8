//! Link lifecycle management.
//!
//! Decides whether to reuse an existing active link or mint a new one,
//! enforces lazy expiry, and exposes the operator maintenance operations
//! (amount override, expiry sweep, statistics).

use serde::Serialize;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::config::PaylinkConfig;
use crate::error::{PaymentLinkError, Result};
use crate::ledger::{Invoice, InvoiceLedger, InvoiceStatus};
use crate::storage::{
    NewPayment, Payment, PaymentState, PaymentStatistics, PaymentStore, TransitionOutcome,
};
use crate::token::TokenIssuer;

/// A link handed to a caller: the bearer token plus the rendered URL.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedLink {
    pub token: String,
    pub link: String,
    /// Whether this call minted the payment (false = reused an active one).
    pub created: bool,
    #[serde(skip)]
    pub payment: Payment,
}

/// Read model for the hosted payment page, shown to a customer holding a
/// valid token. Exposes nothing beyond what the customer already knows.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentPage {
    pub token: String,
    pub amount: i64,
    pub currency: String,
    pub expires_at: chrono::DateTime<chrono::Utc>,
    pub customer_name: String,
    pub invoice_amount_due: i64,
}

/// Core state machine for payment links.
///
/// Generic over the store, ledger, clock and token issuer so tests can
/// inject deterministic implementations of each seam.
#[derive(Clone)]
pub struct LinkManager<S, L, C, T> {
    store: S,
    ledger: L,
    clock: C,
    issuer: T,
    config: PaylinkConfig,
}

impl<S, L, C, T> LinkManager<S, L, C, T>
where
    S: PaymentStore,
    L: InvoiceLedger,
    C: Clock,
    T: TokenIssuer,
{
    pub fn new(store: S, ledger: L, clock: C, issuer: T, config: PaylinkConfig) -> Self {
        Self {
            store,
            ledger,
            clock,
            issuer,
            config,
        }
    }

    /// Get the invoice's active link, minting one if none exists.
    ///
    /// Idempotent by intent: a customer who re-requests a link before it
    /// expires gets the same token back, so one invoice never has multiple
    /// confusing active links through this path. The amount is read from
    /// the ledger at issuance (the invoice's outstanding balance), so a
    /// link never exists with an unset amount.
    ///
    /// Rejects paid invoices; `force_new_link` is the operator override.
    pub async fn get_or_create_link(&self, invoice_id: &str) -> Result<IssuedLink> {
        let invoice = self.require_invoice(invoice_id).await?;
        if invoice.status == InvoiceStatus::Paid {
            return Err(PaymentLinkError::InvoiceAlreadyPaid {
                invoice_id: invoice_id.to_string(),
            });
        }

        let now = self.clock.now();
        let outcome = self
            .store
            .insert_unless_active(self.new_payment(&invoice, now), now)
            .await?;

        let created = outcome.was_created();
        let payment = outcome.into_payment();
        let link = self.config.link_for_token(&payment.token);

        if created {
            self.ledger.set_payment_link(invoice_id, &link).await?;
            info!(
                invoice_id,
                token = %payment.token,
                expires_at = %payment.expires_at,
                "issued payment link"
            );
        }

        Ok(IssuedLink {
            token: payment.token.clone(),
            link,
            created,
            payment,
        })
    }

    /// Always mint a fresh link, bypassing the reuse lookup.
    ///
    /// Prior pending payments are left untouched and remain valid until
    /// their own TTL or use: two live links can coexist for one invoice
    /// after this call. That relaxation is deliberate (explicit
    /// re-issuance) and logged.
    pub async fn force_new_link(&self, invoice_id: &str) -> Result<IssuedLink> {
        let invoice = self.require_invoice(invoice_id).await?;

        let now = self.clock.now();
        let payment = self.store.insert(self.new_payment(&invoice, now)).await?;
        let link = self.config.link_for_token(&payment.token);
        self.ledger.set_payment_link(invoice_id, &link).await?;

        warn!(
            invoice_id,
            token = %payment.token,
            "force-issued payment link; prior pending links stay valid until their TTL"
        );

        Ok(IssuedLink {
            token: payment.token.clone(),
            link,
            created: true,
            payment,
        })
    }

    /// Whether the token is still usable: pending, unused, unexpired.
    ///
    /// Not read-only: an over-TTL pending payment is transitioned to
    /// `expired` before `false` is returned. This lazy expiry-on-read is
    /// the only expiry enforcement unless `sweep_expired` runs.
    pub async fn validate_link(&self, token: &str) -> Result<bool> {
        let Some(payment) = self.store.find_by_token(token).await? else {
            return Ok(false);
        };

        let now = self.clock.now();
        if payment.is_expired_at(now) {
            self.expire(token, now).await?;
            return Ok(false);
        }

        // Pending implies unused; failed, completed, expired and refunded
        // links all answer false here.
        Ok(payment.state == PaymentState::Pending)
    }

    /// Public read model for the payment page. Unlike `validate_link`,
    /// the caller learns why an unusable link is unusable.
    pub async fn payment_page(&self, token: &str) -> Result<PaymentPage> {
        let payment = self.require_open_payment(token).await?;
        let invoice = self.require_invoice(&payment.invoice_id).await?;

        Ok(PaymentPage {
            token: payment.token,
            amount: payment.amount,
            currency: payment.currency,
            expires_at: payment.expires_at,
            customer_name: invoice.customer_name,
            invoice_amount_due: invoice.amount_due,
        })
    }

    /// Operator override for a pending payment's amount.
    pub async fn set_amount(&self, token: &str, amount: i64) -> Result<Payment> {
        if amount < 0 {
            return Err(PaymentLinkError::validation("amount must not be negative"));
        }

        match self.store.set_amount_if_pending(token, amount).await? {
            TransitionOutcome::Applied(payment) => {
                info!(token, amount, "payment amount overridden");
                Ok(payment)
            }
            TransitionOutcome::Conflict(payment) => Err(PaymentLinkError::InvalidState {
                token: token.to_string(),
                status: payment.status(),
            }),
            TransitionOutcome::NotFound => Err(PaymentLinkError::PaymentNotFound {
                token: token.to_string(),
            }),
        }
    }

    /// Bulk-expire every open payment whose TTL has elapsed.
    pub async fn sweep_expired(&self) -> Result<u64> {
        let now = self.clock.now();
        let swept = self.store.sweep_expired(now).await?;
        if swept > 0 {
            info!(count = swept, "swept expired payment links");
        }
        Ok(swept)
    }

    /// Payment history for an invoice, newest first.
    pub async fn payments_for_invoice(&self, invoice_id: &str) -> Result<Vec<Payment>> {
        self.require_invoice(invoice_id).await?;
        self.store.find_by_invoice(invoice_id).await
    }

    /// Aggregate counts and totals at query time.
    pub async fn statistics(&self) -> Result<PaymentStatistics> {
        self.store.statistics().await
    }

    fn new_payment(&self, invoice: &Invoice, now: chrono::DateTime<chrono::Utc>) -> NewPayment {
        NewPayment {
            invoice_id: invoice.id.clone(),
            token: self.issuer.mint(),
            amount: invoice.outstanding(),
            currency: invoice.currency.clone(),
            created_at: now,
            expires_at: now + self.config.link_ttl(),
        }
    }

    async fn require_invoice(&self, invoice_id: &str) -> Result<Invoice> {
        self.ledger
            .get_invoice(invoice_id)
            .await?
            .ok_or_else(|| PaymentLinkError::InvoiceNotFound {
                invoice_id: invoice_id.to_string(),
            })
    }

    /// Fetch a payment that must still be usable, expiring it lazily if
    /// its TTL has elapsed.
    async fn require_open_payment(&self, token: &str) -> Result<Payment> {
        let payment = self.store.find_by_token(token).await?.ok_or_else(|| {
            PaymentLinkError::PaymentNotFound {
                token: token.to_string(),
            }
        })?;

        let now = self.clock.now();
        if payment.is_expired_at(now) {
            self.expire(token, now).await?;
            return Err(PaymentLinkError::Expired {
                token: token.to_string(),
            });
        }
        if payment.state != PaymentState::Pending {
            return Err(PaymentLinkError::InvalidState {
                token: token.to_string(),
                status: payment.status(),
            });
        }
        Ok(payment)
    }

    async fn expire(&self, token: &str, now: chrono::DateTime<chrono::Utc>) -> Result<()> {
        let outcome = self
            .store
            .transition(token, PaymentState::Expired { processed_at: now }, None)
            .await?;
        if matches!(outcome, TransitionOutcome::Applied(_)) {
            info!(token, "payment link expired on read");
        }
        // A conflict means another caller already moved it; nothing to do.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::test::ManualClock;
    use crate::memory::{InMemoryInvoiceLedger, InMemoryPaymentStore};
    use crate::storage::PaymentStatus;
    use crate::token::UuidTokenIssuer;
    use crate::token::test::FixedTokenIssuer;

    type TestManager =
        LinkManager<InMemoryPaymentStore, InMemoryInvoiceLedger, ManualClock, UuidTokenIssuer>;

    async fn manager() -> (TestManager, InMemoryPaymentStore, InMemoryInvoiceLedger, ManualClock)
    {
        let store = InMemoryPaymentStore::new();
        let ledger = InMemoryInvoiceLedger::new();
        let clock = ManualClock::from_system();
        ledger.seed_unpaid("inv1", "Acme Ltd", 500, "USD").await;

        let manager = LinkManager::new(
            store.clone(),
            ledger.clone(),
            clock.clone(),
            UuidTokenIssuer,
            PaylinkConfig::default(),
        );
        (manager, store, ledger, clock)
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let (manager, _, _, _) = manager().await;

        let first = manager.get_or_create_link("inv1").await.unwrap();
        let second = manager.get_or_create_link("inv1").await.unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.token, second.token);
        assert_eq!(first.link, second.link);
    }

    #[tokio::test]
    async fn test_amount_seeded_from_ledger_outstanding() {
        let (manager, _, ledger, _) = manager().await;
        ledger.apply_payment("inv1", 200, "tx_seed").await.unwrap();

        let issued = manager.get_or_create_link("inv1").await.unwrap();
        assert_eq!(issued.payment.amount, 300);
        assert_eq!(issued.payment.status(), PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn test_link_recorded_on_invoice() {
        let (manager, _, ledger, _) = manager().await;

        let issued = manager.get_or_create_link("inv1").await.unwrap();
        let invoice = ledger.get_invoice("inv1").await.unwrap().unwrap();
        assert_eq!(invoice.payment_link.as_deref(), Some(issued.link.as_str()));
        assert!(issued.link.ends_with(&format!("/payment/{}", issued.token)));
    }

    #[tokio::test]
    async fn test_unknown_invoice_rejected() {
        let (manager, _, _, _) = manager().await;
        let err = manager.get_or_create_link("missing").await.unwrap_err();
        assert!(matches!(err, PaymentLinkError::InvoiceNotFound { .. }));
    }

    #[tokio::test]
    async fn test_paid_invoice_rejected_without_override() {
        let (manager, _, ledger, _) = manager().await;
        ledger.apply_payment("inv1", 500, "tx_paid").await.unwrap();

        let err = manager.get_or_create_link("inv1").await.unwrap_err();
        assert!(matches!(err, PaymentLinkError::InvoiceAlreadyPaid { .. }));

        // Operator override still works.
        assert!(manager.force_new_link("inv1").await.is_ok());
    }

    #[tokio::test]
    async fn test_force_new_leaves_prior_link_valid() {
        let (manager, _, _, _) = manager().await;

        let first = manager.get_or_create_link("inv1").await.unwrap();
        let forced = manager.force_new_link("inv1").await.unwrap();

        assert_ne!(first.token, forced.token);
        assert!(manager.validate_link(&first.token).await.unwrap());
        assert!(manager.validate_link(&forced.token).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_link_reissues_new_token() {
        let (manager, _, _, clock) = manager().await;

        let first = manager.get_or_create_link("inv1").await.unwrap();
        clock.advance(chrono::Duration::hours(25));

        let second = manager.get_or_create_link("inv1").await.unwrap();
        assert!(second.created);
        assert_ne!(first.token, second.token);
    }

    #[tokio::test]
    async fn test_validate_expires_lazily() {
        let (manager, store, _, clock) = manager().await;

        let issued = manager.get_or_create_link("inv1").await.unwrap();
        clock.advance(chrono::Duration::hours(24) + chrono::Duration::seconds(1));

        assert!(!manager.validate_link(&issued.token).await.unwrap());
        let payment = store.find_by_token(&issued.token).await.unwrap().unwrap();
        assert_eq!(payment.status(), PaymentStatus::Expired);
    }

    #[tokio::test]
    async fn test_validate_unknown_token_is_false() {
        let (manager, _, _, _) = manager().await;
        assert!(!manager.validate_link("no-such-token").await.unwrap());
    }

    #[tokio::test]
    async fn test_set_amount_rejects_negative_and_non_pending() {
        let (manager, _, _, clock) = manager().await;
        let issued = manager.get_or_create_link("inv1").await.unwrap();

        let err = manager.set_amount(&issued.token, -1).await.unwrap_err();
        assert!(matches!(err, PaymentLinkError::Validation { .. }));

        let updated = manager.set_amount(&issued.token, 750).await.unwrap();
        assert_eq!(updated.amount, 750);

        clock.advance(chrono::Duration::hours(25));
        manager.sweep_expired().await.unwrap();
        let err = manager.set_amount(&issued.token, 100).await.unwrap_err();
        assert!(matches!(
            err,
            PaymentLinkError::InvalidState {
                status: PaymentStatus::Expired,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_sweep_counts_and_is_idempotent() {
        let (manager, _, ledger, clock) = manager().await;
        ledger.seed_unpaid("inv2", "Beta GmbH", 900, "EUR").await;

        manager.get_or_create_link("inv1").await.unwrap();
        manager.get_or_create_link("inv2").await.unwrap();
        clock.advance(chrono::Duration::hours(25));

        assert_eq!(manager.sweep_expired().await.unwrap(), 2);
        assert_eq!(manager.sweep_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_payment_page_reports_reason() {
        let (manager, _, _, clock) = manager().await;
        let issued = manager.get_or_create_link("inv1").await.unwrap();

        let page = manager.payment_page(&issued.token).await.unwrap();
        assert_eq!(page.amount, 500);
        assert_eq!(page.customer_name, "Acme Ltd");

        clock.advance(chrono::Duration::hours(25));
        let err = manager.payment_page(&issued.token).await.unwrap_err();
        assert!(matches!(err, PaymentLinkError::Expired { .. }));
    }

    #[tokio::test]
    async fn test_token_collision_is_fatal_not_retried() {
        let store = InMemoryPaymentStore::new();
        let ledger = InMemoryInvoiceLedger::new();
        ledger.seed_unpaid("inv1", "Acme Ltd", 500, "USD").await;
        ledger.seed_unpaid("inv2", "Beta GmbH", 900, "EUR").await;

        let manager = LinkManager::new(
            store,
            ledger,
            ManualClock::from_system(),
            FixedTokenIssuer("same-token".to_string()),
            PaylinkConfig::default(),
        );

        manager.get_or_create_link("inv1").await.unwrap();
        let err = manager.get_or_create_link("inv2").await.unwrap_err();
        assert!(matches!(err, PaymentLinkError::TokenCollision { .. }));
    }

    #[tokio::test]
    async fn test_history_newest_first() {
        let (manager, _, _, clock) = manager().await;

        let first = manager.force_new_link("inv1").await.unwrap();
        clock.advance(chrono::Duration::minutes(1));
        let second = manager.force_new_link("inv1").await.unwrap();

        let history = manager.payments_for_invoice("inv1").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].token, second.token);
        assert_eq!(history[1].token, first.token);
    }
}
