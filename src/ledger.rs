//! The invoice ledger collaborator.
//!
//! The ledger owns invoices; the engine only needs a narrow slice of it:
//! read an invoice, record the live payment link, and apply a reconciled
//! payment. Implement [`InvoiceLedger`] over your invoice storage; an
//! in-memory implementation lives in [`crate::memory`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Invoice payment status as tracked by the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Unpaid,
    Paid,
    Partial,
    Overdue,
    Cancelled,
    Refunded,
}

impl InvoiceStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unpaid => "unpaid",
            Self::Paid => "paid",
            Self::Partial => "partial",
            Self::Overdue => "overdue",
            Self::Cancelled => "cancelled",
            Self::Refunded => "refunded",
        }
    }
}

impl std::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An invoice as the engine sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: String,
    pub customer_name: String,
    /// Amount due in minor currency units.
    pub amount_due: i64,
    /// ISO currency code.
    pub currency: String,
    pub status: InvoiceStatus,
    /// The most recently issued payment link, if any.
    pub payment_link: Option<String>,
    /// Accumulated reconciled payments, in minor units.
    pub total_paid: i64,
}

impl Invoice {
    /// The amount a new link should collect: what remains unpaid.
    #[must_use]
    pub fn outstanding(&self) -> i64 {
        (self.amount_due - self.total_paid).max(0)
    }
}

/// Outcome of [`InvoiceLedger::apply_payment`].
#[derive(Debug, Clone, PartialEq)]
pub enum PaymentApplication {
    /// The payment was applied and the invoice updated.
    Applied(Invoice),
    /// This transaction id was already applied; nothing changed.
    AlreadyApplied(Invoice),
}

impl PaymentApplication {
    #[must_use]
    pub fn invoice(&self) -> &Invoice {
        match self {
            Self::Applied(i) | Self::AlreadyApplied(i) => i,
        }
    }
}

/// The slice of the invoice system the engine depends on.
#[async_trait]
pub trait InvoiceLedger: Send + Sync {
    /// Fetch an invoice by id.
    async fn get_invoice(&self, invoice_id: &str) -> Result<Option<Invoice>>;

    /// Record the customer-facing link on the invoice.
    async fn set_payment_link(&self, invoice_id: &str, link: &str) -> Result<()>;

    /// Overwrite the invoice's payment status (operator action).
    async fn set_payment_status(&self, invoice_id: &str, status: InvoiceStatus) -> Result<()>;

    /// Apply a reconciled payment to the invoice.
    ///
    /// Must be idempotent on `transaction_id`: replaying reconciliation for
    /// an already-applied transaction must not double-count `total_paid`.
    /// Marks the invoice `paid` once `total_paid` covers `amount_due`,
    /// `partial` otherwise.
    async fn apply_payment(
        &self,
        invoice_id: &str,
        amount: i64,
        transaction_id: &str,
    ) -> Result<PaymentApplication>;
}
