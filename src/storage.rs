//! Payment records and the storage trait.
//!
//! Implement [`PaymentStore`] to persist payments to your database. An
//! in-memory implementation is provided in [`crate::memory`] for testing
//! and single-instance deployments.
//!
//! Every state-changing operation is conditional: transitions out of the
//! open states use compare-and-set semantics keyed on the current state,
//! never plain read-then-write, so two concurrent processing attempts
//! against the same token cannot both succeed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Free-form key/value payload attached to a payment.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

// =============================================================================
// Payment state
// =============================================================================

/// The processing state of a payment, as a tagged variant.
///
/// Invalid field combinations (a transaction id on a failed payment, a
/// "used" flag alongside a failed status) are unrepresentable by
/// construction. Whether a link has been consumed is derived: a payment is
/// used exactly when it is `Completed` (or post-terminally `Refunded`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PaymentState {
    /// Awaiting a processing attempt. The link is live until `expires_at`.
    Pending,
    /// The gateway accepted the authorization. Terminal; consumes the link.
    Completed {
        transaction_id: String,
        processed_at: DateTime<Utc>,
    },
    /// The gateway declined or errored. Does not consume the link: the
    /// customer may retry the same token until it expires.
    Failed {
        reason: String,
        processed_at: DateTime<Utc>,
    },
    /// The TTL elapsed before a successful attempt. Terminal.
    Expired { processed_at: DateTime<Utc> },
    /// Post-terminal: an external refund action reversed a completed
    /// payment. Recorded as data only; no refund flow lives in this crate.
    Refunded {
        refund_id: Option<String>,
        processed_at: DateTime<Utc>,
    },
}

impl PaymentState {
    /// The flat status value for filtering and statistics.
    #[must_use]
    pub fn status(&self) -> PaymentStatus {
        match self {
            Self::Pending => PaymentStatus::Pending,
            Self::Completed { .. } => PaymentStatus::Completed,
            Self::Failed { .. } => PaymentStatus::Failed,
            Self::Expired { .. } => PaymentStatus::Expired,
            Self::Refunded { .. } => PaymentStatus::Refunded,
        }
    }

    /// Whether a transition out of this state is still permitted.
    ///
    /// `Pending` and `Failed` are the only open states: a decline leaves
    /// the link retryable, while `Completed`, `Expired` and `Refunded` are
    /// absorbing.
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::Failed { .. })
    }
}

/// Flat payment status derived from [`PaymentState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Expired,
    Refunded,
}

impl PaymentStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Expired => "expired",
            Self::Refunded => "refunded",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Payment record
// =============================================================================

/// A stored payment record.
///
/// Created and mutated exclusively by the engine. Many payments may
/// reference one invoice over time (history), but at most one may be
/// pending and unexpired at any instant; [`PaymentStore::insert_unless_active`]
/// enforces that.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    /// Store-assigned identity.
    pub id: String,
    /// The invoice this payment pays down.
    pub invoice_id: String,
    /// Unique, unguessable bearer token. Immutable once assigned.
    pub token: String,
    /// Amount in minor currency units. Seeded from the invoice's
    /// outstanding balance at issuance.
    pub amount: i64,
    /// ISO currency code (e.g. "USD").
    pub currency: String,
    /// Processing state.
    #[serde(flatten)]
    pub state: PaymentState,
    /// Issuance time.
    pub created_at: DateTime<Utc>,
    /// Issuance time + TTL. Immutable.
    pub expires_at: DateTime<Utc>,
    /// Attempt details recorded during processing.
    #[serde(default)]
    pub metadata: Metadata,
}

impl Payment {
    /// Flat status for filtering and display.
    #[must_use]
    pub fn status(&self) -> PaymentStatus {
        self.state.status()
    }

    /// Whether the link has been consumed by a successful attempt.
    #[must_use]
    pub fn is_used(&self) -> bool {
        matches!(
            self.state,
            PaymentState::Completed { .. } | PaymentState::Refunded { .. }
        )
    }

    /// Whether the TTL has elapsed for a payment that is still open.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.state.is_open() && now >= self.expires_at
    }

    /// The transaction id, if the payment completed.
    #[must_use]
    pub fn transaction_id(&self) -> Option<&str> {
        match &self.state {
            PaymentState::Completed { transaction_id, .. } => Some(transaction_id),
            _ => None,
        }
    }

    /// The failure reason, if the last attempt was declined.
    #[must_use]
    pub fn failure_reason(&self) -> Option<&str> {
        match &self.state {
            PaymentState::Failed { reason, .. } => Some(reason),
            _ => None,
        }
    }

    /// When the payment last left `pending`, if it has.
    #[must_use]
    pub fn processed_at(&self) -> Option<DateTime<Utc>> {
        match &self.state {
            PaymentState::Pending => None,
            PaymentState::Completed { processed_at, .. }
            | PaymentState::Failed { processed_at, .. }
            | PaymentState::Expired { processed_at }
            | PaymentState::Refunded { processed_at, .. } => Some(*processed_at),
        }
    }
}

/// A payment to be inserted. The store assigns the record id.
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub invoice_id: String,
    pub token: String,
    pub amount: i64,
    pub currency: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

// =============================================================================
// Operation outcomes
// =============================================================================

/// Outcome of [`PaymentStore::insert_unless_active`].
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    /// No active pending payment existed; a new record was created.
    Created(Payment),
    /// An active pending payment already covers this invoice; it is
    /// returned unchanged and nothing was inserted.
    Existing(Payment),
}

impl InsertOutcome {
    #[must_use]
    pub fn payment(&self) -> &Payment {
        match self {
            Self::Created(p) | Self::Existing(p) => p,
        }
    }

    #[must_use]
    pub fn into_payment(self) -> Payment {
        match self {
            Self::Created(p) | Self::Existing(p) => p,
        }
    }

    #[must_use]
    pub fn was_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// Outcome of a conditional state transition.
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    /// The expected precondition held and the update was applied.
    Applied(Payment),
    /// The record was concurrently moved to a state that forbids the
    /// update; the current record is returned untouched.
    Conflict(Payment),
    /// No record exists for the token.
    NotFound,
}

/// Read-only aggregates over the store at query time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PaymentStatistics {
    pub total: u64,
    pub pending: u64,
    pub completed: u64,
    pub failed: u64,
    pub expired: u64,
    pub refunded: u64,
    /// Sum of `amount` over completed payments, in minor units.
    pub total_amount_collected: i64,
    /// completed / total, in percent. Zero when no payments exist.
    pub success_rate: f64,
}

// =============================================================================
// Storage trait
// =============================================================================

/// Durable keyed storage for payment records.
///
/// # Atomicity
///
/// Production implementations MUST make [`insert_unless_active`],
/// [`transition`], [`set_amount_if_pending`] and [`sweep_expired`] atomic at
/// the storage layer (a conditional `UPDATE ... WHERE` in SQL, a conditional
/// write in a document store, a partial unique index for the single-active
/// constraint). The provided in-memory store serializes them under a single
/// write lock.
///
/// [`insert_unless_active`]: PaymentStore::insert_unless_active
/// [`transition`]: PaymentStore::transition
/// [`set_amount_if_pending`]: PaymentStore::set_amount_if_pending
/// [`sweep_expired`]: PaymentStore::sweep_expired
#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Insert a new payment unconditionally.
    ///
    /// Must enforce token uniqueness and fail with
    /// [`PaymentLinkError::TokenCollision`](crate::PaymentLinkError::TokenCollision)
    /// on a duplicate.
    async fn insert(&self, new_payment: NewPayment) -> Result<Payment>;

    /// Insert a new payment unless the invoice already has an active
    /// pending one (pending, unused, unexpired at `now`).
    ///
    /// The lookup and insert must be a single atomic step: this is the
    /// store-enforced "one active pending payment per invoice" constraint
    /// that keeps concurrent link requests from minting two live tokens.
    async fn insert_unless_active(
        &self,
        new_payment: NewPayment,
        now: DateTime<Utc>,
    ) -> Result<InsertOutcome>;

    /// Look up a payment by its token.
    async fn find_by_token(&self, token: &str) -> Result<Option<Payment>>;

    /// Look up a payment by its store-assigned id.
    async fn find_by_id(&self, id: &str) -> Result<Option<Payment>>;

    /// All payments referencing an invoice, newest first.
    async fn find_by_invoice(&self, invoice_id: &str) -> Result<Vec<Payment>>;

    /// Conditionally move a payment to `next`.
    ///
    /// Applies only while the current state is open (`pending` or
    /// `failed`); returns [`TransitionOutcome::Conflict`] with the current
    /// record otherwise. This is the compare-and-set that guarantees
    /// at-most-one successful transition to `completed` per token.
    async fn transition(
        &self,
        token: &str,
        next: PaymentState,
        metadata: Option<Metadata>,
    ) -> Result<TransitionOutcome>;

    /// Conditionally overwrite the amount of a payment that is still
    /// `pending`.
    async fn set_amount_if_pending(&self, token: &str, amount: i64) -> Result<TransitionOutcome>;

    /// Move every open payment whose TTL elapsed before `now` to
    /// `expired`, stamping the processing time. Returns the number of
    /// records changed. Idempotent; safe to run concurrently with itself
    /// and with individual validations.
    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<u64>;

    /// All payments currently in the given status.
    async fn list_by_status(&self, status: PaymentStatus) -> Result<Vec<Payment>>;

    /// Aggregate counts and totals at query time.
    async fn statistics(&self) -> Result<PaymentStatistics>;
}
