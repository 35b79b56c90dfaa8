//! Payment processing and reconciliation.
//!
//! Drives a token through the gateway and commits the terminal outcome:
//! the payment record persists first, then the invoice ledger is updated.
//! A crash between the two effects is recoverable through
//! [`Reconciler::reconcile_outstanding`], which replays the ledger update
//! keyed on the transaction id.

use chrono::{DateTime, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::error::{PaymentLinkError, Result};
use crate::gateway::{CardDetails, GatewayDecision, PaymentGateway};
use crate::ledger::{InvoiceLedger, PaymentApplication};
use crate::storage::{Metadata, Payment, PaymentState, PaymentStore, TransitionOutcome};

/// Commits payment outcomes and keeps the invoice ledger in line with them.
#[derive(Clone)]
pub struct Reconciler<S, L, G, C> {
    store: S,
    ledger: L,
    gateway: G,
    clock: C,
    gateway_timeout: std::time::Duration,
}

impl<S, L, G, C> Reconciler<S, L, G, C>
where
    S: PaymentStore,
    L: InvoiceLedger,
    G: PaymentGateway,
    C: Clock,
{
    pub fn new(
        store: S,
        ledger: L,
        gateway: G,
        clock: C,
        gateway_timeout: std::time::Duration,
    ) -> Self {
        Self {
            store,
            ledger,
            gateway,
            clock,
            gateway_timeout,
        }
    }

    /// Process a payment attempt against a token.
    ///
    /// Preconditions are checked in order, first violation wins:
    ///
    /// 1. a payment must exist for the token;
    /// 2. it must still be open: a completed, expired or refunded payment
    ///    rejects with its current status (a successful attempt consumes
    ///    the link; a failed one does not, so retries of a declined
    ///    payment pass this check);
    /// 3. its TTL must not have elapsed. Expiry discovered here is
    ///    persisted, not just reported.
    ///
    /// Then the gateway is invoked under a hard timeout. Approval commits
    /// `completed` via compare-and-set (under concurrent identical calls
    /// exactly one wins, the rest observe `InvalidState`) and the invoice
    /// is updated strictly afterwards. A decline (or adapter error or
    /// timeout, treated identically) records the failure without consuming
    /// the link and surfaces the reason.
    pub async fn process_payment(&self, token: &str, details: &CardDetails) -> Result<Payment> {
        let payment = self.store.find_by_token(token).await?.ok_or_else(|| {
            PaymentLinkError::PaymentNotFound {
                token: token.to_string(),
            }
        })?;

        if !payment.state.is_open() {
            return Err(PaymentLinkError::InvalidState {
                token: token.to_string(),
                status: payment.status(),
            });
        }

        let now = self.clock.now();
        if now >= payment.expires_at {
            // State-mutating failure path: record the expiry before
            // rejecting. A conflict means someone else already moved it.
            self.store
                .transition(token, PaymentState::Expired { processed_at: now }, None)
                .await?;
            info!(token, "payment link expired at use time");
            return Err(PaymentLinkError::Expired {
                token: token.to_string(),
            });
        }

        match self.authorize(details).await {
            Ok(GatewayDecision::Approved) => self.commit_success(&payment, details).await,
            Ok(GatewayDecision::Declined { reason }) => {
                self.record_failure(token, &reason).await?;
                Err(PaymentLinkError::GatewayDeclined { reason })
            }
            Err(err) => {
                // Adapter errors and timeouts are declines as far as the
                // link is concerned: recorded, retryable, not consumed.
                self.record_failure(token, &err.to_string()).await?;
                Err(err)
            }
        }
    }

    /// Replay the invoice update for completed payments whose invoice has
    /// not caught up (crash between the payment persist and the ledger
    /// update). Returns how many invoices were brought in line. Idempotent:
    /// the ledger skips transaction ids it has already applied.
    pub async fn reconcile_outstanding(&self) -> Result<u64> {
        let completed = self
            .store
            .list_by_status(crate::storage::PaymentStatus::Completed)
            .await?;

        let mut repaired = 0;
        for payment in completed {
            let Some(transaction_id) = payment.transaction_id() else {
                continue;
            };
            match self
                .ledger
                .apply_payment(&payment.invoice_id, payment.amount, transaction_id)
                .await
            {
                Ok(PaymentApplication::Applied(invoice)) => {
                    repaired += 1;
                    info!(
                        invoice_id = %invoice.id,
                        transaction_id,
                        "reconciliation replay updated invoice"
                    );
                }
                Ok(PaymentApplication::AlreadyApplied(_)) => {}
                Err(PaymentLinkError::InvoiceNotFound { invoice_id }) => {
                    warn!(invoice_id, transaction_id, "completed payment references missing invoice");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(repaired)
    }

    async fn authorize(&self, details: &CardDetails) -> Result<GatewayDecision> {
        match tokio::time::timeout(self.gateway_timeout, self.gateway.authorize(details)).await {
            Ok(decision) => decision,
            Err(_) => Err(PaymentLinkError::GatewayTimeout {
                timeout_secs: self.gateway_timeout.as_secs(),
            }),
        }
    }

    async fn commit_success(&self, payment: &Payment, details: &CardDetails) -> Result<Payment> {
        let now = self.clock.now();
        let transaction_id = generate_transaction_id(now);
        let next = PaymentState::Completed {
            transaction_id: transaction_id.clone(),
            processed_at: now,
        };

        let outcome = self
            .store
            .transition(&payment.token, next, Some(attempt_metadata(details)))
            .await?;
        let completed = match outcome {
            TransitionOutcome::Applied(p) => p,
            TransitionOutcome::Conflict(current) => {
                // A concurrent attempt won the race after our gateway call.
                return Err(PaymentLinkError::InvalidState {
                    token: payment.token.clone(),
                    status: current.status(),
                });
            }
            TransitionOutcome::NotFound => {
                return Err(PaymentLinkError::internal(
                    "payment vanished during completion",
                ));
            }
        };

        info!(
            token = %completed.token,
            invoice_id = %completed.invoice_id,
            transaction_id = %transaction_id,
            amount = completed.amount,
            "payment completed"
        );

        // The payment is durably completed from here on; a ledger failure
        // is repaired by reconcile_outstanding, never rolled back.
        if let Err(err) = self
            .ledger
            .apply_payment(&completed.invoice_id, completed.amount, &transaction_id)
            .await
        {
            error!(
                invoice_id = %completed.invoice_id,
                transaction_id = %transaction_id,
                error = %err,
                "invoice update failed after payment completion; will be replayed"
            );
        }

        Ok(completed)
    }

    async fn record_failure(&self, token: &str, reason: &str) -> Result<()> {
        let now = self.clock.now();
        let next = PaymentState::Failed {
            reason: reason.to_string(),
            processed_at: now,
        };
        match self.store.transition(token, next, None).await? {
            TransitionOutcome::Applied(_) => {
                info!(token, reason, "payment attempt failed; link remains retryable");
            }
            TransitionOutcome::Conflict(current) => {
                warn!(
                    token,
                    status = %current.status(),
                    "failure not recorded; payment concurrently left its open state"
                );
            }
            TransitionOutcome::NotFound => {
                return Err(PaymentLinkError::internal("payment vanished during failure"));
            }
        }
        Ok(())
    }
}

/// Unique per attempt: millisecond timestamp plus a random suffix.
fn generate_transaction_id(now: DateTime<Utc>) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(char::from)
        .collect();
    format!("tx_{}_{}", now.timestamp_millis(), suffix.to_lowercase())
}

/// Attempt details worth keeping. Card secrets never persist; only the
/// last four digits and the cardholder name reach the metadata.
fn attempt_metadata(details: &CardDetails) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert("payment_method".to_string(), "credit_card".into());
    metadata.insert("card_last4".to_string(), details.last4().into());
    if let Some(name) = &details.cardholder_name {
        metadata.insert("cardholder_name".to_string(), name.clone().into());
    }
    metadata
}
