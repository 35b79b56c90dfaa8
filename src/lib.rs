#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Paylink - payment link lifecycle and reconciliation engine.
//!
//! Mints single-use, time-bounded payment tokens for invoices, guards
//! against duplicate or concurrent token issuance, drives each token
//! through a processing state machine against a pluggable payment gateway,
//! and reconciles the outcome back onto the owning invoice.
//!
//! # Features
//!
//! - **Idempotent issuance**: re-requesting a link before expiry returns
//!   the same token; the store enforces one active pending payment per
//!   invoice
//! - **At-most-one use**: transitions out of `pending` are compare-and-set,
//!   so concurrent processing attempts against one token cannot both win
//! - **Lazy expiry**: over-TTL links are expired on read, with an explicit
//!   sweep for bulk cleanup
//! - **Crash-safe reconciliation**: the payment record commits before the
//!   invoice update, and a replay pass repairs any gap between the two
//! - **Injectable seams**: store, ledger, gateway, clock and token issuer
//!   are traits with deterministic test implementations
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use paylink::{
//!     PaylinkApp, PaylinkConfigBuilder, SimulatedGateway, SystemClock, UuidTokenIssuer,
//!     memory::{InMemoryInvoiceLedger, InMemoryPaymentStore},
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     paylink::init_tracing();
//!
//!     let config = PaylinkConfigBuilder::new().from_env().build()?;
//!     let gateway = SimulatedGateway::from_config(&config);
//!
//!     let app = PaylinkApp::new(
//!         InMemoryPaymentStore::new(),
//!         InMemoryInvoiceLedger::new(),
//!         gateway,
//!         SystemClock,
//!         UuidTokenIssuer,
//!         config,
//!     );
//!
//!     let router = paylink::routes::router(app);
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//!     axum::serve(listener, router).await?;
//!     Ok(())
//! }
//! ```

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub mod clock;
mod config;
mod error;
pub mod gateway;
pub mod ledger;
pub mod lifecycle;
pub mod memory;
pub mod reconcile;
pub mod routes;
pub mod storage;
pub mod token;

// Re-exports for public API
pub use clock::{Clock, SystemClock};
pub use config::{PaylinkConfig, PaylinkConfigBuilder};
pub use error::{ErrorResponse, PaymentLinkError, Result};
pub use gateway::{CardDetails, GatewayDecision, PaymentGateway, SimulatedGateway};
pub use ledger::{Invoice, InvoiceLedger, InvoiceStatus, PaymentApplication};
pub use lifecycle::{IssuedLink, LinkManager, PaymentPage};
pub use reconcile::Reconciler;
pub use routes::PaylinkApp;
pub use storage::{
    InsertOutcome, Metadata, NewPayment, Payment, PaymentState, PaymentStatistics, PaymentStatus,
    PaymentStore, TransitionOutcome,
};
pub use token::{TokenIssuer, UuidTokenIssuer};

/// Initialize tracing with sensible defaults.
///
/// Reads the filter from `RUST_LOG` (defaulting to `info`) and switches to
/// JSON output when `PAYLINK_LOG_JSON=true`.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json_logs = std::env::var("PAYLINK_LOG_JSON")
        .map(|v| v.parse::<bool>().unwrap_or(false))
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
