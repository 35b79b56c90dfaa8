//! HTTP surface for the engine.
//!
//! Produces a mountable [`Router`] with two groups of endpoints:
//!
//! - **Public**: reachable by an end customer holding only the bearer
//!   token: validate a link, fetch the payment page, submit card details.
//!   Responses are structured `{ success, message, ... }` payloads that
//!   leak nothing beyond the token the caller already holds.
//! - **Operator**: link issuance, amount override, expiry sweep,
//!   reconciliation replay and statistics. Authentication is a pre-check
//!   performed by an external gatekeeper before requests reach this
//!   router; mount it behind your auth middleware.

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post, put},
};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::config::PaylinkConfig;
use crate::error::Result;
use crate::gateway::{CardDetails, PaymentGateway};
use crate::ledger::InvoiceLedger;
use crate::lifecycle::{IssuedLink, LinkManager, PaymentPage};
use crate::reconcile::Reconciler;
use crate::storage::{Payment, PaymentStatistics, PaymentStore};
use crate::token::TokenIssuer;

/// The engine's two managers bundled as shared router state.
#[derive(Clone)]
pub struct PaylinkApp<S, L, G, C, T> {
    links: LinkManager<S, L, C, T>,
    reconciler: Reconciler<S, L, G, C>,
}

impl<S, L, G, C, T> PaylinkApp<S, L, G, C, T>
where
    S: PaymentStore + Clone,
    L: InvoiceLedger + Clone,
    G: PaymentGateway,
    C: Clock + Clone,
    T: TokenIssuer,
{
    pub fn new(
        store: S,
        ledger: L,
        gateway: G,
        clock: C,
        issuer: T,
        config: PaylinkConfig,
    ) -> Self {
        let gateway_timeout = config.gateway_timeout();
        Self {
            links: LinkManager::new(
                store.clone(),
                ledger.clone(),
                clock.clone(),
                issuer,
                config,
            ),
            reconciler: Reconciler::new(store, ledger, gateway, clock, gateway_timeout),
        }
    }

    pub fn links(&self) -> &LinkManager<S, L, C, T> {
        &self.links
    }

    pub fn reconciler(&self) -> &Reconciler<S, L, G, C> {
        &self.reconciler
    }
}

/// Build the payment routes over the given app state.
pub fn router<S, L, G, C, T>(app: PaylinkApp<S, L, G, C, T>) -> Router
where
    S: PaymentStore + Clone + 'static,
    L: InvoiceLedger + Clone + 'static,
    G: PaymentGateway + Clone + 'static,
    C: Clock + Clone + 'static,
    T: TokenIssuer + Clone + 'static,
{
    Router::new()
        // Public endpoints: the token is the only credential.
        .route("/payments/link/{token}/validate", get(validate_link))
        .route(
            "/payments/process/{token}",
            get(payment_page).post(process_payment),
        )
        // Operator endpoints: authorization happens upstream.
        .route("/payments/invoices/{invoice_id}/link", post(create_link))
        .route(
            "/payments/invoices/{invoice_id}/link/force",
            post(force_link),
        )
        .route("/payments/invoices/{invoice_id}", get(invoice_payments))
        .route("/payments/{token}/amount", put(set_amount))
        .route("/payments/cleanup", post(cleanup_expired))
        .route("/payments/reconcile", post(reconcile))
        .route("/payments/statistics", get(statistics))
        .with_state(app)
}

// =============================================================================
// Payloads
// =============================================================================

#[derive(Debug, Serialize)]
struct ValidateResponse {
    success: bool,
    valid: bool,
    message: String,
}

#[derive(Debug, Serialize)]
struct PageResponse {
    success: bool,
    #[serde(flatten)]
    page: PaymentPage,
}

#[derive(Debug, Serialize)]
struct ProcessResponse {
    success: bool,
    message: String,
    status: String,
    transaction_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct LinkResponse {
    success: bool,
    token: String,
    payment_link: String,
    created: bool,
}

impl From<IssuedLink> for LinkResponse {
    fn from(issued: IssuedLink) -> Self {
        Self {
            success: true,
            token: issued.token,
            payment_link: issued.link,
            created: issued.created,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SetAmountRequest {
    amount: i64,
}

#[derive(Debug, Serialize)]
struct CountResponse {
    success: bool,
    count: u64,
}

// =============================================================================
// Public handlers
// =============================================================================

async fn validate_link<S, L, G, C, T>(
    State(app): State<PaylinkApp<S, L, G, C, T>>,
    Path(token): Path<String>,
) -> Result<Json<ValidateResponse>>
where
    S: PaymentStore + Clone,
    L: InvoiceLedger + Clone,
    G: PaymentGateway,
    C: Clock + Clone,
    T: TokenIssuer,
{
    let valid = app.links.validate_link(&token).await?;
    let message = if valid {
        "Payment link is valid".to_string()
    } else {
        "Payment link has expired or is no longer valid".to_string()
    };
    Ok(Json(ValidateResponse {
        success: true,
        valid,
        message,
    }))
}

async fn payment_page<S, L, G, C, T>(
    State(app): State<PaylinkApp<S, L, G, C, T>>,
    Path(token): Path<String>,
) -> Result<Json<PageResponse>>
where
    S: PaymentStore + Clone,
    L: InvoiceLedger + Clone,
    G: PaymentGateway,
    C: Clock + Clone,
    T: TokenIssuer,
{
    let page = app.links.payment_page(&token).await?;
    Ok(Json(PageResponse {
        success: true,
        page,
    }))
}

async fn process_payment<S, L, G, C, T>(
    State(app): State<PaylinkApp<S, L, G, C, T>>,
    Path(token): Path<String>,
    Json(details): Json<CardDetails>,
) -> Result<Json<ProcessResponse>>
where
    S: PaymentStore + Clone,
    L: InvoiceLedger + Clone,
    G: PaymentGateway,
    C: Clock + Clone,
    T: TokenIssuer,
{
    let payment = app.reconciler.process_payment(&token, &details).await?;
    Ok(Json(ProcessResponse {
        success: true,
        message: "Payment processed successfully".to_string(),
        status: payment.status().to_string(),
        transaction_id: payment.transaction_id().map(str::to_string),
    }))
}

// =============================================================================
// Operator handlers
// =============================================================================

async fn create_link<S, L, G, C, T>(
    State(app): State<PaylinkApp<S, L, G, C, T>>,
    Path(invoice_id): Path<String>,
) -> Result<Json<LinkResponse>>
where
    S: PaymentStore + Clone,
    L: InvoiceLedger + Clone,
    G: PaymentGateway,
    C: Clock + Clone,
    T: TokenIssuer,
{
    let issued = app.links.get_or_create_link(&invoice_id).await?;
    Ok(Json(issued.into()))
}

async fn force_link<S, L, G, C, T>(
    State(app): State<PaylinkApp<S, L, G, C, T>>,
    Path(invoice_id): Path<String>,
) -> Result<Json<LinkResponse>>
where
    S: PaymentStore + Clone,
    L: InvoiceLedger + Clone,
    G: PaymentGateway,
    C: Clock + Clone,
    T: TokenIssuer,
{
    let issued = app.links.force_new_link(&invoice_id).await?;
    Ok(Json(issued.into()))
}

async fn invoice_payments<S, L, G, C, T>(
    State(app): State<PaylinkApp<S, L, G, C, T>>,
    Path(invoice_id): Path<String>,
) -> Result<Json<Vec<Payment>>>
where
    S: PaymentStore + Clone,
    L: InvoiceLedger + Clone,
    G: PaymentGateway,
    C: Clock + Clone,
    T: TokenIssuer,
{
    let payments = app.links.payments_for_invoice(&invoice_id).await?;
    Ok(Json(payments))
}

async fn set_amount<S, L, G, C, T>(
    State(app): State<PaylinkApp<S, L, G, C, T>>,
    Path(token): Path<String>,
    Json(request): Json<SetAmountRequest>,
) -> Result<Json<Payment>>
where
    S: PaymentStore + Clone,
    L: InvoiceLedger + Clone,
    G: PaymentGateway,
    C: Clock + Clone,
    T: TokenIssuer,
{
    let payment = app.links.set_amount(&token, request.amount).await?;
    Ok(Json(payment))
}

async fn cleanup_expired<S, L, G, C, T>(
    State(app): State<PaylinkApp<S, L, G, C, T>>,
) -> Result<Json<CountResponse>>
where
    S: PaymentStore + Clone,
    L: InvoiceLedger + Clone,
    G: PaymentGateway,
    C: Clock + Clone,
    T: TokenIssuer,
{
    let count = app.links.sweep_expired().await?;
    Ok(Json(CountResponse {
        success: true,
        count,
    }))
}

async fn reconcile<S, L, G, C, T>(
    State(app): State<PaylinkApp<S, L, G, C, T>>,
) -> Result<Json<CountResponse>>
where
    S: PaymentStore + Clone,
    L: InvoiceLedger + Clone,
    G: PaymentGateway,
    C: Clock + Clone,
    T: TokenIssuer,
{
    let count = app.reconciler.reconcile_outstanding().await?;
    Ok(Json(CountResponse {
        success: true,
        count,
    }))
}

async fn statistics<S, L, G, C, T>(
    State(app): State<PaylinkApp<S, L, G, C, T>>,
) -> Result<Json<PaymentStatistics>>
where
    S: PaymentStore + Clone,
    L: InvoiceLedger + Clone,
    G: PaymentGateway,
    C: Clock + Clone,
    T: TokenIssuer,
{
    Ok(Json(app.links.statistics().await?))
}
