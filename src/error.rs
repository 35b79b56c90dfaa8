//! Error types for payment link operations.
//!
//! Provides granular error variants for the lifecycle and reconciliation
//! paths, enabling precise HTTP status mapping and informative messages for
//! API consumers. Every variant except `StoreUnavailable` and `Internal` is
//! recoverable-and-reported: a failed customer payment attempt is never
//! fatal to the process.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::storage::PaymentStatus;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PaymentLinkError>;

/// The error type for payment link operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PaymentLinkError {
    /// No payment exists for the given token.
    #[error("Payment not found for token '{token}'")]
    PaymentNotFound { token: String },

    /// The referenced invoice does not exist in the ledger.
    #[error("Invoice not found: {invoice_id}")]
    InvoiceNotFound { invoice_id: String },

    /// The invoice is already paid and cannot accept a new link
    /// through the ordinary path.
    #[error("Invoice '{invoice_id}' is already paid")]
    InvoiceAlreadyPaid { invoice_id: String },

    /// The payment is in a state that does not permit the operation.
    #[error("Payment already {status}")]
    InvalidState { token: String, status: PaymentStatus },

    /// The link's TTL has elapsed. Discovering this at use time persists
    /// the `expired` state before the error is returned.
    #[error("Payment link has expired")]
    Expired { token: String },

    /// The gateway declined the authorization (or reported an error,
    /// which is treated identically).
    #[error("Payment declined: {reason}")]
    GatewayDeclined { reason: String },

    /// The gateway did not answer within the configured timeout.
    #[error("Payment gateway timed out after {timeout_secs}s")]
    GatewayTimeout { timeout_secs: u64 },

    /// Malformed input (negative amount, blank identifier, ...).
    #[error("Validation failed: {message}")]
    Validation { message: String },

    /// Two minted tokens collided. With 128-bit random tokens this is
    /// effectively unreachable; if observed it is fatal, never retried.
    #[error("Token collision detected for '{token}'")]
    TokenCollision { token: String },

    /// The payment record store cannot be reached. The core cannot make
    /// progress without it, so this escalates as unavailable.
    #[error("Payment store unavailable: {message}")]
    StoreUnavailable { message: String },

    /// An unexpected internal error.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl PaymentLinkError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn store_unavailable(message: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            message: message.into(),
        }
    }

    /// Whether this error is the caller's fault (4xx class).
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        !self.is_server_error()
    }

    /// Whether this error indicates a problem on our side (5xx class).
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            Self::TokenCollision { .. }
                | Self::StoreUnavailable { .. }
                | Self::Internal { .. }
                | Self::GatewayTimeout { .. }
        )
    }

    /// Whether retrying the same request can succeed without any
    /// intervening change.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::GatewayDeclined { .. }
                | Self::GatewayTimeout { .. }
                | Self::StoreUnavailable { .. }
        )
    }

    /// HTTP status classification per operator-facing semantics:
    /// not-found vs. bad-request vs. conflict vs. gone.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::PaymentNotFound { .. } | Self::InvoiceNotFound { .. } => StatusCode::NOT_FOUND,
            Self::InvoiceAlreadyPaid { .. } | Self::InvalidState { .. } => StatusCode::CONFLICT,
            Self::Expired { .. } => StatusCode::GONE,
            Self::GatewayDeclined { .. } => StatusCode::PAYMENT_REQUIRED,
            Self::GatewayTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::TokenCollision { .. } | Self::Internal { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::StoreUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Machine-readable error kind for response bodies.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PaymentNotFound { .. } => "payment_not_found",
            Self::InvoiceNotFound { .. } => "invoice_not_found",
            Self::InvoiceAlreadyPaid { .. } => "invoice_already_paid",
            Self::InvalidState { .. } => "invalid_state",
            Self::Expired { .. } => "expired",
            Self::GatewayDeclined { .. } => "gateway_declined",
            Self::GatewayTimeout { .. } => "gateway_timeout",
            Self::Validation { .. } => "validation",
            Self::TokenCollision { .. } => "token_collision",
            Self::StoreUnavailable { .. } => "store_unavailable",
            Self::Internal { .. } => "internal",
        }
    }
}

/// Standard error response format for API errors.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub message: String,
}

impl IntoResponse for PaymentLinkError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Server-side details stay in the logs, not the response body.
        let message = if self.is_server_error() {
            tracing::error!(error = %self, "payment link operation failed");
            "An internal error occurred".to_string()
        } else {
            self.to_string()
        };

        let body = ErrorResponse {
            success: false,
            error: self.kind().to_string(),
            message,
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PaymentLinkError::PaymentNotFound {
            token: "tok_123".to_string(),
        };
        assert_eq!(err.to_string(), "Payment not found for token 'tok_123'");

        let err = PaymentLinkError::InvalidState {
            token: "tok_123".to_string(),
            status: PaymentStatus::Completed,
        };
        assert_eq!(err.to_string(), "Payment already completed");
    }

    #[test]
    fn test_error_classification() {
        let err = PaymentLinkError::Expired {
            token: "tok_123".to_string(),
        };
        assert!(err.is_client_error());
        assert!(!err.is_server_error());
        assert!(!err.is_retryable());

        let err = PaymentLinkError::store_unavailable("connection refused");
        assert!(err.is_server_error());
        assert!(err.is_retryable());

        let err = PaymentLinkError::GatewayDeclined {
            reason: "card declined".to_string(),
        };
        assert!(err.is_client_error());
        assert!(err.is_retryable());
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            PaymentLinkError::PaymentNotFound {
                token: "t".to_string()
            }
            .status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            PaymentLinkError::Expired {
                token: "t".to_string()
            }
            .status_code(),
            StatusCode::GONE
        );
        assert_eq!(
            PaymentLinkError::InvalidState {
                token: "t".to_string(),
                status: PaymentStatus::Failed,
            }
            .status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            PaymentLinkError::GatewayDeclined {
                reason: "nope".to_string()
            }
            .status_code(),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            PaymentLinkError::store_unavailable("down").status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
