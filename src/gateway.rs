//! Payment gateway adapter.
//!
//! The engine never talks to a card network directly; it drives a
//! [`PaymentGateway`] implementation. The bundled [`SimulatedGateway`]
//! models real-world behavior (fixed processing latency, ~5% decline rate)
//! for development. State-machine tests must inject one of the
//! deterministic gateways from [`test`] instead, never the random one.

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Card-like details submitted by the customer against a token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardDetails {
    pub card_number: String,
    pub cvv: String,
    pub expiry_date: String,
    #[serde(default)]
    pub cardholder_name: Option<String>,
}

impl CardDetails {
    /// Whether any required field is absent.
    #[must_use]
    pub fn is_incomplete(&self) -> bool {
        self.card_number.trim().is_empty()
            || self.cvv.trim().is_empty()
            || self.expiry_date.trim().is_empty()
    }

    /// Last four digits of the card number, for attempt metadata.
    /// Never persist more of the PAN than this.
    #[must_use]
    pub fn last4(&self) -> String {
        let digits: String = self.card_number.chars().filter(|c| c.is_ascii_digit()).collect();
        let start = digits.len().saturating_sub(4);
        digits[start..].to_string()
    }
}

/// The gateway's answer to an authorization request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayDecision {
    /// The charge was authorized.
    Approved,
    /// The charge was declined.
    Declined { reason: String },
}

impl GatewayDecision {
    #[must_use]
    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approved)
    }
}

/// Performs authorization against card-like details.
///
/// Stateless from the engine's perspective; implementations may have
/// internal latency. An adapter error is treated identically to a decline
/// by the reconciler.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn authorize(&self, details: &CardDetails) -> Result<GatewayDecision>;
}

/// Reference gateway simulation.
///
/// Declines immediately when card number, CVV, or expiry is missing;
/// otherwise sleeps for the configured processing delay and approves with
/// the configured probability (default 0.95, modeling real decline rates).
#[derive(Debug, Clone)]
pub struct SimulatedGateway {
    delay: std::time::Duration,
    approval_rate: f64,
}

impl SimulatedGateway {
    #[must_use]
    pub fn new(delay: std::time::Duration, approval_rate: f64) -> Self {
        Self {
            delay,
            approval_rate,
        }
    }

    /// Build from engine configuration.
    #[must_use]
    pub fn from_config(config: &crate::config::PaylinkConfig) -> Self {
        Self::new(config.simulated_delay(), config.approval_rate)
    }
}

impl Default for SimulatedGateway {
    fn default() -> Self {
        Self::new(std::time::Duration::from_millis(1000), 0.95)
    }
}

#[async_trait]
impl PaymentGateway for SimulatedGateway {
    async fn authorize(&self, details: &CardDetails) -> Result<GatewayDecision> {
        if details.is_incomplete() {
            return Ok(GatewayDecision::Declined {
                reason: "missing card details".to_string(),
            });
        }

        tokio::time::sleep(self.delay).await;

        let roll: f64 = rand::thread_rng().gen();
        if roll < self.approval_rate {
            Ok(GatewayDecision::Approved)
        } else {
            Ok(GatewayDecision::Declined {
                reason: "card declined".to_string(),
            })
        }
    }
}

/// Deterministic gateways for testing.
#[cfg(any(test, feature = "test-support"))]
pub mod test {
    use super::*;
    use crate::error::PaymentLinkError;

    /// Approves every complete authorization request.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct ApproveAll;

    #[async_trait]
    impl PaymentGateway for ApproveAll {
        async fn authorize(&self, details: &CardDetails) -> Result<GatewayDecision> {
            if details.is_incomplete() {
                return Ok(GatewayDecision::Declined {
                    reason: "missing card details".to_string(),
                });
            }
            Ok(GatewayDecision::Approved)
        }
    }

    /// Declines every authorization request.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct DeclineAll;

    #[async_trait]
    impl PaymentGateway for DeclineAll {
        async fn authorize(&self, _details: &CardDetails) -> Result<GatewayDecision> {
            Ok(GatewayDecision::Declined {
                reason: "card declined".to_string(),
            })
        }
    }

    /// Errors on every authorization request, modeling a gateway outage.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct FailingGateway;

    #[async_trait]
    impl PaymentGateway for FailingGateway {
        async fn authorize(&self, _details: &CardDetails) -> Result<GatewayDecision> {
            Err(PaymentLinkError::internal("gateway connection reset"))
        }
    }

    /// Never answers, for exercising the reconciler's timeout.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct HangingGateway;

    #[async_trait]
    impl PaymentGateway for HangingGateway {
        async fn authorize(&self, _details: &CardDetails) -> Result<GatewayDecision> {
            // Long enough that only a timeout can end the call.
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
            Ok(GatewayDecision::Approved)
        }
    }

    /// A complete, well-formed card for test scenarios.
    #[must_use]
    pub fn valid_card() -> CardDetails {
        CardDetails {
            card_number: "4242424242424242".to_string(),
            cvv: "123".to_string(),
            expiry_date: "12/29".to_string(),
            cardholder_name: Some("Jo Customer".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_simulated_gateway_declines_incomplete_details() {
        let gateway = SimulatedGateway::new(std::time::Duration::ZERO, 1.0);
        let card = CardDetails {
            card_number: "4242424242424242".to_string(),
            cvv: String::new(),
            expiry_date: "12/29".to_string(),
            cardholder_name: None,
        };

        let decision = gateway.authorize(&card).await.unwrap();
        assert_eq!(
            decision,
            GatewayDecision::Declined {
                reason: "missing card details".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_simulated_gateway_extremes_are_deterministic() {
        let card = test::valid_card();

        let always = SimulatedGateway::new(std::time::Duration::ZERO, 1.0);
        assert!(always.authorize(&card).await.unwrap().is_approved());

        let never = SimulatedGateway::new(std::time::Duration::ZERO, 0.0);
        assert!(!never.authorize(&card).await.unwrap().is_approved());
    }

    #[test]
    fn test_last4() {
        assert_eq!(test::valid_card().last4(), "4242");
        let short = CardDetails {
            card_number: "42".to_string(),
            cvv: "1".to_string(),
            expiry_date: "1/30".to_string(),
            cardholder_name: None,
        };
        assert_eq!(short.last4(), "42");
    }
}
