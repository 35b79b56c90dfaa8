//! Configuration for the payment link engine.

use serde::{Deserialize, Serialize};

use crate::error::{PaymentLinkError, Result};

/// Main configuration for the payment link engine.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PaylinkConfig {
    /// Time-to-live for newly issued links, in hours (default: 24).
    #[serde(default = "default_link_ttl_hours")]
    pub link_ttl_hours: i64,
    /// Public base URL used when rendering payment links
    /// (the token is appended as `/payment/{token}`).
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Hard timeout for a single gateway authorization call, in seconds.
    #[serde(default = "default_gateway_timeout_secs")]
    pub gateway_timeout_secs: u64,
    /// Processing delay of the simulated gateway, in milliseconds.
    #[serde(default = "default_simulated_delay_ms")]
    pub simulated_delay_ms: u64,
    /// Approval probability of the simulated gateway (0.0 - 1.0).
    #[serde(default = "default_approval_rate")]
    pub approval_rate: f64,
}

fn default_link_ttl_hours() -> i64 {
    24
}

fn default_base_url() -> String {
    "http://localhost:3001".to_string()
}

fn default_gateway_timeout_secs() -> u64 {
    10
}

fn default_simulated_delay_ms() -> u64 {
    1000
}

fn default_approval_rate() -> f64 {
    0.95
}

impl Default for PaylinkConfig {
    fn default() -> Self {
        Self {
            link_ttl_hours: default_link_ttl_hours(),
            base_url: default_base_url(),
            gateway_timeout_secs: default_gateway_timeout_secs(),
            simulated_delay_ms: default_simulated_delay_ms(),
            approval_rate: default_approval_rate(),
        }
    }
}

impl PaylinkConfig {
    /// Link TTL as a chrono duration.
    #[must_use]
    pub fn link_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.link_ttl_hours)
    }

    /// Gateway timeout as a std duration.
    #[must_use]
    pub fn gateway_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.gateway_timeout_secs)
    }

    /// Simulated gateway delay as a std duration.
    #[must_use]
    pub fn simulated_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.simulated_delay_ms)
    }

    /// Render the customer-facing link for a token.
    #[must_use]
    pub fn link_for_token(&self, token: &str) -> String {
        format!("{}/payment/{}", self.base_url.trim_end_matches('/'), token)
    }
}

/// Get environment variable with `PAYLINK_` prefix, falling back to the
/// unprefixed name.
fn get_env_with_prefix(key: &str) -> Option<String> {
    std::env::var(format!("PAYLINK_{}", key))
        .or_else(|_| std::env::var(key))
        .ok()
}

/// Builder for [`PaylinkConfig`] with environment variable support.
#[must_use = "builder does nothing until you call build()"]
pub struct PaylinkConfigBuilder {
    config: PaylinkConfig,
}

impl PaylinkConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: PaylinkConfig::default(),
        }
    }

    pub fn with_link_ttl_hours(mut self, hours: i64) -> Self {
        self.config.link_ttl_hours = hours;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.config.base_url = base_url.into();
        self
    }

    pub fn with_gateway_timeout_secs(mut self, secs: u64) -> Self {
        self.config.gateway_timeout_secs = secs;
        self
    }

    pub fn with_simulated_delay_ms(mut self, millis: u64) -> Self {
        self.config.simulated_delay_ms = millis;
        self
    }

    pub fn with_approval_rate(mut self, rate: f64) -> Self {
        self.config.approval_rate = rate;
        self
    }

    /// Load configuration from environment variables with `PAYLINK_` prefix.
    pub fn from_env(mut self) -> Self {
        if let Some(hours) = get_env_with_prefix("LINK_TTL_HOURS") {
            if let Ok(h) = hours.parse() {
                self.config.link_ttl_hours = h;
            }
        }
        if let Some(url) = get_env_with_prefix("BASE_URL") {
            self.config.base_url = url;
        }
        if let Some(secs) = get_env_with_prefix("GATEWAY_TIMEOUT_SECS") {
            if let Ok(s) = secs.parse() {
                self.config.gateway_timeout_secs = s;
            }
        }
        if let Some(millis) = get_env_with_prefix("SIMULATED_DELAY_MS") {
            if let Ok(m) = millis.parse() {
                self.config.simulated_delay_ms = m;
            }
        }
        if let Some(rate) = get_env_with_prefix("APPROVAL_RATE") {
            if let Ok(r) = rate.parse() {
                self.config.approval_rate = r;
            }
        }
        self
    }

    /// Validate and build the configuration.
    pub fn build(self) -> Result<PaylinkConfig> {
        if self.config.link_ttl_hours <= 0 {
            return Err(PaymentLinkError::validation(
                "link_ttl_hours must be positive",
            ));
        }
        if self.config.base_url.trim().is_empty() {
            return Err(PaymentLinkError::validation("base_url must not be empty"));
        }
        if self.config.gateway_timeout_secs == 0 {
            return Err(PaymentLinkError::validation(
                "gateway_timeout_secs must be positive",
            ));
        }
        if !(0.0..=1.0).contains(&self.config.approval_rate) {
            return Err(PaymentLinkError::validation(
                "approval_rate must be between 0.0 and 1.0",
            ));
        }
        Ok(self.config)
    }
}

impl Default for PaylinkConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
