//! Payment token issuance.
//!
//! Tokens are the external addressable handle for a payment link and act as
//! bearer credentials on public, unauthenticated endpoints, so they must be
//! unguessable and non-enumerable.

/// Mints unguessable, unique tokens for new payment links.
///
/// Implementations must be pure generation with no side effects.
pub trait TokenIssuer: Send + Sync {
    /// Produce a fresh token.
    ///
    /// The token must carry at least 128 bits of cryptographically strong
    /// randomness. Collisions are treated as fatal by the store's unique
    /// insert, never silently retried.
    fn mint(&self) -> String;
}

/// Default issuer backed by random (v4) UUIDs.
///
/// UUID v4 carries 122 random bits from the OS CSPRNG, which keeps the
/// collision probability negligible at any realistic issuance volume.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidTokenIssuer;

impl TokenIssuer for UuidTokenIssuer {
    fn mint(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

/// Deterministic issuers for testing.
#[cfg(any(test, feature = "test-support"))]
pub mod test {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Issues predictable `"{prefix}-{n}"` tokens for assertions.
    #[derive(Debug, Clone)]
    pub struct SequentialTokenIssuer {
        prefix: String,
        counter: Arc<AtomicU64>,
    }

    impl SequentialTokenIssuer {
        #[must_use]
        pub fn new(prefix: impl Into<String>) -> Self {
            Self {
                prefix: prefix.into(),
                counter: Arc::new(AtomicU64::new(0)),
            }
        }
    }

    impl TokenIssuer for SequentialTokenIssuer {
        fn mint(&self) -> String {
            let n = self.counter.fetch_add(1, Ordering::SeqCst);
            format!("{}-{}", self.prefix, n)
        }
    }

    /// Always returns the same token, for exercising collision handling.
    #[derive(Debug, Clone)]
    pub struct FixedTokenIssuer(pub String);

    impl TokenIssuer for FixedTokenIssuer {
        fn mint(&self) -> String {
            self.0.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_tokens_are_unique() {
        let issuer = UuidTokenIssuer;
        let tokens: HashSet<String> = (0..1000).map(|_| issuer.mint()).collect();
        assert_eq!(tokens.len(), 1000);
    }

    #[test]
    fn test_token_is_opaque_uuid() {
        let token = UuidTokenIssuer.mint();
        assert!(uuid::Uuid::parse_str(&token).is_ok());
    }

    #[test]
    fn test_sequential_issuer() {
        let issuer = test::SequentialTokenIssuer::new("tok");
        assert_eq!(issuer.mint(), "tok-0");
        assert_eq!(issuer.mint(), "tok-1");
    }
}
