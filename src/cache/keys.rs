//! Type-safe cache key builders

use std::fmt;

pub const VERSION: &str = "v1";

pub mod exchange_rate {
    use super::*;

    pub const NAMESPACE: &str = "rate";

    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    pub struct CurrencyPairKey {
        pub from_currency: String,
        pub to_currency: String,
    }

    impl CurrencyPairKey {
        /// Currency codes are upper-cased so `eur/usd` and `EUR/USD` share an entry
        pub fn new(from_currency: impl Into<String>, to_currency: impl Into<String>) -> Self {
            Self {
                from_currency: from_currency.into().to_uppercase(),
                to_currency: to_currency.into().to_uppercase(),
            }
        }

        /// Match-all pattern for every cached pair
        pub fn pattern() -> String {
            format!("{}:{}:*", VERSION, NAMESPACE)
        }

        /// Inverse of `Display`, used when listing cached pairs
        pub fn parse(key: &str) -> Option<Self> {
            let mut parts = key.split(':');
            match (parts.next(), parts.next(), parts.next(), parts.next(), parts.next()) {
                (Some(VERSION), Some(NAMESPACE), Some(from), Some(to), None)
                    if !from.is_empty() && !to.is_empty() =>
                {
                    Some(Self::new(from, to))
                }
                _ => None,
            }
        }
    }

    impl fmt::Display for CurrencyPairKey {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(
                f,
                "{}:{}:{}:{}",
                VERSION, NAMESPACE, self.from_currency, self.to_currency
            )
        }
    }
}

pub mod pending_payment {
    use super::*;

    pub const NAMESPACE: &str = "pending_payment";

    #[derive(Debug, Clone)]
    pub struct PendingPaymentKey {
        pub correlation_id: String,
    }

    impl PendingPaymentKey {
        pub fn new(correlation_id: impl Into<String>) -> Self {
            Self {
                correlation_id: correlation_id.into(),
            }
        }

        pub fn pattern() -> String {
            format!("{}:{}:*", VERSION, NAMESPACE)
        }
    }

    impl fmt::Display for PendingPaymentKey {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}:{}:{}", VERSION, NAMESPACE, self.correlation_id)
        }
    }
}
