//! Correlation tokens linking a gateway callback back to the user who paid
//!
//! Token layout: `{user}-{timestamp_ms}-{nonce}-v1{mac}` for refills and
//! `{user}-{plan}-{timestamp_ms}-{nonce}-v1{mac}` for subscriptions, where
//! `mac` is the first 12 hex digits of HMAC-SHA256(secret, body). The user id
//! stays the leading segment so operators can read it off a log line.

use crate::payments::utils::{hmac_sha256_hex, secure_eq};
use chrono::Utc;
use std::fmt;

const VERSION_PREFIX: &str = "v1";
const MAC_HEX_LEN: usize = 12;
const NONCE_MODULUS: u32 = 1_000_000;

/// Largest integer a JSON/JavaScript consumer can hold exactly (2^53 - 1)
pub const MAX_SAFE_ORDER_ID: u64 = 9_007_199_254_740_991;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CorrelationError {
    #[error("malformed correlation token: {0}")]
    Malformed(String),

    #[error("correlation token signature mismatch")]
    BadSignature,

    #[error("invalid user id in correlation token")]
    InvalidUserId,

    #[error("cannot derive gateway order id: {0}")]
    IdGeneration(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationId {
    pub user_id: i64,
    pub plan_id: Option<i64>,
    pub timestamp_ms: i64,
    pub nonce: u32,
}

impl CorrelationId {
    fn body(&self) -> String {
        match self.plan_id {
            Some(plan_id) => format!(
                "{}-{}-{}-{}",
                self.user_id, plan_id, self.timestamp_ms, self.nonce
            ),
            None => format!("{}-{}-{}", self.user_id, self.timestamp_ms, self.nonce),
        }
    }

    /// Numeric order id for gateways that only accept integers:
    /// user id, last three digits of the epoch second, then the full nonce.
    /// Two ids for one user only collide when both the second (mod 1000)
    /// and the six-digit nonce match.
    pub fn gateway_order_id(&self) -> Result<u64, CorrelationError> {
        let seconds = (self.timestamp_ms / 1000).rem_euclid(1000);
        let raw = format!(
            "{}{:03}{:06}",
            self.user_id,
            seconds,
            self.nonce % NONCE_MODULUS
        );

        let order_id: u64 = raw
            .parse()
            .map_err(|_| CorrelationError::IdGeneration(format!("'{}' overflows u64", raw)))?;

        if order_id > MAX_SAFE_ORDER_ID {
            return Err(CorrelationError::IdGeneration(format!(
                "{} exceeds {}",
                order_id, MAX_SAFE_ORDER_ID
            )));
        }

        Ok(order_id)
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.body())
    }
}

/// Issues and verifies signed correlation tokens
#[derive(Clone)]
pub struct CorrelationSigner {
    secret: Vec<u8>,
}

impl CorrelationSigner {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
        }
    }

    /// Fresh id for a payment about to be initiated
    pub fn issue(
        &self,
        user_id: i64,
        plan_id: Option<i64>,
    ) -> Result<CorrelationId, CorrelationError> {
        if user_id <= 0 {
            return Err(CorrelationError::InvalidUserId);
        }

        Ok(CorrelationId {
            user_id,
            plan_id,
            timestamp_ms: Utc::now().timestamp_millis(),
            nonce: (uuid::Uuid::new_v4().as_u128() % NONCE_MODULUS as u128) as u32,
        })
    }

    fn mac(&self, body: &str) -> String {
        let mut mac = hmac_sha256_hex(&self.secret, body.as_bytes());
        mac.truncate(MAC_HEX_LEN);
        mac
    }

    pub fn token(&self, id: &CorrelationId) -> String {
        let body = id.body();
        let mac = self.mac(&body);
        format!("{}-{}{}", body, VERSION_PREFIX, mac)
    }

    /// Verify and decode a token
    pub fn parse(&self, token: &str) -> Result<CorrelationId, CorrelationError> {
        let token = token.trim();
        let (body, tag) = token
            .rsplit_once('-')
            .ok_or_else(|| CorrelationError::Malformed("missing signature segment".to_string()))?;

        let mac = tag
            .strip_prefix(VERSION_PREFIX)
            .filter(|mac| mac.len() == MAC_HEX_LEN)
            .ok_or_else(|| {
                CorrelationError::Malformed("unsupported token version".to_string())
            })?;

        if !secure_eq(self.mac(body).as_bytes(), mac.to_ascii_lowercase().as_bytes()) {
            return Err(CorrelationError::BadSignature);
        }

        let parts: Vec<&str> = body.split('-').collect();
        let numbers = parts
            .iter()
            .map(|p| p.parse::<i64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| CorrelationError::Malformed("non-numeric segment".to_string()))?;

        let (user_id, plan_id, timestamp_ms, nonce) = match numbers.as_slice() {
            [user, ts, nonce] => (*user, None, *ts, *nonce),
            [user, plan, ts, nonce] => (*user, Some(*plan), *ts, *nonce),
            _ => {
                return Err(CorrelationError::Malformed(format!(
                    "expected 3 or 4 segments, found {}",
                    parts.len()
                )))
            }
        };

        if user_id <= 0 {
            return Err(CorrelationError::InvalidUserId);
        }

        let nonce = u32::try_from(nonce)
            .map_err(|_| CorrelationError::Malformed("nonce out of range".to_string()))?;

        Ok(CorrelationId {
            user_id,
            plan_id,
            timestamp_ms,
            nonce,
        })
    }
}

/// Positive integer before the first `-`, without any signature check.
/// Only for the legacy webhook, whose order ids predate signed tokens.
pub fn leading_user_id(raw: &str) -> Option<i64> {
    raw.trim()
        .split('-')
        .next()
        .and_then(|segment| segment.parse::<i64>().ok())
        .filter(|id| *id > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> CorrelationSigner {
        CorrelationSigner::new("test-correlation-secret")
    }

    #[test]
    fn test_token_recovers_user() {
        let signer = signer();
        let id = signer.issue(42, None).unwrap();
        let token = signer.token(&id);

        assert!(token.starts_with("42-"));
        assert_eq!(signer.parse(&token).unwrap(), id);
        assert_eq!(leading_user_id(&token), Some(42));
    }

    #[test]
    fn test_subscription_token() {
        let signer = signer();
        let id = signer.issue(7, Some(3)).unwrap();
        let parsed = signer.parse(&signer.token(&id)).unwrap();
        assert_eq!(parsed.user_id, 7);
        assert_eq!(parsed.plan_id, Some(3));
    }

    #[test]
    fn test_tampered_token_rejected() {
        let signer = signer();
        let id = signer.issue(42, None).unwrap();
        let token = signer.token(&id);

        let forged = token.replacen("42-", "43-", 1);
        assert_eq!(signer.parse(&forged), Err(CorrelationError::BadSignature));

        let other = CorrelationSigner::new("another-secret-value");
        assert_eq!(other.parse(&token), Err(CorrelationError::BadSignature));
    }

    #[test]
    fn test_malformed_tokens() {
        let signer = signer();
        assert!(matches!(
            signer.parse("not-a-token"),
            Err(CorrelationError::Malformed(_))
        ));
        assert!(matches!(
            signer.parse("4217000000001"),
            Err(CorrelationError::Malformed(_))
        ));
        assert!(matches!(
            signer.parse(""),
            Err(CorrelationError::Malformed(_))
        ));
    }

    #[test]
    fn test_issue_rejects_non_positive_user() {
        assert_eq!(
            signer().issue(0, None),
            Err(CorrelationError::InvalidUserId)
        );
    }

    #[test]
    fn test_gateway_order_id() {
        let id = CorrelationId {
            user_id: 42,
            plan_id: None,
            timestamp_ms: 1_700_000_123_456,
            nonce: 123_017,
        };
        // 42 + "123" + "123017"
        assert_eq!(id.gateway_order_id().unwrap(), 42_123_123_017);
    }

    #[test]
    fn test_gateway_order_id_keeps_whole_nonce() {
        let id = |nonce| CorrelationId {
            user_id: 42,
            plan_id: None,
            timestamp_ms: 1_700_000_123_456,
            nonce,
        };
        // Same user, same second, nonces equal modulo 1000
        assert_ne!(
            id(1_017).gateway_order_id().unwrap(),
            id(2_017).gateway_order_id().unwrap()
        );
    }

    #[test]
    fn test_gateway_order_id_limit() {
        let at_limit = CorrelationId {
            user_id: 9_007_199,
            plan_id: None,
            timestamp_ms: 254_000,
            nonce: 740_991,
        };
        assert_eq!(at_limit.gateway_order_id().unwrap(), MAX_SAFE_ORDER_ID);

        let over = CorrelationId {
            nonce: 740_992,
            ..at_limit
        };
        assert!(matches!(
            over.gateway_order_id(),
            Err(CorrelationError::IdGeneration(_))
        ));
    }

    #[test]
    fn test_leading_user_id() {
        assert_eq!(leading_user_id("15-1700000000000-99"), Some(15));
        assert_eq!(leading_user_id("abc-1"), None);
        assert_eq!(leading_user_id("0-1"), None);
        assert_eq!(leading_user_id("-5"), None);
    }
}
