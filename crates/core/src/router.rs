//! Billing channel routing.
//!
//! Operator channel codes look like `<letters><digits>-<suffix>`. The shape of
//! the first two segments decides which backend owns the ticket:
//!
//! - 4 letters + 2 digits (`ABCD12-x`) routes to `RIAS_<digits>`
//! - 3 letters + 4 digits (`ABC1234-x`) routes to `KRUS`
//!
//! There are exactly two backends and a rejected create is retried on the
//! other one once, see [`alternate`].

use std::fmt;

use once_cell::sync::Lazy;
use regex_lite::Regex;
use thiserror::Error;

/// Identifier of the KRUS backend.
pub const KRUS: &str = "KRUS";

const RIAS_PREFIX: &str = "RIAS_";

static CHANNEL_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z]+)(\d+)-(.+)$").unwrap());

static ALTERNATE_DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d{2})\d{2}-.+").unwrap());

/// Routing errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("malformed channel code: {0}")]
    MalformedChannelCode(String),

    #[error("no alternate billing channel derivable from {0}")]
    NoAlternate(String),
}

/// Backend a ticket is routed to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BillingChannel {
    Krus,
    /// RIAS instance identified by a two digit segment (kept as text, `07` stays `07`).
    Rias(String),
}

impl fmt::Display for BillingChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BillingChannel::Krus => f.write_str(KRUS),
            BillingChannel::Rias(digits) => write!(f, "{RIAS_PREFIX}{digits}"),
        }
    }
}

/// Resolves the primary billing channel for an operator channel code.
pub fn resolve(operator_channel: &str) -> Result<BillingChannel, RouteError> {
    let malformed = || RouteError::MalformedChannelCode(operator_channel.to_string());
    let caps = CHANNEL_CODE.captures(operator_channel).ok_or_else(malformed)?;

    let prefix_len = caps.get(1).map_or(0, |m| m.as_str().len());
    let digits = caps.get(2).map_or("", |m| m.as_str());

    match (prefix_len, digits.len()) {
        (4, 2) => Ok(BillingChannel::Rias(digits.to_string())),
        (3, 4) => Ok(BillingChannel::Krus),
        _ => Err(malformed()),
    }
}

/// Picks the failover backend for a ticket currently routed to `current`.
///
/// From `KRUS` the RIAS instance is re-derived from the first two digits of the
/// code; from anything else the answer is always `KRUS`.
pub fn alternate(operator_channel: &str, current: &str) -> Result<BillingChannel, RouteError> {
    if current != KRUS {
        return Ok(BillingChannel::Krus);
    }

    ALTERNATE_DIGITS
        .captures(operator_channel)
        .and_then(|caps| caps.get(1))
        .map(|m| BillingChannel::Rias(m.as_str().to_string()))
        .ok_or_else(|| RouteError::NoAlternate(operator_channel.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_rias() {
        assert_eq!(
            resolve("ABCD12-x").unwrap(),
            BillingChannel::Rias("12".to_string())
        );
        assert_eq!(resolve("abcd07-some-suffix").unwrap().to_string(), "RIAS_07");
    }

    #[test]
    fn test_resolve_krus() {
        assert_eq!(resolve("ABC1234-x").unwrap(), BillingChannel::Krus);
        assert_eq!(resolve("xyz0001-a-b").unwrap().to_string(), "KRUS");
    }

    #[test]
    fn test_resolve_rejects_other_shapes() {
        for code in [
            "",
            "ABCD12",
            "ABCD123-x",
            "ABC12-x",
            "AB12-x",
            "ABCDE12-x",
            "ABCD12-",
            "12AB-x",
            "ABC 1234-x",
        ] {
            assert_eq!(
                resolve(code),
                Err(RouteError::MalformedChannelCode(code.to_string())),
                "{code} should be rejected"
            );
        }
    }

    #[test]
    fn test_alternate_from_krus_is_rias() {
        let alt = alternate("ABC1234-x", KRUS).unwrap();
        assert_eq!(alt, BillingChannel::Rias("12".to_string()));
        assert_ne!(alt.to_string(), KRUS);
    }

    #[test]
    fn test_alternate_from_rias_is_krus() {
        assert_eq!(alternate("ABCD12-x", "RIAS_12").unwrap(), BillingChannel::Krus);
        assert_eq!(alternate("ABC1234-x", "RIAS_07").unwrap(), BillingChannel::Krus);
        assert_eq!(alternate("anything", "").unwrap(), BillingChannel::Krus);
    }

    #[test]
    fn test_alternate_from_krus_without_digits() {
        assert_eq!(
            alternate("ABCD12-x", KRUS),
            Err(RouteError::NoAlternate("ABCD12-x".to_string()))
        );
    }

    #[test]
    fn test_resolve_is_deterministic() {
        for _ in 0..3 {
            assert_eq!(resolve("WXYZ99-q").unwrap().to_string(), "RIAS_99");
        }
    }
}
