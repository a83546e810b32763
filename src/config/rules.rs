//! Forwarding rules.
//!
//! # Responsibilities
//! - Validate source and destination address grammar
//! - Tag wildcard sources (`*@domain`, `*.sub@domain`)
//! - Parse the `FORWARD_RULES` mini-language
//!
//! # Design Decisions
//! - A `ForwardingRule` can only be built through `ForwardingRule::new`, so an
//!   invalid rule never exists
//! - A bad entry is dropped with a warning; it never aborts parsing

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// Domain labels exclude path separators so a domain is always a safe
// single directory name.
static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s/\\.]+(\.[^@\s/\\.]+)+$").expect("email pattern is valid")
});

static WILDCARD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\*|\*\.[^@\s]+)@[^@\s/\\.]+(\.[^@\s/\\.]+)+$")
        .expect("wildcard pattern is valid")
});

static DOMAIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^@\s/\\.]+(\.[^@\s/\\.]+)*$").expect("domain pattern is valid")
});

/// Separator between entries in `FORWARD_RULES`.
pub const ENTRY_SEPARATOR: char = ';';

/// Separator between source and destination inside an entry.
pub const PAIR_SEPARATOR: char = ':';

/// Why a single rule was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleError {
    #[error("invalid wildcard format: {0}")]
    InvalidWildcard(String),

    #[error("invalid source email: {0}")]
    InvalidSource(String),

    #[error("invalid destination email: {0}")]
    InvalidDestination(String),

    #[error("entry has no ':' separator: {0}")]
    MissingSeparator(String),
}

/// One source address (or wildcard) forwarded to one destination.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "UncheckedRule")]
pub struct ForwardingRule {
    source: String,
    destination: String,
    is_wildcard: bool,
}

#[derive(Deserialize)]
struct UncheckedRule {
    source: String,
    destination: String,
    #[serde(default)]
    is_wildcard: bool,
}

impl TryFrom<UncheckedRule> for ForwardingRule {
    type Error = RuleError;

    fn try_from(raw: UncheckedRule) -> Result<Self, Self::Error> {
        ForwardingRule::new(raw.source, raw.destination, raw.is_wildcard)
    }
}

impl ForwardingRule {
    /// Build a rule, checking both addresses.
    pub fn new(
        source: impl Into<String>,
        destination: impl Into<String>,
        is_wildcard: bool,
    ) -> Result<Self, RuleError> {
        let source = source.into();
        let destination = destination.into();

        if is_wildcard {
            if !WILDCARD.is_match(&source) {
                return Err(RuleError::InvalidWildcard(source));
            }
        } else if !is_valid_email(&source) {
            return Err(RuleError::InvalidSource(source));
        }

        if !is_valid_email(&destination) {
            return Err(RuleError::InvalidDestination(destination));
        }

        Ok(Self {
            source,
            destination,
            is_wildcard,
        })
    }

    /// Build a rule, detecting the wildcard flag from the source syntax.
    pub fn detect(source: &str, destination: &str) -> Result<Self, RuleError> {
        Self::new(source, destination, is_wildcard_source(source))
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn is_wildcard(&self) -> bool {
        self.is_wildcard
    }

    /// Domain part of the source, if it has one.
    pub fn domain(&self) -> Option<&str> {
        self.source.split_once('@').map(|(_, domain)| domain)
    }

    /// Left-hand side for a postfix virtual alias table. Postfix spells a
    /// catch-all as `@domain`.
    pub fn alias_key(&self) -> &str {
        match self.source.strip_prefix('*') {
            Some(rest) if rest.starts_with('@') => rest,
            _ => &self.source,
        }
    }
}

/// Strict single-recipient address check.
pub fn is_valid_email(address: &str) -> bool {
    EMAIL.is_match(address)
}

/// Dot-separated non-empty labels with no path separators. Single labels
/// such as `localhost` pass.
pub fn is_valid_domain(domain: &str) -> bool {
    DOMAIN.is_match(domain)
}

/// Purely syntactic wildcard detection.
pub fn is_wildcard_source(source: &str) -> bool {
    source.starts_with("*@") || source.starts_with("*.")
}

/// Outcome of parsing `FORWARD_RULES`.
#[derive(Debug, Default)]
pub struct ParsedRules {
    pub rules: Vec<ForwardingRule>,
    /// Entries that were dropped, in input order.
    pub rejected: Vec<RuleError>,
}

/// Parse `source:destination;source:destination`.
///
/// Each rejected entry is logged at `warn` and recorded in
/// [`ParsedRules::rejected`].
pub fn parse_rules(value: &str) -> ParsedRules {
    let mut parsed = ParsedRules::default();

    for entry in value.split(ENTRY_SEPARATOR) {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }

        let result = match entry.split_once(PAIR_SEPARATOR) {
            Some((source, destination)) => {
                ForwardingRule::detect(source.trim(), destination.trim())
            }
            None => Err(RuleError::MissingSeparator(entry.to_string())),
        };

        match result {
            Ok(rule) => {
                tracing::debug!(
                    source = %rule.source(),
                    destination = %rule.destination(),
                    wildcard = rule.is_wildcard(),
                    "Parsed forwarding rule"
                );
                parsed.rules.push(rule);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Skipping invalid forwarding rule");
                parsed.rejected.push(e);
            }
        }
    }

    parsed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_plain_rule() {
        let rule = ForwardingRule::new("alice@example.com", "bob@other.net", false).unwrap();
        assert_eq!(rule.domain(), Some("example.com"));
        assert!(!rule.is_wildcard());
    }

    #[test]
    fn test_invalid_addresses_rejected() {
        for bad in ["alice", "alice@localhost", "@", "alice@@example.com", "a b@example.com", ""] {
            assert!(
                ForwardingRule::new(bad, "bob@other.net", false).is_err(),
                "{bad} should be rejected as a source"
            );
            assert!(
                ForwardingRule::new("alice@example.com", bad, false).is_err(),
                "{bad} should be rejected as a destination"
            );
        }
    }

    #[test]
    fn test_wildcard_rules() {
        let catch_all = ForwardingRule::new("*@example.org", "all@other.net", true).unwrap();
        assert_eq!(catch_all.domain(), Some("example.org"));
        assert_eq!(catch_all.alias_key(), "@example.org");

        let sub = ForwardingRule::new("*.lists@example.org", "lists@other.net", true).unwrap();
        assert_eq!(sub.alias_key(), "*.lists@example.org");

        assert_eq!(
            ForwardingRule::new("*", "all@other.net", true),
            Err(RuleError::InvalidWildcard("*".into()))
        );
        assert!(ForwardingRule::new("alice@example.org", "all@other.net", true).is_err());
    }

    #[test]
    fn test_domains_cannot_escape_directories() {
        for bad in ["alice@../../x", "alice@example.com/..", "alice@a..com", "alice@a\\b.com"] {
            assert!(ForwardingRule::detect(bad, "bob@other.net").is_err(), "{bad}");
        }
        assert!(ForwardingRule::detect("*@../etc.d", "bob@other.net").is_err());

        assert!(is_valid_domain("mail.example.com"));
        assert!(is_valid_domain("localhost"));
        for bad in ["", "..", "../x", "a/b.com", ".example.com", "example.com.", "a..b"] {
            assert!(!is_valid_domain(bad), "{bad}");
        }
    }

    #[test]
    fn test_wildcard_detection() {
        assert!(is_wildcard_source("*@example.com"));
        assert!(is_wildcard_source("*.sub@example.com"));
        assert!(!is_wildcard_source("alice@example.com"));
        assert!(!is_wildcard_source("*"));
    }

    #[test]
    fn test_parse_rules() {
        let parsed = parse_rules("alice@example.com:bob@other.com;*@example.org:catchall@other.com");
        assert_eq!(parsed.rules.len(), 2);
        assert_eq!(parsed.rules[0].source(), "alice@example.com");
        assert!(!parsed.rules[0].is_wildcard());
        assert_eq!(parsed.rules[1].source(), "*@example.org");
        assert!(parsed.rules[1].is_wildcard());
        assert!(parsed.rejected.is_empty());
    }

    #[test]
    fn test_parse_rules_drops_bad_entries() {
        let parsed = parse_rules(" a@x.com : b@y.com ;no-colon; ;bad:also@y.com;");
        assert_eq!(parsed.rules.len(), 1);
        assert_eq!(parsed.rules[0].source(), "a@x.com");
        assert_eq!(parsed.rules[0].destination(), "b@y.com");
        assert_eq!(
            parsed.rejected,
            vec![
                RuleError::MissingSeparator("no-colon".into()),
                RuleError::InvalidSource("bad".into()),
            ]
        );
    }

    #[test]
    fn test_deserialize_validates() {
        let ok: Result<ForwardingRule, _> =
            serde_json::from_str(r#"{"source":"a@x.com","destination":"b@y.com"}"#);
        assert!(ok.is_ok());

        let bad: Result<ForwardingRule, _> =
            serde_json::from_str(r#"{"source":"a","destination":"b@y.com"}"#);
        assert!(bad.is_err());
    }
}
