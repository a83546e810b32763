//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the forwarder.
//! All types derive Serde traits so the resolved configuration can be dumped
//! by the `config` subcommand.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::rules::ForwardingRule;

/// Set of lowercase domain names. Ordered so rendered files are stable.
pub type DomainSet = BTreeSet<String>;

/// Root configuration for the mail forwarder.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ForwarderConfig {
    /// Verbose logging and diagnostics.
    pub debug: bool,

    /// MTA settings (hostname, relay, listening ports, SASL users).
    pub smtp: SmtpConfig,

    /// DKIM signing settings.
    pub dkim: DkimConfig,

    /// Certificate settings.
    pub tls: TlsConfig,

    /// Sender Rewriting Scheme settings.
    pub srs: SrsConfig,

    /// Ban daemon settings.
    pub security: SecurityConfig,

    /// Forwarding rules in the order they were parsed.
    pub forwarding_rules: Vec<ForwardingRule>,
}

impl ForwarderConfig {
    /// Rules ordered by source address, as the alias map expects them.
    pub fn rules_by_source(&self) -> Vec<&ForwardingRule> {
        let mut rules: Vec<&ForwardingRule> = self.forwarding_rules.iter().collect();
        rules.sort_by(|a, b| a.source().cmp(b.source()));
        rules
    }

    /// Distinct domains appearing as rule sources.
    pub fn rule_domains(&self) -> DomainSet {
        self.forwarding_rules
            .iter()
            .filter_map(|rule| rule.domain())
            .map(str::to_ascii_lowercase)
            .collect()
    }
}

/// MTA configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SmtpConfig {
    /// Public hostname of this relay.
    pub hostname: String,

    /// HELO name; falls back to `hostname` when unset.
    pub helo_name: Option<String>,

    /// Upstream relay host.
    pub relay_host: Option<String>,

    /// Upstream relay port.
    pub relay_port: u16,

    pub relay_username: Option<String>,

    pub relay_password: Option<String>,

    /// Use TLS when talking to the relay.
    pub use_tls: bool,

    /// Listen on port 25.
    pub enable_smtp: bool,

    /// Listen on port 587.
    pub enable_submission: bool,

    /// Listen on port 465.
    pub enable_smtps: bool,

    /// Forced on whenever `smtp_users` is non-empty.
    pub smtp_auth_enabled: bool,

    /// SASL credentials, username to password.
    pub smtp_users: BTreeMap<String, String>,
}

impl SmtpConfig {
    /// The effective HELO name.
    pub fn helo(&self) -> &str {
        self.helo_name
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or(&self.hostname)
    }

    /// Parent domain of the hostname: everything after the first dot, or the
    /// hostname itself when it has no dot.
    pub fn parent_domain(&self) -> &str {
        match self.hostname.split_once('.') {
            Some((_, parent)) => parent,
            None => &self.hostname,
        }
    }

    /// True when relay credentials are complete.
    pub fn relay_auth(&self) -> Option<(&str, &str)> {
        match (self.relay_username.as_deref(), self.relay_password.as_deref()) {
            (Some(user), Some(pass)) if !user.is_empty() && !pass.is_empty() => Some((user, pass)),
            _ => None,
        }
    }
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            hostname: "mail.example.com".to_string(),
            helo_name: None,
            relay_host: None,
            relay_port: 25,
            relay_username: None,
            relay_password: None,
            use_tls: true,
            enable_smtp: true,
            enable_submission: true,
            enable_smtps: true,
            smtp_auth_enabled: false,
            smtp_users: BTreeMap::new(),
        }
    }
}

/// DKIM signing configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DkimConfig {
    pub enabled: bool,

    /// Selector used in `<selector>._domainkey.<domain>`.
    pub selector: String,

    /// RSA key size in bits.
    pub key_size: u32,

    /// Signing domains. Derived from the rules when left empty.
    pub domains: DomainSet,
}

impl Default for DkimConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            selector: "mail".to_string(),
            key_size: 2048,
            domains: DomainSet::new(),
        }
    }
}

/// ACME challenge type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ChallengeType {
    /// TLS-ALPN-01 on the mail ports, falling back to HTTP-01.
    #[default]
    TlsAlpn,
    /// HTTP-01 only.
    Http,
}

impl ChallengeType {
    /// Parse the operator-facing name. Unknown values yield `None`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "tls-alpn" | "tls-alpn-01" => Some(Self::TlsAlpn),
            "http" | "http-01" => Some(Self::Http),
            _ => None,
        }
    }
}

impl fmt::Display for ChallengeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChallengeType::TlsAlpn => write!(f, "tls-alpn"),
            ChallengeType::Http => write!(f, "http"),
        }
    }
}

/// TLS certificate configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TlsConfig {
    pub enabled: bool,

    /// ACME account contact. Required when TLS is enabled.
    pub email: String,

    /// Certificate names. Derived from hostname and rules when left empty.
    pub domains: DomainSet,

    pub challenge_type: ChallengeType,

    /// Use the ACME staging endpoint.
    pub staging: bool,

    /// Renew when a certificate expires within this many days.
    pub renewal_days: u32,

    /// Obtain certificates via ACME; self-signed otherwise.
    pub use_letsencrypt: bool,

    pub key_size: u32,

    /// Diffie-Hellman parameter size.
    pub params_bits: u32,

    /// Postfix `smtpd_tls_security_level`.
    pub security_level: String,

    pub protocols: String,

    pub ciphers: String,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            email: String::new(),
            domains: DomainSet::new(),
            challenge_type: ChallengeType::TlsAlpn,
            staging: false,
            renewal_days: 30,
            use_letsencrypt: true,
            key_size: 2048,
            params_bits: 2048,
            security_level: "may".to_string(),
            protocols: "!SSLv2, !SSLv3".to_string(),
            ciphers: "high".to_string(),
        }
    }
}

/// Where the SRS signing secret comes from.
#[derive(Clone, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SrsSecret {
    /// Operator-supplied secret.
    Fixed(String),
    /// Random per process start. Rewritten bounces in flight across a
    /// restart will fail verification.
    #[default]
    AutoGenerateEphemeral,
    /// Random on first start, then read back from this file.
    AutoGeneratePersisted(PathBuf),
}

impl SrsSecret {
    /// The secret value, once one is known.
    pub fn value(&self) -> Option<&str> {
        match self {
            SrsSecret::Fixed(secret) if !secret.is_empty() => Some(secret),
            _ => None,
        }
    }
}

// Never print the secret itself.
impl fmt::Debug for SrsSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SrsSecret::Fixed(_) => write!(f, "Fixed(<redacted>)"),
            SrsSecret::AutoGenerateEphemeral => write!(f, "AutoGenerateEphemeral"),
            SrsSecret::AutoGeneratePersisted(path) => {
                write!(f, "AutoGeneratePersisted({})", path.display())
            }
        }
    }
}

/// Sender Rewriting Scheme configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SrsConfig {
    pub enabled: bool,

    pub secret: SrsSecret,

    /// Rewrite domain. Defaults to the SMTP hostname.
    pub domain: Option<String>,

    /// Domains whose senders are never rewritten.
    pub exclude_domains: DomainSet,
}

impl Default for SrsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            secret: SrsSecret::AutoGenerateEphemeral,
            domain: None,
            exclude_domains: DomainSet::new(),
        }
    }
}

/// Ban daemon configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub fail2ban_enabled: bool,

    /// Failures before a ban.
    pub max_attempts: u32,

    /// Ban duration in seconds.
    pub ban_time: u64,

    /// Look-back window in seconds.
    pub find_time: u64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            fail2ban_enabled: true,
            max_attempts: 5,
            ban_time: 3600,
            find_time: 600,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_domain() {
        let mut smtp = SmtpConfig::default();
        assert_eq!(smtp.parent_domain(), "example.com");

        smtp.hostname = "localhost".into();
        assert_eq!(smtp.parent_domain(), "localhost");

        smtp.hostname = "a.b.c.example.org".into();
        assert_eq!(smtp.parent_domain(), "b.c.example.org");
    }

    #[test]
    fn test_helo_falls_back_to_hostname() {
        let mut smtp = SmtpConfig::default();
        assert_eq!(smtp.helo(), "mail.example.com");

        smtp.helo_name = Some(String::new());
        assert_eq!(smtp.helo(), "mail.example.com");

        smtp.helo_name = Some("relay.example.net".into());
        assert_eq!(smtp.helo(), "relay.example.net");
    }

    #[test]
    fn test_challenge_type_parse() {
        assert_eq!(ChallengeType::parse("TLS-ALPN"), Some(ChallengeType::TlsAlpn));
        assert_eq!(ChallengeType::parse(" http "), Some(ChallengeType::Http));
        assert_eq!(ChallengeType::parse("dns"), None);
    }

    #[test]
    fn test_secret_debug_is_redacted() {
        let secret = SrsSecret::Fixed("hunter2".into());
        assert!(!format!("{:?}", secret).contains("hunter2"));
        assert_eq!(secret.value(), Some("hunter2"));
        assert_eq!(SrsSecret::AutoGenerateEphemeral.value(), None);
    }
}
