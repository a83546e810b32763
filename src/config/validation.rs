//! Configuration validation and default derivation.
//!
//! # Responsibilities
//! - Reject configurations that must not reach any external tool
//! - Fill DKIM/TLS domains, the SRS domain and the SRS secret when the
//!   operator left them unset
//!
//! # Design Decisions
//! - Pure function: ForwarderConfig → Result<ForwarderConfig, ConfigError>
//! - Steps run in a fixed order; later defaults depend on earlier checks
//! - Only empty fields are filled, so running it twice changes nothing
//! - Stops at the first violated rule

use rand::rngs::OsRng;
use rand::{CryptoRng, Rng};
use thiserror::Error;

use crate::config::rules::is_valid_domain;
use crate::config::schema::{DomainSet, ForwarderConfig, SrsSecret};
use crate::config::secret::generate_secret;

/// Fatal configuration problems.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("SMTP hostname cannot be empty")]
    EmptyHostname,

    #[error("no forwarding rules defined")]
    NoForwardingRules,

    #[error("TLS is enabled but no email provided for the ACME account (set TLS_EMAIL)")]
    MissingTlsEmail,

    #[error("relay username provided but no password (set SMTP_RELAY_PASSWORD)")]
    MissingRelayPassword,

    #[error("invalid domain name: {0:?}")]
    InvalidDomain(String),
}

/// Validate `raw` and return it with every smart default applied.
pub fn derive_defaults(raw: ForwarderConfig) -> Result<ForwarderConfig, ConfigError> {
    derive_defaults_with(raw, &mut OsRng)
}

/// As [`derive_defaults`], drawing generated secrets from `rng`.
pub fn derive_defaults_with<R: Rng + CryptoRng>(
    mut config: ForwarderConfig,
    rng: &mut R,
) -> Result<ForwarderConfig, ConfigError> {
    if config.smtp.hostname.trim().is_empty() {
        return Err(ConfigError::EmptyHostname);
    }

    if config.forwarding_rules.is_empty() {
        return Err(ConfigError::NoForwardingRules);
    }

    let all_domains = candidate_domains(&config);

    if config.dkim.enabled && config.dkim.domains.is_empty() {
        config.dkim.domains = all_domains.clone();
        tracing::info!(domains = %join(&config.dkim.domains), "Auto-configuring DKIM domains");
    }

    if config.tls.enabled && config.tls.domains.is_empty() {
        let mut domains = all_domains;
        domains.insert(config.smtp.hostname.to_ascii_lowercase());
        config.tls.domains = domains;
        tracing::info!(domains = %join(&config.tls.domains), "Auto-configuring TLS domains");
    }

    // DKIM and TLS domains name directories under keys/ and certs/.
    if let Some(bad) = config
        .dkim
        .domains
        .iter()
        .chain(&config.tls.domains)
        .find(|d| !is_valid_domain(d))
    {
        return Err(ConfigError::InvalidDomain(bad.clone()));
    }

    if config.srs.enabled {
        if config.srs.domain.as_deref().map_or(true, str::is_empty) {
            config.srs.domain = Some(config.smtp.hostname.clone());
            tracing::info!(domain = %config.smtp.hostname, "Auto-configuring SRS domain");
        }

        if config.srs.secret == SrsSecret::AutoGenerateEphemeral
            || config.srs.secret == SrsSecret::Fixed(String::new())
        {
            config.srs.secret = SrsSecret::Fixed(generate_secret(rng));
            tracing::warn!(
                "Generated random SRS secret; it changes on every restart (set SRS_SECRET or SRS_SECRET_FILE to keep it)"
            );
        }
    }

    if config.tls.enabled && config.tls.email.trim().is_empty() {
        return Err(ConfigError::MissingTlsEmail);
    }

    if config.smtp.relay_host.is_some()
        && config.smtp.relay_username.is_some()
        && config.smtp.relay_password.as_deref().map_or(true, str::is_empty)
    {
        return Err(ConfigError::MissingRelayPassword);
    }

    Ok(config)
}

/// Rule source domains plus the hostname's parent domain.
pub fn candidate_domains(config: &ForwarderConfig) -> DomainSet {
    let mut domains = config.rule_domains();
    domains.insert(config.smtp.parent_domain().to_ascii_lowercase());
    domains
}

fn join(domains: &DomainSet) -> String {
    domains.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::rules::ForwardingRule;

    fn base() -> ForwarderConfig {
        let mut config = ForwarderConfig::default();
        config.smtp.hostname = "mail.example.com".into();
        config.tls.email = "ops@example.com".into();
        config.forwarding_rules = vec![
            ForwardingRule::detect("alice@example.com", "bob@other.com").unwrap(),
            ForwardingRule::detect("*@example.org", "catchall@other.com").unwrap(),
        ];
        config
    }

    fn set(items: &[&str]) -> DomainSet {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_empty_hostname_rejected() {
        let mut config = base();
        config.smtp.hostname = String::new();
        assert_eq!(derive_defaults(config), Err(ConfigError::EmptyHostname));
    }

    #[test]
    fn test_no_rules_rejected_first() {
        let mut config = base();
        config.forwarding_rules.clear();
        config.tls.email.clear();
        assert_eq!(derive_defaults(config), Err(ConfigError::NoForwardingRules));
    }

    #[test]
    fn test_domains_derived() {
        let config = derive_defaults(base()).unwrap();
        assert_eq!(config.dkim.domains, set(&["example.com", "example.org"]));
        assert_eq!(
            config.tls.domains,
            set(&["example.com", "example.org", "mail.example.com"])
        );
        assert_eq!(config.srs.domain.as_deref(), Some("mail.example.com"));
        assert_eq!(config.srs.secret.value().map(str::len), Some(32));
    }

    #[test]
    fn test_explicit_domains_kept() {
        let mut config = base();
        config.dkim.domains = set(&["foo.com"]);
        config.tls.domains = set(&["mx.foo.com"]);
        config.srs.domain = Some("bounce.foo.com".into());
        config.srs.secret = SrsSecret::Fixed("fixed".into());

        let config = derive_defaults(config).unwrap();
        assert_eq!(config.dkim.domains, set(&["foo.com"]));
        assert_eq!(config.tls.domains, set(&["mx.foo.com"]));
        assert_eq!(config.srs.domain.as_deref(), Some("bounce.foo.com"));
        assert_eq!(config.srs.secret.value(), Some("fixed"));
    }

    #[test]
    fn test_disabled_sections_not_derived() {
        let mut config = base();
        config.dkim.enabled = false;
        config.tls.enabled = false;
        config.tls.email.clear();
        config.srs.enabled = false;

        let config = derive_defaults(config).unwrap();
        assert!(config.dkim.domains.is_empty());
        assert!(config.tls.domains.is_empty());
        assert_eq!(config.srs.domain, None);
        assert_eq!(config.srs.secret, SrsSecret::AutoGenerateEphemeral);
    }

    #[test]
    fn test_persisted_secret_left_for_provisioning() {
        let mut config = base();
        config.srs.secret = SrsSecret::AutoGeneratePersisted("/data/srs".into());
        let config = derive_defaults(config).unwrap();
        assert_eq!(
            config.srs.secret,
            SrsSecret::AutoGeneratePersisted("/data/srs".into())
        );
    }

    #[test]
    fn test_tls_requires_email() {
        let mut config = base();
        config.tls.email = "  ".into();
        assert_eq!(derive_defaults(config), Err(ConfigError::MissingTlsEmail));
    }

    #[test]
    fn test_relay_requires_password_with_username() {
        let mut config = base();
        config.smtp.relay_host = Some("relay.net".into());
        config.smtp.relay_username = Some("user".into());
        assert_eq!(
            derive_defaults(config.clone()),
            Err(ConfigError::MissingRelayPassword)
        );

        config.smtp.relay_password = Some("pw".into());
        assert!(derive_defaults(config).is_ok());
    }

    #[test]
    fn test_username_without_relay_host_is_ignored() {
        let mut config = base();
        config.smtp.relay_username = Some("user".into());
        assert!(derive_defaults(config).is_ok());
    }

    #[test]
    fn test_derivation_is_idempotent() {
        let once = derive_defaults(base()).unwrap();
        let twice = derive_defaults(once.clone()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_path_like_domains_rejected() {
        let mut config = base();
        config.dkim.domains = set(&["../../x"]);
        assert_eq!(
            derive_defaults(config),
            Err(ConfigError::InvalidDomain("../../x".into()))
        );

        let mut config = base();
        config.tls.domains = set(&["certs/evil.com"]);
        assert_eq!(
            derive_defaults(config),
            Err(ConfigError::InvalidDomain("certs/evil.com".into()))
        );

        let mut config = base();
        config.smtp.hostname = "mail/../x".into();
        assert!(matches!(derive_defaults(config), Err(ConfigError::InvalidDomain(_))));
    }

    #[test]
    fn test_hostname_without_dot() {
        let mut config = base();
        config.smtp.hostname = "localhost".into();
        let config = derive_defaults(config).unwrap();
        assert!(config.dkim.domains.contains("localhost"));
        assert!(config.tls.domains.contains("localhost"));
    }
}
