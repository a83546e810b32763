//! End-to-end configuration tests: environment in, validated config out.

use mail_forwarder::config::{load_from, ConfigError, SrsSecret};

mod common;

const RULES: &str = "alice@example.com:bob@other.com;*@example.org:catchall@other.com";

fn domains(set: &std::collections::BTreeSet<String>) -> Vec<&str> {
    set.iter().map(String::as_str).collect()
}

#[test]
fn test_rules_and_derived_domains() {
    let config = load_from(&common::base_env(&[("FORWARD_RULES", RULES)])).unwrap();

    let sources: Vec<(&str, bool)> = config
        .forwarding_rules
        .iter()
        .map(|r| (r.source(), r.is_wildcard()))
        .collect();
    assert_eq!(sources, vec![("alice@example.com", false), ("*@example.org", true)]);

    assert_eq!(domains(&config.dkim.domains), vec!["example.com", "example.org"]);
    assert_eq!(
        domains(&config.tls.domains),
        vec!["example.com", "example.org", "mail.example.com"]
    );
    assert_eq!(config.srs.domain.as_deref(), Some("mail.example.com"));
    assert_eq!(config.smtp.helo(), "mail.example.com");
}

#[test]
fn test_explicit_domains_win() {
    let config = load_from(&common::base_env(&[
        ("FORWARD_RULES", RULES),
        ("DKIM_DOMAINS", "Foo.com, ,"),
    ]))
    .unwrap();
    assert_eq!(domains(&config.dkim.domains), vec!["foo.com"]);
}

#[test]
fn test_bad_rules_dropped_not_fatal() {
    let config = load_from(&common::base_env(&[(
        "FORWARD_RULES",
        "not-an-address:bob@other.com;no-separator;*:x@y.com;ok@example.com:dest@other.com",
    )]))
    .unwrap();
    assert_eq!(config.forwarding_rules.len(), 1);
    assert_eq!(config.forwarding_rules[0].source(), "ok@example.com");
}

#[test]
fn test_configuration_errors() {
    let no_rules = load_from(&common::base_env(&[])).unwrap_err();
    assert_eq!(no_rules, ConfigError::NoForwardingRules);
    assert_eq!(no_rules.to_string(), "no forwarding rules defined");

    let env = mail_forwarder::config::Environment::from_pairs([("FORWARD_RULES", RULES)]);
    assert_eq!(load_from(&env).unwrap_err(), ConfigError::MissingTlsEmail);

    let relay = load_from(&common::base_env(&[
        ("FORWARD_RULES", RULES),
        ("SMTP_RELAY_HOST", "smtp.relay.net"),
        ("SMTP_RELAY_USERNAME", "user"),
    ]))
    .unwrap_err();
    assert_eq!(relay, ConfigError::MissingRelayPassword);
}

#[test]
fn test_legacy_rule_variables_are_ignored() {
    let env = common::base_env(&[("FORWARD_info__example.com", "owner@gmail.com")]);
    assert_eq!(load_from(&env).unwrap_err(), ConfigError::NoForwardingRules);
}

#[test]
fn test_smtp_users_enable_auth() {
    let config = load_from(&common::base_env(&[
        ("FORWARD_RULES", RULES),
        ("SMTP_USERS", "alice:pw1;broken;:nouser;bob:pw:with:colons"),
    ]))
    .unwrap();
    assert!(config.smtp.smtp_auth_enabled);
    assert_eq!(config.smtp.smtp_users.len(), 2);
    assert_eq!(config.smtp.smtp_users["bob"], "pw:with:colons");
}

#[test]
fn test_srs_secret_policies() {
    let fixed = load_from(&common::base_env(&[("FORWARD_RULES", RULES)])).unwrap();
    assert_eq!(fixed.srs.secret, SrsSecret::Fixed("integration-secret".into()));

    let env = mail_forwarder::config::Environment::from_pairs([
        ("FORWARD_RULES", RULES),
        ("TLS_ENABLED", "false"),
    ]);
    let generated = load_from(&env).unwrap();
    let secret = generated.srs.secret.value().unwrap();
    assert_eq!(secret.len(), 32);
    assert!(secret.chars().all(|c| c.is_ascii_alphanumeric()));
}
