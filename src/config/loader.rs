//! Configuration loading from the environment.

use crate::config::env::{parse_credentials, Environment};
use crate::config::rules::parse_rules;
use crate::config::schema::{
    ChallengeType, DkimConfig, ForwarderConfig, SecurityConfig, SmtpConfig, SrsConfig, SrsSecret,
    TlsConfig,
};
use crate::config::validation::{derive_defaults, ConfigError};

/// Variable holding every forwarding rule.
pub const FORWARD_RULES: &str = "FORWARD_RULES";

/// Prefix of the retired one-variable-per-source syntax.
const LEGACY_FORWARD_PREFIX: &str = "FORWARD_";

/// Parse and validate configuration from the process environment.
pub fn load_config() -> Result<ForwarderConfig, ConfigError> {
    load_from(&Environment::from_process())
}

/// Parse and validate configuration from an explicit environment.
pub fn load_from(env: &Environment) -> Result<ForwarderConfig, ConfigError> {
    let raw = parse_environment(env);
    derive_defaults(raw).inspect_err(|e| tracing::error!(error = %e, "Configuration error"))
}

/// Map the environment onto the schema without applying cross-field defaults.
pub fn parse_environment(env: &Environment) -> ForwarderConfig {
    warn_legacy_rules(env);

    let forwarding_rules = env
        .get(FORWARD_RULES)
        .map(|value| parse_rules(value).rules)
        .unwrap_or_default();

    ForwarderConfig {
        debug: env.bool("DEBUG", "false"),
        smtp: parse_smtp(env),
        dkim: DkimConfig {
            enabled: env.bool("DKIM_ENABLED", "true"),
            selector: env.string("DKIM_SELECTOR", "mail"),
            key_size: env.int("DKIM_KEY_SIZE", 2048),
            domains: env.domain_set("DKIM_DOMAINS"),
        },
        tls: parse_tls(env),
        srs: parse_srs(env),
        security: SecurityConfig {
            fail2ban_enabled: env.bool("FAIL2BAN_ENABLED", "true"),
            max_attempts: env.int("FAIL2BAN_MAX_ATTEMPTS", 5),
            ban_time: env.int("FAIL2BAN_BAN_TIME", 3600),
            find_time: env.int("FAIL2BAN_FIND_TIME", 600),
        },
        forwarding_rules,
    }
}

fn parse_smtp(env: &Environment) -> SmtpConfig {
    let smtp_users = env
        .get("SMTP_USERS")
        .map(parse_credentials)
        .unwrap_or_default();

    SmtpConfig {
        hostname: env.string("SMTP_HOSTNAME", "mail.example.com").trim().to_string(),
        helo_name: env.non_empty("SMTP_HELO_NAME"),
        relay_host: env.non_empty("SMTP_RELAY_HOST"),
        relay_port: env.int("SMTP_RELAY_PORT", 25),
        relay_username: env.non_empty("SMTP_RELAY_USERNAME"),
        relay_password: env.non_empty("SMTP_RELAY_PASSWORD"),
        use_tls: env.bool("SMTP_RELAY_USE_TLS", "true"),
        enable_smtp: env.bool("ENABLE_SMTP", "true"),
        enable_submission: env.bool("ENABLE_SUBMISSION", "true"),
        enable_smtps: env.bool("ENABLE_SMTPS", "true"),
        smtp_auth_enabled: !smtp_users.is_empty(),
        smtp_users,
    }
}

fn parse_tls(env: &Environment) -> TlsConfig {
    let challenge_type = match env.non_empty("TLS_CHALLENGE_TYPE") {
        Some(raw) => ChallengeType::parse(&raw).unwrap_or_else(|| {
            tracing::warn!(value = %raw, "Unknown TLS_CHALLENGE_TYPE, using tls-alpn");
            ChallengeType::TlsAlpn
        }),
        None => ChallengeType::TlsAlpn,
    };

    let email = env
        .non_empty("TLS_EMAIL")
        .or_else(|| env.non_empty("ACME_EMAIL"))
        .unwrap_or_default();

    TlsConfig {
        enabled: env.bool("TLS_ENABLED", "true"),
        email,
        domains: env.domain_set("TLS_DOMAINS"),
        challenge_type,
        staging: env.bool("TLS_STAGING", "false"),
        renewal_days: env.int("TLS_RENEWAL_DAYS", 30),
        use_letsencrypt: env.bool("TLS_USE_LETSENCRYPT", "true"),
        key_size: env.int("TLS_KEY_SIZE", 2048),
        params_bits: env.int("TLS_PARAMS_BITS", 2048),
        security_level: env.string("TLS_SECURITY_LEVEL", "may"),
        protocols: env.string("TLS_PROTOCOLS", "!SSLv2, !SSLv3"),
        ciphers: env.string("TLS_CIPHERS", "high"),
    }
}

fn parse_srs(env: &Environment) -> SrsConfig {
    let secret = match (env.non_empty("SRS_SECRET"), env.non_empty("SRS_SECRET_FILE")) {
        (Some(secret), _) => SrsSecret::Fixed(secret),
        (None, Some(path)) => SrsSecret::AutoGeneratePersisted(path.into()),
        (None, None) => SrsSecret::AutoGenerateEphemeral,
    };

    SrsConfig {
        enabled: env.bool("SRS_ENABLED", "true"),
        secret,
        domain: env.non_empty("SRS_DOMAIN"),
        exclude_domains: env.domain_set("SRS_EXCLUDE_DOMAINS"),
    }
}

/// `FORWARD_<source>` variables are no longer read; say so loudly.
fn warn_legacy_rules(env: &Environment) {
    for key in env.keys_with_prefix(LEGACY_FORWARD_PREFIX) {
        if key != FORWARD_RULES {
            tracing::warn!(
                variable = key,
                "Ignoring legacy per-source forwarding variable; move it into FORWARD_RULES"
            );
        }
    }
}
