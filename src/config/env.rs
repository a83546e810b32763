//! Typed access to a flat string environment.
//!
//! # Responsibilities
//! - Snapshot the process environment (or explicit pairs in tests)
//! - Coerce values into booleans, integers, domain sets and credential maps
//!
//! # Design Decisions
//! - Coercion never fails: bad or missing values fall back to the default
//! - Keys are case-sensitive, values are taken verbatim until a typed getter
//!   trims them

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

/// Values treated as `true`, compared case-insensitively.
const TRUTHY: [&str; 4] = ["true", "yes", "1", "on"];

/// Immutable snapshot of environment variables.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    vars: BTreeMap<String, String>,
}

impl Environment {
    /// Snapshot the current process environment. Non-UTF-8 entries are skipped.
    pub fn from_process() -> Self {
        Self {
            vars: std::env::vars_os()
                .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
                .collect(),
        }
    }

    /// Build from explicit pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Raw value, if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Value if present and not blank.
    pub fn non_empty(&self, key: &str) -> Option<String> {
        self.get(key)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }

    /// Value or `default` when absent.
    pub fn string(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or(default).to_string()
    }

    /// Boolean; absent keys use `default` through the same truthy test.
    pub fn bool(&self, key: &str, default: &str) -> bool {
        parse_bool(self.get(key).unwrap_or(default))
    }

    /// Integer, falling back to `default` when absent or unparseable.
    pub fn int<T: FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    /// Comma separated, trimmed, lowercased, empties dropped.
    pub fn domain_set(&self, key: &str) -> BTreeSet<String> {
        self.get(key).map(parse_domain_set).unwrap_or_default()
    }

    /// Keys starting with `prefix`, in sorted order.
    pub fn keys_with_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.vars
            .keys()
            .map(String::as_str)
            .filter(move |k| k.starts_with(prefix))
    }
}

pub fn parse_bool(value: &str) -> bool {
    let value = value.trim();
    TRUTHY.iter().any(|t| value.eq_ignore_ascii_case(t))
}

pub fn parse_domain_set(value: &str) -> BTreeSet<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_ascii_lowercase)
        .collect()
}

/// Parse `user:pass;user2:pass2`.
///
/// Each pair splits on its first colon, so passwords may contain colons.
/// Pairs with no colon or an empty side are dropped.
pub fn parse_credentials(value: &str) -> BTreeMap<String, String> {
    let mut users = BTreeMap::new();
    for pair in value.split(';') {
        let Some((user, pass)) = pair.split_once(':') else {
            if !pair.trim().is_empty() {
                tracing::warn!("Skipping SMTP user entry without ':' separator");
            }
            continue;
        };
        let user = user.trim();
        let pass = pass.trim();
        if user.is_empty() || pass.is_empty() {
            tracing::warn!("Skipping SMTP user entry with empty username or password");
            continue;
        }
        users.insert(user.to_string(), pass.to_string());
    }
    users
}
