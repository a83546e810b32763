//! DNS record report.
//!
//! # Data Flow
//! ```text
//! ForwarderConfig + dns_records.txt
//!     → expected MX / SPF / DKIM / DMARC per DKIM domain
//!     → DnsLookup (trust-dns in production, fixed answers in tests)
//!     → Vec<DnsCheck>
//!     → render_report (grouped by record type, then a summary)
//! ```
//!
//! # Design Decisions
//! - A failed lookup is reported as the current value, never as an error
//! - "No records" is an empty answer, not a failure

use std::fs;
use std::future::Future;
use std::path::Path;
use std::time::Duration;

use thiserror::Error;
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::error::ResolveErrorKind;
use trust_dns_resolver::TokioAsyncResolver;

use crate::config::ForwarderConfig;
use crate::provision::dkim::{record_name, DMARC_POLICY, SPF_POLICY};
use crate::provision::Paths;
use crate::report::table;

/// Per-query timeout.
pub const LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

const NOT_FOUND: &str = "Not found";
const NOT_GENERATED: &str = "DKIM record not generated yet";

#[derive(Debug, Error)]
#[error("{0}")]
pub struct LookupError(pub String);

/// Resolves the record types the report needs.
pub trait DnsLookup: Send + Sync {
    /// Exchange hostnames, without the trailing dot.
    fn mx(&self, name: &str) -> impl Future<Output = Result<Vec<String>, LookupError>> + Send;

    /// TXT records, each with its strings concatenated.
    fn txt(&self, name: &str) -> impl Future<Output = Result<Vec<String>, LookupError>> + Send;
}

/// System resolver backed by trust-dns.
pub struct Resolver {
    inner: TokioAsyncResolver,
}

impl Resolver {
    pub fn new() -> Self {
        let mut opts = ResolverOpts::default();
        opts.timeout = LOOKUP_TIMEOUT;
        opts.attempts = 1;
        Self {
            inner: TokioAsyncResolver::tokio(ResolverConfig::default(), opts),
        }
    }
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}

fn lookup_error(e: trust_dns_resolver::error::ResolveError) -> Result<Vec<String>, LookupError> {
    match e.kind() {
        ResolveErrorKind::NoRecordsFound { .. } => Ok(Vec::new()),
        _ => Err(LookupError(e.to_string())),
    }
}

impl DnsLookup for Resolver {
    async fn mx(&self, name: &str) -> Result<Vec<String>, LookupError> {
        match self.inner.mx_lookup(name).await {
            Ok(lookup) => Ok(lookup
                .iter()
                .map(|mx| mx.exchange().to_string().trim_end_matches('.').to_string())
                .collect()),
            Err(e) => lookup_error(e),
        }
    }

    async fn txt(&self, name: &str) -> Result<Vec<String>, LookupError> {
        match self.inner.txt_lookup(name).await {
            Ok(lookup) => Ok(lookup
                .iter()
                .map(|txt| {
                    txt.txt_data()
                        .iter()
                        .map(|part| String::from_utf8_lossy(part))
                        .collect::<String>()
                })
                .collect()),
            Err(e) => lookup_error(e),
        }
    }
}

/// Record family, in report order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RecordKind {
    Mx,
    Spf,
    Dkim,
    Dmarc,
}

impl RecordKind {
    pub const ALL: [RecordKind; 4] = [
        RecordKind::Mx,
        RecordKind::Spf,
        RecordKind::Dkim,
        RecordKind::Dmarc,
    ];

    pub fn label(self) -> &'static str {
        match self {
            RecordKind::Mx => "MX",
            RecordKind::Spf => "SPF (TXT)",
            RecordKind::Dkim => "DKIM (TXT)",
            RecordKind::Dmarc => "DMARC (TXT)",
        }
    }
}

/// Outcome for one published record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsCheck {
    pub kind: RecordKind,
    pub name: String,
    pub valid: bool,
    pub current: String,
    pub expected: String,
}

/// Expected DKIM value for `name` as written to `dns_records.txt`.
pub fn expected_dkim(records_file: &str, name: &str) -> Option<String> {
    records_file
        .lines()
        .filter(|line| line.contains(name))
        .find_map(|line| line.split_once("IN TXT"))
        .map(|(_, value)| value.trim().to_string())
}

fn check_mx(answer: Result<Vec<String>, LookupError>, hostname: &str) -> (bool, String) {
    match answer {
        Ok(exchanges) => {
            let valid = exchanges.iter().any(|mx| mx.eq_ignore_ascii_case(hostname));
            let current = if valid {
                hostname.to_string()
            } else {
                exchanges.last().cloned().unwrap_or_else(|| NOT_FOUND.to_string())
            };
            (valid, current)
        }
        Err(e) => (false, format!("Error: {}", e)),
    }
}

/// First TXT record with `prefix`, judged by `is_valid`.
fn check_txt(
    answer: Result<Vec<String>, LookupError>,
    prefix: &str,
    is_valid: impl Fn(&str) -> bool,
) -> (bool, String) {
    match answer {
        Ok(records) => match records.into_iter().find(|r| r.starts_with(prefix)) {
            Some(record) => (is_valid(&record), record),
            None => (false, NOT_FOUND.to_string()),
        },
        Err(e) => (false, format!("Error: {}", e)),
    }
}

/// Look up every expected record for the DKIM domains.
pub async fn check_records<L: DnsLookup>(
    config: &ForwarderConfig,
    paths: &Paths,
    lookup: &L,
) -> Vec<DnsCheck> {
    let hostname = config.smtp.hostname.as_str();
    let records_file = read_records_file(&paths.dkim_dns_records());
    let mut checks = Vec::new();

    for domain in &config.dkim.domains {
        tracing::debug!(domain = %domain, "Checking DNS records");

        let (valid, current) = check_mx(lookup.mx(domain).await, hostname);
        checks.push(DnsCheck {
            kind: RecordKind::Mx,
            name: domain.clone(),
            valid,
            current,
            expected: format!("{}.", hostname),
        });

        let (valid, current) =
            check_txt(lookup.txt(domain).await, "v=spf1", |r| r == SPF_POLICY);
        checks.push(DnsCheck {
            kind: RecordKind::Spf,
            name: domain.clone(),
            valid,
            current,
            expected: SPF_POLICY.to_string(),
        });

        let dkim_name = record_name(&config.dkim.selector, domain);
        let (valid, current) =
            check_txt(lookup.txt(&dkim_name).await, "v=DKIM1", |r| r.contains("v=DKIM1"));
        let expected = expected_dkim(&records_file, &dkim_name)
            .unwrap_or_else(|| NOT_GENERATED.to_string());
        checks.push(DnsCheck {
            kind: RecordKind::Dkim,
            name: dkim_name,
            valid,
            current,
            expected,
        });

        let dmarc_name = format!("_dmarc.{}", domain);
        let (valid, current) =
            check_txt(lookup.txt(&dmarc_name).await, "v=DMARC1", |r| r.contains("p=reject"));
        checks.push(DnsCheck {
            kind: RecordKind::Dmarc,
            name: dmarc_name,
            valid,
            current,
            expected: DMARC_POLICY.to_string(),
        });
    }

    checks
}

fn read_records_file(path: &Path) -> String {
    fs::read_to_string(path).unwrap_or_else(|e| {
        tracing::debug!(path = %path.display(), error = %e, "No DKIM records file");
        String::new()
    })
}

/// Human-readable report of `checks`.
pub fn render_report(checks: &[DnsCheck]) -> String {
    if checks.is_empty() {
        return String::new();
    }

    let mut out = String::from("\n==== DNS RECORDS CONFIGURATION ====\n\n");
    for kind in RecordKind::ALL {
        let rows: Vec<Vec<String>> = checks
            .iter()
            .filter(|c| c.kind == kind)
            .map(|c| {
                vec![
                    kind.label().to_string(),
                    c.name.clone(),
                    if c.valid { "yes" } else { "no" }.to_string(),
                    c.current.clone(),
                    c.expected.clone(),
                ]
            })
            .collect();
        if rows.is_empty() {
            continue;
        }
        push_line!(out, "===== {} RECORDS =====", kind.label());
        out.push_str(&table(
            Some(&["TYPE", "NAME", "VALID", "CURRENT VALUE", "EXPECTED VALUE"]),
            &rows,
        ));
        out.push('\n');
    }

    let total = checks.len();
    let valid = checks.iter().filter(|c| c.valid).count();
    out.push_str("===== DNS CONFIGURATION SUMMARY =====\n");
    out.push_str(&table(
        None,
        &[
            vec!["Total Records".into(), total.to_string()],
            vec!["Correctly Configured".into(), valid.to_string()],
            vec!["Needs Configuration".into(), (total - valid).to_string()],
            vec![
                "Status".into(),
                if valid == total { "All Good" } else { "Action Required" }.into(),
            ],
        ],
    ));

    if valid < total {
        out.push_str("\nIMPORTANT: Please update your DNS records to match the EXPECTED VALUES.\n");
        out.push_str("Changes may take 24-48 hours to propagate through the DNS system.\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Fixed answers; names missing from the map fail to resolve.
    struct StaticLookup {
        mx: HashMap<String, Vec<String>>,
        txt: HashMap<String, Vec<String>>,
    }

    impl DnsLookup for StaticLookup {
        async fn mx(&self, name: &str) -> Result<Vec<String>, LookupError> {
            self.mx.get(name).cloned().ok_or_else(|| LookupError("timed out".into()))
        }

        async fn txt(&self, name: &str) -> Result<Vec<String>, LookupError> {
            Ok(self.txt.get(name).cloned().unwrap_or_default())
        }
    }

    fn config() -> ForwarderConfig {
        let mut config = ForwarderConfig::default();
        config.dkim.domains.insert("example.com".into());
        config
    }

    #[test]
    fn test_expected_dkim_from_records_file() {
        let file = "; header\nmail._domainkey.example.com. IN TXT \"v=DKIM1; p=abc\"\n";
        assert_eq!(
            expected_dkim(file, "mail._domainkey.example.com").as_deref(),
            Some("\"v=DKIM1; p=abc\"")
        );
        assert_eq!(expected_dkim(file, "mail._domainkey.example.org"), None);
    }

    #[tokio::test]
    async fn test_all_records_valid() {
        let lookup = StaticLookup {
            mx: HashMap::from([("example.com".into(), vec!["mail.example.com".into()])]),
            txt: HashMap::from([
                ("example.com".into(), vec!["google-site-verification=x".into(), SPF_POLICY.into()]),
                ("mail._domainkey.example.com".into(), vec!["v=DKIM1; k=rsa; p=abc".into()]),
                ("_dmarc.example.com".into(), vec![DMARC_POLICY.into()]),
            ]),
        };
        let dir = tempfile::tempdir().unwrap();
        let checks = check_records(&config(), &Paths::under(dir.path()), &lookup).await;

        assert_eq!(checks.len(), 4);
        assert!(checks.iter().all(|c| c.valid), "{:?}", checks);
        assert_eq!(checks[2].expected, NOT_GENERATED);
        assert!(render_report(&checks).contains("All Good"));
    }

    #[tokio::test]
    async fn test_lookup_errors_are_reported_not_raised() {
        let lookup = StaticLookup {
            mx: HashMap::new(),
            txt: HashMap::from([("example.com".into(), vec!["v=spf1 a ~all".into()])]),
        };
        let dir = tempfile::tempdir().unwrap();
        let checks = check_records(&config(), &Paths::under(dir.path()), &lookup).await;

        assert_eq!(checks[0].current, "Error: timed out");
        assert!(!checks[1].valid);
        assert_eq!(checks[1].current, "v=spf1 a ~all");
        assert_eq!(checks[3].current, NOT_FOUND);

        let report = render_report(&checks);
        assert!(report.contains("===== MX RECORDS ====="));
        assert!(report.contains("Needs Configuration   4"));
        assert!(report.contains("Action Required"));
    }
}
