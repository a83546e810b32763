//! TLS certificate management.
//!
//! # Responsibilities
//! - Obtain certificates with certbot, falling back through challenge types
//! - Fall back to self-signed certificates when ACME is off or fails
//! - Generate Diffie-Hellman parameters once
//! - Watch expiry and run `certbot renew` in the background
//!
//! # Design Decisions
//! - Certificates are hard-linked into the postfix directory so postfix
//!   never follows symlinks out of its tree
//! - An unreadable expiry date counts as "needs renewal"

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use tokio::sync::broadcast;
use tokio::time::{self, Instant};

use crate::config::{ChallengeType, ForwarderConfig};
use crate::provision::command::{Cmd, CommandRunner};
use crate::provision::{Paths, ProvisionError, Provisioner};

/// Renewal check period.
pub const RENEWAL_CHECK_INTERVAL: Duration = Duration::from_secs(12 * 60 * 60);

/// Validity of self-signed certificates, in days.
const SELF_SIGNED_DAYS: u32 = 365;

/// Certificate and key for one name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertPair {
    pub fullchain: PathBuf,
    pub privkey: PathBuf,
}

impl CertPair {
    fn in_dir(dir: PathBuf) -> Self {
        Self {
            fullchain: dir.join("fullchain.pem"),
            privkey: dir.join("privkey.pem"),
        }
    }

    pub fn exists(&self) -> bool {
        self.fullchain.exists() && self.privkey.exists()
    }
}

/// Where certbot keeps the live certificate for `domain`.
pub fn acme_cert(paths: &Paths, domain: &str) -> CertPair {
    CertPair::in_dir(paths.letsencrypt_live().join(domain))
}

/// Where postfix reads the certificate for `domain`.
pub fn postfix_cert(paths: &Paths, domain: &str) -> CertPair {
    CertPair::in_dir(paths.postfix_certs_dir().join(domain))
}

/// Name whose certificate postfix presents by default.
///
/// Always an entry of `tls.domains` when that set is non-empty, so the name
/// matches the directory certificates were installed under.
pub fn primary_domain(config: &ForwarderConfig) -> &str {
    let hostname = config.smtp.hostname.as_str();
    config
        .tls
        .domains
        .get(&hostname.to_ascii_lowercase())
        .or_else(|| config.tls.domains.iter().next())
        .map(String::as_str)
        .unwrap_or(hostname)
}

/// The TLS block of `main.cf`.
pub fn postfix_settings(config: &ForwarderConfig, paths: &Paths) -> String {
    let tls = &config.tls;
    let cert = postfix_cert(paths, primary_domain(config));
    let mut out = String::new();

    push_line!(
        out,
        "smtpd_tls_chain_files = {}, {}",
        cert.privkey.display(),
        cert.fullchain.display()
    );
    push_line!(out, "smtpd_tls_security_level = {}", tls.security_level);
    push_line!(out, "smtpd_tls_protocols = {}", tls.protocols);
    push_line!(out, "smtpd_tls_mandatory_protocols = {}", tls.protocols);
    push_line!(out, "smtpd_tls_ciphers = {}", tls.ciphers);
    push_line!(out, "smtpd_tls_mandatory_ciphers = {}", tls.ciphers);
    push_line!(out, "smtpd_tls_dh1024_param_file = {}", paths.tls_params().display());
    push_line!(out, "smtpd_tls_auth_only = yes");
    push_line!(out, "smtpd_tls_loglevel = 1");
    push_line!(out, "smtpd_tls_received_header = yes");
    push_line!(out, "smtpd_tls_session_cache_database = btree:${{data_directory}}/smtpd_scache");
    push_line!(out, "smtp_tls_session_cache_database = btree:${{data_directory}}/smtp_scache");
    out
}

/// certbot challenge arguments, in the order they are tried.
pub fn challenge_attempts(challenge: ChallengeType) -> Vec<Vec<&'static str>> {
    let http = vec!["--preferred-challenges", "http-01"];
    match challenge {
        ChallengeType::TlsAlpn => vec![
            vec!["--preferred-challenges", "tls-alpn-01", "--tls-alpn-port", "465"],
            vec!["--preferred-challenges", "tls-alpn-01", "--tls-alpn-port", "587"],
            http,
        ],
        ChallengeType::Http => vec![http],
    }
}

/// Try each challenge in turn. Returns whether certbot succeeded.
async fn obtain_acme<R: CommandRunner>(
    provisioner: &Provisioner<R>,
    config: &ForwarderConfig,
    domain: &str,
) -> bool {
    let paths = provisioner.paths();
    if acme_cert(paths, domain).exists() {
        tracing::info!(domain, "ACME certificate already exists");
        return true;
    }

    let mut base = Cmd::new("certbot").args([
        "certonly",
        "--non-interactive",
        "--agree-tos",
        "--email",
        config.tls.email.as_str(),
        "--config-dir",
    ]);
    base = base
        .arg(paths.letsencrypt_dir().display().to_string())
        .args(["--cert-name", domain, "-d", domain]);
    if config.tls.staging {
        base = base.arg("--test-cert");
    }

    for attempt in challenge_attempts(config.tls.challenge_type) {
        let cmd = base.clone().args(attempt);
        match provisioner.runner().run_checked(&cmd).await {
            Ok(_) => {
                tracing::info!(domain, command = %cmd, "Obtained ACME certificate");
                return true;
            }
            Err(e) => tracing::warn!(domain, error = %e, "ACME attempt failed"),
        }
    }

    tracing::error!(domain, "Failed to obtain ACME certificate using all challenge types");
    false
}

/// Create a self-signed certificate unless one exists.
async fn self_signed<R: CommandRunner>(
    provisioner: &Provisioner<R>,
    domain: &str,
    key_size: u32,
) -> Result<(), ProvisionError> {
    let cert = postfix_cert(provisioner.paths(), domain);
    if cert.exists() {
        tracing::debug!(domain, "Self-signed certificate already exists");
        return Ok(());
    }
    let dir = provisioner.paths().postfix_certs_dir().join(domain);
    fs::create_dir_all(&dir).map_err(|e| ProvisionError::io(&dir, e))?;

    let key = cert.privkey.display().to_string();
    let chain = cert.fullchain.display().to_string();
    let runner = provisioner.runner();

    runner
        .run_checked(&Cmd::new("openssl").args(["genrsa", "-out", &key]).arg(key_size.to_string()))
        .await?;
    runner
        .run_checked(
            &Cmd::new("openssl")
                .args(["req", "-new", "-x509", "-key", &key, "-out", &chain, "-days"])
                .arg(SELF_SIGNED_DAYS.to_string())
                .arg("-subj")
                .arg(format!("/CN={}", domain)),
        )
        .await?;

    tracing::info!(domain, "Created self-signed certificate");
    Ok(())
}

/// Replace the postfix copy of a certificate with hard links to `source`.
///
/// certbot's `live/` entries are relative symlinks into `archive/`; the link
/// targets the resolved file, never the symlink itself.
fn link_into_postfix(source: &CertPair, dest: &CertPair) -> Result<(), ProvisionError> {
    if let Some(dir) = dest.fullchain.parent() {
        fs::create_dir_all(dir).map_err(|e| ProvisionError::io(dir, e))?;
    }
    for (from, to) in [
        (&source.fullchain, &dest.fullchain),
        (&source.privkey, &dest.privkey),
    ] {
        let target = fs::canonicalize(from).map_err(|e| ProvisionError::io(from, e))?;
        // symlink_metadata so a dangling link left behind is replaced too.
        if fs::symlink_metadata(to).is_ok() {
            fs::remove_file(to).map_err(|e| ProvisionError::io(to, e))?;
        }
        fs::hard_link(&target, to).map_err(|e| ProvisionError::io(to, e))?;
    }
    Ok(())
}

/// Install a certificate for every TLS domain plus DH parameters.
pub async fn configure<R: CommandRunner>(
    provisioner: &Provisioner<R>,
    config: &ForwarderConfig,
) -> Result<(), ProvisionError> {
    if !config.tls.enabled {
        tracing::info!("TLS is disabled, skipping certificate configuration");
        return Ok(());
    }

    tracing::info!("Configuring TLS certificates");
    let paths = provisioner.paths();
    let certs_dir = paths.postfix_certs_dir();
    fs::create_dir_all(&certs_dir).map_err(|e| ProvisionError::io(&certs_dir, e))?;

    for domain in &config.tls.domains {
        if config.tls.use_letsencrypt && obtain_acme(provisioner, config, domain).await {
            let source = acme_cert(paths, domain);
            if source.exists() {
                link_into_postfix(&source, &postfix_cert(paths, domain))?;
                tracing::info!(domain = %domain, "Linked ACME certificate");
                continue;
            }
            tracing::warn!(domain = %domain, "ACME certificate not found, falling back to self-signed");
        }
        self_signed(provisioner, domain, config.tls.key_size).await?;
    }

    let params = paths.tls_params();
    if !params.exists() {
        tracing::info!(bits = config.tls.params_bits, "Generating TLS parameters file");
        provisioner
            .runner()
            .run_checked(
                &Cmd::new("openssl")
                    .args(["dhparam", "-out"])
                    .arg(params.display().to_string())
                    .arg(config.tls.params_bits.to_string()),
            )
            .await?;
    }

    tracing::info!("TLS configuration complete");
    Ok(())
}

/// Parse `notAfter=Jan  1 00:00:00 2030 GMT` as printed by `openssl x509 -enddate`.
pub fn parse_enddate(output: &str) -> Option<DateTime<Utc>> {
    let value = output.trim().strip_prefix("notAfter=")?;
    let normalized = value.split_whitespace().collect::<Vec<_>>().join(" ");
    let without_zone = normalized.strip_suffix(" GMT").unwrap_or(&normalized);
    NaiveDateTime::parse_from_str(without_zone, "%b %d %H:%M:%S %Y")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Expiry time of the certificate at `cert`.
pub async fn certificate_expiry<R: CommandRunner>(
    runner: &R,
    cert: &Path,
) -> Result<DateTime<Utc>, ProvisionError> {
    let output = runner
        .run_checked(
            &Cmd::new("openssl")
                .args(["x509", "-in"])
                .arg(cert.display().to_string())
                .args(["-noout", "-enddate"]),
        )
        .await?;

    parse_enddate(&output.stdout).ok_or_else(|| ProvisionError::Certificate {
        domain: cert.display().to_string(),
        reason: format!("unparseable end date: {}", output.stdout.trim()),
    })
}

/// True when `expiry` is within `threshold_days` of `now`.
pub fn needs_renewal(expiry: DateTime<Utc>, now: DateTime<Utc>, threshold_days: u32) -> bool {
    (expiry - now).num_days() <= i64::from(threshold_days)
}

/// Periodically renews ACME certificates nearing expiry.
pub struct RenewalMonitor<'a, R> {
    provisioner: &'a Provisioner<R>,
    threshold_days: u32,
    interval: Duration,
}

impl<'a, R: CommandRunner> RenewalMonitor<'a, R> {
    pub fn new(provisioner: &'a Provisioner<R>, config: &ForwarderConfig) -> Self {
        Self {
            provisioner,
            threshold_days: config.tls.renewal_days,
            interval: RENEWAL_CHECK_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Check on every tick until shutdown. The first check happens one
    /// interval after start.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            threshold_days = self.threshold_days,
            "Certificate renewal monitor starting"
        );

        let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.check_once().await {
                        self.renew().await;
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Renewal monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Whether any live certificate needs renewal.
    pub async fn check_once(&self) -> bool {
        let live = self.provisioner.paths().letsencrypt_live();
        let entries = match fs::read_dir(&live) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(path = %live.display(), error = %e, "Cannot list certificates");
                return false;
            }
        };

        let now = Utc::now();
        for entry in entries.flatten() {
            let cert = entry.path().join("fullchain.pem");
            if !cert.exists() {
                continue;
            }
            match certificate_expiry(self.provisioner.runner(), &cert).await {
                Ok(expiry) => {
                    let days = (expiry - now).num_days();
                    tracing::info!(cert = %cert.display(), days, "Certificate expiry checked");
                    if needs_renewal(expiry, now, self.threshold_days) {
                        return true;
                    }
                }
                Err(e) => {
                    tracing::error!(cert = %cert.display(), error = %e, "Expiry check failed, assuming renewal needed");
                    return true;
                }
            }
        }
        false
    }

    /// `certbot renew` with the same challenge fallback as issuance.
    pub async fn renew(&self) -> bool {
        let config_dir = self.provisioner.paths().letsencrypt_dir().display().to_string();
        for attempt in challenge_attempts(ChallengeType::TlsAlpn) {
            let cmd = Cmd::new("certbot")
                .args(["renew", "--non-interactive", "--config-dir"])
                .arg(config_dir.as_str())
                .args(attempt);
            match self.provisioner.runner().run_checked(&cmd).await {
                Ok(_) => {
                    tracing::info!(command = %cmd, "Certificate renewal completed");
                    return true;
                }
                Err(e) => tracing::warn!(error = %e, "Renewal attempt failed"),
            }
        }
        tracing::error!("Failed to renew certificates using all methods");
        false
    }
}
