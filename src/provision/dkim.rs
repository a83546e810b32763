//! OpenDKIM configuration.
//!
//! # Responsibilities
//! - Generate one key pair per signing domain with `opendkim-genkey`
//! - Render the key table, signing table, trusted hosts and `opendkim.conf`
//! - Publish the TXT records operators must add to DNS

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::config::ForwarderConfig;
use crate::provision::command::{Cmd, CommandRunner};
use crate::provision::files::set_mode;
use crate::provision::services::Service;
use crate::provision::{Paths, ProvisionError, Provisioner};

/// Published DMARC policy.
pub const DMARC_POLICY: &str = "v=DMARC1; p=reject; sp=reject; adkim=s; aspf=s; fo=1;";

/// Published SPF policy.
pub const SPF_POLICY: &str = "v=spf1 mx -all";

/// `<selector>._domainkey.<domain>`
pub fn record_name(selector: &str, domain: &str) -> String {
    format!("{}._domainkey.{}", selector, domain)
}

fn key_files(paths: &Paths, domain: &str, selector: &str) -> (PathBuf, PathBuf) {
    let dir = paths.dkim_keys_dir().join(domain);
    (
        dir.join(format!("{}.private", selector)),
        dir.join(format!("{}.txt", selector)),
    )
}

/// Extract the TXT value from an `opendkim-genkey` `.txt` file.
///
/// The file looks like `sel._domainkey IN TXT ( "v=DKIM1; k=rsa; " "p=..." )`,
/// possibly over several lines; the quoted segments are concatenated.
pub fn parse_record(content: &str) -> Option<String> {
    let start = content.find('(')?;
    let end = start + content[start..].find(')')?;
    let inner = &content[start + 1..end];

    let record: String = inner
        .split('"')
        .skip(1)
        .step_by(2)
        .collect();
    let record = record.trim().to_string();
    (!record.is_empty()).then_some(record)
}

pub fn key_table(config: &ForwarderConfig, paths: &Paths) -> String {
    let selector = &config.dkim.selector;
    let mut out = String::new();
    for domain in &config.dkim.domains {
        let (private, _) = key_files(paths, domain, selector);
        push_line!(
            out,
            "{} {}:{}:{}",
            record_name(selector, domain),
            domain,
            selector,
            private.display()
        );
    }
    out
}

pub fn signing_table(config: &ForwarderConfig) -> String {
    let mut out = String::new();
    for domain in &config.dkim.domains {
        push_line!(out, "*@{} {}", domain, record_name(&config.dkim.selector, domain));
    }
    out
}

pub fn trusted_hosts(config: &ForwarderConfig) -> String {
    let mut out = String::from("127.0.0.1\n::1\nlocalhost\n");
    push_line!(out, "{}", config.smtp.hostname);
    for domain in &config.dkim.domains {
        push_line!(out, "*.{}", domain);
    }
    out
}

/// Zone-file lines for the generated keys.
pub fn dns_records_file(records: &BTreeMap<String, String>) -> String {
    let mut out = String::from("; DKIM records for mail-forwarder\n");
    for (name, value) in records {
        push_line!(out, "{}. IN TXT \"{}\"", name, value);
    }
    out
}

pub fn spf_dmarc_instructions(config: &ForwarderConfig) -> String {
    let mut out = String::from("; SPF and DMARC records for mail-forwarder\n");
    for domain in &config.dkim.domains {
        push_line!(out, "{}. IN TXT \"{}\"", domain, SPF_POLICY);
        push_line!(out, "_dmarc.{}. IN TXT \"{}\"", domain, DMARC_POLICY);
    }
    out
}

pub fn opendkim_conf(paths: &Paths) -> String {
    let dir = paths.opendkim_dir();
    format!(
        "# Generated by mail-forwarder. Local changes are overwritten.\n\
         Syslog yes\n\
         SyslogSuccess yes\n\
         UMask 007\n\
         Mode s\n\
         Canonicalization relaxed/simple\n\
         OversignHeaders From\n\
         KeyTable refile:{}\n\
         SigningTable refile:{}\n\
         ExternalIgnoreList refile:{}\n\
         InternalHosts refile:{}\n\
         Socket local:{}\n\
         PidFile /var/run/opendkim/opendkim.pid\n\
         UserID opendkim\n",
        dir.join("key_table").display(),
        dir.join("signing_table").display(),
        dir.join("trusted_hosts").display(),
        dir.join("trusted_hosts").display(),
        paths.opendkim_socket().display(),
    )
}

/// Make sure a key exists for `domain`, generating it if needed.
async fn ensure_key<R: CommandRunner>(
    provisioner: &Provisioner<R>,
    domain: &str,
    selector: &str,
    key_size: u32,
) -> Result<PathBuf, ProvisionError> {
    let (private, txt) = key_files(provisioner.paths(), domain, selector);
    if private.exists() && txt.exists() {
        tracing::debug!(domain, selector, "DKIM key already exists");
        return Ok(txt);
    }

    let dir = provisioner.paths().dkim_keys_dir().join(domain);
    fs::create_dir_all(&dir).map_err(|e| ProvisionError::io(&dir, e))?;

    tracing::info!(domain, selector, bits = key_size, "Generating DKIM key");
    let cmd = Cmd::new("opendkim-genkey")
        .arg("-b")
        .arg(key_size.to_string())
        .arg("-d")
        .arg(domain)
        .arg("-s")
        .arg(selector)
        .arg("-D")
        .arg(dir.display().to_string());
    provisioner.runner().run_checked(&cmd).await?;

    restrict(&private, 0o640)?;
    restrict(&txt, 0o644)?;
    Ok(txt)
}

fn restrict(path: &Path, mode: u32) -> Result<(), ProvisionError> {
    if path.exists() {
        set_mode(path, mode).map_err(|e| ProvisionError::io(path, e))?;
    }
    Ok(())
}

fn read_record(txt: &Path) -> Result<Option<String>, ProvisionError> {
    match fs::read_to_string(txt) {
        Ok(content) => parse_record(&content)
            .map(Some)
            .ok_or_else(|| ProvisionError::DkimRecord {
                path: txt.to_path_buf(),
            }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::warn!(path = %txt.display(), "DKIM record file missing");
            Ok(None)
        }
        Err(e) => Err(ProvisionError::io(txt, e)),
    }
}

/// Generate keys and render every OpenDKIM file.
///
/// Returns the DNS TXT records keyed by record name.
pub async fn configure<R: CommandRunner>(
    provisioner: &Provisioner<R>,
    config: &ForwarderConfig,
) -> Result<BTreeMap<String, String>, ProvisionError> {
    if !config.dkim.enabled {
        tracing::info!("DKIM is disabled, skipping OpenDKIM configuration");
        return Ok(BTreeMap::new());
    }

    tracing::info!("Configuring OpenDKIM");
    let paths = provisioner.paths();
    let dkim = &config.dkim;

    let mut records = BTreeMap::new();
    for domain in &dkim.domains {
        let txt = ensure_key(provisioner, domain, &dkim.selector, dkim.key_size).await?;
        if let Some(record) = read_record(&txt)? {
            records.insert(record_name(&dkim.selector, domain), record);
        }
    }

    let dir = paths.opendkim_dir();
    provisioner.render(&dir.join("key_table"), &key_table(config, paths), Some(Service::Opendkim))?;
    provisioner.render(&dir.join("signing_table"), &signing_table(config), Some(Service::Opendkim))?;
    provisioner.render(&dir.join("trusted_hosts"), &trusted_hosts(config), Some(Service::Opendkim))?;
    provisioner.render(&paths.dkim_dns_records(), &dns_records_file(&records), None)?;
    provisioner.render(
        &dir.join("spf_dmarc_instructions.txt"),
        &spf_dmarc_instructions(config),
        None,
    )?;
    provisioner.render(&dir.join("opendkim.conf"), &opendkim_conf(paths), Some(Service::Opendkim))?;

    tracing::info!(domains = dkim.domains.len(), "OpenDKIM configuration complete");
    Ok(records)
}
