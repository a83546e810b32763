//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use mail_forwarder::config::Environment;
use mail_forwarder::provision::command::{Cmd, CommandOutput, DryRunRunner};
use mail_forwarder::provision::services::ServiceTable;
use mail_forwarder::provision::{Paths, Provisioner};
use tempfile::TempDir;

/// Public key fragment written by the fake `opendkim-genkey`.
pub const FAKE_PUBLIC_KEY: &str = "MIIBIjANBgkqhkiG9w0BAQEFAAOCAQ8AMIIBCgKCAQEAtest";

/// Environment with the minimum a valid configuration needs.
pub fn base_env(extra: &[(&str, &str)]) -> Environment {
    let mut pairs: Vec<(&str, &str)> = vec![
        ("SMTP_HOSTNAME", "mail.example.com"),
        ("TLS_EMAIL", "ops@example.com"),
        ("SRS_SECRET", "integration-secret"),
    ];
    pairs.extend_from_slice(extra);
    Environment::from_pairs(pairs)
}

fn flag_value<'a>(cmd: &'a Cmd, flag: &str) -> Option<&'a str> {
    cmd.args
        .iter()
        .position(|a| a == flag)
        .and_then(|i| cmd.args.get(i + 1))
        .map(String::as_str)
}

/// Mimic `opendkim-genkey` by writing the key pair it would produce.
pub fn fake_genkey(cmd: &Cmd) -> Option<CommandOutput> {
    if cmd.program != "opendkim-genkey" {
        return None;
    }
    let dir = PathBuf::from(flag_value(cmd, "-D")?);
    let selector = flag_value(cmd, "-s")?;
    let domain = flag_value(cmd, "-d")?;

    fs::create_dir_all(&dir).ok()?;
    fs::write(dir.join(format!("{}.private", selector)), "PRIVATE KEY").ok()?;
    fs::write(
        dir.join(format!("{}.txt", selector)),
        format!(
            "{}._domainkey\tIN\tTXT\t( \"v=DKIM1; h=sha256; k=rsa; \"\n\t  \"p={}\" )  ; ----- DKIM key {} for {}\n",
            selector, FAKE_PUBLIC_KEY, selector, domain
        ),
    )
    .ok()?;
    Some(CommandOutput::success())
}

/// Provisioner writing below a fresh temporary root.
pub fn scratch_provisioner(runner: DryRunRunner) -> (TempDir, Provisioner<DryRunRunner>) {
    let dir = tempfile::tempdir().unwrap();
    let provisioner = Provisioner::new(Paths::under(dir.path()), runner, ServiceTable::standard());
    (dir, provisioner)
}

pub fn read(path: impl AsRef<Path>) -> String {
    let path = path.as_ref();
    fs::read_to_string(path).unwrap_or_else(|e| panic!("{}: {}", path.display(), e))
}

pub fn exists(provisioner: &Provisioner<DryRunRunner>, relative: &str) -> bool {
    provisioner.paths().root().join(relative).exists()
}
