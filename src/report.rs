//! Operator-facing views of the resolved configuration.
//!
//! # Responsibilities
//! - Plain-text summary printed after initialisation
//! - Machine-readable dumps (JSON, TOML) for `mail-forwarder config`
//!
//! Secrets never appear in any of these views.


use crate::config::{DomainSet, ForwarderConfig, SrsSecret};

const REDACTED: &str = "<redacted>";

/// Output format for `mail-forwarder config`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Format {
    #[default]
    Table,
    Json,
    Toml,
}

/// Left-aligned plain table.
pub(crate) fn table(headers: Option<&[&str]>, rows: &[Vec<String>]) -> String {
    let columns = rows
        .iter()
        .map(Vec::len)
        .chain(headers.map(|h| h.len()))
        .max()
        .unwrap_or(0);
    let mut widths = vec![0; columns];
    for (i, header) in headers.unwrap_or(&[]).iter().enumerate() {
        widths[i] = header.chars().count();
    }
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.chars().count());
        }
    }

    let mut out = String::new();
    if let Some(headers) = headers {
        push_row(&mut out, &widths, headers);
        let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
        push_row(&mut out, &widths, &rule);
    }
    for row in rows {
        push_row(&mut out, &widths, row);
    }
    out
}

fn push_row<S: AsRef<str>>(out: &mut String, widths: &[usize], cells: &[S]) {
    let rendered: Vec<String> = cells
        .iter()
        .zip(widths)
        .map(|(cell, width)| format!("{:<width$}", cell.as_ref(), width = width))
        .collect();
    push_line!(out, "{}", rendered.join("  ").trim_end());
}

fn yes_no(value: bool) -> String {
    if value { "Yes" } else { "No" }.to_string()
}

fn enabled(value: bool) -> String {
    if value { "Enabled" } else { "Disabled" }.to_string()
}

fn domains(set: &DomainSet) -> String {
    if set.is_empty() {
        "None".to_string()
    } else {
        set.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
    }
}

fn row(label: &str, value: impl ToString) -> Vec<String> {
    vec![label.to_string(), value.to_string()]
}

fn section(out: &mut String, title: &str, rows: &[Vec<String>]) {
    push_line!(out, "\n{}:", title);
    out.push_str(&table(None, rows));
}

/// Plain-text summary of `config`.
pub fn summary(config: &ForwarderConfig) -> String {
    let smtp = &config.smtp;
    let mut out = String::new();

    section(
        &mut out,
        "Basic Configuration",
        &[
            row("SMTP Hostname", &smtp.hostname),
            row("HELO Name", smtp.helo()),
            row("Debug Mode", enabled(config.debug)),
        ],
    );

    section(
        &mut out,
        "Ports",
        &[
            row("Port 25 (SMTP)", enabled(smtp.enable_smtp)),
            row("Port 587 (Submission)", enabled(smtp.enable_submission)),
            row("Port 465 (SMTPS)", enabled(smtp.enable_smtps)),
        ],
    );

    let rules: Vec<Vec<String>> = config
        .forwarding_rules
        .iter()
        .map(|r| vec![r.source().to_string(), "->".to_string(), r.destination().to_string()])
        .collect();
    section(&mut out, "Forwarding Rules", &rules);

    let dkim = &config.dkim;
    let mut rows = vec![row("Enabled", yes_no(dkim.enabled))];
    if dkim.enabled {
        rows.push(row("Selector", &dkim.selector));
        rows.push(row("Key Size", format!("{} bits", dkim.key_size)));
        rows.push(row("Domains", domains(&dkim.domains)));
    }
    section(&mut out, "DKIM Configuration", &rows);

    let tls = &config.tls;
    let mut rows = vec![row("Enabled", yes_no(tls.enabled))];
    if tls.enabled {
        rows.push(row("Email", &tls.email));
        rows.push(row("Challenge Type", tls.challenge_type));
        rows.push(row("Staging", yes_no(tls.staging)));
        rows.push(row("Domains", domains(&tls.domains)));
    }
    section(&mut out, "TLS Configuration", &rows);

    let srs = &config.srs;
    let mut rows = vec![row("Enabled", yes_no(srs.enabled))];
    if srs.enabled {
        rows.push(row("Domain", srs.domain.as_deref().unwrap_or("None")));
        let secret = match &srs.secret {
            SrsSecret::Fixed(s) if !s.is_empty() => "Set",
            SrsSecret::AutoGeneratePersisted(_) => "Set (persisted)",
            _ => "Not Set",
        };
        rows.push(row("Secret", secret));
        rows.push(row("Excluded Domains", domains(&srs.exclude_domains)));
    }
    section(&mut out, "SRS (Sender Rewriting Scheme) Configuration", &rows);

    let mut rows = vec![row("Relay Host", smtp.relay_host.as_deref().unwrap_or("None"))];
    if smtp.relay_host.is_some() {
        rows.push(row("Relay Port", smtp.relay_port));
        rows.push(row("Use TLS", yes_no(smtp.use_tls)));
        rows.push(row("Authentication", yes_no(smtp.relay_auth().is_some())));
    }
    section(&mut out, "SMTP Relay Configuration", &rows);

    let security = &config.security;
    let mut rows = vec![row("Fail2Ban", enabled(security.fail2ban_enabled))];
    if security.fail2ban_enabled {
        rows.push(row("Max Attempts", security.max_attempts));
        rows.push(row("Ban Time", format!("{} seconds", security.ban_time)));
        rows.push(row("Find Time", format!("{} seconds", security.find_time)));
    }
    section(&mut out, "Security Configuration", &rows);

    out
}

/// Copy of `config` with every secret replaced.
pub fn redacted(config: &ForwarderConfig) -> ForwarderConfig {
    let mut copy = config.clone();
    if let SrsSecret::Fixed(secret) = &mut copy.srs.secret {
        *secret = REDACTED.to_string();
    }
    if let Some(password) = &mut copy.smtp.relay_password {
        *password = REDACTED.to_string();
    }
    for password in copy.smtp.smtp_users.values_mut() {
        *password = REDACTED.to_string();
    }
    copy
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML serialization failed: {0}")]
    Toml(#[from] toml::ser::Error),
}

/// Render `config` in `format` with secrets redacted.
pub fn render(config: &ForwarderConfig, format: Format) -> Result<String, RenderError> {
    match format {
        Format::Table => Ok(summary(config)),
        Format::Json => Ok(serde_json::to_string_pretty(&redacted(config))?),
        Format::Toml => Ok(toml::to_string_pretty(&redacted(config))?),
    }
}
