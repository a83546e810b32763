//! Postfix configuration.
//!
//! # Responsibilities
//! - Render `main.cf` and `master.cf`
//! - Render the virtual alias, transport and SASL maps and compile them
//!   with `postmap`
//!
//! # Design Decisions
//! - Rendering is pure (`ForwarderConfig` → `String`); only `configure`
//!   touches disk
//! - Several destinations for one source become one alias line, since
//!   postmap keeps only the first of duplicate keys

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::config::ForwarderConfig;
use crate::provision::command::{Cmd, CommandRunner};
use crate::provision::files::set_mode;
use crate::provision::services::Service;
use crate::provision::{tls, Paths, ProvisionError, Provisioner};

const HEADER: &str = "# Generated by mail-forwarder. Local changes are overwritten.\n";

/// postsrsd forward/reverse lookup ports.
pub const SRS_FORWARD_PORT: u16 = 10001;
pub const SRS_REVERSE_PORT: u16 = 10002;

fn virtual_map(paths: &Paths) -> PathBuf {
    paths.postfix_dir().join("virtual")
}

fn transport_map(paths: &Paths) -> PathBuf {
    paths.postfix_dir().join("transport")
}

fn sasl_passwd(paths: &Paths) -> PathBuf {
    paths.postfix_dir().join("sasl_passwd")
}

fn sasl_users(paths: &Paths) -> PathBuf {
    paths.postfix_dir().join("sasl_users")
}

/// Render `main.cf`.
pub fn main_cf(config: &ForwarderConfig, paths: &Paths) -> String {
    let smtp = &config.smtp;
    let mut out = String::from(HEADER);

    push_line!(out, "compatibility_level = 3.6");
    push_line!(out, "myhostname = {}", smtp.hostname);
    push_line!(out, "mydomain = {}", smtp.parent_domain());
    push_line!(out, "myorigin = $myhostname");
    push_line!(out, "smtp_helo_name = {}", smtp.helo());
    push_line!(out, "mydestination = localhost");
    push_line!(out, "inet_interfaces = all");
    push_line!(out, "inet_protocols = all");
    push_line!(out, "mynetworks = 127.0.0.0/8 [::1]/128");
    push_line!(out, "maillog_file = /dev/stdout");
    push_line!(out, "smtputf8_enable = no");
    push_line!(out, "biff = no");
    push_line!(out, "append_dot_mydomain = no");
    push_line!(out);

    let domains = config.rule_domains();
    push_line!(out, "# Forwarding");
    push_line!(
        out,
        "virtual_alias_domains = {}",
        domains.iter().map(String::as_str).collect::<Vec<_>>().join(" ")
    );
    push_line!(out, "virtual_alias_maps = hash:{}", virtual_map(paths).display());
    push_line!(
        out,
        "smtpd_recipient_restrictions = permit_mynetworks, permit_sasl_authenticated, reject_unauth_destination"
    );

    if let Some(relay) = smtp.relay_host.as_deref() {
        push_line!(out);
        push_line!(out, "# Relay");
        push_line!(out, "relayhost = [{}]:{}", relay, smtp.relay_port);
        push_line!(out, "transport_maps = hash:{}", transport_map(paths).display());
        if smtp.relay_auth().is_some() {
            push_line!(out, "smtp_sasl_auth_enable = yes");
            push_line!(out, "smtp_sasl_password_maps = hash:{}", sasl_passwd(paths).display());
            push_line!(out, "smtp_sasl_security_options = noanonymous");
        }
        let level = if smtp.use_tls { "encrypt" } else { "may" };
        push_line!(out, "smtp_tls_security_level = {}", level);
    } else {
        push_line!(out, "smtp_tls_security_level = may");
    }

    if config.dkim.enabled {
        push_line!(out);
        push_line!(out, "# DKIM");
        push_line!(out, "milter_default_action = accept");
        push_line!(out, "milter_protocol = 6");
        push_line!(out, "smtpd_milters = unix:{}", paths.opendkim_socket().display());
        push_line!(out, "non_smtpd_milters = $smtpd_milters");
    }

    if config.srs.enabled {
        push_line!(out);
        push_line!(out, "# SRS");
        push_line!(out, "sender_canonical_maps = tcp:localhost:{}", SRS_FORWARD_PORT);
        push_line!(out, "sender_canonical_classes = envelope_sender");
        push_line!(out, "recipient_canonical_maps = tcp:localhost:{}", SRS_REVERSE_PORT);
        push_line!(out, "recipient_canonical_classes = envelope_recipient, header_recipient");
    }

    if config.tls.enabled {
        push_line!(out);
        push_line!(out, "# TLS");
        out.push_str(&tls::postfix_settings(config, paths));
    }

    if smtp.smtp_auth_enabled {
        push_line!(out);
        push_line!(out, "# SASL authentication");
        push_line!(out, "smtpd_sasl_auth_enable = yes");
        push_line!(out, "smtpd_sasl_type = cyrus");
        push_line!(out, "smtpd_sasl_path = smtpd");
        push_line!(out, "smtpd_sasl_security_options = noanonymous");
        push_line!(out, "broken_sasl_auth_clients = yes");
    }

    out
}

/// Render `master.cf`.
pub fn master_cf(config: &ForwarderConfig) -> String {
    let smtp = &config.smtp;
    let mut out = String::from(HEADER);
    push_line!(
        out,
        "# service type  private unpriv  chroot  wakeup  maxproc command + args"
    );

    if smtp.enable_smtp {
        push_line!(out, "smtp      inet  n       -       y       -       -       smtpd");
    }

    let auth_options = |out: &mut String| {
        if smtp.smtp_auth_enabled {
            push_line!(out, "  -o smtpd_sasl_auth_enable=yes");
            push_line!(out, "  -o smtpd_client_restrictions=permit_sasl_authenticated,reject");
        }
    };

    if smtp.enable_submission {
        push_line!(out, "submission inet n       -       y       -       -       smtpd");
        push_line!(out, "  -o syslog_name=postfix/submission");
        if config.tls.enabled {
            push_line!(out, "  -o smtpd_tls_security_level=encrypt");
        }
        auth_options(&mut out);
    }

    if smtp.enable_smtps {
        push_line!(out, "smtps     inet  n       -       y       -       -       smtpd");
        push_line!(out, "  -o syslog_name=postfix/smtps");
        if config.tls.enabled {
            push_line!(out, "  -o smtpd_tls_wrappermode=yes");
        }
        auth_options(&mut out);
    }

    out.push_str(STANDARD_SERVICES);
    out
}

const STANDARD_SERVICES: &str = "\
pickup    unix  n       -       y       60      1       pickup
cleanup   unix  n       -       y       -       0       cleanup
qmgr      unix  n       -       n       300     1       qmgr
tlsmgr    unix  -       -       y       1000?   1       tlsmgr
rewrite   unix  -       -       y       -       -       trivial-rewrite
bounce    unix  -       -       y       -       0       bounce
defer     unix  -       -       y       -       0       bounce
trace     unix  -       -       y       -       0       bounce
verify    unix  -       -       y       -       1       verify
flush     unix  n       -       y       1000?   0       flush
proxymap  unix  -       -       n       -       -       proxymap
proxywrite unix -       -       n       -       1       proxymap
smtp      unix  -       -       y       -       -       smtp
relay     unix  -       -       y       -       -       smtp
showq     unix  n       -       y       -       -       showq
error     unix  -       -       y       -       -       error
retry     unix  -       -       y       -       -       error
discard   unix  -       -       y       -       -       discard
local     unix  -       n       n       -       -       local
virtual   unix  -       n       n       -       -       virtual
lmtp      unix  -       -       y       -       -       lmtp
anvil     unix  -       -       y       -       1       anvil
scache    unix  -       -       y       -       1       scache
postlog   unix-dgram n  -       n       -       1       postlogd
";

/// Render the virtual alias table, one line per source.
pub fn virtual_aliases(config: &ForwarderConfig) -> String {
    let mut grouped: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for rule in config.rules_by_source() {
        let destinations = grouped.entry(rule.alias_key()).or_default();
        if !destinations.contains(&rule.destination()) {
            destinations.push(rule.destination());
        }
    }

    let mut out = String::from(HEADER);
    for (source, destinations) in grouped {
        push_line!(out, "{}\t{}", source, destinations.join(", "));
    }
    out
}

/// Render the relay transport map. `None` without a relay host.
pub fn transport(config: &ForwarderConfig) -> Option<String> {
    let relay = config.smtp.relay_host.as_deref()?;
    let hostname = config.smtp.hostname.to_ascii_lowercase();

    let mut out = String::from(HEADER);
    for domain in config.rule_domains() {
        if domain != hostname {
            push_line!(out, "{}\tsmtp:[{}]:{}", domain, relay, config.smtp.relay_port);
        }
    }
    Some(out)
}

/// Render relay credentials. `None` unless host, user and password are set.
pub fn relay_credentials(config: &ForwarderConfig) -> Option<String> {
    let relay = config.smtp.relay_host.as_deref()?;
    let (user, pass) = config.smtp.relay_auth()?;
    Some(format!(
        "{HEADER}[{}]:{}\t{}:{}\n",
        relay, config.smtp.relay_port, user, pass
    ))
}

/// Render the SASL user table. `None` when SMTP auth is off.
pub fn smtp_users(config: &ForwarderConfig) -> Option<String> {
    if !config.smtp.smtp_auth_enabled || config.smtp.smtp_users.is_empty() {
        return None;
    }
    let mut out = String::new();
    for (user, pass) in &config.smtp.smtp_users {
        push_line!(out, "{}:{}", user, pass);
    }
    Some(out)
}

/// Render the cyrus SASL `smtpd.conf`.
pub fn sasl_smtpd_conf(paths: &Paths) -> String {
    format!(
        "pwcheck_method: auxprop\n\
         auxprop_plugin: sasldb\n\
         mech_list: PLAIN LOGIN CRAM-MD5 DIGEST-MD5\n\
         sasldb_path: {}.db\n",
        sasl_users(paths).display()
    )
}

/// Render and install all postfix files.
pub async fn configure<R: CommandRunner>(
    provisioner: &Provisioner<R>,
    config: &ForwarderConfig,
) -> Result<(), ProvisionError> {
    tracing::info!("Configuring Postfix");
    let paths = provisioner.paths();

    provisioner.render(
        &paths.postfix_dir().join("main.cf"),
        &main_cf(config, paths),
        Some(Service::Postfix),
    )?;
    provisioner.render(
        &paths.postfix_dir().join("master.cf"),
        &master_cf(config),
        Some(Service::Postfix),
    )?;

    let path = virtual_map(paths);
    let changed = provisioner.render(&path, &virtual_aliases(config), Some(Service::Postfix))?;
    postmap(provisioner, &path, changed, None).await?;
    tracing::info!(rules = config.forwarding_rules.len(), "Virtual alias map ready");

    if let Some(content) = transport(config) {
        let path = transport_map(paths);
        let changed = provisioner.render(&path, &content, Some(Service::Postfix))?;
        postmap(provisioner, &path, changed, None).await?;
    }

    if let Some(content) = relay_credentials(config) {
        let path = sasl_passwd(paths);
        let changed = provisioner.render(&path, &content, Some(Service::Postfix))?;
        postmap(provisioner, &path, changed, Some(0o600)).await?;
    }

    if let Some(content) = smtp_users(config) {
        tracing::info!(users = config.smtp.smtp_users.len(), "Configuring SMTP authentication");
        let path = sasl_users(paths);
        let changed = provisioner.render(&path, &content, Some(Service::Saslauthd))?;
        postmap(provisioner, &path, changed, Some(0o600)).await?;
        provisioner.render(
            &paths.sasl_smtpd_conf(),
            &sasl_smtpd_conf(paths),
            Some(Service::Saslauthd),
        )?;
    }

    Ok(())
}

/// Compile a lookup table when it changed or has never been compiled.
async fn postmap<R: CommandRunner>(
    provisioner: &Provisioner<R>,
    path: &Path,
    changed: bool,
    mode: Option<u32>,
) -> Result<(), ProvisionError> {
    let db = db_path(path);
    if !changed && db.exists() {
        return Ok(());
    }

    provisioner
        .runner()
        .run_checked(&Cmd::new("postmap").arg(path.display().to_string()))
        .await?;

    if let Some(mode) = mode {
        set_mode(path, mode).map_err(|e| ProvisionError::io(path, e))?;
        if db.exists() {
            set_mode(&db, mode).map_err(|e| ProvisionError::io(&db, e))?;
        }
    }
    Ok(())
}

fn db_path(path: &Path) -> PathBuf {
    let mut db = path.as_os_str().to_owned();
    db.push(".db");
    PathBuf::from(db)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ForwardingRule;

    fn config() -> ForwarderConfig {
        let mut config = ForwarderConfig::default();
        config.smtp.hostname = "mail.example.com".into();
        config.forwarding_rules = vec![
            ForwardingRule::detect("zed@example.com", "z@dest.net").unwrap(),
            ForwardingRule::detect("alice@example.com", "a1@dest.net").unwrap(),
            ForwardingRule::detect("alice@example.com", "a2@dest.net").unwrap(),
            ForwardingRule::detect("*@example.org", "all@dest.net").unwrap(),
        ];
        config
    }

    #[test]
    fn test_virtual_aliases_sorted_and_grouped() {
        let out = virtual_aliases(&config());
        let lines: Vec<&str> = out.lines().filter(|l| !l.starts_with('#')).collect();
        assert_eq!(
            lines,
            vec![
                "@example.org\tall@dest.net",
                "alice@example.com\ta1@dest.net, a2@dest.net",
                "zed@example.com\tz@dest.net",
            ]
        );
    }

    #[test]
    fn test_transport_only_with_relay() {
        let mut config = config();
        assert!(transport(&config).is_none());

        config.smtp.relay_host = Some("relay.net".into());
        config.smtp.relay_port = 587;
        let out = transport(&config).unwrap();
        assert!(out.contains("example.com\tsmtp:[relay.net]:587"));
        assert!(out.contains("example.org\tsmtp:[relay.net]:587"));
    }

    #[test]
    fn test_relay_credentials_need_both_parts() {
        let mut config = config();
        config.smtp.relay_host = Some("relay.net".into());
        config.smtp.relay_username = Some("u".into());
        assert!(relay_credentials(&config).is_none());

        config.smtp.relay_password = Some("p".into());
        assert!(relay_credentials(&config).unwrap().contains("[relay.net]:25\tu:p"));
    }

    #[test]
    fn test_main_cf_sections() {
        let mut config = config();
        config.tls.domains.insert("mail.example.com".into());
        let paths = Paths::system();
        let out = main_cf(&config, &paths);

        assert!(out.contains("myhostname = mail.example.com"));
        assert!(out.contains("smtp_helo_name = mail.example.com"));
        assert!(out.contains("virtual_alias_domains = example.com example.org"));
        assert!(out.contains("virtual_alias_maps = hash:/etc/postfix/virtual"));
        assert!(out.contains("smtpd_milters = unix:/var/run/opendkim/opendkim.sock"));
        assert!(out.contains("sender_canonical_maps = tcp:localhost:10001"));
        assert!(out.contains("smtpd_tls_security_level = may"));
        assert!(!out.contains("relayhost"));
        assert!(!out.contains("smtpd_sasl_auth_enable"));
    }

    #[test]
    fn test_master_cf_ports() {
        let mut config = config();
        config.smtp.enable_smtps = false;
        config.smtp.smtp_auth_enabled = true;
        let out = master_cf(&config);

        assert!(out.contains("smtp      inet"));
        assert!(out.contains("submission inet"));
        assert!(!out.contains("smtps     inet"));
        assert!(out.contains("-o smtpd_sasl_auth_enable=yes"));
    }

    #[test]
    fn test_smtp_users_table() {
        let mut config = config();
        assert!(smtp_users(&config).is_none());

        config.smtp.smtp_users.insert("bob".into(), "pw".into());
        config.smtp.smtp_auth_enabled = true;
        assert_eq!(smtp_users(&config).unwrap(), "bob:pw\n");
    }

    #[test]
    fn test_db_path() {
        assert_eq!(
            db_path(Path::new("/etc/postfix/virtual")),
            PathBuf::from("/etc/postfix/virtual.db")
        );
    }
}
