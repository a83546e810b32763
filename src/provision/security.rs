//! fail2ban jails protecting SMTP authentication.


use crate::config::{ForwarderConfig, SecurityConfig};
use crate::provision::command::CommandRunner;
use crate::provision::services::Service;
use crate::provision::{ProvisionError, Provisioner};

/// Jail name for failed SASL logins.
pub const SASL_JAIL: &str = "postfix-sasl";

fn limits(out: &mut String, security: &SecurityConfig) {
    push_line!(out, "maxretry = {}", security.max_attempts);
    push_line!(out, "bantime = {}", security.ban_time);
    push_line!(out, "findtime = {}", security.find_time);
}

/// `jail.local`: global defaults.
pub fn jail_local(security: &SecurityConfig) -> String {
    let mut out = String::from("# Generated by mail-forwarder\n[DEFAULT]\n");
    limits(&mut out, security);
    out.push_str("banaction = iptables-multiport\n");
    out.push_str("backend = auto\n");
    out.push_str("ignoreip = 127.0.0.1/8 ::1\n");
    out
}

/// `filter.d/postfix-sasl.conf`
pub fn sasl_filter() -> String {
    String::from(
        "# Generated by mail-forwarder\n\
         [INCLUDES]\n\
         before = common.conf\n\
         \n\
         [Definition]\n\
         _daemon = postfix(-\\w+)?/\\w+(?:/smtp[ds])?\n\
         failregex = ^%(__prefix_line)swarning: [-._\\w]+\\[<HOST>\\]: SASL ((?i)LOGIN|PLAIN|(?:CRAM|DIGEST)-MD5) authentication failed(:[ A-Za-z0-9+/]*={0,2})?\\s*$\n\
         ignoreregex = authentication failed: Connection lost to authentication server$\n",
    )
}

/// `jail.d/postfix.conf`
pub fn postfix_jail(config: &ForwarderConfig) -> String {
    let mut ports = vec!["smtp"];
    if config.smtp.enable_submission {
        ports.push("submission");
    }
    if config.smtp.enable_smtps {
        ports.push("smtps");
    }

    let mut out = String::from("# Generated by mail-forwarder\n");
    push_line!(out, "[{}]", SASL_JAIL);
    out.push_str("enabled = true\n");
    push_line!(out, "port = {}", ports.join(","));
    push_line!(out, "filter = {}", SASL_JAIL);
    out.push_str("logpath = /var/log/mail.log\n");
    limits(&mut out, &config.security);
    out
}

pub fn configure<R: CommandRunner>(
    provisioner: &Provisioner<R>,
    config: &ForwarderConfig,
) -> Result<(), ProvisionError> {
    if !config.security.fail2ban_enabled {
        tracing::info!("Fail2ban is disabled, skipping configuration");
        return Ok(());
    }

    tracing::info!("Configuring Fail2ban");
    let dir = provisioner.paths().fail2ban_dir();
    let fail2ban = Some(Service::Fail2ban);
    provisioner.render(&dir.join("jail.local"), &jail_local(&config.security), fail2ban)?;
    provisioner.render(&dir.join("filter.d").join("postfix-sasl.conf"), &sasl_filter(), fail2ban)?;
    provisioner.render(&dir.join("jail.d").join("postfix.conf"), &postfix_jail(config), fail2ban)?;

    tracing::info!(
        max_attempts = config.security.max_attempts,
        ban_time = config.security.ban_time,
        "Fail2ban configured"
    );
    Ok(())
}
