//! supervisord program list and startup.

use std::path::Path;
use std::time::Duration;

use tokio::time::{self, Instant};

use crate::config::ForwarderConfig;
use crate::provision::command::{Cmd, CommandRunner};
use crate::provision::services::Service;
use crate::provision::{ProvisionError, Provisioner};

/// How long to wait for the control socket after starting supervisord.
pub const STARTUP_TIMEOUT: Duration = Duration::from_secs(30);

const POLL_INTERVAL: Duration = Duration::from_secs(1);

fn command_for(service: Service) -> &'static str {
    match service {
        Service::Postfix => "/usr/sbin/postfix start-fg",
        Service::Opendkim => "/usr/sbin/opendkim -f -x /etc/opendkim/opendkim.conf",
        // postsrsd reads its settings from the rendered defaults file.
        Service::Postsrsd => {
            "/bin/sh -c '. /etc/default/postsrsd && exec /usr/sbin/postsrsd -f \"$SRS_FORWARD_PORT\" -r \"$SRS_REVERSE_PORT\" -d \"$SRS_DOMAIN\" -X\"$SRS_EXCLUDE_DOMAINS\"'"
        }
        Service::Saslauthd => "/usr/sbin/saslauthd -d -a sasldb",
        Service::Fail2ban => "/usr/bin/fail2ban-server -f -x",
    }
}

/// Services supervisord should run for `config`.
pub fn programs(config: &ForwarderConfig) -> Vec<Service> {
    Service::ALL
        .into_iter()
        .filter(|service| match service {
            Service::Postfix => true,
            Service::Opendkim => config.dkim.enabled,
            Service::Postsrsd => config.srs.enabled,
            Service::Saslauthd => config.smtp.smtp_auth_enabled,
            Service::Fail2ban => config.security.fail2ban_enabled,
        })
        .collect()
}

/// Render `conf.d/mail-forwarder.conf`.
pub fn program_conf(config: &ForwarderConfig) -> String {
    let mut out = String::from("; Generated by mail-forwarder\n");
    for service in programs(config) {
        push_line!(out, "\n[program:{}]", service);
        push_line!(out, "command={}", command_for(service));
        push_line!(out, "autostart=true");
        push_line!(out, "autorestart=true");
        push_line!(out, "startsecs=5");
        push_line!(out, "stdout_logfile=/dev/stdout");
        push_line!(out, "stdout_logfile_maxbytes=0");
        push_line!(out, "redirect_stderr=true");
    }
    out
}

pub fn configure<R: CommandRunner>(
    provisioner: &Provisioner<R>,
    config: &ForwarderConfig,
) -> Result<(), ProvisionError> {
    let path = provisioner.paths().supervisor_program_conf();
    provisioner.render(&path, &program_conf(config), None)?;
    tracing::debug!(programs = programs(config).len(), "Generated supervisor configuration");
    Ok(())
}

/// Poll until `socket` exists or `timeout` elapses.
pub async fn wait_for_socket(socket: &Path, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if socket.exists() {
            tracing::info!("Supervisor is ready");
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tracing::info!("Waiting for supervisor to be ready...");
        time::sleep(POLL_INTERVAL).await;
    }
}

/// Start supervisord and wait for its control socket.
pub async fn start_and_wait<R: CommandRunner>(
    provisioner: &Provisioner<R>,
    timeout: Duration,
) -> Result<(), ProvisionError> {
    let paths = provisioner.paths();
    tracing::info!("Starting supervisord to manage all services");
    provisioner
        .runner()
        .run_checked(
            &Cmd::new("supervisord")
                .arg("-c")
                .arg(paths.supervisord_conf().display().to_string()),
        )
        .await?;

    if !wait_for_socket(&paths.supervisor_socket(), timeout).await {
        tracing::error!(timeout_secs = timeout.as_secs(), "Supervisor did not become ready");
        return Err(ProvisionError::SupervisorTimeout(timeout.as_secs()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provision::command::DryRunRunner;
    use crate::provision::services::ServiceTable;
    use crate::provision::Paths;

    #[test]
    fn test_programs_follow_config() {
        let mut config = ForwarderConfig::default();
        assert_eq!(
            programs(&config),
            vec![Service::Postfix, Service::Opendkim, Service::Postsrsd, Service::Fail2ban]
        );

        config.dkim.enabled = false;
        config.srs.enabled = false;
        config.security.fail2ban_enabled = false;
        config.smtp.smtp_auth_enabled = true;
        assert_eq!(programs(&config), vec![Service::Postfix, Service::Saslauthd]);
    }

    #[test]
    fn test_program_conf_sections() {
        let out = program_conf(&ForwarderConfig::default());
        assert!(out.contains("[program:postfix]\n"));
        assert!(out.contains("[program:fail2ban]\n"));
        assert!(!out.contains("[program:saslauthd]"));
        assert!(out.contains(". /etc/default/postsrsd"));
    }

    #[tokio::test]
    async fn test_start_and_wait_ready() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::under(dir.path());
        let socket = paths.supervisor_socket();
        std::fs::create_dir_all(socket.parent().unwrap()).unwrap();
        std::fs::write(&socket, "").unwrap();

        let provisioner = Provisioner::new(paths, DryRunRunner::new(), ServiceTable::empty());
        start_and_wait(&provisioner, Duration::from_secs(1)).await.unwrap();
        assert!(provisioner.runner().lines()[0].starts_with("supervisord -c "));
    }

    #[tokio::test]
    async fn test_start_and_wait_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let provisioner =
            Provisioner::new(Paths::under(dir.path()), DryRunRunner::new(), ServiceTable::empty());
        let err = start_and_wait(&provisioner, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, ProvisionError::SupervisorTimeout(1)));
    }
}
