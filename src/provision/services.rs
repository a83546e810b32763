//! Service reload table.
//!
//! Built once at startup and handed to the provisioner. Maps each managed
//! daemon to the commands that reload it and the predicate deciding whether
//! it runs at all for a given configuration.

use std::collections::BTreeMap;
use std::fmt;

use crate::config::ForwarderConfig;
use crate::provision::command::{Cmd, CommandRunner};

/// Daemons whose configuration files we render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Service {
    Postfix,
    Opendkim,
    Postsrsd,
    Saslauthd,
    Fail2ban,
}

impl Service {
    pub const ALL: [Service; 5] = [
        Service::Postfix,
        Service::Opendkim,
        Service::Postsrsd,
        Service::Saslauthd,
        Service::Fail2ban,
    ];

    /// Program name as known to supervisord.
    pub fn name(self) -> &'static str {
        match self {
            Service::Postfix => "postfix",
            Service::Opendkim => "opendkim",
            Service::Postsrsd => "postsrsd",
            Service::Saslauthd => "saslauthd",
            Service::Fail2ban => "fail2ban",
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How to reload one service and when it applies.
#[derive(Debug, Clone)]
pub struct ServiceEntry {
    /// Tried in order until one succeeds.
    pub reload: Vec<Cmd>,
    pub is_enabled: fn(&ForwarderConfig) -> bool,
}

/// Reload behaviour for every managed service.
#[derive(Debug, Clone, Default)]
pub struct ServiceTable {
    entries: BTreeMap<Service, ServiceEntry>,
}

impl ServiceTable {
    /// Empty table; nothing is ever reloaded.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The container's daemons, reloaded in place or started via supervisor.
    pub fn standard() -> Self {
        Self::empty()
            .with(
                Service::Postfix,
                vec![
                    Cmd::new("postfix").arg("reload"),
                    Cmd::new("postfix").arg("start"),
                ],
                |_| true,
            )
            .with(
                Service::Opendkim,
                vec![
                    Cmd::new("pkill").args(["-HUP", "opendkim"]),
                    supervisorctl("start", Service::Opendkim),
                ],
                |config| config.dkim.enabled,
            )
            .with(
                Service::Postsrsd,
                vec![supervisorctl("restart", Service::Postsrsd)],
                |config| config.srs.enabled,
            )
            .with(
                Service::Saslauthd,
                vec![supervisorctl("restart", Service::Saslauthd)],
                |config| config.smtp.smtp_auth_enabled,
            )
            .with(
                Service::Fail2ban,
                vec![
                    Cmd::new("fail2ban-client").arg("reload"),
                    supervisorctl("start", Service::Fail2ban),
                ],
                |config| config.security.fail2ban_enabled,
            )
    }

    pub fn with(
        mut self,
        service: Service,
        reload: Vec<Cmd>,
        is_enabled: fn(&ForwarderConfig) -> bool,
    ) -> Self {
        self.entries.insert(service, ServiceEntry { reload, is_enabled });
        self
    }

    pub fn get(&self, service: Service) -> Option<&ServiceEntry> {
        self.entries.get(&service)
    }

    /// Whether `service` is registered and enabled for `config`.
    pub fn is_enabled(&self, service: Service, config: &ForwarderConfig) -> bool {
        self.get(service)
            .is_some_and(|entry| (entry.is_enabled)(config))
    }

    /// Reload `service` if it is enabled. Failures are logged, not returned.
    ///
    /// Returns true when one of the reload commands succeeded.
    pub async fn reload<R: CommandRunner>(
        &self,
        service: Service,
        config: &ForwarderConfig,
        runner: &R,
    ) -> bool {
        let Some(entry) = self.get(service) else {
            return false;
        };
        if !(entry.is_enabled)(config) {
            tracing::debug!(%service, "Service disabled, not reloading");
            return false;
        }

        for cmd in &entry.reload {
            match runner.run(cmd).await {
                Ok(output) if output.is_success() => {
                    tracing::info!(%service, command = %cmd, "Service reloaded");
                    return true;
                }
                Ok(output) => {
                    tracing::warn!(%service, command = %cmd, code = ?output.code, "Reload attempt failed");
                }
                Err(e) => {
                    tracing::warn!(%service, command = %cmd, error = %e, "Reload attempt failed");
                }
            }
        }

        tracing::error!(%service, "Failed to reload service");
        false
    }
}

fn supervisorctl(action: &str, service: Service) -> Cmd {
    Cmd::new("supervisorctl").arg(action).arg(service.name())
}
