//! Provisioning subsystem.
//!
//! # Data Flow
//! ```text
//! ForwarderConfig (validated, read-only)
//!     → srs.rs        (materialise persisted secret)
//!     → supervisor.rs (program list)
//!     → dkim.rs       (keys via opendkim-genkey, tables)
//!     → tls.rs        (certbot / openssl, postfix TLS snippet)
//!     → postfix.rs    (main.cf, master.cf, maps via postmap)
//!     → security.rs   (fail2ban jails and filters)
//!
//! Each rendered file:
//!     files.rs writes it only if the content changed
//!     → owning service marked for reload
//!     → ServiceTable reloads each marked, enabled service once
//! ```
//!
//! # Design Decisions
//! - Steps run sequentially; any error aborts the run
//! - Filesystem locations come from `Paths` so a run can target a scratch root
//! - External tools only run through `CommandRunner`

pub mod command;
pub mod dkim;
pub mod files;
pub mod postfix;
pub mod security;
pub mod services;
pub mod srs;
pub mod supervisor;
pub mod tls;

use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;

use crate::config::ForwarderConfig;
use command::CommandRunner;
use services::{Service, ServiceTable};

/// Errors raised while provisioning services.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("`{command}` failed (exit code {code:?}): {stderr}")]
    Command {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("could not read DKIM record from {path}")]
    DkimRecord { path: PathBuf },

    #[error("certificate for {domain}: {reason}")]
    Certificate { domain: String, reason: String },

    #[error("supervisor did not become ready within {0} seconds")]
    SupervisorTimeout(u64),
}

impl ProvisionError {
    pub fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Filesystem layout of the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    root: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self::system()
    }
}

impl Paths {
    /// The real layout rooted at `/`.
    pub fn system() -> Self {
        Self::under("/")
    }

    /// The same layout below `root`.
    pub fn under(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn join(&self, absolute: &str) -> PathBuf {
        self.root.join(absolute.trim_start_matches('/'))
    }

    pub fn postfix_dir(&self) -> PathBuf {
        self.join("/etc/postfix")
    }

    pub fn postfix_certs_dir(&self) -> PathBuf {
        self.join("/etc/postfix/certs")
    }

    pub fn tls_params(&self) -> PathBuf {
        self.join("/etc/postfix/tls_params.pem")
    }

    pub fn opendkim_dir(&self) -> PathBuf {
        self.join("/etc/opendkim")
    }

    pub fn dkim_keys_dir(&self) -> PathBuf {
        self.join("/etc/opendkim/keys")
    }

    pub fn dkim_dns_records(&self) -> PathBuf {
        self.join("/etc/opendkim/dns_records.txt")
    }

    pub fn opendkim_socket(&self) -> PathBuf {
        self.join("/var/run/opendkim/opendkim.sock")
    }

    pub fn letsencrypt_dir(&self) -> PathBuf {
        self.join("/etc/letsencrypt")
    }

    pub fn letsencrypt_live(&self) -> PathBuf {
        self.join("/etc/letsencrypt/live")
    }

    pub fn fail2ban_dir(&self) -> PathBuf {
        self.join("/etc/fail2ban")
    }

    pub fn postsrsd_conf(&self) -> PathBuf {
        self.join("/etc/default/postsrsd")
    }

    pub fn sasl_smtpd_conf(&self) -> PathBuf {
        self.join("/etc/sasl2/smtpd.conf")
    }

    pub fn supervisor_program_conf(&self) -> PathBuf {
        self.join("/etc/supervisor/conf.d/mail-forwarder.conf")
    }

    pub fn supervisord_conf(&self) -> PathBuf {
        self.join("/etc/supervisor/supervisord.conf")
    }

    pub fn supervisor_socket(&self) -> PathBuf {
        self.join("/var/run/supervisor.sock")
    }
}

/// Renders configuration files and drives external tools.
pub struct Provisioner<R> {
    paths: Paths,
    runner: R,
    services: ServiceTable,
    pending: Mutex<BTreeSet<Service>>,
}

impl<R: CommandRunner> Provisioner<R> {
    pub fn new(paths: Paths, runner: R, services: ServiceTable) -> Self {
        Self {
            paths,
            runner,
            services,
            pending: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Write a rendered file and mark its service for reload if it changed.
    pub fn render(
        &self,
        path: &Path,
        content: &str,
        service: Option<Service>,
    ) -> Result<bool, ProvisionError> {
        let changed =
            files::write_if_changed(path, content).map_err(|e| ProvisionError::io(path, e))?;
        if changed {
            if let (Some(service), Ok(mut pending)) = (service, self.pending.lock()) {
                pending.insert(service);
            }
        }
        Ok(changed)
    }

    /// Services with changed files that have not been reloaded yet.
    pub fn pending_reloads(&self) -> Vec<Service> {
        self.pending
            .lock()
            .map(|p| p.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Reload every service whose files changed, once each.
    pub async fn flush_reloads(&self, config: &ForwarderConfig) -> Vec<Service> {
        let pending: Vec<Service> = match self.pending.lock() {
            Ok(mut pending) => std::mem::take(&mut *pending).into_iter().collect(),
            Err(_) => Vec::new(),
        };

        let mut reloaded = Vec::new();
        for service in pending {
            if self.services.reload(service, config, &self.runner).await {
                reloaded.push(service);
            }
        }
        reloaded
    }

    /// Forget pending reloads, e.g. when supervisord is about to start
    /// everything anyway.
    pub fn discard_reloads(&self) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.clear();
        }
    }

    /// Run every provisioning step in dependency order.
    pub async fn provision_all(&self, config: &ForwarderConfig) -> Result<(), ProvisionError> {
        supervisor::configure(self, config)?;
        dkim::configure(self, config).await?;
        tls::configure(self, config).await?;
        postfix::configure(self, config).await?;
        srs::configure(self, config)?;
        security::configure(self, config)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provision::command::DryRunRunner;

    #[test]
    fn test_paths_under_root() {
        let paths = Paths::under("/tmp/x");
        assert_eq!(paths.postfix_dir(), PathBuf::from("/tmp/x/etc/postfix"));
        assert_eq!(Paths::system().postsrsd_conf(), PathBuf::from("/etc/default/postsrsd"));
    }

    #[tokio::test]
    async fn test_render_marks_and_flushes_once() {
        let dir = tempfile::tempdir().unwrap();
        let provisioner = Provisioner::new(
            Paths::under(dir.path()),
            DryRunRunner::new(),
            ServiceTable::standard(),
        );
        let config = ForwarderConfig::default();

        let a = dir.path().join("a");
        let b = dir.path().join("b");
        assert!(provisioner.render(&a, "1", Some(Service::Postfix)).unwrap());
        assert!(provisioner.render(&b, "1", Some(Service::Postfix)).unwrap());
        assert!(!provisioner.render(&b, "1", Some(Service::Fail2ban)).unwrap());
        assert_eq!(provisioner.pending_reloads(), vec![Service::Postfix]);

        let reloaded = provisioner.flush_reloads(&config).await;
        assert_eq!(reloaded, vec![Service::Postfix]);
        assert_eq!(provisioner.runner().lines(), vec!["postfix reload"]);
        assert!(provisioner.pending_reloads().is_empty());
    }
}
