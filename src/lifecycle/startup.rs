//! Startup orchestration.
//!
//! # Responsibilities
//! - Load and validate configuration
//! - Resolve the SRS secret before anything is rendered
//! - Provision every service in dependency order
//! - Hand the daemons over to supervisord
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - First start discards pending reloads; supervisord starts everything
//! - Reconfigure reloads only what changed, each service once

use std::time::Duration;

use thiserror::Error;

use crate::config::{load_from, ConfigError, Environment, ForwarderConfig};
use crate::provision::command::CommandRunner;
use crate::provision::services::Service;
use crate::provision::srs::materialize_secret;
use crate::provision::{supervisor, ProvisionError, Provisioner};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("provisioning failed: {0}")]
    Provision(#[from] ProvisionError),
}

async fn prepare<R: CommandRunner>(
    provisioner: &Provisioner<R>,
    env: &Environment,
) -> Result<ForwarderConfig, StartupError> {
    let config = materialize_secret(load_from(env)?)?;
    tracing::info!(
        hostname = %config.smtp.hostname,
        rules = config.forwarding_rules.len(),
        dkim_domains = config.dkim.domains.len(),
        tls_domains = config.tls.domains.len(),
        "Configuration loaded"
    );

    provisioner.provision_all(&config).await?;
    Ok(config)
}

/// First start of the container.
///
/// With `supervisor_timeout` set, supervisord is started and awaited;
/// `None` leaves process management to the caller.
pub async fn initialize<R: CommandRunner>(
    provisioner: &Provisioner<R>,
    env: &Environment,
    supervisor_timeout: Option<Duration>,
) -> Result<ForwarderConfig, StartupError> {
    tracing::info!("Initializing mail forwarder");
    let config = prepare(provisioner, env).await?;

    let skipped = provisioner.pending_reloads();
    provisioner.discard_reloads();
    tracing::debug!(services = ?skipped, "Skipping reloads before supervisord start");

    if let Some(timeout) = supervisor_timeout {
        supervisor::start_and_wait(provisioner, timeout).await?;
        tracing::info!("Supervisord started, services are running");
    }
    Ok(config)
}

/// Re-render everything on a running container and reload what changed.
pub async fn reconfigure<R: CommandRunner>(
    provisioner: &Provisioner<R>,
    env: &Environment,
) -> Result<(ForwarderConfig, Vec<Service>), StartupError> {
    tracing::info!("Reconfiguring mail forwarder");
    let config = prepare(provisioner, env).await?;
    let reloaded = provisioner.flush_reloads(&config).await;
    tracing::info!(services = ?reloaded, "Reconfiguration complete");
    Ok((config, reloaded))
}
