//! postsrsd configuration.


use crate::config::secret::load_or_create;
use crate::config::{ForwarderConfig, SrsSecret};
use crate::provision::command::CommandRunner;
use crate::provision::postfix::{SRS_FORWARD_PORT, SRS_REVERSE_PORT};
use crate::provision::services::Service;
use crate::provision::{ProvisionError, Provisioner};

/// Replace a persisted-secret policy with the secret itself.
///
/// Other policies pass through untouched.
pub fn materialize_secret(mut config: ForwarderConfig) -> Result<ForwarderConfig, ProvisionError> {
    if !config.srs.enabled {
        return Ok(config);
    }
    if let SrsSecret::AutoGeneratePersisted(path) = &config.srs.secret {
        let secret = load_or_create(path).map_err(|e| ProvisionError::io(path, e))?;
        config.srs.secret = SrsSecret::Fixed(secret);
    }
    Ok(config)
}

/// Render `/etc/default/postsrsd`.
pub fn postsrsd_config(config: &ForwarderConfig) -> String {
    let srs = &config.srs;
    let domain = srs.domain.as_deref().unwrap_or(&config.smtp.hostname);

    let mut out = String::from("# Configuration file for postsrsd\n# Generated by mail-forwarder\n\n");
    push_line!(out, "RUN=yes");
    push_line!(out, "SRS_DOMAIN={}", domain);
    if let Some(secret) = srs.secret.value() {
        push_line!(out, "SRS_SECRET={}", secret);
    }
    if !srs.exclude_domains.is_empty() {
        let domains: Vec<&str> = srs.exclude_domains.iter().map(String::as_str).collect();
        push_line!(out, "SRS_EXCLUDE_DOMAINS=\"{}\"", domains.join(" "));
    }
    push_line!(out, "SRS_SEPARATOR=+");
    push_line!(out, "SRS_FORWARD_PORT={}", SRS_FORWARD_PORT);
    push_line!(out, "SRS_REVERSE_PORT={}", SRS_REVERSE_PORT);
    out
}

pub fn configure<R: CommandRunner>(
    provisioner: &Provisioner<R>,
    config: &ForwarderConfig,
) -> Result<(), ProvisionError> {
    if !config.srs.enabled {
        tracing::info!("SRS is disabled, skipping configuration");
        return Ok(());
    }

    if config.srs.secret.value().is_none() {
        tracing::warn!("SRS secret not resolved; postsrsd will pick its own on each start");
    }

    let path = provisioner.paths().postsrsd_conf();
    provisioner.render(&path, &postsrsd_config(config), Some(Service::Postsrsd))?;
    crate::provision::files::set_mode(&path, 0o600).map_err(|e| ProvisionError::io(&path, e))?;

    tracing::info!(
        domain = config.srs.domain.as_deref().unwrap_or(&config.smtp.hostname),
        "SRS configured"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_postsrsd_config() {
        let mut config = ForwarderConfig::default();
        config.srs.domain = Some("bounce.example.com".into());
        config.srs.secret = SrsSecret::Fixed("s3cr3t".into());
        config.srs.exclude_domains = ["b.org", "a.org"].into_iter().map(String::from).collect();

        let out = postsrsd_config(&config);
        assert!(out.contains("SRS_DOMAIN=bounce.example.com\n"));
        assert!(out.contains("SRS_SECRET=s3cr3t\n"));
        assert!(out.contains("SRS_EXCLUDE_DOMAINS=\"a.org b.org\"\n"));
        assert!(out.contains("SRS_SEPARATOR=+\n"));
    }

    #[test]
    fn test_unresolved_secret_is_omitted() {
        let config = ForwarderConfig::default();
        let out = postsrsd_config(&config);
        assert!(!out.contains("SRS_SECRET="));
        assert!(out.contains("SRS_DOMAIN=mail.example.com"));
    }

    #[test]
    fn test_materialize_persisted_secret() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("srs.secret");
        let mut config = ForwarderConfig::default();
        config.srs.secret = SrsSecret::AutoGeneratePersisted(path.clone());

        let first = materialize_secret(config.clone()).unwrap();
        let second = materialize_secret(config).unwrap();
        assert!(first.srs.secret.value().is_some());
        assert_eq!(first.srs.secret, second.srs.secret);
    }

    #[test]
    fn test_materialize_skips_disabled() {
        let mut config = ForwarderConfig::default();
        config.srs.enabled = false;
        config.srs.secret = SrsSecret::AutoGeneratePersisted("/nonexistent/dir/secret".into());
        let out = materialize_secret(config.clone()).unwrap();
        assert_eq!(out, config);
    }
}
