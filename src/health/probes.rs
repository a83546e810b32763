//! Individual health probes.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time;

use crate::config::ForwarderConfig;
use crate::provision::command::{Cmd, CommandRunner};
use crate::provision::Paths;

/// Ports the MTA must be accepting on.
pub const SMTP_PORTS: [u16; 3] = [25, 465, 587];

const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Outcome of one component check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub name: &'static str,
    pub healthy: bool,
    pub problems: Vec<String>,
}

impl CheckResult {
    fn new(name: &'static str, problems: Vec<String>) -> Self {
        Self {
            name,
            healthy: problems.is_empty(),
            problems,
        }
    }
}

/// All check results from one run.
#[derive(Debug, Clone, Default)]
pub struct HealthReport {
    pub checks: Vec<CheckResult>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.checks.iter().all(|c| c.healthy)
    }
}

/// Runs the container health checks.
pub struct HealthChecker<'a, R> {
    runner: &'a R,
    opendkim_socket: PathBuf,
    host: Ipv4Addr,
    ports: Vec<u16>,
    opendkim: bool,
    fail2ban: bool,
}

impl<'a, R: CommandRunner> HealthChecker<'a, R> {
    pub fn new(runner: &'a R, paths: &Paths) -> Self {
        Self {
            runner,
            opendkim_socket: paths.opendkim_socket(),
            host: Ipv4Addr::LOCALHOST,
            ports: SMTP_PORTS.to_vec(),
            opendkim: true,
            fail2ban: true,
        }
    }

    /// Only check the daemons and listeners `config` turns on.
    pub fn for_config(mut self, config: &ForwarderConfig) -> Self {
        let smtp = &config.smtp;
        self.opendkim = config.dkim.enabled;
        self.fail2ban = config.security.fail2ban_enabled;
        self.ports = [
            (25, smtp.enable_smtp),
            (465, smtp.enable_smtps),
            (587, smtp.enable_submission),
        ]
        .into_iter()
        .filter_map(|(port, enabled)| enabled.then_some(port))
        .collect();
        self
    }

    pub fn with_ports(mut self, ports: Vec<u16>) -> Self {
        self.ports = ports;
        self
    }

    pub async fn run(&self) -> HealthReport {
        let mut checks = vec![self.check_postfix().await];
        if self.opendkim {
            checks.push(self.check_opendkim().await);
        }
        if self.fail2ban {
            checks.push(self.check_fail2ban().await);
        }
        checks.push(self.check_ports().await);

        for check in &checks {
            if check.healthy {
                tracing::info!(check = check.name, "Check passed");
            } else {
                tracing::error!(check = check.name, problems = ?check.problems, "Check failed");
            }
        }
        HealthReport { checks }
    }

    async fn process_running(&self, name: &str) -> bool {
        match self.runner.run(&Cmd::new("pgrep").arg(name)).await {
            Ok(out) => out.is_success() && !out.stdout.trim().is_empty(),
            Err(e) => {
                tracing::warn!(process = name, error = %e, "pgrep failed");
                false
            }
        }
    }

    pub async fn check_postfix(&self) -> CheckResult {
        let mut problems = Vec::new();
        if !self.process_running("master").await {
            problems.push("postfix master process is not running".to_string());
        } else {
            match self.runner.run_checked(&Cmd::new("mailq")).await {
                Ok(out) if out.stdout.contains("is empty") => {
                    tracing::debug!("Mail queue is empty");
                }
                Ok(out) => tracing::warn!(queue = %out.stdout.trim(), "Mail queue has items"),
                Err(e) => problems.push(format!("failed to check mail queue: {}", e)),
            }
        }
        CheckResult::new("postfix", problems)
    }

    pub async fn check_opendkim(&self) -> CheckResult {
        let mut problems = Vec::new();
        if !self.process_running("opendkim").await {
            problems.push("opendkim process is not running".to_string());
        } else if !self.opendkim_socket.exists() {
            problems.push(format!("socket {} does not exist", self.opendkim_socket.display()));
        }
        CheckResult::new("opendkim", problems)
    }

    pub async fn check_fail2ban(&self) -> CheckResult {
        let mut problems = Vec::new();
        if !self.process_running("fail2ban-server").await {
            problems.push("fail2ban server is not running".to_string());
        } else {
            match self.runner.run_checked(&Cmd::new("fail2ban-client").arg("ping")).await {
                Ok(out) if out.stdout.to_ascii_lowercase().contains("pong") => {}
                Ok(out) => problems.push(format!("unexpected ping reply: {}", out.stdout.trim())),
                Err(e) => problems.push(format!("ping failed: {}", e)),
            }
        }
        CheckResult::new("fail2ban", problems)
    }

    pub async fn check_ports(&self) -> CheckResult {
        let mut problems = Vec::new();
        for &port in &self.ports {
            let addr = SocketAddr::from((self.host, port));
            match time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr)).await {
                Ok(Ok(_)) => tracing::debug!(port, "Port is listening"),
                Ok(Err(e)) => problems.push(format!("port {} is not listening: {}", port, e)),
                Err(_) => problems.push(format!("port {} timed out", port)),
            }
        }
        CheckResult::new("smtp ports", problems)
    }
}
