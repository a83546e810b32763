//! mail-forwarder
//!
//! Container entrypoint for an SMTP forwarder built from postfix, OpenDKIM,
//! postsrsd, certbot and fail2ban.
//!
//! # Architecture Overview
//!
//! ```text
//!   environment ──▶ config ──▶ ForwarderConfig (validated)
//!                                   │
//!                                   ▼
//!                              provision ──▶ /etc/postfix, /etc/opendkim,
//!                                   │        /etc/default/postsrsd,
//!                                   │        /etc/fail2ban, certificates
//!                                   ▼
//!                              lifecycle ──▶ supervisord ──▶ daemons
//!                                   │
//!                                   ▼
//!                         report + dns (operator output)
//!
//!   healthcheck ──▶ health probes ──▶ exit code
//!   renew       ──▶ tls::RenewalMonitor until SIGTERM
//! ```

use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use mail_forwarder::config::{load_from, Environment, ForwarderConfig};
use mail_forwarder::dns::{self, Resolver};
use mail_forwarder::health::HealthChecker;
use mail_forwarder::lifecycle::{self, signals, Shutdown};
use mail_forwarder::observability::logging::{self, LogFormat};
use mail_forwarder::provision::command::{CommandRunner, DryRunRunner, SystemRunner};
use mail_forwarder::provision::services::ServiceTable;
use mail_forwarder::provision::supervisor::STARTUP_TIMEOUT;
use mail_forwarder::provision::tls::RenewalMonitor;
use mail_forwarder::provision::{Paths, Provisioner};
use mail_forwarder::report::{self, Format};

#[derive(Parser)]
#[command(name = "mail-forwarder")]
#[command(about = "Configure and run the mail forwarder container", long_about = None)]
struct Cli {
    /// Log external commands instead of running them
    #[arg(long, global = true)]
    dry_run: bool,

    /// Place every generated file below this directory
    #[arg(long, global = true, value_name = "DIR")]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize, then keep certificates renewed until stopped (default)
    Run,
    /// Provision every service, start supervisord and exit
    Initialize,
    /// Print the resolved configuration
    Config {
        #[arg(long, value_enum, default_value_t = Format::Table)]
        format: Format,
    },
    /// Check the published DNS records
    Dns,
    /// Check that every daemon is up
    Healthcheck,
    /// Renew certificates nearing expiry
    Renew {
        /// Check once and exit instead of running until stopped
        #[arg(long)]
        once: bool,
    },
    /// Re-render configuration and reload changed services
    Reconfigure,
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn Error>> {
    let cli = Cli::parse();
    let env = Environment::from_process();

    logging::init(
        env.bool("DEBUG", "false"),
        LogFormat::parse(env.get("LOG_FORMAT")),
    );
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "mail-forwarder starting");

    let paths = cli.root.clone().map(Paths::under).unwrap_or_else(Paths::system);
    if cli.dry_run {
        let provisioner = Provisioner::new(paths, DryRunRunner::new(), ServiceTable::standard());
        execute(cli, &env, provisioner).await
    } else {
        let provisioner = Provisioner::new(paths, SystemRunner, ServiceTable::standard());
        execute(cli, &env, provisioner).await
    }
}

async fn execute<R: CommandRunner>(
    cli: Cli,
    env: &Environment,
    provisioner: Provisioner<R>,
) -> Result<ExitCode, Box<dyn Error>> {
    let supervisor_timeout = (!cli.dry_run).then_some(STARTUP_TIMEOUT);

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let config = lifecycle::initialize(&provisioner, env, supervisor_timeout).await?;
            print_startup_report(&config, provisioner.paths()).await;
            if config.tls.enabled && config.tls.use_letsencrypt {
                monitor_certificates(&provisioner, &config).await;
            }
        }
        Commands::Initialize => {
            let config = lifecycle::initialize(&provisioner, env, supervisor_timeout).await?;
            print_startup_report(&config, provisioner.paths()).await;
        }
        Commands::Config { format } => {
            let config = load_from(env)?;
            println!("{}", report::render(&config, format)?);
        }
        Commands::Dns => {
            let config = load_from(env)?;
            print_dns_report(&config, provisioner.paths()).await;
        }
        Commands::Healthcheck => {
            let checker = HealthChecker::new(provisioner.runner(), provisioner.paths());
            let checker = match load_from(env) {
                Ok(config) => checker.for_config(&config),
                Err(e) => {
                    tracing::warn!(error = %e, "Configuration unavailable, checking every component");
                    checker
                }
            };
            let report = checker.run().await;
            if !report.is_healthy() {
                tracing::error!("One or more health checks failed");
                return Ok(ExitCode::FAILURE);
            }
            tracing::info!("All health checks passed");
        }
        Commands::Renew { once } => {
            let config = load_from(env)?;
            if once {
                let monitor = RenewalMonitor::new(&provisioner, &config);
                if monitor.check_once().await && !monitor.renew().await {
                    return Ok(ExitCode::FAILURE);
                }
            } else {
                monitor_certificates(&provisioner, &config).await;
            }
        }
        Commands::Reconfigure => {
            let (_, reloaded) = lifecycle::reconfigure(&provisioner, env).await?;
            for service in reloaded {
                println!("reloaded {}", service);
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

async fn print_startup_report(config: &ForwarderConfig, paths: &Paths) {
    println!("{}", report::summary(config));
    print_dns_report(config, paths).await;
}

async fn print_dns_report(config: &ForwarderConfig, paths: &Paths) {
    let checks = dns::check_records(config, paths, &Resolver::new()).await;
    print!("{}", dns::render_report(&checks));
}

async fn monitor_certificates<R: CommandRunner>(provisioner: &Provisioner<R>, config: &ForwarderConfig) {
    let shutdown = Shutdown::new();
    let receiver = shutdown.subscribe();
    let signal_task = signals::trigger_on_termination(shutdown);

    RenewalMonitor::new(provisioner, config).run(receiver).await;

    signal_task.abort();
    tracing::info!("Shutdown complete");
}
