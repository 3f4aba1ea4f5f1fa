//! forged: the ForgeFleet capacity controller daemon.
//!
//! Assembles the whole controller from the workspace crates: loads the
//! fleet configuration, builds one capacity controller per profile,
//! starts the reconciliation monitor and idle sweepers, and serves the
//! REST API until a shutdown signal drains the fleet.
//!
//! ```text
//! forged run --config fleet.toml --port 9443
//! forged check --config fleet.toml
//! ```

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;

use forge_api::ApiState;
use forge_audit::AuditLog;
use forge_config::FleetConfig;
use forge_gateway::{OrchestratorGateway, SimGateway};
use forge_limiter::ProvisionRateLimiter;
use forge_metrics::FleetCounters;
use forge_monitor::{ProfileTarget, ReconciliationMonitor};
use forge_provisioner::CapacityController;
use forge_registry::WorkerRegistry;

#[derive(Parser)]
#[command(name = "forged", version, about = "ForgeFleet capacity controller")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the controller and its REST API.
    Run {
        /// Fleet configuration file.
        #[arg(long, default_value = "fleet.toml")]
        config: PathBuf,

        /// API listen port.
        #[arg(long, default_value = "9443")]
        port: u16,

        /// Override the configured reconciliation interval, in seconds.
        #[arg(long)]
        reconcile_interval: Option<u64>,
    },
    /// Validate a fleet configuration and print its shape.
    Check {
        /// Fleet configuration file.
        #[arg(long, default_value = "fleet.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,forged=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            config,
            port,
            reconcile_interval,
        } => run_fleet(config, port, reconcile_interval).await,
        Command::Check { config } => check_config(&config),
    }
}

async fn run_fleet(
    config_path: PathBuf,
    port: u16,
    reconcile_override: Option<u64>,
) -> anyhow::Result<()> {
    info!("forgefleet controller starting");

    let config = FleetConfig::from_file(&config_path)?;
    let reconcile_interval =
        reconcile_override.unwrap_or(config.controller.reconcile_interval_secs);

    // ── Shared subsystems ─────────────────────────────────────────

    let registry = Arc::new(WorkerRegistry::new());
    let limiter = Arc::new(ProvisionRateLimiter::new());
    let audit = Arc::new(AuditLog::new(config.controller.audit_capacity));
    let counters = Arc::new(FleetCounters::new());
    let (drain_tx, drain_rx) = watch::channel(false);
    let drain = Arc::new(drain_tx);
    info!(audit_capacity = config.controller.audit_capacity, "shared subsystems ready");

    // ── Per-profile controllers ───────────────────────────────────

    let mut controllers = BTreeMap::new();
    let mut targets = Vec::with_capacity(config.profiles.len());
    for profile in &config.profiles {
        // Simulated backend, one per profile endpoint.
        let gateway: Arc<dyn OrchestratorGateway> = Arc::new(SimGateway::new());
        let controller = Arc::new(CapacityController::new(
            profile.clone(),
            config.controller.clone(),
            Arc::clone(&gateway),
            Arc::clone(&registry),
            Arc::clone(&limiter),
            Arc::clone(&audit),
            Arc::clone(&counters),
            drain_rx.clone(),
        ));
        targets.push(ProfileTarget::new(
            Arc::new(profile.clone()),
            Arc::clone(&gateway),
        ));
        info!(
            profile = %profile.name,
            endpoint = %profile.endpoint,
            templates = profile.templates.len(),
            max_workers = profile.max_workers,
            "profile initialized"
        );
        controllers.insert(profile.name.clone(), controller);
    }

    let monitor = Arc::new(ReconciliationMonitor::new(
        targets,
        Arc::clone(&registry),
        Arc::clone(&counters),
    ));

    // ── Background loops ──────────────────────────────────────────

    let mut background = Vec::new();
    background.push(tokio::spawn(Arc::clone(&monitor).run(
        Duration::from_secs(reconcile_interval),
        drain_rx.clone(),
    )));
    for controller in controllers.values() {
        background.push(tokio::spawn(Arc::clone(controller).run_idle_sweeper(
            Duration::from_secs(config.controller.idle_sweep_interval_secs),
            drain_rx.clone(),
        )));
    }
    info!(
        reconcile_interval_secs = reconcile_interval,
        idle_sweep_interval_secs = config.controller.idle_sweep_interval_secs,
        "background loops started"
    );

    // ── API server ────────────────────────────────────────────────

    let state = ApiState {
        controllers: Arc::new(controllers),
        registry,
        monitor,
        audit,
        counters,
        drain: Arc::clone(&drain),
    };
    let router = forge_api::build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "api listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install CTRL+C handler");
            info!("shutdown signal received, draining fleet");
            drain.send_replace(true);
        })
        .await?;

    for task in background {
        let _ = task.await;
    }
    info!("forgefleet controller stopped");
    Ok(())
}

/// Load and validate a configuration, then print a one-screen summary.
/// Credential fields are references into external stores; only the
/// reference names are shown.
fn check_config(config_path: &PathBuf) -> anyhow::Result<()> {
    let config = FleetConfig::from_file(config_path)?;

    println!("configuration ok: {}", config_path.display());
    println!("callback url: {}", config.controller.callback_url);
    for profile in &config.profiles {
        let credentials = profile.credentials.as_deref().unwrap_or("(none)");
        println!(
            "profile '{}': endpoint {}, credentials {}, max {} workers",
            profile.name, profile.endpoint, credentials, profile.max_workers
        );
        for template in &profile.templates {
            let resolved = forge_template::resolve(template, profile);
            let image = resolved.image.as_deref().unwrap_or("(none)");
            let labels = if resolved.labels.is_empty() {
                "(unlabeled)"
            } else {
                resolved.labels.as_str()
            };
            match resolved.max_instances {
                Some(cap) => println!(
                    "  template '{}': image {image}, labels {labels}, cap {cap}",
                    template.name
                ),
                None => println!(
                    "  template '{}': image {image}, labels {labels}, uncapped",
                    template.name
                ),
            }
        }
    }
    Ok(())
}
