//! checkd: active health checking for host groups.
//!
//! # Architecture Overview
//!
//! ```text
//!   checkd.toml ──► config ──► daemon ──► index (group table, per-key state)
//!                     ▲          │
//!          SIGHUP / file watch   ├──► dns cache ◄── DNS lookups
//!                                │
//!                                ├──► work queue ◄──► worker pool ◄── pool monitor
//!                                │                        │
//!                                │                        ▼
//!                                │              executors (tcp/http/ftp/dns/aux)
//!                                │                        │
//!                                └──► result store ◄──────┘
//!
//!   admin API (axum) ──► daemon views, force, reload
//!   metrics (prometheus) ◄── queue, pool, checks
//! ```

use checkd::admin::{serve_admin, AdminState};
use checkd::config::{load_config, ConfigWatcher};
use checkd::daemon::Daemon;
use checkd::dns::SystemResolver;
use checkd::executor::ProbeSet;
use checkd::lifecycle::{Signal, Signals};
use checkd::observability::{logging, metrics};
use checkd::storage::open_store;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;

#[derive(Parser)]
#[command(name = "checkd")]
#[command(about = "Active health-checking daemon", long_about = None)]
struct Args {
    /// Configuration file.
    #[arg(short, long, default_value = "checkd.toml")]
    config: PathBuf,

    /// Validate the configuration and exit.
    #[arg(long)]
    check_config: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match load_config(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("checkd: {}: {}", args.config.display(), e);
            std::process::exit(1);
        }
    };
    if args.check_config {
        println!("{}: ok ({} host groups)", args.config.display(), config.host_groups.len());
        return Ok(());
    }

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), config = %args.config.display(), "checkd starting");

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    let store = open_store(&config.storage)?;
    let resolver = Arc::new(SystemResolver);
    let executor = Arc::new(ProbeSet::new(resolver.clone()));
    let daemon = Daemon::new(config.clone(), store, executor, resolver)?;
    daemon.start()?;

    let admin_shutdown = checkd::Shutdown::new();
    let admin_task = if config.admin.enabled {
        let listener = TcpListener::bind(&config.admin.bind_address).await?;
        let state = AdminState {
            daemon: daemon.clone(),
            config_path: Some(args.config.clone()),
        };
        let rx = admin_shutdown.subscribe();
        Some(tokio::spawn(async move {
            if let Err(e) = serve_admin(listener, state, rx).await {
                tracing::error!(error = %e, "Admin API failed");
            }
        }))
    } else {
        None
    };

    let (_watch, mut updates) = match ConfigWatcher::new(&args.config).run() {
        Ok((handle, updates)) => (Some(handle), updates),
        Err(e) => {
            tracing::warn!(error = %e, "Config file watching disabled");
            let (_, updates) = tokio::sync::mpsc::unbounded_channel();
            (None, updates)
        }
    };

    let mut signals = Signals::install()?;
    loop {
        tokio::select! {
            signal = signals.recv() => match signal {
                Signal::Shutdown => break,
                Signal::Reload => {
                    if let Err(e) = daemon.reload_from(&args.config) {
                        tracing::error!(error = %e, "Reload failed; keeping current configuration");
                    }
                }
            },
            Some(new_config) = updates.recv() => {
                if let Err(e) = daemon.apply_config(new_config) {
                    tracing::error!(error = %e, "Reload failed; keeping current configuration");
                }
            }
        }
    }

    tracing::info!("Shutting down");
    admin_shutdown.trigger();
    if let Some(task) = admin_task {
        let _ = task.await;
    }
    daemon.stop().await;

    tracing::info!("Shutdown complete");
    Ok(())
}
