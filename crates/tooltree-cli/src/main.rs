//! `tooltree` – serves the counter tool tree as an MCP server over stdio.
//!
//! 1. Loads `~/.tooltree/config.toml` (defaults when absent) and applies
//!    `TOOLTREE_*` overrides.  `tooltree init` writes the defaults to disk.
//! 2. Builds the registry, the commit scheduler and the counter store, and
//!    pumps every re-render into the scheduler.
//! 3. Waits for the client to initialize, then serves `tools/list` and
//!    `tools/call` until stdin closes or Ctrl-C.
//!
//! stdout belongs to the protocol; the banner and logs go to stderr.

mod config;
mod counter;
mod server;
mod telemetry;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;
use tokio::sync::watch;
use tooltree_reconciler::{CommitScheduler, SchedulerState, spawn_commit_pump};
use tooltree_registry::{LocalRegistry, Transport};
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::server::ToolTreeServer;

const RETRY_DELAY: Duration = Duration::from_millis(500);

fn main() -> ExitCode {
    let loaded = config::load();
    let mut cfg = match &loaded {
        Ok(Some(cfg)) => cfg.clone(),
        _ => Config::default(),
    };
    config::apply_env_overrides(&mut cfg);

    let _guard = telemetry::init_tracing(&cfg.server_name);

    match loaded {
        Ok(Some(_)) => info!(path = %config::config_path().display(), "config loaded"),
        Ok(None) => info!("no config file; using defaults"),
        Err(e) => {
            eprintln!("{}: {}", "Config error".red(), e);
            eprintln!("  Using default configuration.");
        }
    }

    if std::env::args().nth(1).as_deref() == Some("init") {
        return match config::save(&cfg) {
            Ok(()) => {
                eprintln!(
                    "  {} Config saved to {}",
                    "✓".green().bold(),
                    config::config_path().display().to_string().bold()
                );
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("{}: {}", "Error saving config".red(), e);
                ExitCode::FAILURE
            }
        };
    }

    print_banner(&cfg);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start async runtime");
            return ExitCode::FAILURE;
        }
    };
    runtime.block_on(run(cfg))
}

async fn run(cfg: Config) -> ExitCode {
    let registry = Arc::new(LocalRegistry::new());
    let scheduler = Arc::new(CommitScheduler::new(
        registry.clone(),
        cfg.scheduler_config(),
    ));
    let watcher = Arc::clone(&scheduler).watch_registry();

    let store = match counter::store() {
        Ok(store) => store,
        Err(e) => {
            error!(error = %e, "failed to build the counter tools");
            watcher.abort();
            return ExitCode::FAILURE;
        }
    };
    let pump = spawn_commit_pump(Arc::clone(&scheduler), store.subscribe());

    let server = ToolTreeServer::new(
        Arc::clone(&registry),
        cfg.server_name.clone(),
        cfg.server_version.clone(),
    );
    let (input, output) = rmcp::transport::stdio();
    let span = info_span!("session", id = %Uuid::new_v4());
    let mut session = tokio::spawn(
        server
            .clone()
            .run_session(input, output)
            .instrument(span),
    );

    let (stop_tx, mut stop_rx) = watch::channel(false);
    if let Err(e) = ctrlc::set_handler(move || {
        eprintln!();
        eprintln!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());
        let _ = stop_tx.send(true);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }

    tokio::select! {
        _ = drive(&scheduler, &server) => info!("scheduler closed"),
        end = &mut session => match end {
            Ok(Ok(quit)) => info!(?quit, "client gone"),
            Ok(Err(e)) => error!(error = %e, "client session failed"),
            Err(e) => error!(error = %e, "session task failed"),
        },
        _ = stop_rx.wait_for(|stop| *stop) => info!("interrupted"),
    }

    scheduler.shutdown().await;
    pump.abort();
    watcher.abort();
    session.abort();
    eprintln!("{}", "  ✓ Registrations cleared. Bye.".green());
    ExitCode::SUCCESS
}

/// Connect, then reconnect whenever the scheduler falls back to `Building`.
/// Returns once the scheduler is closed.
async fn drive(scheduler: &CommitScheduler, transport: &dyn Transport) {
    let mut states = scheduler.subscribe_state();
    loop {
        match scheduler.connect(transport).await {
            Ok(report) => info!(
                tools = scheduler.registered_names().len(),
                operations = report.operations.len(),
                "client connected"
            ),
            Err(e) if scheduler.state() == SchedulerState::Building => {
                warn!(error = %e, "connect failed; retrying");
                tokio::time::sleep(RETRY_DELAY).await;
                continue;
            }
            Err(e) => warn!(error = %e, "connect failed"),
        }
        if states
            .wait_for(|s| *s != SchedulerState::Connected)
            .await
            .is_err()
        {
            return;
        }
        let state = scheduler.state();
        if state.is_terminal() {
            return;
        }
        info!(?state, "awaiting reconnect");
    }
}

fn print_banner(cfg: &Config) {
    eprintln!();
    eprintln!("{}", r#"  _              _ _                 "#.bold().cyan());
    eprintln!("{}", r#" | |_ ___   ___ | | |_ _ __ ___  ___ "#.bold().cyan());
    eprintln!("{}", r#" | __/ _ \ / _ \| | __| '__/ _ \/ _ \"#.bold().cyan());
    eprintln!("{}", r#" | || (_) | (_) | | |_| | |  __/  __/"#.bold().cyan());
    eprintln!("{}", r#"  \__\___/ \___/|_|\__|_|  \___|\___|"#.bold().cyan());
    eprintln!();
    eprintln!(
        "  {} {}",
        cfg.server_name.bold(),
        format!("v{}", cfg.server_version).dimmed()
    );
    eprintln!("  Declarative tool tree over MCP stdio");
    eprintln!();
}
