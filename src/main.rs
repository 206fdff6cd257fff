// ABOUTME: Entry point for the rad daemon.
// ABOUTME: Wires config, store, allocator, queue, pipeline, monitor, and the API server.

mod cli;

use clap::Parser;
use cli::{Cli, Commands};
use rad::config::Config;
use rad::deploy::{steps, Pipeline};
use rad::drivers::proxy::ProxyManager;
use rad::logstream::Hub;
use rad::monitor::Monitor;
use rad::ports::PortAllocator;
use rad::queue::BuildQueue;
use rad::server::{self, AppContext};
use rad::state::Store;
use rad::{updater, version};
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

const QUEUE_CAPACITY: usize = 100;
const MONITOR_INTERVAL: Duration = Duration::from_secs(15);

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.dev { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(true)
        .init();

    match cli.command {
        Some(Commands::Version) => {
            println!("{}", version::long());
        }
        Some(Commands::Update { check, force }) => run_update(check, force).await,
        None => {
            if let Err(err) = run_daemon(cli).await {
                eprintln!("Error: {err}");
                std::process::exit(1);
            }
        }
    }
}

async fn run_daemon(cli: Cli) -> rad::error::Result<()> {
    let mut config = Config::load(cli.config.as_deref(), cli.dev)?;
    if let Some(token) = cli.token {
        config.auth.token = token;
    }
    if let Some(listen) = cli.listen {
        config.server.listen = listen;
    }
    config.ensure_dirs()?;
    let config = Arc::new(config);

    let store = Arc::new(Store::new(Some(config.state_path())));
    let ports = Arc::new(PortAllocator::new());
    let hub = Arc::new(Hub::new());
    let queue = Arc::new(BuildQueue::new(QUEUE_CAPACITY));

    // Replay port reservations from persisted state.
    for app in store.list() {
        if app.port > 0 {
            ports.reserve(&app.app_id, app.port);
            tracing::info!(app_id = %app.app_id, status = %app.status, port = app.port, "recovered app");
        }
    }

    let proxy = Arc::new(ProxyManager::new(
        config.proxy.config_dir.clone(),
        config.paths.log_dir.clone(),
        config.proxy.zone.clone(),
        config.proxy.enabled,
    ));
    if config.proxy.enabled {
        if proxy.is_running().await {
            tracing::info!("proxy: admin API responding");
        } else {
            tracing::warn!("proxy: admin API not responding: site configs will be written but reloads may fail");
        }
    } else {
        tracing::info!("proxy: disabled (dev mode: apps accessible via localhost:{{port}})");
    }

    let mut pipeline = Pipeline::new(
        Arc::clone(&config),
        Arc::clone(&store),
        Arc::clone(&ports),
        Arc::clone(&proxy),
        Arc::clone(&hub),
    );
    for step in steps::standard_steps() {
        pipeline.add_step(step);
    }
    let pipeline = Arc::new(pipeline);

    let monitor = Arc::new(Monitor::new(
        Arc::clone(&config),
        Arc::clone(&store),
        MONITOR_INTERVAL,
    ));
    monitor.start();

    let ctx = Arc::new(AppContext {
        config: Arc::clone(&config),
        store,
        ports,
        queue: Arc::clone(&queue),
        proxy,
        hub,
        pipeline,
        started_at: Instant::now(),
    });

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("install SIGTERM handler");
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
            tracing::info!("shutting down...");
            shutdown.cancel();
        });
    }

    tracing::info!(version = version::VERSION, pid = std::process::id(), "rad started");

    let result = server::serve(ctx, shutdown.clone()).await;

    queue.stop().await;
    monitor.stop();
    tracing::info!("rad stopped");
    result
}

async fn run_update(check: bool, force: bool) {
    println!("rad {}: checking for updates...", version::VERSION);

    let info = match updater::check_for_update().await {
        Ok(Some(info)) => info,
        Ok(None) => {
            println!("Already up to date.");
            return;
        }
        Err(err) => {
            eprintln!("Error: {err}");
            std::process::exit(1);
        }
    };

    println!("Update available: {} → {}", version::VERSION, info.version);
    if !info.changelog.is_empty() {
        println!("\nChangelog:\n{}\n", info.changelog);
    }

    if check {
        return;
    }

    if !force {
        print!("Install update? [y/N] ");
        let _ = std::io::stdout().flush();
        let mut answer = String::new();
        let _ = std::io::stdin().read_line(&mut answer);
        if !matches!(answer.trim(), "y" | "Y") {
            println!("Update cancelled.");
            return;
        }
    }

    if let Err(err) = updater::apply(&info).await {
        eprintln!("Update failed: {err}");
        std::process::exit(1);
    }

    if updater::is_systemd() {
        println!("Restarting rad service...");
        let status = tokio::process::Command::new("systemctl")
            .args(["restart", "rad"])
            .status()
            .await;
        if !matches!(status, Ok(status) if status.success()) {
            eprintln!("Failed to restart. Restart manually with: sudo systemctl restart rad");
        }
    }
}
