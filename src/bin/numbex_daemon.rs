//! The numbex daemon: loads a peer's configuration, bootstraps its stores,
//! and runs the periodic fetch scheduler until asked to shut down.
//!
//! The control-plane and record-exchange RPC surfaces (§6) are transport
//! concerns out of this core's scope; this binary wires the reconciler and
//! worker together and exits cleanly on SIGINT/SIGTERM.

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use clap::Parser;
use numbex::config::Config;
use numbex::reconciler::Peer;
use numbex::reconciler::Reconciler;
use numbex::worker;

#[derive(Parser)]
#[command(name = "numbex-daemon", about = "federated E.164 range directory daemon")]
struct Args {
    /// Path to the INI configuration file.
    #[arg(long, default_value = "/etc/numbex/numbex.conf")]
    config: std::path::PathBuf,
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = match Config::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("failed to load config {}: {}", args.config.display(), e);
            return std::process::ExitCode::from(2);
        }
    };

    let reconciler = match Reconciler::open(&config.database.path, &config.git.path) {
        Ok(r) => r.with_windows(
            chrono::Duration::hours(config.database.export_timeout_hours as i64),
            chrono::Duration::hours(config.git.export_timeout_hours as i64),
        ),
        Err(e) => {
            tracing::error!("failed to open stores: {}", e);
            return std::process::ExitCode::from(2);
        }
    };

    if let Err(e) = reconciler.bootstrap().await {
        tracing::error!("bootstrap failed: {}", e);
        return std::process::ExitCode::from(1);
    }

    let peers: Vec<Peer> = config
        .peer
        .trackers
        .iter()
        .enumerate()
        .map(|(i, url)| Peer { name: format!("peer{}", i), url: url.clone() })
        .collect();
    let peers = Arc::new(Mutex::new(peers));

    let reconciler = Arc::new(reconciler);
    let period = Duration::from_secs(config.peer.fetch_interval_secs);
    let (handle, consumer) = worker::spawn(reconciler.clone(), peers, period);

    tracing::info!(
        owner = %config.global.owner,
        control = format!("{}:{}", config.global.control_host, config.global.control_port),
        "numbex daemon started"
    );

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received shutdown signal");
        }
        result = terminate_signal() => {
            if let Err(e) = result {
                tracing::warn!("failed to install SIGTERM handler: {}", e);
            }
            tracing::info!("received SIGTERM");
        }
    }

    handle.shutdown().await;
    let _ = consumer.await;
    return std::process::ExitCode::SUCCESS;
}

#[cfg(unix)]
async fn terminate_signal() -> std::io::Result<()> {
    let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    term.recv().await;
    return Ok(());
}

#[cfg(not(unix))]
async fn terminate_signal() -> std::io::Result<()> {
    return std::future::pending().await;
}
