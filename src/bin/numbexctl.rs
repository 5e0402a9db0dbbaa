//! numbexctl: the command-line control surface for a numbex peer.
//!
//! `p2p-import`/`p2p-export`/`status` operate directly on the peer's
//! persisted state (the local and replicated stores named in its config).
//! The remaining control verbs (`p2p-start`, `p2p-stop`, `updater-start`,
//! `updater-stop`, `shutdown`) address a *running* daemon process over its
//! control channel; that transport is out of this core's scope (§1), so
//! those subcommands report exit code 2 rather than silently no-op.

use clap::Parser;
use clap::Subcommand;
use numbex::config::Config;
use numbex::reconciler::Reconciler;

#[derive(Parser)]
#[command(name = "numbexctl", about = "control a numbex peer")]
struct Args {
    #[arg(long, default_value = "/etc/numbex/numbex.conf")]
    config: std::path::PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Force an immediate import from the replicated store.
    P2pImport,
    /// Force an immediate export to the replicated store.
    P2pExport,
    /// Report the local store's size and whether it has unexported changes.
    Status,
    /// Start the periodic fetch scheduler (requires a running daemon).
    P2pStart,
    /// Stop the periodic fetch scheduler (requires a running daemon).
    P2pStop,
    /// Start the periodic exporter (requires a running daemon).
    UpdaterStart,
    /// Stop the periodic exporter (requires a running daemon).
    UpdaterStop,
    /// Clear the sticky fatal-error flag (requires a running daemon).
    ClearErrors,
    /// Shut the daemon down (requires a running daemon).
    Shutdown,
}

const EXIT_OK: u8 = 0;
const EXIT_FAILURE: u8 = 1;
const EXIT_UNSUPPORTED: u8 = 2;

#[tokio::main]
async fn main() -> std::process::ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let code = match args.command {
        Command::P2pImport => run_import(&args.config).await,
        Command::P2pExport => run_export(&args.config).await,
        Command::Status => run_status(&args.config).await,
        Command::P2pStart
        | Command::P2pStop
        | Command::UpdaterStart
        | Command::UpdaterStop
        | Command::ClearErrors
        | Command::Shutdown => {
            eprintln!("this verb requires a running daemon's control channel, which this build does not expose");
            EXIT_UNSUPPORTED
        }
    };

    return std::process::ExitCode::from(code);
}

async fn open_reconciler(config_path: &std::path::Path) -> Result<Reconciler, u8> {
    let config = Config::load(config_path).map_err(|e| {
        eprintln!("failed to load config {}: {}", config_path.display(), e);
        EXIT_UNSUPPORTED
    })?;
    return Reconciler::open(&config.database.path, &config.git.path).map_err(|e| {
        eprintln!("failed to open stores: {}", e);
        EXIT_FAILURE
    });
}

async fn run_import(config_path: &std::path::Path) -> u8 {
    let reconciler = match open_reconciler(config_path).await {
        Ok(r) => r,
        Err(code) => return code,
    };
    match reconciler.import_from_replicated(false).await {
        Ok(()) => {
            println!("import complete");
            EXIT_OK
        }
        Err(e) => {
            eprintln!("import failed: {}", e);
            EXIT_FAILURE
        }
    }
}

async fn run_export(config_path: &std::path::Path) -> u8 {
    let reconciler = match open_reconciler(config_path).await {
        Ok(r) => r,
        Err(code) => return code,
    };
    match reconciler.export_to_replicated(false).await {
        Ok(true) => {
            println!("export complete");
            EXIT_OK
        }
        Ok(false) => {
            eprintln!("export left overlapping ranges in the replicated store; rolled back");
            EXIT_FAILURE
        }
        Err(e) => {
            eprintln!("export failed: {}", e);
            EXIT_FAILURE
        }
    }
}

async fn run_status(config_path: &std::path::Path) -> u8 {
    let config = match Config::load(config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to load config {}: {}", config_path.display(), e);
            return EXIT_UNSUPPORTED;
        }
    };
    let store = match numbex::store::Store::open(&config.database.path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("failed to open local store: {}", e);
            return EXIT_FAILURE;
        }
    };
    let empty = match store.ranges_empty() {
        Ok(v) => v,
        Err(e) => {
            eprintln!("status query failed: {}", e);
            return EXIT_FAILURE;
        }
    };
    let dirty = match store.has_changes() {
        Ok(v) => v,
        Err(e) => {
            eprintln!("status query failed: {}", e);
            return EXIT_FAILURE;
        }
    };
    println!("owner: {}", config.global.owner);
    println!("local store empty: {}", empty);
    println!("unexported changes: {}", dirty);
    return EXIT_OK;
}
