//! wolfies-sms-relay-daemon - Long-running relay process.
//!
//! CHANGELOG:
//! - 10/19/2026 - Hosts the forwarding service; tokio runtime, graceful shutdown
//! - 01/10/2026 - Initial implementation (Phase 4C)

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use wolfies_sms_relay::daemon::service::DEFAULT_PERMISSION_TIMEOUT_SECS;
use wolfies_sms_relay::daemon::{DaemonOptions, DaemonServer, DaemonService};
use wolfies_sms_relay::db::connection::{default_db_path, default_socket_path};
use wolfies_sms_relay::relay::telegram::{DEFAULT_TIMEOUT_SECS, TELEGRAM_API_BASE};

#[derive(Parser)]
#[command(name = "wolfies-sms-relay-daemon")]
#[command(about = "Daemon that forwards incoming SMS to Telegram")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon
    Start {
        /// Socket path (default: ~/.wolfies-sms-relay/daemon.sock)
        #[arg(long)]
        socket: Option<String>,

        /// Relay database path (default: ~/.wolfies-sms-relay/relay.db)
        #[arg(long)]
        db: Option<String>,

        /// Run in foreground (don't daemonize)
        #[arg(long)]
        foreground: bool,

        /// Telegram Bot API base URL
        #[arg(long, default_value = TELEGRAM_API_BASE)]
        api_base: String,

        /// Per-request relay timeout (seconds)
        #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS)]
        relay_timeout: u64,

        /// How long a permission request waits for the bridge (seconds)
        #[arg(long, default_value_t = DEFAULT_PERMISSION_TIMEOUT_SECS)]
        permission_timeout: u64,
    },

    /// Stop the daemon
    Stop {
        /// Socket path
        #[arg(long)]
        socket: Option<String>,
    },

    /// Check daemon status
    Status {
        /// Socket path
        #[arg(long)]
        socket: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start {
            socket,
            db,
            foreground,
            api_base,
            relay_timeout,
            permission_timeout,
        } => {
            let options = DaemonOptions {
                db_path: resolve(db.as_deref(), default_db_path),
                api_base,
                relay_timeout: Duration::from_secs(relay_timeout),
                permission_timeout: Duration::from_secs(permission_timeout),
            };
            cmd_start(resolve(socket.as_deref(), default_socket_path), options, foreground)
        }
        Commands::Stop { socket } => cmd_stop(resolve(socket.as_deref(), default_socket_path)),
        Commands::Status { socket } => cmd_status(resolve(socket.as_deref(), default_socket_path)),
    }
}

fn resolve(path: Option<&str>, default: fn() -> PathBuf) -> PathBuf {
    path.map(|p| PathBuf::from(shellexpand::tilde(p).to_string()))
        .unwrap_or_else(default)
}

fn pid_file_for(socket_path: &Path) -> PathBuf {
    PathBuf::from(format!("{}.pid", socket_path.display()))
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();
}

fn cmd_start(socket_path: PathBuf, options: DaemonOptions, foreground: bool) -> Result<()> {
    // Create parent directory if needed
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    if !foreground {
        // Background mode (fork into daemon process)
        use daemonize::Daemonize;

        let daemonize = Daemonize::new()
            .pid_file(pid_file_for(&socket_path))
            .working_directory("/tmp");

        if let Err(e) = daemonize.start() {
            eprintln!("Failed to daemonize: {}", e);
            std::process::exit(1);
        }
    }

    init_tracing();
    info!(foreground, "starting relay daemon");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    runtime.block_on(async move {
        let service = DaemonService::open(&options)?;
        let server = DaemonServer::new(service, &socket_path);

        let shutdown = CancellationToken::new();
        tokio::spawn(wait_for_signal(shutdown.clone()));

        server.serve(shutdown).await
    })
}

async fn wait_for_signal(shutdown: CancellationToken) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            warn!(error = %e, "cannot listen for SIGTERM, relying on ctrl-c");
            let _ = tokio::signal::ctrl_c().await;
            shutdown.cancel();
            return;
        }
    };

    tokio::select! {
        _ = term.recv() => info!("received SIGTERM"),
        _ = tokio::signal::ctrl_c() => info!("received ctrl-c"),
    }
    shutdown.cancel();
}

fn cmd_stop(socket_path: PathBuf) -> Result<()> {
    let pid_file = pid_file_for(&socket_path);

    let pid_str = std::fs::read_to_string(&pid_file)
        .with_context(|| format!("No pid file at {} (daemon not running?)", pid_file.display()))?;
    let pid: i32 = pid_str.trim().parse().context("Malformed pid file")?;

    // Send SIGTERM; the daemon deactivates and removes its socket.
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc != 0 {
        eprintln!("SIGTERM to pid {} failed, removing stale socket", pid);
        let _ = std::fs::remove_file(&socket_path);
    }

    let _ = std::fs::remove_file(&pid_file);

    println!("Daemon stopped (pid {})", pid);

    Ok(())
}

fn cmd_status(socket_path: PathBuf) -> Result<()> {
    match std::os::unix::net::UnixStream::connect(&socket_path) {
        Ok(_) => {
            println!("Daemon running at {}", socket_path.display());
            Ok(())
        }
        Err(_) => {
            println!("Daemon not running");
            std::process::exit(1);
        }
    }
}
