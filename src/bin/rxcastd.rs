//! rxcast daemon - receiver supervisor and live audio/log broadcaster
//!
//! This binary runs as a background daemon that owns the external radio
//! receiver process and serves its audio and logs to clients over a Unix
//! socket.
//!
//! # Usage
//!
//! ```bash
//! # Start the daemon (foreground)
//! rxcastd start
//!
//! # Start the daemon (background/daemonized) with an explicit config
//! rxcastd start -d --config /etc/rxcast/config.toml
//!
//! # Stop the daemon
//! rxcastd stop
//!
//! # Check daemon status
//! rxcastd status
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use rxcast_core::Config;
use rxcastd::server::DaemonServer;
use rxcastd::supervisor::{Supervisor, SupervisorConfig};

/// How long `rxcastd stop` waits for the daemon to exit.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// rxcast daemon - radio receiver supervisor
#[derive(Parser, Debug)]
#[command(name = "rxcastd", version, about)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the daemon
    Start {
        /// Run as a background daemon (fork to background)
        #[arg(short = 'd', long)]
        daemon: bool,

        /// Config file (default: <config dir>/rxcast/config.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Stop the running daemon
    Stop,
    /// Show daemon status
    Status {
        /// Config file used to locate the socket
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn state_dir() -> PathBuf {
    dirs::state_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("rxcast")
}

/// PID file owned by a running daemon; removed when dropped.
struct PidFile {
    path: PathBuf,
}

impl PidFile {
    fn path() -> PathBuf {
        state_dir().join("rxcastd.pid")
    }

    /// PID of a live daemon, clearing a stale file left by a crash.
    fn running() -> Option<u32> {
        let path = Self::path();
        let pid: u32 = fs::read_to_string(&path).ok()?.trim().parse().ok()?;
        if Path::new(&format!("/proc/{pid}")).exists() {
            Some(pid)
        } else {
            let _ = fs::remove_file(&path);
            None
        }
    }

    fn claim() -> Result<Self> {
        let path = Self::path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create state directory")?;
        }
        fs::write(&path, process::id().to_string()).context("Failed to write PID file")?;
        Ok(Self { path })
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

fn stop_daemon(pid: u32) -> Result<()> {
    #[cfg(unix)]
    {
        let pid = libc::pid_t::try_from(pid).context("PID out of range")?;
        // SAFETY: kill has no memory-safety preconditions.
        let result = unsafe { libc::kill(pid, libc::SIGTERM) };
        if result != 0 {
            bail!("Failed to send SIGTERM to process {pid}");
        }
    }
    #[cfg(not(unix))]
    {
        bail!("Stop command is only supported on Unix systems");
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = Config::discover(path).context("Failed to load configuration")?;
    Ok(config.with_env_overrides())
}

fn main() -> Result<()> {
    let args = Args::parse();

    let command = args.command.unwrap_or(Command::Start {
        daemon: false,
        config: None,
    });

    match command {
        Command::Start { daemon, config } => {
            if let Some(pid) = PidFile::running() {
                bail!("Daemon is already running (PID {pid}); use 'rxcastd stop' first");
            }

            // Load before forking so config errors reach the terminal
            let config = load_config(config.as_deref())?;
            if daemon {
                daemonize(&state_dir().join("rxcastd.log"))?;
            }

            let _pid_file = PidFile::claim()?;
            run_daemon(config)
        }
        Command::Stop => {
            let Some(pid) = PidFile::running() else {
                println!("Daemon is not running.");
                return Ok(());
            };
            println!("Stopping daemon (PID {pid})...");
            stop_daemon(pid)?;

            let deadline = Instant::now() + STOP_TIMEOUT;
            while Instant::now() < deadline {
                if PidFile::running().is_none() {
                    println!("Daemon stopped.");
                    return Ok(());
                }
                std::thread::sleep(Duration::from_millis(100));
            }
            bail!("Daemon did not stop within {} seconds", STOP_TIMEOUT.as_secs())
        }
        Command::Status { config } => {
            let Some(pid) = PidFile::running() else {
                println!("Daemon is not running.");
                process::exit(1);
            };
            let config = load_config(config.as_deref())?;
            println!("Daemon is running (PID {pid})");
            println!("Socket:  {}", config.socket_path.display());
            println!("Trunk:   {}", config.trunk_path().display());
            println!("Audio:   udp://{}", config.audio.address);
            Ok(())
        }
    }
}

/// Forks into the background with stdout/stderr appended to `log_path`.
fn daemonize(log_path: &Path) -> Result<()> {
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).context("Failed to create log directory")?;
    }
    let log = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .with_context(|| format!("Failed to open {}", log_path.display()))?;
    let log_err = log.try_clone().context("Failed to duplicate log handle")?;

    daemonize::Daemonize::new()
        .working_directory("/")
        .stdout(log)
        .stderr(log_err)
        .start()
        .context("Failed to daemonize")
}

#[tokio::main]
async fn run_daemon(config: Config) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("rxcastd=info".parse()?)
                .add_directive("rxcast_core=info".parse()?)
                .add_directive("rxcast_protocol=info".parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        "rxcast daemon starting"
    );

    let cancel_token = CancellationToken::new();
    tokio::spawn({
        let cancel_token = cancel_token.clone();
        async move {
            match shutdown_signal().await {
                Ok(signal) => info!(signal, "Shutting down"),
                Err(e) => error!(error = %e, "Signal handler failed, shutting down"),
            }
            cancel_token.cancel();
        }
    });

    let supervisor = Arc::new(Supervisor::new(SupervisorConfig::from(&config)));

    if config.receiver.autostart {
        match supervisor.start_default().await {
            Ok(status) => info!(pid = ?status.pid, "Receiver autostarted"),
            Err(e) => warn!(error = %e, "Receiver autostart failed, waiting for clients"),
        }
    }

    let server = DaemonServer::new(
        &config.socket_path,
        Arc::clone(&supervisor),
        config.trunk_path(),
        cancel_token,
    );

    info!(socket = %config.socket_path.display(), "Starting server");

    let result = server.run().await;

    // The receiver must not outlive the daemon
    if supervisor.stop().await {
        info!("Receiver stopped on shutdown");
    }

    if let Err(e) = result {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("rxcast daemon stopped");
    Ok(())
}

/// Resolves with the name of the first termination signal received.
async fn shutdown_signal() -> Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let name = tokio::select! {
            _ = sigterm.recv() => "SIGTERM",
            _ = sigint.recv() => "SIGINT",
        };
        Ok(name)
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        Ok("ctrl-c")
    }
}
