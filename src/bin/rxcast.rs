//! rxcast - command-line client for the rxcast daemon
//!
//! # Usage
//!
//! ```text
//! rxcast start                      # start receiver with configured args
//! rxcast start -- -v 9 -T trunk.tsv # start with explicit args
//! rxcast stop
//! rxcast status
//! rxcast logs                       # follow receiver log (SSE frames)
//! rxcast audio -o capture.wav       # record live audio
//! rxcast audio | aplay              # play live audio
//! rxcast trunk read
//! rxcast trunk write --sysname Metro --control-channel 851.0125
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use rxcast_client::DaemonClient;
use rxcast_core::{Config, TrunkSystem};
use rxcast_protocol::StreamKind;

// ============================================================================
// CLI Arguments
// ============================================================================

/// rxcast - control the radio receiver daemon
#[derive(Parser, Debug)]
#[command(name = "rxcast", version, about)]
struct Args {
    /// Daemon socket (overrides config and RXCAST_SOCKET)
    #[arg(short, long, global = true)]
    socket: Option<PathBuf>,

    /// Config file used to locate the socket
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start (or restart) the receiver
    Start {
        /// Receiver arguments; omit to use the configured defaults
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Stop the receiver
    Stop,
    /// Show whether the receiver is running
    Status,
    /// Check that the daemon answers
    Ping,
    /// Follow the receiver log
    Logs,
    /// Stream live audio as WAV
    Audio {
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Read or edit the trunk file
    Trunk {
        #[command(subcommand)]
        action: TrunkAction,
    },
}

#[derive(Subcommand, Debug)]
enum TrunkAction {
    /// Print system name and control channels
    Read,
    /// Set system name and control channels
    Write {
        #[arg(long)]
        sysname: String,
        #[arg(long)]
        control_channel: String,
    },
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so streamed audio on stdout stays clean
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();
    let socket_path = match args.socket {
        Some(path) => path,
        None => {
            Config::discover(args.config.as_deref())
                .context("Failed to load configuration")?
                .with_env_overrides()
                .socket_path
        }
    };
    debug!(socket = %socket_path.display(), "Connecting to daemon");

    let mut client = DaemonClient::connect(&socket_path).await?;

    match args.command {
        Command::Start { args } => {
            let args = if args.is_empty() { None } else { Some(args) };
            client.start(args).await?;
            println!("Receiver started.");
        }
        Command::Stop => {
            if client.stop().await? {
                println!("Receiver stopped.");
            } else {
                println!("Receiver is not running.");
            }
        }
        Command::Status => {
            let status = client.status().await?;
            if status.running {
                println!("Receiver is running: {}", status.args.join(" "));
            } else {
                println!("Receiver is stopped.");
            }
        }
        Command::Ping => {
            let rtt = client.ping(1).await?;
            println!("Daemon answered in {rtt:?}");
        }
        Command::Logs => {
            stream_to(client, StreamKind::Logs, tokio::io::stdout()).await?;
        }
        Command::Audio { output } => match output {
            Some(path) => {
                let file = tokio::fs::File::create(&path)
                    .await
                    .with_context(|| format!("Failed to create {}", path.display()))?;
                stream_to(client, StreamKind::Audio, file).await?;
            }
            None => stream_to(client, StreamKind::Audio, tokio::io::stdout()).await?,
        },
        Command::Trunk { action } => match action {
            TrunkAction::Read => {
                let system = client.read_trunk().await?;
                println!("Sysname:         {}", system.sysname);
                println!("Control channel: {}", system.control_channel);
            }
            TrunkAction::Write {
                sysname,
                control_channel,
            } => {
                client
                    .write_trunk(&TrunkSystem {
                        sysname,
                        control_channel,
                    })
                    .await?;
                println!("Trunk file updated.");
            }
        },
    }

    Ok(())
}

/// Streams until the daemon ends the stream or the user hits Ctrl+C.
async fn stream_to<W>(client: DaemonClient, kind: StreamKind, mut sink: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let copied = client.stream(kind, &mut sink, cancel).await?;
    debug!(bytes = copied, stream = %kind, "Stream finished");
    Ok(())
}
