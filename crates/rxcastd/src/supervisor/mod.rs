//! Lifecycle of the external receiver and its broadcasters.
//!
//! A *generation* is one receiver process together with the audio and log
//! broadcasters built for it. At most one generation exists at a time:
//!
//! ```text
//!   STOPPED ── start(args) ──▶ RUNNING ── stop() ──▶ STOPPED
//!                               │   ▲
//!                               └───┘ start(args'): stop, then start
//! ```
//!
//! Every transition holds one async lock for its full duration, so a stop
//! always finishes reaping the old process before a new one is recorded.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()` in production paths
//! - `stop()` never fails; errors while tearing down are logged

mod process;

pub use process::{LaunchSpec, ReceiverOutput, ReceiverProcess};

use std::net::SocketAddr;
use std::sync::Arc;

use rxcast_core::{AudioFormat, Config};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::broadcast::{AudioBroadcaster, BroadcastError, LogBroadcaster, LogSource};

/// Errors from starting a generation. Stopping never fails.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("Failed to start receiver '{program}': {reason}")]
    Spawn { program: String, reason: String },

    #[error("Receiver {stream} stream unavailable")]
    MissingStream { stream: String },

    #[error(transparent)]
    Transport(#[from] BroadcastError),
}

/// Everything the supervisor needs from the daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
    pub launch: LaunchSpec,
    pub default_args: Vec<String>,
    pub audio_address: SocketAddr,
    pub audio_format: AudioFormat,
}

impl From<&Config> for SupervisorConfig {
    fn from(config: &Config) -> Self {
        Self {
            launch: LaunchSpec {
                program: config.receiver.program.clone(),
                base_args: config.receiver.base_args.clone(),
                working_dir: config.receiver.working_dir.clone(),
            },
            default_args: config.receiver.default_args.clone(),
            audio_address: config.audio.address,
            audio_format: config.audio.format(),
        }
    }
}

/// Snapshot returned by [`Supervisor::status`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SupervisorStatus {
    pub running: bool,
    pub args: Vec<String>,
    pub pid: Option<u32>,
}

struct Generation {
    process: ReceiverProcess,
    audio: Arc<AudioBroadcaster>,
    logs: Arc<LogBroadcaster>,
}

/// Owns the receiver process and the broadcasters fed by it.
pub struct Supervisor {
    config: SupervisorConfig,
    current: Mutex<Option<Generation>>,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            config,
            current: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Starts the receiver with `args`, replacing any running generation.
    ///
    /// On error nothing is left running.
    pub async fn start(&self, args: Vec<String>) -> Result<SupervisorStatus, SupervisorError> {
        let mut current = self.current.lock().await;

        if let Some(previous) = current.take() {
            info!(pid = previous.process.pid(), "Restarting receiver");
            teardown(previous).await;
        }

        let (process, output) = ReceiverProcess::spawn(&self.config.launch, args)?;

        let audio = Arc::new(AudioBroadcaster::new(self.config.audio_format));
        if let Err(e) = audio.start(self.config.audio_address) {
            warn!(error = %e, pid = process.pid(), "Audio transport failed, rolling back receiver");
            drop(output);
            process.terminate().await;
            audio.shutdown().await;
            return Err(e.into());
        }

        let logs = Arc::new(LogBroadcaster::new());
        let stdout: LogSource = Box::new(output.stdout);
        let stderr: LogSource = Box::new(output.stderr);
        logs.start(Some(stdout), Some(stderr));

        let status = SupervisorStatus {
            running: true,
            args: process.args().to_vec(),
            pid: Some(process.pid()),
        };
        *current = Some(Generation {
            process,
            audio,
            logs,
        });
        Ok(status)
    }

    /// Starts the receiver with the configured default arguments.
    pub async fn start_default(&self) -> Result<SupervisorStatus, SupervisorError> {
        self.start(self.config.default_args.clone()).await
    }

    /// Kills the receiver group and tears down its broadcasters.
    ///
    /// Returns false when nothing was running.
    pub async fn stop(&self) -> bool {
        let mut current = self.current.lock().await;
        match current.take() {
            Some(generation) => {
                teardown(generation).await;
                true
            }
            None => false,
        }
    }

    pub async fn status(&self) -> SupervisorStatus {
        match self.current.lock().await.as_ref() {
            Some(generation) => SupervisorStatus {
                running: true,
                args: generation.process.args().to_vec(),
                pid: Some(generation.process.pid()),
            },
            None => SupervisorStatus::default(),
        }
    }

    /// The running generation's audio broadcaster.
    pub async fn audio(&self) -> Option<Arc<AudioBroadcaster>> {
        self.current
            .lock()
            .await
            .as_ref()
            .map(|generation| Arc::clone(&generation.audio))
    }

    /// The running generation's log broadcaster.
    pub async fn logs(&self) -> Option<Arc<LogBroadcaster>> {
        self.current
            .lock()
            .await
            .as_ref()
            .map(|generation| Arc::clone(&generation.logs))
    }
}

async fn teardown(generation: Generation) {
    let Generation {
        process,
        audio,
        logs,
    } = generation;

    process.terminate().await;
    audio.shutdown().await;
    logs.shutdown().await;
    info!("Receiver stopped");
}
