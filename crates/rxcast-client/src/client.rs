//! Daemon connection client.
//!
//! A `DaemonClient` is one handshaken connection to the daemon. Control
//! requests are strictly request/reply. [`DaemonClient::stream`] consumes
//! the client, because after a `streaming` acknowledgement the socket
//! carries raw audio or SSE bytes instead of messages.
//!
//! **Panic-Free Policy:** No `.unwrap()`, `.expect()`, `panic!()`,
//! `unreachable!()`, or `todo!()` outside tests.

use std::path::Path;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{ClientError, Result};
use rxcast_core::TrunkSystem;
use rxcast_protocol::{ClientMessage, DaemonMessage, ProtocolVersion, StreamKind};

/// Receiver state as reported by the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverStatus {
    pub running: bool,
    pub args: Vec<String>,
}

// ============================================================================
// Daemon Client
// ============================================================================

/// A connected, handshaken session with the daemon.
pub struct DaemonClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    client_id: String,
}

impl DaemonClient {
    /// Connects and performs the handshake with an auto-assigned id.
    pub async fn connect(socket_path: &Path) -> Result<Self> {
        Self::connect_as(socket_path, None).await
    }

    /// Connects and performs the handshake, asking for `client_id`.
    pub async fn connect_as(socket_path: &Path, client_id: Option<String>) -> Result<Self> {
        let stream = UnixStream::connect(socket_path)
            .await
            .map_err(|source| ClientError::Connect {
                path: socket_path.to_path_buf(),
                source,
            })?;
        let (reader, writer) = stream.into_split();

        let mut client = Self {
            reader: BufReader::new(reader),
            writer,
            client_id: String::new(),
        };
        client.handshake(client_id).await?;
        Ok(client)
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    async fn handshake(&mut self, client_id: Option<String>) -> Result<()> {
        self.send(&ClientMessage::connect(client_id)).await?;

        match self.recv().await? {
            DaemonMessage::Connected {
                protocol_version,
                client_id,
            } => {
                if !ProtocolVersion::CURRENT.is_compatible_with(&protocol_version) {
                    return Err(ClientError::VersionMismatch {
                        client_version: ProtocolVersion::CURRENT.to_string(),
                        daemon_version: protocol_version.to_string(),
                    });
                }
                debug!(client_id, protocol_version = %protocol_version, "Handshake complete");
                self.client_id = client_id;
                Ok(())
            }
            DaemonMessage::Rejected {
                protocol_version, ..
            } => Err(ClientError::VersionMismatch {
                client_version: ProtocolVersion::CURRENT.to_string(),
                daemon_version: protocol_version.to_string(),
            }),
            DaemonMessage::Error { message, code } => Err(ClientError::Daemon { message, code }),
            other => Err(unexpected("connect", &other)),
        }
    }

    /// Starts (or restarts) the receiver. `None` uses the daemon's defaults.
    pub async fn start(&mut self, args: Option<Vec<String>>) -> Result<()> {
        match self.request(ClientMessage::start_receiver(args)).await? {
            DaemonMessage::StartResult { started: true, .. } => Ok(()),
            DaemonMessage::StartResult { error, .. } => Err(ClientError::StartFailed(
                error.unwrap_or_else(|| "unknown error".to_string()),
            )),
            other => Err(unexpected("start_receiver", &other)),
        }
    }

    /// Stops the receiver. Returns false if it was not running.
    pub async fn stop(&mut self) -> Result<bool> {
        match self.request(ClientMessage::stop_receiver()).await? {
            DaemonMessage::StopResult { stopped, .. } => Ok(stopped),
            other => Err(unexpected("stop_receiver", &other)),
        }
    }

    pub async fn status(&mut self) -> Result<ReceiverStatus> {
        match self.request(ClientMessage::status()).await? {
            DaemonMessage::Status { running, args } => Ok(ReceiverStatus { running, args }),
            other => Err(unexpected("status", &other)),
        }
    }

    pub async fn read_trunk(&mut self) -> Result<TrunkSystem> {
        match self.request(ClientMessage::read_trunk()).await? {
            DaemonMessage::TrunkSystem {
                sysname,
                control_channel,
            } => Ok(TrunkSystem {
                sysname,
                control_channel,
            }),
            other => Err(unexpected("read_trunk", &other)),
        }
    }

    pub async fn write_trunk(&mut self, system: &TrunkSystem) -> Result<()> {
        match self
            .request(ClientMessage::write_trunk(system.clone()))
            .await?
        {
            DaemonMessage::TrunkWritten { success: true, .. } => Ok(()),
            DaemonMessage::TrunkWritten { error, .. } => Err(ClientError::TrunkWriteFailed(
                error.unwrap_or_else(|| "unknown error".to_string()),
            )),
            other => Err(unexpected("write_trunk", &other)),
        }
    }

    /// Round-trips a ping and returns the elapsed time.
    pub async fn ping(&mut self, seq: u64) -> Result<Duration> {
        let sent = Instant::now();
        match self.request(ClientMessage::ping(seq)).await? {
            DaemonMessage::Pong { seq: got } if got == seq => Ok(sent.elapsed()),
            other => Err(unexpected("ping", &other)),
        }
    }

    /// Switches the connection to `kind` and copies the raw stream into
    /// `sink` until the daemon ends it or `cancel` fires.
    ///
    /// Returns the number of bytes copied.
    pub async fn stream<W>(
        mut self,
        kind: StreamKind,
        sink: &mut W,
        cancel: CancellationToken,
    ) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        match self.request(ClientMessage::stream(kind)).await? {
            DaemonMessage::Streaming { stream } if stream == kind => {}
            DaemonMessage::Unavailable { stream, reason } => {
                return Err(ClientError::Unavailable { stream, reason });
            }
            other => return Err(unexpected("stream", &other)),
        }
        info!(stream = %kind, "Streaming from daemon");

        let copied = tokio::select! {
            result = tokio::io::copy_buf(&mut self.reader, sink) => result?,
            _ = cancel.cancelled() => {
                // Closing our half tells the daemon to stop serving
                let _ = self.writer.shutdown().await;
                0
            }
        };
        sink.flush().await?;
        Ok(copied)
    }

    /// Politely ends the session.
    pub async fn disconnect(mut self) -> Result<()> {
        self.send(&ClientMessage::disconnect()).await?;
        self.writer.shutdown().await?;
        Ok(())
    }

    async fn request(&mut self, message: ClientMessage) -> Result<DaemonMessage> {
        self.send(&message).await?;
        match self.recv().await? {
            DaemonMessage::Error { message, code } => Err(ClientError::Daemon { message, code }),
            reply => Ok(reply),
        }
    }

    async fn send(&mut self, message: &ClientMessage) -> Result<()> {
        let json = serde_json::to_string(message)?;
        self.writer.write_all(json.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        debug!(message_type = ?message.message, "Sent message to daemon");
        Ok(())
    }

    async fn recv(&mut self) -> Result<DaemonMessage> {
        let mut line = String::new();
        if self.reader.read_line(&mut line).await? == 0 {
            return Err(ClientError::Closed);
        }
        Ok(serde_json::from_str(line.trim())?)
    }
}

fn unexpected(request: &str, reply: &DaemonMessage) -> ClientError {
    ClientError::ProtocolError(format!("Unexpected response to {request}: {reply:?}"))
}

// ============================================================================
// Tests
// ============================================================================
