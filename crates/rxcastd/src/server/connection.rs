//! Connection handler for individual client connections.
//!
//! Each client connection gets its own `ConnectionHandler` that:
//! - Performs protocol version negotiation
//! - Parses incoming messages
//! - Routes control requests to the supervisor
//! - Switches into raw streaming mode for `stream` requests
//!
//! Once a connection starts streaming it never returns to the message
//! loop: the client closing its write half ends the stream and the
//! connection.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Connection errors are logged and result in graceful disconnect

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use rxcast_core::{read_trunk_system, write_trunk_system, TrunkSystem};
use rxcast_protocol::{ClientMessage, DaemonMessage, MessageType, ProtocolVersion, StreamKind};

use crate::broadcast::{AudioBroadcaster, LogBroadcaster, StreamEnd};
use crate::supervisor::Supervisor;

/// Maximum message size (1 MB)
const MAX_MESSAGE_SIZE: usize = 1_048_576;

/// Read timeout for idle connections (5 minutes)
const READ_TIMEOUT: Duration = Duration::from_secs(300);

/// Write timeout for control replies (10 seconds)
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

type ClientId = String;

/// The broadcaster a streaming connection is attached to.
enum StreamSource {
    Audio(Arc<AudioBroadcaster>),
    Logs(Arc<LogBroadcaster>),
}

/// Connection handler for a single client.
pub struct ConnectionHandler {
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
    supervisor: Arc<Supervisor>,
    trunk_path: PathBuf,

    /// Fires on daemon shutdown; streams end and idle reads stop.
    shutdown: CancellationToken,

    /// Assigned after handshake
    client_id: Option<ClientId>,

    connection_number: u64,
}

impl ConnectionHandler {
    pub fn new(
        reader: OwnedReadHalf,
        writer: OwnedWriteHalf,
        supervisor: Arc<Supervisor>,
        trunk_path: PathBuf,
        shutdown: CancellationToken,
        connection_number: u64,
    ) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer: BufWriter::new(writer),
            supervisor,
            trunk_path,
            shutdown,
            client_id: None,
            connection_number,
        }
    }

    /// Runs the connection handler.
    ///
    /// Performs the handshake then processes messages until the connection
    /// closes. Returns the client id if the handshake succeeded.
    pub async fn run(mut self) -> Option<ClientId> {
        debug!(connection = self.connection_number, "New client connected");

        match self.handle_handshake().await {
            Ok(()) => {
                info!(client_id = ?self.client_id, "Client handshake completed");
            }
            Err(e) => {
                warn!(
                    connection = self.connection_number,
                    error = %e,
                    "Handshake failed"
                );
                return None;
            }
        }

        if let Err(e) = self.process_messages().await {
            debug!(client_id = ?self.client_id, error = %e, "Connection closed");
        }

        info!(client_id = ?self.client_id, "Client disconnected");
        self.client_id
    }

    /// Expects `connect`, checks the protocol version, and replies
    /// `connected` or `rejected`.
    async fn handle_handshake(&mut self) -> Result<(), ConnectionError> {
        let msg = match timeout(READ_TIMEOUT, self.read_message()).await {
            Ok(result) => result?,
            Err(_) => return Err(ConnectionError::Timeout),
        };

        let client_version = msg.protocol_version;
        if !client_version.is_compatible_with(&ProtocolVersion::CURRENT) {
            warn!(
                client_version = %client_version,
                server_version = %ProtocolVersion::CURRENT,
                "Protocol version mismatch"
            );

            self.send_message(DaemonMessage::rejected(&format!(
                "Protocol version {} not compatible with server version {}",
                client_version,
                ProtocolVersion::CURRENT
            )))
            .await?;

            return Err(ConnectionError::VersionMismatch {
                client: client_version,
                server: ProtocolVersion::CURRENT,
            });
        }

        match msg.message {
            MessageType::Connect { client_id } => {
                let assigned_id =
                    client_id.unwrap_or_else(|| format!("client-{}", self.connection_number));
                self.client_id = Some(assigned_id.clone());
                self.send_message(DaemonMessage::connected(assigned_id)).await
            }
            other => {
                self.send_message(DaemonMessage::error("Expected Connect message for handshake"))
                    .await?;
                Err(ConnectionError::UnexpectedMessage(format!("{other:?}")))
            }
        }
    }

    async fn process_messages(&mut self) -> Result<(), ConnectionError> {
        let shutdown = self.shutdown.clone();
        loop {
            let read = tokio::select! {
                _ = shutdown.cancelled() => None,
                read = timeout(READ_TIMEOUT, self.read_message()) => Some(read),
            };
            let Some(read) = read else {
                debug!(client_id = ?self.client_id, "Daemon shutting down, closing connection");
                return Ok(());
            };

            let msg = match read {
                Ok(Ok(msg)) => msg,
                Ok(Err(ConnectionError::Eof)) => {
                    debug!(client_id = ?self.client_id, "Client sent EOF");
                    return Ok(());
                }
                Ok(Err(ConnectionError::ParseError(reason))) => {
                    self.send_message(DaemonMessage::error_with_code(
                        &format!("Invalid message: {reason}"),
                        "invalid_message",
                    ))
                    .await?;
                    continue;
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    debug!(client_id = ?self.client_id, "Connection timed out");
                    return Err(ConnectionError::Timeout);
                }
            };

            match self.handle_message(msg).await {
                Ok(()) => {}
                Err(ConnectionError::Eof) => return Ok(()),
                Err(e @ (ConnectionError::Io(_) | ConnectionError::WriteTimeout)) => {
                    return Err(e)
                }
                Err(e) => {
                    error!(client_id = ?self.client_id, error = %e, "Error handling message");
                    let _ = self.send_message(DaemonMessage::error(&e.to_string())).await;
                }
            }
        }
    }

    /// Handles a single client message.
    ///
    /// `Err(Eof)` ends the connection without an error reply.
    async fn handle_message(&mut self, msg: ClientMessage) -> Result<(), ConnectionError> {
        match msg.message {
            MessageType::Connect { .. } => {
                self.send_message(DaemonMessage::error("Already connected")).await?;
            }

            MessageType::StartReceiver { args } => {
                let result = match args {
                    Some(args) => self.supervisor.start(args).await,
                    None => self.supervisor.start_default().await,
                };
                let reply = match result {
                    Ok(status) => {
                        info!(client_id = ?self.client_id, pid = ?status.pid, "Receiver started by client");
                        DaemonMessage::started()
                    }
                    Err(e) => {
                        warn!(client_id = ?self.client_id, error = %e, "Receiver start failed");
                        DaemonMessage::start_failed(&e.to_string())
                    }
                };
                self.send_message(reply).await?;
            }

            MessageType::StopReceiver => {
                let reply = if self.supervisor.stop().await {
                    DaemonMessage::stopped()
                } else {
                    DaemonMessage::not_running()
                };
                self.send_message(reply).await?;
            }

            MessageType::Status => {
                let status = self.supervisor.status().await;
                self.send_message(DaemonMessage::status(status.running, status.args))
                    .await?;
            }

            MessageType::ReadTrunk => {
                let path = self.trunk_path.clone();
                let system = tokio::task::spawn_blocking(move || read_trunk_system(&path))
                    .await
                    .map_err(|e| ConnectionError::Task(e.to_string()))?
                    .map_err(|e| ConnectionError::Trunk(e.to_string()))?;
                self.send_message(DaemonMessage::trunk_system(system)).await?;
            }

            MessageType::WriteTrunk {
                sysname,
                control_channel,
            } => {
                let path = self.trunk_path.clone();
                let system = TrunkSystem {
                    sysname,
                    control_channel,
                };
                let result = tokio::task::spawn_blocking(move || write_trunk_system(&path, &system))
                    .await
                    .map_err(|e| ConnectionError::Task(e.to_string()))?
                    .map_err(|e| e.to_string());
                if let Err(e) = &result {
                    warn!(client_id = ?self.client_id, error = %e, "Trunk write failed");
                }
                self.send_message(DaemonMessage::trunk_written(result)).await?;
            }

            MessageType::Stream { stream } => {
                if self.handle_stream(stream).await? {
                    return Err(ConnectionError::Eof);
                }
            }

            MessageType::Ping { seq } => {
                self.send_message(DaemonMessage::pong(seq)).await?;
            }

            MessageType::Disconnect => {
                debug!(client_id = ?self.client_id, "Client requested disconnect");
                return Err(ConnectionError::Eof);
            }
        }

        Ok(())
    }

    /// Streams `kind` until the client goes away, the daemon shuts down,
    /// or the broadcaster closes the queue.
    ///
    /// Returns false when nothing is broadcasting; the connection then
    /// stays in message mode.
    async fn handle_stream(&mut self, kind: StreamKind) -> Result<bool, ConnectionError> {
        let source = match kind {
            StreamKind::Audio => self.supervisor.audio().await.map(StreamSource::Audio),
            StreamKind::Logs => self.supervisor.logs().await.map(StreamSource::Logs),
        };
        let Some(source) = source else {
            debug!(client_id = ?self.client_id, stream = %kind, "Stream requested while stopped");
            self.send_message(DaemonMessage::unavailable(kind)).await?;
            return Ok(false);
        };

        self.send_message(DaemonMessage::streaming(kind)).await?;
        info!(client_id = ?self.client_id, stream = %kind, "Client streaming");

        let cancel = self.shutdown.child_token();
        let writer = &mut self.writer;
        let reader = &mut self.reader;

        let serve = async {
            match &source {
                StreamSource::Audio(audio) => audio.serve(writer, cancel.clone()).await,
                StreamSource::Logs(logs) => logs.serve(writer, cancel.clone()).await,
            }
        };
        tokio::pin!(serve);

        let result = tokio::select! {
            result = &mut serve => result,
            () = wait_for_eof(reader) => {
                cancel.cancel();
                serve.await
            }
        };

        match result {
            Ok(StreamEnd::Cancelled) => {
                info!(client_id = ?self.client_id, stream = %kind, "Stream ended by client or shutdown");
            }
            Ok(StreamEnd::Closed) => {
                info!(client_id = ?self.client_id, stream = %kind, "Stream closed by broadcaster");
            }
            Err(e) => {
                debug!(client_id = ?self.client_id, stream = %kind, error = %e, "Stream write failed");
            }
        }
        Ok(true)
    }

    async fn read_message(&mut self) -> Result<ClientMessage, ConnectionError> {
        let mut line = String::new();

        let bytes_read = (&mut self.reader)
            .take(MAX_MESSAGE_SIZE as u64 + 1)
            .read_line(&mut line)
            .await
            .map_err(|e| ConnectionError::Io(e.to_string()))?;

        if bytes_read == 0 {
            return Err(ConnectionError::Eof);
        }

        if line.len() > MAX_MESSAGE_SIZE {
            return Err(ConnectionError::MessageTooLarge {
                size: line.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }

        let msg: ClientMessage =
            serde_json::from_str(&line).map_err(|e| ConnectionError::ParseError(e.to_string()))?;

        debug!(
            client_id = ?self.client_id,
            message_type = ?std::mem::discriminant(&msg.message),
            "Received message"
        );

        Ok(msg)
    }

    async fn send_message(&mut self, msg: DaemonMessage) -> Result<(), ConnectionError> {
        let json =
            serde_json::to_string(&msg).map_err(|e| ConnectionError::ParseError(e.to_string()))?;

        let writer = &mut self.writer;
        match timeout(WRITE_TIMEOUT, async {
            writer.write_all(json.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
            Ok::<(), std::io::Error>(())
        })
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ConnectionError::Io(e.to_string())),
            Err(_) => Err(ConnectionError::WriteTimeout),
        }
    }

    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }
}

/// Resolves once the peer closes its write half (or the read fails).
/// Anything a streaming client sends is discarded.
async fn wait_for_eof<R: AsyncRead + Unpin>(reader: &mut R) {
    let mut buf = [0u8; 512];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(_) => continue,
        }
    }
}

/// Errors that can occur during connection handling.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Protocol version mismatch: client {client}, server {server}")]
    VersionMismatch {
        client: ProtocolVersion,
        server: ProtocolVersion,
    },

    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Connection closed")]
    Eof,

    #[error("Read timeout")]
    Timeout,

    #[error("Write timeout")]
    WriteTimeout,

    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Trunk file error: {0}")]
    Trunk(String),

    #[error("Background task failed: {0}")]
    Task(String),
}
