//! Protocol message types for daemon communication.

use crate::version::ProtocolVersion;
use rxcast_core::TrunkSystem;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The two live streams a connection can switch into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    /// WAV header followed by raw S16_LE PCM
    Audio,
    /// Server-sent-event frames, one per log line
    Logs,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Audio => write!(f, "audio"),
            StreamKind::Logs => write!(f, "logs"),
        }
    }
}

/// Message types that can be sent by clients to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageType {
    /// Client handshake/connection request
    Connect {
        /// Client identifier (optional)
        #[serde(skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
    },

    /// Start (or restart) the receiver
    StartReceiver {
        /// Receiver arguments; the configured defaults when absent
        #[serde(default, skip_serializing_if = "Option::is_none")]
        args: Option<Vec<String>>,
    },

    /// Stop the receiver
    StopReceiver,

    /// Query receiver state
    Status,

    /// Read the trunk system definition
    ReadTrunk,

    /// Replace the trunk system name and control channel
    WriteTrunk {
        sysname: String,
        control_channel: String,
    },

    /// Switch this connection into a live stream
    Stream { stream: StreamKind },

    /// Ping to check connection
    Ping {
        /// Sequence number for matching pong response
        seq: u64,
    },

    /// Client disconnecting gracefully
    Disconnect,
}

/// Messages sent from client to daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientMessage {
    /// Protocol version
    pub protocol_version: ProtocolVersion,

    /// Message payload
    #[serde(flatten)]
    pub message: MessageType,
}

impl ClientMessage {
    /// Creates a new client message with current protocol version.
    pub fn new(message: MessageType) -> Self {
        Self {
            protocol_version: ProtocolVersion::CURRENT,
            message,
        }
    }

    pub fn connect(client_id: Option<String>) -> Self {
        Self::new(MessageType::Connect { client_id })
    }

    pub fn start_receiver(args: Option<Vec<String>>) -> Self {
        Self::new(MessageType::StartReceiver { args })
    }

    pub fn stop_receiver() -> Self {
        Self::new(MessageType::StopReceiver)
    }

    pub fn status() -> Self {
        Self::new(MessageType::Status)
    }

    pub fn read_trunk() -> Self {
        Self::new(MessageType::ReadTrunk)
    }

    pub fn write_trunk(system: TrunkSystem) -> Self {
        Self::new(MessageType::WriteTrunk {
            sysname: system.sysname,
            control_channel: system.control_channel,
        })
    }

    pub fn stream(stream: StreamKind) -> Self {
        Self::new(MessageType::Stream { stream })
    }

    pub fn ping(seq: u64) -> Self {
        Self::new(MessageType::Ping { seq })
    }

    pub fn disconnect() -> Self {
        Self::new(MessageType::Disconnect)
    }
}

/// Messages sent from daemon to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DaemonMessage {
    /// Connection accepted
    Connected {
        /// Daemon's protocol version
        protocol_version: ProtocolVersion,
        /// Assigned client ID
        client_id: String,
    },

    /// Connection rejected (version mismatch, etc.)
    Rejected {
        reason: String,
        protocol_version: ProtocolVersion,
    },

    /// Outcome of a start request
    StartResult {
        started: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// Outcome of a stop request
    StopResult {
        stopped: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// Receiver state snapshot
    Status { running: bool, args: Vec<String> },

    /// Current trunk system
    TrunkSystem {
        sysname: String,
        control_channel: String,
    },

    /// Outcome of a trunk write
    TrunkWritten {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// The connection is now a raw stream; no further JSON follows
    Streaming { stream: StreamKind },

    /// The requested stream has no broadcaster (receiver not started)
    Unavailable { stream: StreamKind, reason: String },

    /// Pong response to ping
    Pong { seq: u64 },

    /// Error response
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
}

impl DaemonMessage {
    pub fn connected(client_id: String) -> Self {
        Self::Connected {
            protocol_version: ProtocolVersion::CURRENT,
            client_id,
        }
    }

    pub fn rejected(reason: &str) -> Self {
        Self::Rejected {
            reason: reason.to_string(),
            protocol_version: ProtocolVersion::CURRENT,
        }
    }

    pub fn started() -> Self {
        Self::StartResult {
            started: true,
            error: None,
        }
    }

    pub fn start_failed(error: &str) -> Self {
        Self::StartResult {
            started: false,
            error: Some(error.to_string()),
        }
    }

    pub fn stopped() -> Self {
        Self::StopResult {
            stopped: true,
            error: None,
        }
    }

    pub fn not_running() -> Self {
        Self::StopResult {
            stopped: false,
            error: Some("receiver not running".to_string()),
        }
    }

    pub fn status(running: bool, args: Vec<String>) -> Self {
        Self::Status { running, args }
    }

    pub fn trunk_system(system: TrunkSystem) -> Self {
        Self::TrunkSystem {
            sysname: system.sysname,
            control_channel: system.control_channel,
        }
    }

    pub fn trunk_written(result: Result<(), String>) -> Self {
        match result {
            Ok(()) => Self::TrunkWritten {
                success: true,
                error: None,
            },
            Err(e) => Self::TrunkWritten {
                success: false,
                error: Some(e),
            },
        }
    }

    pub fn streaming(stream: StreamKind) -> Self {
        Self::Streaming { stream }
    }

    pub fn unavailable(stream: StreamKind) -> Self {
        Self::Unavailable {
            stream,
            reason: format!("{stream} not broadcasting (receiver not started)"),
        }
    }

    pub fn pong(seq: u64) -> Self {
        Self::Pong { seq }
    }

    pub fn error(message: &str) -> Self {
        Self::Error {
            message: message.to_string(),
            code: None,
        }
    }

    pub fn error_with_code(message: &str, code: &str) -> Self {
        Self::Error {
            message: message.to_string(),
            code: Some(code.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_serialization() {
        let msg = ClientMessage::ping(42);
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"ping\""));
        assert!(json.contains("\"seq\":42"));
        assert!(json.contains("\"protocol_version\""));
    }

    #[test]
    fn test_start_without_args_omits_field() {
        let json = serde_json::to_string(&ClientMessage::start_receiver(None)).unwrap();
        assert!(json.contains("\"type\":\"start_receiver\""));
        assert!(!json.contains("args"));

        let parsed: ClientMessage = serde_json::from_str(&json).unwrap();
        assert!(matches!(
            parsed.message,
            MessageType::StartReceiver { args: None }
        ));
    }

    #[test]
    fn test_start_with_args_parses() {
        let json = r#"{"protocol_version":{"major":1,"minor":0},"type":"start_receiver","args":["-v","9"]}"#;
        let parsed: ClientMessage = serde_json::from_str(json).unwrap();
        match parsed.message {
            MessageType::StartReceiver { args: Some(args) } => assert_eq!(args, vec!["-v", "9"]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_stream_kind_wire_names() {
        let json = serde_json::to_string(&ClientMessage::stream(StreamKind::Logs)).unwrap();
        assert!(json.contains("\"type\":\"stream\""));
        assert!(json.contains("\"stream\":\"logs\""));
    }

    #[test]
    fn test_unavailable_reason() {
        let msg = DaemonMessage::unavailable(StreamKind::Audio);
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"unavailable\""));
        assert!(json.contains("audio not broadcasting"));
    }

    #[test]
    fn test_status_roundtrip() {
        let msg = DaemonMessage::status(true, vec!["-X".to_string()]);
        let json = serde_json::to_string(&msg).unwrap();
        match serde_json::from_str::<DaemonMessage>(&json).unwrap() {
            DaemonMessage::Status { running, args } => {
                assert!(running);
                assert_eq!(args, vec!["-X"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_stop_when_not_running() {
        let json = serde_json::to_string(&DaemonMessage::not_running()).unwrap();
        assert!(json.contains("\"stopped\":false"));
        assert!(json.contains("receiver not running"));
    }
}
