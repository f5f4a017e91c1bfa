//! rxcast Protocol - Wire protocol for daemon communication
//!
//! This crate provides the newline-delimited JSON messages exchanged
//! between the `rxcast` client and the `rxcastd` daemon: receiver
//! control, trunk file access, and requests to switch a connection
//! into a raw audio or log stream.

pub mod message;
pub mod version;

pub use message::{ClientMessage, DaemonMessage, MessageType, StreamKind};
pub use version::ProtocolVersion;
