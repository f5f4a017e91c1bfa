//! rxcast Core - Shared types for the receiver broadcast daemon
//!
//! This crate provides the domain types shared between
//! the daemon (rxcastd) and the command-line client (rxcast).
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod audio;
pub mod config;
pub mod error;
pub mod trunk;

// Re-exports for convenience
pub use audio::{align_to_samples, AudioFormat, MAX_CHANNELS, MAX_SAMPLE_RATE, WAV_HEADER_LEN};
pub use config::{AudioConfig, Config, ReceiverConfig, DEFAULT_SOCKET_PATH};
pub use error::{ConfigError, TrunkError};
pub use trunk::{read_trunk_system, write_trunk_system, TrunkSystem};
