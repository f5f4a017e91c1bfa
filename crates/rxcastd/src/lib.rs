//! rxcast daemon - receiver supervisor and live audio/log broadcaster
//!
//! This crate provides the core infrastructure for the rxcast daemon:
//! - `supervisor` - Owns the external receiver process and its lifecycle
//! - `broadcast` - Fans receiver audio and log output out to live clients
//! - `server` - Unix socket server for client connections
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       rxcastd daemon                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐    │
//! │  │  DaemonServer   │────▶│        Supervisor           │    │
//! │  │ (Unix Socket)   │     │ (one receiver generation)   │    │
//! │  └────────┬────────┘     └──────┬───────────────┬──────┘    │
//! │           │ connections         │ spawn/killpg  │ owns      │
//! │           ▼                     ▼               ▼           │
//! │  ┌─────────────────┐     ┌────────────┐  ┌──────────────┐   │
//! │  │ConnectionHandler│     │  receiver  │─▶│ Audio / Log  │   │
//! │  │  (per client)   │     │  process   │  │ Broadcasters │   │
//! │  └────────▲────────┘     └────────────┘  └──────┬───────┘   │
//! │           │          bounded queues             │           │
//! │           └─────────────────────────────────────┘           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Queue and channel closure is handled as a normal end of stream

pub mod broadcast;
pub mod server;
pub mod supervisor;
