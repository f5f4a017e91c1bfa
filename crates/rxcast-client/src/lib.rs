//! Client library for the rxcast daemon.
//!
//! Provides [`DaemonClient`], a request/response connection to the
//! daemon's Unix socket that can also hand the connection over to a raw
//! audio or log stream.
//!
//! **Panic-Free Policy:** No `.unwrap()`, `.expect()`, `panic!()`,
//! `unreachable!()`, or `todo!()` outside tests.

pub mod client;
pub mod error;

pub use client::{DaemonClient, ReceiverStatus};
pub use error::{ClientError, Result};
