//! Fan-out broadcasters for the receiver's audio and log output.
//!
//! # Architecture
//!
//! ```text
//!   UDP 127.0.0.1:23456           stdout        stderr
//!          │                         │             │
//!          ▼                         ▼             ▼
//! ┌──────────────────┐       ┌──────────────────────────────┐
//! │ AudioBroadcaster │       │        LogBroadcaster        │
//! │  (ingest task)   │       │ (one ingest task per stream) │
//! │                  │       │  history: last 1000 lines    │
//! └────────┬─────────┘       └──────────────┬───────────────┘
//!          │ try_send, drop newest          │ try_send, evict subscriber
//!          ▼                                ▼
//!   bounded queue (100) per subscriber  bounded queue (100) per subscriber
//!          │                                │
//!          ▼                                ▼
//!     serve(): WAV stream              serve(): SSE frames
//! ```
//!
//! Both broadcasters keep exactly one lock each, guarding their
//! subscriber registry (and, for logs, the history). A full audio queue
//! loses the newest chunk; a full log queue gets its subscriber evicted.

mod audio;
mod logs;
mod subscriber;

pub use audio::{AudioBroadcaster, BroadcastError, RECEIVE_BUFFER_BYTES};
pub use logs::{sse_frame, LogBroadcaster, LogSource, StreamLabel, HISTORY_CAPACITY};
pub use subscriber::{
    FanOut, Next, OverflowPolicy, SubscriberId, SubscriberRegistry, Subscription,
    SUBSCRIBER_QUEUE_CAPACITY,
};

/// Why a `serve` loop ended without a write error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// The caller's cancellation token fired (client gone or daemon stopping).
    Cancelled,
    /// The broadcaster closed the queue (eviction or shutdown).
    Closed,
}
