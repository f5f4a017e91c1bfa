//! Log fan-out: receiver stdout/stderr lines to live consumers.
//!
//! Every line is tagged with its source (`[stdout]`, `[stderr]`) or marked
//! `[system]` for notices from the broadcaster itself, kept in a bounded
//! history, and offered to each subscriber. New subscribers first get the
//! whole history, then live lines. A subscriber whose queue fills up is
//! evicted rather than allowed to fall further behind.

use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{Local, SecondsFormat};
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::subscriber::{
    lock, Detach, FanOut, Next, OverflowPolicy, SubscriberId, SubscriberRegistry, Subscription,
};
use super::StreamEnd;

/// Lines retained for replay to late subscribers.
pub const HISTORY_CAPACITY: usize = 1000;

/// Longest receiver line accepted; a longer one ends ingest for that stream.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// How long shutdown waits for ingest tasks to report their stream closed.
const INGEST_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// A receiver output stream handed to the broadcaster.
pub type LogSource = Box<dyn AsyncRead + Send + Unpin>;

/// Which receiver stream a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamLabel {
    Stdout,
    Stderr,
}

impl StreamLabel {
    /// Prefix placed before every line from this stream.
    pub fn tag(&self) -> &'static str {
        match self {
            StreamLabel::Stdout => "[stdout]",
            StreamLabel::Stderr => "[stderr]",
        }
    }

    fn name(&self) -> &'static str {
        match self {
            StreamLabel::Stdout => "stdout",
            StreamLabel::Stderr => "stderr",
        }
    }
}

impl fmt::Display for StreamLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Formats one line as a server-sent-event frame.
pub fn sse_frame(line: &str) -> String {
    format!("data: {line}\n\n")
}

/// History and subscribers, guarded together by the broadcaster lock.
struct LogState {
    history: VecDeque<String>,
    subscribers: SubscriberRegistry<String>,
}

impl LogState {
    fn push(&mut self, line: String) -> FanOut {
        if self.history.len() >= HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(line.clone());
        self.subscribers.fan_out(&line, OverflowPolicy::Evict)
    }
}

impl Detach for Mutex<LogState> {
    fn detach(&self, id: SubscriberId) -> bool {
        lock(self).subscribers.remove(id)
    }
}

/// Distributes receiver log lines with replay-on-connect.
pub struct LogBroadcaster {
    state: Arc<Mutex<LogState>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl LogBroadcaster {
    /// Creates a broadcaster whose history already records the start time.
    pub fn new() -> Self {
        let broadcaster = Self {
            state: Arc::new(Mutex::new(LogState {
                history: VecDeque::with_capacity(HISTORY_CAPACITY),
                subscribers: SubscriberRegistry::new(),
            })),
            tasks: Mutex::new(Vec::new()),
        };
        broadcaster.broadcast(format!(
            "[system] receiver process starting at {}",
            Local::now().to_rfc3339_opts(SecondsFormat::Secs, true)
        ));
        broadcaster
    }

    /// Spawns one ingest task per present stream.
    ///
    /// A missing stream produces a warning line, not an error.
    pub fn start(&self, stdout: Option<LogSource>, stderr: Option<LogSource>) {
        self.broadcast("[system] Starting log broadcaster");

        let mut tasks = lock(&self.tasks);
        for (label, source) in [(StreamLabel::Stdout, stdout), (StreamLabel::Stderr, stderr)] {
            match source {
                Some(source) => {
                    tasks.push(tokio::spawn(ingest(Arc::clone(&self.state), source, label)));
                }
                None => {
                    let msg = format!(
                        "[system] Warning: no {label} stream, skipping {label} log streaming"
                    );
                    warn!(stream = %label, "Receiver stream missing, not streaming it");
                    self.broadcast(msg);
                }
            }
        }
    }

    /// Appends a line to history and offers it to every subscriber.
    pub fn broadcast(&self, line: impl Into<String>) -> FanOut {
        broadcast_line(&self.state, line.into())
    }

    /// Snapshots the history and registers a live queue in one critical
    /// section, so every line lands in exactly one of the two.
    pub fn subscribe_with_replay(&self) -> (Vec<String>, Subscription<String>) {
        let (replay, id, rx) = {
            let mut state = lock(&self.state);
            let replay: Vec<String> = state.history.iter().cloned().collect();
            let (id, rx) = state.subscribers.register();
            (replay, id, rx)
        };
        debug!(subscriber = %id, replay = replay.len(), "Log subscriber attached");
        (replay, Subscription::new(id, rx, self.state.clone()))
    }

    pub fn history(&self) -> Vec<String> {
        lock(&self.state).history.iter().cloned().collect()
    }

    pub fn history_len(&self) -> usize {
        lock(&self.state).history.len()
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.state).subscribers.len()
    }

    /// Streams history then live lines to `sink` as SSE frames.
    ///
    /// Ends on `cancel`, a write failure, or when the broadcaster closes
    /// the queue (eviction or shutdown). Always unsubscribes.
    pub async fn serve<W>(&self, sink: &mut W, cancel: CancellationToken) -> io::Result<StreamEnd>
    where
        W: AsyncWrite + Unpin,
    {
        let (replay, mut subscription) = self.subscribe_with_replay();

        for line in &replay {
            sink.write_all(sse_frame(line).as_bytes()).await?;
        }
        sink.flush().await?;

        let end = loop {
            match subscription.next(&cancel).await {
                Next::Item(line) => {
                    sink.write_all(sse_frame(&line).as_bytes()).await?;
                    sink.flush().await?;
                }
                Next::Cancelled => break StreamEnd::Cancelled,
                Next::Closed => break StreamEnd::Closed,
            }
        };

        subscription.unsubscribe();
        debug!(subscriber = %subscription.id(), end = ?end, "Log stream finished");
        Ok(end)
    }

    /// Lets ingest tasks record their closing notices, then closes every
    /// subscriber queue. Tasks still blocked after a short grace period
    /// are aborted. Safe to call more than once.
    pub async fn shutdown(&self) {
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *lock(&self.tasks));
        let deadline = Instant::now() + INGEST_DRAIN_TIMEOUT;

        for mut task in tasks {
            if timeout_at(deadline, &mut task).await.is_err() {
                debug!("Log ingest task still blocked, aborting");
                task.abort();
            }
        }

        let closed = lock(&self.state).subscribers.close_all();
        if closed > 0 {
            debug!(closed, "Closed log subscribers");
        }
    }
}

impl Default for LogBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

fn broadcast_line(state: &Mutex<LogState>, line: String) -> FanOut {
    debug!(target: "rxcastd::receiver", "{line}");
    let report = lock(state).push(line);
    if report.evicted > 0 {
        debug!(evicted = report.evicted, "Evicted slow log subscribers");
    }
    report
}

async fn ingest(state: Arc<Mutex<LogState>>, source: LogSource, label: StreamLabel) {
    let tag = label.tag();
    broadcast_line(&state, format!("[system] Starting to read from {tag} stream"));

    let mut reader = BufReader::new(source);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let limit = MAX_LINE_BYTES as u64 + 1;
        match (&mut reader).take(limit).read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(n) if n > MAX_LINE_BYTES && buf.last() != Some(&b'\n') => {
                warn!(stream = %label, limit = MAX_LINE_BYTES, "Receiver line too long, ingest stopped");
                let msg =
                    format!("[system] Error reading {tag} stream: line longer than {MAX_LINE_BYTES} bytes");
                broadcast_line(&state, msg);
                break;
            }
            Ok(_) => {
                let text = String::from_utf8_lossy(&buf);
                let text = text.trim_end_matches('\n').trim_end_matches('\r');
                broadcast_line(&state, format!("{tag} {text}"));
            }
            Err(e) => {
                warn!(stream = %label, error = %e, "Error reading receiver stream");
                broadcast_line(&state, format!("[system] Error reading {tag} stream: {e}"));
                break;
            }
        }
    }

    broadcast_line(&state, format!("[system] {tag} stream closed"));
}
