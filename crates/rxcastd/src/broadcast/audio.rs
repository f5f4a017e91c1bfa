//! Audio fan-out: UDP PCM datagrams to streaming WAV consumers.
//!
//! The receiver sends raw S16_LE PCM to a loopback UDP socket. One ingest
//! task reads at most 100 ms of audio per datagram, trims any odd trailing
//! byte, and offers the chunk to every subscriber. A subscriber whose queue
//! is full simply misses that chunk (drop-newest): earlier queued audio is
//! kept and playback continues with a gap.

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use rxcast_core::{align_to_samples, AudioFormat};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::subscriber::{lock, FanOut, Next, OverflowPolicy, SubscriberRegistry, Subscription};
use super::StreamEnd;

/// Receive buffer requested from the kernel, enough for several seconds
/// of 8 kHz audio so scheduling hiccups don't overflow the socket.
pub const RECEIVE_BUFFER_BYTES: usize = 65_536 * 10;

type SharedRegistry = Arc<Mutex<SubscriberRegistry<Bytes>>>;

/// Errors from the audio transport.
#[derive(Debug, thiserror::Error)]
pub enum BroadcastError {
    #[error("Failed to bind audio socket {address}: {source}")]
    Bind {
        address: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("Audio broadcaster already started")]
    AlreadyStarted,

    #[error("Audio broadcaster has been shut down")]
    ShutDown,
}

/// Distributes PCM datagrams to live WAV streams.
pub struct AudioBroadcaster {
    format: AudioFormat,
    subscribers: SharedRegistry,
    shutdown: CancellationToken,
    ingest: Mutex<Option<JoinHandle<()>>>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl AudioBroadcaster {
    pub fn new(format: AudioFormat) -> Self {
        Self {
            format,
            subscribers: Arc::new(Mutex::new(SubscriberRegistry::new())),
            shutdown: CancellationToken::new(),
            ingest: Mutex::new(None),
            local_addr: Mutex::new(None),
        }
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// Address the ingest socket is bound to, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *lock(&self.local_addr)
    }

    /// Binds the UDP socket and spawns the ingest loop.
    ///
    /// Must be called from within a tokio runtime. Returns the bound
    /// address (useful when `address` asks for an ephemeral port).
    pub fn start(&self, address: SocketAddr) -> Result<SocketAddr, BroadcastError> {
        if self.shutdown.is_cancelled() {
            return Err(BroadcastError::ShutDown);
        }

        let mut ingest = lock(&self.ingest);
        if ingest.is_some() {
            return Err(BroadcastError::AlreadyStarted);
        }

        let socket = bind_socket(address).map_err(|source| BroadcastError::Bind { address, source })?;
        let bound = socket
            .local_addr()
            .map_err(|source| BroadcastError::Bind { address, source })?;
        *lock(&self.local_addr) = Some(bound);

        info!(
            address = %bound,
            sample_rate = self.format.sample_rate,
            channels = self.format.channels,
            "Audio broadcaster started (PCM S16_LE)"
        );

        *ingest = Some(tokio::spawn(ingest_loop(
            socket,
            self.format.frame_bytes(),
            Arc::clone(&self.subscribers),
            self.shutdown.clone(),
        )));

        Ok(bound)
    }

    /// Offers a chunk to every subscriber; full queues skip it.
    pub fn broadcast(&self, data: Bytes) -> FanOut {
        fan_out(&self.subscribers, data)
    }

    /// Registers a new consumer queue.
    pub fn subscribe(&self) -> Subscription<Bytes> {
        let (id, rx) = lock(&self.subscribers).register();
        debug!(subscriber = %id, "Audio subscriber attached");
        Subscription::new(id, rx, self.subscribers.clone())
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.subscribers).len()
    }

    /// Streams WAV to `sink` until `cancel` fires, a write fails, or the
    /// broadcaster closes the queue.
    ///
    /// The header declares an unknown length. The subscription is released
    /// on every exit path.
    pub async fn serve<W>(&self, sink: &mut W, cancel: CancellationToken) -> io::Result<StreamEnd>
    where
        W: AsyncWrite + Unpin,
    {
        sink.write_all(&self.format.wav_header()).await?;
        sink.flush().await?;

        let mut subscription = self.subscribe();
        let end = loop {
            match subscription.next(&cancel).await {
                Next::Item(chunk) => {
                    sink.write_all(&chunk).await?;
                    sink.flush().await?;
                }
                Next::Cancelled => break StreamEnd::Cancelled,
                Next::Closed => break StreamEnd::Closed,
            }
        };

        subscription.unsubscribe();
        debug!(subscriber = %subscription.id(), end = ?end, "Audio stream finished");
        Ok(end)
    }

    /// Stops ingest, releases the socket, and closes every subscriber queue.
    ///
    /// Waits for the ingest task so the address can be rebound right away.
    /// Safe to call more than once.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        let handle = lock(&self.ingest).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Audio ingest task ended abnormally");
            }
        }

        let closed = lock(&self.subscribers).close_all();
        if closed > 0 {
            debug!(closed, "Closed audio subscribers");
        }
    }
}

fn fan_out(subscribers: &Mutex<SubscriberRegistry<Bytes>>, data: Bytes) -> FanOut {
    lock(subscribers).fan_out(&data, OverflowPolicy::DropNewest)
}

async fn ingest_loop(
    socket: UdpSocket,
    frame_bytes: usize,
    subscribers: SharedRegistry,
    shutdown: CancellationToken,
) {
    let mut buf = vec![0u8; frame_bytes.max(2)];

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                debug!("Audio ingest stopping");
                break;
            }
            result = socket.recv_from(&mut buf) => {
                match result {
                    Ok((n, _peer)) => {
                        let data = align_to_samples(buf.get(..n).unwrap_or_default());
                        if data.is_empty() {
                            continue;
                        }
                        fan_out(&subscribers, Bytes::copy_from_slice(data));
                    }
                    Err(e) => {
                        warn!(error = %e, "Audio socket read failed, ingest stopped");
                        break;
                    }
                }
            }
        }
    }
    // socket dropped here
}

fn bind_socket(address: SocketAddr) -> io::Result<UdpSocket> {
    let socket = std::net::UdpSocket::bind(address)?;
    if let Err(e) = set_receive_buffer(&socket, RECEIVE_BUFFER_BYTES) {
        warn!(error = %e, requested = RECEIVE_BUFFER_BYTES, "Could not enlarge audio receive buffer");
    }
    socket.set_nonblocking(true)?;
    UdpSocket::from_std(socket)
}

#[cfg(unix)]
fn set_receive_buffer(socket: &std::net::UdpSocket, bytes: usize) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let size = libc::c_int::try_from(bytes).unwrap_or(libc::c_int::MAX);
    // SAFETY: fd is a live socket owned by `socket`; the option value points
    // at a c_int that outlives the call and its length is passed alongside.
    let result = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_RCVBUF,
            (&size as *const libc::c_int).cast::<libc::c_void>(),
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if result == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn set_receive_buffer(_socket: &std::net::UdpSocket, _bytes: usize) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn loopback() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 0))
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_subscriber() {
        let audio = AudioBroadcaster::new(AudioFormat::DEFAULT);
        let mut a = audio.subscribe();
        let mut b = audio.subscribe();

        let report = audio.broadcast(Bytes::from_static(&[1, 2, 3, 4]));
        assert_eq!(report.delivered, 2);

        assert_eq!(a.recv().await.unwrap(), Bytes::from_static(&[1, 2, 3, 4]));
        assert_eq!(b.recv().await.unwrap(), Bytes::from_static(&[1, 2, 3, 4]));
    }

    #[tokio::test]
    async fn test_overflow_keeps_first_hundred() {
        let audio = AudioBroadcaster::new(AudioFormat::DEFAULT);
        let mut sub = audio.subscribe();

        for i in 0..150u16 {
            audio.broadcast(Bytes::copy_from_slice(&i.to_le_bytes()));
        }
        assert_eq!(audio.subscriber_count(), 1);

        let mut seen = Vec::new();
        while let Some(chunk) = sub.try_recv() {
            seen.push(u16::from_le_bytes([chunk[0], chunk[1]]));
        }
        assert_eq!(seen, (0..100).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_udp_ingest_trims_odd_bytes() {
        let audio = AudioBroadcaster::new(AudioFormat::DEFAULT);
        let addr = audio.start(loopback()).unwrap();
        let mut sub = audio.subscribe();

        let sender = std::net::UdpSocket::bind(loopback()).unwrap();
        sender.send_to(&[1, 2, 3], addr).unwrap();
        sender.send_to(&[7], addr).unwrap(); // trims to nothing, ignored
        sender.send_to(&[4, 5, 6, 7], addr).unwrap();

        let first = timeout(Duration::from_secs(2), sub.recv()).await.unwrap().unwrap();
        let second = timeout(Duration::from_secs(2), sub.recv()).await.unwrap().unwrap();
        assert_eq!(&first[..], &[1, 2]);
        assert_eq!(&second[..], &[4, 5, 6, 7]);

        audio.shutdown().await;
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let audio = AudioBroadcaster::new(AudioFormat::DEFAULT);
        audio.start(loopback()).unwrap();
        assert!(matches!(
            audio.start(loopback()),
            Err(BroadcastError::AlreadyStarted)
        ));
        audio.shutdown().await;
    }

    #[tokio::test]
    async fn test_bind_conflict_is_transport_error() {
        let holder = std::net::UdpSocket::bind(loopback()).unwrap();
        let taken = holder.local_addr().unwrap();

        let audio = AudioBroadcaster::new(AudioFormat::DEFAULT);
        assert!(matches!(
            audio.start(taken),
            Err(BroadcastError::Bind { .. })
        ));
    }

    #[tokio::test]
    async fn test_shutdown_twice_and_rebind() {
        let audio = AudioBroadcaster::new(AudioFormat::DEFAULT);
        let addr = audio.start(loopback()).unwrap();
        let mut sub = audio.subscribe();

        audio.shutdown().await;
        audio.shutdown().await;

        assert_eq!(sub.recv().await, None);
        assert_eq!(audio.subscriber_count(), 0);
        assert!(matches!(audio.start(loopback()), Err(BroadcastError::ShutDown)));

        // The socket is released, a new generation can bind the same port
        let next = AudioBroadcaster::new(AudioFormat::DEFAULT);
        assert_eq!(next.start(addr).unwrap(), addr);
        next.shutdown().await;
    }

    #[tokio::test]
    async fn test_serve_writes_header_then_audio() {
        let audio = Arc::new(AudioBroadcaster::new(AudioFormat::DEFAULT));
        let (mut client, mut server) = tokio::io::duplex(64 * 1024);
        let cancel = CancellationToken::new();

        let serving = {
            let audio = Arc::clone(&audio);
            let cancel = cancel.clone();
            tokio::spawn(async move { audio.serve(&mut server, cancel).await })
        };

        let mut header = [0u8; rxcast_core::WAV_HEADER_LEN];
        tokio::io::AsyncReadExt::read_exact(&mut client, &mut header)
            .await
            .unwrap();
        assert_eq!(&header[0..4], b"RIFF");

        // Wait until serve has registered its subscription
        while audio.subscriber_count() == 0 {
            tokio::task::yield_now().await;
        }
        audio.broadcast(Bytes::from_static(&[9, 8]));

        let mut body = [0u8; 2];
        tokio::io::AsyncReadExt::read_exact(&mut client, &mut body)
            .await
            .unwrap();
        assert_eq!(body, [9, 8]);

        cancel.cancel();
        let end = serving.await.unwrap().unwrap();
        assert_eq!(end, StreamEnd::Cancelled);
        assert_eq!(audio.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_serve_stops_on_write_failure() {
        let audio = Arc::new(AudioBroadcaster::new(AudioFormat::DEFAULT));
        let (client, mut server) = tokio::io::duplex(1024);
        drop(client);

        let result = audio.serve(&mut server, CancellationToken::new()).await;
        assert!(result.is_err());
        assert_eq!(audio.subscriber_count(), 0);
    }
}
