//! End-to-end tests: `DaemonClient` against a real in-process daemon.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rxcast_client::{ClientError, DaemonClient, ReceiverStatus};
use rxcast_core::{AudioFormat, TrunkSystem};
use rxcast_protocol::StreamKind;
use rxcastd::server::DaemonServer;
use rxcastd::supervisor::{LaunchSpec, Supervisor, SupervisorConfig};
use tempfile::TempDir;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(5);

struct Daemon {
    socket_path: PathBuf,
    supervisor: Arc<Supervisor>,
    cancel: CancellationToken,
    _dir: TempDir,
}

impl Daemon {
    async fn spawn(script: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("rxcast.sock");
        let supervisor = Arc::new(Supervisor::new(SupervisorConfig {
            launch: LaunchSpec {
                program: "sh".to_string(),
                base_args: vec!["-c".to_string()],
                working_dir: None,
            },
            default_args: vec![script.to_string()],
            audio_address: (Ipv4Addr::LOCALHOST, 0).into(),
            audio_format: AudioFormat::default(),
        }));
        let cancel = CancellationToken::new();

        let server = DaemonServer::new(
            socket_path.clone(),
            Arc::clone(&supervisor),
            dir.path().join("trunk.tsv"),
            cancel.clone(),
        );
        tokio::spawn(async move {
            let _ = server.run().await;
        });

        let start = Instant::now();
        while !socket_path.exists() && start.elapsed() < WAIT {
            sleep(Duration::from_millis(10)).await;
        }

        Self {
            socket_path,
            supervisor,
            cancel,
            _dir: dir,
        }
    }

    async fn client(&self) -> DaemonClient {
        DaemonClient::connect(&self.socket_path).await.unwrap()
    }

    async fn shutdown(self) {
        self.supervisor.stop().await;
        self.cancel.cancel();
    }
}

#[tokio::test]
async fn test_control_roundtrip() {
    let daemon = Daemon::spawn("sleep 30").await;
    let mut client = daemon.client().await;

    assert!(client.ping(3).await.is_ok());
    assert!(!client.stop().await.unwrap());

    client.start(None).await.unwrap();
    assert_eq!(
        client.status().await.unwrap(),
        ReceiverStatus {
            running: true,
            args: vec!["sleep 30".to_string()],
        }
    );

    assert!(client.stop().await.unwrap());
    assert!(!client.status().await.unwrap().running);

    client.disconnect().await.unwrap();
    daemon.shutdown().await;
}

#[tokio::test]
async fn test_trunk_roundtrip() {
    let daemon = Daemon::spawn("sleep 30").await;
    let mut client = daemon.client().await;

    let system = TrunkSystem {
        sysname: "Metro".to_string(),
        control_channel: "852.2625,853.1125".to_string(),
    };
    client.write_trunk(&system).await.unwrap();
    assert_eq!(client.read_trunk().await.unwrap(), system);

    daemon.shutdown().await;
}

#[tokio::test]
async fn test_log_stream_until_receiver_stops() {
    let daemon = Daemon::spawn("echo hello; sleep 30").await;
    let mut control = daemon.client().await;

    // Nothing to stream yet
    let err = daemon
        .client()
        .await
        .stream(StreamKind::Logs, &mut Vec::new(), CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Unavailable { .. }));

    control.start(None).await.unwrap();
    let logs = daemon.supervisor.logs().await.unwrap();
    let start = Instant::now();
    while !logs.history().iter().any(|l| l == "[stdout] hello") && start.elapsed() < WAIT {
        sleep(Duration::from_millis(10)).await;
    }

    let viewer = daemon.client().await;
    let task = tokio::spawn(async move {
        let mut sink = Vec::new();
        let copied = viewer
            .stream(StreamKind::Logs, &mut sink, CancellationToken::new())
            .await
            .unwrap();
        (copied, sink)
    });

    sleep(Duration::from_millis(100)).await;
    assert!(control.stop().await.unwrap());

    let (copied, sink) = timeout(WAIT, task).await.unwrap().unwrap();
    let text = String::from_utf8(sink).unwrap();
    assert_eq!(copied as usize, text.len());
    assert!(text.contains("data: [stdout] hello\n\n"), "got: {text}");

    daemon.shutdown().await;
}

#[tokio::test]
async fn test_audio_stream_cancel() {
    let daemon = Daemon::spawn("sleep 30").await;
    let mut control = daemon.client().await;
    control.start(None).await.unwrap();

    let cancel = CancellationToken::new();
    let viewer = daemon.client().await;
    let stream_cancel = cancel.clone();
    let task = tokio::spawn(async move {
        let mut sink = Vec::new();
        viewer
            .stream(StreamKind::Audio, &mut sink, stream_cancel)
            .await
            .unwrap();
    });

    sleep(Duration::from_millis(100)).await;
    cancel.cancel();
    timeout(WAIT, task).await.unwrap().unwrap();

    // The daemon notices the hang-up and drops the subscriber
    let audio = daemon.supervisor.audio().await.unwrap();
    let start = Instant::now();
    while audio.subscriber_count() > 0 && start.elapsed() < WAIT {
        sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(audio.subscriber_count(), 0);

    daemon.shutdown().await;
}
