//! The supervised receiver process.
//!
//! The receiver is spawned as the leader of a new process group so that
//! teardown can signal it together with anything it forked (decoders,
//! helper scripts). Stdout and stderr are piped and handed out exactly
//! once, at spawn time.

use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::SupervisorError;

/// How long to wait for the group leader to exit after SIGKILL before
/// falling back to killing the leader directly.
const REAP_TIMEOUT: Duration = Duration::from_secs(5);

/// Launch parameters for the receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: String,
    pub base_args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

impl LaunchSpec {
    /// Full argument vector for one start: base arguments then `args`.
    pub fn argv(&self, args: &[String]) -> Vec<String> {
        self.base_args.iter().chain(args).cloned().collect()
    }
}

/// A running receiver. Owned exclusively by the supervisor.
#[derive(Debug)]
pub struct ReceiverProcess {
    child: Child,
    pid: u32,
    pgid: i32,
    args: Vec<String>,
}

/// Output streams taken from a freshly spawned receiver.
#[derive(Debug)]
pub struct ReceiverOutput {
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
}

impl ReceiverProcess {
    /// Spawns the receiver in its own process group with piped output.
    pub fn spawn(
        spec: &LaunchSpec,
        args: Vec<String>,
    ) -> Result<(Self, ReceiverOutput), SupervisorError> {
        let argv = spec.argv(&args);

        let mut command = Command::new(&spec.program);
        command
            .args(&argv)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);
        if let Some(dir) = &spec.working_dir {
            command.current_dir(dir);
        }

        info!(program = %spec.program, args = ?argv, "Starting receiver");

        let mut child = command.spawn().map_err(|e| SupervisorError::Spawn {
            program: spec.program.clone(),
            reason: e.to_string(),
        })?;

        let Some(pid) = child.id() else {
            return Err(SupervisorError::Spawn {
                program: spec.program.clone(),
                reason: "process exited before its pid could be read".to_string(),
            });
        };

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let process = Self {
            child,
            pid,
            pgid: i32::try_from(pid).unwrap_or(i32::MAX),
            args,
        };

        match (stdout, stderr) {
            (Some(stdout), Some(stderr)) => {
                info!(pid, "Receiver started");
                Ok((process, ReceiverOutput { stdout, stderr }))
            }
            (stdout, _) => {
                let stream = if stdout.is_none() { "stdout" } else { "stderr" };
                // Dropping the handle kills the leader; the group goes first.
                let _ = kill_group(process.pgid);
                Err(SupervisorError::MissingStream {
                    stream: stream.to_string(),
                })
            }
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn pgid(&self) -> i32 {
        self.pgid
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Kills the whole process group and reaps the leader.
    ///
    /// Never fails: a group that is already gone is fine.
    pub async fn terminate(mut self) -> Option<ExitStatus> {
        info!(pid = self.pid, pgid = self.pgid, "Terminating receiver process group");

        match kill_group(self.pgid) {
            Ok(()) => {}
            Err(e) if e.raw_os_error() == Some(libc::ESRCH) => {
                debug!(pgid = self.pgid, "Receiver group already gone");
            }
            Err(e) => warn!(pgid = self.pgid, error = %e, "Failed to signal receiver group"),
        }

        let status = match timeout(REAP_TIMEOUT, self.child.wait()).await {
            Ok(result) => result,
            Err(_) => {
                warn!(pid = self.pid, "Receiver ignored group kill, killing leader");
                if let Err(e) = self.child.start_kill() {
                    debug!(error = %e, "Leader kill failed");
                }
                self.child.wait().await
            }
        };

        match status {
            Ok(status) => {
                info!(pid = self.pid, %status, "Receiver process terminated");
                Some(status)
            }
            Err(e) => {
                warn!(pid = self.pid, error = %e, "Failed to reap receiver");
                None
            }
        }
    }
}

#[cfg(unix)]
fn kill_group(pgid: i32) -> io::Result<()> {
    if pgid <= 1 {
        return Err(io::Error::from_raw_os_error(libc::EINVAL));
    }
    // SAFETY: killpg has no memory-safety preconditions.
    let result = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if result == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn kill_group(_pgid: i32) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "process groups are only supported on Unix",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> (LaunchSpec, Vec<String>) {
        (
            LaunchSpec {
                program: "sh".to_string(),
                base_args: vec!["-c".to_string()],
                working_dir: None,
            },
            vec![script.to_string()],
        )
    }

    #[test]
    fn test_argv_prepends_base_args() {
        let spec = LaunchSpec {
            program: "nice".to_string(),
            base_args: vec!["-n".into(), "-15".into(), "python3".into(), "rx.py".into()],
            working_dir: None,
        };
        assert_eq!(
            spec.argv(&["-v".to_string(), "9".to_string()]),
            vec!["-n", "-15", "python3", "rx.py", "-v", "9"]
        );
    }

    #[tokio::test]
    async fn test_spawn_missing_program() {
        let spec = LaunchSpec {
            program: "/nonexistent/receiver".to_string(),
            base_args: vec![],
            working_dir: None,
        };
        let err = ReceiverProcess::spawn(&spec, vec![]).unwrap_err();
        assert!(matches!(err, SupervisorError::Spawn { .. }));
        assert!(err.to_string().contains("/nonexistent/receiver"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawn_leads_own_group() {
        let (spec, args) = sh("sleep 30");
        let (process, _output) = ReceiverProcess::spawn(&spec, args).unwrap();

        // SAFETY: getpgid only reads process state.
        let pgid = unsafe { libc::getpgid(process.pid() as libc::pid_t) };
        assert_eq!(pgid, process.pgid());
        assert_ne!(pgid, unsafe { libc::getpgrp() });

        let status = process.terminate().await.expect("reaped");
        assert!(!status.success());
    }

    #[tokio::test]
    async fn test_terminate_after_exit_is_fine() {
        let (spec, args) = sh("exit 0");
        let (process, _output) = ReceiverProcess::spawn(&spec, args).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(process.terminate().await.is_some());
    }
}
