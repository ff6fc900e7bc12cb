//! Subprocess lifecycle for `process`-mode workers: spawn, pipe wiring,
//! output line streaming, and graceful-then-hard termination.

use std::process::Stdio;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("failed to spawn child: {0}")]
    SpawnFailed(String),
    #[error("child has no stdin handle")]
    NoStdin,
    #[error("write to child stdin failed: {0}")]
    WriteFailed(String),
    #[error("signal delivery failed: {0}")]
    SignalFailed(String),
}

/// A spawned worker subprocess: owns the child handle and its stdin, and
/// streams stdout/stderr lines to the supervisor over an mpsc channel.
pub struct ChildHandle {
    child: Child,
    stdin: Option<ChildStdin>,
    pub output_rx: mpsc::Receiver<String>,
}

/// Parameters used to build the child command. Deliberately narrow: the
/// supervisor decides working directory and prompt, this module only knows
/// how to run a program and pipe its streams.
pub struct SpawnSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: String,
}

impl ChildHandle {
    /// Spawns the child with piped stdin/stdout/stderr and starts a
    /// background task forwarding merged stdout+stderr lines onto a bounded
    /// channel (capacity mirrors the worker's output buffer; a full channel
    /// means the supervisor fell behind and lines are dropped, not
    /// buffered unboundedly).
    pub fn spawn(spec: &SpawnSpec, output_buffer_lines: usize) -> Result<Self, ProcessError> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .current_dir(&spec.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| ProcessError::SpawnFailed(e.to_string()))?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let (tx, rx) = mpsc::channel(output_buffer_lines.max(1));

        if let Some(stdout) = stdout {
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut reader = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    if tx.send(line).await.is_err() {
                        break;
                    }
                }
            });
        }
        if let Some(stderr) = stderr {
            tokio::spawn(async move {
                let mut reader = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    if tx.send(line).await.is_err() {
                        break;
                    }
                }
            });
        }

        Ok(Self { child, stdin, output_rx: rx })
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Writes a line to the child's stdin, appending a newline.
    pub async fn send_line(&mut self, message: &str) -> Result<(), ProcessError> {
        let stdin = self.stdin.as_mut().ok_or(ProcessError::NoStdin)?;
        stdin.write_all(message.as_bytes()).await.map_err(|e| ProcessError::WriteFailed(e.to_string()))?;
        stdin.write_all(b"\n").await.map_err(|e| ProcessError::WriteFailed(e.to_string()))?;
        Ok(())
    }

    /// SIGTERM, wait up to `graceful_deadline`, then SIGKILL if still alive
    /// and wait up to `hard_kill_deadline`. Returns once the child has
    /// exited or both deadlines have elapsed.
    pub async fn terminate(&mut self, graceful_deadline: Duration, hard_kill_deadline: Duration) -> Result<(), ProcessError> {
        if let Some(pid) = self.pid() {
            signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM).map_err(|e| ProcessError::SignalFailed(e.to_string()))?;
        }

        if timeout(graceful_deadline, self.child.wait()).await.is_ok() {
            return Ok(());
        }

        if let Some(pid) = self.pid() {
            let _ = signal::kill(Pid::from_raw(pid as i32), Signal::SIGKILL);
        }
        let _ = timeout(hard_kill_deadline, self.child.wait()).await;
        Ok(())
    }

    /// Non-blocking liveness probe: `None` while still running.
    pub fn try_exit_code(&mut self) -> Option<i32> {
        self.child.try_wait().ok().flatten().and_then(|status| status.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawn_echo_and_read_output() {
        let spec = SpawnSpec { program: "echo".into(), args: vec!["hello".into()], working_dir: "/tmp".into() };
        let mut handle = ChildHandle::spawn(&spec, 16).expect("spawn");
        let line = handle.output_rx.recv().await.expect("line");
        assert_eq!(line, "hello");
    }

    #[tokio::test]
    async fn terminate_kills_sleep() {
        let spec = SpawnSpec { program: "sleep".into(), args: vec!["30".into()], working_dir: "/tmp".into() };
        let mut handle = ChildHandle::spawn(&spec, 16).expect("spawn");
        handle.terminate(Duration::from_millis(50), Duration::from_millis(50)).await.expect("terminate");
        assert!(handle.try_exit_code().is_some());
    }
}
