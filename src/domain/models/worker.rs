//! Worker domain model — a supervised subprocess agent.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a worker. Monotone through the transitions documented
/// in the supervisor: `starting -> {ready|stopped}`, `ready <-> working`,
/// `any -> stopping -> stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Starting,
    Ready,
    Working,
    Stopping,
    Stopped,
}

impl WorkerState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Working => "working",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        }
    }
}

impl std::str::FromStr for WorkerState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "starting" => Ok(Self::Starting),
            "ready" => Ok(Self::Ready),
            "working" => Ok(Self::Working),
            "stopping" => Ok(Self::Stopping),
            "stopped" => Ok(Self::Stopped),
            other => Err(format!("unknown worker state: {other}")),
        }
    }
}

/// Health axis, independent of `state`. A missed heartbeat flips this to
/// `Unhealthy` without changing `state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerHealth {
    Healthy,
    Unhealthy,
    Unknown,
}

impl WorkerHealth {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Unhealthy => "unhealthy",
            Self::Unknown => "unknown",
        }
    }
}

impl std::str::FromStr for WorkerHealth {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "healthy" => Ok(Self::Healthy),
            "unhealthy" => Ok(Self::Unhealthy),
            "unknown" => Ok(Self::Unknown),
            other => Err(format!("unknown worker health: {other}")),
        }
    }
}

/// How a worker's child process is supervised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpawnMode {
    /// A direct child process owned and signalled by this server.
    Process,
    /// A child running inside a tmux pane; signalling targets the pane.
    Tmux,
    /// Not managed as a child process at all; output is injected externally.
    External,
}

impl Default for SpawnMode {
    fn default() -> Self {
        Self::Process
    }
}

impl SpawnMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Process => "process",
            Self::Tmux => "tmux",
            Self::External => "external",
        }
    }
}

impl std::str::FromStr for SpawnMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "process" => Ok(Self::Process),
            "tmux" => Ok(Self::Tmux),
            "external" => Ok(Self::External),
            other => Err(format!("unknown spawn mode: {other}")),
        }
    }
}

/// Bounded ring buffer of the worker's most recent output lines.
///
/// A worker owns exactly one of these; every append emits `worker.output`
/// on the event bus (handled by the supervisor, not by this type).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputBuffer {
    lines: VecDeque<String>,
    capacity: usize,
}

impl OutputBuffer {
    pub fn new(capacity: usize) -> Self {
        Self { lines: VecDeque::with_capacity(capacity.min(256)), capacity }
    }

    /// Appends a line, evicting the oldest if the buffer is at capacity.
    pub fn push(&mut self, line: String) {
        if self.lines.len() >= self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }

    pub fn tail(&self, n: usize) -> Vec<String> {
        let skip = self.lines.len().saturating_sub(n);
        self.lines.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// A supervised worker: one subprocess agent within a swarm.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub id: Uuid,
    /// User-visible unique string, `^[A-Za-z0-9_-]{1,50}$`. Unique among
    /// non-stopped workers.
    pub handle: String,
    pub team_name: Option<String>,
    pub swarm_id: Option<Uuid>,
    /// Depth in the spawning hierarchy; the root request is 0.
    pub depth_level: u32,
    pub state: WorkerState,
    pub health: WorkerHealth,
    pub spawn_mode: SpawnMode,
    pub working_dir: String,
    pub session_id: Uuid,
    pub current_task_id: Option<Uuid>,
    pub restart_count: u32,
    pub spawned_at: DateTime<Utc>,
    #[serde(skip)]
    pub recent_output: OutputBuffer,
}

/// Default capacity for a worker's output ring buffer.
pub const DEFAULT_OUTPUT_BUFFER_LINES: usize = 4096;

/// Default automatic-restart budget: restarts allowed per rolling hour
/// before a crashed worker is left `stopped` and surfaced as an error.
pub const DEFAULT_RESTART_CAP_PER_HOUR: u32 = 3;

impl Worker {
    pub fn new(
        handle: impl Into<String>,
        team_name: Option<String>,
        swarm_id: Option<Uuid>,
        depth_level: u32,
        spawn_mode: SpawnMode,
        working_dir: impl Into<String>,
        output_buffer_lines: usize,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            handle: handle.into(),
            team_name,
            swarm_id,
            depth_level,
            state: WorkerState::Starting,
            health: WorkerHealth::Unknown,
            spawn_mode,
            working_dir: working_dir.into(),
            session_id: Uuid::new_v4(),
            current_task_id: None,
            restart_count: 0,
            spawned_at: Utc::now(),
            recent_output: OutputBuffer::new(output_buffer_lines),
        }
    }

    pub fn is_non_stopped(&self) -> bool {
        !self.state.is_terminal()
    }

    /// Validates the handle/team-name shape required by the HTTP surface
    /// (`^[A-Za-z0-9_-]{1,50}$`).
    pub fn validate_handle(handle: &str) -> bool {
        !handle.is_empty()
            && handle.len() <= 50
            && handle.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_buffer_evicts_oldest() {
        let mut buf = OutputBuffer::new(3);
        buf.push("a".into());
        buf.push("b".into());
        buf.push("c".into());
        buf.push("d".into());
        assert_eq!(buf.snapshot(), vec!["b", "c", "d"]);
    }

    #[test]
    fn output_buffer_tail() {
        let mut buf = OutputBuffer::new(10);
        for i in 0..5 {
            buf.push(format!("line{i}"));
        }
        assert_eq!(buf.tail(2), vec!["line3", "line4"]);
    }

    #[test]
    fn validate_handle_rules() {
        assert!(Worker::validate_handle("agent-01_A"));
        assert!(!Worker::validate_handle(""));
        assert!(!Worker::validate_handle("has space"));
        assert!(!Worker::validate_handle(&"x".repeat(51)));
    }

    #[test]
    fn worker_starts_in_starting_state_unknown_health() {
        let w = Worker::new("h1", None, None, 0, SpawnMode::Process, "/tmp", 10);
        assert_eq!(w.state, WorkerState::Starting);
        assert_eq!(w.health, WorkerHealth::Unknown);
        assert!(w.is_non_stopped());
    }
}
