//! Runtime configuration shape, merged by `infrastructure::config::loader`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub trigger: TriggerConfig,
    #[serde(default)]
    pub ws: WsConfig,
    #[serde(default)]
    pub event_bus: EventBusConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
            worker: WorkerConfig::default(),
            workflow: WorkflowConfig::default(),
            trigger: TriggerConfig::default(),
            ws: WsConfig::default(),
            event_bus: EventBusConfig::default(),
            auth: AuthConfig::default(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    7337
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    #[serde(default = "default_max_lifetime_ms")]
    pub max_lifetime_ms: u64,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            min_connections: default_min_connections(),
            max_connections: default_max_connections(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
            max_lifetime_ms: default_max_lifetime_ms(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

fn default_db_path() -> String {
    ".fleet/fleet.db".to_string()
}
fn default_min_connections() -> u32 {
    1
}
fn default_max_connections() -> u32 {
    8
}
fn default_acquire_timeout_ms() -> u64 {
    5_000
}
fn default_idle_timeout_ms() -> u64 {
    600_000
}
fn default_max_lifetime_ms() -> u64 {
    1_800_000
}
fn default_busy_timeout_ms() -> u64 {
    5_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
    #[serde(default)]
    pub directory: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), json: false, directory: None }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_output_buffer_lines")]
    pub output_buffer_lines: usize,
    #[serde(default = "default_restart_cap_per_hour")]
    pub restart_cap_per_hour: u32,
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
    /// Global cap on non-stopped workers, independent of any per-swarm
    /// `max_agents` cap (spec §4.2, `spawnWorker`'s `LimitReached`).
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: u32,
    #[serde(default = "default_graceful_shutdown_ms")]
    pub graceful_shutdown_ms: u64,
    #[serde(default = "default_hard_kill_deadline_secs")]
    pub hard_kill_deadline_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            output_buffer_lines: default_output_buffer_lines(),
            restart_cap_per_hour: default_restart_cap_per_hour(),
            max_depth: default_max_depth(),
            max_concurrent: default_max_concurrent(),
            graceful_shutdown_ms: default_graceful_shutdown_ms(),
            hard_kill_deadline_secs: default_hard_kill_deadline_secs(),
        }
    }
}

fn default_output_buffer_lines() -> usize {
    super::worker::DEFAULT_OUTPUT_BUFFER_LINES
}
fn default_restart_cap_per_hour() -> u32 {
    super::worker::DEFAULT_RESTART_CAP_PER_HOUR
}
fn default_max_depth() -> u32 {
    10
}
fn default_max_concurrent() -> u32 {
    64
}
fn default_graceful_shutdown_ms() -> u64 {
    5_000
}
fn default_hard_kill_deadline_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Design default per spec §4.5: an execution with no terminal
    /// transition for this long is declared a deadlock.
    #[serde(default = "default_stuck_timeout_secs")]
    pub stuck_timeout_secs: u64,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self { tick_interval_ms: default_tick_interval_ms(), stuck_timeout_secs: default_stuck_timeout_secs() }
    }
}

fn default_tick_interval_ms() -> u64 {
    500
}
fn default_stuck_timeout_secs() -> u64 {
    1_800
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Consecutive action-failure cap past which a trigger auto-disables
    /// (spec §4.6 design default).
    #[serde(default = "default_consecutive_failure_cap")]
    pub consecutive_failure_cap: u32,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self { poll_interval_secs: default_poll_interval_secs(), consecutive_failure_cap: default_consecutive_failure_cap() }
    }
}

fn default_poll_interval_secs() -> u64 {
    5
}
fn default_consecutive_failure_cap() -> u32 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsConfig {
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self { ping_interval_secs: default_ping_interval_secs(), idle_timeout_secs: default_idle_timeout_secs() }
    }
}

fn default_ping_interval_secs() -> u64 {
    30
}
fn default_idle_timeout_secs() -> u64 {
    90
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBusConfig {
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self { channel_capacity: default_channel_capacity() }
    }
}

fn default_channel_capacity() -> usize {
    256
}

/// Token minting is a thin shell (spec's Non-goals): `POST /auth` and the
/// `/ws` handshake both check against one shared secret rather than a real
/// identity provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_shared_secret")]
    pub shared_secret: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self { shared_secret: default_shared_secret() }
    }
}

fn default_shared_secret() -> String {
    "fleetctl-dev-secret".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.port, 7337);
        assert!(cfg.database.max_connections >= cfg.database.min_connections);
    }
}
