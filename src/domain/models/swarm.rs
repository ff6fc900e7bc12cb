//! Swarm domain model — a logical grouping of workers sharing a blackboard.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Swarm {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub max_agents: u32,
    pub created_at: DateTime<Utc>,
    pub killed_at: Option<DateTime<Utc>>,
}

impl Swarm {
    pub fn new(name: impl Into<String>, description: Option<String>, max_agents: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description,
            max_agents,
            created_at: Utc::now(),
            killed_at: None,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.killed_at.is_none()
    }

    /// Validates the `^[A-Za-z0-9_-]{1,100}$` shape used for swarm ids in
    /// path parameters (the HTTP surface's swarm *name*, distinct from the
    /// UUID primary key).
    pub fn validate_name(name: &str) -> bool {
        !name.is_empty()
            && name.len() <= 100
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_swarm_is_alive() {
        let s = Swarm::new("alpha", None, 10);
        assert!(s.is_alive());
    }

    #[test]
    fn validate_name_rejects_bad_chars() {
        assert!(Swarm::validate_name("alpha-swarm_1"));
        assert!(!Swarm::validate_name("alpha swarm"));
        assert!(!Swarm::validate_name(""));
    }
}
