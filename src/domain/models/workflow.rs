//! Workflow definition domain model — an immutable-by-convention DAG of steps.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What kind of work a step performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    /// Waits for an external actor to call `completeStep`.
    Task,
    /// Enqueues a `SpawnQueueItem`; completes when the spawn is fulfilled.
    Spawn,
    /// Creates a `Checkpoint`; optionally waits for acceptance.
    Checkpoint,
    /// Evaluates a boolean condition and routes the DAG; never waits.
    Gate,
    /// Groups sub-steps under an `all`/`any`/`race` completion strategy.
    Parallel,
    /// Evaluates a sandboxed expression and writes it into the context.
    Script,
}

/// What happens to a step when it errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnFailure {
    Fail,
    Skip,
    Retry,
    Continue,
}

impl Default for OnFailure {
    fn default() -> Self {
        Self::Fail
    }
}

/// A guard evaluated in the same sandbox as `script` steps, gating dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Guard {
    pub condition: String,
    #[serde(default)]
    pub variables: serde_json::Value,
}

/// Completion strategy for a `parallel` step's referenced sub-steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParallelStrategy {
    /// Every referenced step must be terminal.
    All,
    /// At least one referenced step completed.
    Any,
    /// First terminal wins; the rest are cancelled.
    Race,
}

/// Type-specific configuration for a step. Stored as opaque JSON and
/// type-checked eagerly by the workflow engine at dispatch time (each
/// consumer declares the schema it expects), per the "dynamic payloads"
/// migration note — this crate does not model each variant as a separate
/// Rust struct because the config shape also carries `{{var}}` templates
/// substituted at dispatch time, before the concrete schema applies.
pub type StepConfig = serde_json::Value;

/// A single step definition within a workflow. `key` is unique within the
/// workflow and matches `^[A-Za-z0-9_-]+$`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    pub key: String,
    pub name: String,
    #[serde(rename = "type")]
    pub step_type: StepType,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub config: StepConfig,
    pub guard: Option<Guard>,
    #[serde(default)]
    pub on_failure: OnFailure,
    #[serde(default)]
    pub max_retries: u32,
    pub timeout_ms: Option<u64>,
}

impl StepDefinition {
    pub fn validate_key(key: &str) -> bool {
        !key.is_empty() && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    }
}

/// Immutable-by-convention DAG definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: Uuid,
    pub name: String,
    pub steps: Vec<StepDefinition>,
    #[serde(default)]
    pub inputs: Vec<WorkflowInput>,
    #[serde(default)]
    pub outputs: Vec<String>,
    pub timeout_ms: Option<u64>,
    pub on_complete: Option<String>,
    pub on_failure: Option<String>,
}

/// Declared input to a workflow, used by `startWorkflow` to validate
/// required inputs before materialising an execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowInput {
    pub name: String,
    #[serde(default)]
    pub required: bool,
    pub default: Option<serde_json::Value>,
}

/// Errors raised while validating a workflow definition at creation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowValidationError {
    DuplicateStepKey(String),
    InvalidStepKey(String),
    UnknownDependency { step: String, depends_on: String },
    SelfDependency(String),
}

impl std::fmt::Display for WorkflowValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateStepKey(k) => write!(f, "duplicate step key: {k}"),
            Self::InvalidStepKey(k) => write!(f, "invalid step key: {k}"),
            Self::UnknownDependency { step, depends_on } => {
                write!(f, "step {step} depends on unknown step {depends_on}")
            }
            Self::SelfDependency(k) => write!(f, "step {k} depends on itself"),
        }
    }
}

impl Workflow {
    pub fn new(name: impl Into<String>, steps: Vec<StepDefinition>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            steps,
            inputs: Vec::new(),
            outputs: Vec::new(),
            timeout_ms: None,
            on_complete: None,
            on_failure: None,
        }
    }

    /// Rejects duplicate step keys, malformed keys, and dependencies on
    /// unknown or self steps. This spec treats duplicate keys as a
    /// validation failure at workflow-creation time (an Open Question the
    /// source left ambiguous).
    pub fn validate(&self) -> Result<(), WorkflowValidationError> {
        let mut seen = HashSet::new();
        for step in &self.steps {
            if !StepDefinition::validate_key(&step.key) {
                return Err(WorkflowValidationError::InvalidStepKey(step.key.clone()));
            }
            if !seen.insert(step.key.clone()) {
                return Err(WorkflowValidationError::DuplicateStepKey(step.key.clone()));
            }
        }
        let keys: HashSet<&str> = self.steps.iter().map(|s| s.key.as_str()).collect();
        for step in &self.steps {
            for dep in &step.depends_on {
                if dep == &step.key {
                    return Err(WorkflowValidationError::SelfDependency(step.key.clone()));
                }
                if !keys.contains(dep.as_str()) {
                    return Err(WorkflowValidationError::UnknownDependency {
                        step: step.key.clone(),
                        depends_on: dep.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn required_inputs(&self) -> impl Iterator<Item = &WorkflowInput> {
        self.inputs.iter().filter(|i| i.required)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(key: &str, deps: &[&str]) -> StepDefinition {
        StepDefinition {
            key: key.to_string(),
            name: key.to_string(),
            step_type: StepType::Task,
            depends_on: deps.iter().map(|s| s.to_string()).collect(),
            config: serde_json::Value::Null,
            guard: None,
            on_failure: OnFailure::Fail,
            max_retries: 0,
            timeout_ms: None,
        }
    }

    #[test]
    fn validate_rejects_duplicate_keys() {
        let wf = Workflow::new("wf", vec![step("a", &[]), step("a", &[])]);
        assert_eq!(wf.validate(), Err(WorkflowValidationError::DuplicateStepKey("a".into())));
    }

    #[test]
    fn validate_rejects_unknown_dependency() {
        let wf = Workflow::new("wf", vec![step("a", &["missing"])]);
        assert!(matches!(wf.validate(), Err(WorkflowValidationError::UnknownDependency { .. })));
    }

    #[test]
    fn validate_rejects_self_dependency() {
        let wf = Workflow::new("wf", vec![step("a", &["a"])]);
        assert_eq!(wf.validate(), Err(WorkflowValidationError::SelfDependency("a".into())));
    }

    #[test]
    fn validate_accepts_valid_dag() {
        let wf = Workflow::new("wf", vec![step("a", &[]), step("b", &["a"])]);
        assert!(wf.validate().is_ok());
    }
}
