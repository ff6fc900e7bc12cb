pub mod auth;
pub mod blackboard;
pub mod executions;
pub mod orchestrate;
pub mod spawn_queue;
pub mod steps;
pub mod swarms;
pub mod triggers;
pub mod workflows;
