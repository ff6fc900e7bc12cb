//! fleetctl - coordination server for subprocess LLM-agent workers.
//!
//! A swarm of workers post to a shared blackboard, are admitted through
//! a priority spawn queue, run as steps of declarative workflows, and
//! react to event-condition-action triggers - all observed live over a
//! WebSocket fanout and driven through a REST surface.

pub mod cli;
pub mod domain;
pub mod http;
pub mod infrastructure;
pub mod services;
