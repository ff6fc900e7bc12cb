pub mod blackboard;
pub mod context;
pub mod event_bus;
pub mod expression;
pub mod spawn_queue;
pub mod swarm;
pub mod trigger_dispatcher;
pub mod worker_supervisor;
pub mod workflow_engine;
pub mod ws_fanout;

pub use blackboard::BlackboardService;
pub use context::ServerContext;
pub use event_bus::{CoordinationEvent, Delivery, EventBus, EventTag, Subscription};
pub use expression::{evaluate, evaluate_bool, ExpressionError};
pub use spawn_queue::{SpawnQueueService, SpawnQueueStats};
pub use swarm::SwarmService;
pub use trigger_dispatcher::TriggerDispatcher;
pub use worker_supervisor::{RoutingRecommendation, SpawnWorkerRequest, WorkerSupervisor};
pub use workflow_engine::WorkflowEngine;
pub use ws_fanout::{ClientMessage, ConnectionState, ServerMessage};
