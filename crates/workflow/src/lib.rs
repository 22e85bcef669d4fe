//! Nurture workflows — multi-step drip sequences with delays, engagement
//! conditions and single-target branching, driven by a stateless sweep.

pub mod collaborators;
pub mod engine;
pub mod evaluator;
pub mod executor;
pub mod handlers;
pub mod router;
pub mod scheduler;
pub mod state_machine;
pub mod stats;
pub mod store;
pub mod types;

pub use engine::WorkflowEngine;
pub use evaluator::ConditionEvaluator;
pub use router::nurture_router;
pub use scheduler::SweepProcessor;
pub use store::{InMemoryWorkflowStore, WorkflowStore};
