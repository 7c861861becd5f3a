pub mod id;
pub mod orchestrator;
pub mod queue;
