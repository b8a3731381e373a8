pub mod agent;
pub mod bridge;
pub mod catalog;
pub mod config;
pub mod coordinator;
pub mod cq_error;
pub mod log;
pub mod orchestrator;
pub mod queue;
pub mod scheduler;
pub mod selection;
pub mod types;
