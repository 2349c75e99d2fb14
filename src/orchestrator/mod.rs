// src/orchestrator/mod.rs

pub mod agent;
pub mod client_wrapper;
pub mod config;
pub mod context;
pub mod event;
pub mod handoff;
pub mod intent;
pub mod llm_session;
pub mod memory;
pub mod reference;
pub mod registry;
pub mod relay;
pub mod session;
pub mod store;

// Let's explicitly export the controller so we don't have to access it via
// orchestrator::handoff::HandoffController
pub use handoff::HandoffController;
pub use llm_session::LLMSession;
