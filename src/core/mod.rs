// src/core/mod.rs — Core retry loop: validation, classification, policy, safety, state machine

pub mod classifier;
pub mod orchestrator;
pub mod policy;
pub mod safety;
pub mod types;
pub mod validator;
