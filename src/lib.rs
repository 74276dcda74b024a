// src/lib.rs — Library root for queryloop

pub mod agents;
pub mod cli;
pub mod core;
pub mod infra;
pub mod memory;
pub mod provider;
pub mod storage;
