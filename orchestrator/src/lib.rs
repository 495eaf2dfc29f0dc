//! stackpilot
//!
//! Orchestrates tenant AI document-processing stacks: GPU compute, model
//! server, vector store, retrieval pipeline, workflow engine and chat UI,
//! brought up as one deployment and driven through its lifecycle.

pub mod app;
pub mod deploy;
pub mod errors;
pub mod events;
pub mod filesys;
pub mod gateways;
pub mod http;
pub mod logs;
pub mod models;
pub mod server;
pub mod storage;
pub mod store;
pub mod utils;
pub mod workers;
