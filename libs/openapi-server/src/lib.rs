//! stackpilot HTTP API models

pub mod models;
