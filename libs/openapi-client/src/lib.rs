//! Provider API wire models

pub mod models;
