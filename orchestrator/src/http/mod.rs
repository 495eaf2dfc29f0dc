//! HTTP clients for provider APIs

pub mod client;
pub mod compute;
pub mod workflows;

pub use client::{AuthScheme, HttpClient};
