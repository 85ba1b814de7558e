//! HTTP client for the external CRM-style API.

pub mod client;
pub mod types;

pub use client::HttpCrmClient;
