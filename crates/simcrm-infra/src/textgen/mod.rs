//! HTTP client for the generative text service.

pub mod client;

pub use client::HttpTextClient;
