//! Infrastructure implementations for simcrm.
//!
//! Provides the SQLite-backed `SimulationRepository`, the HTTP clients for
//! the external CRM API and the generative text service, and the engine
//! configuration loader.

pub mod config;
pub mod crm;
pub mod sqlite;
pub mod textgen;
