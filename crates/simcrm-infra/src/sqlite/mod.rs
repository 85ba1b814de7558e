//! SQLite persistence for simcrm.

pub mod pool;
pub mod simulation;

pub use pool::{DatabasePool, default_database_url};
pub use simulation::SqliteSimulationRepository;
