//! Observability setup for simcrm.

pub mod tracing_setup;
