//! Core engine for simcrm: planning, scheduling, reference resolution,
//! content generation, and record execution.
//!
//! This crate holds all business logic behind trait seams: persistence
//! (`repository::SimulationRepository`), the external CRM
//! (`crm::CrmApi`), text generation (`textgen::TextGenerator`), and time
//! (`clock::Clock`) are ports implemented elsewhere.

pub mod clock;
pub mod context;
pub mod crm;
pub mod executor;
pub mod generator;
pub mod governor;
pub mod planner;
pub mod repository;
pub mod resolver;
pub mod runner;
pub mod textgen;

#[cfg(test)]
pub(crate) mod testing;
