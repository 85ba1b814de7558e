//! Per-job symbolic-id context.
//!
//! `JobContext` is the working copy of a job's symbol -> real-id map during
//! one step execution: loaded from the repository before resolution, read by
//! the resolver, extended with discovered ids, and written back entry by
//! entry (the repository upsert is idempotent, and the store serializes
//! writes per job).

use std::collections::HashMap;

use uuid::Uuid;

/// Working copy of one job's context map.
#[derive(Debug, Clone)]
pub struct JobContext {
    job_id: Uuid,
    entries: HashMap<String, String>,
}

impl JobContext {
    pub fn new(job_id: Uuid, entries: HashMap<String, String>) -> Self {
        Self { job_id, entries }
    }

    pub fn empty(job_id: Uuid) -> Self {
        Self {
            job_id,
            entries: HashMap::new(),
        }
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// Look up the real id for a symbolic id.
    pub fn get(&self, symbol: &str) -> Option<&str> {
        self.entries.get(symbol).map(String::as_str)
    }

    /// Record a resolved symbol. Re-inserting the same symbol overwrites
    /// with the latest discovered id; entries are never removed.
    pub fn insert(&mut self, symbol: impl Into<String>, real_id: impl Into<String>) {
        self.entries.insert(symbol.into(), real_id.into());
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.entries.contains_key(symbol)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over all entries.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}
