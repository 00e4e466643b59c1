//! Persona state: trait types, persistence, compaction, and statistics.

pub mod compaction;
pub mod stats;
pub mod store;
pub mod types;
