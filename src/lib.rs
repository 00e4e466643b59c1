//! Persona trait evolution and memory compaction for AI companions.
//!
//! Sigmaris keeps a small per-user persona state, a three-axis trait vector
//! (calm, empathy, curiosity), and updates it from conversation text:
//!
//! | Stage | Module | Notes |
//! |-------|--------|-------|
//! | Signal extraction | [`signals`] | Pure keyword/regex classifiers |
//! | Message nudge | [`evolution::nudge_from_message`] | Fixed-direction deltas |
//! | Safety | [`signals::safety`] | May short-circuit with a canned direction |
//! | Reflection | [`reflection`] | Delegates to a [`llm::LanguageModel`], owns fallbacks |
//! | Evolution | [`evolution::evolve`] | Reflection deltas plus seeded drift |
//! | Compaction | [`persona::compaction`] | Summarize and delete old messages by id |
//!
//! [`turn::TurnEngine`] composes these into one chat turn.
//!
//! # Architecture
//!
//! - **Storage**: SQLite (WAL) with forward-only migrations
//! - **Language model**: any OpenAI-compatible chat endpoint, or `offline`
//! - **Concurrency**: one async lock per user; blocking work on the tokio blocking pool
//!
//! # Modules
//!
//! - [`config`]: Configuration loading from TOML files and environment variables
//! - [`db`]: SQLite initialization, schema, migrations, and health checks
//! - [`persona`]: Trait types, persistence, compaction, and statistics
//! - [`signals`]: Emotion, intent, semantic, self-reference, and safety extractors
//! - [`evolution`]: The two trait update rules
//! - [`llm`]: Language-generation collaborator
//! - [`reflection`]: Reflection, meta-reflection, and summarization
//! - [`turn`]: The end-to-end turn pipeline

pub mod config;
pub mod db;
pub mod evolution;
pub mod llm;
pub mod persona;
pub mod reflection;
pub mod signals;
pub mod turn;
