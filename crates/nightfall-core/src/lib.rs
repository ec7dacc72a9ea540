//! Core library for Nightfall — foundational data model, configuration,
//! the file-lock registry, and the snapshot / rollback subsystem.
//!
//! This crate is deliberately free of any LLM or tool-execution concerns —
//! those live in `nightfall-harness` and `nightfall-agents`. What lives here
//! is the shared vocabulary every other crate builds on: `TaskRun`,
//! `TaskPlan`, `Subtask`, `AgentState`, `FileLock`, `SnapshotMeta`, `Config`,
//! plus the two concurrency-adjacent services (locks, snapshots) that are
//! pure filesystem/state machinery rather than agent behavior.

pub mod config;
pub mod locks;
pub mod memory;
pub mod snapshot;
pub mod types;
