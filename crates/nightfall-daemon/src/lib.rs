//! Background daemon binary for Nightfall.
//!
//! Wires the Lock Registry, Task Orchestrator, and Message Hub together,
//! owns the CLI surface, and runs the lock-sweeper and log-retention
//! background tasks for the lifetime of the process.

pub mod daemon;
