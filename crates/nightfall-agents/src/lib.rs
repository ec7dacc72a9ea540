//! Agent execution and orchestration for the Nightfall daemon.
//!
//! This crate provides the layer above the provider/tool harness:
//! - The per-agent turn loop ([`agent_loop`])
//! - Per-role system prompts ([`roles`])
//! - The end-to-end task pipeline: plan, approve, dispatch, review, rework,
//!   remember ([`orchestrator`])
//! - On-disk task run persistence ([`task_log`])

pub mod agent_loop;
pub mod orchestrator;
pub mod roles;
pub mod task_log;
