//! Shared data model: task runs, plans, subtasks, agent state, file locks,
//! snapshot metadata, and tool call/result envelopes.
//!
//! Every type here derives `Serialize`/`Deserialize` so it round-trips
//! through both the on-disk task log (`nightfall_agents::task_log`) and the
//! client-facing wire protocol (`nightfall_bridge::protocol`) without a
//! separate DTO layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Role
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Planner,
    Engineer,
    Reviewer,
    MemoryManager,
    Classifier,
    Responder,
}

impl Role {
    /// Iteration budget for this role's agent loop (spec §4.4).
    pub fn max_turns(&self) -> u32 {
        match self {
            Role::Planner => 20,
            Role::Engineer => 30,
            Role::Reviewer => 20,
            Role::MemoryManager => 20,
            Role::Classifier => 1,
            Role::Responder => 10,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Role::Planner => "planner",
            Role::Engineer => "engineer",
            Role::Reviewer => "reviewer",
            Role::MemoryManager => "memory-manager",
            Role::Classifier => "classifier",
            Role::Responder => "responder",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// TaskRunStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskRunStatus {
    Idle,
    Planning,
    AwaitingApproval,
    Running,
    Reviewing,
    Reworking,
    Completed,
    ReworkLimitReached,
    Cancelled,
}

impl TaskRunStatus {
    /// Returns `true` when a transition from `self` to `target` is valid,
    /// per the state diagram in spec.md §4.6.
    pub fn can_transition_to(&self, target: &TaskRunStatus) -> bool {
        use TaskRunStatus::*;
        if *target == Cancelled {
            // Any non-terminal state can be cancelled.
            return !matches!(self, Completed | ReworkLimitReached | Cancelled);
        }
        matches!(
            (self, target),
            (Idle, Planning)
                | (Planning, AwaitingApproval)
                | (AwaitingApproval, Running)
                | (AwaitingApproval, Idle)
                | (Running, Reviewing)
                | (Reviewing, Completed)
                | (Reviewing, Reworking)
                | (Reviewing, ReworkLimitReached)
                | (Reworking, Running)
                | (Reworking, ReworkLimitReached)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskRunStatus::Completed
                | TaskRunStatus::ReworkLimitReached
                | TaskRunStatus::Cancelled
        )
    }
}

// ---------------------------------------------------------------------------
// SubtaskStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskStatus {
    Pending,
    InProgress,
    Done,
    Failed,
}

// ---------------------------------------------------------------------------
// Subtask / TaskPlan
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subtask {
    pub id: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_criteria: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<String>,
    #[serde(default)]
    pub status: SubtaskStatus,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
    #[serde(default)]
    pub files_touched: Vec<String>,
}

impl Default for SubtaskStatus {
    fn default() -> Self {
        SubtaskStatus::Pending
    }
}

impl Subtask {
    /// A fallback single subtask carrying the original prompt verbatim,
    /// used by the plan parser when the planner's output is missing or
    /// malformed (spec.md §4.5).
    pub fn fallback(prompt: impl Into<String>) -> Self {
        Self {
            id: "1".to_string(),
            description: prompt.into(),
            files: None,
            success_criteria: None,
            constraints: None,
            status: SubtaskStatus::Pending,
            depends_on: Vec::new(),
            assigned_to: None,
            files_touched: Vec::new(),
        }
    }

    /// Whether every dependency of this subtask has completed.
    pub fn is_ready(&self, subtasks: &[Subtask]) -> bool {
        if self.status != SubtaskStatus::Pending {
            return false;
        }
        self.depends_on.iter().all(|dep| {
            subtasks
                .iter()
                .find(|s| &s.id == dep)
                .map(|s| s.status == SubtaskStatus::Done)
                .unwrap_or(false)
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanComplexity {
    Simple,
    Complex,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPlan {
    pub subtasks: Vec<Subtask>,
    #[serde(default = "default_complexity")]
    pub complexity: PlanComplexity,
    #[serde(default = "default_estimated_engineers")]
    pub estimated_engineers: u32,
}

fn default_complexity() -> PlanComplexity {
    PlanComplexity::Simple
}
fn default_estimated_engineers() -> u32 {
    1
}

impl TaskPlan {
    /// A single-subtask fallback plan carrying the original prompt verbatim.
    pub fn fallback(prompt: impl Into<String>) -> Self {
        Self {
            subtasks: vec![Subtask::fallback(prompt)],
            complexity: PlanComplexity::Simple,
            estimated_engineers: 1,
        }
    }
}

// ---------------------------------------------------------------------------
// AgentStatus / AgentState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Thinking,
    Acting,
    Waiting,
    Done,
    Error,
}

/// One line of an agent's visible log: a thought, tool call, tool result, or
/// plain assistant message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentLogEntry {
    pub timestamp: DateTime<Utc>,
    pub kind: AgentLogKind,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentLogKind {
    Thought,
    ToolCall,
    ToolResult,
    Message,
}

/// Number of trailing log entries broadcast to clients (spec.md §3: "log[]
/// truncated to 50 for broadcast").
pub const AGENT_LOG_BROADCAST_LIMIT: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentState {
    pub id: String,
    pub role: Role,
    pub status: AgentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_action: Option<String>,
    #[serde(default)]
    pub log: Vec<AgentLogEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_summary: Option<String>,
}

impl AgentState {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
            status: AgentStatus::Idle,
            current_action: None,
            log: Vec::new(),
            final_summary: None,
        }
    }

    pub fn log(&mut self, kind: AgentLogKind, text: impl Into<String>) {
        self.log.push(AgentLogEntry {
            timestamp: Utc::now(),
            kind,
            text: text.into(),
        });
    }

    /// The trailing slice of the log suitable for a wire broadcast.
    pub fn log_for_broadcast(&self) -> &[AgentLogEntry] {
        let len = self.log.len();
        let start = len.saturating_sub(AGENT_LOG_BROADCAST_LIMIT);
        &self.log[start..]
    }
}

// ---------------------------------------------------------------------------
// FileLock
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileLock {
    pub path: String,
    pub locked_by: String,
    pub locked_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// SnapshotMeta
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMeta {
    pub snapshot_id: String,
    pub task_id: Uuid,
    pub prompt: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_snapshot_id: Option<String>,
    #[serde(default)]
    pub files_changed: Vec<String>,
}

// ---------------------------------------------------------------------------
// ToolCall / ToolResult
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(output: serde_json::Value) -> Self {
        Self {
            success: true,
            output: Some(output),
            error: None,
        }
    }

    pub fn err(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// ReviewResult
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewIssue {
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
}

impl ReviewIssue {
    /// Render as `"<description> (evidence: <evidence>)"` per spec.md §4.5.
    pub fn render(&self) -> String {
        match &self.evidence {
            Some(ev) => format!("{} (evidence: {})", self.description, ev),
            None => self.description.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewResult {
    pub passed: bool,
    #[serde(default)]
    pub issues: Vec<ReviewIssue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

// ---------------------------------------------------------------------------
// DoneSignal
// ---------------------------------------------------------------------------

/// What an agent's `<done>` block resolves to: a summary string, and — for
/// engineers — an optional `blocked` marker (spec.md §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoneSignal {
    pub summary: String,
    #[serde(default)]
    pub blocked: bool,
}

// ---------------------------------------------------------------------------
// TaskRun
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRun {
    pub id: Uuid,
    pub prompt: String,
    pub status: TaskRunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<TaskPlan>,
    #[serde(default)]
    pub rework_cycles: u32,
    #[serde(default)]
    pub agent_states: HashMap<String, AgentState>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<String>,
}

impl TaskRun {
    pub fn new(prompt: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            prompt: prompt.into(),
            status: TaskRunStatus::Idle,
            plan: None,
            rework_cycles: 0,
            agent_states: HashMap::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
            snapshot_id: None,
        }
    }

    /// Attempt a status transition, recording `updated_at` (and
    /// `completed_at` for terminal states) on success.
    pub fn set_status(&mut self, status: TaskRunStatus) -> Result<(), String> {
        if !self.status.can_transition_to(&status) {
            return Err(format!(
                "cannot transition task {} from {:?} to {:?}",
                self.id, self.status, status
            ));
        }
        self.status = status;
        self.updated_at = Utc::now();
        if status.is_terminal() {
            self.completed_at = Some(self.updated_at);
        }
        tracing::debug!(task_id = %self.id, status = ?status, "task run status transition");
        Ok(())
    }

    /// The union of files touched across every subtask in the current plan.
    pub fn files_touched(&self) -> Vec<String> {
        let mut files: Vec<String> = self
            .plan
            .iter()
            .flat_map(|p| p.subtasks.iter())
            .flat_map(|s| s.files_touched.iter().cloned())
            .collect();
        files.sort();
        files.dedup();
        files
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

pub use crate::config::Config;
