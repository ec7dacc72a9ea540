//! Task Orchestrator (C6): drives a Task Run through planning, approval,
//! dependency-wave engineer dispatch, review, rework, and memory-manager
//! phases per the state diagram in spec.md §4.6.
//!
//! Generalized from the shape of a coding -> QA -> fix pipeline with a
//! single worker to a multi-engineer, multi-role pipeline keyed on reviewer
//! verdicts rather than tool exit codes.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use nightfall_core::config::Config;
use nightfall_core::locks::LockRegistry;
use nightfall_core::snapshot::SnapshotManager;
use nightfall_core::types::{
    AgentState, ReviewIssue, ReviewResult, Role, Subtask, SubtaskStatus, TaskPlan, TaskRun,
    TaskRunStatus,
};
use nightfall_harness::parser::{parse_plan, parse_review};
use nightfall_harness::provider::CompletionProvider;
use nightfall_harness::shutdown::ShutdownSignal;
use nightfall_harness::tools::ToolRegistry;

use crate::agent_loop::{AgentLoop, AgentLoopOutcome};
use crate::task_log;

/// Tunables carried over from [`Config`] into the orchestrator.
#[derive(Debug, Clone, Copy)]
pub struct OrchestratorConfig {
    pub max_engineers: u32,
    pub max_rework_cycles: u32,
    pub max_context_tokens: usize,
    pub log_retention: usize,
}

impl From<&Config> for OrchestratorConfig {
    fn from(config: &Config) -> Self {
        Self {
            max_engineers: config.concurrency.max_engineers,
            max_rework_cycles: config.task.max_rework_cycles,
            max_context_tokens: config.task.max_context_tokens as usize,
            log_retention: config.logs.retention,
        }
    }
}

/// Events the orchestrator emits as a Task Run progresses. The Message Hub
/// (C8) forwards these to connected clients as `TASK_STATE` / `PLAN_READY` /
/// `AGENT_UPDATE` / `TASK_COMPLETE` per spec.md §4.8.
#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
    TaskState(TaskRun),
    PlanReady(TaskPlan),
    AgentUpdate(AgentState),
    TaskComplete {
        status: TaskRunStatus,
        summary: Option<String>,
    },
}

/// Shared event sink: concurrent engineer waves each hold a clone and call
/// it directly, rather than threading a single `&mut` callback through
/// `join_all`'d futures.
pub type EventSink = Arc<dyn Fn(OrchestratorEvent) + Send + Sync>;

pub struct Orchestrator {
    project_root: PathBuf,
    provider: Arc<dyn CompletionProvider>,
    tools: Arc<ToolRegistry>,
    locks: LockRegistry,
    snapshots: SnapshotManager,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        project_root: impl Into<PathBuf>,
        provider: Arc<dyn CompletionProvider>,
        tools: Arc<ToolRegistry>,
        locks: LockRegistry,
        config: OrchestratorConfig,
    ) -> Self {
        let project_root = project_root.into();
        Self {
            snapshots: SnapshotManager::new(project_root.clone()),
            project_root,
            provider,
            tools,
            locks,
            config,
        }
    }

    /// **Submission.** Runs the planner agent and leaves the run in
    /// `awaiting_approval` (or `cancelled` if shutdown fires mid-plan).
    pub async fn submit(
        &self,
        prompt: &str,
        shutdown: &ShutdownSignal,
        on_event: EventSink,
    ) -> TaskRun {
        let mut run = TaskRun::new(prompt);
        run.set_status(TaskRunStatus::Planning)
            .expect("idle -> planning is always valid for a fresh run");
        on_event(OrchestratorEvent::TaskState(run.clone()));

        if shutdown.is_shutting_down() {
            run.set_status(TaskRunStatus::Cancelled).ok();
            self.persist_terminal(&run);
            on_event(OrchestratorEvent::TaskComplete {
                status: run.status,
                summary: Some("Task cancelled.".to_string()),
            });
            on_event(OrchestratorEvent::TaskState(run.clone()));
            return run;
        }

        let agent_id = "team-lead".to_string();
        let mut planner_state = AgentState::new(&agent_id, Role::Planner);
        let agent_loop = AgentLoop::new(
            Role::Planner,
            agent_id.clone(),
            self.provider.clone(),
            self.tools.clone(),
            self.config.max_context_tokens,
        );
        let sink = on_event.clone();
        let outcome = agent_loop
            .run(
                &self.project_root,
                prompt,
                None,
                shutdown,
                &mut planner_state,
                move |state| sink(OrchestratorEvent::AgentUpdate(state.clone())),
            )
            .await;
        run.agent_states.insert(agent_id, planner_state);

        if matches!(outcome, AgentLoopOutcome::Cancelled) {
            run.set_status(TaskRunStatus::Cancelled).ok();
            self.persist_terminal(&run);
            on_event(OrchestratorEvent::TaskComplete {
                status: run.status,
                summary: Some("Task cancelled.".to_string()),
            });
            on_event(OrchestratorEvent::TaskState(run.clone()));
            return run;
        }

        let plan = match outcome {
            AgentLoopOutcome::Done(signal) => {
                parse_plan(&signal.summary, prompt, self.config.max_engineers)
            }
            _ => TaskPlan::fallback(prompt),
        };

        run.plan = Some(plan.clone());
        run.set_status(TaskRunStatus::AwaitingApproval).ok();
        on_event(OrchestratorEvent::PlanReady(plan));
        on_event(OrchestratorEvent::TaskState(run.clone()));
        run
    }

    /// **Approval.** Caller must check `run.status == AwaitingApproval`
    /// before invoking this (the Message Hub rejects `APPROVE_PLAN` for any
    /// other status with a typed error before reaching here). Creates the
    /// pre-task snapshot, then drives the plan to completion.
    pub async fn approve_and_run(
        &self,
        mut run: TaskRun,
        edited_plan: Option<TaskPlan>,
        shutdown: &ShutdownSignal,
        on_event: EventSink,
    ) -> TaskRun {
        if let Some(plan) = edited_plan {
            run.plan = Some(plan);
        }
        let plan = run
            .plan
            .clone()
            .unwrap_or_else(|| TaskPlan::fallback(&run.prompt));
        let original_descriptions: HashMap<String, String> = plan
            .subtasks
            .iter()
            .map(|s| (s.id.clone(), s.description.clone()))
            .collect();

        if let Ok(meta) = self.snapshots.create_snapshot(run.id, &run.prompt, &[]) {
            run.snapshot_id = Some(meta.snapshot_id);
        }

        run.set_status(TaskRunStatus::Running)
            .expect("awaiting_approval -> running is always valid at this call site");
        on_event(OrchestratorEvent::TaskState(run.clone()));

        let mut subtasks = plan.subtasks;
        let mut summaries: HashMap<String, String> = HashMap::new();
        let mut engineer_counter: u32 = 0;
        let mut dispatched_engineer_ids: Vec<String> = Vec::new();

        loop {
            let cancelled = self
                .run_waves(
                    &mut run,
                    &mut subtasks,
                    &mut summaries,
                    &mut engineer_counter,
                    &mut dispatched_engineer_ids,
                    shutdown,
                    &on_event,
                )
                .await;

            if cancelled {
                run.set_status(TaskRunStatus::Cancelled).ok();
                self.finish(&mut run, &dispatched_engineer_ids, &on_event).await;
                return run;
            }

            run.set_status(TaskRunStatus::Reviewing).ok();
            on_event(OrchestratorEvent::TaskState(run.clone()));

            if shutdown.is_shutting_down() {
                run.set_status(TaskRunStatus::Cancelled).ok();
                self.finish(&mut run, &dispatched_engineer_ids, &on_event).await;
                return run;
            }

            let (review, reviewer_state) = self
                .run_reviewer(&run, &subtasks, &summaries, shutdown, &on_event)
                .await;
            run.agent_states.insert("reviewer".to_string(), reviewer_state);

            if review.passed {
                self.run_memory_manager(&run, &subtasks, &review, shutdown, &on_event)
                    .await;
                run.set_status(TaskRunStatus::Completed).ok();
                self.finish(&mut run, &dispatched_engineer_ids, &on_event).await;
                return run;
            }

            run.rework_cycles += 1;
            if run.rework_cycles <= self.config.max_rework_cycles {
                run.set_status(TaskRunStatus::Reworking).ok();
                on_event(OrchestratorEvent::TaskState(run.clone()));

                for subtask in subtasks.iter_mut() {
                    let original = original_descriptions
                        .get(&subtask.id)
                        .cloned()
                        .unwrap_or_default();
                    let previous = summaries.get(&subtask.id).cloned().unwrap_or_else(|| {
                        "(no summary — subtask did not complete)".to_string()
                    });
                    subtask.description =
                        rework_description(&original, &previous, &review.issues, run.rework_cycles);
                    subtask.status = SubtaskStatus::Pending;
                }
                run.plan = Some(TaskPlan {
                    subtasks: subtasks.clone(),
                    complexity: plan.complexity,
                    estimated_engineers: plan.estimated_engineers,
                });

                run.set_status(TaskRunStatus::Running).ok();
                on_event(OrchestratorEvent::TaskState(run.clone()));
                continue;
            }

            run.set_status(TaskRunStatus::ReworkLimitReached).ok();
            self.finish(&mut run, &dispatched_engineer_ids, &on_event).await;
            return run;
        }
    }

    /// Repeatedly dispatches ready subtasks in `max_engineers`-sized
    /// batches until none remain ready. Returns `true` if cancellation was
    /// observed mid-wave.
    async fn run_waves(
        &self,
        run: &mut TaskRun,
        subtasks: &mut Vec<Subtask>,
        summaries: &mut HashMap<String, String>,
        engineer_counter: &mut u32,
        dispatched_engineer_ids: &mut Vec<String>,
        shutdown: &ShutdownSignal,
        on_event: &EventSink,
    ) -> bool {
        loop {
            if shutdown.is_shutting_down() {
                return true;
            }

            let ready_ids: Vec<String> = subtasks
                .iter()
                .filter(|s| s.is_ready(subtasks))
                .map(|s| s.id.clone())
                .collect();
            if ready_ids.is_empty() {
                return false;
            }

            let batch_size = self.config.max_engineers.max(1) as usize;
            for batch in ready_ids.chunks(batch_size) {
                if shutdown.is_shutting_down() {
                    return true;
                }

                for id in batch {
                    if let Some(s) = subtasks.iter_mut().find(|s| &s.id == id) {
                        s.status = SubtaskStatus::InProgress;
                    }
                }
                sync_plan(run, subtasks);
                on_event(OrchestratorEvent::TaskState(run.clone()));

                let dispatch: Vec<(String, Subtask)> = batch
                    .iter()
                    .map(|id| {
                        *engineer_counter += 1;
                        let agent_id = format!("engineer-{engineer_counter}");
                        let subtask = subtasks.iter().find(|s| &s.id == id).unwrap().clone();
                        (agent_id, subtask)
                    })
                    .collect();

                for (agent_id, _) in &dispatch {
                    dispatched_engineer_ids.push(agent_id.clone());
                }

                let results = futures_util::future::join_all(dispatch.into_iter().map(
                    |(agent_id, subtask)| self.run_engineer(agent_id, subtask, shutdown, on_event),
                ))
                .await;

                for (agent_id, subtask_id, outcome, state, files) in results {
                    if let Some(s) = subtasks.iter_mut().find(|s| s.id == subtask_id) {
                        s.status = match &outcome {
                            AgentLoopOutcome::Done(signal) if !signal.blocked => SubtaskStatus::Done,
                            AgentLoopOutcome::BareAnswer(_) => SubtaskStatus::Done,
                            _ => SubtaskStatus::Failed,
                        };
                        s.files_touched = files;
                        s.assigned_to = Some(agent_id.clone());
                    }
                    let summary = match &outcome {
                        AgentLoopOutcome::Done(signal) => signal.summary.clone(),
                        AgentLoopOutcome::BareAnswer(text) => text.clone(),
                        AgentLoopOutcome::Interrupted => {
                            "(turn budget exhausted before completion)".to_string()
                        }
                        AgentLoopOutcome::Cancelled => "(cancelled)".to_string(),
                        AgentLoopOutcome::ProviderError(err) => format!("(provider error: {err})"),
                    };
                    summaries.insert(subtask_id, summary);
                    run.agent_states.insert(agent_id, state);
                }

                sync_plan(run, subtasks);
                on_event(OrchestratorEvent::TaskState(run.clone()));
            }
        }
    }

    async fn run_engineer(
        &self,
        agent_id: String,
        subtask: Subtask,
        shutdown: &ShutdownSignal,
        on_event: &EventSink,
    ) -> (String, String, AgentLoopOutcome, AgentState, Vec<String>) {
        let mut state = AgentState::new(&agent_id, Role::Engineer);
        let agent_loop = AgentLoop::new(
            Role::Engineer,
            agent_id.clone(),
            self.provider.clone(),
            self.tools.clone(),
            self.config.max_context_tokens,
        );
        let sink = on_event.clone();
        let prompt = subtask_prompt(&subtask);
        let outcome = agent_loop
            .run(
                &self.project_root,
                &prompt,
                Some(self.locks.clone()),
                shutdown,
                &mut state,
                move |s| sink(OrchestratorEvent::AgentUpdate(s.clone())),
            )
            .await;
        let files = files_touched_from_log(&state);
        (agent_id, subtask.id, outcome, state, files)
    }

    async fn run_reviewer(
        &self,
        run: &TaskRun,
        subtasks: &[Subtask],
        summaries: &HashMap<String, String>,
        shutdown: &ShutdownSignal,
        on_event: &EventSink,
    ) -> (ReviewResult, AgentState) {
        let prompt = reviewer_prompt(&run.prompt, subtasks, summaries);
        let mut state = AgentState::new("reviewer", Role::Reviewer);
        let agent_loop = AgentLoop::new(
            Role::Reviewer,
            "reviewer",
            self.provider.clone(),
            self.tools.clone(),
            self.config.max_context_tokens,
        );
        let sink = on_event.clone();
        let outcome = agent_loop
            .run(
                &self.project_root,
                &prompt,
                Some(self.locks.clone()),
                shutdown,
                &mut state,
                move |s| sink(OrchestratorEvent::AgentUpdate(s.clone())),
            )
            .await;
        let review = match outcome {
            AgentLoopOutcome::Done(signal) => parse_review(&signal.summary),
            AgentLoopOutcome::BareAnswer(text) => parse_review(&text),
            _ => ReviewResult {
                passed: false,
                issues: vec![ReviewIssue {
                    description: "reviewer did not produce a verdict".to_string(),
                    evidence: None,
                }],
                notes: None,
            },
        };
        (review, state)
    }

    /// Runs only after a passed review. Best-effort: failures never fail
    /// the task, per spec.md §4.6.
    async fn run_memory_manager(
        &self,
        run: &TaskRun,
        subtasks: &[Subtask],
        review: &ReviewResult,
        shutdown: &ShutdownSignal,
        on_event: &EventSink,
    ) {
        let prompt = memory_manager_prompt(run, subtasks, review);
        let mut state = AgentState::new("memory-manager", Role::MemoryManager);
        let agent_loop = AgentLoop::new(
            Role::MemoryManager,
            "memory-manager",
            self.provider.clone(),
            self.tools.clone(),
            self.config.max_context_tokens,
        );
        let sink = on_event.clone();
        let _ = agent_loop
            .run(
                &self.project_root,
                &prompt,
                None,
                shutdown,
                &mut state,
                move |s| sink(OrchestratorEvent::AgentUpdate(s.clone())),
            )
            .await;
    }

    async fn finish(&self, run: &mut TaskRun, dispatched_engineer_ids: &[String], on_event: &EventSink) {
        for id in dispatched_engineer_ids {
            self.locks.release_all(id).await;
        }
        self.locks.release_all("reviewer").await;
        self.locks.release_all("memory-manager").await;
        self.persist_terminal(run);

        let summary = if run.status == TaskRunStatus::Cancelled {
            Some("Task cancelled.".to_string())
        } else {
            run.agent_states
                .get("reviewer")
                .and_then(|s| s.final_summary.clone())
        };
        on_event(OrchestratorEvent::TaskComplete {
            status: run.status,
            summary,
        });
        on_event(OrchestratorEvent::TaskState(run.clone()));
    }

    fn persist_terminal(&self, run: &TaskRun) {
        if task_log::write_log(&self.project_root, run).is_ok() {
            let _ = task_log::prune_old_logs(&self.project_root, self.config.log_retention);
        }
    }
}

fn sync_plan(run: &mut TaskRun, subtasks: &[Subtask]) {
    if let Some(plan) = run.plan.as_mut() {
        plan.subtasks = subtasks.to_vec();
    }
}

fn subtask_prompt(subtask: &Subtask) -> String {
    let mut prompt = subtask.description.clone();
    if let Some(files) = &subtask.files {
        if !files.is_empty() {
            prompt.push_str(&format!("\n\nFiles likely involved: {}", files.join(", ")));
        }
    }
    if let Some(criteria) = &subtask.success_criteria {
        prompt.push_str(&format!("\n\nSuccess criteria: {criteria}"));
    }
    if let Some(constraints) = &subtask.constraints {
        prompt.push_str(&format!("\n\nConstraints: {constraints}"));
    }
    prompt
}

fn reviewer_prompt(
    original_prompt: &str,
    subtasks: &[Subtask],
    summaries: &HashMap<String, String>,
) -> String {
    let mut prompt = format!("Original task:\n{original_prompt}\n\nSubtask results:\n");
    for subtask in subtasks {
        let summary = summaries
            .get(&subtask.id)
            .cloned()
            .unwrap_or_else(|| "(not run)".to_string());
        prompt.push_str(&format!(
            "\n[{}] {} — status: {:?}\n{}\n",
            subtask.id, subtask.description, subtask.status, summary
        ));
    }
    let mut files: Vec<&str> = subtasks
        .iter()
        .flat_map(|s| s.files_touched.iter().map(String::as_str))
        .collect();
    files.sort();
    files.dedup();
    prompt.push_str(&format!("\nFiles touched: {}\n", files.join(", ")));
    prompt.push_str("\nRe-run any relevant tests and verify independently before passing this work.");
    prompt
}

fn memory_manager_prompt(run: &TaskRun, subtasks: &[Subtask], review: &ReviewResult) -> String {
    let mut files: Vec<&str> = subtasks
        .iter()
        .flat_map(|s| s.files_touched.iter().map(String::as_str))
        .collect();
    files.sort();
    files.dedup();

    let mut prompt = format!(
        "Task: {}\nFiles changed: {}\nRework cycles: {}\nReviewer verdict: passed\n",
        run.prompt,
        files.join(", "),
        run.rework_cycles
    );
    if let Some(notes) = &review.notes {
        prompt.push_str(&format!("Reviewer notes: {notes}\n"));
    }
    prompt.push_str("\nSubtask summaries:\n");
    for subtask in subtasks {
        prompt.push_str(&format!("- [{}] {}\n", subtask.id, subtask.description));
    }
    prompt
}

fn rework_description(
    original: &str,
    previous_summary: &str,
    issues: &[ReviewIssue],
    cycle: u32,
) -> String {
    let mut issues_block = String::new();
    for issue in issues {
        issues_block.push_str(&format!("- {}\n", issue.render()));
    }
    format!(
        "[REWORK — cycle {cycle}]\nOriginal task:\n{original}\nYour previous attempt result:\n{previous_summary}\nReviewer found these issues — fix ALL of them:\n{issues_block}"
    )
}

/// Scan an agent's log for `write_diff`/`write_file` tool calls to recover
/// which files it touched, per spec.md §4.6 "Wave scheduling".
fn files_touched_from_log(state: &AgentState) -> Vec<String> {
    use nightfall_core::types::AgentLogKind;

    let mut files = Vec::new();
    for entry in &state.log {
        if entry.kind != AgentLogKind::ToolCall {
            continue;
        }
        let Ok(value) = serde_json::from_str::<serde_json::Value>(&entry.text) else {
            continue;
        };
        let tool = value.get("tool").and_then(|t| t.as_str()).unwrap_or_default();
        if tool != "write_diff" && tool != "write_file" {
            continue;
        }
        if let Some(path) = value
            .get("parameters")
            .and_then(|p| p.get("path"))
            .and_then(|p| p.as_str())
        {
            files.push(path.to_string());
        }
    }
    files.sort();
    files.dedup();
    files
}
