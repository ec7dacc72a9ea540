//! End-to-end Task Orchestrator scenarios: a scripted provider stands in
//! for the planner/engineer/reviewer/memory-manager turns so the wave
//! scheduler, rework loop, and cancellation paths run against realistic
//! tagged-block output instead of the always-erroring stub.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use nightfall_agents::orchestrator::{EventSink, Orchestrator, OrchestratorConfig, OrchestratorEvent};
use nightfall_agents::task_log;
use nightfall_core::config::Config;
use nightfall_core::locks::LockRegistry;
use nightfall_core::types::TaskRunStatus;
use nightfall_harness::provider::{ChunkStream, CompletionProvider, Message, ProviderError};
use nightfall_harness::shutdown::ShutdownSignal;
use nightfall_harness::tools::ToolRegistry;

// ---------------------------------------------------------------------------
// Scripted provider
// ---------------------------------------------------------------------------

/// Returns canned done-block text keyed by which role's system prompt is
/// asking, in call order per role. The last scripted entry repeats once a
/// role's queue is exhausted, so tests only need to script the turns that
/// matter for the scenario.
struct ScriptedProvider {
    planner: Vec<&'static str>,
    engineer: Vec<&'static str>,
    reviewer: Vec<&'static str>,
    memory_manager: Vec<&'static str>,
    planner_calls: AtomicUsize,
    engineer_calls: AtomicUsize,
    reviewer_calls: AtomicUsize,
    memory_calls: AtomicUsize,
}

impl ScriptedProvider {
    fn new(
        planner: Vec<&'static str>,
        engineer: Vec<&'static str>,
        reviewer: Vec<&'static str>,
        memory_manager: Vec<&'static str>,
    ) -> Self {
        Self {
            planner,
            engineer,
            reviewer,
            memory_manager,
            planner_calls: AtomicUsize::new(0),
            engineer_calls: AtomicUsize::new(0),
            reviewer_calls: AtomicUsize::new(0),
            memory_calls: AtomicUsize::new(0),
        }
    }

    fn next(script: &[&'static str], counter: &AtomicUsize) -> String {
        let i = counter.fetch_add(1, Ordering::SeqCst);
        script[i.min(script.len() - 1)].to_string()
    }
}

#[async_trait::async_trait]
impl CompletionProvider for ScriptedProvider {
    fn complete(&self, messages: Vec<Message>, _cancel: tokio::sync::broadcast::Receiver<()>) -> ChunkStream {
        let system = messages.first().map(|m| m.content.clone()).unwrap_or_default();
        let text = if system.contains("planner agent") {
            Self::next(&self.planner, &self.planner_calls)
        } else if system.contains("engineer agent") {
            Self::next(&self.engineer, &self.engineer_calls)
        } else if system.contains("reviewer agent") {
            Self::next(&self.reviewer, &self.reviewer_calls)
        } else if system.contains("memory-manager agent") {
            Self::next(&self.memory_manager, &self.memory_calls)
        } else {
            "<done>{\"summary\": \"unscripted role\"}</done>".to_string()
        };
        Box::pin(futures_util::stream::once(async move { Ok(text) }))
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn ensure_model_ready(&self, _model: &str) -> Result<(), ProviderError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Blocks every completion until cancelled, so a shutdown mid-stream is the
/// only way a call ever resolves.
struct CancellingProvider;

#[async_trait::async_trait]
impl CompletionProvider for CancellingProvider {
    fn complete(&self, _messages: Vec<Message>, mut cancel: tokio::sync::broadcast::Receiver<()>) -> ChunkStream {
        Box::pin(futures_util::stream::once(async move {
            let _ = cancel.recv().await;
            Err(ProviderError::Cancelled)
        }))
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn ensure_model_ready(&self, _model: &str) -> Result<(), ProviderError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "cancelling"
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn make_orchestrator(
    dir: &std::path::Path,
    provider: Arc<dyn CompletionProvider>,
    config: OrchestratorConfig,
) -> Orchestrator {
    let (locks, _rx) = LockRegistry::new();
    Orchestrator::new(dir, provider, Arc::new(ToolRegistry::new()), locks, config)
}

fn default_config() -> OrchestratorConfig {
    OrchestratorConfig::from(&Config::default())
}

/// Collects every `TaskState` status transition and every `TaskComplete` in
/// the order the orchestrator emits them.
#[derive(Default)]
struct Recorder {
    statuses: StdMutex<Vec<TaskRunStatus>>,
    completions: StdMutex<Vec<(TaskRunStatus, Option<String>)>>,
}

fn recording_sink(recorder: Arc<Recorder>) -> EventSink {
    Arc::new(move |event: OrchestratorEvent| match event {
        OrchestratorEvent::TaskState(run) => {
            recorder.statuses.lock().unwrap().push(run.status);
        }
        OrchestratorEvent::TaskComplete { status, summary } => {
            recorder.completions.lock().unwrap().push((status, summary));
        }
        _ => {}
    })
}

/// Asserts `expected` appears as an ordered subsequence of `actual` (ignoring
/// repeats and any interleaved statuses), matching the dedup'd transitions
/// the end-to-end scenarios describe.
fn assert_subsequence(expected: &[TaskRunStatus], actual: &[TaskRunStatus]) {
    let mut it = actual.iter();
    for want in expected {
        assert!(
            it.any(|got| got == want),
            "expected status {want:?} to appear in order within {actual:?}"
        );
    }
}

// ---------------------------------------------------------------------------
// Scenario 1: single subtask, clean pass
// ---------------------------------------------------------------------------

#[tokio::test]
async fn single_subtask_clean_pass() {
    let dir = tempfile::tempdir().unwrap();
    let provider: Arc<dyn CompletionProvider> = Arc::new(ScriptedProvider::new(
        vec![r#"<done>{"subtasks":[{"id":"s1","description":"create hello.txt with content Hello"}],"complexity":"simple","estimatedEngineers":1}</done>"#],
        vec![r#"<done>{"filesChanged":["hello.txt"],"confidence":"high"}</done>"#],
        vec![r#"<done>{"passed":true,"issues":[],"notes":"ok"}</done>"#],
        vec![r#"<done>{"summary":"noted"}</done>"#],
    ));
    let orchestrator = make_orchestrator(dir.path(), provider, default_config());
    let shutdown = ShutdownSignal::new();
    let recorder = Arc::new(Recorder::default());

    let run = orchestrator
        .submit("add hello.txt", &shutdown, recording_sink(recorder.clone()))
        .await;
    assert_eq!(run.status, TaskRunStatus::AwaitingApproval);

    let run = orchestrator
        .approve_and_run(run, None, &shutdown, recording_sink(recorder.clone()))
        .await;

    assert_eq!(run.status, TaskRunStatus::Completed);
    assert_eq!(run.rework_cycles, 0);
    for id in ["team-lead", "engineer-1", "reviewer", "memory-manager"] {
        assert!(run.agent_states.contains_key(id), "missing agent state {id}");
    }

    assert_subsequence(
        &[
            TaskRunStatus::Planning,
            TaskRunStatus::AwaitingApproval,
            TaskRunStatus::Running,
            TaskRunStatus::Reviewing,
            TaskRunStatus::Completed,
        ],
        &recorder.statuses.lock().unwrap(),
    );

    let logs = task_log::list_logs(dir.path()).unwrap();
    assert_eq!(logs.len(), 1, "exactly one task-log file should be written");
    assert_eq!(logs[0].id, run.id);
}

// ---------------------------------------------------------------------------
// Scenario 2: rework then pass
// ---------------------------------------------------------------------------

#[tokio::test]
async fn rework_then_pass() {
    let dir = tempfile::tempdir().unwrap();
    let provider: Arc<dyn CompletionProvider> = Arc::new(ScriptedProvider::new(
        vec![r#"<done>{"subtasks":[{"id":"s1","description":"implement a.ts"}],"complexity":"simple","estimatedEngineers":1}</done>"#],
        vec![
            r#"<done>{"filesChanged":["a.ts"],"confidence":"high"}</done>"#,
            r#"<done>{"filesChanged":["a.ts"],"confidence":"high"}</done>"#,
        ],
        vec![
            r#"<done>{"passed":false,"issues":["tests fail"]}</done>"#,
            r#"<done>{"passed":true,"issues":[],"notes":"ok now"}</done>"#,
        ],
        vec![r#"<done>{"summary":"noted"}</done>"#],
    ));
    let mut config = default_config();
    config.max_rework_cycles = 2;
    let orchestrator = make_orchestrator(dir.path(), provider, config);
    let shutdown = ShutdownSignal::new();
    let recorder = Arc::new(Recorder::default());

    let run = orchestrator
        .submit("do the thing", &shutdown, recording_sink(recorder.clone()))
        .await;
    let run = orchestrator
        .approve_and_run(run, None, &shutdown, recording_sink(recorder.clone()))
        .await;

    assert_eq!(run.status, TaskRunStatus::Completed);
    assert_eq!(run.rework_cycles, 1);
    assert!(recorder
        .statuses
        .lock()
        .unwrap()
        .contains(&TaskRunStatus::Reworking));

    let subtask = &run.plan.as_ref().unwrap().subtasks[0];
    assert!(subtask.description.contains("[REWORK — cycle 1]"));
    assert!(subtask.description.contains("tests fail"));
}

// ---------------------------------------------------------------------------
// Scenario 3: rework limit exhausted
// ---------------------------------------------------------------------------

#[tokio::test]
async fn rework_limit_exhausted() {
    let dir = tempfile::tempdir().unwrap();
    let provider: Arc<dyn CompletionProvider> = Arc::new(ScriptedProvider::new(
        vec![r#"<done>{"subtasks":[{"id":"s1","description":"implement a.ts"}],"complexity":"simple","estimatedEngineers":1}</done>"#],
        vec![r#"<done>{"filesChanged":["a.ts"],"confidence":"high"}</done>"#],
        vec![r#"<done>{"passed":false,"issues":["still broken"]}</done>"#],
        vec![],
    ));
    let mut config = default_config();
    config.max_rework_cycles = 1;
    let orchestrator = make_orchestrator(dir.path(), provider, config);
    let shutdown = ShutdownSignal::new();
    let recorder = Arc::new(Recorder::default());

    let run = orchestrator
        .submit("do the thing", &shutdown, recording_sink(recorder.clone()))
        .await;
    let run = orchestrator
        .approve_and_run(run, None, &shutdown, recording_sink(recorder.clone()))
        .await;

    assert_eq!(run.status, TaskRunStatus::ReworkLimitReached);
    assert_eq!(run.rework_cycles, 2);

    let logs = task_log::list_logs(dir.path()).unwrap();
    assert_eq!(logs.len(), 1);
}

// ---------------------------------------------------------------------------
// Scenario 4: cancellation mid-stream
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancellation_mid_stream() {
    let dir = tempfile::tempdir().unwrap();
    let provider: Arc<dyn CompletionProvider> = Arc::new(CancellingProvider);
    let orchestrator = Arc::new(make_orchestrator(dir.path(), provider, default_config()));
    let shutdown = ShutdownSignal::new();
    let recorder = Arc::new(Recorder::default());

    let orch = orchestrator.clone();
    let sink = recording_sink(recorder.clone());
    let shutdown_for_task = shutdown.clone();
    let handle = tokio::spawn(async move { orch.submit("add a feature", &shutdown_for_task, sink).await });

    tokio::time::sleep(Duration::from_millis(20)).await;
    shutdown.trigger();

    let run = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("submit should return promptly after cancellation")
        .unwrap();

    assert_eq!(run.status, TaskRunStatus::Cancelled);
    let completions = recorder.completions.lock().unwrap();
    assert_eq!(completions.len(), 1);
    assert_eq!(completions[0].0, TaskRunStatus::Cancelled);
    assert_eq!(completions[0].1.as_deref(), Some("Task cancelled."));
}

// ---------------------------------------------------------------------------
// Scenario 5: dependency waves with max_engineers=2
// ---------------------------------------------------------------------------

#[tokio::test]
async fn dependency_waves_respect_max_engineers() {
    let dir = tempfile::tempdir().unwrap();
    let provider: Arc<dyn CompletionProvider> = Arc::new(ScriptedProvider::new(
        vec![r#"<done>{"subtasks":[
            {"id":"s1","description":"part one"},
            {"id":"s2","description":"part two"},
            {"id":"s3","description":"integrate","dependsOn":["s1","s2"]}
        ],"complexity":"complex","estimatedEngineers":2}</done>"#],
        vec![r#"<done>{"filesChanged":[],"confidence":"high"}</done>"#],
        vec![r#"<done>{"passed":true,"issues":[],"notes":"ok"}</done>"#],
        vec![r#"<done>{"summary":"noted"}</done>"#],
    ));
    let mut config = default_config();
    config.max_engineers = 2;
    let orchestrator = make_orchestrator(dir.path(), provider, config);
    let shutdown = ShutdownSignal::new();
    let recorder = Arc::new(Recorder::default());

    let run = orchestrator
        .submit("build the integration", &shutdown, recording_sink(recorder.clone()))
        .await;
    let run = orchestrator
        .approve_and_run(run, None, &shutdown, recording_sink(recorder.clone()))
        .await;

    assert_eq!(run.status, TaskRunStatus::Completed);
    let engineer_ids: Vec<&String> = run
        .agent_states
        .keys()
        .filter(|k| k.starts_with("engineer-"))
        .collect();
    let mut ids: Vec<String> = engineer_ids.into_iter().cloned().collect();
    ids.sort();
    assert_eq!(ids, vec!["engineer-1", "engineer-2", "engineer-3"]);
}
