//! Agent Loop (C4): drives one agent through system-prompt composition,
//! streaming completion, tagged-block parsing, and tool dispatch until it
//! emits a done signal, answers bare, exhausts its turn budget, or is
//! cancelled.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use nightfall_core::locks::LockRegistry;
use nightfall_core::types::{AgentLogKind, AgentState, AgentStatus, DoneSignal, Role, ToolResult};
use nightfall_harness::provider::{CompletionProvider, Message, ProviderError};
use nightfall_harness::shutdown::ShutdownSignal;
use nightfall_harness::tools::{ToolContext, ToolError, ToolRegistry};
use nightfall_harness::parser::{parse_done, parse_tool_call};

use crate::roles::{compose_system_prompt, load_prompt_override};

/// Characters per token for context-budget accounting. Matches the estimate
/// used by [`nightfall_harness::provider::Message::char_len`] callers
/// elsewhere; no real tokenizer is available at this layer.
const CHARS_PER_TOKEN: usize = 4;

/// Minimum interval between live-preview updates while a completion streams.
const PREVIEW_THROTTLE: Duration = Duration::from_millis(200);

fn estimate_tokens(messages: &[Message]) -> usize {
    messages.iter().map(Message::char_len).sum::<usize>() / CHARS_PER_TOKEN
}

/// Drop the oldest message pair (indices 2, 3) while the transcript is over
/// budget, always preserving the system prompt (0) and the original task (1).
pub fn compact_context(messages: &mut Vec<Message>, max_tokens: usize) {
    while estimate_tokens(messages) > max_tokens && messages.len() > 4 {
        messages.remove(3);
        messages.remove(2);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AgentLoopConfig {
    pub max_context_tokens: usize,
}

impl Default for AgentLoopConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: 32_000,
        }
    }
}

#[derive(Debug, Clone)]
pub enum AgentLoopOutcome {
    /// The agent emitted a well-formed done block.
    Done(DoneSignal),
    /// The agent's final turn had no tagged block at all; its raw text is
    /// treated as the final answer (classifier/responder roles typically
    /// end this way).
    BareAnswer(String),
    /// The turn budget was exhausted before a done block appeared.
    Interrupted,
    /// Cancellation was observed before or during a completion.
    Cancelled,
    /// The provider failed in a way the adapter could not recover from.
    ProviderError(String),
}

pub struct AgentLoop {
    pub role: Role,
    pub agent_id: String,
    pub provider: Arc<dyn CompletionProvider>,
    pub tools: Arc<ToolRegistry>,
    pub config: AgentLoopConfig,
}

impl AgentLoop {
    pub fn new(
        role: Role,
        agent_id: impl Into<String>,
        provider: Arc<dyn CompletionProvider>,
        tools: Arc<ToolRegistry>,
        max_context_tokens: usize,
    ) -> Self {
        Self {
            role,
            agent_id: agent_id.into(),
            provider,
            tools,
            config: AgentLoopConfig { max_context_tokens },
        }
    }

    /// Run the loop to completion. `on_update` is called after every status
    /// change, log append, and throttled streaming preview so a caller can
    /// forward live state to the message hub.
    pub async fn run(
        &self,
        project_root: &Path,
        task_prompt: &str,
        locks: Option<LockRegistry>,
        shutdown: &ShutdownSignal,
        state: &mut AgentState,
        mut on_update: impl FnMut(&AgentState),
    ) -> AgentLoopOutcome {
        let override_prompt = load_prompt_override(project_root, self.role);
        let descriptors = self.tools.descriptors_for(self.role);
        let system_prompt =
            compose_system_prompt(self.role, &descriptors, override_prompt.as_deref());

        let mut messages = vec![Message::system(system_prompt), Message::user(task_prompt)];
        let ctx = ToolContext {
            project_root: project_root.to_path_buf(),
            agent_id: self.agent_id.clone(),
            role: self.role,
            locks,
        };

        for _turn in 0..self.role.max_turns() {
            if shutdown.is_shutting_down() {
                return AgentLoopOutcome::Cancelled;
            }

            compact_context(&mut messages, self.config.max_context_tokens);

            state.status = AgentStatus::Thinking;
            state.current_action = None;
            on_update(state);

            let response = match self.stream_completion(&messages, shutdown, state, &mut on_update).await {
                Ok(text) => text,
                Err(StreamOutcome::Cancelled) => return AgentLoopOutcome::Cancelled,
                Err(StreamOutcome::Failed(err)) => {
                    state.status = AgentStatus::Error;
                    on_update(state);
                    return AgentLoopOutcome::ProviderError(err);
                }
            };

            state.current_action = None;
            state.log(AgentLogKind::Thought, response.clone());
            on_update(state);

            if let Some(call) = parse_tool_call(&response) {
                state.status = AgentStatus::Acting;
                on_update(state);
                state.log(
                    AgentLogKind::ToolCall,
                    serde_json::to_string(&call).unwrap_or_default(),
                );
                on_update(state);

                let result = match self.tools.execute(&call, &ctx).await {
                    Ok(result) => result,
                    Err(ToolError::PermissionDenied { role, tool }) => ToolResult::err(format!(
                        "role {role} is not permitted to use tool `{tool}`"
                    )),
                    Err(ToolError::UnknownTool(name)) => {
                        ToolResult::err(format!("unknown tool `{name}`"))
                    }
                };
                state.log(
                    AgentLogKind::ToolResult,
                    serde_json::to_string(&result).unwrap_or_default(),
                );
                on_update(state);

                let feedback = match (&result.error, &result.output) {
                    (Some(err), _) => format!("Tool error: {err}"),
                    (None, Some(output)) => format!("Tool result: {output}"),
                    (None, None) => "Tool result: (no output)".to_string(),
                };
                messages.push(Message::assistant(response));
                messages.push(Message::user(feedback));
                continue;
            }

            if let Some(signal) = parse_done(&response) {
                state.final_summary = Some(signal.summary.clone());
                state.status = AgentStatus::Done;
                on_update(state);
                return AgentLoopOutcome::Done(signal);
            }

            state.log(AgentLogKind::Message, response.clone());
            state.final_summary = Some(response.clone());
            state.status = AgentStatus::Done;
            on_update(state);
            return AgentLoopOutcome::BareAnswer(response);
        }

        state.status = AgentStatus::Error;
        on_update(state);
        AgentLoopOutcome::Interrupted
    }

    async fn stream_completion(
        &self,
        messages: &[Message],
        shutdown: &ShutdownSignal,
        state: &mut AgentState,
        on_update: &mut impl FnMut(&AgentState),
    ) -> Result<String, StreamOutcome> {
        let cancel_rx = shutdown.subscribe();
        let mut stream = self.provider.complete(messages.to_vec(), cancel_rx);

        let mut buffer = String::new();
        let mut last_emit = tokio::time::Instant::now();

        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(text) => {
                    buffer.push_str(&text);
                    if last_emit.elapsed() >= PREVIEW_THROTTLE {
                        state.current_action = Some(buffer.clone());
                        on_update(state);
                        last_emit = tokio::time::Instant::now();
                    }
                }
                Err(ProviderError::Cancelled) => return Err(StreamOutcome::Cancelled),
                Err(err) => return Err(StreamOutcome::Failed(err.to_string())),
            }
        }

        Ok(buffer)
    }
}

enum StreamOutcome {
    Cancelled,
    Failed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(content: &str) -> Message {
        Message::user(content)
    }

    #[test]
    fn compaction_preserves_system_and_task_under_budget() {
        let mut messages = vec![
            Message::system("sys"),
            msg("task"),
            msg(&"x".repeat(4000)),
            msg(&"y".repeat(4000)),
            msg(&"z".repeat(4000)),
            msg("latest"),
        ];
        compact_context(&mut messages, 100);
        assert_eq!(messages[0].content, "sys");
        assert_eq!(messages[1].content, "task");
        assert!(messages.len() < 6);
    }

    #[test]
    fn compaction_leaves_small_transcripts_untouched() {
        let mut messages = vec![Message::system("sys"), msg("task"), msg("short reply")];
        compact_context(&mut messages, 1000);
        assert_eq!(messages.len(), 3);
    }

    #[test]
    fn compaction_stops_once_only_system_and_task_remain() {
        let mut messages = vec![
            Message::system("sys"),
            msg(&"a".repeat(40_000)),
            msg(&"b".repeat(40_000)),
            msg(&"c".repeat(40_000)),
        ];
        compact_context(&mut messages, 1);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "sys");
    }

    #[tokio::test]
    async fn stub_provider_run_surfaces_provider_error() {
        use nightfall_core::types::{AgentState, Role as CoreRole};
        use nightfall_harness::provider::StubProvider;

        let provider: Arc<dyn CompletionProvider> = Arc::new(StubProvider::new("local"));
        let tools = Arc::new(ToolRegistry::new());
        let agent_loop = AgentLoop::new(CoreRole::Engineer, "engineer-1", provider, tools, 32_000);
        let shutdown = ShutdownSignal::new();
        let mut state = AgentState::new("engineer-1", CoreRole::Engineer);

        let dir = tempfile::tempdir().unwrap();
        let outcome = agent_loop
            .run(dir.path(), "do a thing", None, &shutdown, &mut state, |_| {})
            .await;

        assert!(matches!(outcome, AgentLoopOutcome::ProviderError(_)));
        assert_eq!(state.status, AgentStatus::Error);
    }

    #[tokio::test]
    async fn cancellation_before_first_turn_returns_cancelled() {
        use nightfall_core::types::{AgentState, Role as CoreRole};
        use nightfall_harness::provider::StubProvider;

        let provider: Arc<dyn CompletionProvider> = Arc::new(StubProvider::new("local"));
        let tools = Arc::new(ToolRegistry::new());
        let agent_loop = AgentLoop::new(CoreRole::Engineer, "engineer-1", provider, tools, 32_000);
        let shutdown = ShutdownSignal::new();
        shutdown.trigger();
        let mut state = AgentState::new("engineer-1", CoreRole::Engineer);

        let dir = tempfile::tempdir().unwrap();
        let outcome = agent_loop
            .run(dir.path(), "do a thing", None, &shutdown, &mut state, |_| {})
            .await;

        assert!(matches!(outcome, AgentLoopOutcome::Cancelled));
    }
}
