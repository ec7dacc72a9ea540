//! Per-role system prompts and system-prompt composition.
//!
//! Each of the six roles gets a fixed base prompt describing its
//! responsibilities and constraints; [`compose_system_prompt`] appends the
//! role's tool descriptors and the tagged-block protocol instructions the
//! same way a prompt template is rendered before being handed to a provider.

use nightfall_core::types::Role;
use nightfall_harness::tools::ToolDescriptor;

const PLANNER_PROMPT: &str = "\
You are the planner agent. Decompose the user's task into a dependency-ordered \
list of subtasks. Each subtask has an id, a description, and may list files it \
expects to touch, success criteria, constraints, and ids it depends on. \
Estimate how many engineers could work the plan in parallel.

You must NOT write code yourself. When you are done, emit a done block \
containing exactly this shape:
{\"subtasks\": [{\"id\", \"description\", \"files\"?, \"successCriteria\"?, \
\"constraints\"?, \"dependsOn\"?}], \"complexity\": \"simple\"|\"complex\", \
\"estimatedEngineers\": <number>}";

const ENGINEER_PROMPT: &str = "\
You are an engineer agent. You have been assigned one subtask of a larger \
plan. Implement it fully: read the files you need, write or patch the ones \
you must change, and run commands to verify your work. \
When finished, emit a done block:
{\"filesChanged\": [...], \"confidence\": \"high\"|\"low\"|\"blocked\"}
Set confidence to \"blocked\" only if you genuinely cannot make progress.";

const REVIEWER_PROMPT: &str = "\
You are the reviewer agent. You receive the original task, every engineer's \
done summary, and the union of files touched. Independently verify the work: \
re-read changed files, re-run tests, and check the subtasks' success criteria. \
When finished, emit a done block:
{\"passed\": bool, \"issues\": [ (string | {\"description\", \"evidence\"?}) ], \
\"notes\"?: string}
List every issue you find; do not pass work that does not meet its criteria.";

const MEMORY_MANAGER_PROMPT: &str = "\
You are the memory-manager agent. A task just passed review. Update the \
project's memory bank (project.md, tech.md, patterns.md, progress.md, and \
components/*.md) to reflect what changed, keeping index.md's entries and \
descriptions current. You may only read files and read/write memory files. \
When finished, emit a done block: {\"summary\": \"<what you recorded>\"}.";

const CLASSIFIER_PROMPT: &str = "\
You are the classifier agent. Read the user's message and decide, in a single \
turn, whether it is a task submission or a conversational question. Emit a \
done block: {\"summary\": \"task\"|\"chat\"}.";

const RESPONDER_PROMPT: &str = "\
You are the responder agent. Answer the user's conversational message \
directly and concisely, using read-only tools if you need project context. \
When finished, emit a done block: {\"summary\": \"<your answer>\"}.";

/// The fixed base prompt for a role, before tool descriptors and protocol
/// instructions are appended.
pub fn base_system_prompt(role: Role) -> &'static str {
    match role {
        Role::Planner => PLANNER_PROMPT,
        Role::Engineer => ENGINEER_PROMPT,
        Role::Reviewer => REVIEWER_PROMPT,
        Role::MemoryManager => MEMORY_MANAGER_PROMPT,
        Role::Classifier => CLASSIFIER_PROMPT,
        Role::Responder => RESPONDER_PROMPT,
    }
}

const PROTOCOL_INSTRUCTIONS: &str = "\
## Output protocol

On every turn, emit exactly one tagged block: either a tool call or a done \
signal. Prose around the block is fine and is recorded as your visible \
thought, but the parser only looks at the block.

To call a tool:
<tool_call>
{\"tool\": \"<name>\", \"parameters\": { ... }}
</tool_call>

To finish:
<done>
{ ... the JSON shape described above ... }
</done>";

/// Compose a role's final system prompt: base prompt, an override loaded
/// from `<project>/.nightfall/.agents/<role>.md` if present, available tool
/// descriptors, then the tagged-block protocol instructions (spec.md §4.4
/// step 1).
pub fn compose_system_prompt(role: Role, tools: &[ToolDescriptor], override_prompt: Option<&str>) -> String {
    let base = override_prompt.unwrap_or_else(|| base_system_prompt(role));
    let mut tool_list = String::new();
    if !tools.is_empty() {
        tool_list.push_str("\n\n## Available tools\n");
        for tool in tools {
            tool_list.push_str(&format!("- {}\n", tool.render()));
        }
    }
    format!("{base}{tool_list}\n\n{PROTOCOL_INSTRUCTIONS}")
}

/// Load a role's prompt override from `<project>/.nightfall/.agents/<role>.md`,
/// if present (spec.md §4.6 "Submission").
pub fn load_prompt_override(project_root: &std::path::Path, role: Role) -> Option<String> {
    let path = project_root
        .join(".nightfall")
        .join(".agents")
        .join(format!("{role}.md"));
    std::fs::read_to_string(path).ok()
}
