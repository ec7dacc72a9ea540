//! Tool Registry (C1): maps a tool name to its implementation and enforces
//! per-role permissions. Concrete tool bodies are filesystem/subprocess
//! adapters — the registry itself never inspects their parameters beyond
//! shape validation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use nightfall_core::types::{Role, ToolCall, ToolResult};
use tokio::io::AsyncReadExt;
use tokio::process::Command;

use crate::security::resolve_within_root;

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("role {role} is not permitted to use tool `{tool}`")]
    PermissionDenied { role: Role, tool: String },
    #[error("unknown tool `{0}`")]
    UnknownTool(String),
}

// ---------------------------------------------------------------------------
// Descriptors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub param_type: &'static str,
    pub required: bool,
    pub description: &'static str,
}

#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: &'static [(&'static str, ParamSpec)],
}

impl ToolDescriptor {
    /// Render for inclusion in a system prompt, advertising this tool's
    /// name, purpose, and parameter shape to the model.
    pub fn render(&self) -> String {
        let mut params = String::new();
        for (name, spec) in self.parameters {
            let required = if spec.required { "required" } else { "optional" };
            params.push_str(&format!(
                "\n  - {name} ({}, {required}): {}",
                spec.param_type, spec.description
            ));
        }
        format!("{}: {}{}", self.name, self.description, params)
    }
}

// ---------------------------------------------------------------------------
// Execution context
// ---------------------------------------------------------------------------

pub struct ToolContext {
    pub project_root: PathBuf,
    pub agent_id: String,
    pub role: Role,
    pub locks: Option<nightfall_core::locks::LockRegistry>,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

const ALL_TOOL_NAMES: &[&str] = &[
    "read_file",
    "write_diff",
    "write_file",
    "list_files",
    "search_files",
    "run_command",
    "read_memory",
    "write_memory",
    "update_index",
    "assign_task",
    "request_review",
];

fn allowed_tools_for(role: Role) -> &'static [&'static str] {
    match role {
        Role::Planner => &["read_file", "list_files", "search_files", "assign_task"],
        Role::Engineer => &[
            "read_file",
            "write_diff",
            "write_file",
            "list_files",
            "search_files",
            "run_command",
            "request_review",
        ],
        Role::Reviewer => &["read_file", "list_files", "search_files", "run_command"],
        Role::MemoryManager => &["read_memory", "write_memory", "update_index", "read_file"],
        Role::Classifier => &["read_file"],
        Role::Responder => &["read_file", "list_files", "search_files"],
    }
}

/// Static tool registry with per-role permission enforcement.
///
/// Tools are pure adapters invoked through [`ToolRegistry::execute`]; the
/// registry never inspects their parameters beyond the permission and
/// existence checks that produce [`ToolError`].
#[derive(Default)]
pub struct ToolRegistry;

impl ToolRegistry {
    pub fn new() -> Self {
        Self
    }

    pub fn descriptors_for(&self, role: Role) -> Vec<ToolDescriptor> {
        allowed_tools_for(role)
            .iter()
            .filter_map(|name| descriptor(name))
            .collect()
    }

    /// Validate permission, dispatch, and always return a [`ToolResult`] —
    /// execution failures (bad path, subprocess error, ...) are returned as
    /// `{success: false, error}` rather than propagated, per spec.md §7.
    /// Only permission/registration failures raise [`ToolError`].
    pub async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        if !ALL_TOOL_NAMES.contains(&call.tool.as_str()) {
            return Err(ToolError::UnknownTool(call.tool.clone()));
        }
        if !allowed_tools_for(ctx.role).contains(&call.tool.as_str()) {
            return Err(ToolError::PermissionDenied {
                role: ctx.role,
                tool: call.tool.clone(),
            });
        }

        let result = match call.tool.as_str() {
            "read_file" => read_file(&call.parameters, ctx),
            "write_diff" => write_diff(&call.parameters, ctx).await,
            "write_file" => write_file(&call.parameters, ctx),
            "list_files" => list_files(&call.parameters, ctx),
            "search_files" => search_files(&call.parameters, ctx),
            "run_command" => run_command(&call.parameters, ctx).await,
            "read_memory" => read_memory(&call.parameters, ctx),
            "write_memory" => write_memory(&call.parameters, ctx),
            "update_index" => update_index(&call.parameters, ctx),
            "assign_task" | "request_review" => protocol_passthrough(&call.tool, &call.parameters),
            other => return Err(ToolError::UnknownTool(other.to_string())),
        };
        Ok(result)
    }
}

fn descriptor(name: &str) -> Option<ToolDescriptor> {
    const P_PATH: ParamSpec = ParamSpec {
        param_type: "string",
        required: true,
        description: "path relative to the project root",
    };

    match name {
        "read_file" => Some(ToolDescriptor {
            name: "read_file",
            description: "read a whole file, a 1-based inclusive line range, or a named symbol block",
            parameters: &[
                ("path", P_PATH),
                ("startLine", ParamSpec { param_type: "number", required: false, description: "first line (1-based, inclusive)" }),
                ("endLine", ParamSpec { param_type: "number", required: false, description: "last line (1-based, inclusive)" }),
                ("symbol", ParamSpec { param_type: "string", required: false, description: "symbol name to extract" }),
            ],
        }),
        "write_diff" => Some(ToolDescriptor {
            name: "write_diff",
            description: "apply a unified diff patch atomically, holding the file lock",
            parameters: &[
                ("path", P_PATH),
                ("diff", ParamSpec { param_type: "string", required: true, description: "unified diff text" }),
            ],
        }),
        "write_file" => Some(ToolDescriptor {
            name: "write_file",
            description: "create or overwrite a file, creating parent directories as needed",
            parameters: &[
                ("path", P_PATH),
                ("content", ParamSpec { param_type: "string", required: true, description: "full file contents" }),
            ],
        }),
        "list_files" => Some(ToolDescriptor {
            name: "list_files",
            description: "recursively list files, skipping node_modules/.git/dist/.nightfall",
            parameters: &[
                ("dir", ParamSpec { param_type: "string", required: false, description: "subdirectory to list" }),
                ("extension", ParamSpec { param_type: "string", required: false, description: "filter by file extension" }),
            ],
        }),
        "search_files" => Some(ToolDescriptor {
            name: "search_files",
            description: "recursively search file contents for a substring pattern",
            parameters: &[
                ("pattern", ParamSpec { param_type: "string", required: true, description: "substring to search for" }),
                ("dir", ParamSpec { param_type: "string", required: false, description: "subdirectory to search" }),
                ("extension", ParamSpec { param_type: "string", required: false, description: "filter by file extension" }),
            ],
        }),
        "run_command" => Some(ToolDescriptor {
            name: "run_command",
            description: "run a shell command, capped at 120s, output truncated to 8000 chars",
            parameters: &[
                ("command", ParamSpec { param_type: "string", required: true, description: "shell command line" }),
                ("cwd", ParamSpec { param_type: "string", required: false, description: "working directory relative to project root" }),
                ("timeoutMs", ParamSpec { param_type: "number", required: false, description: "timeout in milliseconds, default 30000, max 120000" }),
            ],
        }),
        "read_memory" => Some(ToolDescriptor {
            name: "read_memory",
            description: "read a file under .nightfall/memory/",
            parameters: &[("path", P_PATH)],
        }),
        "write_memory" => Some(ToolDescriptor {
            name: "write_memory",
            description: "write a file under .nightfall/memory/",
            parameters: &[
                ("path", P_PATH),
                ("content", ParamSpec { param_type: "string", required: true, description: "full file contents" }),
            ],
        }),
        "update_index" => Some(ToolDescriptor {
            name: "update_index",
            description: "overwrite .nightfall/memory/index.md",
            parameters: &[("content", ParamSpec { param_type: "string", required: true, description: "full index.md contents" })],
        }),
        "assign_task" => Some(ToolDescriptor {
            name: "assign_task",
            description: "planner-only: signal subtask assignment to the orchestrator",
            parameters: &[],
        }),
        "request_review" => Some(ToolDescriptor {
            name: "request_review",
            description: "engineer-only: signal that a subtask is ready for review",
            parameters: &[],
        }),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Concrete tools
// ---------------------------------------------------------------------------

const SKIPPED_DIRS: &[&str] = &["node_modules", ".git", "dist", ".nightfall"];
const MAX_WALK_ENTRIES: usize = 500;
const MAX_SEARCH_MATCHES: usize = 50;
const MAX_FILE_BYTES: u64 = 500 * 1024;
const MAX_COMMAND_OUTPUT: usize = 8000;
const COMMAND_HEAD: usize = 2000;
const COMMAND_TAIL: usize = 6000;
const DEFAULT_TIMEOUT_MS: u64 = 30_000;
const MAX_TIMEOUT_MS: u64 = 120_000;

fn str_param<'a>(params: &'a serde_json::Value, name: &str) -> Option<&'a str> {
    params.get(name).and_then(|v| v.as_str())
}

fn resolve(ctx: &ToolContext, path: &str) -> Result<PathBuf, ToolResult> {
    resolve_within_root(&ctx.project_root, path)
        .map_err(|e| ToolResult::err(format!("PathEscape: {e}")))
}

fn read_file(params: &serde_json::Value, ctx: &ToolContext) -> ToolResult {
    let Some(path) = str_param(params, "path") else {
        return ToolResult::err("missing required parameter `path`");
    };
    let resolved = match resolve(ctx, path) {
        Ok(p) => p,
        Err(e) => return e,
    };
    let content = match std::fs::read_to_string(&resolved) {
        Ok(c) => c,
        Err(e) => return ToolResult::err(format!("read failed: {e}")),
    };

    if let Some(symbol) = str_param(params, "symbol") {
        return match extract_symbol(&content, symbol) {
            Some(block) => ToolResult::ok(serde_json::json!({ "content": block })),
            None => ToolResult::err(format!("symbol `{symbol}` not found")),
        };
    }

    let start = params.get("startLine").and_then(|v| v.as_u64());
    let end = params.get("endLine").and_then(|v| v.as_u64());
    if let (Some(start), Some(end)) = (start, end) {
        let lines: Vec<&str> = content.lines().collect();
        let start_idx = start.saturating_sub(1) as usize;
        let end_idx = (end as usize).min(lines.len());
        if start_idx >= lines.len() || start_idx >= end_idx {
            return ToolResult::err("line range out of bounds");
        }
        return ToolResult::ok(serde_json::json!({ "content": lines[start_idx..end_idx].join("\n") }));
    }

    ToolResult::ok(serde_json::json!({ "content": content }))
}

/// Extract a bracket-matched block for a named class/function/interface
/// declaration: find the symbol name, then its first `{`, then the matching
/// `}` accounting for nested braces.
fn extract_symbol(content: &str, symbol: &str) -> Option<String> {
    let decl_idx = content
        .lines()
        .scan(0usize, |offset, line| {
            let start = *offset;
            *offset += line.len() + 1;
            Some((start, line))
        })
        .find(|(_, line)| {
            line.contains(symbol)
                && (line.contains("fn ")
                    || line.contains("class ")
                    || line.contains("interface ")
                    || line.contains("struct ")
                    || line.contains("enum ")
                    || line.contains("type "))
        })
        .map(|(start, _)| start)?;

    let brace_start = content[decl_idx..].find('{')? + decl_idx;
    let mut depth = 0i32;
    for (i, ch) in content[brace_start..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(content[decl_idx..brace_start + i + 1].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

fn write_file(params: &serde_json::Value, ctx: &ToolContext) -> ToolResult {
    let (Some(path), Some(content)) = (str_param(params, "path"), str_param(params, "content"))
    else {
        return ToolResult::err("missing required parameter `path` or `content`");
    };
    let resolved = match resolve(ctx, path) {
        Ok(p) => p,
        Err(e) => return e,
    };
    if let Some(parent) = resolved.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            return ToolResult::err(format!("mkdir failed: {e}"));
        }
    }
    match std::fs::write(&resolved, content) {
        Ok(()) => ToolResult::ok(serde_json::json!({ "path": path })),
        Err(e) => ToolResult::err(format!("write failed: {e}")),
    }
}

async fn write_diff(params: &serde_json::Value, ctx: &ToolContext) -> ToolResult {
    let (Some(path), Some(diff)) = (str_param(params, "path"), str_param(params, "diff")) else {
        return ToolResult::err("missing required parameter `path` or `diff`");
    };
    let resolved = match resolve(ctx, path) {
        Ok(p) => p,
        Err(e) => return e,
    };

    if let Some(locks) = &ctx.locks {
        locks.acquire(path, &ctx.agent_id).await;
    }
    let result = apply_patch(&resolved, diff);
    if let Some(locks) = &ctx.locks {
        let _ = locks.release(path, &ctx.agent_id).await;
    }

    match result {
        Ok(()) => ToolResult::ok(serde_json::json!({ "path": path })),
        Err(e) => ToolResult::err(format!("patch failed: {e}")),
    }
}

/// Apply a minimal unified diff (single-file, `@@ -a,b +c,d @@` hunks) to the
/// file at `path`, writing the result back atomically via a temp-file swap.
fn apply_patch(path: &Path, diff: &str) -> Result<(), String> {
    let original = std::fs::read_to_string(path).unwrap_or_default();
    let original_lines: Vec<&str> = original.lines().collect();
    let mut output: Vec<String> = Vec::new();
    let mut cursor = 0usize;

    let mut lines = diff.lines().peekable();
    while let Some(line) = lines.next() {
        if !line.starts_with("@@") {
            continue;
        }
        let old_start = parse_hunk_start(line).ok_or_else(|| "malformed hunk header".to_string())?;
        while cursor < old_start.saturating_sub(1) && cursor < original_lines.len() {
            output.push(original_lines[cursor].to_string());
            cursor += 1;
        }
        while let Some(&body) = lines.peek() {
            if body.starts_with("@@") {
                break;
            }
            lines.next();
            if let Some(added) = body.strip_prefix('+') {
                output.push(added.to_string());
            } else if body.starts_with('-') {
                cursor += 1;
            } else {
                let context = body.strip_prefix(' ').unwrap_or(body);
                output.push(context.to_string());
                cursor += 1;
            }
        }
    }
    while cursor < original_lines.len() {
        output.push(original_lines[cursor].to_string());
        cursor += 1;
    }

    let mut text = output.join("\n");
    if original.ends_with('\n') || original.is_empty() {
        text.push('\n');
    }

    let tmp = path.with_extension("nightfall-tmp");
    std::fs::write(&tmp, text).map_err(|e| e.to_string())?;
    std::fs::rename(&tmp, path).map_err(|e| e.to_string())
}

fn parse_hunk_start(header: &str) -> Option<usize> {
    let old_part = header.split_whitespace().nth(1)?; // "-a,b"
    let digits = old_part.trim_start_matches('-').split(',').next()?;
    digits.parse().ok()
}

fn list_files(params: &serde_json::Value, ctx: &ToolContext) -> ToolResult {
    let dir = str_param(params, "dir").unwrap_or(".");
    let extension = str_param(params, "extension");
    let root = match resolve(ctx, dir) {
        Ok(p) => p,
        Err(e) => return e,
    };

    let mut out = Vec::new();
    walk(&root, &ctx.project_root, extension, &mut |rel, _| {
        out.push(rel);
    });
    ToolResult::ok(serde_json::json!({ "files": out }))
}

fn search_files(params: &serde_json::Value, ctx: &ToolContext) -> ToolResult {
    let Some(pattern) = str_param(params, "pattern") else {
        return ToolResult::err("missing required parameter `pattern`");
    };
    let dir = str_param(params, "dir").unwrap_or(".");
    let extension = str_param(params, "extension");
    let root = match resolve(ctx, dir) {
        Ok(p) => p,
        Err(e) => return e,
    };

    let mut matches = Vec::new();
    walk(&root, &ctx.project_root, extension, &mut |rel, full| {
        if matches.len() >= MAX_SEARCH_MATCHES {
            return;
        }
        if let Ok(meta) = std::fs::metadata(full) {
            if meta.len() > MAX_FILE_BYTES {
                return;
            }
        }
        if let Ok(content) = std::fs::read_to_string(full) {
            if content.contains(pattern) {
                matches.push(rel);
            }
        }
    });
    ToolResult::ok(serde_json::json!({ "matches": matches }))
}

/// Recursive walk capped at [`MAX_WALK_ENTRIES`], skipping [`SKIPPED_DIRS`].
/// `visit` receives the path relative to the project root and the absolute
/// path, and may stop contributing once it has enough results.
fn walk(dir: &Path, project_root: &Path, extension: Option<&str>, visit: &mut dyn FnMut(String, &Path)) {
    let mut stack = vec![dir.to_path_buf()];
    let mut visited = 0usize;

    while let Some(current) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&current) else {
            continue;
        };
        for entry in entries.flatten() {
            if visited >= MAX_WALK_ENTRIES {
                return;
            }
            let path = entry.path();
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if path.is_dir() {
                if !SKIPPED_DIRS.contains(&name.as_ref()) {
                    stack.push(path);
                }
                continue;
            }
            if let Some(ext) = extension {
                if path.extension().and_then(|e| e.to_str()) != Some(ext.trim_start_matches('.')) {
                    continue;
                }
            }
            let rel = path
                .strip_prefix(project_root)
                .unwrap_or(&path)
                .to_string_lossy()
                .to_string();
            visited += 1;
            visit(rel, &path);
        }
    }
}

async fn run_command(params: &serde_json::Value, ctx: &ToolContext) -> ToolResult {
    let Some(command) = str_param(params, "command") else {
        return ToolResult::err("missing required parameter `command`");
    };
    let cwd = str_param(params, "cwd").unwrap_or(".");
    let cwd = match resolve(ctx, cwd) {
        Ok(p) => p,
        Err(e) => return e,
    };
    let timeout_ms = params
        .get("timeoutMs")
        .and_then(|v| v.as_u64())
        .unwrap_or(DEFAULT_TIMEOUT_MS)
        .min(MAX_TIMEOUT_MS);

    if timeout_ms == 0 {
        return ToolResult::err("Aborted before execution");
    }

    let mut child = match Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(&cwd)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
    {
        Ok(c) => c,
        Err(e) => return ToolResult::err(format!("spawn failed: {e}")),
    };

    let mut stdout = child.stdout.take().expect("piped stdout");
    let mut stderr = child.stderr.take().expect("piped stderr");

    let collect = async {
        let mut out = String::new();
        let mut err = String::new();
        let _ = stdout.read_to_string(&mut out).await;
        let _ = stderr.read_to_string(&mut err).await;
        let status = child.wait().await;
        (out, err, status)
    };

    match tokio::time::timeout(Duration::from_millis(timeout_ms), collect).await {
        Ok((out, err, status)) => {
            let combined = format!("{out}{err}");
            let truncated = truncate_output(&combined);
            let success = status.map(|s| s.success()).unwrap_or(false);
            if success {
                ToolResult::ok(serde_json::json!({ "output": truncated }))
            } else {
                ToolResult::err(truncated)
            }
        }
        Err(_) => ToolResult::err("command timed out"),
    }
}

fn truncate_output(combined: &str) -> String {
    if combined.len() <= MAX_COMMAND_OUTPUT {
        return combined.to_string();
    }
    let head: String = combined.chars().take(COMMAND_HEAD).collect();
    let tail_start = combined.len().saturating_sub(COMMAND_TAIL);
    let tail = &combined[tail_start..];
    format!("{head}\n... [output truncated] ...\n{tail}")
}

fn memory_path(ctx: &ToolContext, rel: &str) -> Result<PathBuf, ToolResult> {
    resolve(ctx, &format!(".nightfall/memory/{rel}"))
}

fn read_memory(params: &serde_json::Value, ctx: &ToolContext) -> ToolResult {
    let Some(path) = str_param(params, "path") else {
        return ToolResult::err("missing required parameter `path`");
    };
    let resolved = match memory_path(ctx, path) {
        Ok(p) => p,
        Err(e) => return e,
    };
    match std::fs::read_to_string(&resolved) {
        Ok(content) => ToolResult::ok(serde_json::json!({ "content": content })),
        Err(e) => ToolResult::err(format!("read failed: {e}")),
    }
}

fn write_memory(params: &serde_json::Value, ctx: &ToolContext) -> ToolResult {
    let (Some(path), Some(content)) = (str_param(params, "path"), str_param(params, "content"))
    else {
        return ToolResult::err("missing required parameter `path` or `content`");
    };
    let resolved = match memory_path(ctx, path) {
        Ok(p) => p,
        Err(e) => return e,
    };
    if let Some(parent) = resolved.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            return ToolResult::err(format!("mkdir failed: {e}"));
        }
    }
    match std::fs::write(&resolved, content) {
        Ok(()) => ToolResult::ok(serde_json::json!({ "path": path })),
        Err(e) => ToolResult::err(format!("write failed: {e}")),
    }
}

fn update_index(params: &serde_json::Value, ctx: &ToolContext) -> ToolResult {
    let Some(content) = str_param(params, "content") else {
        return ToolResult::err("missing required parameter `content`");
    };
    write_memory(&serde_json::json!({ "path": "index.md", "content": content }), ctx)
}

/// `assign_task`/`request_review` are protocol signals, not filesystem
/// operations — they're acknowledged here and interpreted by the
/// orchestrator from the agent loop's tool-call log, not from this result.
fn protocol_passthrough(tool: &str, parameters: &serde_json::Value) -> ToolResult {
    ToolResult::ok(serde_json::json!({ "acknowledged": tool, "parameters": parameters }))
}
