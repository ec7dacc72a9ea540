//! Tagged-block extraction and typed-result parsing from LLM text (C5).
//!
//! Model output is plain prose interspersed with at most one tagged block
//! per turn — either a tool call or a done signal. This module never
//! chooses between them; the agent loop looks for a tool-call block first
//! and falls back to a done block, per spec.md §4.4 step 3e/3f.

use nightfall_core::types::{
    DoneSignal, PlanComplexity, ReviewIssue, ReviewResult, Subtask, TaskPlan, ToolCall,
};

/// Find the body of the first `<tag>...</tag>` block in `text`, if any.
fn extract_block<'a>(text: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = text.find(&open)? + open.len();
    let end = text[start..].find(&close)? + start;
    Some(text[start..end].trim())
}

/// Parse the first `<tool_call>` block in `text`, if present and well-formed.
///
/// Returns `None` when the tag is missing, the body is not a JSON object, or
/// `tool` is missing/non-string. A missing or non-object `parameters`
/// normalizes to `{}`.
pub fn parse_tool_call(text: &str) -> Option<ToolCall> {
    let body = extract_block(text, "tool_call")?;
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let obj = value.as_object()?;
    let tool = obj.get("tool")?.as_str()?.to_string();
    let parameters = obj
        .get("parameters")
        .filter(|v| v.is_object())
        .cloned()
        .unwrap_or_else(|| serde_json::json!({}));
    Some(ToolCall { tool, parameters })
}

/// Parse the first `<done>` block in `text`, if present.
///
/// - A single-field `{"summary": "..."}` object is the legacy format and
///   returns that string verbatim.
/// - Any other well-formed JSON returns its raw text as the summary, so
///   callers can re-parse per role (plan/review/engineer) without double
///   encoding.
/// - Non-JSON bodies return the raw text as the summary.
/// - Returns `None` only when no `<done>` block is present at all.
pub fn parse_done(text: &str) -> Option<DoneSignal> {
    let body = extract_block(text, "done")?;
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(serde_json::Value::Object(obj)) if obj.len() == 1 => {
            if let Some(serde_json::Value::String(summary)) = obj.get("summary") {
                return Some(DoneSignal {
                    summary: summary.clone(),
                    blocked: false,
                });
            }
            Some(DoneSignal {
                summary: body.to_string(),
                blocked: is_blocked(&serde_json::Value::Object(obj)),
            })
        }
        Ok(value) => Some(DoneSignal {
            summary: body.to_string(),
            blocked: is_blocked(&value),
        }),
        Err(_) => Some(DoneSignal {
            summary: body.to_string(),
            blocked: false,
        }),
    }
}

fn is_blocked(value: &serde_json::Value) -> bool {
    value.get("confidence").and_then(|v| v.as_str()) == Some("blocked")
}

/// Parse a planner's done-summary text into a [`TaskPlan`].
///
/// Falls back to a single subtask carrying `prompt` verbatim when the
/// summary is missing the expected shape. `estimated_engineers` is capped at
/// `max_engineers`.
pub fn parse_plan(summary: &str, prompt: &str, max_engineers: u32) -> TaskPlan {
    let mut plan = serde_json::from_str::<RawPlan>(summary)
        .ok()
        .map(RawPlan::into_task_plan)
        .filter(|plan| !plan.subtasks.is_empty())
        .unwrap_or_else(|| TaskPlan::fallback(prompt));

    if plan.estimated_engineers > max_engineers {
        plan.estimated_engineers = max_engineers;
    }
    plan
}

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPlan {
    #[serde(default)]
    subtasks: Vec<Subtask>,
    #[serde(default)]
    complexity: Option<PlanComplexity>,
    #[serde(default)]
    estimated_engineers: Option<u32>,
}

impl RawPlan {
    fn into_task_plan(self) -> TaskPlan {
        TaskPlan {
            subtasks: self.subtasks,
            complexity: self.complexity.unwrap_or(PlanComplexity::Simple),
            estimated_engineers: self.estimated_engineers.unwrap_or(1),
        }
    }
}

/// Parse a reviewer's done-summary text into a [`ReviewResult`].
///
/// Unparseable summaries are treated as a lenient pass, carrying the raw
/// text forward as `notes` so a human can still read what the reviewer said.
pub fn parse_review(summary: &str) -> ReviewResult {
    match serde_json::from_str::<RawReview>(summary) {
        Ok(raw) => ReviewResult {
            passed: raw.passed,
            issues: raw.issues.into_iter().map(RawIssue::into_issue).collect(),
            notes: raw.notes,
        },
        Err(_) => ReviewResult {
            passed: true,
            issues: Vec::new(),
            notes: Some(summary.to_string()),
        },
    }
}

#[derive(Debug, serde::Deserialize)]
struct RawReview {
    passed: bool,
    #[serde(default)]
    issues: Vec<RawIssue>,
    #[serde(default)]
    notes: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
#[serde(untagged)]
enum RawIssue {
    Plain(String),
    Structured {
        description: String,
        #[serde(default)]
        evidence: Option<String>,
    },
}

impl RawIssue {
    fn into_issue(self) -> ReviewIssue {
        match self {
            RawIssue::Plain(description) => ReviewIssue {
                description,
                evidence: None,
            },
            RawIssue::Structured {
                description,
                evidence,
            } => ReviewIssue {
                description,
                evidence,
            },
        }
    }
}
