//! Task Log (C7): append-only JSON persistence of completed task runs with
//! retention pruning. Grounded on the teacher's validate-then-write
//! settings-file convention, applied to one file per run instead of a
//! single config file.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use nightfall_core::types::TaskRun;

#[derive(Debug, thiserror::Error)]
pub enum TaskLogError {
    #[error("io: {0}")]
    Io(String),
    #[error("serialize: {0}")]
    Serialize(String),
}

fn logs_dir(project_root: &Path) -> PathBuf {
    project_root.join(".nightfall").join("logs")
}

/// Lowercase the prompt, replace non-alphanumerics with `-`, collapse
/// repeated dashes, trim to 50 chars, and strip leading/trailing dashes.
fn slugify(prompt: &str) -> String {
    let mut slug = String::with_capacity(prompt.len());
    let mut last_was_dash = false;
    for ch in prompt.to_lowercase().chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch);
            last_was_dash = false;
        } else if !last_was_dash {
            slug.push('-');
            last_was_dash = true;
        }
    }
    let slug = slug.trim_matches('-');
    slug.chars().take(50).collect()
}

fn log_filename(run: &TaskRun) -> String {
    let timestamp = run.created_at.to_rfc3339();
    format!("{timestamp}_{}.json", slugify(&run.prompt))
}

/// Write `run` to `<project>/.nightfall/logs/<iso>_<slug>.json`, creating
/// the directory if needed.
pub fn write_log(project_root: &Path, run: &TaskRun) -> Result<PathBuf, TaskLogError> {
    let dir = logs_dir(project_root);
    std::fs::create_dir_all(&dir).map_err(|e| TaskLogError::Io(e.to_string()))?;
    let path = dir.join(log_filename(run));
    let body = serde_json::to_vec_pretty(run).map_err(|e| TaskLogError::Serialize(e.to_string()))?;
    std::fs::write(&path, body).map_err(|e| TaskLogError::Io(e.to_string()))?;
    Ok(path)
}

/// Read every parseable `*.json` file under the logs directory, sorted by
/// `startedAt` (`created_at`) descending. Unparseable files are skipped.
pub fn list_logs(project_root: &Path) -> Result<Vec<TaskRun>, TaskLogError> {
    let dir = logs_dir(project_root);
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut runs: Vec<TaskRun> = Vec::new();
    for entry in std::fs::read_dir(&dir).map_err(|e| TaskLogError::Io(e.to_string()))? {
        let entry = entry.map_err(|e| TaskLogError::Io(e.to_string()))?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let Ok(text) = std::fs::read_to_string(&path) else {
            continue;
        };
        if let Ok(run) = serde_json::from_str::<TaskRun>(&text) {
            runs.push(run);
        }
    }
    runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(runs)
}

/// Keep the newest `max` log files by filename (monotonic thanks to the ISO
/// prefix), deleting the rest. Returns the number of files removed.
pub fn prune_old_logs(project_root: &Path, max: usize) -> Result<usize, TaskLogError> {
    let dir = logs_dir(project_root);
    if !dir.exists() {
        return Ok(0);
    }
    let mut files: Vec<PathBuf> = std::fs::read_dir(&dir)
        .map_err(|e| TaskLogError::Io(e.to_string()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
        .collect();
    files.sort();
    files.reverse();

    let mut removed = 0;
    for path in files.into_iter().skip(max) {
        if std::fs::remove_file(&path).is_ok() {
            removed += 1;
        }
    }
    Ok(removed)
}

#[allow(dead_code)]
fn parse_started_at(run: &TaskRun) -> DateTime<Utc> {
    run.created_at
}
