//! Command Dispatcher (C9): routes a slash command and its argument string
//! to a handler that returns a JSON-shaped payload.
//!
//! Grounded on the teacher's `name -> handler` command registry pattern,
//! flattened to a single `dispatch` match since Nightfall's command set is
//! fixed at compile time rather than plugin-registered.

use std::path::PathBuf;
use std::sync::Arc;

use nightfall_agents::task_log;
use nightfall_core::config::Config;
use nightfall_core::snapshot::SnapshotManager;
use nightfall_core::types::TaskRun;
use tokio::sync::RwLock;

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("unknown command: /{0}")]
    Unknown(String),
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),
    #[error("{0}")]
    Failed(String),
}

/// Shared state visible to command handlers: the daemon's config and the
/// task run currently tracked by the hub (if any).
#[derive(Clone)]
pub struct CommandState {
    pub project_root: PathBuf,
    pub config: Arc<RwLock<Config>>,
    pub current_run: Arc<RwLock<Option<TaskRun>>>,
}

impl CommandState {
    pub fn new(project_root: impl Into<PathBuf>, config: Config) -> Self {
        Self {
            project_root: project_root.into(),
            config: Arc::new(RwLock::new(config)),
            current_run: Arc::new(RwLock::new(None)),
        }
    }
}

/// Route `command` (without the leading `/`) and its raw argument string to
/// the matching handler.
pub async fn dispatch(
    state: &CommandState,
    command: &str,
    args: &str,
) -> Result<serde_json::Value, CommandError> {
    match command {
        "help" => Ok(help()),
        "init" => init(state, args).await,
        "status" => status(state).await,
        "config" => config_view(state).await,
        "history" => history(state, args).await,
        "agents" => agents(state).await,
        "memory" => memory(state).await,
        "compact" => Ok(serde_json::json!({
            "type": "compact_result",
            "message": "context compaction runs automatically inside each agent loop",
        })),
        "clear" => Err(CommandError::Failed(
            "/clear is handled client-side and never reaches the daemon".into(),
        )),
        "model" => model(state, args).await,
        "settings" => settings(state, args).await,
        other => Err(CommandError::Unknown(other.to_string())),
    }
}

fn help() -> serde_json::Value {
    serde_json::json!({
        "type": "help",
        "commands": [
            {"name": "help", "description": "list available commands"},
            {"name": "init", "description": "preview or confirm memory-bank initialization"},
            {"name": "status", "description": "show the active task, if any"},
            {"name": "config", "description": "show the current daemon configuration"},
            {"name": "history", "description": "list past task runs and snapshots; rollback <id> [confirm]"},
            {"name": "agents", "description": "show agent states for the active task"},
            {"name": "memory", "description": "list memory-bank entries"},
            {"name": "compact", "description": "context compaction status"},
            {"name": "clear", "description": "client-only: clear the local transcript"},
            {"name": "model", "description": "show or set the active model"},
            {"name": "settings", "description": "view or save daemon settings"},
        ],
    })
}

fn nightfall_dir(project_root: &std::path::Path) -> PathBuf {
    project_root.join(".nightfall")
}

async fn init(state: &CommandState, args: &str) -> Result<serde_json::Value, CommandError> {
    let dir = nightfall_dir(&state.project_root);
    let planned = ["logs", "snapshots", "memory", ".agents"];

    if args.trim() != "confirm" {
        let missing: Vec<&str> = planned
            .iter()
            .filter(|name| !dir.join(name).exists())
            .copied()
            .collect();
        return Ok(serde_json::json!({
            "type": "init_preview",
            "willCreate": missing,
        }));
    }

    let mut created = Vec::new();
    for name in planned {
        let path = dir.join(name);
        if !path.exists() {
            std::fs::create_dir_all(&path)
                .map_err(|e| CommandError::Failed(format!("creating {name}: {e}")))?;
            created.push(name.to_string());
        }
    }
    let config_path = Config::path_for(&state.project_root);
    if !config_path.exists() {
        std::fs::create_dir_all(&dir).map_err(|e| CommandError::Failed(e.to_string()))?;
        let body = serde_yaml::to_string(&Config::default())
            .map_err(|e| CommandError::Failed(e.to_string()))?;
        std::fs::write(&config_path, body).map_err(|e| CommandError::Failed(e.to_string()))?;
        created.push("config.yaml".to_string());
    }

    Ok(serde_json::json!({
        "type": "init_result",
        "created": created,
    }))
}

async fn status(state: &CommandState) -> Result<serde_json::Value, CommandError> {
    let run = state.current_run.read().await;
    Ok(serde_json::json!({
        "type": "status",
        "currentTask": run.as_ref(),
    }))
}

async fn config_view(state: &CommandState) -> Result<serde_json::Value, CommandError> {
    let config = state.config.read().await;
    Ok(serde_json::json!({
        "type": "config",
        "config": &*config,
    }))
}

async fn history(state: &CommandState, args: &str) -> Result<serde_json::Value, CommandError> {
    let args = args.trim();
    if let Some(rest) = args.strip_prefix("rollback") {
        return rollback(state, rest.trim()).await;
    }
    if !args.is_empty() {
        return Err(CommandError::InvalidArgs(format!(
            "unrecognized /history argument: {args}"
        )));
    }

    let runs =
        task_log::list_logs(&state.project_root).map_err(|e| CommandError::Failed(e.to_string()))?;
    let snapshots = SnapshotManager::new(&state.project_root)
        .list_snapshots()
        .map_err(|e| CommandError::Failed(e.to_string()))?;

    Ok(serde_json::json!({
        "type": "history_view",
        "runs": runs,
        "snapshots": snapshots,
    }))
}

async fn rollback(state: &CommandState, rest: &str) -> Result<serde_json::Value, CommandError> {
    let mut parts = rest.split_whitespace();
    let id = parts
        .next()
        .ok_or_else(|| CommandError::InvalidArgs("usage: rollback <id> [confirm]".into()))?;
    let confirm = parts.next() == Some("confirm");

    let mgr = SnapshotManager::new(&state.project_root);
    let chain = mgr
        .get_rollback_chain(id)
        .map_err(|e| CommandError::Failed(e.to_string()))?;

    if !confirm {
        return Ok(serde_json::json!({
            "type": "rollback_confirm",
            "chain": chain,
            "snapshotId": id,
        }));
    }

    let restored = mgr
        .rollback(id)
        .map_err(|e| CommandError::Failed(e.to_string()))?;
    Ok(serde_json::json!({
        "type": "rollback_result",
        "restored": restored,
    }))
}

async fn agents(state: &CommandState) -> Result<serde_json::Value, CommandError> {
    let run = state.current_run.read().await;
    let agents: Vec<_> = run
        .as_ref()
        .map(|r| r.agent_states.values().collect::<Vec<_>>())
        .unwrap_or_default();
    Ok(serde_json::json!({
        "type": "agents",
        "agents": agents,
    }))
}

async fn memory(state: &CommandState) -> Result<serde_json::Value, CommandError> {
    let dir = nightfall_dir(&state.project_root).join("memory");
    if !dir.exists() {
        return Ok(serde_json::json!({"type": "memory", "entries": []}));
    }
    let mut entries = Vec::new();
    let read_dir = std::fs::read_dir(&dir).map_err(|e| CommandError::Failed(e.to_string()))?;
    for entry in read_dir {
        let entry = entry.map_err(|e| CommandError::Failed(e.to_string()))?;
        if let Some(name) = entry.file_name().to_str() {
            entries.push(name.to_string());
        }
    }
    entries.sort();
    Ok(serde_json::json!({"type": "memory", "entries": entries}))
}

async fn model(state: &CommandState, args: &str) -> Result<serde_json::Value, CommandError> {
    let args = args.trim();
    if args.is_empty() {
        let config = state.config.read().await;
        return Ok(serde_json::json!({
            "type": "model_picker",
            "current": config.provider.model,
            "provider": config.provider.name,
        }));
    }

    let mut config = state.config.write().await;
    config.provider.model = Some(args.to_string());
    save_config(&state.project_root, &config)?;
    Ok(serde_json::json!({
        "type": "model_saved",
        "model": args,
    }))
}

async fn settings(state: &CommandState, args: &str) -> Result<serde_json::Value, CommandError> {
    let args = args.trim();
    if args.is_empty() {
        let config = state.config.read().await;
        return Ok(serde_json::json!({
            "type": "settings_view",
            "config": &*config,
        }));
    }

    let parsed: Config = serde_json::from_str(args)
        .map_err(|e| CommandError::InvalidArgs(format!("invalid settings JSON: {e}")))?;
    parsed
        .validate()
        .map_err(|e| CommandError::InvalidArgs(e.to_string()))?;

    let mut config = state.config.write().await;
    *config = parsed;
    save_config(&state.project_root, &config)?;
    Ok(serde_json::json!({
        "type": "settings_saved",
        "config": &*config,
    }))
}

fn save_config(project_root: &std::path::Path, config: &Config) -> Result<(), CommandError> {
    let path = Config::path_for(project_root);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| CommandError::Failed(e.to_string()))?;
    }
    let body = serde_yaml::to_string(config).map_err(|e| CommandError::Failed(e.to_string()))?;
    std::fs::write(&path, body).map_err(|e| CommandError::Failed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(dir: &std::path::Path) -> CommandState {
        CommandState::new(dir, Config::default())
    }

    #[tokio::test]
    async fn help_lists_all_commands() {
        let dir = tempfile::tempdir().unwrap();
        let st = state(dir.path());
        let out = dispatch(&st, "help", "").await.unwrap();
        assert_eq!(out["commands"].as_array().unwrap().len(), 11);
    }

    #[tokio::test]
    async fn unknown_command_errors() {
        let dir = tempfile::tempdir().unwrap();
        let st = state(dir.path());
        let err = dispatch(&st, "nonexistent", "").await.unwrap_err();
        assert!(matches!(err, CommandError::Unknown(_)));
    }

    #[tokio::test]
    async fn init_preview_then_confirm() {
        let dir = tempfile::tempdir().unwrap();
        let st = state(dir.path());

        let preview = dispatch(&st, "init", "").await.unwrap();
        assert_eq!(preview["type"], "init_preview");
        assert!(!preview["willCreate"].as_array().unwrap().is_empty());

        let result = dispatch(&st, "init", "confirm").await.unwrap();
        assert_eq!(result["type"], "init_result");
        assert!(dir.path().join(".nightfall/logs").exists());
        assert!(dir.path().join(".nightfall/config.yaml").exists());
    }

    #[tokio::test]
    async fn status_with_no_active_task() {
        let dir = tempfile::tempdir().unwrap();
        let st = state(dir.path());
        let out = dispatch(&st, "status", "").await.unwrap();
        assert!(out["currentTask"].is_null());
    }

    #[tokio::test]
    async fn status_reflects_current_run() {
        let dir = tempfile::tempdir().unwrap();
        let st = state(dir.path());
        *st.current_run.write().await = Some(TaskRun::new("do the thing"));
        let out = dispatch(&st, "status", "").await.unwrap();
        assert!(!out["currentTask"].is_null());
    }

    #[tokio::test]
    async fn history_empty_project() {
        let dir = tempfile::tempdir().unwrap();
        let st = state(dir.path());
        let out = dispatch(&st, "history", "").await.unwrap();
        assert_eq!(out["type"], "history_view");
        assert!(out["runs"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn rollback_unknown_snapshot_fails() {
        let dir = tempfile::tempdir().unwrap();
        let st = state(dir.path());
        let err = dispatch(&st, "history", "rollback does-not-exist")
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Failed(_)));
    }

    #[tokio::test]
    async fn rollback_preview_then_confirm() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "v1").unwrap();
        let mgr = SnapshotManager::new(dir.path());
        let meta = mgr
            .create_snapshot(uuid::Uuid::new_v4(), "edit a.rs", &["a.rs".to_string()])
            .unwrap();
        std::fs::write(dir.path().join("a.rs"), "v2").unwrap();

        let st = state(dir.path());
        let preview = dispatch(&st, "history", &format!("rollback {}", meta.snapshot_id))
            .await
            .unwrap();
        assert_eq!(preview["type"], "rollback_confirm");
        assert_eq!(std::fs::read_to_string(dir.path().join("a.rs")).unwrap(), "v2");

        let result = dispatch(
            &st,
            "history",
            &format!("rollback {} confirm", meta.snapshot_id),
        )
        .await
        .unwrap();
        assert_eq!(result["type"], "rollback_result");
        assert_eq!(std::fs::read_to_string(dir.path().join("a.rs")).unwrap(), "v1");
    }

    #[tokio::test]
    async fn model_view_then_save() {
        let dir = tempfile::tempdir().unwrap();
        let st = state(dir.path());
        let picker = dispatch(&st, "model", "").await.unwrap();
        assert_eq!(picker["type"], "model_picker");

        let saved = dispatch(&st, "model", "llama3").await.unwrap();
        assert_eq!(saved["model"], "llama3");
        let config = st.config.read().await;
        assert_eq!(config.provider.model.as_deref(), Some("llama3"));
    }

    #[tokio::test]
    async fn settings_save_rejects_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let st = state(dir.path());
        let err = dispatch(
            &st,
            "settings",
            r#"{"concurrency": {"max_engineers": 0}}"#,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CommandError::InvalidArgs(_)));
    }

    #[tokio::test]
    async fn clear_is_rejected_server_side() {
        let dir = tempfile::tempdir().unwrap();
        let st = state(dir.path());
        let err = dispatch(&st, "clear", "").await.unwrap_err();
        assert!(matches!(err, CommandError::Failed(_)));
    }

    #[tokio::test]
    async fn memory_on_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let st = state(dir.path());
        let out = dispatch(&st, "memory", "").await.unwrap();
        assert!(out["entries"].as_array().unwrap().is_empty());
    }
}
