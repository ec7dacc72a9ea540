//! Snapshot / rollback subsystem (spec.md §4.3 / C3).
//!
//! Before an engineer agent touches a file for the first time in a subtask,
//! the orchestrator asks this manager to preserve its pre-edit contents.
//! Snapshots form a total order by timestamp: a rollback discards the
//! target and every snapshot layered on top of it, since undoing an
//! intermediate snapshot leaves anything built on top of it stale.
//!
//! On-disk layout under `<project>/.nightfall/snapshots/<snapshot_id>/`:
//!   meta.json   — the serialized [`SnapshotMeta`]
//!   files/...   — preserved pre-edit copies, mirroring the project tree

use std::path::PathBuf;

use chrono::Utc;
use uuid::Uuid;

use crate::types::SnapshotMeta;

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot {0} not found")]
    NotFound(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub struct SnapshotManager {
    project_root: PathBuf,
}

impl SnapshotManager {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self { project_root: project_root.into() }
    }

    fn snapshots_dir(&self) -> PathBuf {
        self.project_root.join(".nightfall").join("snapshots")
    }

    fn snapshot_dir(&self, snapshot_id: &str) -> PathBuf {
        self.snapshots_dir().join(snapshot_id)
    }

    /// Assigns the next sequence number for `task_id` (count of its existing
    /// snapshots + 1), the current wall-clock ms, and a parent = the most
    /// recently created snapshot overall (null if none), per spec.md §4.3.
    pub fn create_snapshot(
        &self,
        task_id: Uuid,
        prompt: &str,
        files: &[String],
    ) -> Result<SnapshotMeta, SnapshotError> {
        let existing = self.list_snapshots()?;
        let sequence = existing.iter().filter(|m| m.task_id == task_id).count() + 1;
        let parent_snapshot_id = existing.first().map(|m| m.snapshot_id.clone());

        let timestamp = Utc::now();
        let snapshot_id = format!("task_{:03}_{}", sequence, timestamp.timestamp_millis());
        let dir = self.snapshot_dir(&snapshot_id);
        let files_dir = dir.join("files");
        std::fs::create_dir_all(&files_dir)?;

        for rel in files {
            let src = self.project_root.join(rel);
            if src.exists() {
                let dst = files_dir.join(rel);
                if let Some(parent) = dst.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::copy(&src, &dst)?;
            }
        }

        let meta = SnapshotMeta {
            snapshot_id: snapshot_id.clone(),
            task_id,
            prompt: prompt.to_string(),
            timestamp,
            parent_snapshot_id,
            files_changed: files.to_vec(),
        };
        std::fs::write(dir.join("meta.json"), serde_json::to_string_pretty(&meta)?)?;
        Ok(meta)
    }

    pub fn load_meta(&self, snapshot_id: &str) -> Result<SnapshotMeta, SnapshotError> {
        let path = self.snapshot_dir(snapshot_id).join("meta.json");
        if !path.exists() {
            return Err(SnapshotError::NotFound(snapshot_id.to_string()));
        }
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// All snapshots across every task, newest first (spec.md §4.3
    /// `listSnapshots()`).
    pub fn list_snapshots(&self) -> Result<Vec<SnapshotMeta>, SnapshotError> {
        let dir = self.snapshots_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut metas = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let meta_path = entry.path().join("meta.json");
            if !meta_path.exists() {
                continue;
            }
            let text = std::fs::read_to_string(&meta_path)?;
            let meta: SnapshotMeta = serde_json::from_str(&text)?;
            metas.push(meta);
        }
        metas.sort_by_key(|m| std::cmp::Reverse(m.timestamp));
        Ok(metas)
    }

    /// The cascade chain for `snapshot_id`: every snapshot whose timestamp
    /// is ≥ the target's, including the target itself, newest first. Does
    /// not mutate anything — used both by `rollback` and to preview the
    /// action before a caller confirms it.
    pub fn get_rollback_chain(&self, snapshot_id: &str) -> Result<Vec<SnapshotMeta>, SnapshotError> {
        let target = self.load_meta(snapshot_id)?;
        let mut chain: Vec<SnapshotMeta> = self
            .list_snapshots()?
            .into_iter()
            .filter(|m| m.timestamp >= target.timestamp)
            .collect();
        chain.sort_by_key(|m| std::cmp::Reverse(m.timestamp));
        Ok(chain)
    }

    /// Restores every file in the cascade chain, then removes each
    /// snapshot's directory. Returns the set of restored relative paths.
    pub fn rollback(&self, snapshot_id: &str) -> Result<Vec<String>, SnapshotError> {
        let chain = self.get_rollback_chain(snapshot_id)?;
        let mut restored = Vec::new();
        for meta in &chain {
            let files_dir = self.snapshot_dir(&meta.snapshot_id).join("files");
            for rel in &meta.files_changed {
                let preserved = files_dir.join(rel);
                let target = self.project_root.join(rel);
                if preserved.exists() {
                    if let Some(parent) = target.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::copy(&preserved, &target)?;
                } else if target.exists() {
                    std::fs::remove_file(&target)?;
                }
                restored.push(rel.clone());
            }
            std::fs::remove_dir_all(self.snapshot_dir(&meta.snapshot_id))?;
        }
        restored.sort();
        restored.dedup();
        Ok(restored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn write(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, contents).unwrap();
    }

    #[test]
    fn create_then_rollback_restores_contents() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/lib.rs", "original");
        let mgr = SnapshotManager::new(dir.path());
        let task_id = Uuid::new_v4();

        let meta = mgr
            .create_snapshot(task_id, "add feature", &["src/lib.rs".to_string()])
            .unwrap();

        write(dir.path(), "src/lib.rs", "modified by engineer");
        assert_eq!(
            std::fs::read_to_string(dir.path().join("src/lib.rs")).unwrap(),
            "modified by engineer"
        );

        mgr.rollback(&meta.snapshot_id).unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("src/lib.rs")).unwrap(),
            "original"
        );
    }

    #[test]
    fn snapshot_id_matches_spec_format() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = SnapshotManager::new(dir.path());
        let task_id = Uuid::new_v4();

        let first = mgr.create_snapshot(task_id, "cycle 1", &[]).unwrap();
        let second = mgr.create_snapshot(task_id, "cycle 2", &[]).unwrap();

        assert!(first.snapshot_id.starts_with("task_001_"));
        assert!(second.snapshot_id.starts_with("task_002_"));
        assert_eq!(second.parent_snapshot_id.as_deref(), Some(first.snapshot_id.as_str()));
    }

    #[test]
    fn rollback_removes_files_that_did_not_exist_before() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = SnapshotManager::new(dir.path());
        let task_id = Uuid::new_v4();

        let meta = mgr
            .create_snapshot(task_id, "add new file", &["src/new.rs".to_string()])
            .unwrap();
        write(dir.path(), "src/new.rs", "brand new");

        mgr.rollback(&meta.snapshot_id).unwrap();
        assert!(!dir.path().join("src/new.rs").exists());
    }

    #[test]
    fn rollback_cascades_to_snapshots_built_on_top() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.rs", "v1");
        let mgr = SnapshotManager::new(dir.path());
        let task_id = Uuid::new_v4();

        let first = mgr
            .create_snapshot(task_id, "cycle 1", &["a.rs".to_string()])
            .unwrap();
        write(dir.path(), "a.rs", "v2");
        let second = mgr
            .create_snapshot(task_id, "cycle 2", &["a.rs".to_string()])
            .unwrap();
        write(dir.path(), "a.rs", "v3 broken");

        let chain = mgr.get_rollback_chain(&first.snapshot_id).unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].snapshot_id, second.snapshot_id);
        assert_eq!(chain[1].snapshot_id, first.snapshot_id);

        let restored = mgr.rollback(&first.snapshot_id).unwrap();
        assert_eq!(restored, vec!["a.rs".to_string()]);
        assert_eq!(std::fs::read_to_string(dir.path().join("a.rs")).unwrap(), "v1");
        assert!(!mgr.snapshot_dir(&first.snapshot_id).exists());
        assert!(!mgr.snapshot_dir(&second.snapshot_id).exists());
    }

    #[test]
    fn list_snapshots_spans_all_tasks_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = SnapshotManager::new(dir.path());
        let task_a = Uuid::new_v4();
        let task_b = Uuid::new_v4();

        mgr.create_snapshot(task_a, "first", &[]).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        mgr.create_snapshot(task_a, "second", &[]).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        mgr.create_snapshot(task_b, "other task", &[]).unwrap();

        let metas = mgr.list_snapshots().unwrap();
        assert_eq!(metas.len(), 3);
        assert_eq!(metas[0].prompt, "other task");
        assert_eq!(metas[2].prompt, "first");
    }

    #[test]
    fn load_meta_missing_snapshot_errors() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = SnapshotManager::new(dir.path());
        let err = mgr.load_meta("does-not-exist").unwrap_err();
        assert!(matches!(err, SnapshotError::NotFound(_)));
    }
}
