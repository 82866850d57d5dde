use crate::error::{EngineError, EngineResult};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Derive the stable workspace identifier: a SHA-256 hash of the normalized
/// absolute path (forward slashes, no trailing separator), truncated to 16
/// hex characters. Identical paths always hash identically; this is the
/// partition key for every persisted chunk row.
pub fn derive_workspace_id(path: &Path) -> EngineResult<String> {
    let canonical = dunce::canonicalize(path)
        .map_err(|_| EngineError::Config(format!("workspace path does not exist: {}", path.display())))?;

    let normalized = canonical
        .to_string_lossy()
        .replace('\\', "/")
        .trim_end_matches('/')
        .to_string();

    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    let digest = hasher.finalize();
    Ok(format!("{:x}", digest)[..16].to_string())
}

/// Registry entry for a known workspace, kept as a small JSON sidecar. Not a
/// persisted chunk-store entity; this is bookkeeping for the console and for
/// status/reinitialize requests that refer to a workspace by id alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceEntry {
    pub id: String,
    pub name: String,
    pub path: String,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub total_files: usize,
    pub indexed_files: usize,
}

pub struct WorkspaceRegistry {
    entries: DashMap<String, WorkspaceEntry>,
    data_dir: PathBuf,
}

impl WorkspaceRegistry {
    pub fn new(data_dir: PathBuf) -> Self {
        let registry = Self {
            entries: DashMap::new(),
            data_dir,
        };
        if let Ok(content) = std::fs::read_to_string(registry.registry_file()) {
            if let Ok(entries) = serde_json::from_str::<Vec<WorkspaceEntry>>(&content) {
                for entry in entries {
                    registry.entries.insert(entry.id.clone(), entry);
                }
            }
        }
        registry
    }

    fn registry_file(&self) -> PathBuf {
        self.data_dir.join("workspaces.json")
    }

    fn persist(&self) -> EngineResult<()> {
        let entries: Vec<WorkspaceEntry> = self.entries.iter().map(|e| e.value().clone()).collect();
        let json = serde_json::to_string_pretty(&entries)?;
        std::fs::create_dir_all(&self.data_dir)?;
        let target = self.registry_file();
        let tmp = target.with_extension("json.tmp");
        std::fs::write(&tmp, &json)?;
        std::fs::rename(&tmp, &target)?;
        Ok(())
    }

    pub fn register(&self, name: String, path: &Path) -> EngineResult<WorkspaceEntry> {
        let id = derive_workspace_id(path)?;
        let entry = self.entries.get(&id).map(|e| e.value().clone());

        let entry = entry.unwrap_or_else(|| WorkspaceEntry {
            id: id.clone(),
            name,
            path: path.to_string_lossy().to_string(),
            created_at: Utc::now(),
            last_accessed: Utc::now(),
            total_files: 0,
            indexed_files: 0,
        });

        self.entries.insert(id, entry.clone());
        self.persist()?;
        Ok(entry)
    }

    pub fn get(&self, id: &str) -> EngineResult<WorkspaceEntry> {
        self.entries
            .get(id)
            .map(|e| e.value().clone())
            .ok_or_else(|| EngineError::WorkspaceNotFound(id.to_string()))
    }

    pub fn list(&self) -> Vec<WorkspaceEntry> {
        let mut entries: Vec<_> = self.entries.iter().map(|e| e.value().clone()).collect();
        entries.sort_by(|a, b| b.last_accessed.cmp(&a.last_accessed));
        entries
    }

    pub fn remove(&self, id: &str) -> EngineResult<()> {
        self.entries
            .remove(id)
            .ok_or_else(|| EngineError::WorkspaceNotFound(id.to_string()))?;
        self.persist()?;
        Ok(())
    }

    pub fn update_stats(&self, id: &str, total_files: usize, indexed_files: usize) -> EngineResult<()> {
        let mut entry = self
            .entries
            .get_mut(id)
            .ok_or_else(|| EngineError::WorkspaceNotFound(id.to_string()))?;
        entry.total_files = total_files;
        entry.indexed_files = indexed_files;
        entry.last_accessed = Utc::now();
        drop(entry);
        self.persist()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn same_path_yields_same_id() {
        let dir = tempdir().unwrap();
        let a = derive_workspace_id(dir.path()).unwrap();
        let b = derive_workspace_id(dir.path()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn distinct_paths_yield_distinct_ids() {
        let dir1 = tempdir().unwrap();
        let dir2 = tempdir().unwrap();
        let a = derive_workspace_id(dir1.path()).unwrap();
        let b = derive_workspace_id(dir2.path()).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn register_persists_and_round_trips() {
        let dir = tempdir().unwrap();
        let data_dir = tempdir().unwrap();
        let registry = WorkspaceRegistry::new(data_dir.path().to_path_buf());

        let entry = registry.register("test".to_string(), dir.path()).unwrap();
        let fetched = registry.get(&entry.id).unwrap();
        assert_eq!(fetched.id, entry.id);

        let reloaded = WorkspaceRegistry::new(data_dir.path().to_path_buf());
        assert_eq!(reloaded.list().len(), 1);
    }
}
