use crate::errors::ToolError;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RepoLifecycle {
    Cloning,
    #[default]
    Ready,
    Error,
}

/// Storage collaborator's view of a working copy. The core reads `path` and
/// `remote_url`; lifecycle changes are handed back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryRecord {
    #[serde(alias = "repo_id")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_url: Option<String>,
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_branch: Option<String>,
    #[serde(default)]
    pub status: RepoLifecycle,
    #[serde(default)]
    pub worktree: bool,
}

impl RepositoryRecord {
    pub fn validate(&self) -> Result<(), ToolError> {
        if self.id.trim().is_empty() {
            return Err(ToolError::invalid_params("Repository id must be a non-empty string"));
        }
        if !self.path.is_absolute() {
            return Err(ToolError::invalid_params(format!(
                "Repository path must be absolute: {}",
                self.path.display()
            )));
        }
        Ok(())
    }
}

pub trait RepositoryStore: Send + Sync {
    fn get(&self, id: &str) -> Option<RepositoryRecord>;
    fn list(&self) -> Vec<RepositoryRecord>;
    fn upsert(&self, record: RepositoryRecord) -> Result<(), ToolError>;
    fn set_status(&self, id: &str, status: RepoLifecycle);
    fn remove(&self, id: &str) -> Option<RepositoryRecord>;
}

#[derive(Clone, Default)]
pub struct MemoryRepositoryStore {
    records: Arc<DashMap<String, RepositoryRecord>>,
}

impl MemoryRepositoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RepositoryStore for MemoryRepositoryStore {
    fn get(&self, id: &str) -> Option<RepositoryRecord> {
        self.records.get(id).map(|entry| entry.value().clone())
    }

    fn list(&self) -> Vec<RepositoryRecord> {
        let mut records: Vec<RepositoryRecord> =
            self.records.iter().map(|entry| entry.value().clone()).collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    fn upsert(&self, record: RepositoryRecord) -> Result<(), ToolError> {
        record.validate()?;
        self.records.insert(record.id.clone(), record);
        Ok(())
    }

    fn set_status(&self, id: &str, status: RepoLifecycle) {
        if let Some(mut entry) = self.records.get_mut(id) {
            entry.status = status;
        }
    }

    fn remove(&self, id: &str) -> Option<RepositoryRecord> {
        self.records.remove(id).map(|(_, record)| record)
    }
}
