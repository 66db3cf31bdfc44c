//! The Agent's single active task (§4.5, §6.3). Exactly one task is live
//! at a time; every endpoint below `/new_task` rejects a path `task_id`
//! that does not match it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Default, Serialize, Deserialize, Clone)]
pub struct InnerResults {
    pub logs: Vec<String>,
    pub extractions: Vec<serde_json::Value>,
    pub iocs: Vec<serde_json::Value>,
    pub probable_names: Vec<String>,
    pub tags: Vec<String>,
    pub generated_files: HashMap<String, Vec<String>>,
    pub extracted_files: Vec<String>,
    pub support_files: Vec<String>,
    pub result: Option<serde_json::Value>,
}

/// §4.5 step 5's results payload shape.
#[derive(Debug, Default, Serialize, Deserialize, Clone)]
pub struct ResultsPayload {
    pub results: serde_json::Value,
    #[serde(rename = "_results")]
    pub inner: InnerResults,
    pub should_restore: bool,
}

pub enum Target {
    File(PathBuf),
    Url(String),
}

pub struct ActiveTask {
    pub id: Uuid,
    pub scratch_dir: PathBuf,
    pub module_path: Option<PathBuf>,
    pub module_name: Option<String>,
    pub config: HashMap<String, serde_json::Value>,
    pub ready: bool,
    pub results: Option<ResultsPayload>,
}

impl ActiveTask {
    fn new(id: Uuid, scratch_root: &std::path::Path) -> Self {
        ActiveTask {
            id,
            scratch_dir: scratch_root.join(id.to_string()),
            module_path: None,
            module_name: None,
            config: HashMap::new(),
            ready: true,
            results: None,
        }
    }
}

/// Shared agent state: the currently active task, if any.
#[derive(Clone)]
pub struct AgentState {
    pub scratch_root: PathBuf,
    active: Arc<RwLock<Option<ActiveTask>>>,
}

impl AgentState {
    pub fn new(scratch_root: PathBuf) -> Self {
        AgentState { scratch_root, active: Arc::new(RwLock::new(None)) }
    }

    pub async fn start_new_task(&self) -> std::io::Result<Uuid> {
        let id = Uuid::new_v4();
        let task = ActiveTask::new(id, &self.scratch_root);
        tokio::fs::create_dir_all(&task.scratch_dir).await?;
        *self.active.write().await = Some(task);
        Ok(id)
    }

    pub async fn current_id(&self) -> Option<Uuid> {
        self.active.read().await.as_ref().map(|t| t.id)
    }

    pub async fn matches(&self, id: Uuid) -> bool {
        self.current_id().await == Some(id)
    }

    pub async fn with_task<F, T>(&self, id: Uuid, f: F) -> Option<T>
    where
        F: FnOnce(&mut ActiveTask) -> T,
    {
        let mut guard = self.active.write().await;
        match guard.as_mut() {
            Some(task) if task.id == id => Some(f(task)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_root() -> PathBuf {
        std::env::temp_dir().join(format!("fame-agent-task-test-{}", Uuid::new_v4()))
    }

    #[tokio::test]
    async fn new_task_becomes_the_active_one() {
        let state = AgentState::new(scratch_root());
        let id = state.start_new_task().await.unwrap();
        assert_eq!(state.current_id().await, Some(id));
        assert!(state.matches(id).await);
    }

    #[tokio::test]
    async fn mismatched_task_id_does_not_match() {
        let state = AgentState::new(scratch_root());
        state.start_new_task().await.unwrap();
        let other = Uuid::new_v4();
        assert!(!state.matches(other).await);
        assert!(state.with_task(other, |t| t.ready).await.is_none());
    }

    #[tokio::test]
    async fn new_task_replaces_the_previous_one() {
        let state = AgentState::new(scratch_root());
        let first = state.start_new_task().await.unwrap();
        let second = state.start_new_task().await.unwrap();
        assert_ne!(first, second);
        assert!(!state.matches(first).await);
        assert!(state.matches(second).await);
    }

    #[tokio::test]
    async fn with_task_mutates_the_matching_active_task() {
        let state = AgentState::new(scratch_root());
        let id = state.start_new_task().await.unwrap();
        state.with_task(id, |t| t.module_name = Some("pe".to_string())).await;
        let name = state.with_task(id, |t| t.module_name.clone()).await.flatten();
        assert_eq!(name, Some("pe".to_string()));
    }
}
