//! In-memory `Store`, for unit and scenario tests that want the real
//! compare-and-set semantics without a Postgres instance. Grounded on
//! `AppState.sessions: Mutex<HashMap<String, AgentSession>>` elsewhere in
//! this codebase — a single mutex guarding a handful of maps plays the
//! same role here that it plays for the in-process VNC/agent session
//! table.

use fame_core::{Analysis, AnalysisId, FameError, FameResult, File, FileId, ModuleInfo};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::store::Store;

#[derive(Default)]
struct Tables {
    files: HashMap<FileId, File>,
    files_by_sha256: HashMap<String, FileId>,
    analyses: HashMap<AnalysisId, Analysis>,
    modules: HashMap<String, ModuleInfo>,
    settings: HashMap<String, serde_json::Value>,
    internals: HashMap<String, serde_json::Value>,
}

pub struct MemoryStore {
    inner: Mutex<Tables>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Tables::default()),
        }
    }
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    async fn get_file(&self, id: FileId) -> FameResult<Option<File>> {
        Ok(self.inner.lock().unwrap().files.get(&id).cloned())
    }

    async fn find_file_by_sha256(&self, sha256: &str) -> FameResult<Option<File>> {
        let tables = self.inner.lock().unwrap();
        Ok(tables
            .files_by_sha256
            .get(sha256)
            .and_then(|id| tables.files.get(id))
            .cloned())
    }

    async fn put_file(&self, file: &File) -> FameResult<()> {
        let mut tables = self.inner.lock().unwrap();
        if let Some(sha256) = &file.sha256 {
            tables.files_by_sha256.insert(sha256.clone(), file.id);
        }
        tables.files.insert(file.id, file.clone());
        Ok(())
    }

    async fn with_file<F, T>(&self, id: FileId, mut f: F) -> FameResult<T>
    where
        F: FnMut(&mut File) -> T + Send,
        T: Send,
    {
        let mut tables = self.inner.lock().unwrap();
        let file = tables
            .files
            .get_mut(&id)
            .ok_or_else(|| FameError::Store(format!("file {id} not found")))?;
        Ok(f(file))
    }

    async fn get_analysis(&self, id: AnalysisId) -> FameResult<Option<Analysis>> {
        Ok(self.inner.lock().unwrap().analyses.get(&id).cloned())
    }

    async fn put_analysis(&self, analysis: &Analysis) -> FameResult<()> {
        self.inner
            .lock()
            .unwrap()
            .analyses
            .insert(analysis.id, analysis.clone());
        Ok(())
    }

    async fn with_analysis<F, T>(&self, id: AnalysisId, mut f: F) -> FameResult<T>
    where
        F: FnMut(&mut Analysis) -> T + Send,
        T: Send,
    {
        let mut tables = self.inner.lock().unwrap();
        let analysis = tables
            .analyses
            .get_mut(&id)
            .ok_or_else(|| FameError::Store(format!("analysis {id} not found")))?;
        Ok(f(analysis))
    }

    async fn list_modules(&self) -> FameResult<Vec<ModuleInfo>> {
        Ok(self.inner.lock().unwrap().modules.values().cloned().collect())
    }

    async fn put_module(&self, module: &ModuleInfo) -> FameResult<()> {
        self.inner
            .lock()
            .unwrap()
            .modules
            .insert(module.name.clone(), module.clone());
        Ok(())
    }

    async fn get_config(&self, name: &str) -> FameResult<Option<serde_json::Value>> {
        Ok(self.inner.lock().unwrap().settings.get(name).cloned())
    }

    async fn put_config(&self, name: &str, value: serde_json::Value) -> FameResult<()> {
        self.inner
            .lock()
            .unwrap()
            .settings
            .insert(name.to_string(), value);
        Ok(())
    }

    async fn get_internal(&self, name: &str) -> FameResult<Option<serde_json::Value>> {
        Ok(self.inner.lock().unwrap().internals.get(name).cloned())
    }

    async fn with_internal<F, T>(&self, name: &str, mut f: F) -> FameResult<T>
    where
        F: FnMut(&mut serde_json::Value) -> T + Send,
        T: Send,
    {
        let mut tables = self.inner.lock().unwrap();
        let doc = tables
            .internals
            .entry(name.to_string())
            .or_insert_with(|| serde_json::Value::Object(Default::default()));
        Ok(f(doc))
    }

    async fn touch_last_update(&self) -> FameResult<()> {
        self.with_internal("updates", |doc| {
            let now = chrono::Utc::now().to_rfc3339();
            if let serde_json::Value::Object(map) = doc {
                map.insert("last_update".to_string(), serde_json::Value::String(now));
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_file() -> File {
        let mut file = File::new("executable");
        file.sha256 = Some("cccc".to_string());
        file
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = MemoryStore::new();
        let file = sample_file();
        store.put_file(&file).await.unwrap();
        let back = store.get_file(file.id).await.unwrap().unwrap();
        assert_eq!(back.sha256.as_deref(), Some("cccc"));
    }

    #[tokio::test]
    async fn find_by_sha256_uses_index() {
        let store = MemoryStore::new();
        let file = sample_file();
        store.put_file(&file).await.unwrap();
        let back = store.find_file_by_sha256("cccc").await.unwrap().unwrap();
        assert_eq!(back.id, file.id);
    }

    #[tokio::test]
    async fn with_analysis_mutates_in_place() {
        let store = MemoryStore::new();
        let analysis = Analysis::new(FileId::new(), "tester", Default::default());
        let id = analysis.id;
        store.put_analysis(&analysis).await.unwrap();
        store
            .with_analysis(id, |a| a.add_tag("dropper"))
            .await
            .unwrap();
        let back = store.get_analysis(id).await.unwrap().unwrap();
        assert!(back.tags.contains(&"dropper".to_string()));
    }

    #[tokio::test]
    async fn with_file_missing_is_error() {
        let store = MemoryStore::new();
        let result = store.with_file(FileId::new(), |_f| ()).await;
        assert!(result.is_err());
    }
}
