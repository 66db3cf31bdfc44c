use async_trait::async_trait;
use fame_core::{Analysis, AnalysisId, FameResult, File, FileId, ModuleInfo};

/// Document store abstraction (§6.1). Collections: `files`, `analysis`,
/// `modules`, `settings` (named configs), `internals` (singleton-per-name
/// documents such as `updates`, `virtual_machines`).
///
/// `with_analysis`/`with_internal` are the compare-and-set primitive §5 and
/// §9's Design Notes call for: the mutator runs against an in-memory copy,
/// the store retries the load-mutate-save cycle until no concurrent writer
/// raced it. This gives per-field-operator atomicity (`addToSet`, `pull`,
/// `set`) without the store needing to understand `Analysis`'s field
/// layout — same contract, simpler backend.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_file(&self, id: FileId) -> FameResult<Option<File>>;
    async fn find_file_by_sha256(&self, sha256: &str) -> FameResult<Option<File>>;
    async fn put_file(&self, file: &File) -> FameResult<()>;
    async fn with_file<F, T>(&self, id: FileId, f: F) -> FameResult<T>
    where
        F: FnMut(&mut File) -> T + Send,
        T: Send;

    async fn get_analysis(&self, id: AnalysisId) -> FameResult<Option<Analysis>>;
    async fn put_analysis(&self, analysis: &Analysis) -> FameResult<()>;
    async fn with_analysis<F, T>(&self, id: AnalysisId, f: F) -> FameResult<T>
    where
        F: FnMut(&mut Analysis) -> T + Send,
        T: Send;

    async fn list_modules(&self) -> FameResult<Vec<ModuleInfo>>;
    async fn put_module(&self, module: &ModuleInfo) -> FameResult<()>;

    async fn get_config(&self, name: &str) -> FameResult<Option<serde_json::Value>>;
    async fn put_config(&self, name: &str, value: serde_json::Value) -> FameResult<()>;

    async fn get_internal(&self, name: &str) -> FameResult<Option<serde_json::Value>>;
    async fn with_internal<F, T>(&self, name: &str, f: F) -> FameResult<T>
    where
        F: FnMut(&mut serde_json::Value) -> T + Send,
        T: Send;

    /// Bumps `internals.updates.last_update` to now — the one cross-process
    /// signal workers and the orchestrator watch to know the catalog needs
    /// a reload (§4.1 Invalidation, §6.4).
    async fn touch_last_update(&self) -> FameResult<()>;
}
