//! Local vs. remote worker file access (§4.4 "Remote vs local worker"). A
//! local worker shares the storage path with the orchestrator and reads
//! files directly; a remote worker fetches/pushes them over HTTP.

use crate::remote::RemoteClient;
use fame_core::{AnalysisId, FameError, FameResult};
use std::path::{Path, PathBuf};

pub enum FileAccess {
    Local,
    Remote(RemoteClient),
}

impl FileAccess {
    pub async fn resolve_input(&self, analysis_id: AnalysisId, storage_path: &str) -> FameResult<PathBuf> {
        match self {
            FileAccess::Local => Ok(PathBuf::from(storage_path)),
            FileAccess::Remote(client) => client.fetch_file(analysis_id, storage_path).await,
        }
    }

    pub async fn publish_generated_file(
        &self,
        analysis_id: AnalysisId,
        file_type: &str,
        path: &Path,
    ) -> FameResult<String> {
        match self {
            FileAccess::Local => Ok(path.to_string_lossy().to_string()),
            FileAccess::Remote(client) => {
                client.upload_generated_file(analysis_id, file_type, path).await?;
                Ok(path.to_string_lossy().to_string())
            }
        }
    }

    pub async fn publish_support_file(
        &self,
        analysis_id: AnalysisId,
        module: &str,
        path: &Path,
    ) -> FameResult<()> {
        match self {
            FileAccess::Local => Err(FameError::Agent(
                "local worker writes support files directly under the shared storage path".into(),
            )),
            FileAccess::Remote(client) => client.upload_support_file(analysis_id, module, path).await,
        }
    }
}
