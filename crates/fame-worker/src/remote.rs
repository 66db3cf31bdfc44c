//! Remote worker support: fetches inputs and pushes outputs through the
//! orchestrator's HTTP surface (§6.2) instead of sharing its storage path.
//! Downloads are cached on disk keyed by `Storage::path_cache_key` (md5 of
//! the path string); the first worker to start a download wins an
//! exclusive file lock, others wait (§4.4, §5 "Remote file cache").

use fame_core::{AnalysisId, FameError, FameResult};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub struct RemoteClient {
    http: reqwest::Client,
    base_url: String,
    cache_dir: PathBuf,
}

impl RemoteClient {
    pub fn new(base_url: impl Into<String>, cache_dir: impl Into<PathBuf>) -> Self {
        RemoteClient {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            cache_dir: cache_dir.into(),
        }
    }

    /// Downloads the file addressed by `remote_path`'s md5, caching it
    /// under `cache_dir/{key}`. A `.lock` sibling file arbitrates which
    /// worker performs the download; the rest poll every second for the
    /// cached copy to appear (§5).
    pub async fn fetch_file(&self, analysis_id: AnalysisId, remote_path: &str) -> FameResult<PathBuf> {
        let key = fame_orchestrator::storage::Storage::path_cache_key(remote_path);
        let dest = self.cache_dir.join(&key);
        if dest.exists() {
            return Ok(dest);
        }
        tokio::fs::create_dir_all(&self.cache_dir)
            .await
            .map_err(FameError::Io)?;

        let lock_path = self.cache_dir.join(format!("{key}.lock"));
        let lock_file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(&lock_path)
            .map_err(FameError::Io)?;
        let mut rw_lock = fd_lock::RwLock::new(lock_file);

        let _guard = loop {
            match rw_lock.try_write() {
                Ok(guard) => break guard,
                Err(_) => {
                    if dest.exists() {
                        return Ok(dest);
                    }
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        };

        if dest.exists() {
            return Ok(dest);
        }

        let url = format!("{}/analyses/{}/get_file/{}", self.base_url, analysis_id, key);
        let bytes = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| FameError::Agent(e.to_string()))?
            .bytes()
            .await
            .map_err(|e| FameError::Agent(e.to_string()))?;
        tokio::fs::write(&dest, &bytes).await.map_err(FameError::Io)?;
        Ok(dest)
    }

    pub async fn upload_generated_file(
        &self,
        analysis_id: AnalysisId,
        file_type: &str,
        path: &Path,
    ) -> FameResult<()> {
        let bytes = tokio::fs::read(path).await.map_err(FameError::Io)?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "generated".to_string());
        let part = reqwest::multipart::Part::bytes(bytes).file_name(filename);
        let form = reqwest::multipart::Form::new().part("file", part);
        let url = format!(
            "{}/analyses/{}/generated_file?type={}",
            self.base_url, analysis_id, file_type
        );
        self.http
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| FameError::Agent(e.to_string()))?;
        Ok(())
    }

    pub async fn upload_support_file(
        &self,
        analysis_id: AnalysisId,
        module: &str,
        path: &Path,
    ) -> FameResult<()> {
        let bytes = tokio::fs::read(path).await.map_err(FameError::Io)?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "support".to_string());
        let part = reqwest::multipart::Part::bytes(bytes).file_name(filename);
        let form = reqwest::multipart::Form::new().part("file", part);
        let url = format!("{}/analyses/{}/support_file/{}", self.base_url, analysis_id, module);
        self.http
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| FameError::Agent(e.to_string()))?;
        Ok(())
    }
}
