//! Persisted layout (§6.5):
//! - `storage_path/{sha256}/{safe_filename}` — original file bytes.
//! - `storage_path/support_files/{module}/{analysis_id}/{filename}`.
//! - `temp_path/generated_files/{analysis_id}/{filename}`.
//! - `temp_path/{uuid}/` — scratch space.

use fame_core::AnalysisId;
use md5::{Digest as _, Md5};
use sha2::{Digest as _, Sha256};
use std::path::PathBuf;

fn sanitize(name: &str) -> String {
    name.replace("..", "").replace('/', "").replace('\\', "")
}

pub struct Storage {
    storage_path: PathBuf,
    temp_path: PathBuf,
}

impl Storage {
    pub fn new(storage_path: impl Into<PathBuf>, temp_path: impl Into<PathBuf>) -> Self {
        Storage {
            storage_path: storage_path.into(),
            temp_path: temp_path.into(),
        }
    }

    pub fn original_file_path(&self, sha256: &str, filename: &str) -> PathBuf {
        self.storage_path.join(sha256).join(sanitize(filename))
    }

    pub fn support_file_path(&self, module: &str, analysis_id: AnalysisId, filename: &str) -> PathBuf {
        self.storage_path
            .join("support_files")
            .join(sanitize(module))
            .join(analysis_id.to_string())
            .join(sanitize(filename))
    }

    pub fn generated_file_path(&self, analysis_id: AnalysisId, filename: &str) -> PathBuf {
        self.temp_path
            .join("generated_files")
            .join(analysis_id.to_string())
            .join(sanitize(filename))
    }

    pub fn scratch_dir(&self, id: uuid::Uuid) -> PathBuf {
        self.temp_path.join(id.to_string())
    }

    /// The content-addressing scheme remote workers use to key their local
    /// download cache: an md5 of the *path string*, not of the file bytes
    /// (§4.4 Remote vs local worker).
    pub fn path_cache_key(path: &str) -> String {
        let mut hasher = Md5::new();
        hasher.update(path.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn sha256_of(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }
}
