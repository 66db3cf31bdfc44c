use crate::ids::{AnalysisId, FileId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// A short semantic type string: `executable`, `pdf`, `url`, `hash`, …
///
/// Kept as a `String` rather than a closed enum because modules declare
/// `acts_on`/`generates` against arbitrary, deployment-extensible type
/// names (new filetype modules can introduce new types without a core
/// release) — the same reason `status`/`verdict` fields elsewhere in this
/// codebase stay free-form strings rather than closed enums.
pub type SemanticType = String;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum AvSubmissionStatus {
    NotSubmitted,
    Submitted,
    Accepted,
    Rejected,
}

/// A submitted or extracted artifact.
///
/// Once `sha256` is populated the on-disk content at `storage_path` is
/// immutable; only the metadata fields below may be enriched afterward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct File {
    pub id: FileId,
    pub md5: Option<String>,
    pub sha1: Option<String>,
    pub sha256: Option<String>,
    pub storage_path: Option<String>,
    pub file_type: SemanticType,
    pub mime: Option<String>,
    pub detailed_type: Option<String>,
    pub size: Option<u64>,
    pub names: Vec<String>,
    pub owners: HashSet<String>,
    pub groups: HashSet<String>,
    pub ancestor_analyses: Vec<AnalysisId>,
    pub extracted_by: Vec<AnalysisId>,
    pub probable_names: Vec<String>,
    pub av_submissions: HashMap<String, AvSubmissionStatus>,
    pub comments: Vec<String>,
}

impl File {
    pub fn new(file_type: impl Into<SemanticType>) -> Self {
        File {
            id: FileId::new(),
            md5: None,
            sha1: None,
            sha256: None,
            storage_path: None,
            file_type: file_type.into(),
            mime: None,
            detailed_type: None,
            size: None,
            names: Vec::new(),
            owners: HashSet::new(),
            groups: HashSet::new(),
            ancestor_analyses: Vec::new(),
            extracted_by: Vec::new(),
            probable_names: Vec::new(),
            av_submissions: HashMap::new(),
            comments: Vec::new(),
        }
    }

    /// A file of type `hash` carries no bytes on disk — it is a stand-in
    /// submission that needs a preloading module to resolve into a real
    /// file before regular processing modules can run.
    pub fn is_hash_only(&self) -> bool {
        self.file_type == "hash"
    }
}
