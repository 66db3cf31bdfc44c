use crate::ids::{AnalysisId, FileId};
use crate::options::Options;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AnalysisStatus {
    Pending,
    Preloading,
    Running,
    Finished,
    Error,
}

impl AnalysisStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, AnalysisStatus::Finished | AnalysisStatus::Error)
    }
}

/// Which of the four mutually-exclusive module sets a module currently
/// occupies (§3 invariant: at most one).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleSlot {
    Pending,
    Waiting,
    Executed,
    Canceled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ioc {
    pub value: String,
    pub tags: Vec<String>,
    pub ti_tags: Vec<String>,
    pub ti_indicators: Vec<String>,
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupportFile {
    pub module: String,
    pub name: String,
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Extraction {
    pub module: String,
    pub label: String,
    pub file: FileId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub message: String,
}

/// The orchestration record for one investigation of one file.
///
/// This type owns the data and the *local* invariants (module-set
/// exclusivity, `end_date` iff terminal). The control logic that decides
/// *which* module to enqueue next (`resume`, `queue_modules`, tag-triggered
/// enqueueing) needs the module catalog and dispatcher and lives in
/// `fame-orchestrator::engine` — plain data here, decision-making kept in
/// a separate manager type, the same split `ActionManager` draws from
/// `action_manager.rs` against the task records in `main.rs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Analysis {
    pub id: AnalysisId,
    pub file: FileId,
    pub status: AnalysisStatus,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub initiating_user: String,
    pub groups: HashSet<String>,

    pub modules: Vec<String>,
    pub preloading_modules: Vec<String>,
    pub pending_modules: Vec<String>,
    pub waiting_modules: Vec<String>,
    pub executed_modules: Vec<String>,
    pub canceled_modules: Vec<String>,

    pub results: HashMap<String, serde_json::Value>,
    pub generated_files: HashMap<String, Vec<String>>,
    pub extracted_files: Vec<FileId>,
    pub support_files: Vec<SupportFile>,
    pub tags: Vec<String>,
    pub iocs: Vec<Ioc>,
    pub probable_names: Vec<String>,
    pub extractions: Vec<Extraction>,
    pub logs: Vec<LogEntry>,
    pub options: Options,
}

impl Analysis {
    pub fn new(file: FileId, initiating_user: impl Into<String>, groups: HashSet<String>) -> Self {
        Analysis {
            id: AnalysisId::new(),
            file,
            status: AnalysisStatus::Pending,
            created_at: Utc::now(),
            ended_at: None,
            initiating_user: initiating_user.into(),
            groups,
            modules: Vec::new(),
            preloading_modules: Vec::new(),
            pending_modules: Vec::new(),
            waiting_modules: Vec::new(),
            executed_modules: Vec::new(),
            canceled_modules: Vec::new(),
            results: HashMap::new(),
            generated_files: HashMap::new(),
            extracted_files: Vec::new(),
            support_files: Vec::new(),
            tags: Vec::new(),
            iocs: Vec::new(),
            probable_names: Vec::new(),
            extractions: Vec::new(),
            logs: Vec::new(),
            options: Options::new(),
        }
    }

    pub fn slot_of(&self, module: &str) -> Option<ModuleSlot> {
        if self.pending_modules.iter().any(|m| m == module) {
            Some(ModuleSlot::Pending)
        } else if self.waiting_modules.iter().any(|m| m == module) {
            Some(ModuleSlot::Waiting)
        } else if self.executed_modules.iter().any(|m| m == module) {
            Some(ModuleSlot::Executed)
        } else if self.canceled_modules.iter().any(|m| m == module) {
            Some(ModuleSlot::Canceled)
        } else {
            None
        }
    }

    fn remove_from(list: &mut Vec<String>, module: &str) {
        list.retain(|m| m != module);
    }

    /// Add-to-set semantics: returns `true` only if `module` was not
    /// already pending (mirrors the store's conditional `addToSet`, which
    /// is how a second worker racing to claim the same module observes
    /// "already present" per §4.4 step 3).
    pub fn move_to_pending(&mut self, module: &str) -> bool {
        if self.pending_modules.iter().any(|m| m == module) {
            return false;
        }
        Self::remove_from(&mut self.waiting_modules, module);
        self.pending_modules.push(module.to_string());
        true
    }

    pub fn move_to_waiting(&mut self, module: &str) -> bool {
        if self.waiting_modules.iter().any(|m| m == module) {
            return false;
        }
        self.waiting_modules.push(module.to_string());
        true
    }

    /// Conditional add-to-set over `executed_modules` — the one operation
    /// in the whole system that must never race (§5: "once a module is
    /// moved to executed_modules, no other worker will re-execute it").
    pub fn move_to_executed(&mut self, module: &str) -> bool {
        if self.executed_modules.iter().any(|m| m == module) {
            return false;
        }
        Self::remove_from(&mut self.pending_modules, module);
        Self::remove_from(&mut self.waiting_modules, module);
        self.executed_modules.push(module.to_string());
        true
    }

    pub fn move_to_canceled(&mut self, module: &str) -> bool {
        Self::remove_from(&mut self.pending_modules, module);
        Self::remove_from(&mut self.waiting_modules, module);
        if self.canceled_modules.iter().any(|m| m == module) {
            return false;
        }
        self.canceled_modules.push(module.to_string());
        true
    }

    /// Idempotent tag append: adding a tag already present is a no-op
    /// (§8 round-trip property). Returns `true` when the tag was new.
    pub fn add_tag(&mut self, tag: impl Into<String>) -> bool {
        let tag = tag.into();
        if self.tags.iter().any(|t| t == &tag) {
            return false;
        }
        self.tags.push(tag);
        true
    }

    pub fn add_result(&mut self, module: &str, result: serde_json::Value) {
        self.results.insert(module.to_string(), result);
    }

    pub fn add_generated_files(&mut self, file_type: &str, paths: Vec<String>) {
        self.generated_files
            .entry(file_type.to_string())
            .or_default()
            .extend(paths);
    }

    pub fn add_extracted_file(&mut self, file: FileId) {
        if !self.extracted_files.contains(&file) {
            self.extracted_files.push(file);
        }
    }

    pub fn add_support_file(&mut self, module: &str, name: &str, path: &str) {
        self.support_files.push(SupportFile {
            module: module.to_string(),
            name: name.to_string(),
            path: path.to_string(),
        });
    }

    pub fn add_ioc(&mut self, ioc: Ioc) {
        self.iocs.push(ioc);
    }

    pub fn log(&mut self, level: &str, message: impl Into<String>) {
        self.logs.push(LogEntry {
            timestamp: Utc::now(),
            level: level.to_string(),
            message: message.into(),
        });
    }

    /// Every generated-file type plus the root file's own type, used by the
    /// dispatcher as `types_available`.
    pub fn types_available(&self, root_type: &str) -> Vec<String> {
        let mut types: Vec<String> = vec![root_type.to_string()];
        types.extend(self.generated_files.keys().cloned());
        types
    }

    pub fn start_preloading(&mut self) {
        self.status = AnalysisStatus::Preloading;
    }

    pub fn start_running(&mut self) {
        if self.status != AnalysisStatus::Error {
            self.status = AnalysisStatus::Running;
        }
    }

    pub fn finish(&mut self) {
        if self.status.is_terminal() {
            return;
        }
        self.status = AnalysisStatus::Finished;
        self.ended_at = Some(Utc::now());
    }

    pub fn error(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        self.log("error", reason);
        self.status = AnalysisStatus::Error;
        self.ended_at = Some(Utc::now());
    }

    /// §8 invariant: for all modules, at most one of
    /// {pending, waiting, executed, canceled}.
    pub fn check_module_set_invariant(&self) -> bool {
        let mut seen: HashSet<&str> = HashSet::new();
        for list in [
            &self.pending_modules,
            &self.waiting_modules,
            &self.executed_modules,
            &self.canceled_modules,
        ] {
            for m in list {
                if !seen.insert(m.as_str()) {
                    return false;
                }
            }
        }
        true
    }

    /// §8 invariant: `end_date` is set iff status is finished or error.
    pub fn check_end_date_invariant(&self) -> bool {
        self.ended_at.is_some() == self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn sample() -> Analysis {
        Analysis::new(FileId::new(), "tester", HashSet::new())
    }

    #[test]
    fn module_starts_in_no_slot() {
        let a = sample();
        assert_eq!(a.slot_of("M"), None);
    }

    #[test]
    fn move_to_pending_is_idempotent_like_add_to_set() {
        let mut a = sample();
        assert!(a.move_to_pending("M"));
        assert!(!a.move_to_pending("M"));
        assert_eq!(a.pending_modules, vec!["M".to_string()]);
    }

    #[test]
    fn moving_to_executed_removes_from_pending_and_waiting() {
        let mut a = sample();
        a.move_to_pending("M");
        assert!(a.move_to_executed("M"));
        assert!(a.pending_modules.is_empty());
        assert_eq!(a.slot_of("M"), Some(ModuleSlot::Executed));
        // Second worker racing in: already executed, no-op.
        assert!(!a.move_to_executed("M"));
    }

    #[test]
    fn invariant_holds_across_transitions() {
        let mut a = sample();
        a.move_to_waiting("M");
        assert!(a.check_module_set_invariant());
        a.move_to_pending("M");
        assert!(a.check_module_set_invariant());
        assert_eq!(a.slot_of("M"), Some(ModuleSlot::Pending));
        a.move_to_canceled("M");
        assert!(a.check_module_set_invariant());
        assert_eq!(a.slot_of("M"), Some(ModuleSlot::Canceled));
    }

    #[test]
    fn adding_duplicate_tag_is_noop() {
        let mut a = sample();
        assert!(a.add_tag("ransomware"));
        assert!(!a.add_tag("ransomware"));
        assert_eq!(a.tags, vec!["ransomware".to_string()]);
    }

    #[test]
    fn end_date_set_iff_terminal() {
        let mut a = sample();
        assert!(a.check_end_date_invariant());
        a.finish();
        assert!(a.check_end_date_invariant());
        assert!(a.ended_at.is_some());
    }

    #[test]
    fn finish_is_idempotent() {
        let mut a = sample();
        a.finish();
        let first = a.ended_at;
        a.finish();
        assert_eq!(a.ended_at, first);
    }
}
