//! Shared data model for the FAME orchestration core.
//!
//! This crate has no I/O of its own: it is the set of types that
//! `fame-store`, `fame-dispatcher`, `fame-orchestrator`, `fame-worker` and
//! `fame-agent` all agree on, plus the pure (non-persisted) logic that can
//! be expressed purely in terms of those types.

pub mod analysis;
pub mod error;
pub mod file;
pub mod ids;
pub mod module;
pub mod options;

pub use analysis::{Analysis, AnalysisStatus, Ioc, SupportFile};
pub use error::{FameError, FameResult};
pub use file::{AvSubmissionStatus, File};
pub use ids::{AnalysisId, FileId};
pub use module::{ConfigSetting, ConfigValueType, ModuleInfo, ModuleType};
pub use options::{OptionValue, Options};
