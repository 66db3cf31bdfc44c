use thiserror::Error;

/// Error kinds the orchestration core needs to distinguish between.
///
/// Collaborator errors (store, HTTP, I/O) are boxed through `#[from]`, the
/// same way handlers elsewhere in this codebase bubble up
/// `Box<dyn std::error::Error>`; the named variants exist so callers that
/// need to branch on error *kind* (dispatcher vs. config vs. execution)
/// don't have to downcast.
#[derive(Debug, Error)]
pub enum FameError {
    #[error("store error: {0}")]
    Store(String),

    #[error("module '{0}' not found in catalog")]
    ModuleNotFound(String),

    #[error("module '{module}' is missing required config '{setting}'")]
    ConfigMissing { module: String, setting: String },

    #[error("could not find execution path to {0}")]
    Dispatch(String),

    #[error("module '{module}' execution failed: {message}")]
    ModuleExecution { module: String, message: String },

    #[error("agent communication error: {0}")]
    Agent(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type FameResult<T> = Result<T, FameError>;
