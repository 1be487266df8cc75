//! Scripting Errors
//!
//! Only structural failures surface as errors: bad names, unknown scripts,
//! missing artifacts, infrastructure trouble. Broken or throwing scripts are
//! recorded on the script record instead.

use hotscript_types::{BackendError, NameError, Platform, ScriptException};

use crate::fs_tree::FsError;
use crate::state::StateError;

#[derive(Debug, thiserror::Error)]
pub enum ScriptingError {
    #[error("Invalid script name: {0}")]
    InvalidName(#[from] NameError),

    #[error("Script not found: {0}")]
    NotFound(String),

    #[error("Script already exists: {0}")]
    AlreadyExists(String),

    #[error("No {platform} build available for script {name}")]
    NoArtifact { name: String, platform: Platform },

    #[error("Script threw: {0}")]
    Evaluation(ScriptException),

    #[error(transparent)]
    Fs(#[from] FsError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    State(#[from] StateError),
}

/// Result type for scripting operations
pub type ScriptingResult<T> = Result<T, ScriptingError>;
