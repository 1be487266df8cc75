//! Script Records
//!
//! One record per tracked file. Build fields are written only by the build
//! correlator, `runtime_error` only by script handles.

use std::path::PathBuf;
use std::sync::Arc;

use hotscript_types::{BuildDiagnostic, Platform, RuntimeDiagnostic};
use serde::{Deserialize, Serialize};

use crate::state::Schema;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptRecord {
    /// Sanitized name, unique within the registry
    pub name: String,
    /// Absolute path of the source file
    pub filename: PathBuf,
    pub browser_build: Option<Arc<str>>,
    pub node_build: Option<Arc<str>>,
    pub build_error: Option<BuildDiagnostic>,
    pub runtime_error: Option<RuntimeDiagnostic>,
}

impl ScriptRecord {
    pub fn new(name: impl Into<String>, filename: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            filename: filename.into(),
            browser_build: None,
            node_build: None,
            build_error: None,
            runtime_error: None,
        }
    }

    pub fn build(&self, platform: Platform) -> Option<&Arc<str>> {
        match platform {
            Platform::Browser => self.browser_build.as_ref(),
            Platform::Node => self.node_build.as_ref(),
        }
    }

    /// Whether at least one build round has been published
    pub fn has_build_state(&self) -> bool {
        self.browser_build.is_some() || self.node_build.is_some() || self.build_error.is_some()
    }
}

/// Partial update of a [`ScriptRecord`].
///
/// `None` leaves a field alone, `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptPatch {
    pub browser_build: Option<Option<Arc<str>>>,
    pub node_build: Option<Option<Arc<str>>>,
    pub build_error: Option<Option<BuildDiagnostic>>,
    pub runtime_error: Option<Option<RuntimeDiagnostic>>,
}

impl ScriptPatch {
    pub fn build(platform: Platform, artifact: Option<Arc<str>>) -> Self {
        Self::default().with_build(platform, artifact)
    }

    pub fn with_build(mut self, platform: Platform, artifact: Option<Arc<str>>) -> Self {
        match platform {
            Platform::Browser => self.browser_build = Some(artifact),
            Platform::Node => self.node_build = Some(artifact),
        }
        self
    }

    pub fn runtime_error(error: Option<RuntimeDiagnostic>) -> Self {
        Self {
            runtime_error: Some(error),
            ..Self::default()
        }
    }

    pub fn touches_builds(&self) -> bool {
        self.browser_build.is_some() || self.node_build.is_some() || self.build_error.is_some()
    }
}

impl Schema for ScriptRecord {
    type Patch = ScriptPatch;

    fn apply(&mut self, patch: &ScriptPatch) {
        if let Some(build) = &patch.browser_build {
            self.browser_build = build.clone();
        }
        if let Some(build) = &patch.node_build {
            self.node_build = build.clone();
        }
        if let Some(error) = &patch.build_error {
            self.build_error = error.clone();
        }
        if let Some(error) = &patch.runtime_error {
            self.runtime_error = error.clone();
        }
    }

    fn as_patch(&self) -> ScriptPatch {
        ScriptPatch {
            browser_build: Some(self.browser_build.clone()),
            node_build: Some(self.node_build.clone()),
            build_error: Some(self.build_error.clone()),
            runtime_error: Some(self.runtime_error.clone()),
        }
    }
}
