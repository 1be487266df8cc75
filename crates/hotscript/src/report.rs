//! Diagnostic Reporting
//!
//! Record observers see every patch, most of which leave the diagnostics
//! alone. The reporter remembers what each record carried last and only
//! surfaces diagnostics that changed.

use std::collections::HashMap;

use hotscript_types::{BuildDiagnostic, Diagnostic, RuntimeDiagnostic};
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::script::ScriptRecord;
use crate::state::StateId;

#[derive(Default)]
struct Seen {
    build_error: Option<BuildDiagnostic>,
    runtime_error: Option<RuntimeDiagnostic>,
}

/// What changed about a record's diagnostics
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagnosticChange {
    Raised(Diagnostic),
    BuildCleared,
    RuntimeCleared,
}

#[derive(Default)]
pub struct DiagnosticReporter {
    seen: Mutex<HashMap<StateId, Seen>>,
}

impl DiagnosticReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare `record` with what was last seen of it. `None` forgets it.
    pub fn changes(&self, id: StateId, record: Option<&ScriptRecord>) -> Vec<DiagnosticChange> {
        let mut seen = self.seen.lock();
        let Some(record) = record else {
            seen.remove(&id);
            return Vec::new();
        };

        let last = seen.entry(id).or_default();
        let mut changes = Vec::new();
        if record.build_error != last.build_error {
            last.build_error = record.build_error.clone();
            changes.push(match &record.build_error {
                Some(error) => DiagnosticChange::Raised(error.clone().into()),
                None => DiagnosticChange::BuildCleared,
            });
        }
        if record.runtime_error != last.runtime_error {
            last.runtime_error = record.runtime_error.clone();
            changes.push(match &record.runtime_error {
                Some(error) => DiagnosticChange::Raised(error.clone().into()),
                None => DiagnosticChange::RuntimeCleared,
            });
        }
        changes
    }

    /// Log the changes of `record`
    pub fn report(&self, id: StateId, record: Option<&ScriptRecord>) {
        let changes = self.changes(id, record);
        let Some(record) = record else {
            return;
        };
        for change in changes {
            match change {
                DiagnosticChange::Raised(diagnostic) => {
                    warn!(script = %record.name, "{}", diagnostic.render(None))
                }
                DiagnosticChange::BuildCleared => info!(script = %record.name, "Build error cleared"),
                DiagnosticChange::RuntimeCleared => {
                    info!(script = %record.name, "Runtime error cleared")
                }
            }
        }
    }
}
