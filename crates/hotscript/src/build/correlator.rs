//! Build Correlator
//!
//! Results from the two pipelines of a script are paired by sequence number.
//! A round is complete when both pipelines have reported the same number; its
//! results are then published as one patch, so a record never carries a
//! browser build and a node build of different revisions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use hotscript_types::{BuildDiagnostic, BuildErrorKind, BuildOutput, Platform};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::PipelineEvents;
use crate::script::{ScriptPatch, ScriptRecord};
use crate::state::SharedState;

/// Outcome of one platform within the current round
#[derive(Debug, Clone, PartialEq, Eq, Default)]
enum Slot {
    #[default]
    Untouched,
    Built(Arc<str>),
    Failed,
}

/// Bookkeeping of the round in progress
#[derive(Debug, Default)]
pub struct Round {
    build_ids: [u64; 2],
    pending: [Slot; 2],
    error: Option<BuildDiagnostic>,
}

/// What recording a result led to
#[derive(Debug, PartialEq, Eq)]
pub enum RoundOutcome {
    /// The other platform has not reported this round yet
    Pending,
    /// Both platforms reported but nothing is left to publish
    Empty,
    Complete(ScriptPatch),
}

impl Round {
    /// Record `output` as result number `sequence` of `platform`.
    ///
    /// A suppressed result advances the platform's sequence and nothing else.
    pub fn record(
        &mut self,
        platform: Platform,
        sequence: u64,
        output: BuildOutput,
        suppressed: bool,
    ) -> RoundOutcome {
        let index = platform.index();
        self.build_ids[index] = sequence;

        if !suppressed {
            match output.artifact() {
                Some(artifact) => self.pending[index] = Slot::Built(Arc::from(artifact)),
                None => {
                    self.pending[index] = Slot::Failed;
                    if self.error.is_none() {
                        self.error = Some(first_error(output));
                    }
                }
            }
        }

        if self.build_ids[0] != self.build_ids[1] {
            return RoundOutcome::Pending;
        }

        let pending = std::mem::take(&mut self.pending);
        let error = self.error.take();
        if pending.iter().all(|s| *s == Slot::Untouched) && error.is_none() {
            return RoundOutcome::Empty;
        }

        let mut patch = ScriptPatch {
            build_error: Some(error),
            runtime_error: Some(None),
            ..ScriptPatch::default()
        };
        for (platform, slot) in Platform::ALL.into_iter().zip(pending) {
            match slot {
                Slot::Untouched => {}
                Slot::Built(artifact) => patch = patch.with_build(platform, Some(artifact)),
                Slot::Failed => patch = patch.with_build(platform, None),
            }
        }
        RoundOutcome::Complete(patch)
    }
}

fn first_error(output: BuildOutput) -> BuildDiagnostic {
    output
        .errors
        .into_iter()
        .next()
        .unwrap_or_else(|| BuildDiagnostic::backend("build produced no artifact"))
}

/// Whether a result is an artifact of the entry going away
pub fn is_transient(output: &BuildOutput) -> bool {
    output
        .errors
        .iter()
        .any(|e| e.kind == BuildErrorKind::EntryUnresolved)
}

/// Publishes the paired build rounds of one script
pub struct BuildCorrelator {
    name: String,
    state: SharedState<ScriptRecord>,
    teardown: Arc<AtomicBool>,
    round: Round,
    first_round: Option<oneshot::Sender<()>>,
}

impl BuildCorrelator {
    /// `first_round` fires when the first round completes, or is dropped
    /// when the correlator stops before that
    pub fn new(
        name: impl Into<String>,
        state: SharedState<ScriptRecord>,
        teardown: Arc<AtomicBool>,
        first_round: oneshot::Sender<()>,
    ) -> Self {
        Self {
            name: name.into(),
            state,
            teardown,
            round: Round::default(),
            first_round: Some(first_round),
        }
    }

    /// Run until both pipelines have stopped delivering
    pub async fn run(mut self, mut browser: PipelineEvents, mut node: PipelineEvents) {
        loop {
            let (platform, sequence, output) = tokio::select! {
                Some((seq, output)) = browser.next() => (Platform::Browser, seq, output),
                Some((seq, output)) = node.next() => (Platform::Node, seq, output),
                else => break,
            };
            if !self.handle(platform, sequence, output) {
                break;
            }
        }

        debug!(script = %self.name, "Correlator stopped");
        self.state.detach();
    }

    /// Returns whether the record still exists
    fn handle(&mut self, platform: Platform, sequence: u64, output: BuildOutput) -> bool {
        let tearing_down = self.teardown.load(Ordering::SeqCst);
        let suppressed = tearing_down || is_transient(&output);
        debug!(
            script = %self.name,
            platform = %platform,
            seq = sequence,
            success = output.is_success(),
            suppressed,
            "Build result"
        );

        let patch = match self.round.record(platform, sequence, output, suppressed) {
            RoundOutcome::Pending => return true,
            RoundOutcome::Empty => None,
            RoundOutcome::Complete(patch) => Some(patch),
        };

        if let Some(patch) = patch {
            // Checked again: teardown may have begun while the round was open
            if self.teardown.load(Ordering::SeqCst) {
                return true;
            }
            if let Err(e) = self.state.set(patch) {
                warn!(script = %self.name, "Dropping build round: {}", e);
                return false;
            }
            debug!(script = %self.name, seq = sequence, "Published build round");
        }

        if let Some(first_round) = self.first_round.take() {
            let _ = first_round.send(());
        }
        true
    }
}
