//! QuickJS Build Backend
//!
//! Each build reads the entry, follows its static imports under the root,
//! compiles every module to check the syntax and emits the platform artifact
//! with the dependencies embedded. Builds run on the blocking pool; change
//! notifications are coalesced over the debounce window.
//!
//! All watch sessions of a backend share one file watcher. A session is
//! woken whenever a file its last build read changes.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use hotscript_types::bundle::embed_module;
use hotscript_types::{
    BackendError, BackendResult, BuildBackend, BuildDiagnostic, BuildOutput, SourceLocation,
    WatchContext, WatchOptions,
};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::compile::check_syntax;
use crate::imports::{resolve, static_imports, Resolution};
use crate::transform::{emit_artifact, EmitOptions};

/// Build backend that checks and bundles modules
#[derive(Clone, Default)]
pub struct QuickJsBackend {
    hub: Arc<WatchHub>,
}

/// One build and every file it read or looked for
struct Build {
    output: BuildOutput,
    inputs: Vec<PathBuf>,
}

impl QuickJsBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run one build of `options.entry`
    pub fn build(options: &WatchOptions) -> BuildOutput {
        Self::build_tracked(options).output
    }

    fn build_tracked(options: &WatchOptions) -> Build {
        let mut inputs = vec![options.entry.clone()];
        let output = match bundle(options, &mut inputs) {
            Ok(artifact) => BuildOutput::success(artifact),
            Err(diagnostic) => BuildOutput::failure(diagnostic),
        };
        Build { output, inputs }
    }

    /// Number of live watch sessions
    pub fn sessions(&self) -> usize {
        self.hub.sessions.lock().len()
    }
}

impl std::fmt::Debug for QuickJsBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuickJsBackend")
            .field("sessions", &self.sessions())
            .finish()
    }
}

fn bundle(options: &WatchOptions, inputs: &mut Vec<PathBuf>) -> Result<String, BuildDiagnostic> {
    let source = match std::fs::read_to_string(&options.entry) {
        Ok(source) => source,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(BuildDiagnostic::entry_unresolved(options.entry.display()));
        }
        Err(e) => return Err(read_failure(&options.entry, e)),
    };

    let mut artifact = compile_module(options, &options.display_name, &options.entry, &source)?;

    let mut seen = HashSet::from([options.entry.clone()]);
    let mut pending = VecDeque::from([(options.display_name.clone(), source)]);
    while let Some((importer, source)) = pending.pop_front() {
        for import in static_imports(&source) {
            let unresolved = || {
                let mut location = SourceLocation::new(importer.as_str(), import.line, import.column);
                if let Some(text) = source.split('\n').nth(import.line as usize - 1) {
                    location = location.with_line_text(text.trim_end_matches('\r'));
                }
                BuildDiagnostic::import_unresolved(&import.specifier, location)
            };

            let (name, path) = match resolve(&options.root, &importer, &import.specifier) {
                Resolution::Found { name, path } => (name, path),
                Resolution::Missing { candidates } => {
                    inputs.extend(candidates);
                    return Err(unresolved());
                }
            };
            if !seen.insert(path.clone()) {
                continue;
            }
            inputs.push(path.clone());

            let dependency = match std::fs::read_to_string(&path) {
                Ok(dependency) => dependency,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(unresolved()),
                Err(e) => return Err(read_failure(&path, e)),
            };
            let module = compile_module(options, &name, &path, &dependency)?;
            embed_module(&mut artifact, &name, &module);
            pending.push_back((name, dependency));
        }
    }

    Ok(artifact)
}

fn compile_module(
    options: &WatchOptions,
    name: &str,
    path: &Path,
    source: &str,
) -> Result<String, BuildDiagnostic> {
    check_syntax(name, source)?;
    emit_artifact(
        source,
        &EmitOptions {
            platform: options.platform,
            display_name: name,
            entry: path,
            sourcemap: options.sourcemap,
        },
    )
}

fn read_failure(path: &Path, e: std::io::Error) -> BuildDiagnostic {
    BuildDiagnostic::backend(format!("Failed to read {}: {}", path.display(), e))
}

// ─────────────────────────────────────────────────────────────────────────────
// Shared watcher
// ─────────────────────────────────────────────────────────────────────────────

struct Session {
    inputs: HashSet<PathBuf>,
    directories: HashSet<PathBuf>,
    changes: mpsc::UnboundedSender<()>,
}

#[derive(Default)]
struct WatchHub {
    /// Read by the notify callback thread
    sessions: Arc<Mutex<HashMap<u64, Session>>>,
    watcher: Mutex<WatcherState>,
    next_id: AtomicU64,
}

#[derive(Default)]
struct WatcherState {
    watcher: Option<RecommendedWatcher>,
    /// Watched directory → number of sessions that need it
    directories: HashMap<PathBuf, usize>,
}

impl WatchHub {
    fn open(&self, entry: &Path) -> Result<(u64, mpsc::UnboundedReceiver<()>), String> {
        self.ensure_watcher()?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (changes, rx) = mpsc::unbounded_channel();
        self.sessions.lock().insert(
            id,
            Session {
                inputs: HashSet::new(),
                directories: HashSet::new(),
                changes,
            },
        );

        if let Err(e) = self.track(id, &[entry.to_path_buf()]) {
            self.close(id);
            return Err(e);
        }
        Ok((id, rx))
    }

    fn ensure_watcher(&self) -> Result<(), String> {
        let mut state = self.watcher.lock();
        if state.watcher.is_some() {
            return Ok(());
        }

        let sessions = self.sessions.clone();
        let watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            match res {
                Ok(event) if is_change(&event) => {
                    for session in sessions.lock().values() {
                        if event.paths.iter().any(|p| session.inputs.contains(p)) {
                            let _ = session.changes.send(());
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => warn!("Build watcher error: {}", e),
            }
        })
        .map_err(|e| e.to_string())?;

        state.watcher = Some(watcher);
        Ok(())
    }

    /// Point session `id` at the files its latest build read.
    ///
    /// The callback thread takes the session lock, so it is never held while
    /// the watcher is asked to add or drop a directory.
    fn track(&self, id: u64, inputs: &[PathBuf]) -> Result<(), String> {
        let (added, removed) = {
            let mut sessions = self.sessions.lock();
            let Some(session) = sessions.get_mut(&id) else {
                return Ok(());
            };
            let directories: HashSet<PathBuf> = inputs
                .iter()
                .filter_map(|p| p.parent().map(Path::to_path_buf))
                .collect();
            let added: Vec<PathBuf> = directories.difference(&session.directories).cloned().collect();
            let removed: Vec<PathBuf> = session.directories.difference(&directories).cloned().collect();
            session.inputs = inputs.iter().cloned().collect();
            session.directories = directories;
            (added, removed)
        };

        let mut failure = None;
        let mut state = self.watcher.lock();
        for directory in added {
            if let Err(e) = state.retain(&directory) {
                warn!("Failed to watch {}: {}", directory.display(), e);
                failure.get_or_insert(e);
            }
        }
        for directory in removed {
            state.release(&directory);
        }
        failure.map_or(Ok(()), Err)
    }

    fn close(&self, id: u64) {
        let Some(session) = self.sessions.lock().remove(&id) else {
            return;
        };
        let mut state = self.watcher.lock();
        for directory in &session.directories {
            state.release(directory);
        }
    }
}

impl WatcherState {
    fn retain(&mut self, directory: &Path) -> Result<(), String> {
        if let Some(count) = self.directories.get_mut(directory) {
            *count += 1;
            return Ok(());
        }
        let Some(watcher) = self.watcher.as_mut() else {
            return Err("watcher is not running".into());
        };
        watcher
            .watch(directory, RecursiveMode::NonRecursive)
            .map_err(|e| e.to_string())?;
        self.directories.insert(directory.to_path_buf(), 1);
        Ok(())
    }

    fn release(&mut self, directory: &Path) {
        let Some(count) = self.directories.get_mut(directory) else {
            return;
        };
        *count -= 1;
        if *count > 0 {
            return;
        }
        self.directories.remove(directory);
        if let Some(watcher) = self.watcher.as_mut() {
            if let Err(e) = watcher.unwatch(directory) {
                debug!("Failed to unwatch {}: {}", directory.display(), e);
            }
        }
    }
}

fn is_change(event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

impl BuildBackend for QuickJsBackend {
    fn watch(
        &self,
        options: WatchOptions,
        sink: mpsc::UnboundedSender<BuildOutput>,
    ) -> BackendResult<Box<dyn WatchContext>> {
        let (id, changes) = self.hub.open(&options.entry).map_err(|message| BackendError::Watch {
            path: options.entry.clone(),
            message,
        })?;

        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(run_watch(self.hub.clone(), id, options, sink, changes, stop_rx));

        Ok(Box::new(QuickJsWatch {
            hub: self.hub.clone(),
            id,
            stop: Some(stop_tx),
            task: Some(task),
        }))
    }
}

async fn run_watch(
    hub: Arc<WatchHub>,
    id: u64,
    options: WatchOptions,
    sink: mpsc::UnboundedSender<BuildOutput>,
    mut changes: mpsc::UnboundedReceiver<()>,
    mut stop: oneshot::Receiver<()>,
) {
    if !build_and_send(&hub, id, &options, &sink, &mut stop).await {
        return;
    }

    loop {
        tokio::select! {
            _ = &mut stop => break,
            change = changes.recv() => {
                if change.is_none() {
                    break;
                }
            }
        }

        tokio::select! {
            _ = &mut stop => break,
            _ = tokio::time::sleep(options.debounce) => {}
        }
        while changes.try_recv().is_ok() {}

        if !build_and_send(&hub, id, &options, &sink, &mut stop).await {
            break;
        }
    }

    debug!(entry = %options.entry.display(), platform = %options.platform, "Watch stopped");
}

/// Build once, follow the files the build read and deliver the result unless
/// a stop was requested meanwhile. Returns whether watching should go on.
async fn build_and_send(
    hub: &WatchHub,
    id: u64,
    options: &WatchOptions,
    sink: &mpsc::UnboundedSender<BuildOutput>,
    stop: &mut oneshot::Receiver<()>,
) -> bool {
    let job = options.clone();
    let build = match tokio::task::spawn_blocking(move || QuickJsBackend::build_tracked(&job)).await {
        Ok(build) => build,
        Err(e) => Build {
            output: BuildOutput::failure(BuildDiagnostic::backend(format!("build task failed: {}", e))),
            inputs: vec![options.entry.clone()],
        },
    };

    if !matches!(stop.try_recv(), Err(oneshot::error::TryRecvError::Empty)) {
        return false;
    }

    // Missing directories cannot be watched; the build result says why
    let _ = hub.track(id, &build.inputs);

    debug!(
        entry = %options.entry.display(),
        platform = %options.platform,
        success = build.output.is_success(),
        inputs = build.inputs.len(),
        "Build finished"
    );
    sink.send(build.output).is_ok()
}

struct QuickJsWatch {
    hub: Arc<WatchHub>,
    id: u64,
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

#[async_trait]
impl WatchContext for QuickJsWatch {
    async fn dispose(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Watch task ended abnormally: {}", e);
            }
        }
        self.hub.close(self.id);
    }
}

impl Drop for QuickJsWatch {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        self.hub.close(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hotscript_types::bundle::embedded_module;
    use hotscript_types::{BuildErrorKind, Platform};
    use std::time::Duration;
    use tempfile::TempDir;

    fn options(dir: &TempDir, file: &str, platform: Platform) -> WatchOptions {
        WatchOptions::new(dir.path().join(file), platform, file)
            .with_root(dir.path())
            .with_debounce(Duration::from_millis(20))
    }

    async fn next_output(rx: &mut mpsc::UnboundedReceiver<BuildOutput>) -> BuildOutput {
        tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("build within timeout")
            .expect("sink open")
    }

    #[test]
    fn test_build_missing_entry() {
        let dir = TempDir::new().unwrap();
        let output = QuickJsBackend::build(&options(&dir, "gone.js", Platform::Node));
        assert_eq!(output.errors[0].kind, BuildErrorKind::EntryUnresolved);
        assert!(output.artifact.is_none());
    }

    #[test]
    fn test_build_success() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.js"), "export default 1;\n").unwrap();
        let output = QuickJsBackend::build(&options(&dir, "a.js", Platform::Browser));
        let artifact = output.artifact().unwrap();
        assert!(artifact.starts_with("// hotscript:browser a.js\n"));
        assert!(artifact.contains("//# sourceMappingURL=data:application/json;base64,"));
    }

    #[test]
    fn test_build_embeds_imports() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("audio")).unwrap();
        std::fs::write(
            dir.path().join("main.js"),
            "import SimpleSynth from './audio/SimpleSynth.js';\nexport default SimpleSynth;\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("audio/SimpleSynth.js"),
            "import { gain } from '../lib/gain';\nexport default { gain };\n",
        )
        .unwrap();
        std::fs::create_dir(dir.path().join("lib")).unwrap();
        std::fs::write(dir.path().join("lib/gain.js"), "export const gain = 0.5;\n").unwrap();

        let build = QuickJsBackend::build_tracked(&options(&dir, "main.js", Platform::Node));
        let artifact = build.output.artifact().expect("bundle builds");

        let synth = embedded_module(artifact, "audio/SimpleSynth.js").unwrap();
        assert!(synth.starts_with("// hotscript:node audio/SimpleSynth.js\n"));
        assert!(embedded_module(artifact, "lib/gain.js").is_some());
        assert_eq!(
            build.inputs,
            vec![
                dir.path().join("main.js"),
                dir.path().join("audio/SimpleSynth.js"),
                dir.path().join("lib/gain.js"),
            ]
        );
    }

    #[test]
    fn test_unresolved_import_fails_the_build() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("main.js"),
            "export const a = 1;\nimport missing from './missing.js';\n",
        )
        .unwrap();

        let build = QuickJsBackend::build_tracked(&options(&dir, "main.js", Platform::Browser));
        let error = &build.output.errors[0];
        assert_eq!(error.kind, BuildErrorKind::ImportUnresolved);
        assert_eq!(error.text, "Could not resolve \"./missing.js\"");
        let location = error.location.as_ref().unwrap();
        assert_eq!(location.file.as_deref(), Some("main.js"));
        assert_eq!((location.line, location.column), (2, 20));
        assert!(build.output.artifact.is_none());
        // The missing file is followed so creating it triggers a rebuild
        assert!(build.inputs.contains(&dir.path().join("missing.js")));

        std::fs::write(dir.path().join("bare.js"), "import x from 'lodash';\n").unwrap();
        let output = QuickJsBackend::build(&options(&dir, "bare.js", Platform::Node));
        assert_eq!(output.errors[0].kind, BuildErrorKind::ImportUnresolved);
    }

    #[test]
    fn test_syntax_error_in_dependency() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("main.js"), "import './dep.js';\n").unwrap();
        std::fs::write(dir.path().join("dep.js"), "export const = 1;\n").unwrap();

        let output = QuickJsBackend::build(&options(&dir, "main.js", Platform::Node));
        let error = &output.errors[0];
        assert_eq!(error.kind, BuildErrorKind::Syntax);
        assert_eq!(error.location.as_ref().unwrap().file.as_deref(), Some("dep.js"));
    }

    #[tokio::test]
    async fn test_watch_rebuilds_and_dispose_stops() {
        let dir = TempDir::new().unwrap();
        let entry = dir.path().join("a.js");
        std::fs::write(&entry, "export default 1;\n").unwrap();

        let backend = QuickJsBackend::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut context = backend.watch(options(&dir, "a.js", Platform::Node), tx).unwrap();

        assert!(next_output(&mut rx).await.is_success());

        std::fs::write(&entry, "export default = ;\n").unwrap();
        let second = loop {
            let output = next_output(&mut rx).await;
            if !output.is_success() {
                break output;
            }
        };
        assert_eq!(second.errors[0].kind, BuildErrorKind::Syntax);

        context.dispose().await;
        context.dispose().await;
        assert_eq!(backend.sessions(), 0);

        std::fs::write(&entry, "export default 2;\n").unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        // Results produced before dispose may still be queued
        while rx.try_recv().is_ok() {}
        assert!(rx.recv().await.is_none(), "sink must be released after dispose");
    }

    #[tokio::test]
    async fn test_dependency_change_rebuilds_importer() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("main.js"), "export { v } from './dep.js';\n").unwrap();
        std::fs::write(dir.path().join("dep.js"), "export const v = 1;\n").unwrap();

        let backend = QuickJsBackend::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut context = backend.watch(options(&dir, "main.js", Platform::Node), tx).unwrap();
        assert!(next_output(&mut rx).await.is_success());

        std::fs::write(dir.path().join("dep.js"), "export const v = ;\n").unwrap();
        let broken = loop {
            let output = next_output(&mut rx).await;
            if !output.is_success() {
                break output;
            }
        };
        assert_eq!(broken.errors[0].location.as_ref().unwrap().file.as_deref(), Some("dep.js"));

        context.dispose().await;
    }

    #[tokio::test]
    async fn test_sessions_share_one_watcher() {
        let dir = TempDir::new().unwrap();
        let backend = QuickJsBackend::new();
        let mut contexts = Vec::new();
        let mut receivers = Vec::new();
        for i in 0..200 {
            let file = format!("s{}.js", i);
            std::fs::write(dir.path().join(&file), "export default 1;\n").unwrap();
            for platform in Platform::ALL {
                let (tx, rx) = mpsc::unbounded_channel();
                contexts.push(backend.watch(options(&dir, &file, platform), tx).unwrap());
                receivers.push(rx);
            }
        }
        assert_eq!(backend.sessions(), 400);
        assert_eq!(backend.hub.watcher.lock().directories.len(), 1);

        for mut context in contexts {
            context.dispose().await;
        }
        assert_eq!(backend.sessions(), 0);
        assert!(backend.hub.watcher.lock().directories.is_empty());
    }
}
