//! Artifacts produced by the backend evaluate in the evaluator, and their
//! inline maps lead thrown errors back to the source.

use hotscript_js_runtime::{QuickJsBackend, QuickJsEvaluator};
use hotscript_types::bundle::embedded_module;
use hotscript_types::source_map::SourceMap;
use hotscript_types::{ModuleEvaluator, ModuleId, Platform, ScriptModule, WatchOptions};
use serde_json::json;
use tempfile::TempDir;

fn build(dir: &TempDir, name: &str, source: &str, platform: Platform) -> String {
    let entry = dir.path().join(name);
    std::fs::write(&entry, source).unwrap();
    QuickJsBackend::build(&WatchOptions::new(entry, platform, name).with_root(dir.path()))
        .artifact()
        .expect("source builds")
        .to_string()
}

#[test]
fn test_both_platform_artifacts_evaluate() {
    let dir = TempDir::new().unwrap();
    let source = "export default function add(a, b) {\n  return a + b;\n}\n";

    for platform in Platform::ALL {
        let artifact = build(&dir, "export-default.js", source, platform);
        let module = QuickJsEvaluator::new()
            .instantiate(&ModuleId::new("export-default.js"), &artifact)
            .unwrap();
        assert_eq!(module.call("default", &[json!(4), json!(4)]).unwrap(), json!(8));
    }
}

#[test]
fn test_node_artifact_sees_file_url() {
    let dir = TempDir::new().unwrap();
    let artifact = build(&dir, "url.js", "export const url = import.meta.url;\n", Platform::Node);
    let module = QuickJsEvaluator::new()
        .instantiate(&ModuleId::new("url.js"), &artifact)
        .unwrap();

    let url = module.get("url").unwrap();
    let url = url.as_str().unwrap();
    assert!(url.starts_with("file://"));
    assert!(url.ends_with("/url.js"));
}

#[test]
fn test_reference_error_maps_to_source_line() {
    let dir = TempDir::new().unwrap();
    let source = "export function run() {\n  const a = 1;\n  return a + notDefined;\n}\n";
    let artifact = build(&dir, "throws.js", source, Platform::Node);

    let id = ModuleId::new("throws.js");
    let module = QuickJsEvaluator::new().instantiate(&id, &artifact).unwrap();
    let err = module.call("run", &[]).unwrap_err();
    assert_eq!(err.name.as_deref(), Some("ReferenceError"));

    // First frame: `... (hotscript://<uuid>/throws.js:<line>[:<col>])`
    let frame = err.stack.lines().find(|l| l.contains(id.as_str())).unwrap();
    let position = frame
        .rsplit(id.as_str())
        .next()
        .unwrap()
        .trim_end_matches(')')
        .trim_start_matches(':');
    let line: u32 = position.split(':').next().unwrap().parse().unwrap();

    let map = SourceMap::from_artifact(&artifact).unwrap().unwrap();
    let original = map.original_position_for(line, 0).unwrap().unwrap();
    assert_eq!(original.line, 3);
    assert_eq!(original.line_text, Some("  return a + notDefined;"));
}

#[test]
fn test_bundled_imports_evaluate() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir(dir.path().join("audio")).unwrap();
    std::fs::write(
        dir.path().join("audio/SimpleSynth.js"),
        "export default class SimpleSynth {\n  voices() {\n    return 4;\n  }\n}\n",
    )
    .unwrap();
    let source = "import SimpleSynth from './audio/SimpleSynth.js';\nexport function voices() {\n  return new SimpleSynth().voices();\n}\n";

    for platform in Platform::ALL {
        let artifact = build(&dir, "main.js", source, platform);
        let module = QuickJsEvaluator::new()
            .instantiate(&ModuleId::new("main.js"), &artifact)
            .unwrap();
        assert_eq!(module.call("voices", &[]).unwrap(), json!(4));
    }
}

#[test]
fn test_dependency_throw_maps_through_embedded_map() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("dep.js"), "export function boom() {\n  return notDefined;\n}\n").unwrap();
    let artifact = build(&dir, "main.js", "export { boom } from './dep.js';\n", Platform::Node);

    let id = ModuleId::new("main.js");
    let module = QuickJsEvaluator::new().instantiate(&id, &artifact).unwrap();
    let err = module.call("boom", &[]).unwrap_err();

    let dependency = format!("{}dep.js", id.scope());
    let frame = err.stack.lines().find(|l| l.contains(&dependency)).unwrap();
    let line: u32 = frame
        .rsplit(dependency.as_str())
        .next()
        .unwrap()
        .trim_end_matches(')')
        .trim_start_matches(':')
        .split(':')
        .next()
        .unwrap()
        .parse()
        .unwrap();

    let embedded = embedded_module(&artifact, "dep.js").unwrap();
    let map = SourceMap::from_artifact(&embedded).unwrap().unwrap();
    let original = map.original_position_for(line, 0).unwrap().unwrap();
    assert_eq!(original.line, 2);
    assert_eq!(original.source, Some("dep.js"));
}
