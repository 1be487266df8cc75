//! Error Locator
//!
//! Resolves the throw site of a runtime error to a position in the original
//! source, through the source map embedded in the artifact that was running.

mod stack;

pub use stack::*;

use hotscript_types::bundle::embedded_module;
use hotscript_types::source_map::SourceMap;
use hotscript_types::{split_module_url, MODULE_SCHEME, SourceLocation};
use tracing::debug;

/// Frame the error is attributed to: the first one inside a hotscript
/// module, else the first positioned frame
pub fn throw_site(stack: &str) -> Option<StackFrame> {
    let frames = parse_stack(stack);
    let scheme = format!("{}://", MODULE_SCHEME);
    frames
        .iter()
        .find(|f| f.file.starts_with(&scheme))
        .or_else(|| frames.first())
        .cloned()
}

/// Map the throw site of `stack` back through the inline map of `artifact`,
/// or of the embedded module the throw site lies in.
///
/// Returns `None` when the stack has no positioned frame or the artifact
/// carries no usable map. A position whose original file is unknown keeps its
/// line and column but carries no line text or method name.
pub fn locate(stack: &str, artifact: &str) -> Option<SourceLocation> {
    let frame = throw_site(stack)?;
    let dependency =
        split_module_url(&frame.file).and_then(|(_, path)| embedded_module(artifact, path));
    let artifact = dependency.as_deref().unwrap_or(artifact);

    let map = match SourceMap::from_artifact(artifact) {
        Ok(Some(map)) => map,
        Ok(None) => return None,
        Err(e) => {
            debug!("Unreadable source map: {}", e);
            return None;
        }
    };

    let position = match map.original_position_for(frame.line, frame.column0()) {
        Ok(Some(position)) => position,
        Ok(None) => return None,
        Err(e) => {
            debug!("Bad source map mappings: {}", e);
            return None;
        }
    };

    let Some(file) = position.source else {
        return Some(SourceLocation {
            file: None,
            line: position.line,
            column: position.column,
            line_text: None,
            method_name: None,
        });
    };

    let mut location = SourceLocation::new(file, position.line, position.column);
    if let Some(text) = position.line_text {
        location = location.with_line_text(text);
    }
    if let Some(method) = frame.method_name.as_deref().or(position.name) {
        location = location.with_method_name(method);
    }
    Some(location)
}
