//! Diagnostics
//!
//! Build-time and runtime failures share one location shape so that
//! presentation code can render both the same way.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Platform;

// ─────────────────────────────────────────────────────────────────────────────
// Location
// ─────────────────────────────────────────────────────────────────────────────

/// Position in an original source file.
///
/// `line` is 1-based, `column` is 0-based.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceLocation {
    /// Original file, `None` when the position could not be mapped to a source
    pub file: Option<String>,
    pub line: u32,
    pub column: u32,
    /// Literal text of the offending line
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_text: Option<String>,
    /// Enclosing function, when the stack frame named one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method_name: Option<String>,
}

impl SourceLocation {
    pub fn new(file: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            file: Some(file.into()),
            line,
            column,
            line_text: None,
            method_name: None,
        }
    }

    pub fn with_line_text(mut self, text: impl Into<String>) -> Self {
        self.line_text = Some(text.into());
        self
    }

    pub fn with_method_name(mut self, name: impl Into<String>) -> Self {
        self.method_name = Some(name.into());
        self
    }
}

impl std::fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let file = self.file.as_deref().unwrap_or("<unknown>");
        write!(f, "{}:{}:{}", file, self.line, self.column + 1)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Build Diagnostic
// ─────────────────────────────────────────────────────────────────────────────

/// Classification of a build failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BuildErrorKind {
    /// The source does not parse
    Syntax,
    /// The entry file could not be found, e.g. while it is being deleted or renamed
    EntryUnresolved,
    /// An import of the entry or of one of its dependencies could not be resolved
    ImportUnresolved,
    /// The backend itself failed
    Backend,
    #[default]
    Other,
}

/// A failed build, in the shape bundlers usually report them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildDiagnostic {
    pub text: String,
    #[serde(default)]
    pub kind: BuildErrorKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

impl BuildDiagnostic {
    pub fn new(kind: BuildErrorKind, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind,
            location: None,
            notes: Vec::new(),
        }
    }

    pub fn syntax(text: impl Into<String>, location: SourceLocation) -> Self {
        Self::new(BuildErrorKind::Syntax, text).with_location(location)
    }

    pub fn entry_unresolved(entry: impl std::fmt::Display) -> Self {
        Self::new(
            BuildErrorKind::EntryUnresolved,
            format!("Could not resolve \"{}\"", entry),
        )
    }

    pub fn import_unresolved(specifier: &str, location: SourceLocation) -> Self {
        Self::new(
            BuildErrorKind::ImportUnresolved,
            format!("Could not resolve \"{}\"", specifier),
        )
        .with_location(location)
    }

    pub fn backend(text: impl Into<String>) -> Self {
        Self::new(BuildErrorKind::Backend, text)
    }

    pub fn with_location(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Runtime Diagnostic
// ─────────────────────────────────────────────────────────────────────────────

/// An error thrown by an executing artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeDiagnostic {
    /// Platform whose artifact was running
    pub source: Platform,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub message: String,
    pub stack: String,
    /// Human readable summary, filled in when the location is resolved
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
    pub reported_at: DateTime<Utc>,
}

impl RuntimeDiagnostic {
    pub fn new(source: Platform, message: impl Into<String>, stack: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            source,
            name: None,
            text: message.clone(),
            message,
            stack: stack.into(),
            location: None,
            reported_at: Utc::now(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Diagnostic
// ─────────────────────────────────────────────────────────────────────────────

/// Either kind of diagnostic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Diagnostic {
    Build(BuildDiagnostic),
    Runtime(RuntimeDiagnostic),
}

impl Diagnostic {
    pub fn text(&self) -> &str {
        match self {
            Diagnostic::Build(d) => &d.text,
            Diagnostic::Runtime(d) => &d.text,
        }
    }

    pub fn location(&self) -> Option<&SourceLocation> {
        match self {
            Diagnostic::Build(d) => d.location.as_ref(),
            Diagnostic::Runtime(d) => d.location.as_ref(),
        }
    }

    /// Render a header line, the location and a code frame.
    ///
    /// When `source` is given the frame shows surrounding lines, otherwise it
    /// falls back to the location's `line_text`.
    pub fn render(&self, source: Option<&str>) -> String {
        let mut out = match self {
            Diagnostic::Build(d) => format!("build error: {}", d.text),
            Diagnostic::Runtime(d) => format!("runtime error ({}): {}", d.source, d.text),
        };

        let Some(location) = self.location() else {
            return out;
        };

        out.push_str(&format!("\n  --> {}", location));
        if let Some(method) = &location.method_name {
            out.push_str(&format!(" in {}", method));
        }

        let frame = match (source, &location.line_text) {
            (Some(source), _) => render_code_frame(source, location.line, location.column),
            (None, Some(text)) => render_frame(
                vec![(Some(location.line as usize), text.as_str())],
                location.line as usize,
                location.column as usize,
            ),
            (None, None) => return out,
        };

        out.push('\n');
        out.push_str(&frame);
        out
    }
}

impl From<BuildDiagnostic> for Diagnostic {
    fn from(d: BuildDiagnostic) -> Self {
        Diagnostic::Build(d)
    }
}

impl From<RuntimeDiagnostic> for Diagnostic {
    fn from(d: RuntimeDiagnostic) -> Self {
        Diagnostic::Runtime(d)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Code Frame
// ─────────────────────────────────────────────────────────────────────────────

/// Render the lines around `line` (1-based) with a caret under `column` (0-based).
///
/// ```text
///   1 | const a = 1;
///   2 | const b = 2;
/// > 3 | foo(a, b);
///     | ^
///   4 | bar();
/// ```
pub fn render_code_frame(source: &str, line: u32, column: u32) -> String {
    let lines: Vec<&str> = source.split('\n').collect();
    let target = line.max(1) as usize;

    let first = target.saturating_sub(2).max(1);
    let last = (target + 2).min(lines.len());

    let mut entries = Vec::new();
    for number in first..=target.min(lines.len()) {
        entries.push((Some(number), lines[number - 1].trim_end_matches('\r')));
    }
    if target > lines.len() {
        entries.push((Some(target), ""));
    }
    for number in (target + 1)..=last {
        entries.push((Some(number), lines[number - 1].trim_end_matches('\r')));
    }

    render_frame(entries, target, column as usize)
}

fn render_frame(entries: Vec<(Option<usize>, &str)>, target: usize, column: usize) -> String {
    let width = entries
        .iter()
        .filter_map(|(n, _)| *n)
        .max()
        .unwrap_or(target)
        .to_string()
        .len();

    let mut rendered = Vec::with_capacity(entries.len() + 1);
    for (number, code) in entries {
        match number {
            Some(n) if n == target => {
                rendered.push(format!("> {:>width$} | {}", n, code));
                rendered.push(format!("  {:>width$} | {}^", "", " ".repeat(column)));
            }
            Some(n) => rendered.push(format!("  {:>width$} | {}", n, code)),
            None => rendered.push(format!("  {:>width$} | {}", "", code)),
        }
    }

    rendered.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = "line 1\nline 2\nline 3\nline 4\nline 5\nline 6\nline 7";

    #[test]
    fn test_code_frame_middle() {
        let frame = render_code_frame(SOURCE, 4, 2);
        let expected = [
            "  2 | line 2",
            "  3 | line 3",
            "> 4 | line 4",
            "    |   ^",
            "  5 | line 5",
            "  6 | line 6",
        ]
        .join("\n");
        assert_eq!(frame, expected);
    }

    #[test]
    fn test_code_frame_first_line() {
        let frame = render_code_frame(SOURCE, 1, 0);
        let expected = ["> 1 | line 1", "    | ^", "  2 | line 2", "  3 | line 3"].join("\n");
        assert_eq!(frame, expected);
    }

    #[test]
    fn test_code_frame_pads_line_numbers() {
        let source: String = (1..=12).map(|i| format!("l{}\n", i)).collect();
        let frame = render_code_frame(&source, 9, 0);
        assert!(frame.contains(">  9 | l9"));
        assert!(frame.contains("  11 | l11"));
    }

    #[test]
    fn test_render_runtime_diagnostic_from_line_text() {
        let mut diag = RuntimeDiagnostic::new(Platform::Node, "boom is not defined", "");
        diag.location = Some(
            SourceLocation::new("index.js", 3, 4)
                .with_line_text("    boom();")
                .with_method_name("enter"),
        );

        let rendered = Diagnostic::from(diag).render(None);
        assert!(rendered.starts_with("runtime error (node): boom is not defined"));
        assert!(rendered.contains("--> index.js:3:5 in enter"));
        assert!(rendered.contains("> 3 |     boom();"));
    }

    #[test]
    fn test_render_without_location() {
        let diag = BuildDiagnostic::backend("backend crashed");
        assert_eq!(Diagnostic::from(diag).render(None), "build error: backend crashed");
    }

    #[test]
    fn test_location_serializes_camel_case() {
        let location = SourceLocation::new("a.js", 1, 0).with_line_text("x");
        let json = serde_json::to_value(&location).unwrap();
        assert_eq!(json["lineText"], "x");
        assert!(json.get("methodName").is_none());
    }
}
