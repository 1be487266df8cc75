//! Syntax checking
//!
//! Sources are compiled as ES modules without being evaluated, which is
//! enough to surface every parse error QuickJS knows about.

use std::sync::LazyLock;

use hotscript_types::{BuildDiagnostic, SourceLocation};
use regex::Regex;
use rquickjs::{CatchResultExt, CaughtError, Module};

use crate::error::new_context;

/// `at name:line` or `at name:line:col`, optionally inside parentheses
static POSITION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"at (?:.*? \()?.+?:(\d+)(?::(\d+))?\)?\s*$").expect("position pattern is valid")
});

/// Compile `source` as module `name`.
///
/// Imports are not resolved.
pub fn check_syntax(name: &str, source: &str) -> Result<(), BuildDiagnostic> {
    let (_runtime, context) = new_context().map_err(|e| BuildDiagnostic::backend(e.to_string()))?;

    context.with(|ctx| match Module::declare(ctx.clone(), name, source).catch(&ctx) {
        Ok(_) => Ok(()),
        Err(caught) => Err(diagnostic(caught, name, source)),
    })
}

fn diagnostic(caught: CaughtError<'_>, name: &str, source: &str) -> BuildDiagnostic {
    let CaughtError::Exception(exception) = caught else {
        return BuildDiagnostic::backend(caught.to_string());
    };

    let message = exception.message().unwrap_or_else(|| "syntax error".to_string());
    let object = exception.as_object();
    let line: Option<u32> = object.get::<_, Option<u32>>("lineNumber").ok().flatten();
    let column: Option<u32> = object.get::<_, Option<u32>>("columnNumber").ok().flatten();

    let (line, column) = match line {
        Some(line) => (line, column.map(|c| c.saturating_sub(1)).unwrap_or(0)),
        None => match exception.stack().as_deref().and_then(position_from_stack) {
            Some(position) => position,
            None => return BuildDiagnostic::new(hotscript_types::BuildErrorKind::Syntax, message),
        },
    };

    let mut location = SourceLocation::new(name, line, column);
    if let Some(text) = source.split('\n').nth(line.saturating_sub(1) as usize) {
        location = location.with_line_text(text.trim_end_matches('\r'));
    }

    BuildDiagnostic::syntax(message, location)
}

/// First `(line, column)` of a stack, the column converted to 0-based
fn position_from_stack(stack: &str) -> Option<(u32, u32)> {
    stack.lines().find_map(|frame| {
        let captures = POSITION.captures(frame)?;
        let line = captures.get(1)?.as_str().parse().ok()?;
        let column = captures
            .get(2)
            .and_then(|c| c.as_str().parse::<u32>().ok())
            .map(|c| c.saturating_sub(1))
            .unwrap_or(0);
        Some((line, column))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hotscript_types::BuildErrorKind;

    #[test]
    fn test_valid_module() {
        assert!(check_syntax("ok.js", "import x from './x.js';\nexport default x;\n").is_ok());
    }

    #[test]
    fn test_syntax_error_location() {
        let source = "export function f() {\n  return 1 +;\n}\n";
        let err = check_syntax("broken.js", source).unwrap_err();

        assert_eq!(err.kind, BuildErrorKind::Syntax);
        assert!(!err.text.is_empty());
        let location = err.location.expect("syntax errors carry a location");
        assert_eq!(location.file.as_deref(), Some("broken.js"));
        assert_eq!(location.line, 2);
        assert_eq!(location.line_text.as_deref(), Some("  return 1 +;"));
    }

    #[test]
    fn test_position_from_stack() {
        assert_eq!(position_from_stack("    at broken.js:3\n"), Some((3, 0)));
        assert_eq!(position_from_stack("    at f (broken.js:3:7)\n"), Some((3, 6)));
        assert_eq!(position_from_stack("no frames here"), None);
    }
}
