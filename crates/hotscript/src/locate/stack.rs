//! Stack trace parsing

use std::sync::LazyLock;

use regex::Regex;

/// `at fn (file:line:col)`, `at file:line:col` and QuickJS `at fn (file:line)`
static AT_FRAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*at (?:(?P<method>.+?) \()?(?P<file>.+?):(?P<line>\d+)(?::(?P<col>\d+))?\)?\s*$")
        .expect("frame pattern is valid")
});

/// Gecko and JavaScriptCore: `fn@file:line:col`
static AT_SIGN_FRAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?P<method>[^@\s]*)@(?P<file>.+?):(?P<line>\d+)(?::(?P<col>\d+))?\s*$")
        .expect("frame pattern is valid")
});

/// One positioned frame of a stack trace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    pub method_name: Option<String>,
    pub file: String,
    /// 1-based
    pub line: u32,
    /// 1-based, as printed by the engine
    pub column: Option<u32>,
}

impl StackFrame {
    /// Column converted to the 0-based convention of source maps
    pub fn column0(&self) -> u32 {
        self.column.map(|c| c.saturating_sub(1)).unwrap_or(0)
    }
}

/// Every frame that carries a position, outermost last
pub fn parse_stack(stack: &str) -> Vec<StackFrame> {
    stack.lines().filter_map(parse_frame).collect()
}

pub fn parse_frame(line: &str) -> Option<StackFrame> {
    let captures = AT_FRAME
        .captures(line)
        .or_else(|| AT_SIGN_FRAME.captures(line))?;

    let method_name = captures
        .name("method")
        .map(|m| m.as_str().trim())
        .map(|m| m.strip_prefix("async ").unwrap_or(m))
        .filter(|m| !m.is_empty() && !m.starts_with('<'))
        .map(str::to_string);

    Some(StackFrame {
        method_name,
        file: captures.name("file")?.as_str().to_string(),
        line: captures.name("line")?.as_str().parse().ok()?,
        column: captures.name("col").and_then(|c| c.as_str().parse().ok()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_patterns_compile() {
        LazyLock::force(&AT_FRAME);
        LazyLock::force(&AT_SIGN_FRAME);
    }

    #[test]
    fn test_v8_frames() {
        let frame = parse_frame("    at add (hotscript://1234/math.js:3:17)").unwrap();
        assert_eq!(frame.method_name.as_deref(), Some("add"));
        assert_eq!(frame.file, "hotscript://1234/math.js");
        assert_eq!((frame.line, frame.column), (3, Some(17)));
        assert_eq!(frame.column0(), 16);

        let frame = parse_frame("    at file:///srv/app.js:10:5").unwrap();
        assert_eq!(frame.method_name, None);
        assert_eq!(frame.file, "file:///srv/app.js");
        assert_eq!(frame.line, 10);

        let frame = parse_frame("    at async run (hotscript://1/a.js:2:1)").unwrap();
        assert_eq!(frame.method_name.as_deref(), Some("run"));
    }

    #[test]
    fn test_quickjs_frames() {
        let frame = parse_frame("    at run (hotscript://1/a.js:4)").unwrap();
        assert_eq!((frame.line, frame.column), (4, None));
        assert_eq!(frame.column0(), 0);

        let frame = parse_frame("    at <anonymous> (hotscript://1/a.js:1:1)").unwrap();
        assert_eq!(frame.method_name, None);

        assert!(parse_frame("    at <eval> (native)").is_none());
    }

    #[test]
    fn test_gecko_frames() {
        let frame = parse_frame("render@http://host/app.js:12:3").unwrap();
        assert_eq!(frame.method_name.as_deref(), Some("render"));
        assert_eq!(frame.file, "http://host/app.js");
        assert_eq!((frame.line, frame.column), (12, Some(3)));

        let frame = parse_frame("@http://host/app.js:1:1").unwrap();
        assert_eq!(frame.method_name, None);
    }

    #[test]
    fn test_skips_message_lines() {
        let stack = "ReferenceError: x is not defined\n    at f (a.js:2:3)\n    at native\n";
        let frames = parse_stack(stack);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].file, "a.js");
    }
}
