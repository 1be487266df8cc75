//! Script Names
//!
//! A script name is the path of its source file relative to the watched root,
//! with `/` separators and the source extension.

/// Extension every script source file carries
pub const SOURCE_EXTENSION: &str = ".js";

/// Reasons a script name is rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NameError {
    #[error("script name is empty")]
    Empty,

    #[error("script name must be relative, got '{0}'")]
    Absolute(String),

    #[error("script name '{0}' escapes the scripts directory")]
    EscapesRoot(String),

    #[error("script name '{0}' contains an invalid character")]
    InvalidCharacter(String),
}

/// Normalize a script name.
///
/// Backslashes become `/`, empty and `.` segments are dropped and the source
/// extension is appended when missing. Case is preserved so class-style file
/// names such as `MyClass.js` survive. The function is idempotent.
pub fn sanitize_script_name(name: &str) -> Result<String, NameError> {
    if name.contains('\0') {
        return Err(NameError::InvalidCharacter(name.replace('\0', "\\0")));
    }

    let unified = name.replace('\\', "/");
    if unified.starts_with('/') || has_drive_prefix(&unified) {
        return Err(NameError::Absolute(name.to_string()));
    }

    let mut segments = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err(NameError::EscapesRoot(name.to_string())),
            other => segments.push(other),
        }
    }

    if segments.is_empty() {
        return Err(NameError::Empty);
    }

    let mut normalized = segments.join("/");
    if !normalized.ends_with(SOURCE_EXTENSION) {
        normalized.push_str(SOURCE_EXTENSION);
    }

    Ok(normalized)
}

fn has_drive_prefix(name: &str) -> bool {
    let bytes = name.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}
