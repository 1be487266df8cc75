//! Execution targets

use serde::{Deserialize, Serialize};

/// Platform a script is built for.
///
/// Every script is built twice, once per platform. `Browser` is the embedded
/// target, `Node` the host target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Browser,
    #[default]
    Node,
}

impl Platform {
    /// Both platforms, in slot order
    pub const ALL: [Platform; 2] = [Platform::Browser, Platform::Node];

    /// Slot index used by the build correlator
    pub fn index(self) -> usize {
        match self {
            Platform::Browser => 0,
            Platform::Node => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Browser => "browser",
            Platform::Node => "node",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "browser" => Ok(Platform::Browser),
            "node" => Ok(Platform::Node),
            other => Err(format!("unknown platform '{}', expected 'browser' or 'node'", other)),
        }
    }
}
