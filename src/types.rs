use std::str::FromStr;

use serde::Deserialize;

/// Where the deps log is kept between builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DepsLogMode {
    /// Persist to `<exec_root>/<dir>/.siso_deps`.
    File,
    /// Keep in memory only (lost when the process exits).
    Memory,
}

impl Default for DepsLogMode {
    fn default() -> Self {
        DepsLogMode::File
    }
}

impl FromStr for DepsLogMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "file" => Ok(DepsLogMode::File),
            "memory" => Ok(DepsLogMode::Memory),
            other => Err(format!(
                "invalid deps_log: {other} (expected \"file\" or \"memory\")"
            )),
        }
    }
}

/// Where a step's command actually ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecLocation {
    Local,
    Remote,
}
