pub mod errors;

pub use errors::{AtlasError, AtlasErrorCategory, AtlasResult, ExitPlaceholder};

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

/// How independent external invocations of one phase are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ExecutionMode {
    #[default]
    Serial,
    Concurrent { workers: usize },
}

impl ExecutionMode {
    pub fn from_workers(workers: usize) -> Self {
        if workers > 1 {
            Self::Concurrent { workers }
        } else {
            Self::Serial
        }
    }
}

/// Kind of a run directory, as recognised by the metadata parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunKind {
    Atlas,
    Synthe,
    Dfsynthe,
}

impl RunKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Atlas => "ATLAS",
            Self::Synthe => "SYNTHE",
            Self::Dfsynthe => "DFSYNTHE",
        }
    }
}

impl Display for RunKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str((*self).as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunArtifact {
    pub relative_path: PathBuf,
}

impl RunArtifact {
    pub fn new(relative_path: impl Into<PathBuf>) -> Self {
        Self {
            relative_path: relative_path.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ExecutionMode, RunKind};

    #[test]
    fn run_kind_serializes_as_upper_case_tag() {
        let rendered = serde_json::to_string(&RunKind::Dfsynthe).expect("kind should serialize");
        assert_eq!(rendered, "\"DFSYNTHE\"");
        assert_eq!(RunKind::Synthe.to_string(), "SYNTHE");
    }

    #[test]
    fn single_worker_means_serial_execution() {
        assert_eq!(ExecutionMode::from_workers(0), ExecutionMode::Serial);
        assert_eq!(ExecutionMode::from_workers(1), ExecutionMode::Serial);
        assert_eq!(
            ExecutionMode::from_workers(4),
            ExecutionMode::Concurrent { workers: 4 }
        );
    }
}
