//! Captured output batches.

use serde::{Deserialize, Serialize};

/// Classification attached to a captured output line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    /// Standard output and non-error log records.
    Info,
    /// Standard error and error log records.
    Error,
}

impl Classification {
    /// Both classifications, in drain order.
    pub const ALL: [Classification; 2] = [Classification::Info, Classification::Error];

    /// The wire name of this classification.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An ordered run of completed lines sharing one classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogBatch {
    /// Which stream the lines came from.
    pub classification: Classification,
    /// Completed lines in emission order, without terminators.
    pub lines: Vec<String>,
}

impl LogBatch {
    /// Create a batch holding the given lines.
    pub fn new(classification: Classification, lines: Vec<String>) -> Self {
        Self {
            classification,
            lines,
        }
    }
}
