pub mod assessment;
pub mod coach;
pub mod oracle;
pub mod page_ranges;
pub mod progress;
pub mod selector;
pub mod verdicts;

use std::fmt;

use serde::Serialize;

/// Pipeline stage an oracle-backed failure belongs to, so callers can retry just that stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Generation,
    Grading,
    Oral,
    Evaluation,
    Sync,
}

impl Stage {
    pub const fn as_str(self) -> &'static str {
        match self {
            Stage::Generation => "generation",
            Stage::Grading => "grading",
            Stage::Oral => "oral",
            Stage::Evaluation => "evaluation",
            Stage::Sync => "sync",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
