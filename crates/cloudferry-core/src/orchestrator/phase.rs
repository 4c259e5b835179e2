use std::fmt;

use serde::{Deserialize, Serialize};

/// Stage of a migration run.
///
/// Runs advance `Initializing -> Scanning -> Migrating -> Verifying -> Done`;
/// `Failed` is reachable from any non-terminal stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationPhase {
    Initializing,
    Scanning,
    Migrating,
    Verifying,
    Done,
    Failed,
}

impl MigrationPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, MigrationPhase::Done | MigrationPhase::Failed)
    }

    /// The stage after `self` on the success path.
    pub fn next(self) -> Option<MigrationPhase> {
        match self {
            MigrationPhase::Initializing => Some(MigrationPhase::Scanning),
            MigrationPhase::Scanning => Some(MigrationPhase::Migrating),
            MigrationPhase::Migrating => Some(MigrationPhase::Verifying),
            MigrationPhase::Verifying => Some(MigrationPhase::Done),
            MigrationPhase::Done | MigrationPhase::Failed => None,
        }
    }

    pub fn can_transition_to(self, to: MigrationPhase) -> bool {
        if self.is_terminal() {
            return false;
        }
        to == MigrationPhase::Failed || self.next() == Some(to)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MigrationPhase::Initializing => "initializing",
            MigrationPhase::Scanning => "scanning",
            MigrationPhase::Migrating => "migrating",
            MigrationPhase::Verifying => "verifying",
            MigrationPhase::Done => "done",
            MigrationPhase::Failed => "failed",
        }
    }
}

impl fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
