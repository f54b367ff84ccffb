use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::services::janitor::WorkingSet;
use crate::services::transport::MediaKind;

/// Pipeline stage of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Admitted,
    Fetching,
    Muxing,
    ThumbProcessing,
    Emitting,
    Done,
    Failed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Admitted => "admitted",
            Stage::Fetching => "fetching",
            Stage::Muxing => "muxing",
            Stage::ThumbProcessing => "thumb_processing",
            Stage::Emitting => "emitting",
            Stage::Done => "done",
            Stage::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Done | Stage::Failed)
    }

    /// Strictly sequential forward path; `Failed` from any non-terminal stage
    pub fn can_transition_to(&self, next: Stage) -> bool {
        match (self, next) {
            (from, Stage::Failed) => !from.is_terminal(),
            (Stage::Admitted, Stage::Fetching)
            | (Stage::Fetching, Stage::Muxing)
            | (Stage::Muxing, Stage::ThumbProcessing)
            | (Stage::ThumbProcessing, Stage::Emitting)
            | (Stage::Emitting, Stage::Done) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Published on every stage transition
#[derive(Debug, Clone, Serialize)]
pub struct StageEvent {
    pub operation_id: String,
    pub source_key: String,
    pub stage: Stage,
    pub at: DateTime<Utc>,
}

/// One admitted rename, from admission to its terminal stage
#[derive(Debug)]
pub struct Operation {
    pub id: String,
    pub source_key: String,
    pub started_at: DateTime<Utc>,
    stage: Stage,
    pub working: WorkingSet,
}

impl Operation {
    pub fn new(id: String, source_key: String, working: WorkingSet) -> Self {
        Self {
            id,
            source_key,
            started_at: Utc::now(),
            stage: Stage::Admitted,
            working,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Move to `next`. Illegal transitions are programming errors.
    pub(super) fn advance(&mut self, next: Stage) {
        debug_assert!(
            self.stage.can_transition_to(next),
            "illegal stage transition {} -> {}",
            self.stage,
            next
        );
        self.stage = next;
    }

    pub fn event(&self) -> StageEvent {
        StageEvent {
            operation_id: self.id.clone(),
            source_key: self.source_key.clone(),
            stage: self.stage,
            at: Utc::now(),
        }
    }
}

/// Outcome of a delivered rename
#[derive(Debug, Clone, Serialize)]
pub struct RenameReport {
    pub source_key: String,
    pub file_name: String,
    pub kind: MediaKind,
    pub caption: String,
    pub with_thumbnail: bool,
    pub bytes: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}
