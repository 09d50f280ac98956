//! Batches: one template paired with an ordered payload, tracked through a status lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::BatchId;
use crate::payload::PayloadItem;
use crate::template::Template;

/// Batch processing status.
///
/// The lifecycle only moves forward:
///
/// ```text
/// pending ──► processing ──► done
///    │             │
///    └─────────────┴───────► failed
/// ```
///
/// `done` and `failed` are terminal. Writing the same status again is allowed
/// (a redelivered message may redo a finished batch).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Created, waiting to be processed
    Pending,
    /// Optionally set by a caller to signal an in-flight run
    Processing,
    /// All payload items rendered and persisted
    Done,
    /// A render failed; no output persisted
    Failed,
}

impl BatchStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchStatus::Done | BatchStatus::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            BatchStatus::Pending => 0,
            BatchStatus::Processing => 1,
            BatchStatus::Done | BatchStatus::Failed => 2,
        }
    }

    /// Whether moving from `self` to `next` keeps the lifecycle forward-only.
    pub fn can_transition_to(&self, next: BatchStatus) -> bool {
        if *self == next {
            return true;
        }
        !self.is_terminal() && next.rank() > self.rank()
    }

    /// Statuses from which `next` is reachable (including `next` itself).
    pub fn allowed_predecessors(next: BatchStatus) -> Vec<BatchStatus> {
        [
            BatchStatus::Pending,
            BatchStatus::Processing,
            BatchStatus::Done,
            BatchStatus::Failed,
        ]
        .into_iter()
        .filter(|s| s.can_transition_to(next))
        .collect()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Processing => "processing",
            BatchStatus::Done => "done",
            BatchStatus::Failed => "failed",
        }
    }
}

impl core::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for BatchStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BatchStatus::Pending),
            "processing" => Ok(BatchStatus::Processing),
            "done" => Ok(BatchStatus::Done),
            "failed" => Ok(BatchStatus::Failed),
            other => Err(DomainError::validation(format!("unknown batch status: {other}"))),
        }
    }
}

/// A batch record as loaded from storage (template and payload included).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    pub id: BatchId,
    pub template: Template,
    pub payload: Vec<PayloadItem>,
    pub output: Vec<String>,
    pub status: BatchStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Batch {
    /// Materialize a freshly created batch (`pending`, no output).
    pub fn create(id: BatchId, new: NewBatch) -> Self {
        let now = Utc::now();
        Self {
            id,
            template: new.template,
            payload: new.payload,
            output: Vec::new(),
            status: BatchStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a partial update, enforcing the lifecycle and output invariants.
    ///
    /// Either the whole update applies or nothing changes.
    pub fn apply(&mut self, update: &BatchUpdate) -> DomainResult<()> {
        update.validate_against(self.status, self.payload.len())?;

        if let Some(output) = &update.output {
            self.output = output.clone();
        }
        if let Some(status) = update.status {
            self.status = status;
        }
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Partial batch update; `None` fields are left untouched.
///
/// Output and status travel together so a store can commit them in one write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<BatchStatus>,
}

impl BatchUpdate {
    /// All renders succeeded.
    pub fn completed(output: Vec<String>) -> Self {
        Self {
            output: Some(output),
            status: Some(BatchStatus::Done),
        }
    }

    /// A render failed: status only, never partial output.
    pub fn failed() -> Self {
        Self {
            output: None,
            status: Some(BatchStatus::Failed),
        }
    }

    pub fn status(status: BatchStatus) -> Self {
        Self {
            output: None,
            status: Some(status),
        }
    }

    /// Check this update against the current record state.
    ///
    /// The output length is checked against the status the record ends up
    /// with, so an output-only update of a `done` batch is covered too.
    pub fn validate_against(&self, current: BatchStatus, payload_len: usize) -> DomainResult<()> {
        if let Some(next) = self.status {
            if !current.can_transition_to(next) {
                return Err(DomainError::InvalidTransition { from: current, to: next });
            }
        }

        let resulting = self.status.unwrap_or(current);
        let output_changes = self.output.is_some() || current != BatchStatus::Done;
        if resulting == BatchStatus::Done && output_changes {
            let output_len = self.output.as_ref().map_or(0, Vec::len);
            if output_len != payload_len {
                return Err(DomainError::OutputMismatch {
                    payload: payload_len,
                    output: output_len,
                });
            }
        }

        Ok(())
    }
}

/// Input for creating a batch (the external creator's concern; used by API and fixtures).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBatch {
    #[serde(default)]
    pub id: Option<BatchId>,
    pub template: Template,
    #[serde(default)]
    pub payload: Vec<PayloadItem>,
}

impl NewBatch {
    pub fn new(template: Template, payload: Vec<PayloadItem>) -> Self {
        Self {
            id: None,
            template,
            payload,
        }
    }

    pub fn with_id(mut self, id: impl Into<BatchId>) -> Self {
        self.id = Some(id.into());
        self
    }
}
