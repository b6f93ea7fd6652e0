//! Internal events for metrics emission.
//!
//! Each event struct represents a measurable step of a run. Events implement
//! the `InternalEvent` trait, which records the matching counter or
//! histogram through the `metrics` facade. Without an installed recorder the
//! calls are no-ops.

use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::trace;

use crate::gate::CheckKind;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    /// Emit this event as a metric.
    fn emit(self);
}

/// Stage of an end-to-end run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageName {
    Ingestion,
    Promotion,
}

impl StageName {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::Ingestion => "ingestion",
            StageName::Promotion => "promotion",
        }
    }
}

impl std::fmt::Display for StageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event emitted when a stage branch is created.
pub struct BranchCreated {
    pub stage: StageName,
}

impl InternalEvent for BranchCreated {
    fn emit(self) {
        trace!(stage = self.stage.as_str(), "Branch created");
        counter!("lakegate_branches_created_total", "stage" => self.stage.as_str()).increment(1);
    }
}

/// Event emitted when a stage branch is merged into trunk.
pub struct BranchMerged {
    pub stage: StageName,
}

impl InternalEvent for BranchMerged {
    fn emit(self) {
        trace!(stage = self.stage.as_str(), "Branch merged");
        counter!("lakegate_branches_merged_total", "stage" => self.stage.as_str()).increment(1);
    }
}

/// Event emitted when a stage leaves its branch un-merged.
pub struct BranchAbandoned {
    pub stage: StageName,
    pub reason: &'static str,
}

impl InternalEvent for BranchAbandoned {
    fn emit(self) {
        trace!(
            stage = self.stage.as_str(),
            reason = self.reason,
            "Branch abandoned"
        );
        counter!(
            "lakegate_branches_abandoned_total",
            "stage" => self.stage.as_str(),
            "reason" => self.reason
        )
        .increment(1);
    }
}

/// Event emitted when a source file is imported as a table.
pub struct TableImported;

impl InternalEvent for TableImported {
    fn emit(self) {
        trace!("Table imported");
        counter!("lakegate_tables_imported_total").increment(1);
    }
}

/// Event emitted when a quality check produces a result.
pub struct CheckEvaluated {
    pub check: CheckKind,
    pub passed: bool,
}

impl InternalEvent for CheckEvaluated {
    fn emit(self) {
        let outcome = if self.passed { "passed" } else { "failed" };
        trace!(check = self.check.as_str(), outcome, "Check evaluated");
        counter!(
            "lakegate_checks_total",
            "check" => self.check.as_str(),
            "outcome" => outcome
        )
        .increment(1);
    }
}

/// Event emitted when a stage finishes, successfully or not.
pub struct StageCompleted {
    pub stage: StageName,
    pub duration: Duration,
}

impl InternalEvent for StageCompleted {
    fn emit(self) {
        trace!(
            stage = self.stage.as_str(),
            duration_ms = self.duration.as_millis(),
            "Stage completed"
        );
        histogram!("lakegate_stage_duration_seconds", "stage" => self.stage.as_str())
            .record(self.duration.as_secs_f64());
    }
}

/// Event emitted when an enrichment call is retried after a rate limit.
pub struct EnrichmentRetried {
    pub attempt: u32,
}

impl InternalEvent for EnrichmentRetried {
    fn emit(self) {
        trace!(attempt = self.attempt, "Enrichment retried");
        counter!("lakegate_enrichment_retries_total").increment(1);
    }
}

/// Event emitted when a row falls back to an error sentinel.
pub struct EnrichmentRowFailed;

impl InternalEvent for EnrichmentRowFailed {
    fn emit(self) {
        trace!("Enrichment row failed");
        counter!("lakegate_enrichment_row_failures_total").increment(1);
    }
}

/// Event emitted when ledger records are written.
pub struct LedgerFlushed {
    pub count: usize,
}

impl InternalEvent for LedgerFlushed {
    fn emit(self) {
        trace!(count = self.count, "Ledger flushed");
        counter!("lakegate_ledger_records_total").increment(self.count as u64);
    }
}
