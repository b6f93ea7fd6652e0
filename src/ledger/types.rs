//! Ledger record types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::metrics::events::StageName;

/// A branch left un-merged by a failed stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbandonedBranch {
    pub branch: String,
    pub stage: StageName,
    pub kind: ErrorKind,
    /// Human-readable cause.
    pub reason: String,
    /// Failed checks, rendered, when the cause was a quality gate.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_checks: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// Abandoned branches counted per stage.
#[derive(Debug, Clone, Default)]
pub struct LedgerStats {
    pub ingestion: usize,
    pub promotion: usize,
}

impl LedgerStats {
    pub fn increment(&mut self, stage: StageName) {
        match stage {
            StageName::Ingestion => self.ingestion += 1,
            StageName::Promotion => self.promotion += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.ingestion + self.promotion
    }
}
