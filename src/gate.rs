//! Read-only data-quality checks evaluated against a branch.
//!
//! Two check kinds are supported:
//!
//! - `no_nulls` scans only the checked column and fails on any null.
//! - `unique` issues one aggregate query comparing `COUNT(*)` with
//!   `COUNT(DISTINCT col)`. SQL excludes NULLs from the distinct count, so
//!   the result is reported exactly as the engine computes it.
//!
//! A check that cannot run (missing table, failed query) is a [`GateError`],
//! never a failed [`QualityCheckResult`].

use std::fmt;

use arrow::array::{Array, Int64Array};
use arrow::record_batch::RecordBatch;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use tracing::{debug, info, warn};

use crate::client::{DataLakeClientRef, TableRef};
use crate::emit;
use crate::error::{GateError, GateQuerySnafu, ScanSnafu};
use crate::metrics::events::CheckEvaluated;

/// Kind of quality check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    NoNulls,
    Unique,
}

impl CheckKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckKind::NoNulls => "no_nulls",
            CheckKind::Unique => "unique",
        }
    }
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configured check: which column of which table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateSpec {
    pub table: String,
    pub column: String,
    pub check: CheckKind,
}

impl GateSpec {
    pub fn no_nulls(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
            check: CheckKind::NoNulls,
        }
    }

    pub fn unique(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
            check: CheckKind::Unique,
        }
    }
}

/// Diagnostic payload attached to a check result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CheckDetail {
    NullCount { nulls: usize, rows: usize },
    Distinct { total: i64, distinct: i64 },
}

impl fmt::Display for CheckDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckDetail::NullCount { nulls, rows } => write!(f, "{nulls} null(s) in {rows} row(s)"),
            CheckDetail::Distinct { total, distinct } => {
                write!(f, "{distinct} distinct of {total} row(s)")
            }
        }
    }
}

/// Outcome of a single check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityCheckResult {
    pub check: CheckKind,
    pub table: String,
    pub column: String,
    pub passed: bool,
    pub detail: CheckDetail,
}

impl fmt::Display for QualityCheckResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({}.{}) {}: {}",
            self.check,
            self.table,
            self.column,
            if self.passed { "passed" } else { "failed" },
            self.detail
        )
    }
}

/// SQL for the uniqueness check.
pub fn uniqueness_sql(table: &str, column: &str) -> String {
    format!(
        "SELECT COUNT(*) AS total_count, COUNT(DISTINCT {column}) AS unique_count FROM {table}"
    )
}

/// Evaluates checks through an injected lake client.
#[derive(Clone)]
pub struct QualityGate {
    client: DataLakeClientRef,
}

impl QualityGate {
    pub fn new(client: DataLakeClientRef) -> Self {
        Self { client }
    }

    /// Run one check against `branch`/`namespace`.
    pub async fn evaluate(
        &self,
        spec: &GateSpec,
        branch: &str,
        namespace: &str,
    ) -> Result<QualityCheckResult, GateError> {
        let table = TableRef::new(&spec.table, namespace, branch);
        debug!(check = %spec.check, table = %table, column = %spec.column, "Evaluating check");

        let detail = match spec.check {
            CheckKind::NoNulls => self.null_count(table, &spec.column).await?,
            CheckKind::Unique => self.distinct_counts(table, &spec.column).await?,
        };
        let passed = match &detail {
            CheckDetail::NullCount { nulls, .. } => *nulls == 0,
            CheckDetail::Distinct { total, distinct } => total == distinct,
        };

        let result = QualityCheckResult {
            check: spec.check,
            table: spec.table.clone(),
            column: spec.column.clone(),
            passed,
            detail,
        };

        emit!(CheckEvaluated {
            check: spec.check,
            passed,
        });
        if passed {
            info!(branch = %branch, "{result}");
        } else {
            warn!(branch = %branch, "{result}");
        }
        Ok(result)
    }

    async fn null_count(&self, table: TableRef<'_>, column: &str) -> Result<CheckDetail, GateError> {
        let batch = self
            .client
            .scan(table, &[column])
            .await
            .context(ScanSnafu { table: table.name })?;

        let array = batch
            .column_by_name(column)
            .ok_or_else(|| GateError::MalformedResult {
                table: table.name.to_string(),
                message: format!("scan did not return column '{column}'"),
            })?;

        Ok(CheckDetail::NullCount {
            nulls: array.null_count(),
            rows: batch.num_rows(),
        })
    }

    async fn distinct_counts(
        &self,
        table: TableRef<'_>,
        column: &str,
    ) -> Result<CheckDetail, GateError> {
        let sql = uniqueness_sql(table.name, column);
        let batch = self
            .client
            .query(&sql, table.branch, table.namespace)
            .await
            .context(GateQuerySnafu { table: table.name })?;

        Ok(CheckDetail::Distinct {
            total: single_count(&batch, "total_count", table.name)?,
            distinct: single_count(&batch, "unique_count", table.name)?,
        })
    }
}

/// Read the first row of an Int64 count column.
fn single_count(batch: &RecordBatch, column: &str, table: &str) -> Result<i64, GateError> {
    let malformed = |message: String| GateError::MalformedResult {
        table: table.to_string(),
        message,
    };

    let values = batch
        .column_by_name(column)
        .ok_or_else(|| malformed(format!("missing '{column}'")))?
        .as_any()
        .downcast_ref::<Int64Array>()
        .ok_or_else(|| malformed(format!("'{column}' is not Int64")))?;

    if values.is_empty() || values.is_null(0) {
        return Err(malformed(format!("'{column}' has no value")));
    }
    Ok(values.value(0))
}
