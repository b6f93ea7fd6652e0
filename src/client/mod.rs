//! Capability surface of the versioned data lake.
//!
//! The orchestration layer never talks to a storage engine directly. Every
//! component receives a [`DataLakeClientRef`] at construction time and
//! sequences operations through it.

pub mod memory;

pub use memory::MemoryLake;

use std::fmt;
use std::sync::Arc;

use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::LakeError;

/// A reference-counted lake client.
pub type DataLakeClientRef = Arc<dyn DataLakeClient>;

/// Operations exposed by the lake, used for logging, error context and the
/// call log of [`MemoryLake`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Operation {
    CreateBranch,
    HasNamespace,
    CreateNamespace,
    CreateTable,
    ImportData,
    Scan,
    Query,
    Run,
    MergeBranch,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::CreateBranch => "create_branch",
            Operation::HasNamespace => "has_namespace",
            Operation::CreateNamespace => "create_namespace",
            Operation::CreateTable => "create_table",
            Operation::ImportData => "import_data",
            Operation::Scan => "scan",
            Operation::Query => "query",
            Operation::Run => "run",
            Operation::MergeBranch => "merge_branch",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Location of a table: `branch` / `namespace` . `name`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableRef<'a> {
    pub name: &'a str,
    pub namespace: &'a str,
    pub branch: &'a str,
}

impl<'a> TableRef<'a> {
    pub fn new(name: &'a str, namespace: &'a str, branch: &'a str) -> Self {
        Self {
            name,
            namespace,
            branch,
        }
    }
}

impl fmt::Display for TableRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}.{}", self.branch, self.namespace, self.name)
    }
}

/// Terminal status of a transformation pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Succeeded,
    Failed,
    Other(String),
}

impl RunStatus {
    /// Classify a raw status string, ignoring case.
    pub fn parse(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("failed") {
            RunStatus::Failed
        } else if raw.eq_ignore_ascii_case("success") || raw.eq_ignore_ascii_case("succeeded") {
            RunStatus::Succeeded
        } else {
            RunStatus::Other(raw.to_string())
        }
    }
}

/// Outcome reported by the pipeline runner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub job_id: String,
    /// Raw status as reported by the runner (e.g. "SUCCESS", "Failed").
    pub job_status: String,
    #[serde(default)]
    pub detail: String,
}

impl PipelineRun {
    pub fn status(&self) -> RunStatus {
        RunStatus::parse(&self.job_status)
    }

    pub fn is_failed(&self) -> bool {
        self.status() == RunStatus::Failed
    }
}

/// Branch, namespace, table, query and pipeline primitives of the lake.
///
/// Implementations must make `merge_branch` atomic: either every change on
/// the source branch lands on the target, or none does.
#[async_trait]
pub trait DataLakeClient: Send + Sync {
    /// Create `branch` from the head of `from_ref`.
    async fn create_branch(&self, branch: &str, from_ref: &str) -> Result<(), LakeError>;

    /// Check whether `namespace` exists on `reference`.
    async fn has_namespace(&self, namespace: &str, reference: &str) -> Result<bool, LakeError>;

    /// Create `namespace` on `branch`.
    async fn create_namespace(&self, namespace: &str, branch: &str) -> Result<(), LakeError>;

    /// Create the table with the schema of `source_uri`. With `replace`, an
    /// existing table of the same name is dropped first.
    async fn create_table(
        &self,
        table: TableRef<'_>,
        source_uri: &str,
        replace: bool,
    ) -> Result<(), LakeError>;

    /// Load the rows found at `source_uri` into an existing table.
    async fn import_data(&self, table: TableRef<'_>, source_uri: &str) -> Result<(), LakeError>;

    /// Read the given columns only.
    async fn scan(&self, table: TableRef<'_>, columns: &[&str]) -> Result<RecordBatch, LakeError>;

    /// Run a SQL statement against `reference` with `namespace` as default schema.
    async fn query(
        &self,
        sql: &str,
        reference: &str,
        namespace: &str,
    ) -> Result<RecordBatch, LakeError>;

    /// Run the transformation pipeline and wait for its terminal status.
    async fn run(
        &self,
        pipeline: &str,
        branch: &str,
        namespace: &str,
    ) -> Result<PipelineRun, LakeError>;

    /// Atomically merge `source_branch` into `into_branch`.
    async fn merge_branch(&self, source_branch: &str, into_branch: &str) -> Result<(), LakeError>;
}
