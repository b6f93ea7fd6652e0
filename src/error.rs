//! Error types for lakegate using snafu.
//!
//! The taxonomy separates infrastructure failures (the lake rejected an
//! operation), ingestion failures (a source file could not be turned into a
//! table) and pipeline failures (the transformation run reported `failed`).
//! Failed quality checks are not errors at stage level: they come back as
//! data in the stage report.

use snafu::prelude::*;

use crate::client::Operation;
use crate::gate::{CheckKind, QualityCheckResult};

// ============ Lake Errors ============

/// Errors raised by a [`DataLakeClient`](crate::client::DataLakeClient).
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum LakeError {
    /// The referenced branch does not exist.
    #[snafu(display("Branch '{branch}' not found"))]
    BranchNotFound { branch: String },

    /// A branch with the requested name already exists.
    #[snafu(display("Branch '{branch}' already exists"))]
    BranchExists { branch: String },

    /// The namespace does not exist on the branch.
    #[snafu(display("Namespace '{namespace}' not found on '{branch}'"))]
    NamespaceNotFound { namespace: String, branch: String },

    /// The table does not exist on the branch.
    #[snafu(display("Table '{namespace}.{table}' not found on '{branch}'"))]
    TableNotFound {
        table: String,
        namespace: String,
        branch: String,
    },

    /// The source location could not be resolved or read.
    #[snafu(display("Source '{uri}' is unavailable"))]
    SourceUnavailable { uri: String },

    /// Imported data does not match the table schema.
    #[snafu(display("Schema mismatch importing '{uri}' into '{table}'"))]
    SchemaMismatch { uri: String, table: String },

    /// The requested columns are not part of the table.
    #[snafu(display("Column '{column}' not found in '{table}'"))]
    ColumnNotFound { column: String, table: String },

    /// The SQL statement failed.
    #[snafu(display("Query failed: {message}"))]
    Query { message: String },

    /// The pipeline reference is unknown to the runner.
    #[snafu(display("Pipeline '{pipeline}' not found"))]
    PipelineNotFound { pipeline: String },

    /// The merge was rejected because the target moved.
    #[snafu(display("Merge of '{source_branch}' into '{target}' conflicts"))]
    MergeConflict { source_branch: String, target: String },

    /// Arrow failed to assemble a result.
    #[snafu(display("Arrow error: {source}"))]
    Arrow { source: arrow::error::ArrowError },

    /// Any other backend failure.
    #[snafu(display("{operation} failed: {message}"))]
    Backend {
        operation: Operation,
        message: String,
    },
}

// ============ Config Errors ============

/// Errors that can occur during configuration parsing and validation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// Trunk reference is empty.
    #[snafu(display("Trunk reference cannot be empty"))]
    EmptyTrunk,

    /// Namespace is empty.
    #[snafu(display("Namespace cannot be empty"))]
    EmptyNamespace,

    /// Branch prefix is empty for a stage.
    #[snafu(display("Stage '{stage}' has an empty branch_prefix"))]
    EmptyBranchPrefix { stage: String },

    /// No source files were listed.
    #[snafu(display("Ingestion must list at least one source file"))]
    NoSourceFiles,

    /// Pipeline reference is empty.
    #[snafu(display("Promotion pipeline reference cannot be empty"))]
    EmptyPipeline,

    /// Gate references an empty table or column.
    #[snafu(display("Gate #{index} must name both a table and a column"))]
    IncompleteGate { index: usize },

    /// Enrichment worker count must be positive.
    #[snafu(display("Enrichment max_workers must be at least 1"))]
    NoWorkers,

    /// Enrichment needs at least one attempt per row.
    #[snafu(display("Enrichment max_retries must be at least 1"))]
    NoRetries,

    /// The configured file prefix does not produce a valid pattern.
    #[snafu(display("Invalid file pattern: {source}"))]
    FilePattern { source: regex::Error },

    /// Environment variable interpolation failed.
    #[snafu(display("Environment variable interpolation failed:\n{message}"))]
    EnvInterpolation { message: String },

    /// Failed to parse YAML configuration.
    #[snafu(display("Failed to parse YAML: {source}"))]
    YamlParse { source: serde_yaml::Error },

    /// Failed to read configuration file.
    #[snafu(display("Failed to read {path}: {source}"))]
    ReadFile {
        path: String,
        source: std::io::Error,
    },
}

// ============ Manifest Errors ============

/// Errors found while loading or validating a pipeline manifest.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ManifestError {
    /// The manifest declares no models.
    #[snafu(display("Manifest declares no models"))]
    EmptyManifest,

    /// A model depends on a name that is neither a model nor a source table.
    #[snafu(display("Model '{model}' depends on unknown model '{input}'"))]
    UnknownInput { model: String, input: String },

    /// The dependency graph has a cycle.
    #[snafu(display("Dependency cycle involving: {}", models.join(", ")))]
    Cycle { models: Vec<String> },

    /// Failed to read the manifest file.
    #[snafu(display("Failed to read manifest {path}: {source}"))]
    ManifestRead {
        path: String,
        source: std::io::Error,
    },

    /// Failed to parse the manifest.
    #[snafu(display("Failed to parse manifest: {source}"))]
    ManifestParse { source: serde_yaml::Error },
}

// ============ Gate Errors ============

/// A quality check could not be executed (distinct from a failed check).
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum GateError {
    /// The projected scan failed.
    #[snafu(display("Scan of '{table}' failed: {source}"))]
    Scan { table: String, source: LakeError },

    /// The aggregate query failed.
    #[snafu(display("Query on '{table}' failed: {source}"))]
    GateQuery { table: String, source: LakeError },

    /// The result did not have the expected shape.
    #[snafu(display("Unexpected result for '{table}': {message}"))]
    MalformedResult { table: String, message: String },
}

// ============ Stage Errors ============

/// Broad class of a stage failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Infrastructure,
    Ingestion,
    Pipeline,
    QualityGate,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Infrastructure => "infrastructure",
            ErrorKind::Ingestion => "ingestion",
            ErrorKind::Pipeline => "pipeline",
            ErrorKind::QualityGate => "quality_gate",
        }
    }
}

/// Errors that unwind a single stage. Every variant names the branch the
/// stage was working on so it can be inspected afterwards.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StageError {
    /// A lake operation failed.
    #[snafu(display("Failed to {operation} on branch '{branch}': {source}"))]
    Infrastructure {
        branch: String,
        operation: Operation,
        source: LakeError,
    },

    /// The filename does not carry a table name.
    #[snafu(display(
        "Source file '{file}' does not match the expected naming pattern (branch '{branch}')"
    ))]
    UnrecognizedFile { branch: String, file: String },

    /// Creating or loading a table from a source file failed.
    #[snafu(display("Failed to import '{file}' into table '{table}' on branch '{branch}': {source}"))]
    Import {
        branch: String,
        file: String,
        table: String,
        source: LakeError,
    },

    /// A quality check could not be run.
    #[snafu(display(
        "Could not run {check} check on {table}.{column} (branch '{branch}'): {source}"
    ))]
    CheckExecution {
        branch: String,
        check: CheckKind,
        table: String,
        column: String,
        source: GateError,
    },

    /// The transformation pipeline reported a failed terminal status.
    #[snafu(display("Pipeline job {job_id} finished with status '{status}' (branch '{branch}')"))]
    PipelineFailed {
        branch: String,
        job_id: String,
        status: String,
    },
}

impl StageError {
    /// Branch left behind by the failed stage.
    pub fn branch(&self) -> &str {
        match self {
            StageError::Infrastructure { branch, .. }
            | StageError::UnrecognizedFile { branch, .. }
            | StageError::Import { branch, .. }
            | StageError::CheckExecution { branch, .. }
            | StageError::PipelineFailed { branch, .. } => branch,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            StageError::Infrastructure { .. } | StageError::CheckExecution { .. } => {
                ErrorKind::Infrastructure
            }
            StageError::UnrecognizedFile { .. } | StageError::Import { .. } => {
                ErrorKind::Ingestion
            }
            StageError::PipelineFailed { .. } => ErrorKind::Pipeline,
        }
    }
}

// ============ Ledger Errors ============

/// Errors that can occur while recording abandoned branches.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
// Prefix is intentional to avoid snafu selector conflicts (e.g., WriteSnafu)
#[allow(clippy::enum_variant_names)]
pub enum LedgerError {
    /// Failed to prepare the ledger directory.
    #[snafu(display("Failed to open ledger at {path}: {source}"))]
    LedgerOpen {
        path: String,
        source: object_store::Error,
    },

    /// Failed to create the ledger directory.
    #[snafu(display("Failed to create ledger directory {path}: {source}"))]
    LedgerDir {
        path: String,
        source: std::io::Error,
    },

    /// Failed to serialize a ledger record.
    #[snafu(display("Failed to serialize ledger record: {source}"))]
    LedgerSerialize { source: serde_json::Error },

    /// Failed to write ledger records.
    #[snafu(display("Failed to write ledger: {source}"))]
    LedgerWrite { source: object_store::Error },
}

// ============ Enrichment Errors ============

/// Errors from a single enrichment call or from preparing a batch.
#[derive(Debug, Clone, Snafu)]
#[snafu(visibility(pub))]
pub enum EnrichError {
    /// The external service asked us to slow down.
    #[snafu(display("Rate limit exceeded"))]
    RateLimited,

    /// The call failed for another reason.
    #[snafu(display("{message}"))]
    Request { message: String },

    /// The input column is missing or not a string column.
    #[snafu(display("Column '{column}' is missing or not Utf8"))]
    InputColumn { column: String },

    /// Appending the output column failed.
    #[snafu(display("Failed to append '{column}': {message}"))]
    AppendColumn { column: String, message: String },
}

// ============ Orchestrator Error (top-level) ============

/// Top-level errors from an end-to-end run.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum OrchestratorError {
    /// The manifest is invalid; no branch was created.
    #[snafu(display("Invalid pipeline manifest: {source}"))]
    Manifest { source: ManifestError },

    /// The ingestion stage failed.
    #[snafu(display("Ingestion failed: {source}"))]
    Ingestion { source: StageError },

    /// One or more quality gates failed; the ingestion branch was not merged.
    #[snafu(display(
        "{} quality check(s) failed on branch '{branch}': {}",
        failures.len(),
        failures.iter().map(|f| f.to_string()).collect::<Vec<_>>().join("; ")
    ))]
    QualityGates {
        branch: String,
        failures: Vec<QualityCheckResult>,
    },

    /// The promotion stage failed.
    #[snafu(display("Promotion failed: {source}"))]
    Promotion { source: StageError },
}

impl OrchestratorError {
    /// Branch left behind by the failure, if one was created.
    pub fn branch(&self) -> Option<&str> {
        match self {
            OrchestratorError::Manifest { .. } => None,
            OrchestratorError::Ingestion { source } | OrchestratorError::Promotion { source } => {
                Some(source.branch())
            }
            OrchestratorError::QualityGates { branch, .. } => Some(branch),
        }
    }

    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            OrchestratorError::Manifest { .. } => None,
            OrchestratorError::Ingestion { source } | OrchestratorError::Promotion { source } => {
                Some(source.kind())
            }
            OrchestratorError::QualityGates { .. } => Some(ErrorKind::QualityGate),
        }
    }
}
