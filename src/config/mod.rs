//! Configuration loading and validation.
//!
//! A run is described by one YAML file:
//!
//! ```yaml
//! trunk: main
//! namespace: zilliant
//! ingestion:
//!   branch_prefix: zilliant_upload
//!   source_location: s3://bucket/zilliant-synthetic-data/
//!   file_prefix: zilliant-demo-data
//!   files:
//!     - zilliant-demo-data-2025-02-12-account.csv
//!     - zilliant-demo-data-2025-02-12-transaction_line_item.csv
//!   gates:
//!     - { table: transaction_line_item, column: line_total, check: no_nulls }
//!     - { table: transaction_line_item, column: transaction_line_item_id, check: unique }
//! promotion:
//!   branch_prefix: zilliant_insight_layer
//!   pipeline: transformation_pipeline
//!   merge_failure: warn
//! ```
//!
//! `${VAR}` and `${VAR:-default}` are interpolated from the environment
//! before parsing.

mod vars;

pub use vars::{interpolate, interpolate_with};

use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{
    ConfigError, EmptyBranchPrefixSnafu, EmptyNamespaceSnafu, EmptyPipelineSnafu,
    EmptyTrunkSnafu, IncompleteGateSnafu, NoRetriesSnafu, NoSourceFilesSnafu, NoWorkersSnafu,
    ReadFileSnafu, YamlParseSnafu,
};
use crate::gate::GateSpec;
use crate::source::{SourceFile, TableNamePattern};

/// Main configuration for an end-to-end run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Shared reference that stages branch from and merge into.
    #[serde(default = "default_trunk")]
    pub trunk: String,
    /// Namespace holding the imported and derived tables.
    pub namespace: String,
    pub ingestion: IngestionConfig,
    pub promotion: PromotionConfig,
    #[serde(default)]
    pub branch_naming: BranchNamingConfig,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
    /// Where abandoned branches are recorded (optional).
    #[serde(default)]
    pub ledger: Option<LedgerConfig>,
}

fn default_trunk() -> String {
    "main".to_string()
}

/// Raw extracts and the gates they must pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IngestionConfig {
    #[serde(default = "default_ingestion_prefix")]
    pub branch_prefix: String,
    /// Location prefix the filenames are resolved against.
    pub source_location: String,
    /// Literal prefix of extract filenames; any prefix is accepted when unset.
    #[serde(default)]
    pub file_prefix: Option<String>,
    pub files: Vec<String>,
    #[serde(default)]
    pub gates: Vec<GateSpec>,
}

fn default_ingestion_prefix() -> String {
    "lakegate_upload".to_string()
}

/// What to do when the promotion merge is rejected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeFailurePolicy {
    /// Log the failure and finish the run with `merged = false`.
    #[default]
    Warn,
    /// Fail the run.
    Fail,
}

/// Downstream transformation pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PromotionConfig {
    #[serde(default = "default_promotion_prefix")]
    pub branch_prefix: String,
    /// Pipeline reference passed to the runner (e.g. a project directory).
    pub pipeline: String,
    /// Model manifest validated before the run starts.
    #[serde(default)]
    pub manifest: Option<PathBuf>,
    #[serde(default)]
    pub merge_failure: MergeFailurePolicy,
}

fn default_promotion_prefix() -> String {
    "lakegate_promotion".to_string()
}

/// Branch name generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BranchNamingConfig {
    /// Append a random suffix so runs started in the same second differ.
    #[serde(default = "default_entropy")]
    pub entropy: bool,
}

impl Default for BranchNamingConfig {
    fn default() -> Self {
        Self {
            entropy: default_entropy(),
        }
    }
}

fn default_entropy() -> bool {
    true
}

/// Worker pool and retry policy for per-row enrichment calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnrichmentConfig {
    /// Maximum in-flight calls (default: 4).
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Attempts per row before giving up on rate limits (default: 5).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay before the first retry, doubled per attempt (default: 5000).
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

impl EnrichmentConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

fn default_max_workers() -> usize {
    4
}

fn default_max_retries() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    5000
}

/// Abandoned-branch ledger output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LedgerConfig {
    /// Local directory receiving one NDJSON file per run.
    pub path: String,
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).context(ReadFileSnafu {
            path: path.display().to_string(),
        })?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string, interpolating the environment.
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let text = interpolate(contents)?;
        let config: Config = serde_yaml::from_str(&text).context(YamlParseSnafu)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure!(!self.trunk.trim().is_empty(), EmptyTrunkSnafu);
        ensure!(!self.namespace.trim().is_empty(), EmptyNamespaceSnafu);
        ensure!(
            !self.ingestion.branch_prefix.is_empty(),
            EmptyBranchPrefixSnafu { stage: "ingestion" }
        );
        ensure!(
            !self.promotion.branch_prefix.is_empty(),
            EmptyBranchPrefixSnafu { stage: "promotion" }
        );
        ensure!(!self.ingestion.files.is_empty(), NoSourceFilesSnafu);
        ensure!(!self.promotion.pipeline.is_empty(), EmptyPipelineSnafu);
        for (index, gate) in self.ingestion.gates.iter().enumerate() {
            ensure!(
                !gate.table.is_empty() && !gate.column.is_empty(),
                IncompleteGateSnafu { index }
            );
        }
        ensure!(self.enrichment.max_workers > 0, NoWorkersSnafu);
        ensure!(self.enrichment.max_retries > 0, NoRetriesSnafu);
        self.table_pattern()?;
        Ok(())
    }

    /// Extracts to import, in configured order.
    pub fn source_files(&self) -> Vec<SourceFile> {
        SourceFile::batch(&self.ingestion.source_location, &self.ingestion.files)
    }

    /// Filename pattern used to derive table names.
    pub fn table_pattern(&self) -> Result<TableNamePattern, ConfigError> {
        TableNamePattern::from_prefix(self.ingestion.file_prefix.as_deref())
    }
}
