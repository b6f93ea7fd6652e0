//! End-to-end run: ingestion, then promotion.
//!
//! Stages run strictly in sequence. Promotion starts only after the
//! ingestion branch was merged, so downstream models never see data that
//! did not pass its quality gates. Any failure stops the run; the branch
//! that failed is left in the lake and, when a ledger is configured,
//! recorded there.

use serde::Serialize;
use std::collections::BTreeSet;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::client::DataLakeClientRef;
use crate::config::Config;
use crate::error::{ConfigError, ErrorKind, OrchestratorError, StageError};
use crate::gate::QualityCheckResult;
use crate::ingest::{IngestionReport, IngestionStage};
use crate::ledger::BranchLedger;
use crate::manifest::{Input, PipelineManifest};
use crate::metrics::events::StageName;
use crate::promote::{PromotionReport, PromotionStage};

/// Reports of a run in which both stages completed.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub ingestion: IngestionReport,
    pub promotion: PromotionReport,
    /// Manifest models in execution order, when a manifest was given.
    pub models: Vec<String>,
}

/// Sequences the two stages of a run.
pub struct Orchestrator {
    config: Config,
    ingestion: IngestionStage,
    promotion: PromotionStage,
    manifest: Option<PipelineManifest>,
    ledger: Option<BranchLedger>,
}

impl Orchestrator {
    pub fn new(config: Config, ingestion: IngestionStage, promotion: PromotionStage) -> Self {
        Self {
            config,
            ingestion,
            promotion,
            manifest: None,
            ledger: None,
        }
    }

    /// Build both stages from configuration around one shared client.
    pub fn from_config(client: DataLakeClientRef, config: Config) -> Result<Self, ConfigError> {
        config.validate()?;
        let ingestion = IngestionStage::from_config(client.clone(), &config)?;
        let promotion = PromotionStage::from_config(client, &config);
        Ok(Self::new(config, ingestion, promotion))
    }

    /// Use an already loaded manifest instead of `promotion.manifest`.
    pub fn with_manifest(mut self, manifest: PipelineManifest) -> Self {
        self.manifest = Some(manifest);
        self
    }

    pub fn with_ledger(mut self, ledger: BranchLedger) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run ingestion and, if it merged, promotion.
    pub async fn run_all(&self) -> Result<RunSummary, OrchestratorError> {
        let started = Instant::now();
        let result = self.execute().await;

        if let Some(ledger) = &self.ledger
            && let Err(e) = ledger.finalize().await
        {
            error!("Failed to finalize branch ledger: {}", e);
        }

        match &result {
            Ok(_) => info!(elapsed_ms = started.elapsed().as_millis(), "Run complete"),
            Err(e) => error!(
                branch = e.branch().unwrap_or("-"),
                kind = e.kind().map(|k| k.as_str()).unwrap_or("manifest"),
                error = %e,
                "Run failed"
            ),
        }
        result
    }

    async fn execute(&self) -> Result<RunSummary, OrchestratorError> {
        let models = self.validate_manifest()?;
        let trunk = self.config.trunk.as_str();
        let namespace = self.config.namespace.as_str();

        let files = self.config.source_files();
        let ingestion = match self
            .ingestion
            .run(trunk, &files, namespace, &self.config.ingestion.gates)
            .await
        {
            Ok(report) => report,
            Err(source) => {
                self.record_stage_error(StageName::Ingestion, &source).await;
                return Err(OrchestratorError::Ingestion { source });
            }
        };

        if !ingestion.merged {
            let failures: Vec<QualityCheckResult> =
                ingestion.failures().into_iter().cloned().collect();
            warn!(
                branch = %ingestion.branch,
                failed = failures.len(),
                "Stopping before promotion"
            );
            self.record_gate_failures(&ingestion.branch, &failures).await;
            return Err(OrchestratorError::QualityGates {
                branch: ingestion.branch,
                failures,
            });
        }

        let promotion = match self
            .promotion
            .run(trunk, &self.config.promotion.pipeline, namespace)
            .await
        {
            Ok(report) => report,
            Err(source) => {
                self.record_stage_error(StageName::Promotion, &source).await;
                return Err(OrchestratorError::Promotion { source });
            }
        };

        if let Some(reason) = &promotion.merge_error
            && let Some(ledger) = &self.ledger
        {
            ledger
                .record_abandoned(
                    &promotion.branch,
                    StageName::Promotion,
                    ErrorKind::Infrastructure,
                    reason.clone(),
                    Vec::new(),
                )
                .await;
        }

        Ok(RunSummary {
            ingestion,
            promotion,
            models,
        })
    }

    /// Validate the manifest, if any, before a branch is created.
    fn validate_manifest(&self) -> Result<Vec<String>, OrchestratorError> {
        let loaded;
        let manifest = match (&self.manifest, &self.config.promotion.manifest) {
            (Some(manifest), _) => manifest,
            (None, Some(path)) => {
                loaded = PipelineManifest::from_file(path)
                    .map_err(|source| OrchestratorError::Manifest { source })?;
                &loaded
            }
            (None, None) => return Ok(Vec::new()),
        };

        let order = manifest
            .execution_order()
            .map_err(|source| OrchestratorError::Manifest { source })?;
        info!(models = ?order, "Pipeline manifest validated");

        for source in self.unresolved_sources(manifest) {
            warn!(
                source = %source,
                "Manifest reads a table this run does not ingest"
            );
        }
        Ok(order.into_iter().map(str::to_string).collect())
    }

    /// Manifest sources in the run's namespace that no configured file
    /// produces. Sources in other namespaces are assumed to exist on trunk.
    fn unresolved_sources(&self, manifest: &PipelineManifest) -> Vec<String> {
        let Ok(pattern) = self.config.table_pattern() else {
            return Vec::new();
        };
        let ingested: BTreeSet<&str> = self
            .config
            .ingestion
            .files
            .iter()
            .filter_map(|file| pattern.table_name(file))
            .collect();

        manifest
            .source_tables()
            .into_iter()
            .filter(|source| match Input::parse(source) {
                Input::Source { namespace, table } => {
                    namespace == self.config.namespace && !ingested.contains(table)
                }
                Input::Model(_) => false,
            })
            .map(str::to_string)
            .collect()
    }

    async fn record_stage_error(&self, stage: StageName, err: &StageError) {
        if let Some(ledger) = &self.ledger {
            ledger
                .record_abandoned(err.branch(), stage, err.kind(), err.to_string(), Vec::new())
                .await;
        }
    }

    async fn record_gate_failures(&self, branch: &str, failures: &[QualityCheckResult]) {
        if let Some(ledger) = &self.ledger {
            ledger
                .record_abandoned(
                    branch,
                    StageName::Ingestion,
                    ErrorKind::QualityGate,
                    format!("{} quality check(s) failed", failures.len()),
                    failures.iter().map(ToString::to_string).collect(),
                )
                .await;
        }
    }
}
