//! Ingestion stage: raw extracts to validated tables on trunk.
//!
//! The stage works on its own branch. It imports every extract as a table,
//! evaluates every configured quality gate, and merges into the base
//! reference only when all of them passed. Otherwise the branch is left in
//! place for inspection and the report says so.

use serde::Serialize;
use snafu::prelude::*;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::branch::BranchNamer;
use crate::client::{DataLakeClientRef, Operation, TableRef};
use crate::config::Config;
use crate::emit;
use crate::error::{
    CheckExecutionSnafu, ConfigError, ImportSnafu, InfrastructureSnafu, StageError,
    UnrecognizedFileSnafu,
};
use crate::gate::{GateSpec, QualityCheckResult, QualityGate};
use crate::metrics::events::{
    BranchAbandoned, BranchCreated, BranchMerged, StageCompleted, StageName, TableImported,
};
use crate::source::{SourceFile, TableNamePattern};

/// Outcome of an ingestion run that got as far as evaluating its gates.
#[derive(Debug, Clone, Serialize)]
pub struct IngestionReport {
    /// Branch the stage worked on, merged or not.
    pub branch: String,
    /// Tables imported, in source order.
    pub tables: Vec<String>,
    /// Every check evaluated, in configuration order.
    pub checks: Vec<QualityCheckResult>,
    pub merged: bool,
}

impl IngestionReport {
    /// Checks that did not pass.
    pub fn failures(&self) -> Vec<&QualityCheckResult> {
        self.checks.iter().filter(|c| !c.passed).collect()
    }
}

/// Imports extracts on an isolated branch and gates the merge.
pub struct IngestionStage {
    client: DataLakeClientRef,
    namer: BranchNamer,
    pattern: TableNamePattern,
    gate: QualityGate,
}

impl IngestionStage {
    pub fn new(client: DataLakeClientRef, namer: BranchNamer, pattern: TableNamePattern) -> Self {
        let gate = QualityGate::new(client.clone());
        Self {
            client,
            namer,
            pattern,
            gate,
        }
    }

    pub fn from_config(client: DataLakeClientRef, config: &Config) -> Result<Self, ConfigError> {
        let namer = BranchNamer::new(&config.ingestion.branch_prefix)
            .with_entropy(config.branch_naming.entropy);
        Ok(Self::new(client, namer, config.table_pattern()?))
    }

    /// Run the stage.
    ///
    /// Returns a report with `merged = false` when a gate failed; returns an
    /// error when an operation could not be carried out. In both cases the
    /// base reference is untouched.
    pub async fn run(
        &self,
        base_ref: &str,
        source_files: &[SourceFile],
        namespace: &str,
        gate_specs: &[GateSpec],
    ) -> Result<IngestionReport, StageError> {
        let started = Instant::now();
        let result = self
            .execute(base_ref, source_files, namespace, gate_specs)
            .await;

        if let Err(e) = &result {
            warn!(branch = %e.branch(), error = %e, "Ingestion aborted, branch left un-merged");
            emit!(BranchAbandoned {
                stage: StageName::Ingestion,
                reason: e.kind().as_str(),
            });
        }
        emit!(StageCompleted {
            stage: StageName::Ingestion,
            duration: started.elapsed(),
        });
        result
    }

    async fn execute(
        &self,
        base_ref: &str,
        source_files: &[SourceFile],
        namespace: &str,
        gate_specs: &[GateSpec],
    ) -> Result<IngestionReport, StageError> {
        let branch = self.namer.next_name();
        info!(
            branch = %branch,
            base_ref,
            files = source_files.len(),
            gates = gate_specs.len(),
            "Starting ingestion"
        );

        self.client
            .create_branch(&branch, base_ref)
            .await
            .context(InfrastructureSnafu {
                branch: &branch,
                operation: Operation::CreateBranch,
            })?;
        emit!(BranchCreated {
            stage: StageName::Ingestion,
        });

        self.ensure_namespace(namespace, &branch).await?;

        let mut tables = Vec::with_capacity(source_files.len());
        for file in source_files {
            let table = self
                .pattern
                .table_name(&file.filename)
                .context(UnrecognizedFileSnafu {
                    branch: &branch,
                    file: &file.filename,
                })?;
            self.import(&branch, namespace, file, table).await?;
            tables.push(table.to_string());
        }

        // Every gate runs, so the report lists all failures at once.
        let mut checks = Vec::with_capacity(gate_specs.len());
        for spec in gate_specs {
            let result = self
                .gate
                .evaluate(spec, &branch, namespace)
                .await
                .context(CheckExecutionSnafu {
                    branch: &branch,
                    check: spec.check,
                    table: &spec.table,
                    column: &spec.column,
                })?;
            checks.push(result);
        }

        let failed = checks.iter().filter(|c| !c.passed).count();
        if failed > 0 {
            warn!(
                branch = %branch,
                failed,
                total = checks.len(),
                "Quality gates failed, branch left un-merged"
            );
            emit!(BranchAbandoned {
                stage: StageName::Ingestion,
                reason: "quality_gate",
            });
            return Ok(IngestionReport {
                branch,
                tables,
                checks,
                merged: false,
            });
        }

        self.client
            .merge_branch(&branch, base_ref)
            .await
            .context(InfrastructureSnafu {
                branch: &branch,
                operation: Operation::MergeBranch,
            })?;
        emit!(BranchMerged {
            stage: StageName::Ingestion,
        });
        info!(branch = %branch, base_ref, tables = tables.len(), "Ingestion merged");

        Ok(IngestionReport {
            branch,
            tables,
            checks,
            merged: true,
        })
    }

    /// Create `namespace` on `branch` unless it is already there.
    async fn ensure_namespace(&self, namespace: &str, branch: &str) -> Result<(), StageError> {
        let exists = self
            .client
            .has_namespace(namespace, branch)
            .await
            .context(InfrastructureSnafu {
                branch,
                operation: Operation::HasNamespace,
            })?;
        if exists {
            debug!(branch, namespace, "Namespace already present");
            return Ok(());
        }

        self.client
            .create_namespace(namespace, branch)
            .await
            .context(InfrastructureSnafu {
                branch,
                operation: Operation::CreateNamespace,
            })?;
        info!(branch, namespace, "Created namespace");
        Ok(())
    }

    /// Replace `table` with the contents of `file`.
    async fn import(
        &self,
        branch: &str,
        namespace: &str,
        file: &SourceFile,
        table: &str,
    ) -> Result<(), StageError> {
        let uri = file.uri();
        let target = TableRef::new(table, namespace, branch);
        debug!(table = %target, uri = %uri, "Importing");

        self.client
            .create_table(target, &uri, true)
            .await
            .context(ImportSnafu {
                branch,
                file: &file.filename,
                table,
            })?;
        self.client
            .import_data(target, &uri)
            .await
            .context(ImportSnafu {
                branch,
                file: &file.filename,
                table,
            })?;

        emit!(TableImported);
        info!(table = %target, uri = %uri, "Imported table");
        Ok(())
    }
}
