//! Promotion stage: run the transformation pipeline and publish its output.
//!
//! Like ingestion, promotion works on its own branch. A run that reports
//! `failed` is never merged. A successful run is merged into the base
//! reference; what happens when that merge is rejected is decided by
//! [`MergeFailurePolicy`].

use serde::Serialize;
use snafu::prelude::*;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::branch::BranchNamer;
use crate::client::{DataLakeClientRef, Operation, RunStatus};
use crate::config::{Config, MergeFailurePolicy};
use crate::emit;
use crate::error::{InfrastructureSnafu, PipelineFailedSnafu, StageError};
use crate::metrics::events::{
    BranchAbandoned, BranchCreated, BranchMerged, StageCompleted, StageName,
};

/// Outcome of a pipeline run that did not fail.
#[derive(Debug, Clone, Serialize)]
pub struct PromotionReport {
    pub branch: String,
    pub job_id: String,
    /// Terminal status as reported by the runner.
    pub status: String,
    pub merged: bool,
    /// Why the merge was rejected, under [`MergeFailurePolicy::Warn`].
    pub merge_error: Option<String>,
}

/// Runs the transformation pipeline on an isolated branch.
pub struct PromotionStage {
    client: DataLakeClientRef,
    namer: BranchNamer,
    merge_failure: MergeFailurePolicy,
}

impl PromotionStage {
    pub fn new(client: DataLakeClientRef, namer: BranchNamer) -> Self {
        Self {
            client,
            namer,
            merge_failure: MergeFailurePolicy::default(),
        }
    }

    pub fn with_merge_failure(mut self, policy: MergeFailurePolicy) -> Self {
        self.merge_failure = policy;
        self
    }

    pub fn from_config(client: DataLakeClientRef, config: &Config) -> Self {
        let namer = BranchNamer::new(&config.promotion.branch_prefix)
            .with_entropy(config.branch_naming.entropy);
        Self::new(client, namer).with_merge_failure(config.promotion.merge_failure)
    }

    /// Run `pipeline_ref` against a fresh branch of `base_ref`.
    pub async fn run(
        &self,
        base_ref: &str,
        pipeline_ref: &str,
        namespace: &str,
    ) -> Result<PromotionReport, StageError> {
        let started = Instant::now();
        let result = self.execute(base_ref, pipeline_ref, namespace).await;

        match &result {
            Err(e) => {
                warn!(branch = %e.branch(), error = %e, "Promotion aborted, branch left un-merged");
                emit!(BranchAbandoned {
                    stage: StageName::Promotion,
                    reason: e.kind().as_str(),
                });
            }
            Ok(report) if !report.merged => {
                emit!(BranchAbandoned {
                    stage: StageName::Promotion,
                    reason: "merge_rejected",
                });
            }
            Ok(_) => {}
        }
        emit!(StageCompleted {
            stage: StageName::Promotion,
            duration: started.elapsed(),
        });
        result
    }

    async fn execute(
        &self,
        base_ref: &str,
        pipeline_ref: &str,
        namespace: &str,
    ) -> Result<PromotionReport, StageError> {
        let branch = self.namer.next_name();
        info!(branch = %branch, base_ref, pipeline = pipeline_ref, "Starting promotion");

        self.client
            .create_branch(&branch, base_ref)
            .await
            .context(InfrastructureSnafu {
                branch: &branch,
                operation: Operation::CreateBranch,
            })?;
        emit!(BranchCreated {
            stage: StageName::Promotion,
        });

        let run = self
            .client
            .run(pipeline_ref, &branch, namespace)
            .await
            .context(InfrastructureSnafu {
                branch: &branch,
                operation: Operation::Run,
            })?;
        info!(
            branch = %branch,
            job_id = %run.job_id,
            status = %run.job_status,
            "Pipeline finished"
        );

        match run.status() {
            RunStatus::Failed => {
                return PipelineFailedSnafu {
                    branch: &branch,
                    job_id: run.job_id,
                    status: run.job_status,
                }
                .fail();
            }
            RunStatus::Other(status) => {
                warn!(branch = %branch, status = %status, "Unrecognized pipeline status, treating as success");
            }
            RunStatus::Succeeded => {}
        }

        let merge = self.client.merge_branch(&branch, base_ref).await;
        let merge_error = match merge {
            Ok(()) => {
                emit!(BranchMerged {
                    stage: StageName::Promotion,
                });
                info!(branch = %branch, base_ref, "Promotion merged");
                None
            }
            Err(source) => match self.merge_failure {
                MergeFailurePolicy::Fail => {
                    return Err(StageError::Infrastructure {
                        branch,
                        operation: Operation::MergeBranch,
                        source,
                    });
                }
                MergeFailurePolicy::Warn => {
                    error!(branch = %branch, base_ref, error = %source, "Promotion merge failed");
                    Some(source.to_string())
                }
            },
        };

        Ok(PromotionReport {
            merged: merge_error.is_none(),
            branch,
            job_id: run.job_id,
            status: run.job_status,
            merge_error,
        })
    }
}
