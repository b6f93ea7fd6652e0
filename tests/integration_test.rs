//! Integration tests for lakegate

mod common;

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use arrow::record_batch::RecordBatch;
use lakegate::client::{DataLakeClient, MemoryLake, Operation, PipelineRun, TableRef};
use lakegate::error::{ErrorKind, LakeError, OrchestratorError};
use lakegate::ledger::BranchLedger;
use lakegate::Orchestrator;

use common::*;

mod config_tests {
    use super::*;
    use lakegate::config::MergeFailurePolicy;
    use lakegate::gate::CheckKind;

    #[test]
    fn test_run_config_parsing() {
        let config = config("  merge_failure: fail\nbranch_naming:\n  entropy: false\n");

        assert_eq!(config.trunk, "main");
        assert_eq!(config.ingestion.files.len(), 5);
        assert_eq!(config.ingestion.gates[0].check, CheckKind::NoNulls);
        assert_eq!(config.ingestion.gates[1].check, CheckKind::Unique);
        assert_eq!(config.promotion.merge_failure, MergeFailurePolicy::Fail);
        assert!(!config.branch_naming.entropy);
    }

    #[test]
    fn test_table_names_from_configured_files() {
        let config = config("");
        let pattern = config.table_pattern().unwrap();
        let tables: Vec<_> = config
            .source_files()
            .iter()
            .map(|f| pattern.table_name(&f.filename).unwrap().to_string())
            .collect();

        assert_eq!(
            tables,
            vec![
                "account",
                "product_data",
                "supplier_sku_lookup",
                "customer",
                "transaction_line_item"
            ]
        );
    }
}

mod end_to_end_tests {
    use super::*;

    #[tokio::test]
    async fn test_clean_run_promotes_after_ingestion_merge() {
        let lake = shared_lake();
        register_extracts(&lake, clean_line_items()).await;
        register_pipeline(&lake, "SUCCESS").await;

        let orchestrator = Orchestrator::from_config(lake.clone(), config("")).unwrap();
        let summary = orchestrator.run_all().await.unwrap();

        assert!(summary.ingestion.merged);
        assert_eq!(summary.ingestion.tables.len(), 5);
        assert_eq!(summary.ingestion.checks.len(), 2);
        assert!(summary.ingestion.checks.iter().all(|c| c.passed));
        assert!(summary.promotion.merged);
        assert!(summary.ingestion.branch.starts_with("zilliant_upload_"));
        assert!(summary.promotion.branch.starts_with("zilliant_insight_layer_"));

        let calls = lake.calls().await;
        let position = |op: Operation, target: &str| {
            calls
                .iter()
                .position(|c| c.operation == op && c.target == target)
                .unwrap()
        };
        let ingestion_merge = position(Operation::MergeBranch, &summary.ingestion.branch);
        let promotion_branch = position(Operation::CreateBranch, &summary.promotion.branch);
        let run = position(Operation::Run, PIPELINE);

        assert_eq!(lake.call_count(Operation::Run).await, 1);
        assert!(ingestion_merge < promotion_branch);
        assert!(promotion_branch < run);

        let trunk = lake.snapshot("main").await.unwrap();
        assert_eq!(trunk.table_names().len(), 6);
        assert_eq!(
            trunk
                .table(NAMESPACE, "transaction_line_item")
                .unwrap()
                .num_rows(),
            3
        );
        assert!(trunk.table(NAMESPACE, "top_selling_suppliers").is_some());
    }

    #[tokio::test]
    async fn test_ingestion_call_sequence() {
        let lake = shared_lake();
        register_extracts(&lake, clean_line_items()).await;
        register_pipeline(&lake, "SUCCESS").await;

        Orchestrator::from_config(lake.clone(), config(""))
            .unwrap()
            .run_all()
            .await
            .unwrap();

        let ops: Vec<Operation> = lake.calls().await.iter().map(|c| c.operation).collect();
        let mut expected = vec![
            Operation::CreateBranch,
            Operation::HasNamespace,
            Operation::CreateNamespace,
        ];
        for _ in 0..5 {
            expected.extend([Operation::CreateTable, Operation::ImportData]);
        }
        expected.extend([
            Operation::Scan,
            Operation::Query,
            Operation::MergeBranch,
            Operation::CreateBranch,
            Operation::Run,
            Operation::MergeBranch,
        ]);
        assert_eq!(ops, expected);
    }

    #[tokio::test]
    async fn test_failed_gate_stops_run() {
        let lake = shared_lake();
        register_extracts(
            &lake,
            line_items(
                vec![Some(1), Some(2), Some(3)],
                vec![Some(19.99), None, Some(120.5)],
            ),
        )
        .await;
        register_pipeline(&lake, "SUCCESS").await;

        let orchestrator = Orchestrator::from_config(lake.clone(), config("")).unwrap();
        let err = orchestrator.run_all().await.unwrap_err();

        match &err {
            OrchestratorError::QualityGates { branch, failures } => {
                assert!(branch.starts_with("zilliant_upload_"));
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].column, "line_total");
            }
            other => panic!("expected gate failure, got {other}"),
        }
        assert_eq!(err.kind(), Some(ErrorKind::QualityGate));
        assert_eq!(lake.call_count(Operation::MergeBranch).await, 0);
        assert_eq!(lake.call_count(Operation::Run).await, 0);
        assert!(lake.snapshot("main").await.unwrap().table_names().is_empty());
    }

    #[tokio::test]
    async fn test_failed_pipeline_keeps_ingested_data() {
        let lake = shared_lake();
        register_extracts(&lake, clean_line_items()).await;
        register_pipeline(&lake, "FAILED").await;

        let orchestrator = Orchestrator::from_config(lake.clone(), config("")).unwrap();
        let err = orchestrator.run_all().await.unwrap_err();

        assert!(matches!(err, OrchestratorError::Promotion { .. }));
        assert_eq!(err.kind(), Some(ErrorKind::Pipeline));
        assert!(err.branch().unwrap().starts_with("zilliant_insight_layer_"));

        // Ingestion's merge stands; nothing from the pipeline reached trunk.
        let trunk = lake.snapshot("main").await.unwrap();
        assert_eq!(trunk.table_names().len(), 5);
        assert!(trunk.table(NAMESPACE, "top_selling_suppliers").is_none());
        assert_eq!(lake.call_count(Operation::MergeBranch).await, 1);
    }
}

mod namespace_tests {
    use super::*;

    #[tokio::test]
    async fn test_existing_namespace_is_not_recreated() {
        let lake = shared_lake();
        lake.seed_table("main", NAMESPACE, "legacy", clean_line_items())
            .await
            .unwrap();
        register_extracts(&lake, clean_line_items()).await;
        register_pipeline(&lake, "SUCCESS").await;

        Orchestrator::from_config(lake.clone(), config(""))
            .unwrap()
            .run_all()
            .await
            .unwrap();

        assert_eq!(lake.call_count(Operation::HasNamespace).await, 1);
        assert_eq!(lake.call_count(Operation::CreateNamespace).await, 0);
        let trunk = lake.snapshot("main").await.unwrap();
        assert!(trunk.table(NAMESPACE, "legacy").is_some());
    }

    #[tokio::test]
    async fn test_namespace_created_once_per_fresh_lake() {
        let lake = shared_lake();
        register_extracts(&lake, clean_line_items()).await;
        register_pipeline(&lake, "SUCCESS").await;
        let orchestrator = Orchestrator::from_config(lake.clone(), config("")).unwrap();

        orchestrator.run_all().await.unwrap();
        orchestrator.run_all().await.unwrap();

        assert_eq!(lake.call_count(Operation::CreateNamespace).await, 1);
    }
}

mod failure_tests {
    use super::*;
    use lakegate::error::StageError;

    #[tokio::test]
    async fn test_unrecognized_file_stops_later_imports() {
        let lake = shared_lake();
        register_extracts(&lake, clean_line_items()).await;
        let mut config = config("");
        config.ingestion.files.insert(2, "notes-2025-02-12.txt".to_string());

        let orchestrator = Orchestrator::from_config(lake.clone(), config).unwrap();
        let err = orchestrator.run_all().await.unwrap_err();

        match &err {
            OrchestratorError::Ingestion {
                source: StageError::UnrecognizedFile { file, .. },
            } => assert_eq!(file, "notes-2025-02-12.txt"),
            other => panic!("expected unrecognized file, got {other}"),
        }
        assert_eq!(err.kind(), Some(ErrorKind::Ingestion));
        // The first two files were imported on the branch, nothing after.
        assert_eq!(lake.call_count(Operation::ImportData).await, 2);
        assert_eq!(lake.call_count(Operation::MergeBranch).await, 0);
    }

    #[tokio::test]
    async fn test_import_failure_names_file_and_branch() {
        let lake = shared_lake();
        register_extracts(&lake, clean_line_items()).await;
        lake.fail_next(Operation::ImportData, "malformed csv").await;

        let orchestrator = Orchestrator::from_config(lake.clone(), config("")).unwrap();
        let err = orchestrator.run_all().await.unwrap_err();

        match &err {
            OrchestratorError::Ingestion {
                source: StageError::Import { file, table, branch, .. },
            } => {
                assert_eq!(file, FILES[0]);
                assert_eq!(table, "account");
                assert!(branch.starts_with("zilliant_upload_"));
            }
            other => panic!("expected import failure, got {other}"),
        }
        assert!(lake.snapshot("main").await.unwrap().table_names().is_empty());
    }

    #[tokio::test]
    async fn test_promotion_branch_failure_keeps_ingestion_merge() {
        let lake = shared_lake();
        register_extracts(&lake, clean_line_items()).await;
        register_pipeline(&lake, "SUCCESS").await;
        let client = Arc::new(FlakyLake::new(lake.clone(), Operation::CreateBranch, 2));

        let orchestrator = Orchestrator::from_config(client, config("")).unwrap();
        let err = orchestrator.run_all().await.unwrap_err();

        assert!(matches!(
            err,
            OrchestratorError::Promotion {
                source: StageError::Infrastructure {
                    operation: Operation::CreateBranch,
                    ..
                }
            }
        ));
        assert_eq!(lake.snapshot("main").await.unwrap().table_names().len(), 5);
        assert_eq!(lake.call_count(Operation::Run).await, 0);
    }

    #[tokio::test]
    async fn test_promotion_merge_failure_warns_by_default() {
        let lake = shared_lake();
        register_extracts(&lake, clean_line_items()).await;
        register_pipeline(&lake, "SUCCESS").await;
        let client = Arc::new(FlakyLake::new(lake.clone(), Operation::MergeBranch, 2));

        let summary = Orchestrator::from_config(client, config(""))
            .unwrap()
            .run_all()
            .await
            .unwrap();

        assert!(summary.ingestion.merged);
        assert!(!summary.promotion.merged);
        assert!(summary.promotion.merge_error.unwrap().contains("merge_branch"));
    }

    #[tokio::test]
    async fn test_promotion_merge_failure_policy_fail() {
        let lake = shared_lake();
        register_extracts(&lake, clean_line_items()).await;
        register_pipeline(&lake, "SUCCESS").await;
        let client = Arc::new(FlakyLake::new(lake.clone(), Operation::MergeBranch, 2));

        let err = Orchestrator::from_config(client, config("  merge_failure: fail\n"))
            .unwrap()
            .run_all()
            .await
            .unwrap_err();

        assert!(matches!(err, OrchestratorError::Promotion { .. }));
        assert_eq!(err.kind(), Some(ErrorKind::Infrastructure));
    }
}

mod ledger_tests {
    use super::*;
    use tempfile::TempDir;

    fn ledger_lines(dir: &TempDir) -> Vec<serde_json::Value> {
        let entry = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .next()
            .unwrap();
        std::fs::read_to_string(entry.path())
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_gate_failure_recorded() {
        let temp_dir = TempDir::new().unwrap();
        let lake = shared_lake();
        register_extracts(
            &lake,
            line_items(vec![Some(1), Some(1)], vec![Some(1.0), Some(2.0)]),
        )
        .await;
        let config = config(&format!(
            "ledger:\n  path: {}\n",
            temp_dir.path().display()
        ));
        let ledger = BranchLedger::from_config(config.ledger.as_ref())
            .unwrap()
            .unwrap();

        let err = Orchestrator::from_config(lake.clone(), config)
            .unwrap()
            .with_ledger(ledger)
            .run_all()
            .await
            .unwrap_err();

        let lines = ledger_lines(&temp_dir);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["branch"], err.branch().unwrap());
        assert_eq!(lines[0]["stage"], "ingestion");
        assert_eq!(lines[0]["kind"], "quality_gate");
        let checks = lines[0]["failed_checks"].as_array().unwrap();
        assert_eq!(checks.len(), 1);
        assert!(checks[0].as_str().unwrap().contains("transaction_line_item_id"));
    }

    #[tokio::test]
    async fn test_pipeline_failure_recorded() {
        let temp_dir = TempDir::new().unwrap();
        let lake = shared_lake();
        register_extracts(&lake, clean_line_items()).await;
        register_pipeline(&lake, "failed").await;
        let ledger = BranchLedger::open(temp_dir.path().to_str().unwrap()).unwrap();

        let err = Orchestrator::from_config(lake.clone(), config(""))
            .unwrap()
            .with_ledger(ledger)
            .run_all()
            .await
            .unwrap_err();

        let lines = ledger_lines(&temp_dir);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["branch"], err.branch().unwrap());
        assert_eq!(lines[0]["stage"], "promotion");
        assert_eq!(lines[0]["kind"], "pipeline");
    }
}

/// Delegates to a MemoryLake but fails the `nth` call of one operation.
struct FlakyLake {
    inner: Arc<MemoryLake>,
    operation: Operation,
    nth: usize,
    seen: AtomicUsize,
}

impl FlakyLake {
    fn new(inner: Arc<MemoryLake>, operation: Operation, nth: usize) -> Self {
        Self {
            inner,
            operation,
            nth,
            seen: AtomicUsize::new(0),
        }
    }

    fn check(&self, operation: Operation) -> Result<(), LakeError> {
        if operation == self.operation && self.seen.fetch_add(1, Ordering::SeqCst) + 1 == self.nth
        {
            return Err(LakeError::Backend {
                operation,
                message: "injected".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl DataLakeClient for FlakyLake {
    async fn create_branch(&self, branch: &str, from_ref: &str) -> Result<(), LakeError> {
        self.check(Operation::CreateBranch)?;
        self.inner.create_branch(branch, from_ref).await
    }

    async fn has_namespace(&self, namespace: &str, reference: &str) -> Result<bool, LakeError> {
        self.check(Operation::HasNamespace)?;
        self.inner.has_namespace(namespace, reference).await
    }

    async fn create_namespace(&self, namespace: &str, branch: &str) -> Result<(), LakeError> {
        self.check(Operation::CreateNamespace)?;
        self.inner.create_namespace(namespace, branch).await
    }

    async fn create_table(
        &self,
        table: TableRef<'_>,
        source_uri: &str,
        replace: bool,
    ) -> Result<(), LakeError> {
        self.check(Operation::CreateTable)?;
        self.inner.create_table(table, source_uri, replace).await
    }

    async fn import_data(&self, table: TableRef<'_>, source_uri: &str) -> Result<(), LakeError> {
        self.check(Operation::ImportData)?;
        self.inner.import_data(table, source_uri).await
    }

    async fn scan(&self, table: TableRef<'_>, columns: &[&str]) -> Result<RecordBatch, LakeError> {
        self.check(Operation::Scan)?;
        self.inner.scan(table, columns).await
    }

    async fn query(
        &self,
        sql: &str,
        reference: &str,
        namespace: &str,
    ) -> Result<RecordBatch, LakeError> {
        self.check(Operation::Query)?;
        self.inner.query(sql, reference, namespace).await
    }

    async fn run(
        &self,
        pipeline: &str,
        branch: &str,
        namespace: &str,
    ) -> Result<PipelineRun, LakeError> {
        self.check(Operation::Run)?;
        self.inner.run(pipeline, branch, namespace).await
    }

    async fn merge_branch(&self, source_branch: &str, into_branch: &str) -> Result<(), LakeError> {
        self.check(Operation::MergeBranch)?;
        self.inner.merge_branch(source_branch, into_branch).await
    }
}
