//! In-memory reference implementation of [`DataLakeClient`].
//!
//! Branches are full snapshots tagged with a version counter. A merge is a
//! fast-forward of the target to the source snapshot and is rejected when
//! the target has moved since the source was forked from it, so concurrent
//! promotions never overwrite each other silently.
//!
//! The lake keeps a call log and supports one-shot failure injection per
//! operation, which makes it the harness for stage and orchestrator tests.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, LazyLock};

use arrow::array::{Array, ArrayRef, Int64Array};
use arrow::compute::concat_batches;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use arrow::util::display::{ArrayFormatter, FormatOptions};
use async_trait::async_trait;
use regex::Regex;
use snafu::prelude::*;
use tokio::sync::Mutex;
use tracing::debug;

use super::{DataLakeClient, Operation, PipelineRun, RunStatus, TableRef};
use crate::error::{
    ArrowSnafu, BranchExistsSnafu, BranchNotFoundSnafu, ColumnNotFoundSnafu, LakeError,
    MergeConflictSnafu, NamespaceNotFoundSnafu, PipelineNotFoundSnafu, QuerySnafu,
    SchemaMismatchSnafu, SourceUnavailableSnafu, TableNotFoundSnafu,
};

/// `SELECT COUNT(*) AS a, COUNT(DISTINCT col) AS b FROM t`
static COUNT_DISTINCT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?is)^\s*SELECT\s+COUNT\(\s*\*\s*\)\s+AS\s+(\w+)\s*,\s*COUNT\(\s*DISTINCT\s+(\w+)\s*\)\s+AS\s+(\w+)\s+FROM\s+([\w.]+)\s*;?\s*$",
    )
    .expect("valid count-distinct pattern")
});

/// Tables of one branch, keyed by namespace then table name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    namespaces: BTreeMap<String, BTreeMap<String, RecordBatch>>,
}

impl Snapshot {
    pub fn has_namespace(&self, namespace: &str) -> bool {
        self.namespaces.contains_key(namespace)
    }

    pub fn table(&self, namespace: &str, table: &str) -> Option<&RecordBatch> {
        self.namespaces.get(namespace)?.get(table)
    }

    /// Qualified names (`namespace.table`) of every table in the snapshot.
    pub fn table_names(&self) -> Vec<String> {
        self.namespaces
            .iter()
            .flat_map(|(ns, tables)| tables.keys().map(move |t| format!("{ns}.{t}")))
            .collect()
    }
}

/// One entry of the call log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub operation: Operation,
    /// Branch, table or pipeline the call addressed.
    pub target: String,
}

#[derive(Debug, Clone)]
struct BranchState {
    snapshot: Snapshot,
    version: u64,
    /// Parent branch and its version at fork time.
    forked_from: Option<(String, u64)>,
}

impl BranchState {
    fn touch(&mut self) {
        self.version += 1;
    }
}

#[derive(Debug, Clone)]
struct PipelineScript {
    status: String,
    outputs: Vec<(String, RecordBatch)>,
}

#[derive(Debug, Default)]
struct LakeState {
    branches: BTreeMap<String, BranchState>,
    sources: HashMap<String, RecordBatch>,
    pipelines: HashMap<String, PipelineScript>,
    injected: BTreeMap<Operation, String>,
    calls: Vec<Call>,
    next_job: u64,
}

impl LakeState {
    /// Log the call and consume an injected failure for the operation.
    fn enter(&mut self, operation: Operation, target: impl Into<String>) -> Result<(), LakeError> {
        let target = target.into();
        debug!(operation = %operation, target = %target, "memory lake call");
        self.calls.push(Call { operation, target });
        match self.injected.remove(&operation) {
            Some(message) => Err(LakeError::Backend { operation, message }),
            None => Ok(()),
        }
    }

    fn branch(&self, branch: &str) -> Result<&BranchState, LakeError> {
        self.branches
            .get(branch)
            .context(BranchNotFoundSnafu { branch })
    }

    fn branch_mut(&mut self, branch: &str) -> Result<&mut BranchState, LakeError> {
        self.branches
            .get_mut(branch)
            .context(BranchNotFoundSnafu { branch })
    }

    fn source(&self, uri: &str) -> Result<RecordBatch, LakeError> {
        self.sources
            .get(uri)
            .cloned()
            .context(SourceUnavailableSnafu { uri })
    }

    fn table(&self, table: TableRef<'_>) -> Result<&RecordBatch, LakeError> {
        let state = self.branch(table.branch)?;
        ensure!(
            state.snapshot.has_namespace(table.namespace),
            NamespaceNotFoundSnafu {
                namespace: table.namespace,
                branch: table.branch,
            }
        );
        state
            .snapshot
            .table(table.namespace, table.name)
            .context(TableNotFoundSnafu {
                table: table.name,
                namespace: table.namespace,
                branch: table.branch,
            })
    }
}

/// In-memory versioned lake.
#[derive(Debug)]
pub struct MemoryLake {
    trunk: String,
    state: Mutex<LakeState>,
}

impl MemoryLake {
    /// Create a lake with a single, empty trunk branch.
    pub fn new(trunk: impl Into<String>) -> Self {
        let trunk = trunk.into();
        let mut state = LakeState::default();
        state.branches.insert(
            trunk.clone(),
            BranchState {
                snapshot: Snapshot::default(),
                version: 0,
                forked_from: None,
            },
        );
        Self {
            trunk,
            state: Mutex::new(state),
        }
    }

    /// Wrap in an `Arc` for injection into stages.
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn trunk(&self) -> &str {
        &self.trunk
    }

    /// Make `batch` readable at `uri`.
    pub async fn register_source(&self, uri: impl Into<String>, batch: RecordBatch) {
        self.state.lock().await.sources.insert(uri.into(), batch);
    }

    /// Script the outcome of a pipeline. Output tables are written to the
    /// run's branch and namespace unless the status is `failed`.
    pub async fn register_pipeline(
        &self,
        pipeline: impl Into<String>,
        status: impl Into<String>,
        outputs: Vec<(String, RecordBatch)>,
    ) {
        self.state.lock().await.pipelines.insert(
            pipeline.into(),
            PipelineScript {
                status: status.into(),
                outputs,
            },
        );
    }

    /// Make the next call of `operation` fail with a backend error.
    pub async fn fail_next(&self, operation: Operation, message: impl Into<String>) {
        self.state
            .lock()
            .await
            .injected
            .insert(operation, message.into());
    }

    /// Write a table straight onto a branch, creating the namespace.
    pub async fn seed_table(
        &self,
        branch: &str,
        namespace: &str,
        table: &str,
        batch: RecordBatch,
    ) -> Result<(), LakeError> {
        let mut state = self.state.lock().await;
        let target = state.branch_mut(branch)?;
        target
            .snapshot
            .namespaces
            .entry(namespace.to_string())
            .or_default()
            .insert(table.to_string(), batch);
        target.touch();
        Ok(())
    }

    /// Copy of the tables currently on `branch`.
    pub async fn snapshot(&self, branch: &str) -> Option<Snapshot> {
        let state = self.state.lock().await;
        state.branches.get(branch).map(|b| b.snapshot.clone())
    }

    pub async fn branches(&self) -> Vec<String> {
        self.state.lock().await.branches.keys().cloned().collect()
    }

    pub async fn calls(&self) -> Vec<Call> {
        self.state.lock().await.calls.clone()
    }

    pub async fn call_count(&self, operation: Operation) -> usize {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|c| c.operation == operation)
            .count()
    }
}

#[async_trait]
impl DataLakeClient for MemoryLake {
    async fn create_branch(&self, branch: &str, from_ref: &str) -> Result<(), LakeError> {
        let mut state = self.state.lock().await;
        state.enter(Operation::CreateBranch, branch)?;
        ensure!(
            !state.branches.contains_key(branch),
            BranchExistsSnafu { branch }
        );
        let parent = state.branch(from_ref)?;
        let child = BranchState {
            snapshot: parent.snapshot.clone(),
            version: 0,
            forked_from: Some((from_ref.to_string(), parent.version)),
        };
        state.branches.insert(branch.to_string(), child);
        Ok(())
    }

    async fn has_namespace(&self, namespace: &str, reference: &str) -> Result<bool, LakeError> {
        let mut state = self.state.lock().await;
        state.enter(Operation::HasNamespace, reference)?;
        Ok(state.branch(reference)?.snapshot.has_namespace(namespace))
    }

    async fn create_namespace(&self, namespace: &str, branch: &str) -> Result<(), LakeError> {
        let mut state = self.state.lock().await;
        state.enter(Operation::CreateNamespace, branch)?;
        let target = state.branch_mut(branch)?;
        if target.snapshot.has_namespace(namespace) {
            return Err(LakeError::Backend {
                operation: Operation::CreateNamespace,
                message: format!("namespace '{namespace}' already exists"),
            });
        }
        target
            .snapshot
            .namespaces
            .insert(namespace.to_string(), BTreeMap::new());
        target.touch();
        Ok(())
    }

    async fn create_table(
        &self,
        table: TableRef<'_>,
        source_uri: &str,
        replace: bool,
    ) -> Result<(), LakeError> {
        let mut state = self.state.lock().await;
        state.enter(Operation::CreateTable, table.to_string())?;
        let source = state.source(source_uri)?;
        let target = state.branch_mut(table.branch)?;
        let tables = target
            .snapshot
            .namespaces
            .get_mut(table.namespace)
            .context(NamespaceNotFoundSnafu {
                namespace: table.namespace,
                branch: table.branch,
            })?;
        if tables.contains_key(table.name) && !replace {
            return Err(LakeError::Backend {
                operation: Operation::CreateTable,
                message: format!("table '{}' already exists", table.name),
            });
        }
        tables.insert(
            table.name.to_string(),
            RecordBatch::new_empty(source.schema()),
        );
        target.touch();
        Ok(())
    }

    async fn import_data(&self, table: TableRef<'_>, source_uri: &str) -> Result<(), LakeError> {
        let mut state = self.state.lock().await;
        state.enter(Operation::ImportData, table.to_string())?;
        let source = state.source(source_uri)?;
        let existing = state.table(table)?.clone();
        ensure!(
            existing.schema() == source.schema(),
            SchemaMismatchSnafu {
                uri: source_uri,
                table: table.name,
            }
        );
        let combined =
            concat_batches(&existing.schema(), [&existing, &source]).context(ArrowSnafu)?;
        let target = state.branch_mut(table.branch)?;
        target
            .snapshot
            .namespaces
            .entry(table.namespace.to_string())
            .or_default()
            .insert(table.name.to_string(), combined);
        target.touch();
        Ok(())
    }

    async fn scan(&self, table: TableRef<'_>, columns: &[&str]) -> Result<RecordBatch, LakeError> {
        let mut state = self.state.lock().await;
        state.enter(Operation::Scan, table.to_string())?;
        let batch = state.table(table)?;
        let schema = batch.schema();
        let indices = columns
            .iter()
            .map(|column| {
                schema.index_of(column).map_err(|_| LakeError::ColumnNotFound {
                    column: column.to_string(),
                    table: table.name.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        batch.project(&indices).context(ArrowSnafu)
    }

    async fn query(
        &self,
        sql: &str,
        reference: &str,
        namespace: &str,
    ) -> Result<RecordBatch, LakeError> {
        let mut state = self.state.lock().await;
        state.enter(Operation::Query, reference)?;

        if let Some(caps) = COUNT_DISTINCT.captures(sql) {
            let (ns, name) = qualify(&caps[4], namespace);
            let batch = state.table(TableRef::new(name, ns, reference))?;
            let column = column_of(batch, &caps[2], name)?;
            let distinct = distinct_non_null(column.as_ref())?;
            return count_batch(&[
                (&caps[1], batch.num_rows() as i64),
                (&caps[3], distinct as i64),
            ]);
        }

        QuerySnafu {
            message: format!("unsupported statement: {}", sql.trim()),
        }
        .fail()
    }

    async fn run(
        &self,
        pipeline: &str,
        branch: &str,
        namespace: &str,
    ) -> Result<PipelineRun, LakeError> {
        let mut state = self.state.lock().await;
        state.enter(Operation::Run, pipeline)?;
        state.branch(branch)?;
        let script = state
            .pipelines
            .get(pipeline)
            .cloned()
            .context(PipelineNotFoundSnafu { pipeline })?;

        state.next_job += 1;
        let job_id = format!("job-{}", state.next_job);

        let failed = RunStatus::parse(&script.status) == RunStatus::Failed;
        if !failed && !script.outputs.is_empty() {
            let target = state.branch_mut(branch)?;
            let tables = target
                .snapshot
                .namespaces
                .entry(namespace.to_string())
                .or_default();
            for (name, batch) in &script.outputs {
                tables.insert(name.clone(), batch.clone());
            }
            target.touch();
        }

        Ok(PipelineRun {
            job_id,
            job_status: script.status,
            detail: format!("{} output table(s)", script.outputs.len()),
        })
    }

    async fn merge_branch(&self, source_branch: &str, into_branch: &str) -> Result<(), LakeError> {
        let mut state = self.state.lock().await;
        state.enter(Operation::MergeBranch, source_branch)?;
        let source = state.branch(source_branch)?.clone();
        let target = state.branch_mut(into_branch)?;

        // Fast-forward only: the target must not have moved since the fork.
        let in_sync = matches!(
            &source.forked_from,
            Some((parent, version)) if parent == into_branch && *version == target.version
        );
        ensure!(
            in_sync,
            MergeConflictSnafu {
                source_branch,
                target: into_branch,
            }
        );

        target.snapshot = source.snapshot;
        target.touch();
        Ok(())
    }
}

/// Split `ns.table` or fall back to the default namespace.
fn qualify<'a>(name: &'a str, default_namespace: &'a str) -> (&'a str, &'a str) {
    match name.split_once('.') {
        Some((ns, table)) => (ns, table),
        None => (default_namespace, name),
    }
}

fn column_of(batch: &RecordBatch, column: &str, table: &str) -> Result<ArrayRef, LakeError> {
    batch
        .column_by_name(column)
        .cloned()
        .context(ColumnNotFoundSnafu { column, table })
}

/// Count distinct non-null values, matching SQL `COUNT(DISTINCT col)`.
fn distinct_non_null(column: &dyn Array) -> Result<usize, LakeError> {
    let formatter =
        ArrayFormatter::try_new(column, &FormatOptions::default()).context(ArrowSnafu)?;
    let values: BTreeSet<String> = (0..column.len())
        .filter(|&i| column.is_valid(i))
        .map(|i| formatter.value(i).to_string())
        .collect();
    Ok(values.len())
}

/// Single-row result of named Int64 counts.
fn count_batch(counts: &[(&str, i64)]) -> Result<RecordBatch, LakeError> {
    let fields: Vec<Field> = counts
        .iter()
        .map(|(name, _)| Field::new(*name, DataType::Int64, false))
        .collect();
    let columns: Vec<ArrayRef> = counts
        .iter()
        .map(|(_, value)| Arc::new(Int64Array::from(vec![*value])) as ArrayRef)
        .collect();
    RecordBatch::try_new(Arc::new(Schema::new(fields)), columns).context(ArrowSnafu)
}
