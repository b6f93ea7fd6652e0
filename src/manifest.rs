//! Declarative description of the transformation pipeline.
//!
//! Each model names its inputs, how its output is materialized and the
//! runtime it needs:
//!
//! ```yaml
//! models:
//!   top_selling_products:
//!     inputs: [zilliant.transaction_line_item, zilliant.product_data]
//!     runtime: { python: "3.11", packages: { duckdb: "1.2.0" } }
//!   top_selling_suppliers:
//!     inputs: [top_selling_products, zilliant.supplier_sku_lookup]
//! ```
//!
//! A namespace-qualified input (`ns.table`) is a source table; an
//! unqualified one must be another model of the manifest.

use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::Path;

use crate::error::{
    CycleSnafu, EmptyManifestSnafu, ManifestError, ManifestParseSnafu, ManifestReadSnafu,
};

/// How a model's output table is written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Materialization {
    /// Drop and rewrite the table on every run.
    #[default]
    Replace,
    /// Append new rows to the existing table.
    Incremental,
}

/// Execution environment requested by a model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuntimeSpec {
    #[serde(default)]
    pub python: Option<String>,
    /// Package name to pinned version.
    #[serde(default)]
    pub packages: BTreeMap<String, String>,
    /// Whether the model may call out to the network.
    #[serde(default)]
    pub internet_access: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelSpec {
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub materialization: Materialization,
    #[serde(default)]
    pub runtime: RuntimeSpec,
}

/// An input reference of a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input<'a> {
    Model(&'a str),
    Source { namespace: &'a str, table: &'a str },
}

impl<'a> Input<'a> {
    pub fn parse(raw: &'a str) -> Self {
        match raw.split_once('.') {
            Some((namespace, table)) => Input::Source { namespace, table },
            None => Input::Model(raw),
        }
    }
}

/// Models of a pipeline keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineManifest {
    pub models: BTreeMap<String, ModelSpec>,
}

impl PipelineManifest {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).context(ManifestReadSnafu {
            path: path.display().to_string(),
        })?;
        Self::parse(&contents)
    }

    /// Parse and validate a manifest.
    pub fn parse(contents: &str) -> Result<Self, ManifestError> {
        let manifest: PipelineManifest =
            serde_yaml::from_str(contents).context(ManifestParseSnafu)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Check that every model input resolves and the graph is acyclic.
    pub fn validate(&self) -> Result<(), ManifestError> {
        self.execution_order().map(|_| ())
    }

    /// Source tables (`ns.table`) read by any model, deduplicated.
    pub fn source_tables(&self) -> BTreeSet<&str> {
        self.models
            .values()
            .flat_map(|model| model.inputs.iter())
            .filter(|input| matches!(Input::parse(input), Input::Source { .. }))
            .map(String::as_str)
            .collect()
    }

    /// Models in dependency order. Ties are broken by name so the order is
    /// stable across runs.
    pub fn execution_order(&self) -> Result<Vec<&str>, ManifestError> {
        ensure!(!self.models.is_empty(), EmptyManifestSnafu);

        let mut pending: BTreeMap<&str, usize> = BTreeMap::new();
        let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();

        for (name, model) in &self.models {
            let mut upstream = BTreeSet::new();
            for input in &model.inputs {
                if let Input::Model(dep) = Input::parse(input) {
                    if !self.models.contains_key(dep) {
                        return Err(ManifestError::UnknownInput {
                            model: name.clone(),
                            input: input.clone(),
                        });
                    }
                    upstream.insert(dep);
                }
            }
            for dep in &upstream {
                dependents.entry(*dep).or_default().push(name.as_str());
            }
            pending.insert(name.as_str(), upstream.len());
        }

        let mut ready: VecDeque<&str> = pending
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(name, _)| *name)
            .collect();
        let mut order = Vec::with_capacity(self.models.len());

        while let Some(name) = ready.pop_front() {
            order.push(name);
            let mut unlocked = Vec::new();
            for dependent in dependents.get(name).into_iter().flatten() {
                if let Some(count) = pending.get_mut(dependent) {
                    *count -= 1;
                    if *count == 0 {
                        unlocked.push(*dependent);
                    }
                }
            }
            unlocked.sort_unstable();
            ready.extend(unlocked);
        }

        if order.len() < self.models.len() {
            let models: Vec<String> = pending
                .into_iter()
                .filter(|(_, count)| *count > 0)
                .map(|(name, _)| name.to_string())
                .collect();
            return CycleSnafu { models }.fail();
        }
        Ok(order)
    }
}
