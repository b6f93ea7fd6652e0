//! Shared fixtures: a small Zilliant-style extract set on a MemoryLake.

#![allow(dead_code)]

use arrow::array::{ArrayRef, Float64Array, Int64Array, StringArray};
use arrow::record_batch::RecordBatch;
use std::sync::Arc;

use lakegate::MemoryLake;
use lakegate::config::Config;

pub const LOCATION: &str = "s3://alpha-hello-bauplan/zilliant-synthetic-data/";
pub const NAMESPACE: &str = "zilliant";
pub const PIPELINE: &str = "transformation_pipeline";

pub const FILES: [&str; 5] = [
    "zilliant-demo-data-2025-02-12-account.csv",
    "zilliant-demo-data-2025-02-12-product_data.csv",
    "zilliant-demo-data-2025-02-12-supplier_sku_lookup.csv",
    "zilliant-demo-data-2025-02-12-customer.csv",
    "zilliant-demo-data-2025-02-12-transaction_line_item.csv",
];

pub fn batch(columns: Vec<(&str, ArrayRef)>) -> RecordBatch {
    RecordBatch::try_from_iter(columns).unwrap()
}

pub fn strings(values: &[&str]) -> ArrayRef {
    Arc::new(StringArray::from(values.to_vec()))
}

pub fn ids(values: &[i64]) -> ArrayRef {
    Arc::new(Int64Array::from(values.to_vec()))
}

/// Transaction line items with the given ids and totals.
pub fn line_items(item_ids: Vec<Option<i64>>, totals: Vec<Option<f64>>) -> RecordBatch {
    batch(vec![
        ("transaction_line_item_id", Arc::new(Int64Array::from(item_ids)) as ArrayRef),
        ("line_total", Arc::new(Float64Array::from(totals)) as ArrayRef),
    ])
}

pub fn clean_line_items() -> RecordBatch {
    line_items(
        vec![Some(1), Some(2), Some(3)],
        vec![Some(19.99), Some(5.0), Some(120.5)],
    )
}

/// Register every extract; `line_items` replaces the transaction table.
pub async fn register_extracts(lake: &MemoryLake, line_items: RecordBatch) {
    let tables = [
        batch(vec![("account_id", ids(&[1, 2])), ("name", strings(&["Acme", "Globex"]))]),
        batch(vec![
            ("customer_product_id", ids(&[10, 11])),
            ("product_description", strings(&["cordless drill", "mitre saw"])),
        ]),
        batch(vec![("sku", strings(&["D-1", "S-2"])), ("supplier_name", strings(&["Bosch", "Makita"]))]),
        batch(vec![("customer_id", ids(&[7]))]),
        line_items,
    ];
    for (file, table) in FILES.iter().zip(tables) {
        lake.register_source(format!("{LOCATION}{file}"), table).await;
    }
}

pub async fn register_pipeline(lake: &MemoryLake, status: &str) {
    let output = batch(vec![
        ("supplier_name", strings(&["Bosch"])),
        ("total_supplier_revenue", ids(&[145])),
    ]);
    lake.register_pipeline(PIPELINE, status, vec![("top_selling_suppliers".to_string(), output)])
        .await;
}

pub fn config_yaml(extra: &str) -> String {
    let files = FILES
        .iter()
        .map(|f| format!("    - {f}\n"))
        .collect::<String>();
    format!(
        r#"
trunk: main
namespace: {NAMESPACE}
ingestion:
  branch_prefix: zilliant_upload
  source_location: {LOCATION}
  file_prefix: zilliant-demo-data
  files:
{files}  gates:
    - {{ table: transaction_line_item, column: line_total, check: no_nulls }}
    - {{ table: transaction_line_item, column: transaction_line_item_id, check: unique }}
promotion:
  branch_prefix: zilliant_insight_layer
  pipeline: {PIPELINE}
{extra}"#
    )
}

pub fn config(extra: &str) -> Config {
    Config::parse(&config_yaml(extra)).unwrap()
}

pub fn shared_lake() -> Arc<MemoryLake> {
    MemoryLake::new("main").shared()
}
