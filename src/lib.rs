//! lakegate: branch-isolated, quality-gated ETL on a versioned data lake.
//!
//! Raw extracts are imported on an ephemeral branch, checked by data-quality
//! gates and merged into trunk only if every gate passed. A transformation
//! pipeline then runs on a second branch and is merged in turn.
//!
//! # Example
//!
//! ```ignore
//! use lakegate::{Config, Orchestrator, ledger::BranchLedger};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     lakegate::init_tracing("info")?;
//!     let config = Config::from_file("lakegate.yaml")?;
//!     let client = my_lake_client();
//!
//!     let mut orchestrator = Orchestrator::from_config(client, config.clone())?;
//!     if let Some(ledger) = BranchLedger::from_config(config.ledger.as_ref())? {
//!         orchestrator = orchestrator.with_ledger(ledger);
//!     }
//!     let summary = orchestrator.run_all().await?;
//!     println!("promoted on {}", summary.promotion.branch);
//!     Ok(())
//! }
//! ```

pub mod branch;
pub mod client;
pub mod config;
pub mod enrich;
pub mod error;
pub mod gate;
pub mod ingest;
pub mod ledger;
pub mod manifest;
pub mod metrics;
pub mod orchestrator;
pub mod promote;
pub mod source;
pub mod telemetry;

// Re-export main types
pub use client::{DataLakeClient, DataLakeClientRef, MemoryLake};
pub use config::Config;
pub use gate::{GateSpec, QualityCheckResult, QualityGate};
pub use ingest::{IngestionReport, IngestionStage};
pub use orchestrator::{Orchestrator, RunSummary};
pub use promote::{PromotionReport, PromotionStage};
pub use telemetry::init_tracing;
