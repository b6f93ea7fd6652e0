//! Ledger of abandoned branches.
//!
//! A stage that fails leaves its branch in the lake for inspection. The
//! ledger records each such branch as NDJSON so operators can find, debug
//! and eventually clean them up.
//!
//! # Components
//!
//! - [`BranchLedger`] - buffers records and writes them to a local directory
//! - [`AbandonedBranch`] - one ledger line

mod queue;
mod types;

pub use queue::BranchLedger;
pub use types::{AbandonedBranch, LedgerStats};
