//! Branch naming for ephemeral stage branches.
//!
//! Names look like `prefix_2025-02-12T10_30_00`: the local time at second
//! resolution with `:` replaced by `_`. Two stages started within the same
//! second would get the same name, so an entropy suffix (`_3fa9c1`) is
//! appended unless disabled in configuration.

use std::fmt::Write;
use std::sync::Arc;

use chrono::{Local, NaiveDateTime};
use rand::Rng;

/// Source of the generation timestamp.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// Wall clock in local time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Clock frozen at a fixed instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDateTime);

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}

/// Number of random hex characters in the entropy suffix.
const SUFFIX_LEN: usize = 6;

/// Generates unique branch names for a stage.
#[derive(Clone)]
pub struct BranchNamer {
    prefix: String,
    clock: Arc<dyn Clock>,
    entropy: bool,
}

impl std::fmt::Debug for BranchNamer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BranchNamer")
            .field("prefix", &self.prefix)
            .field("entropy", &self.entropy)
            .finish()
    }
}

impl BranchNamer {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            clock: Arc::new(SystemClock),
            entropy: true,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_entropy(mut self, entropy: bool) -> Self {
        self.entropy = entropy;
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Produce the next branch name.
    pub fn next_name(&self) -> String {
        let timestamp = self
            .clock
            .now()
            .format("%Y-%m-%dT%H:%M:%S")
            .to_string()
            .replace(':', "_");

        let mut name = format!("{}_{}", self.prefix, timestamp);
        if self.entropy {
            let mut rng = rand::rng();
            name.push('_');
            for _ in 0..SUFFIX_LEN {
                let nibble: u8 = rng.random_range(0..16);
                let _ = write!(name, "{nibble:x}");
            }
        }
        name
    }
}
