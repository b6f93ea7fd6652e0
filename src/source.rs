//! Raw extract references and table-name extraction.
//!
//! Extracts are named `<prefix>-YYYY-MM-DD-<table>.csv`. The table name is
//! the identifier (letters, digits, `_`) between the date and the `.csv`
//! extension; a file that does not follow the convention has no table name
//! and cannot be imported.

use regex::Regex;
use snafu::prelude::*;

use crate::error::{ConfigError, FilePatternSnafu};

/// Matches any `<prefix>-YYYY-MM-DD-<table>.csv`, optionally under a path.
const GENERIC_PATTERN: &str = r"^(?:.*/)?[^/]+?-\d{4}-\d{2}-\d{2}-(?P<table>\w+)\.csv$";

/// Extracts table names from extract filenames.
#[derive(Debug, Clone)]
pub struct TableNamePattern {
    regex: Regex,
}

impl Default for TableNamePattern {
    fn default() -> Self {
        Self {
            regex: Regex::new(GENERIC_PATTERN).expect("valid generic extract pattern"),
        }
    }
}

impl TableNamePattern {
    /// Pattern pinned to a literal file prefix such as `zilliant-demo-data`.
    pub fn with_prefix(prefix: &str) -> Result<Self, ConfigError> {
        let pattern = format!(
            r"^(?:.*/)?{}-\d{{4}}-\d{{2}}-\d{{2}}-(?P<table>\w+)\.csv$",
            regex::escape(prefix)
        );
        let regex = Regex::new(&pattern).context(FilePatternSnafu)?;
        Ok(Self { regex })
    }

    /// Build from an optional prefix, falling back to the generic pattern.
    pub fn from_prefix(prefix: Option<&str>) -> Result<Self, ConfigError> {
        match prefix {
            Some(p) if !p.is_empty() => Self::with_prefix(p),
            _ => Ok(Self::default()),
        }
    }

    /// Table name embedded in `filename`, if it follows the convention.
    pub fn table_name<'a>(&self, filename: &'a str) -> Option<&'a str> {
        self.regex
            .captures(filename)
            .and_then(|caps| caps.name("table"))
            .map(|m| m.as_str())
            .filter(|name| !name.is_empty())
    }
}

/// A raw extract: a filename under a source location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Location prefix, e.g. `s3://bucket/extracts/`.
    pub location: String,
    pub filename: String,
}

impl SourceFile {
    pub fn new(location: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            filename: filename.into(),
        }
    }

    /// Build one source file per name under a shared location.
    pub fn batch<I, S>(location: &str, filenames: I) -> Vec<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        filenames
            .into_iter()
            .map(|name| Self::new(location, name))
            .collect()
    }

    /// Full URI of the extract.
    pub fn uri(&self) -> String {
        if self.location.is_empty() || self.location.ends_with('/') {
            format!("{}{}", self.location, self.filename)
        } else {
            format!("{}/{}", self.location, self.filename)
        }
    }
}
