//! Environment variable interpolation for config files.
//!
//! Supported syntax:
//! - `${VAR}` - value of VAR, error if unset
//! - `${VAR:-default}` - default when VAR is unset or empty
//! - `$$` - literal `$`
//!
//! Bare `$VAR` is left untouched so regex-like values survive.

use regex::{Captures, Regex};
use std::env;
use std::sync::LazyLock;

use crate::error::ConfigError;

static ENV_VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        \$\$                           # escaped dollar
        |
        \$\{
            ([A-Za-z_][A-Za-z0-9_]*)   # name (1)
            (?::-([^}]*))?             # default (2)
        \}
        ",
    )
    .expect("valid interpolation pattern")
});

/// Substitute environment variables in `input`.
///
/// Every missing variable is reported at once.
pub fn interpolate(input: &str) -> Result<String, ConfigError> {
    interpolate_with(input, |name| env::var(name).ok())
}

/// Substitute variables resolved by `lookup`.
pub fn interpolate_with<F>(input: &str, lookup: F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut missing = Vec::new();

    let text = ENV_VAR_PATTERN.replace_all(input, |caps: &Captures| {
        let Some(name) = caps.get(1).map(|m| m.as_str()) else {
            return "$".to_string();
        };
        let default = caps.get(2).map(|m| m.as_str());

        match (lookup(name), default) {
            (Some(value), _) if value.contains(['\n', '\r']) => {
                missing.push(format!("environment variable '{name}' contains newlines"));
                String::new()
            }
            (Some(value), Some(default)) if value.is_empty() => default.to_string(),
            (Some(value), _) => value,
            (None, Some(default)) => default.to_string(),
            (None, None) => {
                missing.push(format!("environment variable '{name}' is not set"));
                String::new()
            }
        }
    });

    if missing.is_empty() {
        Ok(text.into_owned())
    } else {
        Err(ConfigError::EnvInterpolation {
            message: missing.join("\n"),
        })
    }
}
