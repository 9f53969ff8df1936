// cloudpipe-cli/src/env_file.rs
// ============================================================================
// Module: Env File Handling
// Description: Parse and atomically rewrite a dotenv-style file.
// Purpose: Persist configuration variables for the local adapter.
// Dependencies: serde_json (value quoting)
// ============================================================================

//! ## Overview
//! The local adapter publishes configuration into `{path}/.env` and rebuilds
//! pipes from it on startup. Values are written JSON-quoted so embedded
//! spaces and quotes survive a round trip; unquoted values are read as-is.
//! Rewrites go through a sibling temp file and a rename so a crash never
//! leaves a half-written file.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use thiserror::Error;
use tracing::warn;

use crate::config_vars::ConfigVars;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised by env file handling.
#[derive(Debug, Error)]
pub enum EnvFileError {
    /// Filesystem failure while reading or writing.
    #[error("env file io error: {0}")]
    Io(String),
}

// ============================================================================
// SECTION: Reading
// ============================================================================

/// Parses an env file into a map; a missing file is an empty map.
///
/// # Errors
///
/// Returns [`EnvFileError::Io`] for any failure other than absence.
pub fn parse(path: &Path) -> Result<BTreeMap<String, String>, EnvFileError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(err) => return Err(EnvFileError::Io(err.to_string())),
    };
    let mut vars = BTreeMap::new();
    for line in content.lines() {
        if let Some((key, value)) = line.split_once('=') {
            vars.insert(key.to_string(), unquote(value));
        }
    }
    Ok(vars)
}

/// Parses an env file, logging and returning empty on failure.
#[must_use]
pub fn read_vars(path: &Path) -> BTreeMap<String, String> {
    match parse(path) {
        Ok(vars) => vars,
        Err(err) => {
            warn!("Error reading .env file: {err}");
            BTreeMap::new()
        }
    }
}

/// Strips JSON quoting from a value, keeping the raw text when unquoted.
fn unquote(raw: &str) -> String {
    if raw.starts_with('"') {
        serde_json::from_str::<String>(raw).unwrap_or_else(|_| raw.to_string())
    } else {
        raw.to_string()
    }
}

// ============================================================================
// SECTION: Writing
// ============================================================================

/// Applies variable updates to the env file atomically.
///
/// `Some` values are set, `None` values are removed. The merged content is
/// written to a sibling temp file and renamed over the original.
///
/// # Errors
///
/// Returns [`EnvFileError::Io`] when reading or rewriting fails.
pub fn update(path: &Path, vars: &ConfigVars) -> Result<(), EnvFileError> {
    let mut content = parse(path)?;
    for (key, value) in vars {
        match value {
            Some(value) => {
                content.insert(key.clone(), value.clone());
            }
            None => {
                content.remove(key);
            }
        }
    }

    let mut rendered = String::new();
    for (key, value) in &content {
        let quoted = serde_json::to_string(value)
            .map_err(|err| EnvFileError::Io(format!("quoting failed: {err}")))?;
        rendered.push_str(&format!("{key}={quoted}\n"));
    }

    let temp_path = path.with_extension("env.tmp");
    fs::write(&temp_path, rendered).map_err(|err| EnvFileError::Io(err.to_string()))?;
    fs::rename(&temp_path, path).map_err(|err| EnvFileError::Io(err.to_string()))
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only env file assertions.")]

    use std::collections::BTreeMap;

    use super::parse;
    use super::update;
    use crate::config_vars::ConfigVars;

    #[test]
    fn missing_file_parses_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let vars = parse(&dir.path().join(".env")).unwrap();
        assert!(vars.is_empty());
    }

    #[test]
    fn update_round_trips_values_with_spaces_and_quotes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        let mut vars = ConfigVars::new();
        vars.insert("PIPE_P1_THIS_URI".to_string(), Some("https://x/y?a=1".to_string()));
        vars.insert("MESSAGE".to_string(), Some("hello \"world\" now".to_string()));
        update(&path, &vars).unwrap();

        let parsed = parse(&path).unwrap();
        assert_eq!(parsed["PIPE_P1_THIS_URI"], "https://x/y?a=1");
        assert_eq!(parsed["MESSAGE"], "hello \"world\" now");
    }

    #[test]
    fn update_merges_and_unsets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");

        let mut first = ConfigVars::new();
        first.insert("KEEP".to_string(), Some("1".to_string()));
        first.insert("DROP".to_string(), Some("2".to_string()));
        update(&path, &first).unwrap();

        let mut second = ConfigVars::new();
        second.insert("DROP".to_string(), None);
        second.insert("NEW".to_string(), Some("3".to_string()));
        update(&path, &second).unwrap();

        let parsed = parse(&path).unwrap();
        assert_eq!(parsed.get("KEEP"), Some(&"1".to_string()));
        assert_eq!(parsed.get("DROP"), None);
        assert_eq!(parsed.get("NEW"), Some(&"3".to_string()));
    }

    #[test]
    fn unquoted_lines_are_read_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, "PLAIN=raw value\nBAD_QUOTE=\"unterminated\n").unwrap();
        let parsed: BTreeMap<String, String> = parse(&path).unwrap();
        assert_eq!(parsed["PLAIN"], "raw value");
        assert_eq!(parsed["BAD_QUOTE"], "\"unterminated");
    }
}
