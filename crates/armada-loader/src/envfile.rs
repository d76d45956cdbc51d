//! Docker-style env file parsing.
//!
//! Env files hold `KEY=VALUE` lines; blank lines and `#` comments are
//! ignored. Files are merged in declaration order beneath the service and
//! instance `env` maps.

use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{LoaderError, Result};

/// Parses an env file from its text content.
pub fn parse(path: &Path, content: &str) -> Result<BTreeMap<String, String>> {
    let mut vars = BTreeMap::new();

    for (idx, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (key, value) = line.split_once('=').ok_or_else(|| LoaderError::EnvFile {
            path: path.to_path_buf(),
            line: idx + 1,
            reason: format!("expected KEY=VALUE, got {:?}", raw),
        })?;
        let key = key.trim();
        if key.is_empty() {
            return Err(LoaderError::EnvFile {
                path: path.to_path_buf(),
                line: idx + 1,
                reason: "empty variable name".to_string(),
            });
        }
        vars.insert(key.to_string(), value.to_string());
    }

    Ok(vars)
}

/// Reads and parses an env file from disk.
pub fn load(path: &Path) -> Result<BTreeMap<String, String>> {
    let content = std::fs::read_to_string(path).map_err(|source| LoaderError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse(path, &content)
}
