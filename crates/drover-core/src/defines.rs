//! Build-time define merging.
//!
//! Defines reach the application under test from three sources, applied in
//! order so that later sources win on key collision:
//!
//! 1. define files (`--dart-define-from-file`, left to right)
//! 2. command-line defines (`--dart-define KEY=VALUE`)
//! 3. internal defines synthesized by the run pipeline
//!
//! The merged map is handed verbatim to the platform build step.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::DroverError;
use crate::Result;

/// Ordered key/value define map.
pub type DefineMap = BTreeMap<String, String>;

/// Reads a single define source into a map.
pub trait DefineReader {
    fn read(&self, path: &Path) -> Result<DefineMap>;
}

/// Reads define files from the local filesystem.
///
/// `.json` files must hold a single object with scalar values; anything else
/// is parsed as `KEY=VALUE` lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsDefineReader;

impl DefineReader for FsDefineReader {
    fn read(&self, path: &Path) -> Result<DefineMap> {
        let content = std::fs::read_to_string(path).map_err(|e| DroverError::DefineFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        if is_json {
            parse_json_defines(path, &content)
        } else {
            parse_env_defines(path, &content)
        }
    }
}

fn parse_json_defines(path: &Path, content: &str) -> Result<DefineMap> {
    let value: serde_json::Value =
        serde_json::from_str(content).map_err(|e| DroverError::DefineFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    let object = value.as_object().ok_or_else(|| DroverError::DefineFile {
        path: path.to_path_buf(),
        reason: "expected a JSON object".to_string(),
    })?;

    let mut defines = DefineMap::new();
    for (key, value) in object {
        let value = match value {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Number(n) => n.to_string(),
            serde_json::Value::Bool(b) => b.to_string(),
            other => {
                return Err(DroverError::DefineFile {
                    path: path.to_path_buf(),
                    reason: format!("value of '{}' is not a scalar: {}", key, other),
                })
            }
        };
        defines.insert(key.clone(), value);
    }
    Ok(defines)
}

fn parse_env_defines(path: &Path, content: &str) -> Result<DefineMap> {
    let mut defines = DefineMap::new();
    for (idx, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (key, value) = parse_define(line).map_err(|_| DroverError::DefineFile {
            path: path.to_path_buf(),
            reason: format!("line {} is not KEY=VALUE", idx + 1),
        })?;
        defines.insert(key, value);
    }
    Ok(defines)
}

/// Parse a single `KEY=VALUE` define. The value may itself contain `=`.
pub fn parse_define(raw: &str) -> Result<(String, String)> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(DroverError::InvalidDefine(raw.to_string())),
    }
}

/// Parse a list of `KEY=VALUE` defines, later entries overriding earlier ones.
pub fn parse_defines<S: AsRef<str>>(raw: &[S]) -> Result<DefineMap> {
    let mut defines = DefineMap::new();
    for entry in raw {
        let (key, value) = parse_define(entry.as_ref())?;
        defines.insert(key, value);
    }
    Ok(defines)
}

/// Return a copy of `base` with every key of `overrides` set or replaced.
pub fn merge(base: &DefineMap, overrides: &DefineMap) -> DefineMap {
    let mut merged = base.clone();
    for (key, value) in overrides {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// Merge define files (left to right) and then command-line defines on top.
pub fn merge_from_sources(
    file_paths: &[PathBuf],
    cli_defines: &DefineMap,
    reader: &dyn DefineReader,
) -> Result<DefineMap> {
    let mut from_files = DefineMap::new();
    for path in file_paths {
        let defines = reader.read(path)?;
        debug!(path = %path.display(), count = defines.len(), "Loaded define file");
        from_files = merge(&from_files, &defines);
    }
    Ok(merge(&from_files, cli_defines))
}

/// Apply internal defines on top of user defines, warning for shadowed keys.
pub fn merge_with_internal(user: &DefineMap, internal: &DefineMap) -> DefineMap {
    for key in internal.keys() {
        if let Some(value) = user.get(key) {
            warn!(key = %key, value = %value, "User define is overridden by an internal define");
        }
    }
    merge(user, internal)
}
