//! Dependency manifest (`package_config.json`) reading.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::DroverError;
use crate::Result;

/// One declared package.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PackageEntry {
    pub name: String,
    #[serde(rename = "rootUri", default)]
    pub root_uri: Option<String>,
    #[serde(rename = "packageUri", default)]
    pub package_uri: Option<String>,
}

/// Parsed dependency manifest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PackageConfig {
    pub packages: Vec<PackageEntry>,
    /// Directory the manifest was read from; relative root URIs resolve here.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl PackageConfig {
    /// Read and parse the manifest. Malformed content is a `Manifest` error.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| DroverError::Manifest {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let mut config: PackageConfig =
            serde_json::from_str(&content).map_err(|e| DroverError::Manifest {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        config.base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        debug!(packages = config.packages.len(), path = %path.display(), "Loaded package config");
        Ok(config)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.packages.iter().map(|p| p.name.as_str())
    }

    /// Packages to include in coverage: those matching any pattern, or just
    /// `host` when no patterns are given.
    pub fn coverage_packages(&self, host: &str, patterns: &[String]) -> Result<BTreeSet<String>> {
        if patterns.is_empty() {
            return Ok(BTreeSet::from([host.to_string()]));
        }

        let compiled = patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| DroverError::InvalidPattern {
                    pattern: p.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(self
            .names()
            .filter(|name| compiled.iter().any(|re| re.is_match(name)))
            .map(str::to_string)
            .collect())
    }

    /// Resolve a `package:<name>/<path>` URI to a file path.
    pub fn resolve_source(&self, uri: &str) -> Option<PathBuf> {
        let (package, rest) = split_package_uri(uri)?;
        let entry = self.packages.iter().find(|p| p.name == package)?;
        let root = entry.root_uri.as_deref().unwrap_or(".");
        let root = match root.strip_prefix("file://") {
            Some(absolute) => PathBuf::from(absolute),
            None => self.base_dir.join(root),
        };
        let package_dir = entry.package_uri.as_deref().unwrap_or("lib/");
        Some(normalize(&root.join(package_dir).join(rest)))
    }
}

/// Read the manifest at `manifest` and resolve the coverage inclusion set.
pub fn resolve_coverage_packages(
    manifest: &Path,
    host: &str,
    patterns: &[String],
) -> Result<BTreeSet<String>> {
    PackageConfig::load(manifest)?.coverage_packages(host, patterns)
}

/// Collapse `.` and `..` components without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Split `package:name/path` into `(name, path)`.
pub fn split_package_uri(uri: &str) -> Option<(&str, &str)> {
    uri.strip_prefix("package:")?.split_once('/')
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const MANIFEST: &str = r#"{
      "configVersion": 2,
      "packages": [
        {"name": "my_pkg", "rootUri": "../", "packageUri": "lib/", "languageVersion": "3.3"},
        {"name": "my_pkg_ui", "rootUri": "file:///deps/my_pkg_ui", "packageUri": "lib/"},
        {"name": "http", "rootUri": "file:///pub/http-1.2.0", "packageUri": "lib/"}
      ]
    }"#;

    fn write_manifest(content: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".dart_tool").join("package_config.json");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn test_patterns_select_matching_packages() {
        let (_dir, path) = write_manifest(MANIFEST);
        let packages =
            resolve_coverage_packages(&path, "my_pkg", &["^my_pkg.*".to_string()]).unwrap();
        assert_eq!(
            packages,
            BTreeSet::from(["my_pkg".to_string(), "my_pkg_ui".to_string()])
        );
    }

    #[test]
    fn test_no_patterns_selects_host_only() {
        let (_dir, path) = write_manifest(MANIFEST);
        let packages = resolve_coverage_packages(&path, "my_pkg", &[]).unwrap();
        assert_eq!(packages, BTreeSet::from(["my_pkg".to_string()]));
    }

    #[test]
    fn test_malformed_manifest_is_fatal() {
        let (_dir, path) = write_manifest("{ not json");
        let err = resolve_coverage_packages(&path, "my_pkg", &[]).unwrap_err();
        assert!(matches!(err, DroverError::Manifest { .. }));
    }

    #[test]
    fn test_manifest_without_packages_is_fatal() {
        let (_dir, path) = write_manifest(r#"{"configVersion": 2}"#);
        let err = resolve_coverage_packages(&path, "my_pkg", &["x".to_string()]).unwrap_err();
        assert!(matches!(err, DroverError::Manifest { .. }));
    }

    #[test]
    fn test_invalid_regex() {
        let (_dir, path) = write_manifest(MANIFEST);
        let err = resolve_coverage_packages(&path, "my_pkg", &["(".to_string()]).unwrap_err();
        assert!(matches!(err, DroverError::InvalidPattern { .. }));
    }

    #[test]
    fn test_resolve_source_relative_and_absolute() {
        let (dir, path) = write_manifest(MANIFEST);
        let config = PackageConfig::load(&path).unwrap();

        let local = config.resolve_source("package:my_pkg/src/a.dart").unwrap();
        assert_eq!(local, dir.path().join("lib").join("src").join("a.dart"));

        let dep = config.resolve_source("package:http/http.dart").unwrap();
        assert_eq!(dep, PathBuf::from("/pub/http-1.2.0/lib/http.dart"));

        assert!(config.resolve_source("dart:core/list.dart").is_none());
        assert!(config.resolve_source("package:unknown/x.dart").is_none());
    }
}
