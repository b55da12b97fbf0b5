//! Test file discovery.
//!
//! Discovery is purely structural: files are selected by name suffix and
//! exclude patterns. Tag filtering happens later inside the runtime.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use glob::Pattern;
use tracing::debug;
use walkdir::WalkDir;

use crate::bundle::BUNDLE_FILE_NAME;
use crate::error::DroverError;
use crate::Result;

/// Default suffix identifying test entry points.
pub const DEFAULT_TEST_SUFFIX: &str = "_test.dart";

/// Default test directory, relative to the project root.
pub const DEFAULT_TEST_DIRECTORY: &str = "integration_test";

/// Finds test files below a project's test directory.
#[derive(Debug, Clone)]
pub struct TestFinder {
    project_root: PathBuf,
    test_dir: PathBuf,
}

impl TestFinder {
    /// `test_dir` is resolved against `project_root` when relative.
    pub fn new(project_root: impl Into<PathBuf>, test_dir: impl AsRef<Path>) -> Self {
        let project_root = project_root.into();
        let test_dir = if test_dir.as_ref().is_absolute() {
            test_dir.as_ref().to_path_buf()
        } else {
            project_root.join(test_dir.as_ref())
        };
        Self {
            project_root,
            test_dir,
        }
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn test_dir(&self) -> &Path {
        &self.test_dir
    }

    /// Every test file in the test directory not matched by `excludes`.
    pub fn find_all_tests(&self, excludes: &[String], suffix: &str) -> Result<Vec<PathBuf>> {
        if !self.test_dir.is_dir() {
            return Err(DroverError::InvalidTestTarget {
                path: self.test_dir.clone(),
                reason: "test directory does not exist".to_string(),
            });
        }

        let excludes = ExcludeSet::compile(excludes)?;
        let found: Vec<PathBuf> = self
            .walk(&self.test_dir, suffix)?
            .into_iter()
            .filter(|path| !excludes.matches(path, &self.project_root, &self.test_dir))
            .collect();

        debug!(count = found.len(), dir = %self.test_dir.display(), "Discovered tests");
        Ok(found)
    }

    /// Expand explicit targets (files or directories) into test files.
    pub fn find_tests(&self, targets: &[String], suffix: &str) -> Result<Vec<PathBuf>> {
        let mut seen = HashSet::new();
        let mut found = Vec::new();

        for target in targets {
            let path = self.resolve(target);
            let candidates = if path.is_dir() {
                self.walk(&path, suffix)?
            } else if path.is_file() {
                if !has_suffix(&path, suffix) {
                    return Err(DroverError::InvalidTestTarget {
                        path,
                        reason: format!("file name does not end with '{}'", suffix),
                    });
                }
                vec![path]
            } else {
                return Err(DroverError::InvalidTestTarget {
                    path,
                    reason: "target does not exist".to_string(),
                });
            };

            for candidate in candidates {
                if seen.insert(candidate.clone()) {
                    found.push(candidate);
                }
            }
        }

        debug!(count = found.len(), "Resolved explicit test targets");
        Ok(found)
    }

    fn resolve(&self, target: &str) -> PathBuf {
        let path = Path::new(target);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_root.join(path)
        }
    }

    fn walk(&self, dir: &Path, suffix: &str) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            if entry.file_name() == BUNDLE_FILE_NAME {
                continue;
            }
            if has_suffix(entry.path(), suffix) {
                files.push(entry.into_path());
            }
        }
        Ok(files)
    }
}

fn has_suffix(path: &Path, suffix: &str) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.ends_with(suffix))
        .unwrap_or(false)
}

/// Path with `/` separators, for glob matching and generated imports.
pub(crate) fn slash_path(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Compiled exclude patterns: globs plus literal path prefixes.
struct ExcludeSet {
    entries: Vec<(PathBuf, Pattern)>,
}

impl ExcludeSet {
    fn compile(raw: &[String]) -> Result<Self> {
        let entries = raw
            .iter()
            .map(|pattern| {
                let compiled =
                    Pattern::new(pattern.trim_end_matches('/')).map_err(|e| {
                        DroverError::InvalidPattern {
                            pattern: pattern.clone(),
                            reason: e.to_string(),
                        }
                    })?;
                Ok((PathBuf::from(pattern), compiled))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { entries })
    }

    fn matches(&self, path: &Path, project_root: &Path, test_dir: &Path) -> bool {
        let relatives: Vec<&Path> = [project_root, test_dir]
            .iter()
            .filter_map(|base| path.strip_prefix(base).ok())
            .collect();

        self.entries.iter().any(|(prefix, pattern)| {
            if prefix.is_absolute() && path.starts_with(prefix) {
                return true;
            }
            relatives.iter().any(|rel| {
                rel.starts_with(prefix) || pattern.matches(&slash_path(rel))
            })
        })
    }
}
