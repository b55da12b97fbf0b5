//! Code coverage collection bound to the execute phase.
//!
//! A [`CoverageCollector`] is created only when coverage is requested. It is
//! started before tests execute and collected exactly once afterwards, whether
//! the tests passed or not:
//!
//! ```text
//! Idle --start()--> Listening --collect_coverage_data()--> Collected
//! ```

pub mod http;
pub mod lcov;
pub mod manifest;

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use glob::Pattern;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::discovery::slash_path;
use crate::error::DroverError;
use crate::Result;

pub use http::{HttpCoverageSource, COVERAGE_PORT_DEFINE, DEFAULT_COVERAGE_PORT};
pub use lcov::{format_lcov, HitMap, LcovOptions};
pub use manifest::{resolve_coverage_packages, split_package_uri, PackageConfig, PackageEntry};

/// Default report directory, relative to the project root.
pub const DEFAULT_COVERAGE_DIR: &str = "coverage";

/// Report file written inside the output directory.
pub const LCOV_FILE_NAME: &str = "lcov.info";

/// Resolved coverage settings for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverageOptions {
    pub project_root: PathBuf,
    pub output_dir: PathBuf,
    /// Packages whose sources are kept in the report.
    pub packages: BTreeSet<String>,
    /// Globs of source paths to drop from the report.
    pub ignore_globs: Vec<String>,
    pub function_coverage: bool,
    pub branch_coverage: bool,
}

impl CoverageOptions {
    pub fn report_path(&self) -> PathBuf {
        self.output_dir.join(LCOV_FILE_NAME)
    }
}

/// Coverage data for one source file as reported by the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceCoverage {
    /// Script URI, e.g. `package:my_app/main.dart`.
    pub uri: String,
    pub hits: HitMap,
}

/// Where coverage data comes from while tests run.
#[async_trait]
pub trait CoverageSource: Send + Sync {
    /// Begin listening; data produced before this call is discarded.
    async fn listen(&self) -> Result<()>;

    /// Everything received since `listen`.
    async fn drain(&self) -> Result<Vec<SourceCoverage>>;
}

/// Reads `package:coverage` JSON hitmaps the runtime drops into a directory.
#[derive(Debug, Clone)]
pub struct HitmapDirSource {
    dir: PathBuf,
}

impl HitmapDirSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl CoverageSource for HitmapDirSource {
    async fn listen(&self) -> Result<()> {
        if tokio::fs::metadata(&self.dir).await.is_ok() {
            tokio::fs::remove_dir_all(&self.dir).await?;
        }
        tokio::fs::create_dir_all(&self.dir).await?;
        debug!(dir = %self.dir.display(), "Listening for coverage hitmaps");
        Ok(())
    }

    async fn drain(&self) -> Result<Vec<SourceCoverage>> {
        let mut paths = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                paths.push(path);
            }
        }
        paths.sort();

        let mut collected = Vec::new();
        for path in paths {
            let content = tokio::fs::read_to_string(&path).await?;
            collected.extend(parse_hitmap_json(&path, &content)?);
        }
        debug!(sources = collected.len(), "Drained coverage hitmaps");
        Ok(collected)
    }
}

#[derive(Debug, Deserialize)]
struct RawReport {
    coverage: Vec<RawSource>,
}

#[derive(Debug, Deserialize)]
struct RawSource {
    source: String,
    #[serde(default)]
    hits: Vec<serde_json::Value>,
    #[serde(rename = "funcHits", default)]
    func_hits: Vec<serde_json::Value>,
    #[serde(rename = "funcNames", default)]
    func_names: Vec<serde_json::Value>,
    #[serde(rename = "branchHits", default)]
    branch_hits: Vec<serde_json::Value>,
}

/// Parse one `package:coverage` JSON document.
///
/// Hit arrays are flat `[line, count, line, count, …]` lists; a line may also
/// be an inclusive `"start-end"` range.
pub fn parse_hitmap_json(path: &Path, content: &str) -> Result<Vec<SourceCoverage>> {
    let invalid = |reason: String| DroverError::CoverageData {
        path: path.to_path_buf(),
        reason,
    };

    let report: RawReport = serde_json::from_str(content).map_err(|e| invalid(e.to_string()))?;

    let mut sources = Vec::with_capacity(report.coverage.len());
    for raw in report.coverage {
        let mut hits = HitMap::default();
        for (lines, count) in counted_pairs(&raw.hits).map_err(&invalid)? {
            for line in lines {
                *hits.line_hits.entry(line).or_default() += count;
            }
        }
        for (lines, count) in counted_pairs(&raw.func_hits).map_err(&invalid)? {
            for line in lines {
                *hits.func_hits.entry(line).or_default() += count;
            }
        }
        for (lines, count) in counted_pairs(&raw.branch_hits).map_err(&invalid)? {
            for line in lines {
                *hits.branch_hits.entry(line).or_default() += count;
            }
        }
        for pair in raw.func_names.chunks(2) {
            if let [line, serde_json::Value::String(name)] = pair {
                let line = line
                    .as_u64()
                    .and_then(|n| u32::try_from(n).ok())
                    .ok_or_else(|| invalid(format!("bad function line {}", line)))?;
                hits.func_names.insert(line, name.clone());
            }
        }
        sources.push(SourceCoverage {
            uri: raw.source,
            hits,
        });
    }
    Ok(sources)
}

fn counted_pairs(
    values: &[serde_json::Value],
) -> std::result::Result<Vec<(std::ops::RangeInclusive<u32>, u64)>, String> {
    if values.len() % 2 != 0 {
        return Err("hit list has an odd number of entries".to_string());
    }
    values
        .chunks(2)
        .map(|pair| {
            let lines = match &pair[0] {
                serde_json::Value::Number(n) => {
                    let line = n
                        .as_u64()
                        .and_then(|n| u32::try_from(n).ok())
                        .ok_or_else(|| format!("bad line {}", n))?;
                    line..=line
                }
                serde_json::Value::String(s) => {
                    let (start, end) = s
                        .split_once('-')
                        .ok_or_else(|| format!("bad line range {}", s))?;
                    let start: u32 = start.parse().map_err(|_| format!("bad line range {}", s))?;
                    let end: u32 = end.parse().map_err(|_| format!("bad line range {}", s))?;
                    if start > end {
                        return Err(format!("reversed line range {}", s));
                    }
                    start..=end
                }
                other => return Err(format!("bad line {}", other)),
            };
            let count = pair[1]
                .as_u64()
                .ok_or_else(|| format!("bad hit count {}", pair[1]))?;
            Ok((lines, count))
        })
        .collect()
}

/// Lifecycle state of a coverage session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Listening,
    Collected,
}

/// Outcome of a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverageSummary {
    pub report_path: PathBuf,
    pub files: usize,
    pub lines_found: usize,
    pub lines_hit: usize,
}

/// A single coverage session.
pub struct CoverageCollector {
    options: CoverageOptions,
    package_config: Option<PackageConfig>,
    source: Arc<dyn CoverageSource>,
    ignore: Vec<Pattern>,
    state: SessionState,
}

impl CoverageCollector {
    pub fn new(options: CoverageOptions, source: Arc<dyn CoverageSource>) -> Result<Self> {
        let ignore = options
            .ignore_globs
            .iter()
            .map(|g| {
                Pattern::new(g).map_err(|e| DroverError::InvalidPattern {
                    pattern: g.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            options,
            package_config: None,
            source,
            ignore,
            state: SessionState::Idle,
        })
    }

    /// Resolve `package:` URIs to file paths in the report.
    pub fn with_package_config(mut self, config: PackageConfig) -> Self {
        self.package_config = Some(config);
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn options(&self) -> &CoverageOptions {
        &self.options
    }

    /// Start listening. A session can be started once.
    pub async fn start(&mut self) -> Result<()> {
        if self.state != SessionState::Idle {
            return Err(DroverError::CoverageLifecycle(format!(
                "cannot start a session in state {:?}",
                self.state
            )));
        }
        self.source.listen().await?;
        self.state = SessionState::Listening;
        info!(packages = ?self.options.packages, "Coverage collection started");
        Ok(())
    }

    /// Drain the source, filter and merge hits, and write the LCOV report.
    pub async fn collect_coverage_data(&mut self) -> Result<CoverageSummary> {
        if self.state != SessionState::Listening {
            return Err(DroverError::CoverageLifecycle(format!(
                "cannot collect from a session in state {:?}",
                self.state
            )));
        }
        self.state = SessionState::Collected;

        let received = self.source.drain().await?;
        let mut files: BTreeMap<String, HitMap> = BTreeMap::new();
        for coverage in received {
            let Some(path) = self.report_path_for(&coverage.uri) else {
                continue;
            };
            files.entry(path).or_default().merge(&coverage.hits);
        }

        let lcov = format_lcov(
            &files,
            LcovOptions {
                functions: self.options.function_coverage,
                branches: self.options.branch_coverage,
            },
        );

        let report_path = self.options.report_path();
        tokio::fs::create_dir_all(&self.options.output_dir).await?;
        tokio::fs::write(&report_path, lcov).await?;

        let summary = CoverageSummary {
            report_path,
            files: files.len(),
            lines_found: files.values().map(HitMap::lines_found).sum(),
            lines_hit: files.values().map(HitMap::lines_hit).sum(),
        };
        if summary.files == 0 {
            warn!("No coverage data matched the included packages");
        }
        info!(
            report = %summary.report_path.display(),
            files = summary.files,
            lines_hit = summary.lines_hit,
            lines_found = summary.lines_found,
            "Coverage report written"
        );
        Ok(summary)
    }

    /// Report path for `uri`, or `None` when the source is filtered out.
    fn report_path_for(&self, uri: &str) -> Option<String> {
        let (package, inner) = split_package_uri(uri)?;
        if !self.options.packages.contains(package) {
            return None;
        }

        let path = match self
            .package_config
            .as_ref()
            .and_then(|c| c.resolve_source(uri))
        {
            Some(resolved) => match resolved.strip_prefix(&self.options.project_root) {
                Ok(relative) => slash_path(relative),
                Err(_) => resolved.to_string_lossy().into_owned(),
            },
            None => uri.to_string(),
        };

        if self
            .ignore
            .iter()
            .any(|g| g.matches(&path) || g.matches(inner))
        {
            debug!(source = %uri, "Ignoring source excluded by glob");
            return None;
        }
        Some(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::tempdir;

    struct Canned {
        data: Vec<SourceCoverage>,
        listens: Mutex<u32>,
    }

    #[async_trait]
    impl CoverageSource for Canned {
        async fn listen(&self) -> Result<()> {
            *self.listens.lock().unwrap() += 1;
            Ok(())
        }

        async fn drain(&self) -> Result<Vec<SourceCoverage>> {
            Ok(self.data.clone())
        }
    }

    fn hits(lines: &[(u32, u64)]) -> HitMap {
        HitMap {
            line_hits: lines.iter().copied().collect(),
            ..HitMap::default()
        }
    }

    fn options(root: &Path, ignore: &[&str]) -> CoverageOptions {
        CoverageOptions {
            project_root: root.to_path_buf(),
            output_dir: root.join(DEFAULT_COVERAGE_DIR),
            packages: BTreeSet::from(["my_app".to_string()]),
            ignore_globs: ignore.iter().map(|s| s.to_string()).collect(),
            function_coverage: false,
            branch_coverage: false,
        }
    }

    fn canned() -> Arc<Canned> {
        Arc::new(Canned {
            data: vec![
                SourceCoverage {
                    uri: "package:my_app/main.dart".into(),
                    hits: hits(&[(1, 1), (2, 0)]),
                },
                SourceCoverage {
                    uri: "package:my_app/main.dart".into(),
                    hits: hits(&[(2, 3)]),
                },
                SourceCoverage {
                    uri: "package:my_app/model.g.dart".into(),
                    hits: hits(&[(1, 1)]),
                },
                SourceCoverage {
                    uri: "package:http/http.dart".into(),
                    hits: hits(&[(1, 1)]),
                },
                SourceCoverage {
                    uri: "dart:core/list.dart".into(),
                    hits: hits(&[(1, 1)]),
                },
            ],
            listens: Mutex::new(0),
        })
    }

    #[tokio::test]
    async fn test_collect_filters_packages_and_globs() {
        let dir = tempdir().unwrap();
        let source = canned();
        let mut collector =
            CoverageCollector::new(options(dir.path(), &["**/*.g.dart"]), source.clone()).unwrap();

        collector.start().await.unwrap();
        let summary = collector.collect_coverage_data().await.unwrap();

        assert_eq!(*source.listens.lock().unwrap(), 1);
        assert_eq!(summary.files, 1);
        assert_eq!(summary.lines_found, 2);
        assert_eq!(summary.lines_hit, 2);

        let report = std::fs::read_to_string(&summary.report_path).unwrap();
        assert!(report.starts_with("SF:package:my_app/main.dart\n"));
        assert!(report.contains("DA:2,3\n"));
        assert!(!report.contains("http"));
        assert_eq!(collector.state(), SessionState::Collected);
    }

    #[tokio::test]
    async fn test_collect_resolves_paths_with_package_config() {
        let dir = tempdir().unwrap();
        let config = PackageConfig {
            packages: vec![PackageEntry {
                name: "my_app".into(),
                root_uri: Some("../".into()),
                package_uri: Some("lib/".into()),
            }],
            base_dir: dir.path().join(".dart_tool"),
        };
        let mut collector = CoverageCollector::new(options(dir.path(), &[]), canned())
            .unwrap()
            .with_package_config(config);

        collector.start().await.unwrap();
        let summary = collector.collect_coverage_data().await.unwrap();

        let report = std::fs::read_to_string(summary.report_path).unwrap();
        assert!(report.starts_with("SF:lib/main.dart\n"));
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let dir = tempdir().unwrap();
        let mut collector = CoverageCollector::new(options(dir.path(), &[]), canned()).unwrap();
        collector.start().await.unwrap();
        let err = collector.start().await.unwrap_err();
        assert!(matches!(err, DroverError::CoverageLifecycle(_)));
    }

    #[tokio::test]
    async fn test_collect_without_start_is_rejected() {
        let dir = tempdir().unwrap();
        let mut collector = CoverageCollector::new(options(dir.path(), &[]), canned()).unwrap();
        assert!(collector.collect_coverage_data().await.is_err());
    }

    #[tokio::test]
    async fn test_collected_session_cannot_restart() {
        let dir = tempdir().unwrap();
        let mut collector = CoverageCollector::new(options(dir.path(), &[]), canned()).unwrap();
        collector.start().await.unwrap();
        collector.collect_coverage_data().await.unwrap();
        assert!(collector.start().await.is_err());
        assert!(collector.collect_coverage_data().await.is_err());
    }

    #[test]
    fn test_invalid_ignore_glob() {
        let dir = tempdir().unwrap();
        let result = CoverageCollector::new(options(dir.path(), &["["]), canned());
        assert!(matches!(result, Err(DroverError::InvalidPattern { .. })));
    }

    #[test]
    fn test_parse_hitmap_json() {
        let json = r#"{
          "type": "CodeCoverage",
          "coverage": [{
            "source": "package:my_app/main.dart",
            "script": {"type": "@Script", "uri": "package:my_app/main.dart"},
            "hits": [3, 1, "5-6", 2],
            "funcHits": [3, 1],
            "funcNames": [3, "main"],
            "branchHits": [5, 0]
          }]
        }"#;

        let parsed = parse_hitmap_json(Path::new("h.json"), json).unwrap();
        assert_eq!(parsed.len(), 1);
        let hits = &parsed[0].hits;
        assert_eq!(hits.line_hits, BTreeMap::from([(3, 1), (5, 2), (6, 2)]));
        assert_eq!(hits.func_names[&3], "main");
        assert_eq!(hits.branch_hits[&5], 0);
    }

    #[test]
    fn test_parse_hitmap_json_rejects_odd_pairs() {
        let json = r#"{"coverage":[{"source":"package:a/a.dart","hits":[1]}]}"#;
        let err = parse_hitmap_json(Path::new("h.json"), json).unwrap_err();
        assert!(matches!(err, DroverError::CoverageData { .. }));
    }

    #[test]
    fn test_parse_hitmap_json_rejects_bad_lines() {
        for hits in [r#"[4294967296, 1]"#, r#"["9-3", 1]"#] {
            let json = format!(
                r#"{{"coverage":[{{"source":"package:a/a.dart","hits":{}}}]}}"#,
                hits
            );
            let err = parse_hitmap_json(Path::new("h.json"), &json).unwrap_err();
            assert!(matches!(err, DroverError::CoverageData { .. }), "{}", hits);
        }
    }

    #[tokio::test]
    async fn test_hitmap_dir_source_clears_on_listen() {
        let dir = tempdir().unwrap();
        let drop_dir = dir.path().join("hitmaps");
        std::fs::create_dir_all(&drop_dir).unwrap();
        std::fs::write(drop_dir.join("stale.json"), "{}").unwrap();

        let source = HitmapDirSource::new(&drop_dir);
        source.listen().await.unwrap();
        assert!(source.drain().await.unwrap().is_empty());

        std::fs::write(
            drop_dir.join("1.json"),
            r#"{"coverage":[{"source":"package:a/a.dart","hits":[1,1]}]}"#,
        )
        .unwrap();
        let drained = source.drain().await.unwrap();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].uri, "package:a/a.dart");
    }
}
