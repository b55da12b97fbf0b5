//! Test bundle generation.
//!
//! All discovered test files are aggregated behind one generated entry point
//! so the platform build compiles a single target. Tag expressions are
//! embedded verbatim; the runtime evaluates them per test.

use std::collections::HashSet;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::discovery::slash_path;
use crate::error::DroverError;
use crate::Result;

/// File name of the generated entry point inside the test directory.
pub const BUNDLE_FILE_NAME: &str = "test_bundle.dart";

/// Include/exclude tag expressions forwarded to the runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagFilter {
    pub include: Option<String>,
    pub exclude: Option<String>,
}

impl TagFilter {
    pub fn new(include: Option<String>, exclude: Option<String>) -> Self {
        let clean = |t: Option<String>| t.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        Self {
            include: clean(include),
            exclude: clean(exclude),
        }
    }
}

/// A generated test bundle.
#[derive(Debug, Clone)]
pub struct TestBundle {
    /// Location the bundle was written to.
    pub path: PathBuf,
    /// Names registered in the bundle, in import order.
    pub test_names: Vec<String>,
    /// Rendered source.
    pub contents: String,
}

impl TestBundle {
    pub fn is_empty(&self) -> bool {
        self.test_names.is_empty()
    }
}

/// Render the bundle and write it to `<test_dir>/test_bundle.dart`.
pub fn create_test_bundle(
    test_dir: &Path,
    targets: &[PathBuf],
    tags: &TagFilter,
) -> Result<TestBundle> {
    let mut entries = targets
        .iter()
        .map(|target| BundleEntry::new(test_dir, target))
        .collect::<Result<Vec<_>>>()?;
    dedupe_aliases(&mut entries);

    let contents = render(&entries, tags);
    let path = test_dir.join(BUNDLE_FILE_NAME);
    std::fs::create_dir_all(test_dir)?;
    std::fs::write(&path, &contents)?;

    if entries.is_empty() {
        info!(path = %path.display(), "Generated an empty test bundle");
    } else {
        debug!(path = %path.display(), tests = entries.len(), "Generated test bundle");
    }

    Ok(TestBundle {
        path,
        test_names: entries.into_iter().map(|e| e.name).collect(),
        contents,
    })
}

struct BundleEntry {
    /// Import path relative to the test directory.
    import: String,
    /// Registered test name (import path without extension).
    name: String,
    /// Import prefix, a valid identifier.
    alias: String,
}

impl BundleEntry {
    fn new(test_dir: &Path, target: &Path) -> Result<Self> {
        let relative = target
            .strip_prefix(test_dir)
            .map_err(|_| DroverError::InvalidTestTarget {
                path: target.to_path_buf(),
                reason: format!("not inside test directory {}", test_dir.display()),
            })?;
        let import = slash_path(relative);
        let name = import
            .strip_suffix(".dart")
            .unwrap_or(import.as_str())
            .to_string();
        let alias = name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect::<String>();
        Ok(Self {
            import,
            name,
            alias: format!("t_{}", alias),
        })
    }
}

/// `login_a_test` and `login/a_test` map to the same alias; later ones get a
/// numeric suffix.
fn dedupe_aliases(entries: &mut [BundleEntry]) {
    let mut used = HashSet::new();
    for entry in entries.iter_mut() {
        let mut alias = entry.alias.clone();
        let mut n = 2;
        while !used.insert(alias.clone()) {
            alias = format!("{}_{}", entry.alias, n);
            n += 1;
        }
        entry.alias = alias;
    }
}

/// Single-quoted Dart string literal.
fn quote(value: &str) -> String {
    let escaped = value
        .replace('\\', "\\\\")
        .replace('\'', "\\'")
        .replace('$', "\\$");
    format!("'{}'", escaped)
}

fn optional(value: &Option<String>) -> String {
    value.as_deref().map(quote).unwrap_or_else(|| "null".to_string())
}

fn render(entries: &[BundleEntry], tags: &TagFilter) -> String {
    let mut out = String::new();
    out.push_str("// GENERATED CODE - DO NOT MODIFY BY HAND AND DO NOT COMMIT TO VERSION CONTROL\n");
    out.push_str("// ignore_for_file: type=lint, invalid_use_of_internal_member\n\n");
    out.push_str("import 'package:drover/drover.dart';\n\n");

    out.push_str("// START: GENERATED TEST IMPORTS\n");
    for entry in entries {
        let _ = writeln!(out, "import {} as {};", quote(&entry.import), entry.alias);
    }
    out.push_str("// END: GENERATED TEST IMPORTS\n\n");

    out.push_str("Future<void> main() async {\n");
    out.push_str("  await runTestBundle(\n");
    let _ = writeln!(out, "    includeTags: {},", optional(&tags.include));
    let _ = writeln!(out, "    excludeTags: {},", optional(&tags.exclude));
    out.push_str("    groups: {\n");
    out.push_str("      // START: GENERATED TEST GROUPS\n");
    for entry in entries {
        let _ = writeln!(out, "      {}: {}.main,", quote(&entry.name), entry.alias);
    }
    out.push_str("      // END: GENERATED TEST GROUPS\n");
    out.push_str("    },\n");
    out.push_str("  );\n");
    out.push_str("}\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_bundle_imports_every_target() {
        let dir = tempdir().unwrap();
        let test_dir = dir.path().join("integration_test");
        let targets = vec![
            test_dir.join("a_test.dart"),
            test_dir.join("login").join("b_test.dart"),
        ];

        let bundle = create_test_bundle(&test_dir, &targets, &TagFilter::default()).unwrap();

        assert_eq!(bundle.test_names, vec!["a_test", "login/b_test"]);
        assert!(bundle.contents.contains("import 'a_test.dart' as t_a_test;"));
        assert!(bundle
            .contents
            .contains("import 'login/b_test.dart' as t_login_b_test;"));
        assert!(bundle.contents.contains("'login/b_test': t_login_b_test.main,"));
        assert!(bundle.contents.contains("includeTags: null,"));
        assert_eq!(
            std::fs::read_to_string(&bundle.path).unwrap(),
            bundle.contents
        );
    }

    #[test]
    fn test_bundle_embeds_tag_expressions() {
        let dir = tempdir().unwrap();
        let tags = TagFilter::new(Some("smoke && !slow".into()), Some("it's-flaky".into()));

        let bundle = create_test_bundle(dir.path(), &[], &tags).unwrap();

        assert!(bundle.contents.contains("includeTags: 'smoke && !slow',"));
        assert!(bundle.contents.contains("excludeTags: 'it\\'s-flaky',"));
    }

    #[test]
    fn test_colliding_aliases_are_made_unique() {
        let dir = tempdir().unwrap();
        let targets = vec![
            dir.path().join("login_a_test.dart"),
            dir.path().join("login").join("a_test.dart"),
        ];

        let bundle = create_test_bundle(dir.path(), &targets, &TagFilter::default()).unwrap();

        assert_eq!(bundle.contents.matches(" as t_login_a_test;").count(), 1);
        assert!(bundle
            .contents
            .contains("import 'login/a_test.dart' as t_login_a_test_2;"));
        assert!(bundle.contents.contains("'login_a_test': t_login_a_test.main,"));
        assert!(bundle.contents.contains("'login/a_test': t_login_a_test_2.main,"));
    }

    #[test]
    fn test_dollar_signs_are_escaped() {
        let dir = tempdir().unwrap();
        let tags = TagFilter::new(Some("${env}".into()), None);
        let targets = vec![dir.path().join("price_$_test.dart")];

        let bundle = create_test_bundle(dir.path(), &targets, &tags).unwrap();

        assert!(bundle.contents.contains(r"includeTags: '\${env}',"));
        assert!(bundle.contents.contains(r"import 'price_\$_test.dart' as t_price___test;"));
    }

    #[test]
    fn test_empty_bundle_is_written() {
        let dir = tempdir().unwrap();
        let bundle = create_test_bundle(dir.path(), &[], &TagFilter::default()).unwrap();
        assert!(bundle.is_empty());
        assert!(bundle.path.exists());
    }

    #[test]
    fn test_bundle_overwritten_each_run() {
        let dir = tempdir().unwrap();
        let first = vec![dir.path().join("a_test.dart")];
        let second = vec![dir.path().join("b_test.dart")];

        create_test_bundle(dir.path(), &first, &TagFilter::default()).unwrap();
        let bundle = create_test_bundle(dir.path(), &second, &TagFilter::default()).unwrap();

        let on_disk = std::fs::read_to_string(bundle.path).unwrap();
        assert!(on_disk.contains("b_test"));
        assert!(!on_disk.contains("a_test"));
    }

    #[test]
    fn test_target_outside_test_dir_rejected() {
        let dir = tempdir().unwrap();
        let err = create_test_bundle(
            &dir.path().join("integration_test"),
            &[dir.path().join("lib").join("x_test.dart")],
            &TagFilter::default(),
        )
        .unwrap_err();
        assert!(matches!(err, DroverError::InvalidTestTarget { .. }));
    }

    #[test]
    fn test_tag_filter_drops_blank_expressions() {
        let tags = TagFilter::new(Some("  ".into()), None);
        assert_eq!(tags, TagFilter::default());
    }
}
