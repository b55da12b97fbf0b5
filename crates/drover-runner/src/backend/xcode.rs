//! `xcodebuild` invocations shared by the iOS and macOS backends.

use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::debug;

use crate::error::{RunnerError, RunnerResult};
use crate::process::CommandSpec;

pub(crate) const WORKSPACE: &str = "Runner.xcworkspace";

/// Suffix Xcode appends to the UI test runner's bundle identifier.
pub(crate) const RUNNER_SUFFIX: &str = ".RunnerUITests.xctrunner";

/// An Xcode workspace plus the derived data directory builds go to.
#[derive(Debug, Clone)]
pub(crate) struct XcodeProject {
    xcodebuild: String,
    dir: PathBuf,
    derived_data: PathBuf,
}

impl XcodeProject {
    pub(crate) fn new(xcodebuild: &str, dir: PathBuf, derived_data: PathBuf) -> Self {
        Self {
            xcodebuild: xcodebuild.to_string(),
            dir,
            derived_data,
        }
    }

    pub(crate) fn build_for_testing(&self, scheme: &str, configuration: &str, sdk: &str) -> CommandSpec {
        CommandSpec::new(&self.xcodebuild)
            .arg("build-for-testing")
            .args(["-workspace", WORKSPACE])
            .args(["-scheme", scheme])
            .args(["-configuration", configuration])
            .args(["-sdk", sdk])
            .arg("-derivedDataPath")
            .arg(self.derived_data.to_string_lossy())
            .current_dir(&self.dir)
    }

    pub(crate) fn test_without_building(&self, xctestrun: &Path, destination: &str) -> CommandSpec {
        let stamp = Local::now().format("%Y-%m-%d_%H-%M-%S");
        let result_bundle = self
            .derived_data
            .join("Results")
            .join(format!("drover-{}.xcresult", stamp));
        CommandSpec::new(&self.xcodebuild)
            .arg("test-without-building")
            .arg("-xctestrun")
            .arg(xctestrun.to_string_lossy())
            .args(["-destination", destination])
            .arg("-resultBundlePath")
            .arg(result_bundle.to_string_lossy())
            .current_dir(&self.dir)
    }

    /// The `.xctestrun` file `build-for-testing` produced for `scheme` and `sdk`.
    pub(crate) async fn find_xctestrun(&self, scheme: &str, sdk: &str) -> RunnerResult<PathBuf> {
        let products = self.derived_data.join("Build").join("Products");
        let not_found = || RunnerError::XcTestRunNotFound {
            scheme: scheme.to_string(),
            dir: products.clone(),
        };

        let mut entries = match tokio::fs::read_dir(&products).await {
            Ok(entries) => entries,
            Err(_) => return Err(not_found()),
        };
        let prefix = format!("{}_", scheme);
        let mut found = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(&prefix) && name.contains(sdk) && name.ends_with(".xctestrun") {
                found.push(entry.path());
            }
        }
        found.sort();
        let path = found.into_iter().next().ok_or_else(not_found)?;
        debug!(xctestrun = %path.display(), "Found test run file");
        Ok(path)
    }
}
