//! macOS backend. Builds and tests like iOS against the `macosx` SDK; an
//! uninstall removes the app's sandbox container.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use drover_core::{AppOptions, Device, MacosAppOptions, TargetPlatform};
use tracing::{debug, info};

use super::xcode::{XcodeProject, RUNNER_SUFFIX};
use super::{dart_define_args, mismatch, PlatformBackend};
use crate::error::{RunnerError, RunnerResult};
use crate::process::{CommandSpec, ProcessRunner};
use crate::toolchain::Toolchain;

const SDK: &str = "macosx";
const DESTINATION: &str = "platform=macOS";

pub struct MacosBackend {
    runner: Arc<dyn ProcessRunner>,
    flutter: String,
    project_root: PathBuf,
    xcode: XcodeProject,
    containers_dir: Option<PathBuf>,
}

impl MacosBackend {
    pub fn new(runner: Arc<dyn ProcessRunner>, toolchain: &Toolchain, project_root: &Path) -> Self {
        Self {
            runner,
            flutter: toolchain.flutter.clone(),
            project_root: project_root.to_path_buf(),
            xcode: XcodeProject::new(
                &toolchain.xcodebuild,
                project_root.join("macos"),
                project_root.join("build").join("macos_integ"),
            ),
            containers_dir: dirs::home_dir().map(|home| home.join("Library").join("Containers")),
        }
    }

    /// Use `dir` instead of `~/Library/Containers`.
    pub fn with_containers_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.containers_dir = Some(dir.into());
        self
    }

    fn options<'a>(&self, options: &'a AppOptions) -> RunnerResult<&'a MacosAppOptions> {
        options
            .as_macos()
            .ok_or_else(|| mismatch(TargetPlatform::Macos, options))
    }

    async fn build_inner(&self, options: &MacosAppOptions) -> RunnerResult<()> {
        let mut configure = CommandSpec::new(&self.flutter)
            .args(["build", "macos", "--config-only"])
            .arg(format!("--{}", options.base.build_mode.name()))
            .current_dir(&self.project_root);
        if let Some(flavor) = &options.base.flavor {
            configure = configure.args(["--flavor", flavor.as_str()]);
        }
        let configure = configure
            .arg("--target")
            .arg(options.base.target.to_string_lossy())
            .args(dart_define_args(&options.base));
        self.runner.run_checked(&configure).await?;

        let build = self
            .xcode
            .build_for_testing(&options.scheme, &options.configuration, SDK);
        self.runner.run_checked(&build).await?;
        Ok(())
    }

    async fn execute_inner(&self, options: &MacosAppOptions) -> RunnerResult<()> {
        let xctestrun = self.xcode.find_xctestrun(&options.scheme, SDK).await?;
        let spec = self.xcode.test_without_building(&xctestrun, DESTINATION);
        self.runner.run_checked(&spec).await?;
        Ok(())
    }

    async fn remove_container(&self, containers: &Path, bundle_id: &str) -> RunnerResult<()> {
        let container = containers.join(bundle_id);
        match tokio::fs::remove_dir_all(&container).await {
            Ok(()) => {
                debug!(container = %container.display(), "Removed app container");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl PlatformBackend for MacosBackend {
    fn platform(&self) -> TargetPlatform {
        TargetPlatform::Macos
    }

    async fn build(&self, options: &AppOptions) -> RunnerResult<()> {
        let options = self.options(options)?;
        info!(
            scheme = %options.scheme,
            configuration = %options.configuration,
            "Building macOS app for testing"
        );
        self.build_inner(options)
            .await
            .map_err(|e| RunnerError::build(TargetPlatform::Macos, e))
    }

    async fn execute(&self, options: &AppOptions, _device: &Device) -> RunnerResult<()> {
        let options = self.options(options)?;
        self.execute_inner(options)
            .await
            .map_err(|e| RunnerError::execution(TargetPlatform::Macos, e))
    }

    async fn uninstall(&self, app_id: &str, _device: &Device) -> RunnerResult<()> {
        let wrap = |e| RunnerError::uninstall(TargetPlatform::Macos, app_id, e);
        let containers = self.containers_dir.as_deref().ok_or_else(|| {
            wrap(RunnerError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "home directory is unknown",
            )))
        })?;
        self.remove_container(containers, app_id).await.map_err(wrap)?;
        self.remove_container(containers, &format!("{}{}", app_id, RUNNER_SUFFIX))
            .await
            .map_err(wrap)
    }
}
