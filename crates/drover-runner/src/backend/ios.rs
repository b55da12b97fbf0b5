//! iOS backend: Flutter config, `xcodebuild` testing actions, and
//! `simctl`/`ideviceinstaller` for uninstalls.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use drover_core::{AppOptions, Device, IosAppOptions, TargetPlatform};
use tracing::{info, warn};

use super::xcode::{XcodeProject, RUNNER_SUFFIX};
use super::{dart_define_args, mismatch, PlatformBackend};
use crate::error::{RunnerError, RunnerResult};
use crate::process::{CommandSpec, ProcessRunner};
use crate::toolchain::Toolchain;

const SIMULATOR_SDK: &str = "iphonesimulator";
const DEVICE_SDK: &str = "iphoneos";

pub struct IosBackend {
    runner: Arc<dyn ProcessRunner>,
    flutter: String,
    xcrun: String,
    ideviceinstaller: String,
    project_root: PathBuf,
    xcode: XcodeProject,
}

impl IosBackend {
    pub fn new(runner: Arc<dyn ProcessRunner>, toolchain: &Toolchain, project_root: &Path) -> Self {
        Self {
            runner,
            flutter: toolchain.flutter.clone(),
            xcrun: toolchain.xcrun.clone(),
            ideviceinstaller: toolchain.ideviceinstaller.clone(),
            project_root: project_root.to_path_buf(),
            xcode: XcodeProject::new(
                &toolchain.xcodebuild,
                project_root.join("ios"),
                project_root.join("build").join("ios_integ"),
            ),
        }
    }

    fn options<'a>(&self, options: &'a AppOptions) -> RunnerResult<&'a IosAppOptions> {
        options
            .as_ios()
            .ok_or_else(|| mismatch(TargetPlatform::Ios, options))
    }

    async fn build_inner(&self, options: &IosAppOptions) -> RunnerResult<()> {
        let mut configure = CommandSpec::new(&self.flutter)
            .args(["build", "ios", "--config-only", "--no-codesign"])
            .current_dir(&self.project_root);
        if options.simulator {
            configure = configure.arg("--simulator");
        }
        configure = configure.arg(format!("--{}", options.base.build_mode.name()));
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
            .build_for_testing(&options.scheme, &options.configuration, sdk(options.simulator));
        self.runner.run_checked(&build).await?;
        Ok(())
    }

    async fn execute_inner(&self, options: &IosAppOptions, device: &Device) -> RunnerResult<()> {
        if device.real {
            if let Some(port) = options.base.coverage_port {
                warn!(
                    device = %device.id,
                    port,
                    "Physical iOS devices cannot reach the host loopback; coverage needs the host to be reachable on the device network"
                );
            }
        }
        let xctestrun = self
            .xcode
            .find_xctestrun(&options.scheme, sdk(options.simulator))
            .await?;
        let spec = self
            .xcode
            .test_without_building(&xctestrun, &format!("id={}", device.id));
        self.runner.run_checked(&spec).await?;
        Ok(())
    }

    fn uninstall_spec(&self, bundle_id: &str, device: &Device) -> CommandSpec {
        if device.real {
            CommandSpec::new(&self.ideviceinstaller).args([
                "--udid",
                device.id.as_str(),
                "--uninstall",
                bundle_id,
            ])
        } else {
            CommandSpec::new(&self.xcrun).args(["simctl", "uninstall", device.id.as_str(), bundle_id])
        }
    }
}

fn sdk(simulator: bool) -> &'static str {
    if simulator {
        SIMULATOR_SDK
    } else {
        DEVICE_SDK
    }
}

#[async_trait]
impl PlatformBackend for IosBackend {
    fn platform(&self) -> TargetPlatform {
        TargetPlatform::Ios
    }

    async fn build(&self, options: &AppOptions) -> RunnerResult<()> {
        let options = self.options(options)?;
        info!(
            scheme = %options.scheme,
            configuration = %options.configuration,
            simulator = options.simulator,
            "Building iOS app for testing"
        );
        self.build_inner(options)
            .await
            .map_err(|e| RunnerError::build(TargetPlatform::Ios, e))
    }

    async fn execute(&self, options: &AppOptions, device: &Device) -> RunnerResult<()> {
        let options = self.options(options)?;
        self.execute_inner(options, device)
            .await
            .map_err(|e| RunnerError::execution(TargetPlatform::Ios, e))
    }

    async fn uninstall(&self, app_id: &str, device: &Device) -> RunnerResult<()> {
        for bundle_id in [app_id.to_string(), format!("{}{}", app_id, RUNNER_SUFFIX)] {
            let spec = self.uninstall_spec(&bundle_id, device);
            self.runner
                .run_checked(&spec)
                .await
                .map_err(|e| RunnerError::uninstall(TargetPlatform::Ios, app_id, e))?;
        }
        Ok(())
    }
}
