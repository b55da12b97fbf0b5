//! Android backend: Flutter config, Gradle instrumentation tasks, `adb`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use drover_core::{AndroidAppOptions, AppOptions, Device, TargetPlatform};
use tracing::info;

use super::{encoded_dart_defines, mismatch, PlatformBackend};
use crate::error::{RunnerError, RunnerResult};
use crate::process::{CommandSpec, ProcessRunner};
use crate::toolchain::Toolchain;

/// Suffix of the instrumentation package installed next to the app.
const TEST_PACKAGE_SUFFIX: &str = ".test";

pub struct AndroidBackend {
    runner: Arc<dyn ProcessRunner>,
    flutter: String,
    adb: String,
    project_root: PathBuf,
}

impl AndroidBackend {
    pub fn new(runner: Arc<dyn ProcessRunner>, toolchain: &Toolchain, project_root: &Path) -> Self {
        Self {
            runner,
            flutter: toolchain.flutter.clone(),
            adb: toolchain.adb.clone(),
            project_root: project_root.to_path_buf(),
        }
    }

    fn options<'a>(&self, options: &'a AppOptions) -> RunnerResult<&'a AndroidAppOptions> {
        options
            .as_android()
            .ok_or_else(|| mismatch(TargetPlatform::Android, options))
    }

    fn gradle(&self, options: &AndroidAppOptions, tasks: &[String]) -> CommandSpec {
        let android_dir = self.project_root.join("android");
        CommandSpec::new(android_dir.join("gradlew").to_string_lossy())
            .args(tasks.iter().cloned())
            .arg(format!("-Ptarget={}", options.base.target.display()))
            .arg(format!("-Pdart-defines={}", encoded_dart_defines(&options.base)))
            .current_dir(android_dir)
    }

    async fn build_inner(&self, options: &AndroidAppOptions) -> RunnerResult<()> {
        let configure = CommandSpec::new(&self.flutter)
            .args(["build", "apk", "--config-only"])
            .current_dir(&self.project_root);
        self.runner.run_checked(&configure).await?;

        let variant = variant(options);
        let assemble = self.gradle(
            options,
            &[
                format!(":app:assemble{}", variant),
                format!(":app:assemble{}AndroidTest", variant),
            ],
        );
        self.runner.run_checked(&assemble).await?;
        Ok(())
    }

    /// Let the device reach the host's coverage endpoint on the same port.
    async fn reverse_coverage_port(&self, device: &Device, port: u16) -> RunnerResult<()> {
        let port = format!("tcp:{}", port);
        let spec = CommandSpec::new(&self.adb).args([
            "-s",
            device.id.as_str(),
            "reverse",
            port.as_str(),
            port.as_str(),
        ]);
        self.runner.run_checked(&spec).await?;
        Ok(())
    }

    async fn execute_inner(&self, options: &AndroidAppOptions, device: &Device) -> RunnerResult<()> {
        if let Some(port) = options.base.coverage_port {
            self.reverse_coverage_port(device, port).await?;
        }
        let spec = self
            .gradle(options, &[format!(":app:connected{}AndroidTest", variant(options))])
            .env("ANDROID_SERIAL", &device.id);
        self.runner.run_checked(&spec).await?;
        Ok(())
    }

    async fn adb_uninstall(&self, device: &Device, package: &str) -> RunnerResult<()> {
        let spec = CommandSpec::new(&self.adb).args(["-s", device.id.as_str(), "uninstall", package]);
        self.runner.run_checked(&spec).await?;
        Ok(())
    }
}

/// `<Flavor><Mode>` as used in Gradle task names.
fn variant(options: &AndroidAppOptions) -> String {
    let flavor = options
        .base
        .flavor
        .as_deref()
        .map(capitalize)
        .unwrap_or_default();
    format!("{}{}", flavor, options.base.build_mode.capitalized())
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[async_trait]
impl PlatformBackend for AndroidBackend {
    fn platform(&self) -> TargetPlatform {
        TargetPlatform::Android
    }

    async fn build(&self, options: &AppOptions) -> RunnerResult<()> {
        let options = self.options(options)?;
        info!(variant = %variant(options), "Building Android app and instrumentation");
        self.build_inner(options)
            .await
            .map_err(|e| RunnerError::build(TargetPlatform::Android, e))
    }

    async fn execute(&self, options: &AppOptions, device: &Device) -> RunnerResult<()> {
        let options = self.options(options)?;
        self.execute_inner(options, device)
            .await
            .map_err(|e| RunnerError::execution(TargetPlatform::Android, e))
    }

    async fn uninstall(&self, app_id: &str, device: &Device) -> RunnerResult<()> {
        // Both packages are attempted; the first failure is reported.
        let app = self.adb_uninstall(device, app_id).await;
        let test = self
            .adb_uninstall(device, &format!("{}{}", app_id, TEST_PACKAGE_SUFFIX))
            .await;
        app.and(test)
            .map_err(|e| RunnerError::uninstall(TargetPlatform::Android, app_id, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::test_support::base;
    use crate::fakes::RecordingProcessRunner;
    use crate::process::CommandOutput;

    fn backend(runner: Arc<RecordingProcessRunner>) -> AndroidBackend {
        AndroidBackend::new(runner, &Toolchain::default(), Path::new("/work/app"))
    }

    fn options(flavor: Option<&str>) -> AppOptions {
        AppOptions::for_platform(
            TargetPlatform::Android,
            base(flavor),
            Some("com.example.app".into()),
            false,
        )
    }

    fn emulator() -> Device {
        Device::new("emulator-5554", "Pixel 7", TargetPlatform::Android, false)
    }

    #[tokio::test]
    async fn test_build_configures_then_assembles() {
        let runner = Arc::new(RecordingProcessRunner::new());
        backend(runner.clone()).build(&options(Some("staging"))).await.unwrap();

        let commands = runner.commands();
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0], "flutter build apk --config-only");
        assert!(commands[1].starts_with(
            "/work/app/android/gradlew :app:assembleStagingDebug :app:assembleStagingDebugAndroidTest"
        ));
        assert!(commands[1].contains("-Ptarget=/work/app/integration_test/test_bundle.dart"));
        assert!(commands[1].contains("-Pdart-defines="));
    }

    #[tokio::test]
    async fn test_execute_targets_device_serial() {
        let runner = Arc::new(RecordingProcessRunner::new());
        backend(runner.clone()).execute(&options(None), &emulator()).await.unwrap();

        let specs = runner.specs();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].args[0], ":app:connectedDebugAndroidTest");
        assert_eq!(
            specs[0].env,
            vec![("ANDROID_SERIAL".to_string(), "emulator-5554".to_string())]
        );
    }

    #[tokio::test]
    async fn test_failed_tests_are_execution_failures() {
        let runner = Arc::new(RecordingProcessRunner::new());
        runner.respond("/work/app/android/gradlew", CommandOutput::failed(1, "2 tests failed"));
        let err = backend(runner).execute(&options(None), &emulator()).await.unwrap_err();
        assert!(matches!(err, RunnerError::ExecutionFailed { .. }));
        assert!(err.to_string().contains("2 tests failed"));
    }

    #[tokio::test]
    async fn test_build_stops_at_first_failure() {
        let runner = Arc::new(RecordingProcessRunner::new());
        runner.respond("flutter build", CommandOutput::failed(1, "no android dir"));
        let err = backend(runner.clone()).build(&options(None)).await.unwrap_err();
        assert!(matches!(
            err,
            RunnerError::BuildFailed {
                platform: TargetPlatform::Android,
                ..
            }
        ));
        assert_eq!(runner.commands().len(), 1);
    }

    #[tokio::test]
    async fn test_uninstall_removes_app_and_test_package() {
        let runner = Arc::new(RecordingProcessRunner::new());
        backend(runner.clone())
            .uninstall("com.example.app", &emulator())
            .await
            .unwrap();
        assert_eq!(
            runner.commands(),
            vec![
                "adb -s emulator-5554 uninstall com.example.app",
                "adb -s emulator-5554 uninstall com.example.app.test",
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_app_uninstall_still_removes_test_package() {
        let runner = Arc::new(RecordingProcessRunner::new());
        runner.respond(
            "adb -s emulator-5554 uninstall com.example.app.test",
            CommandOutput::ok(),
        );
        runner.respond(
            "adb -s emulator-5554 uninstall com.example.app",
            CommandOutput::failed(1, "DELETE_FAILED_INTERNAL_ERROR"),
        );

        let err = backend(runner.clone())
            .uninstall("com.example.app", &emulator())
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::UninstallFailed { .. }));
        assert!(err.to_string().contains("DELETE_FAILED_INTERNAL_ERROR"));
        assert_eq!(runner.commands().len(), 2);
        assert!(runner.commands()[1].ends_with("com.example.app.test"));
    }

    #[tokio::test]
    async fn test_execute_reverses_coverage_port() {
        let runner = Arc::new(RecordingProcessRunner::new());
        let mut base = base(None);
        base.coverage_port = Some(8083);
        let options = AppOptions::for_platform(
            TargetPlatform::Android,
            base,
            Some("com.example.app".into()),
            false,
        );

        backend(runner.clone()).execute(&options, &emulator()).await.unwrap();

        let commands = runner.commands();
        assert_eq!(commands[0], "adb -s emulator-5554 reverse tcp:8083 tcp:8083");
        assert!(commands[1].contains(":app:connectedDebugAndroidTest"));
    }

    #[tokio::test]
    async fn test_rejects_foreign_options() {
        let runner = Arc::new(RecordingProcessRunner::new());
        let ios = AppOptions::for_platform(TargetPlatform::Ios, base(None), None, true);
        let err = backend(runner.clone()).build(&ios).await.unwrap_err();
        assert!(matches!(
            err,
            RunnerError::OptionsMismatch {
                backend: TargetPlatform::Android,
                received: TargetPlatform::Ios,
            }
        ));
        assert!(runner.commands().is_empty());
    }
}
