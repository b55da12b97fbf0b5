//! Platform backends: build, execute and uninstall against one platform's
//! toolchain.
//!
//! A run selects exactly one backend from the resolved device's platform and
//! never consults the others.

pub mod android;
pub mod ios;
pub mod macos;
mod xcode;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use drover_core::{AppOptions, BaseAppOptions, Device, TargetPlatform};

use crate::error::{RunnerError, RunnerResult};
use crate::process::ProcessRunner;
use crate::toolchain::Toolchain;

pub use android::AndroidBackend;
pub use ios::IosBackend;
pub use macos::MacosBackend;

/// Build, execute and uninstall for one platform.
#[async_trait]
pub trait PlatformBackend: Send + Sync {
    fn platform(&self) -> TargetPlatform;

    /// Build the app and its instrumentation runner.
    async fn build(&self, options: &AppOptions) -> RunnerResult<()>;

    /// Run the bundled tests on `device`. Fails when any test fails.
    async fn execute(&self, options: &AppOptions, device: &Device) -> RunnerResult<()>;

    /// Remove the app identified by `app_id` and its test runner from `device`.
    async fn uninstall(&self, app_id: &str, device: &Device) -> RunnerResult<()>;
}

/// One backend per platform.
#[derive(Clone)]
pub struct Backends {
    android: Arc<dyn PlatformBackend>,
    ios: Arc<dyn PlatformBackend>,
    macos: Arc<dyn PlatformBackend>,
}

impl Backends {
    pub fn new(
        android: Arc<dyn PlatformBackend>,
        ios: Arc<dyn PlatformBackend>,
        macos: Arc<dyn PlatformBackend>,
    ) -> Self {
        Self {
            android,
            ios,
            macos,
        }
    }

    /// Backends driving the real toolchains of a project at `project_root`.
    pub fn native(
        runner: Arc<dyn ProcessRunner>,
        toolchain: &Toolchain,
        project_root: &Path,
    ) -> Self {
        Self {
            android: Arc::new(AndroidBackend::new(runner.clone(), toolchain, project_root)),
            ios: Arc::new(IosBackend::new(runner.clone(), toolchain, project_root)),
            macos: Arc::new(MacosBackend::new(runner, toolchain, project_root)),
        }
    }

    pub fn for_platform(&self, platform: TargetPlatform) -> Arc<dyn PlatformBackend> {
        match platform {
            TargetPlatform::Android => self.android.clone(),
            TargetPlatform::Ios => self.ios.clone(),
            TargetPlatform::Macos => self.macos.clone(),
        }
    }
}

/// Flutter `--dart-define=K=V` arguments in key order.
pub(crate) fn dart_define_args(base: &BaseAppOptions) -> Vec<String> {
    base.define_pairs()
        .into_iter()
        .map(|pair| format!("--dart-define={}", pair))
        .collect()
}

/// Defines as Gradle expects them: base64 of each `K=V`, comma separated.
pub(crate) fn encoded_dart_defines(base: &BaseAppOptions) -> String {
    base.define_pairs()
        .iter()
        .map(|pair| STANDARD.encode(pair))
        .collect::<Vec<_>>()
        .join(",")
}

pub(crate) fn mismatch(backend: TargetPlatform, options: &AppOptions) -> RunnerError {
    RunnerError::OptionsMismatch {
        backend,
        received: options.platform(),
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{CallLog, FakeBackend, RecordingProcessRunner};

    #[test]
    fn test_dart_define_encodings() {
        let base = test_support::base(None);
        assert_eq!(
            dart_define_args(&base),
            vec!["--dart-define=API_URL=https://x", "--dart-define=DROVER_WAIT=0"]
        );
        assert_eq!(
            encoded_dart_defines(&base),
            format!(
                "{},{}",
                STANDARD.encode("API_URL=https://x"),
                STANDARD.encode("DROVER_WAIT=0")
            )
        );
    }

    #[test]
    fn test_for_platform_selects_backend() {
        let log = CallLog::new();
        let backends = Backends::new(
            Arc::new(FakeBackend::new(TargetPlatform::Android, log.clone())),
            Arc::new(FakeBackend::new(TargetPlatform::Ios, log.clone())),
            Arc::new(FakeBackend::new(TargetPlatform::Macos, log)),
        );
        for platform in [TargetPlatform::Android, TargetPlatform::Ios, TargetPlatform::Macos] {
            assert_eq!(backends.for_platform(platform).platform(), platform);
        }
    }

    #[test]
    fn test_native_backends_report_their_platform() {
        let runner = Arc::new(RecordingProcessRunner::new());
        let backends = Backends::native(runner, &Toolchain::default(), Path::new("/work/app"));
        assert_eq!(
            backends.for_platform(TargetPlatform::Macos).platform(),
            TargetPlatform::Macos
        );
    }
}
