//! In-memory fakes for runner traits (testing only)
//!
//! Provides `RecordingProcessRunner`, `FakeBackend`, `StaticDeviceLister` and
//! `StaticCoverageSource` that satisfy the trait contracts without any
//! external toolchain. Fakes can share a [`CallLog`] so tests can assert the
//! relative order of backend and coverage calls.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use drover_core::{AppOptions, Device, DeviceLister, SourceCoverage, TargetPlatform};

use crate::backend::PlatformBackend;
use crate::error::{RunnerError, RunnerResult};
use crate::process::{CommandOutput, CommandSpec, ProcessRunner};

// ---------------------------------------------------------------------------
// CallLog
// ---------------------------------------------------------------------------

/// Ordered log of calls made on fakes, shared between them.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.entries.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }

    /// Number of entries equal to `entry`.
    pub fn count(&self, entry: &str) -> usize {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.as_str() == entry)
            .count()
    }

    /// Index of the first entry equal to `entry`.
    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries.lock().unwrap().iter().position(|e| e == entry)
    }
}

// ---------------------------------------------------------------------------
// RecordingProcessRunner
// ---------------------------------------------------------------------------

/// Records every command and answers with canned outputs.
///
/// Responses are matched by prefix against [`CommandSpec::display`]; the
/// first registered match wins. Unmatched commands succeed silently.
#[derive(Debug, Default)]
pub struct RecordingProcessRunner {
    specs: Mutex<Vec<CommandSpec>>,
    responses: Mutex<Vec<(String, CommandOutput)>>,
}

impl RecordingProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, prefix: &str, output: CommandOutput) {
        self.responses
            .lock()
            .unwrap()
            .push((prefix.to_string(), output));
    }

    /// Rendered command lines, in call order.
    pub fn commands(&self) -> Vec<String> {
        self.specs
            .lock()
            .unwrap()
            .iter()
            .map(CommandSpec::display)
            .collect()
    }

    /// Full command specs, in call order.
    pub fn specs(&self) -> Vec<CommandSpec> {
        self.specs.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProcessRunner for RecordingProcessRunner {
    async fn run(&self, spec: &CommandSpec) -> RunnerResult<CommandOutput> {
        self.specs.lock().unwrap().push(spec.clone());
        let line = spec.display();
        let output = self
            .responses
            .lock()
            .unwrap()
            .iter()
            .find(|(prefix, _)| line.starts_with(prefix.as_str()))
            .map(|(_, output)| output.clone())
            .unwrap_or_else(CommandOutput::ok);
        Ok(output)
    }
}

// ---------------------------------------------------------------------------
// StaticDeviceLister
// ---------------------------------------------------------------------------

/// Device lister returning a fixed set of devices.
#[derive(Debug, Clone, Default)]
pub struct StaticDeviceLister {
    devices: Vec<Device>,
}

impl StaticDeviceLister {
    pub fn new(devices: Vec<Device>) -> Self {
        Self { devices }
    }
}

#[async_trait]
impl DeviceLister for StaticDeviceLister {
    async fn list(&self) -> drover_core::Result<Vec<Device>> {
        Ok(self.devices.clone())
    }
}

// ---------------------------------------------------------------------------
// FakeBackend
// ---------------------------------------------------------------------------

/// Backend that records calls and fails on demand.
///
/// Calls are logged as `build`, `execute` and `uninstall` in the shared
/// [`CallLog`].
#[derive(Debug)]
pub struct FakeBackend {
    platform: TargetPlatform,
    log: CallLog,
    built: Mutex<Vec<AppOptions>>,
    executed_on: Mutex<Vec<Device>>,
    uninstalled: Mutex<Vec<String>>,
    fail_build: bool,
    fail_execute: bool,
    fail_uninstall: bool,
}

impl FakeBackend {
    pub fn new(platform: TargetPlatform, log: CallLog) -> Self {
        Self {
            platform,
            log,
            built: Mutex::new(Vec::new()),
            executed_on: Mutex::new(Vec::new()),
            uninstalled: Mutex::new(Vec::new()),
            fail_build: false,
            fail_execute: false,
            fail_uninstall: false,
        }
    }

    pub fn failing_build(mut self) -> Self {
        self.fail_build = true;
        self
    }

    pub fn failing_execute(mut self) -> Self {
        self.fail_execute = true;
        self
    }

    pub fn failing_uninstall(mut self) -> Self {
        self.fail_uninstall = true;
        self
    }

    /// Options passed to every `build` call.
    pub fn built(&self) -> Vec<AppOptions> {
        self.built.lock().unwrap().clone()
    }

    pub fn executed_on(&self) -> Vec<Device> {
        self.executed_on.lock().unwrap().clone()
    }

    /// App ids passed to every `uninstall` call.
    pub fn uninstalled(&self) -> Vec<String> {
        self.uninstalled.lock().unwrap().clone()
    }

    fn injected_failure(&self, command: &str) -> RunnerError {
        RunnerError::CommandFailed {
            command: command.to_string(),
            exit_code: 1,
            stderr_tail: "injected failure".to_string(),
        }
    }
}

#[async_trait]
impl PlatformBackend for FakeBackend {
    fn platform(&self) -> TargetPlatform {
        self.platform
    }

    async fn build(&self, options: &AppOptions) -> RunnerResult<()> {
        self.log.push("build");
        self.built.lock().unwrap().push(options.clone());
        if self.fail_build {
            return Err(RunnerError::build(
                self.platform,
                self.injected_failure("fake build"),
            ));
        }
        Ok(())
    }

    async fn execute(&self, _options: &AppOptions, device: &Device) -> RunnerResult<()> {
        self.log.push("execute");
        self.executed_on.lock().unwrap().push(device.clone());
        if self.fail_execute {
            return Err(RunnerError::execution(
                self.platform,
                self.injected_failure("fake execute"),
            ));
        }
        Ok(())
    }

    async fn uninstall(&self, app_id: &str, _device: &Device) -> RunnerResult<()> {
        self.log.push("uninstall");
        self.uninstalled.lock().unwrap().push(app_id.to_string());
        if self.fail_uninstall {
            return Err(RunnerError::uninstall(
                self.platform,
                app_id,
                self.injected_failure("fake uninstall"),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// StaticCoverageSource
// ---------------------------------------------------------------------------

/// Coverage source returning fixed data. Logs `coverage.listen` and
/// `coverage.drain`.
#[derive(Debug, Clone, Default)]
pub struct StaticCoverageSource {
    data: Vec<SourceCoverage>,
    log: CallLog,
}

impl StaticCoverageSource {
    pub fn new(data: Vec<SourceCoverage>, log: CallLog) -> Self {
        Self { data, log }
    }
}

#[async_trait]
impl drover_core::CoverageSource for StaticCoverageSource {
    async fn listen(&self) -> drover_core::Result<()> {
        self.log.push("coverage.listen");
        Ok(())
    }

    async fn drain(&self) -> drover_core::Result<Vec<SourceCoverage>> {
        self.log.push("coverage.drain");
        Ok(self.data.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recording_runner_matches_prefix() {
        let runner = RecordingProcessRunner::new();
        runner.respond("adb -s", CommandOutput::failed(1, "not installed"));

        let out = runner
            .run(&CommandSpec::new("adb").args(["-s", "x", "uninstall", "a"]))
            .await
            .unwrap();
        assert!(!out.passed());

        let out = runner.run(&CommandSpec::new("gradlew")).await.unwrap();
        assert!(out.passed());
        assert_eq!(runner.commands(), vec!["adb -s x uninstall a", "gradlew"]);
    }

    #[tokio::test]
    async fn test_fake_backend_shares_log() {
        let log = CallLog::new();
        let backend = FakeBackend::new(TargetPlatform::Android, log.clone()).failing_uninstall();
        let device = Device::new("emulator-5554", "Pixel", TargetPlatform::Android, false);

        assert!(backend.uninstall("com.example", &device).await.is_err());
        log.push("coverage.drain");
        assert_eq!(log.entries(), vec!["uninstall", "coverage.drain"]);
        assert_eq!(log.position("coverage.drain"), Some(1));
        assert_eq!(backend.uninstalled(), vec!["com.example"]);
    }
}
