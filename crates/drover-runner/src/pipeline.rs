//! Run pipeline: Discover → Configure → PreExecute → Build → Execute → Finalize.
//!
//! The errors of PreExecute, Build, Execute and Finalize all go through
//! [`TestPipeline::settle`], which applies the phase's [`FailurePolicy`]:
//! - a failed pre-run uninstall is discarded
//! - a failed build aborts the run before anything is executed
//! - failed tests are recorded and the run continues to its finalizer
//! - a failed post-run uninstall is raised once the run has finished
//!
//! Discover and Configure produce the inputs of every later phase, so their
//! errors always end the run.
//!
//! Coverage, when requested, starts right before Execute and is collected
//! exactly once right after it, whatever the test outcome.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use drover_core::{
    create_test_bundle, merge_from_sources, merge_with_internal, parse_defines, AppOptions,
    BaseAppOptions, BuildMode, CoverageCollector, CoverageOptions, CoverageSource,
    CoverageSummary, DefineMap, Device, DeviceFinder, DeviceLister, DroverError, FsDefineReader,
    HttpCoverageSource, PackageConfig, ProjectConfig, Reporter, TagFilter, TargetPlatform,
    TestBundle, TestFinder, COVERAGE_PORT_DEFINE, DEFAULT_APP_SERVER_PORT,
    DEFAULT_COVERAGE_PORT, DEFAULT_TEST_SERVER_PORT,
};
use serde::Serialize;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::backend::{Backends, PlatformBackend};
use crate::error::RunnerError;
use crate::phase::{FailurePolicy, Phase, PhaseRecord};

/// Everything a run needs from the caller.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub project_root: PathBuf,
    /// Test files or directories; empty means every test in the test directory.
    pub targets: Vec<String>,
    pub excludes: Vec<String>,
    /// Device selectors; empty means "the only attached device".
    pub devices: Vec<String>,
    pub build_mode: BuildMode,
    pub flavor: Option<String>,
    pub tags: TagFilter,
    /// Forwarded to the runtime; never enforced here.
    pub wait_secs: u64,
    pub test_server_port: u16,
    pub app_server_port: u16,
    pub label: bool,
    /// Raw `KEY=VALUE` defines.
    pub defines: Vec<String>,
    pub define_files: Vec<PathBuf>,
    pub uninstall_before: bool,
    pub uninstall_after: bool,
    pub coverage: Option<CoverageRequest>,
}

impl RunRequest {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            targets: Vec::new(),
            excludes: Vec::new(),
            devices: Vec::new(),
            build_mode: BuildMode::default(),
            flavor: None,
            tags: TagFilter::default(),
            wait_secs: 0,
            test_server_port: DEFAULT_TEST_SERVER_PORT,
            app_server_port: DEFAULT_APP_SERVER_PORT,
            label: true,
            defines: Vec::new(),
            define_files: Vec::new(),
            uninstall_before: false,
            uninstall_after: true,
            coverage: None,
        }
    }
}

/// Coverage settings as requested by the caller.
#[derive(Debug, Clone)]
pub struct CoverageRequest {
    /// Report directory; relative paths are resolved against the project root.
    pub output_dir: Option<PathBuf>,
    pub ignore_globs: Vec<String>,
    /// Regexes over manifest package names; empty means the host package.
    pub package_patterns: Vec<String>,
    pub function_coverage: bool,
    pub branch_coverage: bool,
    /// Host port the runtime posts hitmaps to.
    pub port: u16,
}

impl Default for CoverageRequest {
    fn default() -> Self {
        Self {
            output_dir: None,
            ignore_globs: Vec::new(),
            package_patterns: Vec::new(),
            function_coverage: false,
            branch_coverage: false,
            port: DEFAULT_COVERAGE_PORT,
        }
    }
}

/// Errors that end a run without a test outcome.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("test discovery failed: {0}")]
    Discover(#[source] DroverError),

    #[error("configuration failed: {0}")]
    Configure(#[source] DroverError),

    #[error("pre-run uninstall failed: {0}")]
    PreExecute(#[source] RunnerError),

    #[error("{0}")]
    Build(#[source] RunnerError),

    #[error("{0}")]
    Execute(#[source] RunnerError),

    /// The requested post-run uninstall failed.
    #[error("post-run uninstall failed: {0}")]
    Finalize(#[source] RunnerError),

    #[error("coverage collection failed: {0}")]
    Coverage(#[source] DroverError),
}

/// Result of a completed run.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub run_id: String,
    /// True iff Execute finished without a failure.
    pub all_passed: bool,
    pub device: Device,
    pub bundle_path: PathBuf,
    pub test_names: Vec<String>,
    pub coverage_report: Option<PathBuf>,
    pub phases: Vec<PhaseRecord>,
    pub duration_ms: u64,
    #[serde(skip)]
    pub coverage: Option<CoverageSummary>,
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        if self.all_passed {
            0
        } else {
            1
        }
    }
}

/// Result of a build without a device.
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub options: AppOptions,
    pub bundle_path: PathBuf,
    pub phases: Vec<PhaseRecord>,
    pub duration_ms: u64,
}

/// Drives one run through its phases.
pub struct TestPipeline {
    backends: Backends,
    devices: Arc<dyn DeviceLister>,
    reporter: Arc<dyn Reporter>,
    coverage_source: Option<Arc<dyn CoverageSource>>,
}

impl TestPipeline {
    pub fn new(
        backends: Backends,
        devices: Arc<dyn DeviceLister>,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        Self {
            backends,
            devices,
            reporter,
            coverage_source: None,
        }
    }

    /// Read coverage from `source` instead of the HTTP endpoint.
    pub fn with_coverage_source(mut self, source: Arc<dyn CoverageSource>) -> Self {
        self.coverage_source = Some(source);
        self
    }

    /// Run the tests of `request` on one device.
    pub async fn run(&self, request: &RunRequest) -> Result<RunOutcome, PipelineError> {
        let run_id = Uuid::new_v4().to_string();
        let span = info_span!("run", run_id = %run_id);
        self.run_phases(run_id.clone(), request).instrument(span).await
    }

    /// Discover, configure for `platform` and build, without a device.
    pub async fn build_only(
        &self,
        request: &RunRequest,
        platform: TargetPlatform,
        simulator: bool,
    ) -> Result<BuildOutcome, PipelineError> {
        let run_id = Uuid::new_v4().to_string();
        let span = info_span!("build", run_id = %run_id, platform = %platform);
        async {
            let started = Instant::now();
            let mut phases = Vec::new();

            let clock = Instant::now();
            let (project, bundle) = self.discover(request)?;
            phases.push(PhaseRecord::passed(Phase::Discover, elapsed_ms(clock)));

            let clock = Instant::now();
            let options = configure_options(request, &project, &bundle, platform, simulator, None)
                .map_err(|e| fatal(Phase::Configure, PipelineError::Configure(e)))?;
            phases.push(PhaseRecord::passed(Phase::Configure, elapsed_ms(clock)));

            let backend = self.backends.for_platform(platform);
            let clock = Instant::now();
            let built = backend.build(&options).await;
            self.settle(&mut phases, Phase::Build, clock, built)
                .map_err(PipelineError::Build)?;

            self.reporter.success(&format!("Built {} app", platform));
            Ok::<_, PipelineError>(BuildOutcome {
                options,
                bundle_path: bundle.path,
                phases,
                duration_ms: elapsed_ms(started),
            })
        }
        .instrument(span)
        .await
    }

    async fn run_phases(
        &self,
        run_id: String,
        request: &RunRequest,
    ) -> Result<RunOutcome, PipelineError> {
        let started = Instant::now();
        let mut phases = Vec::new();
        info!(root = %request.project_root.display(), "Starting run");

        // Discover
        let clock = Instant::now();
        let (project, bundle) = self.discover(request)?;
        phases.push(PhaseRecord::passed(Phase::Discover, elapsed_ms(clock)));

        // Configure
        let clock = Instant::now();
        let device = DeviceFinder::new(self.devices.as_ref())
            .find_one(&request.devices)
            .await
            .map_err(|e| fatal(Phase::Configure, PipelineError::Configure(e)))?;
        let platform = device.platform;
        let mut collector = match &request.coverage {
            Some(coverage) => Some(
                self.coverage_collector(request, &project, coverage)
                    .map_err(|e| fatal(Phase::Configure, PipelineError::Configure(e)))?,
            ),
            None => None,
        };
        let coverage_port = request.coverage.as_ref().map(|c| c.port);
        let options = configure_options(
            request,
            &project,
            &bundle,
            platform,
            !device.real,
            coverage_port,
        )
        .map_err(|e| fatal(Phase::Configure, PipelineError::Configure(e)))?;
        phases.push(PhaseRecord::passed(Phase::Configure, elapsed_ms(clock)));

        let backend = self.backends.for_platform(platform);
        let app_id = options.app_id().map(str::to_string);
        self.reporter.info(&format!("Running tests on {}", device.description()));

        // PreExecute
        if request.uninstall_before {
            let clock = Instant::now();
            let uninstalled = self.uninstall(backend.as_ref(), app_id.as_deref(), &device).await;
            self.settle(&mut phases, Phase::PreExecute, clock, uninstalled)
                .map_err(PipelineError::PreExecute)?;
        }

        // Build
        let clock = Instant::now();
        let built = backend.build(&options).await;
        self.settle(&mut phases, Phase::Build, clock, built)
            .map_err(PipelineError::Build)?;

        // Execute
        if let Some(collector) = collector.as_mut() {
            collector
                .start()
                .await
                .map_err(|e| fatal(Phase::Execute, PipelineError::Coverage(e)))?;
        }
        let clock = Instant::now();
        let executed = backend.execute(&options, &device).await;
        let all_passed = self
            .settle(&mut phases, Phase::Execute, clock, executed)
            .map_err(PipelineError::Execute)?;
        if all_passed {
            self.reporter.success("All tests passed");
        }

        let mut coverage_error = None;
        let mut coverage = None;
        if let Some(collector) = collector.as_mut() {
            match collector.collect_coverage_data().await {
                Ok(summary) => {
                    self.reporter.info(&format!(
                        "Coverage report written to {}",
                        summary.report_path.display()
                    ));
                    coverage = Some(summary);
                }
                Err(e) => {
                    error!(error = %e, "Coverage collection failed");
                    debug!(error = ?e, "Coverage failure details");
                    coverage_error = Some(e);
                }
            }
        }

        // Finalize
        let mut finalize_error = None;
        if request.uninstall_after {
            let clock = Instant::now();
            let uninstalled = self.uninstall(backend.as_ref(), app_id.as_deref(), &device).await;
            finalize_error = self
                .settle(&mut phases, Phase::Finalize, clock, uninstalled)
                .err();
        }

        let duration_ms = elapsed_ms(started);
        info!(all_passed, duration_ms, "Run finished");

        if let Some(e) = finalize_error {
            if let Some(coverage_error) = &coverage_error {
                debug!(error = %coverage_error, "Coverage failure superseded by finalize failure");
            }
            return Err(PipelineError::Finalize(e));
        }
        if let Some(e) = coverage_error {
            return Err(PipelineError::Coverage(e));
        }

        Ok(RunOutcome {
            run_id,
            all_passed,
            device,
            bundle_path: bundle.path,
            test_names: bundle.test_names,
            coverage_report: coverage.as_ref().map(|c| c.report_path.clone()),
            phases,
            duration_ms,
            coverage,
        })
    }

    fn discover(&self, request: &RunRequest) -> Result<(ProjectConfig, TestBundle), PipelineError> {
        let discover = || -> drover_core::Result<(ProjectConfig, TestBundle)> {
            let project = ProjectConfig::load(&request.project_root)?;
            let finder = TestFinder::new(&request.project_root, project.test_directory());
            let suffix = project.test_file_suffix();
            let targets = if request.targets.is_empty() {
                finder.find_all_tests(&request.excludes, suffix)?
            } else {
                finder.find_tests(&request.targets, suffix)?
            };
            let bundle = create_test_bundle(finder.test_dir(), &targets, &request.tags)?;
            Ok((project, bundle))
        };

        let (project, bundle) =
            discover().map_err(|e| fatal(Phase::Discover, PipelineError::Discover(e)))?;
        if bundle.is_empty() {
            warn!("No tests matched; the bundle is empty");
        }
        self.reporter
            .info(&format!("Bundled {} test file(s)", bundle.test_names.len()));
        Ok((project, bundle))
    }

    fn coverage_collector(
        &self,
        request: &RunRequest,
        project: &ProjectConfig,
        coverage: &CoverageRequest,
    ) -> drover_core::Result<CoverageCollector> {
        // The manifest is read once; the collector reuses it to resolve paths.
        let manifest = PackageConfig::load(&project.package_config_path())?;
        let packages = manifest.coverage_packages(&project.package_name, &coverage.package_patterns)?;
        info!(packages = ?packages, "Resolved coverage packages");

        let output_dir = match &coverage.output_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => request.project_root.join(dir),
            None => request.project_root.join(drover_core::coverage::DEFAULT_COVERAGE_DIR),
        };
        let options = CoverageOptions {
            project_root: request.project_root.clone(),
            output_dir,
            packages,
            ignore_globs: coverage.ignore_globs.clone(),
            function_coverage: coverage.function_coverage,
            branch_coverage: coverage.branch_coverage,
        };
        let source = self
            .coverage_source
            .clone()
            .unwrap_or_else(|| Arc::new(HttpCoverageSource::new(coverage.port)));
        Ok(CoverageCollector::new(options, source)?.with_package_config(manifest))
    }

    /// Record `phase` and apply its failure policy to `result`.
    ///
    /// `Ok(true)` when the phase passed, `Ok(false)` when its failure was
    /// ignored or recorded, and the error when the run must end.
    fn settle(
        &self,
        phases: &mut Vec<PhaseRecord>,
        phase: Phase,
        clock: Instant,
        result: Result<(), RunnerError>,
    ) -> Result<bool, RunnerError> {
        let duration_ms = elapsed_ms(clock);
        let err = match result {
            Ok(()) => {
                phases.push(PhaseRecord::passed(phase, duration_ms));
                return Ok(true);
            }
            Err(err) => err,
        };
        phases.push(PhaseRecord::failed(phase, duration_ms, err.to_string()));

        match phase.failure_policy() {
            FailurePolicy::Ignore => {
                debug!(phase = %phase, error = %err, "Ignoring phase failure");
                Ok(false)
            }
            policy => {
                error!(phase = %phase, error = %err, "Phase failed");
                debug!(phase = %phase, error = ?err, "Phase failure details");
                if phase.shows_failure_banner() {
                    self.reporter.failure(&err.to_string());
                }
                match policy {
                    FailurePolicy::Propagate => Err(err),
                    _ => Ok(false),
                }
            }
        }
    }

    async fn uninstall(
        &self,
        backend: &dyn PlatformBackend,
        app_id: Option<&str>,
        device: &Device,
    ) -> Result<(), RunnerError> {
        match app_id {
            Some(app_id) => {
                info!(app_id = %app_id, device = %device.id, "Uninstalling");
                backend.uninstall(app_id, device).await
            }
            None => {
                warn!(
                    platform = %device.platform,
                    "No app identifier configured for this platform; skipping uninstall"
                );
                Ok(())
            }
        }
    }
}

/// Build the per-platform options for a run.
fn configure_options(
    request: &RunRequest,
    project: &ProjectConfig,
    bundle: &TestBundle,
    platform: TargetPlatform,
    simulator: bool,
    coverage_port: Option<u16>,
) -> drover_core::Result<AppOptions> {
    let cli_defines = parse_defines(&request.defines)?;
    let user = merge_from_sources(&request.define_files, &cli_defines, &FsDefineReader)?;
    let internal = internal_defines(request, project, coverage_port);
    let defines = merge_with_internal(&user, &internal);

    let base = BaseAppOptions {
        target: bundle.path.clone(),
        build_mode: request.build_mode,
        flavor: project.flavor(platform, request.flavor.as_deref()),
        defines,
        test_server_port: request.test_server_port,
        app_server_port: request.app_server_port,
        coverage_port,
    };
    Ok(AppOptions::for_platform(
        platform,
        base,
        project.app_id(platform),
        simulator,
    ))
}

/// Defines the runtime reads to configure itself. `coverage_port` is set
/// when coverage is collected.
pub fn internal_defines(
    request: &RunRequest,
    project: &ProjectConfig,
    coverage_port: Option<u16>,
) -> DefineMap {
    let mut defines = DefineMap::new();
    let mut set = |key: &str, value: Option<String>| {
        if let Some(value) = value {
            defines.insert(key.to_string(), value);
        }
    };

    set("DROVER_WAIT", Some(request.wait_secs.to_string()));
    set("DROVER_APP_PACKAGE_NAME", project.app_id(TargetPlatform::Android));
    set("DROVER_APP_BUNDLE_ID", project.app_id(TargetPlatform::Ios));
    set("DROVER_MACOS_APP_BUNDLE_ID", project.app_id(TargetPlatform::Macos));
    set("DROVER_ANDROID_APP_NAME", project.app_name(TargetPlatform::Android));
    set("DROVER_IOS_APP_NAME", project.app_name(TargetPlatform::Ios));
    set("DROVER_MACOS_APP_NAME", project.app_name(TargetPlatform::Macos));
    set("DROVER_TEST_SERVER_PORT", Some(request.test_server_port.to_string()));
    set("DROVER_APP_SERVER_PORT", Some(request.app_server_port.to_string()));
    set("DROVER_TEST_LABEL_ENABLED", Some(request.label.to_string()));
    set("DROVER_COVERAGE_ENABLED", Some(coverage_port.is_some().to_string()));
    set(COVERAGE_PORT_DEFINE, coverage_port.map(|port| port.to_string()));
    set("DROVER_REPORT_RESULTS_TO_NATIVE", Some("true".to_string()));
    defines
}

/// Log a propagated error with its details and pass it through.
fn fatal(phase: Phase, err: PipelineError) -> PipelineError {
    error!(phase = %phase, error = %err, "Run aborted");
    debug!(phase = %phase, error = ?err, "Abort details");
    err
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{CallLog, FakeBackend, StaticDeviceLister};
    use crate::phase::PhaseStatus;
    use drover_core::{MemoryReporter, MessageKind};
    use std::path::Path;

    fn pipeline(reporter: Arc<MemoryReporter>) -> TestPipeline {
        let log = CallLog::new();
        let backends = Backends::new(
            Arc::new(FakeBackend::new(TargetPlatform::Android, log.clone())),
            Arc::new(FakeBackend::new(TargetPlatform::Ios, log.clone())),
            Arc::new(FakeBackend::new(TargetPlatform::Macos, log)),
        );
        TestPipeline::new(backends, Arc::new(StaticDeviceLister::new(vec![])), reporter)
    }

    fn failure() -> Result<(), RunnerError> {
        Err(RunnerError::Timeout {
            command: "gradlew".into(),
            secs: 1,
        })
    }

    #[test]
    fn test_settle_follows_each_phase_policy() {
        let reporter = Arc::new(MemoryReporter::new());
        let pipeline = pipeline(reporter.clone());
        let mut phases = Vec::new();

        assert!(pipeline
            .settle(&mut phases, Phase::Build, Instant::now(), Ok(()))
            .unwrap());
        assert!(!pipeline
            .settle(&mut phases, Phase::PreExecute, Instant::now(), failure())
            .unwrap());
        assert_eq!(reporter.count(MessageKind::Failure), 0);

        assert!(!pipeline
            .settle(&mut phases, Phase::Execute, Instant::now(), failure())
            .unwrap());
        assert_eq!(reporter.count(MessageKind::Failure), 1);

        assert!(pipeline
            .settle(&mut phases, Phase::Build, Instant::now(), failure())
            .is_err());
        assert_eq!(reporter.count(MessageKind::Failure), 2);

        assert!(pipeline
            .settle(&mut phases, Phase::Finalize, Instant::now(), failure())
            .is_err());
        assert_eq!(reporter.count(MessageKind::Failure), 2);

        let statuses: Vec<PhaseStatus> = phases.iter().map(|p| p.status).collect();
        assert_eq!(
            statuses,
            vec![
                PhaseStatus::Passed,
                PhaseStatus::Ignored,
                PhaseStatus::Failed,
                PhaseStatus::Failed,
                PhaseStatus::Failed,
            ]
        );
    }

    fn project(yaml: &str) -> ProjectConfig {
        ProjectConfig::parse(Path::new("/work/app"), yaml).unwrap()
    }

    #[test]
    fn test_internal_defines_omit_absent_values() {
        let request = RunRequest::new("/work/app");
        let defines = internal_defines(&request, &project("name: my_app\n"), None);

        assert_eq!(defines["DROVER_WAIT"], "0");
        assert_eq!(defines["DROVER_TEST_SERVER_PORT"], "8081");
        assert_eq!(defines["DROVER_APP_SERVER_PORT"], "8082");
        assert_eq!(defines["DROVER_TEST_LABEL_ENABLED"], "true");
        assert_eq!(defines["DROVER_COVERAGE_ENABLED"], "false");
        assert_eq!(defines["DROVER_REPORT_RESULTS_TO_NATIVE"], "true");
        assert!(!defines.contains_key("DROVER_APP_PACKAGE_NAME"));
        assert!(!defines.contains_key("DROVER_IOS_APP_NAME"));
        assert!(!defines.contains_key("DROVER_COVERAGE_PORT"));
    }

    #[test]
    fn test_internal_defines_carry_app_identity() {
        let yaml = r#"
name: my_app
drover:
  app_name: My App
  android:
    package_name: com.example.app
  ios:
    bundle_id: com.example.ios
    app_name: My iOS App
"#;
        let mut request = RunRequest::new("/work/app");
        request.wait_secs = 5;
        request.label = false;
        let defines = internal_defines(&request, &project(yaml), Some(9100));

        assert_eq!(defines["DROVER_WAIT"], "5");
        assert_eq!(defines["DROVER_APP_PACKAGE_NAME"], "com.example.app");
        assert_eq!(defines["DROVER_APP_BUNDLE_ID"], "com.example.ios");
        assert_eq!(defines["DROVER_ANDROID_APP_NAME"], "My App");
        assert_eq!(defines["DROVER_IOS_APP_NAME"], "My iOS App");
        assert_eq!(defines["DROVER_TEST_LABEL_ENABLED"], "false");
        assert_eq!(defines["DROVER_COVERAGE_ENABLED"], "true");
        assert_eq!(defines["DROVER_COVERAGE_PORT"], "9100");
    }

    #[test]
    fn test_user_define_cannot_shadow_internal() {
        let mut request = RunRequest::new("/work/app");
        request.defines = vec!["DROVER_WAIT=99".into(), "API=x".into()];
        let bundle = TestBundle {
            path: PathBuf::from("/work/app/integration_test/test_bundle.dart"),
            test_names: vec![],
            contents: String::new(),
        };
        let options = configure_options(
            &request,
            &project("name: my_app\n"),
            &bundle,
            TargetPlatform::Android,
            true,
            None,
        )
        .unwrap();

        let defines = &options.base().defines;
        assert_eq!(defines["DROVER_WAIT"], "0");
        assert_eq!(defines["API"], "x");
    }

    #[test]
    fn test_exit_code() {
        let outcome = RunOutcome {
            run_id: "r".into(),
            all_passed: false,
            device: Device::new("d", "d", TargetPlatform::Android, false),
            bundle_path: PathBuf::from("b"),
            test_names: vec![],
            coverage_report: None,
            phases: vec![],
            duration_ms: 0,
            coverage: None,
        };
        assert_eq!(outcome.exit_code(), 1);
        assert_eq!(RunOutcome { all_passed: true, ..outcome }.exit_code(), 0);
    }
}
