//! drover - instrumented end-to-end test runner
//!
//! ## Commands
//!
//! - `test`: build the app with a generated test bundle and run it on a device
//! - `build`: build the app and test runner for a platform without running
//! - `devices`: list the devices the toolchain can see

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgGroup, Args, Parser, Subcommand};
use drover_core::analytics::{ANALYTICS_URL_ENV, NO_ANALYTICS_ENV};
use drover_core::{
    Analytics, AnalyticsEvent, BuildMode, ConsoleReporter, DeviceLister, TagFilter,
    TargetPlatform, DEFAULT_APP_SERVER_PORT, DEFAULT_COVERAGE_PORT, DEFAULT_TEST_SERVER_PORT,
};
use drover_runner::{
    Backends, CoverageRequest, FlutterDeviceLister, RunRequest, TestPipeline, Toolchain,
    TokioProcessRunner, FLUTTER_COMMAND_ENV,
};
use tracing::{debug, Level};

#[derive(Parser)]
#[command(name = "drover")]
#[command(author = "Drover Contributors")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Build and run instrumented end-to-end tests on Android, iOS and macOS", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Flutter command to invoke
    #[arg(long, global = true, env = FLUTTER_COMMAND_ENV, default_value = "flutter")]
    flutter_command: String,

    /// Endpoint receiving usage analytics
    #[arg(long, global = true, env = ANALYTICS_URL_ENV, hide_env_values = true)]
    analytics_url: Option<String>,

    /// Do not send usage analytics
    #[arg(long, global = true, env = NO_ANALYTICS_ENV)]
    no_analytics: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run tests on a device
    Test(TestArgs),

    /// Build the app and its test runner without running tests
    Build(BuildArgs),

    /// List attached devices
    Devices,
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Test(_) => "test",
            Commands::Build(_) => "build",
            Commands::Devices => "devices",
        }
    }

    /// Feature flags reported with the analytics event.
    fn features(&self) -> Vec<String> {
        let mut features = Vec::new();
        let common = match self {
            Commands::Test(args) => {
                if args.coverage {
                    features.push("coverage".to_string());
                }
                if args.uninstall_before {
                    features.push("uninstall_before".to_string());
                }
                &args.common
            }
            Commands::Build(args) => {
                features.push(format!("platform:{}", args.platform.name()));
                &args.common
            }
            Commands::Devices => return features,
        };
        features.push(format!("mode:{}", common.build_mode().name()));
        if common.flavor.is_some() {
            features.push("flavor".to_string());
        }
        if common.tags.is_some() || common.exclude_tags.is_some() {
            features.push("tags".to_string());
        }
        features
    }
}

/// Options shared by `test` and `build`.
#[derive(Args, Debug)]
#[command(group(ArgGroup::new("mode").args(["debug", "profile", "release"])))]
struct CommonArgs {
    /// Project root
    #[arg(long, default_value = ".")]
    project: PathBuf,

    /// Test file or directory to run (repeatable; default: all tests)
    #[arg(short = 't', long = "target")]
    targets: Vec<String>,

    /// Glob or path of tests to skip
    #[arg(long)]
    exclude: Vec<String>,

    /// Build in debug mode (default)
    #[arg(long)]
    debug: bool,

    /// Build in profile mode
    #[arg(long)]
    profile: bool,

    /// Build in release mode
    #[arg(long)]
    release: bool,

    /// Build flavor
    #[arg(long)]
    flavor: Option<String>,

    /// Tag expression of tests to include
    #[arg(long)]
    tags: Option<String>,

    /// Tag expression of tests to exclude
    #[arg(long)]
    exclude_tags: Option<String>,

    /// Seconds the runtime waits before running tests
    #[arg(long, default_value_t = 0)]
    wait: u64,

    /// Port of the test server inside the test runner
    #[arg(long, default_value_t = DEFAULT_TEST_SERVER_PORT)]
    test_server_port: u16,

    /// Port of the server inside the app under test
    #[arg(long, default_value_t = DEFAULT_APP_SERVER_PORT)]
    app_server_port: u16,

    /// Show the running test's name on screen (default)
    #[arg(long, overrides_with = "no_label")]
    label: bool,

    /// Hide the running test's name
    #[arg(long)]
    no_label: bool,

    /// Build-time define KEY=VALUE (repeatable)
    #[arg(long = "dart-define")]
    dart_define: Vec<String>,

    /// File of defines, JSON object or KEY=VALUE lines (repeatable)
    #[arg(long = "dart-define-from-file")]
    dart_define_from_file: Vec<PathBuf>,
}

impl CommonArgs {
    fn build_mode(&self) -> BuildMode {
        if self.debug {
            BuildMode::Debug
        } else if self.release {
            BuildMode::Release
        } else if self.profile {
            BuildMode::Profile
        } else {
            BuildMode::Debug
        }
    }

    fn to_request(&self) -> RunRequest {
        let mut request = RunRequest::new(self.project.clone());
        request.targets = self.targets.clone();
        request.excludes = self.exclude.clone();
        request.build_mode = self.build_mode();
        request.flavor = self.flavor.clone();
        request.tags = TagFilter::new(self.tags.clone(), self.exclude_tags.clone());
        request.wait_secs = self.wait;
        request.test_server_port = self.test_server_port;
        request.app_server_port = self.app_server_port;
        request.label = self.label || !self.no_label;
        request.defines = self.dart_define.clone();
        request.define_files = self.dart_define_from_file.clone();
        request
    }
}

#[derive(Args, Debug)]
struct TestArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Device id, name or platform to run on
    #[arg(short = 'd', long = "device")]
    devices: Vec<String>,

    /// Collect code coverage
    #[arg(long)]
    coverage: bool,

    /// Glob of source files to leave out of the coverage report (repeatable)
    #[arg(long)]
    coverage_ignore: Vec<String>,

    /// Regex of package names to include in coverage (repeatable)
    #[arg(long)]
    coverage_package: Vec<String>,

    /// Include function coverage
    #[arg(long)]
    function_coverage: bool,

    /// Include branch coverage
    #[arg(long)]
    branch_coverage: bool,

    /// Coverage report directory
    #[arg(long, default_value = drover_core::coverage::DEFAULT_COVERAGE_DIR)]
    coverage_dir: PathBuf,

    /// Host port the app sends coverage data to
    #[arg(long, default_value_t = DEFAULT_COVERAGE_PORT)]
    coverage_port: u16,

    /// Uninstall the app before building
    #[arg(long)]
    uninstall_before: bool,

    /// Uninstall the app after the run (default)
    #[arg(long, overrides_with = "no_uninstall")]
    uninstall: bool,

    /// Keep the app installed after the run
    #[arg(long)]
    no_uninstall: bool,
}

impl TestArgs {
    fn to_request(&self) -> RunRequest {
        let mut request = self.common.to_request();
        request.devices = self.devices.clone();
        request.uninstall_before = self.uninstall_before;
        request.uninstall_after = self.uninstall || !self.no_uninstall;
        if self.coverage {
            request.coverage = Some(CoverageRequest {
                output_dir: Some(self.coverage_dir.clone()),
                ignore_globs: self.coverage_ignore.clone(),
                package_patterns: self.coverage_package.clone(),
                function_coverage: self.function_coverage,
                branch_coverage: self.branch_coverage,
                port: self.coverage_port,
            });
        }
        request
    }
}

#[derive(Args, Debug)]
struct BuildArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Platform to build for: android, ios or macos
    #[arg(long)]
    platform: TargetPlatform,

    /// Build for the iOS simulator instead of a physical device
    #[arg(long)]
    simulator: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    drover_core::init_tracing(cli.json, level);

    // Fire and forget; may be dropped at exit.
    let analytics = if cli.no_analytics {
        Analytics::disabled()
    } else {
        Analytics::new(cli.analytics_url.clone())
    };
    let _ = analytics.send_detached(AnalyticsEvent::new(
        cli.command.name(),
        cli.command.features(),
    ));

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            debug!(error = ?e, "Command failed");
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let mut toolchain = Toolchain::default();
    toolchain.flutter = cli.flutter_command.clone();
    let runner = Arc::new(TokioProcessRunner);
    let lister = Arc::new(FlutterDeviceLister::new(runner.clone(), &toolchain));

    match cli.command {
        Commands::Test(args) => {
            let request = args.to_request();
            let pipeline = pipeline(&request, runner, &toolchain, lister);
            let outcome = pipeline.run(&request).await.context("Test run failed")?;

            if outcome.all_passed {
                println!(
                    "Ran {} test file(s) on {} in {} ms",
                    outcome.test_names.len(),
                    outcome.device.name,
                    outcome.duration_ms
                );
            }
            if let Some(coverage) = &outcome.coverage {
                println!(
                    "Coverage: {}/{} lines in {} file(s) -> {}",
                    coverage.lines_hit,
                    coverage.lines_found,
                    coverage.files,
                    coverage.report_path.display()
                );
            }
            Ok(ExitCode::from(outcome.exit_code() as u8))
        }
        Commands::Build(args) => {
            let request = args.common.to_request();
            let pipeline = pipeline(&request, runner, &toolchain, lister);
            let outcome = pipeline
                .build_only(&request, args.platform, args.simulator)
                .await
                .context("Build failed")?;
            println!(
                "Built {} with {} in {} ms",
                outcome.bundle_path.display(),
                args.platform,
                outcome.duration_ms
            );
            Ok(ExitCode::SUCCESS)
        }
        Commands::Devices => {
            let devices = lister.list().await.context("Failed to list devices")?;
            if devices.is_empty() {
                println!("No devices found");
            }
            for device in devices {
                println!("{}", device.description());
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn pipeline(
    request: &RunRequest,
    runner: Arc<TokioProcessRunner>,
    toolchain: &Toolchain,
    lister: Arc<FlutterDeviceLister>,
) -> TestPipeline {
    let backends = Backends::native(runner, toolchain, &request.project_root);
    TestPipeline::new(backends, lister, Arc::new(ConsoleReporter))
}
