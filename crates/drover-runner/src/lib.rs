//! drover runner - drives platform toolchains through a test run
//!
//! Provides:
//! - External process execution with streamed, traced output
//! - Device listing through the Flutter tool
//! - Android, iOS and macOS backends (build, execute, uninstall)
//! - The phase-by-phase run pipeline and its failure policies
//! - In-memory fakes for tests

pub mod backend;
pub mod error;
pub mod fakes;
pub mod phase;
pub mod pipeline;
pub mod process;
pub mod toolchain;

pub use backend::{AndroidBackend, Backends, IosBackend, MacosBackend, PlatformBackend};
pub use error::{RunnerError, RunnerResult};
pub use phase::{FailurePolicy, Phase, PhaseRecord, PhaseStatus};
pub use pipeline::{
    internal_defines, BuildOutcome, CoverageRequest, PipelineError, RunOutcome, RunRequest,
    TestPipeline,
};
pub use process::{CommandOutput, CommandSpec, ProcessRunner, TokioProcessRunner};
pub use toolchain::{parse_machine_devices, FlutterDeviceLister, Toolchain, FLUTTER_COMMAND_ENV};
