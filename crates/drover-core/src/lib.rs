//! drover core - domain model for instrumented end-to-end test runs
//!
//! Provides the building blocks the run pipeline composes:
//! - Define merging with file < command line < internal precedence
//! - Test discovery and test bundle generation
//! - Device resolution and per-platform app options
//! - Coverage collection and LCOV reporting
//! - Project configuration, user-facing reporting, tracing and analytics

pub mod analytics;
pub mod bundle;
pub mod coverage;
pub mod defines;
pub mod device;
pub mod discovery;
pub mod error;
pub mod options;
pub mod project;
pub mod reporter;
pub mod telemetry;

pub use analytics::{Analytics, AnalyticsEvent};
pub use bundle::{create_test_bundle, TagFilter, TestBundle, BUNDLE_FILE_NAME};
pub use coverage::{
    resolve_coverage_packages, CoverageCollector, CoverageOptions, CoverageSource,
    CoverageSummary, HitMap, HitmapDirSource, HttpCoverageSource, PackageConfig, SessionState,
    SourceCoverage, COVERAGE_PORT_DEFINE, DEFAULT_COVERAGE_PORT,
};
pub use defines::{
    merge, merge_from_sources, merge_with_internal, parse_define, parse_defines, DefineMap,
    DefineReader, FsDefineReader,
};
pub use device::{Device, DeviceFinder, DeviceLister, TargetPlatform};
pub use discovery::{TestFinder, DEFAULT_TEST_DIRECTORY, DEFAULT_TEST_SUFFIX};
pub use error::{DroverError, Result};
pub use options::{
    AndroidAppOptions, AppOptions, BaseAppOptions, BuildMode, IosAppOptions, MacosAppOptions,
    DEFAULT_APP_SERVER_PORT, DEFAULT_TEST_SERVER_PORT,
};
pub use project::ProjectConfig;
pub use reporter::{ConsoleReporter, MemoryReporter, MessageKind, Reporter, FAILURE_BANNER};
pub use telemetry::init_tracing;
