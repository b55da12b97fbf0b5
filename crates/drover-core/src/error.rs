//! Error types for drover-core

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while discovering, configuring and resolving a run.
#[derive(Error, Debug)]
pub enum DroverError {
    /// No attached device matched the selectors
    #[error("no device matched {selectors:?}; connect a device or pass a different --device")]
    NoDevice { selectors: Vec<String> },

    /// More than one device matched the selectors
    #[error("{count} devices matched {selectors:?} ({names}); pass a single --device")]
    AmbiguousDevice {
        selectors: Vec<String>,
        count: usize,
        names: String,
    },

    /// Device enumeration through the toolchain failed
    #[error("device listing failed: {0}")]
    DeviceListing(String),

    /// A `KEY=VALUE` define could not be parsed
    #[error("invalid define '{0}': expected KEY=VALUE")]
    InvalidDefine(String),

    /// A define file could not be read or parsed
    #[error("invalid define file {path}: {reason}")]
    DefineFile { path: PathBuf, reason: String },

    /// A test target does not exist or is not a test file
    #[error("invalid test target {path}: {reason}")]
    InvalidTestTarget { path: PathBuf, reason: String },

    /// The dependency manifest used for coverage filtering is malformed
    #[error("invalid dependency manifest {path}: {reason}")]
    Manifest { path: PathBuf, reason: String },

    /// A glob or regular expression supplied by the user is invalid
    #[error("invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// The project configuration is missing or inconsistent
    #[error("project configuration error: {0}")]
    ProjectConfig(String),

    /// A coverage session was driven out of order
    #[error("coverage lifecycle error: {0}")]
    CoverageLifecycle(String),

    /// Coverage data received from the runtime is malformed
    #[error("invalid coverage data {path}: {reason}")]
    CoverageData { path: PathBuf, reason: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Directory traversal error
    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),
}

/// Result type for drover-core operations.
pub type Result<T> = std::result::Result<T, DroverError>;
