//! Error types for the runner layer.

use std::path::PathBuf;

use drover_core::{DroverError, TargetPlatform};

/// Errors raised while driving external toolchains.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{command}' timed out after {secs} seconds")]
    Timeout { command: String, secs: u64 },

    #[error("'{command}' exited with code {exit_code}{}", stderr_suffix(.stderr_tail))]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr_tail: String,
    },

    #[error("{platform} build failed: {cause}")]
    BuildFailed {
        platform: TargetPlatform,
        #[source]
        cause: Box<RunnerError>,
    },

    #[error("{platform} test execution failed: {cause}")]
    ExecutionFailed {
        platform: TargetPlatform,
        #[source]
        cause: Box<RunnerError>,
    },

    #[error("{platform} uninstall of {app_id} failed: {cause}")]
    UninstallFailed {
        platform: TargetPlatform,
        app_id: String,
        #[source]
        cause: Box<RunnerError>,
    },

    #[error("{backend} backend received {received} options")]
    OptionsMismatch {
        backend: TargetPlatform,
        received: TargetPlatform,
    },

    #[error("no .xctestrun file for scheme '{scheme}' under {dir}")]
    XcTestRunNotFound { scheme: String, dir: PathBuf },

    #[error("{0}")]
    Core(#[from] DroverError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

fn stderr_suffix(tail: &str) -> String {
    if tail.is_empty() {
        String::new()
    } else {
        format!(":\n{}", tail)
    }
}

impl RunnerError {
    pub(crate) fn build(platform: TargetPlatform, cause: RunnerError) -> Self {
        RunnerError::BuildFailed {
            platform,
            cause: Box::new(cause),
        }
    }

    pub(crate) fn execution(platform: TargetPlatform, cause: RunnerError) -> Self {
        RunnerError::ExecutionFailed {
            platform,
            cause: Box::new(cause),
        }
    }

    pub(crate) fn uninstall(platform: TargetPlatform, app_id: &str, cause: RunnerError) -> Self {
        RunnerError::UninstallFailed {
            platform,
            app_id: app_id.to_string(),
            cause: Box::new(cause),
        }
    }
}

/// Result type for runner operations.
pub type RunnerResult<T> = std::result::Result<T, RunnerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_failed_includes_stderr_tail() {
        let err = RunnerError::CommandFailed {
            command: "gradlew".into(),
            exit_code: 1,
            stderr_tail: "BUILD FAILED".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("exited with code 1"));
        assert!(msg.ends_with("BUILD FAILED"));
    }

    #[test]
    fn test_build_failed_wraps_cause() {
        let err = RunnerError::build(
            TargetPlatform::Android,
            RunnerError::Timeout {
                command: "gradlew".into(),
                secs: 5,
            },
        );
        assert!(err.to_string().starts_with("Android build failed"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
