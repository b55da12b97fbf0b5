//! Run phases and their failure policies.

use serde::{Deserialize, Serialize};

/// Pipeline phases, in execution order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Find test files and write the test bundle.
    Discover,

    /// Merge defines, resolve the device, build app options.
    Configure,

    /// Optional uninstall of a previous install.
    PreExecute,

    /// Build the app and the instrumentation runner.
    Build,

    /// Run the bundle on the device.
    Execute,

    /// Optional uninstall after the run.
    Finalize,
}

impl Phase {
    pub fn name(&self) -> &'static str {
        match self {
            Phase::Discover => "discover",
            Phase::Configure => "configure",
            Phase::PreExecute => "pre_execute",
            Phase::Build => "build",
            Phase::Execute => "execute",
            Phase::Finalize => "finalize",
        }
    }

    /// How a failure in this phase is handled.
    pub fn failure_policy(&self) -> FailurePolicy {
        match self {
            Phase::PreExecute => FailurePolicy::Ignore,
            Phase::Execute => FailurePolicy::Record,
            Phase::Discover | Phase::Configure | Phase::Build | Phase::Finalize => {
                FailurePolicy::Propagate
            }
        }
    }

    /// Whether a failure is shown to the user with the failure banner.
    pub fn shows_failure_banner(&self) -> bool {
        matches!(self, Phase::Build | Phase::Execute)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// What happens to an error raised inside a phase.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Discard; the run continues as if the phase succeeded.
    Ignore,

    /// Log and report; the run continues with a failed outcome.
    Record,

    /// Log and abort the run with the error.
    Propagate,
}

/// How a phase ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Passed,
    Failed,
    /// Failed, and the failure was discarded.
    Ignored,
}

/// Record of one executed phase.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PhaseRecord {
    pub phase: Phase,
    pub status: PhaseStatus,
    pub duration_ms: u64,
    /// Error message for failed or ignored phases.
    pub error: Option<String>,
}

impl PhaseRecord {
    pub fn passed(phase: Phase, duration_ms: u64) -> Self {
        Self {
            phase,
            status: PhaseStatus::Passed,
            duration_ms,
            error: None,
        }
    }

    /// Record a failure according to the phase's policy.
    pub fn failed(phase: Phase, duration_ms: u64, error: String) -> Self {
        let status = match phase.failure_policy() {
            FailurePolicy::Ignore => PhaseStatus::Ignored,
            FailurePolicy::Record | FailurePolicy::Propagate => PhaseStatus::Failed,
        };
        Self {
            phase,
            status,
            duration_ms,
            error: Some(error),
        }
    }
}
