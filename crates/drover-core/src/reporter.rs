//! User-facing run output.
//!
//! Components receive a [`Reporter`] instead of printing directly, so the
//! binary decides where messages go and tests can capture them.

use std::sync::Mutex;

/// Shown next to every build or execute failure.
pub const FAILURE_BANNER: &str = "See the logs above to learn what happened. \
Re-run with --verbose for full diagnostics; if the output still does not explain \
the failure, please file a bug report.";

/// Sink for user-facing run messages.
pub trait Reporter: Send + Sync {
    /// Progress line.
    fn info(&self, message: &str);

    /// Success line.
    fn success(&self, message: &str);

    /// Failure line followed by the generic failure banner.
    fn failure(&self, message: &str);
}

/// Writes to the terminal: progress to stdout, failures to stderr.
#[derive(Debug, Default)]
pub struct ConsoleReporter;

impl Reporter for ConsoleReporter {
    fn info(&self, message: &str) {
        println!("• {}", message);
    }

    fn success(&self, message: &str) {
        println!("✓ {}", message);
    }

    fn failure(&self, message: &str) {
        eprintln!("✗ {}", message);
        eprintln!("  {}", FAILURE_BANNER);
    }
}

/// Kind of a captured message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Info,
    Success,
    Failure,
}

/// Captures messages in memory (testing only).
#[derive(Debug, Default)]
pub struct MemoryReporter {
    messages: Mutex<Vec<(MessageKind, String)>>,
}

impl MemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<(MessageKind, String)> {
        self.messages.lock().unwrap().clone()
    }

    pub fn count(&self, kind: MessageKind) -> usize {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| *k == kind)
            .count()
    }

    fn push(&self, kind: MessageKind, message: &str) {
        self.messages
            .lock()
            .unwrap()
            .push((kind, message.to_string()));
    }
}

impl Reporter for MemoryReporter {
    fn info(&self, message: &str) {
        self.push(MessageKind::Info, message);
    }

    fn success(&self, message: &str) {
        self.push(MessageKind::Success, message);
    }

    fn failure(&self, message: &str) {
        self.push(MessageKind::Failure, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_reporter_captures_in_order() {
        let reporter = MemoryReporter::new();
        reporter.info("building");
        reporter.failure("build failed");
        reporter.success("done");

        let messages = reporter.messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1], (MessageKind::Failure, "build failed".to_string()));
        assert_eq!(reporter.count(MessageKind::Info), 1);
    }
}
