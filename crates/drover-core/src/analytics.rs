//! Best-effort usage analytics.
//!
//! Events are posted from a detached task that is never awaited. The task may
//! be dropped when the process exits, and failures are only logged at debug
//! level; analytics can never block or fail a run.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

/// Environment variable holding the analytics endpoint.
pub const ANALYTICS_URL_ENV: &str = "DROVER_ANALYTICS_URL";

/// Environment variable that opts out of analytics when set.
pub const NO_ANALYTICS_ENV: &str = "DROVER_NO_ANALYTICS";

/// A single usage event.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AnalyticsEvent {
    pub id: Uuid,
    pub name: String,
    pub tool_version: String,
    pub os: String,
    pub timestamp: DateTime<Utc>,
    /// Feature flags used by this invocation.
    pub features: Vec<String>,
}

impl AnalyticsEvent {
    pub fn new(name: impl Into<String>, features: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            os: std::env::consts::OS.to_string(),
            timestamp: Utc::now(),
            features,
        }
    }
}

/// Sends [`AnalyticsEvent`]s to a collection endpoint.
#[derive(Debug, Clone)]
pub struct Analytics {
    endpoint: Option<String>,
    client: reqwest::Client,
}

impl Analytics {
    /// Enabled only when `endpoint` is set.
    pub fn new(endpoint: Option<String>) -> Self {
        Self {
            endpoint: endpoint.filter(|e| !e.trim().is_empty()),
            client: reqwest::Client::new(),
        }
    }

    pub fn disabled() -> Self {
        Self::new(None)
    }

    pub fn enabled(&self) -> bool {
        self.endpoint.is_some()
    }

    /// Post `event` in a detached task. Requires a running tokio runtime.
    ///
    /// The returned handle may be ignored; nothing waits for it.
    pub fn send_detached(&self, event: AnalyticsEvent) -> Option<JoinHandle<()>> {
        let endpoint = self.endpoint.clone()?;
        let client = self.client.clone();

        Some(tokio::spawn(async move {
            match client.post(&endpoint).json(&event).send().await {
                Ok(response) => {
                    debug!(status = %response.status(), event = %event.name, "Analytics event sent")
                }
                Err(e) => debug!(error = %e, event = %event.name, "Analytics event dropped"),
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_carries_version_and_features() {
        let event = AnalyticsEvent::new("test", vec!["coverage".to_string()]);
        assert_eq!(event.tool_version, env!("CARGO_PKG_VERSION"));
        assert_eq!(event.features, vec!["coverage"]);
    }

    #[test]
    fn test_blank_endpoint_disables() {
        assert!(!Analytics::new(Some("  ".to_string())).enabled());
        assert!(!Analytics::disabled().enabled());
        assert!(Analytics::new(Some("http://127.0.0.1:9/e".to_string())).enabled());
    }

    #[tokio::test]
    async fn test_disabled_sends_nothing() {
        let handle = Analytics::disabled().send_detached(AnalyticsEvent::new("test", vec![]));
        assert!(handle.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_never_fails_caller() {
        let analytics = Analytics::new(Some("http://127.0.0.1:9/events".to_string()));
        let handle = analytics
            .send_detached(AnalyticsEvent::new("test", vec![]))
            .expect("enabled");
        // The task swallows the connection error.
        assert!(handle.await.is_ok());
    }
}
