//! HTTP endpoint the instrumented runtime posts its coverage hitmaps to.
//!
//! The runtime reads the port from the `DROVER_COVERAGE_PORT` define and sends
//! one `package:coverage` JSON document per request to
//! `POST http://localhost:<port>/coverage`. Android devices reach the host
//! through `adb reverse`; simulators and macOS share the host's loopback.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{parse_hitmap_json, CoverageSource, SourceCoverage};
use crate::error::DroverError;
use crate::Result;

/// Default host port of the coverage endpoint.
pub const DEFAULT_COVERAGE_PORT: u16 = 8083;

/// Define carrying the coverage port to the runtime.
pub const COVERAGE_PORT_DEFINE: &str = "DROVER_COVERAGE_PORT";

/// Route hitmaps are posted to.
pub const COVERAGE_ROUTE: &str = "/coverage";

#[derive(Default)]
struct Received {
    sources: Mutex<Vec<SourceCoverage>>,
    errors: Mutex<Vec<String>>,
}

struct Server {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<std::io::Result<()>>,
}

/// Receives hitmaps over HTTP while tests run.
pub struct HttpCoverageSource {
    bind: SocketAddr,
    received: Arc<Received>,
    server: Mutex<Option<Server>>,
}

impl HttpCoverageSource {
    /// Listen on all interfaces at `port`.
    pub fn new(port: u16) -> Self {
        Self::bind(SocketAddr::from(([0, 0, 0, 0], port)))
    }

    pub fn bind(addr: SocketAddr) -> Self {
        Self {
            bind: addr,
            received: Arc::new(Received::default()),
            server: Mutex::new(None),
        }
    }

    /// Bound address while listening.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.server.lock().await.as_ref().map(|s| s.addr)
    }
}

async fn receive(State(received): State<Arc<Received>>, body: String) -> StatusCode {
    match parse_hitmap_json(Path::new(COVERAGE_ROUTE), &body) {
        Ok(sources) => {
            debug!(sources = sources.len(), "Received coverage hitmap");
            received.sources.lock().await.extend(sources);
            StatusCode::NO_CONTENT
        }
        Err(e) => {
            warn!(error = %e, "Rejected coverage hitmap");
            received.errors.lock().await.push(e.to_string());
            StatusCode::BAD_REQUEST
        }
    }
}

#[async_trait]
impl CoverageSource for HttpCoverageSource {
    async fn listen(&self) -> Result<()> {
        let mut server = self.server.lock().await;
        if server.is_some() {
            return Err(DroverError::CoverageLifecycle(
                "coverage endpoint is already listening".to_string(),
            ));
        }
        self.received.sources.lock().await.clear();
        self.received.errors.lock().await.clear();

        let listener = TcpListener::bind(self.bind).await?;
        let addr = listener.local_addr()?;
        let router = Router::new()
            .route(COVERAGE_ROUTE, post(receive))
            .with_state(self.received.clone());
        let (shutdown, stop) = oneshot::channel();
        let task = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = stop.await;
                })
                .await
        });

        debug!(addr = %addr, "Listening for coverage hitmaps");
        *server = Some(Server {
            addr,
            shutdown,
            task,
        });
        Ok(())
    }

    async fn drain(&self) -> Result<Vec<SourceCoverage>> {
        if let Some(server) = self.server.lock().await.take() {
            let _ = server.shutdown.send(());
            match server.task.await {
                Ok(result) => result?,
                Err(e) => warn!(error = %e, "Coverage endpoint task ended abnormally"),
            }
        }

        let errors = std::mem::take(&mut *self.received.errors.lock().await);
        if let Some(first) = errors.into_iter().next() {
            return Err(DroverError::CoverageData {
                path: COVERAGE_ROUTE.into(),
                reason: first,
            });
        }
        let sources = std::mem::take(&mut *self.received.sources.lock().await);
        debug!(sources = sources.len(), "Drained coverage endpoint");
        Ok(sources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback() -> HttpCoverageSource {
        HttpCoverageSource::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
    }

    async fn post_hitmap(addr: SocketAddr, body: &str) -> reqwest::StatusCode {
        reqwest::Client::new()
            .post(format!("http://{}{}", addr, COVERAGE_ROUTE))
            .body(body.to_string())
            .send()
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn test_receives_posted_hitmaps() {
        let source = loopback();
        source.listen().await.unwrap();
        let addr = source.local_addr().await.unwrap();

        let status = post_hitmap(
            addr,
            r#"{"coverage":[{"source":"package:my_app/main.dart","hits":[1,2,4,0]}]}"#,
        )
        .await;
        assert_eq!(status, reqwest::StatusCode::NO_CONTENT);
        post_hitmap(
            addr,
            r#"{"coverage":[{"source":"package:my_app/model.dart","hits":[7,1]}]}"#,
        )
        .await;

        let drained = source.drain().await.unwrap();
        let uris: Vec<&str> = drained.iter().map(|s| s.uri.as_str()).collect();
        assert_eq!(uris, vec!["package:my_app/main.dart", "package:my_app/model.dart"]);
        assert_eq!(drained[0].hits.line_hits[&1], 2);
        assert!(source.local_addr().await.is_none());
    }

    #[tokio::test]
    async fn test_malformed_hitmap_fails_drain() {
        let source = loopback();
        source.listen().await.unwrap();
        let addr = source.local_addr().await.unwrap();

        let status = post_hitmap(addr, "not json").await;
        assert_eq!(status, reqwest::StatusCode::BAD_REQUEST);

        let err = source.drain().await.unwrap_err();
        assert!(matches!(err, DroverError::CoverageData { .. }));
    }

    #[tokio::test]
    async fn test_listen_twice_is_rejected() {
        let source = loopback();
        source.listen().await.unwrap();
        assert!(matches!(
            source.listen().await,
            Err(DroverError::CoverageLifecycle(_))
        ));
        assert!(source.drain().await.unwrap().is_empty());
    }
}
