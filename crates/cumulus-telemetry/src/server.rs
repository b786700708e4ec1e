//! Metrics exposition endpoint
//!
//! Serves the Prometheus text format over plain HTTP/1. Besides the
//! configured scrape path the endpoint answers `GET /healthz`, so a
//! process supervisor can probe liveness without parsing metrics. Only
//! GET is accepted; everything else is refused.
//!
//! Shutdown is two-phase: the accept loop stops on cancellation, then
//! each open connection gets a graceful close so an in-flight scrape
//! still receives its response.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::sink::PrometheusSink;

/// Pause after a failed accept (fd exhaustion and the like) before the
/// listener is polled again.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(250);

/// Content type of the Prometheus text exposition format.
const EXPOSITION_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// HTTP endpoint exposing the Prometheus sink.
pub struct MetricsServer {
    sink: Arc<PrometheusSink>,
    scrape_path: String,
}

impl MetricsServer {
    /// Creates an endpoint serving `sink` under `scrape_path`.
    pub fn new(sink: Arc<PrometheusSink>, scrape_path: impl Into<String>) -> Self {
        Self {
            sink,
            scrape_path: scrape_path.into(),
        }
    }

    /// Binds `port` on all interfaces and serves until cancellation.
    ///
    /// Bind failures surface to the caller; accept failures are logged
    /// and retried after a short pause so a transient fd shortage does
    /// not kill the endpoint.
    pub async fn serve(self, port: u16, shutdown: CancellationToken) -> anyhow::Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = TcpListener::bind(addr).await?;
        info!(%addr, scrape_path = %self.scrape_path, "Metrics endpoint exposed");

        let server = Arc::new(self);
        loop {
            let stream = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => stream,
                    Err(e) => {
                        warn!(error = %e, "Could not accept scrape connection");
                        tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                        continue;
                    }
                },
            };

            let server = Arc::clone(&server);
            let conn_token = shutdown.clone();
            tokio::spawn(async move {
                server.drive_connection(stream, conn_token).await;
            });
        }

        info!("Metrics endpoint closed");
        Ok(())
    }

    /// Serves one scrape connection.
    ///
    /// On shutdown the connection is closed gracefully: the response in
    /// flight completes, keep-alive ends afterwards.
    async fn drive_connection(&self, stream: TcpStream, shutdown: CancellationToken) {
        let service = service_fn(|req: Request<Incoming>| {
            let response = self.respond(req.method(), req.uri().path());
            async move { Ok::<_, Infallible>(response) }
        });

        let connection = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
        tokio::pin!(connection);

        tokio::select! {
            result = connection.as_mut() => {
                if let Err(e) = result {
                    debug!(error = %e, "Scrape connection ended abnormally");
                }
            }
            _ = shutdown.cancelled() => {
                connection.as_mut().graceful_shutdown();
                let _ = connection.await;
            }
        }
    }

    /// Routes one request to its response.
    fn respond(&self, method: &Method, path: &str) -> Response<Full<Bytes>> {
        if *method != Method::GET {
            return plain(StatusCode::METHOD_NOT_ALLOWED, "method not allowed\n");
        }

        if path == self.scrape_path {
            return match self.sink.encode() {
                Ok(body) => {
                    let mut response = plain(StatusCode::OK, body);
                    response.headers_mut().insert(
                        hyper::header::CONTENT_TYPE,
                        hyper::header::HeaderValue::from_static(EXPOSITION_CONTENT_TYPE),
                    );
                    response
                }
                Err(e) => plain(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("metrics encoding failed: {e}\n"),
                ),
            };
        }

        match path {
            "/healthz" => plain(StatusCode::OK, "ok\n"),
            _ => plain(StatusCode::NOT_FOUND, "not found\n"),
        }
    }
}

fn plain(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(body.into()))
        .expect("static response parts")
}

// ============================================================================
// Unit tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    use cumulus_core::ports::{MetricsSink, SyncOperation};

    fn server() -> MetricsServer {
        let sink = Arc::new(PrometheusSink::new().unwrap());
        sink.record_operation(SyncOperation::Upload, Duration::from_millis(3), true);
        MetricsServer::new(sink, "/metrics")
    }

    async fn body_text(response: Response<Full<Bytes>>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn scrape_path_returns_exposition() {
        let server = server();
        let response = server.respond(&Method::GET, "/metrics");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get(hyper::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok()),
            Some(EXPOSITION_CONTENT_TYPE)
        );
        let body = body_text(response).await;
        assert!(body.contains("cumulus_files_uploaded_total 1"));
    }

    #[tokio::test]
    async fn healthz_answers_ok() {
        let server = server();
        let response = server.respond(&Method::GET, "/healthz");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "ok\n");
    }

    #[tokio::test]
    async fn unknown_path_is_not_found() {
        let server = server();
        let response = server.respond(&Method::GET, "/other");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn non_get_is_refused() {
        let server = server();
        for method in [Method::POST, Method::PUT, Method::DELETE] {
            let response = server.respond(&method, "/metrics");
            assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        }
    }

    #[test]
    fn custom_scrape_path_moves_the_route() {
        let sink = Arc::new(PrometheusSink::new().unwrap());
        let server = MetricsServer::new(sink, "/internal/metrics");

        let hit = server.respond(&Method::GET, "/internal/metrics");
        assert_eq!(hit.status(), StatusCode::OK);

        let miss = server.respond(&Method::GET, "/metrics");
        assert_eq!(miss.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn serve_stops_on_cancellation() {
        let sink = Arc::new(PrometheusSink::new().unwrap());
        let server = MetricsServer::new(sink, "/metrics");
        let token = CancellationToken::new();

        let serve_token = token.clone();
        let handle = tokio::spawn(async move { server.serve(0, serve_token).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();

        let result = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("endpoint should close promptly")
            .expect("task should not panic");
        assert!(result.is_ok());
    }
}
