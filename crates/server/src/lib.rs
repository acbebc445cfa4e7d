//! Server crate provides the operator HTTP surface.
//!
//! This module implements the health endpoint, the read-only stock view, and
//! the Prometheus metrics endpoint. Service errors are rendered as RFC-7807
//! problem-details bodies.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{OriginalUri, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use app_config::ServerConfig;
use deadpool_postgres::Pool;
use prometheus::{CounterVec, HistogramOpts, HistogramVec, Opts, Registry};
use serde::Serialize;
use service::{ServiceError, StockService};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::Notify;
use tracing::{error, info};

/// Server represents the HTTP surface over the stock service.
pub struct Server {
    config: ServerConfig,
    stock_service: Arc<dyn StockService>,
    pool: Pool,
    metrics: Arc<Metrics>,
}

/// Health of a single dependency as reported by `/health`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
enum Status {
    Up,
    Down,
}

/// Map of dependency name to status; the overall status decides the HTTP
/// code of the health endpoint.
#[derive(Debug, Serialize)]
struct StatusReport(BTreeMap<&'static str, Status>);

impl StatusReport {
    fn overall(&self) -> Status {
        if self.0.values().all(|s| *s == Status::Up) {
            Status::Up
        } else {
            Status::Down
        }
    }

    fn http_status(&self) -> StatusCode {
        match self.overall() {
            Status::Up => StatusCode::OK,
            Status::Down => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// RFC-7807 problem-details body; validation field violations are flattened
/// in as extension members.
#[derive(Debug, Serialize)]
struct Problem {
    #[serde(rename = "type")]
    problem_type: String,
    status: u16,
    title: String,
    detail: String,
    instance: String,
    #[serde(flatten)]
    fields: BTreeMap<String, String>,
}

impl Problem {
    fn from_service_error(err: &ServiceError, instance: &str) -> Self {
        Self {
            problem_type: format!("/api/v1/problems/{}", err.problem_slug()),
            status: err.http_status(),
            title: err.title().to_string(),
            detail: err.to_string(),
            instance: instance.to_string(),
            fields: err.fields(),
        }
    }
}

impl IntoResponse for Problem {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = (status, Json(self)).into_response();
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/problem+json"),
        );
        response
    }
}

/// Metrics collects and exposes HTTP server metrics.
struct Metrics {
    registry: Registry,
    http_requests_total: CounterVec,
    http_request_duration_seconds: HistogramVec,
}

impl Metrics {
    fn new() -> Self {
        let registry = Registry::new();

        let http_requests_total = CounterVec::new(
            Opts::new("http_requests_total", "Total number of HTTP requests"),
            &["method", "endpoint", "status"],
        )
        .expect("Failed to create http_requests_total metric");

        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "http_request_duration_seconds",
                "HTTP request duration in seconds",
            ),
            &["method", "endpoint"],
        )
        .expect("Failed to create http_request_duration_seconds metric");

        registry
            .register(Box::new(http_requests_total.clone()))
            .expect("Failed to register http_requests_total metric");
        registry
            .register(Box::new(http_request_duration_seconds.clone()))
            .expect("Failed to register http_request_duration_seconds metric");

        Self {
            registry,
            http_requests_total,
            http_request_duration_seconds,
        }
    }

    fn record_request(&self, method: &str, endpoint: &str, status: u16, duration: Duration) {
        self.http_requests_total
            .with_label_values(&[method, endpoint, &status.to_string()])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[method, endpoint])
            .observe(duration.as_secs_f64());
    }
}

/// Application state shared between request handlers
#[derive(Clone)]
struct AppState {
    stock_service: Arc<dyn StockService>,
    pool: Pool,
    metrics: Arc<Metrics>,
}

impl Server {
    /// Creates a new Server instance over the given service and pool.
    pub fn new(config: ServerConfig, stock_service: Arc<dyn StockService>, pool: Pool) -> Self {
        info!("initializing HTTP server on port {}", config.port);

        Self {
            config,
            stock_service,
            pool,
            metrics: Arc::new(Metrics::new()),
        }
    }

    /// Starts the server and blocks until the shutdown notify fires and
    /// in-flight requests drain.
    pub async fn start(self, shutdown: Arc<Notify>) -> Result<()> {
        let address = self.config.listen_address();
        let app = self.create_router();

        let listener = TcpListener::bind(&address)
            .await
            .context("failed to bind to port")?;

        info!("HTTP server listening on {address}");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.notified().await })
            .await
            .context("server error")?;

        info!("HTTP server shut down gracefully");
        Ok(())
    }

    fn create_router(&self) -> Router {
        Router::new()
            .route("/health", get(Self::handle_health))
            .route("/kitchen/api/v1/stock", get(Self::handle_get_stock))
            .route("/metrics", get(Self::handle_metrics))
            .layer(axum::middleware::from_fn_with_state(
                self.metrics.clone(),
                Self::metrics_middleware,
            ))
            .with_state(AppState {
                stock_service: self.stock_service.clone(),
                pool: self.pool.clone(),
                metrics: self.metrics.clone(),
            })
    }

    /// Middleware for collecting metrics on HTTP requests
    async fn metrics_middleware(
        State(metrics): State<Arc<Metrics>>,
        req: axum::extract::Request,
        next: axum::middleware::Next,
    ) -> Response {
        let method = req.method().to_string();
        let path = req.uri().path().to_string();

        let start = std::time::Instant::now();
        let response = next.run(req).await;

        metrics.record_request(&method, &path, response.status().as_u16(), start.elapsed());
        response
    }

    async fn handle_health(State(state): State<AppState>) -> Response {
        let database = match db::ping_with_backoff(&state.pool).await {
            Ok(()) => Status::Up,
            Err(err) => {
                error!("ping failed for health check: {err:#}");
                Status::Down
            }
        };

        let report = StatusReport(BTreeMap::from([("database", database)]));
        (report.http_status(), Json(report)).into_response()
    }

    async fn handle_get_stock(
        State(state): State<AppState>,
        OriginalUri(uri): OriginalUri,
    ) -> Response {
        match state.stock_service.get_stock().await {
            Ok(stock) => (StatusCode::OK, Json(stock)).into_response(),
            Err(err) => {
                error!("failed to read stock: {err}");
                Problem::from_service_error(&err, uri.path()).into_response()
            }
        }
    }

    async fn handle_metrics(State(state): State<AppState>) -> Response {
        use prometheus::Encoder;

        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(err) = encoder.encode(&state.metrics.registry.gather(), &mut buffer) {
            error!("failed to encode metrics: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to encode metrics",
            )
                .into_response();
        }

        match String::from_utf8(buffer) {
            Ok(text) => (StatusCode::OK, text).into_response(),
            Err(err) => {
                error!("failed to convert metrics to UTF-8: {err}");
                (StatusCode::INTERNAL_SERVER_ERROR, "invalid metrics data").into_response()
            }
        }
    }
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
pub async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use repository::RepositoryError;

    #[test]
    fn test_status_report_serializes_wire_spelling() {
        let report = StatusReport(BTreeMap::from([("database", Status::Up)]));
        assert_eq!(
            serde_json::to_string(&report).unwrap(),
            r#"{"database":"UP"}"#
        );
        assert_eq!(report.http_status(), StatusCode::OK);
    }

    #[test]
    fn test_status_report_is_down_when_any_entry_is_down() {
        let report = StatusReport(BTreeMap::from([("database", Status::Down)]));
        assert_eq!(
            serde_json::to_string(&report).unwrap(),
            r#"{"database":"DOWN"}"#
        );
        assert_eq!(report.http_status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_problem_from_insufficient_stock() {
        let err = ServiceError::from(RepositoryError::InsufficientStock {
            item: "Tomatoes".to_string(),
        });
        let problem = Problem::from_service_error(&err, "/kitchen/api/v1/stock");
        let body: serde_json::Value = serde_json::to_value(&problem).unwrap();

        assert_eq!(body["type"], "/api/v1/problems/invalid-request");
        assert_eq!(body["status"], 400);
        assert_eq!(body["title"], "Invalid Request");
        assert_eq!(body["detail"], "insufficient stock of \"Tomatoes\"");
        assert_eq!(body["instance"], "/kitchen/api/v1/stock");
    }

    #[test]
    fn test_problem_flattens_validation_fields() {
        let err = ServiceError::from(model::StockItem::new("", 1).unwrap_err());
        let problem = Problem::from_service_error(&err, "/kitchen/api/v1/stock");
        let body: serde_json::Value = serde_json::to_value(&problem).unwrap();

        assert_eq!(body["status"], 400);
        assert_eq!(body["name"], "name must be 1 to 25 characters long");
    }
}
