//! Server crate provides HTTP server functionality.
//!
//! This module is a thin transport over the order use case: route dispatch,
//! status-code mapping for classified service errors, a server-push stream
//! bridging the in-process "new order" topic, plus health and metrics
//! endpoints.

use std::convert::Infallible;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event as SseEvent, KeepAlive, Sse},
    },
    routing::{get, patch},
};
use events::{OrderEvent, OrderEvents};
use prometheus::{CounterVec, Opts, Registry};
use serde::Deserialize;
use serde_json::json;
use service::{OrderService, ServiceError};
use tokio::net::TcpListener;
use tokio::signal;
use tokio_stream::{StreamExt, wrappers::BroadcastStream};
use tracing::{error, info, warn};

const DEFAULT_LIST_LIMIT: usize = 50;

/// Server represents an HTTP server for working with orders.
pub struct Server {
    service: Arc<dyn OrderService>,
    events: OrderEvents,
    port: u16,
    metrics: Arc<Metrics>,
}

/// Metrics collects and exposes HTTP server metrics.
struct Metrics {
    registry: Registry,
    http_requests_total: CounterVec,
    errors_total: CounterVec,
}

impl Metrics {
    fn new() -> Self {
        let registry = Registry::new();

        let http_requests_total = CounterVec::new(
            Opts::new("http_requests_total", "Total number of HTTP requests"),
            &["method", "endpoint", "status"],
        )
        .expect("Failed to create http_requests_total metric");

        let errors_total = CounterVec::new(
            Opts::new("errors_total", "Total number of errors"),
            &["source", "endpoint"],
        )
        .expect("Failed to create errors_total metric");

        registry
            .register(Box::new(http_requests_total.clone()))
            .expect("Failed to register http_requests_total metric");
        registry
            .register(Box::new(errors_total.clone()))
            .expect("Failed to register errors_total metric");

        Self {
            registry,
            http_requests_total,
            errors_total,
        }
    }

    fn record_request(&self, method: &str, endpoint: &str, status: u16) {
        self.http_requests_total
            .with_label_values(&[method, endpoint, &status.to_string()])
            .inc();
    }

    fn record_error(&self, source: &str, endpoint: &str) {
        self.errors_total
            .with_label_values(&[source, endpoint])
            .inc();
    }
}

#[derive(Debug, Deserialize)]
struct ListParams {
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct StatusBody {
    status: String,
}

impl Server {
    /// Creates a new Server instance.
    ///
    /// # Arguments
    ///
    /// * `port` - The port on which the server will listen
    /// * `service` - The order use case backing every route
    /// * `events` - The order event topic served on the stream endpoint
    pub fn new(port: u16, service: Arc<dyn OrderService>, events: OrderEvents) -> Self {
        info!("Initializing HTTP server on port {}", port);

        Self {
            service,
            events,
            port,
            metrics: Arc::new(Metrics::new()),
        }
    }

    /// Starts the server and blocks until it's shut down.
    pub async fn start(&self) -> Result<()> {
        let app = self.create_router();

        let listener = TcpListener::bind(format!("0.0.0.0:{}", self.port))
            .await
            .context("Failed to bind to port")?;

        info!("HTTP server listening on port {}", self.port);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("Server error")?;

        info!("HTTP server shut down gracefully");
        Ok(())
    }

    fn create_router(&self) -> Router {
        let metrics = self.metrics.clone();

        Router::new()
            .route(
                "/api/orders",
                get(Self::handle_list_orders).post(Self::handle_create_order),
            )
            .route("/api/orders/{id}/status", patch(Self::handle_update_status))
            .route("/api/orders/stream", get(Self::handle_order_stream))
            .route("/health", get(Self::handle_health))
            .route("/metrics", get(Self::handle_metrics))
            .layer(axum::middleware::from_fn_with_state(
                metrics.clone(),
                Self::metrics_middleware,
            ))
            .with_state(AppState {
                service: self.service.clone(),
                events: self.events.clone(),
                metrics,
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

        let response = next.run(req).await;
        let status = response.status().as_u16();

        metrics.record_request(&method, &path, status);
        if status >= 400 {
            metrics.record_error("http", &path);
        }

        response
    }

    async fn handle_list_orders(
        State(state): State<AppState>,
        Query(params): Query<ListParams>,
    ) -> Response {
        let limit = params.limit.unwrap_or(DEFAULT_LIST_LIMIT);
        match state.service.list_orders(limit).await {
            Ok(orders) => Json(orders).into_response(),
            Err(err) => service_error_response(&err),
        }
    }

    async fn handle_create_order(State(state): State<AppState>, body: String) -> Response {
        let payload = sanitizer::parse_payload(&body);
        match state.service.create_order(&payload).await {
            Ok(placed) => (
                StatusCode::CREATED,
                Json(json!({ "stored": placed.stored, "clean": placed.clean })),
            )
                .into_response(),
            Err(err) => service_error_response(&err),
        }
    }

    async fn handle_update_status(
        State(state): State<AppState>,
        Path(id): Path<String>,
        Json(body): Json<StatusBody>,
    ) -> Response {
        match state.service.update_order_status(&id, &body.status).await {
            Ok(Some(order)) => Json(order).into_response(),
            Ok(None) => {
                warn!("Order not found: {}", id);
                (StatusCode::NOT_FOUND, "order not found").into_response()
            }
            Err(err) => service_error_response(&err),
        }
    }

    /// Server-push feed of the "new order" topic. Subscribers that lag past
    /// the channel capacity miss the oldest events and keep receiving.
    async fn handle_order_stream(
        State(state): State<AppState>,
    ) -> Sse<impl tokio_stream::Stream<Item = Result<SseEvent, Infallible>>> {
        let rx = state.events.subscribe();
        let stream = BroadcastStream::new(rx).filter_map(|event| match event {
            Ok(OrderEvent::Placed(order)) => SseEvent::default()
                .event("new-order")
                .json_data(&*order)
                .ok()
                .map(Ok),
            Err(_) => None,
        });
        Sse::new(stream).keep_alive(KeepAlive::default())
    }

    async fn handle_health() -> &'static str {
        "OK"
    }

    async fn handle_metrics(State(state): State<AppState>) -> Response {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();

        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&state.metrics.registry.gather(), &mut buffer) {
            error!("Failed to encode metrics: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response();
        }

        match String::from_utf8(buffer) {
            Ok(metrics_text) => (StatusCode::OK, metrics_text).into_response(),
            Err(e) => {
                error!("Failed to convert metrics to UTF-8: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Invalid metrics data").into_response()
            }
        }
    }
}

fn service_error_response(err: &ServiceError) -> Response {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        error!(error = %err, "request failed");
    } else {
        warn!(error = %err, "request rejected");
    }
    (status, Json(json!({ "error": err.to_string() }))).into_response()
}

/// Application state shared between request handlers
#[derive(Clone)]
struct AppState {
    service: Arc<dyn OrderService>,
    events: OrderEvents,
    metrics: Arc<Metrics>,
}

/// Waits for a shutdown signal (Ctrl+C)
async fn shutdown_signal() {
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

    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use service::PlacedOrder;

    struct NoopService;

    #[async_trait::async_trait]
    impl OrderService for NoopService {
        async fn create_order(
            &self,
            _raw: &serde_json::Value,
        ) -> Result<PlacedOrder, ServiceError> {
            Err(ServiceError::InvalidOrder("unused".to_string()))
        }
        async fn update_order_status(
            &self,
            _id: &str,
            _status: &str,
        ) -> Result<Option<model::Order>, ServiceError> {
            Ok(None)
        }
        async fn list_orders(&self, _limit: usize) -> Result<Vec<model::Order>, ServiceError> {
            Ok(Vec::new())
        }
    }

    fn create_test_server() -> Server {
        Server::new(8080, Arc::new(NoopService), OrderEvents::new())
    }

    #[test]
    fn test_server_creation() {
        let server = create_test_server();
        assert_eq!(server.port, 8080);
        let _router = server.create_router();
    }

    #[test]
    fn test_error_mapping() {
        let dup = service_error_response(&ServiceError::DuplicateOrder);
        assert_eq!(dup.status(), StatusCode::CONFLICT);
        let invalid =
            service_error_response(&ServiceError::InvalidOrder("missing items".to_string()));
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);
    }
}
