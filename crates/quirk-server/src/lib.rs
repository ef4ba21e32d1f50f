//! HTTP front end for the Quirk execution core
//!
//! Exposes `POST /run`, which takes `{ "code": "..." }` and answers with the
//! editor-facing run response, and `GET /health`. The server holds no
//! execution logic of its own; it only marshals JSON to and from a
//! [`CodeExecutor`].

pub mod error;

pub use error::{Result, ServerError};

use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Json as AxumJson, State};
use axum::response::Json;
use axum::routing::{get, post};
use axum::{middleware, Router};
use quirk_core::config::ServerSettings;
use quirk_core::{AdmissionStats, CodeExecutor, RunRequest, RunResponse};
use serde::Serialize;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admission: Option<AdmissionStats>,
}

/// Configuration for the HTTP server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server bind address
    pub bind_addr: SocketAddr,
    /// Enable CORS
    pub enable_cors: bool,
    /// CORS allowed origins (if None, allows any origin)
    pub cors_origins: Option<Vec<String>>,
    /// Maximum request body size in bytes
    pub max_body_size: usize,
    /// Enable request logging
    pub enable_logging: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 5000)),
            enable_cors: true,
            cors_origins: None,
            max_body_size: 1024 * 1024, // 1MB
            enable_logging: true,
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from the `server` section of the config file.
    pub fn from_settings(settings: &ServerSettings) -> Result<Self> {
        let config = Self::default().with_bind_addr_str(&settings.bind_addr)?;
        Ok(config
            .with_cors(settings.enable_cors)
            .with_logging(settings.enable_logging)
            .with_max_body_size(settings.max_body_size))
    }

    /// Set the bind address.
    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Parse and set the bind address from a string.
    pub fn with_bind_addr_str(mut self, addr: &str) -> Result<Self> {
        self.bind_addr = addr
            .parse()
            .map_err(|e| ServerError::config_error(format!("Invalid bind address: {}", e)))?;
        Ok(self)
    }

    /// Enable or disable CORS.
    pub fn with_cors(mut self, enable: bool) -> Self {
        self.enable_cors = enable;
        self
    }

    /// Set allowed CORS origins.
    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = Some(origins);
        self
    }

    /// Set maximum request body size.
    pub fn with_max_body_size(mut self, size: usize) -> Self {
        self.max_body_size = size;
        self
    }

    /// Enable or disable request logging.
    pub fn with_logging(mut self, enable: bool) -> Self {
        self.enable_logging = enable;
        self
    }
}

/// Shared application state containing the executor.
#[derive(Clone)]
pub struct AppState<T: CodeExecutor + Clone> {
    pub executor: T,
}

/// Handler for the /run POST endpoint.
async fn run_handler<T: CodeExecutor + Clone>(
    State(app_state): State<AppState<T>>,
    payload: std::result::Result<AxumJson<RunRequest>, JsonRejection>,
) -> std::result::Result<Json<RunResponse>, ServerError> {
    let AxumJson(request) = payload.map_err(|rejection| {
        log::warn!("Rejected run request: {}", rejection.body_text());
        ServerError::invalid_request(rejection.body_text())
    })?;

    log::debug!("Received run request ({} bytes of code)", request.code.len());
    let outcome = app_state.executor.execute_code(&request.code).await;
    Ok(Json(outcome.into_response()))
}

async fn health_handler<T: CodeExecutor + Clone>(
    State(app_state): State<AppState<T>>,
) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        admission: app_state.executor.admission_stats(),
    })
}

/// The HTTP server wrapping a code executor.
pub struct QuirkServer<T: CodeExecutor + Clone> {
    executor: T,
    config: ServerConfig,
}

impl<T: CodeExecutor + Clone + Send + Sync + 'static> QuirkServer<T> {
    /// Create a new server with the given executor and default configuration.
    pub fn new(executor: T) -> Self {
        Self {
            executor,
            config: ServerConfig::default(),
        }
    }

    /// Create a new server with custom configuration.
    pub fn with_config(executor: T, config: ServerConfig) -> Self {
        Self { executor, config }
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Build the Axum router with all routes and middleware.
    pub fn build_router(&self) -> Router {
        let state = AppState {
            executor: self.executor.clone(),
        };

        let mut router = Router::new()
            .route("/health", get(health_handler::<T>))
            .route("/run", post(run_handler::<T>))
            .layer(DefaultBodyLimit::max(self.config.max_body_size))
            .with_state(state);

        if self.config.enable_logging {
            router = router.layer(middleware::from_fn(
                |request: axum::http::Request<axum::body::Body>,
                 next: axum::middleware::Next| async {
                    let request_id = uuid::Uuid::new_v4().to_string();
                    let method = request.method().clone();
                    let uri = request.uri().clone();

                    // Health probes are frequent, keep them out of info logs
                    if uri.path() == "/health" {
                        log::debug!("Request {} {} {}", request_id, method, uri);
                    } else {
                        log::info!("Request {} {} {}", request_id, method, uri);
                    }

                    let start = std::time::Instant::now();
                    let response = next.run(request).await;
                    let duration = start.elapsed();

                    if uri.path() == "/health" {
                        log::debug!("Response {} completed in {:?}", request_id, duration);
                    } else {
                        log::info!(
                            "Response {} {} completed in {:?}",
                            request_id,
                            response.status(),
                            duration
                        );
                    }

                    response
                },
            ));
        }

        router = router.layer(TraceLayer::new_for_http());

        if self.config.enable_cors {
            let cors_layer = if let Some(ref origins) = self.config.cors_origins {
                let origins: std::result::Result<Vec<_>, _> =
                    origins.iter().map(|s| s.parse()).collect();
                match origins {
                    Ok(origins) => CorsLayer::new()
                        .allow_origin(origins)
                        .allow_methods(Any)
                        .allow_headers(Any),
                    Err(_) => CorsLayer::permissive(),
                }
            } else {
                CorsLayer::permissive()
            };
            router = router.layer(cors_layer);
        }

        router
    }

    /// Start the server with graceful shutdown support.
    ///
    /// The server will shut down when the provided shutdown signal is received.
    pub async fn serve_with_shutdown<F>(self, shutdown_signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let router = self.build_router();
        let listener = TcpListener::bind(self.config.bind_addr)
            .await
            .map_err(|e| {
                log::error!("Failed to bind to {}: {}", self.config.bind_addr, e);
                ServerError::Io(e)
            })?;

        log::info!("Quirk server listening on {}", self.config.bind_addr);
        log::info!("Run endpoint: http://{}/run", self.config.bind_addr);
        log::info!("Health check: http://{}/health", self.config.bind_addr);

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| ServerError::internal(format!("Server error: {}", e)))?;

        log::info!("Quirk server shut down gracefully");
        Ok(())
    }
}

/// Utility function to create a shutdown signal from Ctrl+C.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            log::info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            log::info!("Received SIGTERM, shutting down...");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use quirk_core::{ExecutionError, ExecutionOutcome};
    use std::sync::{Arc, Mutex};
    use tower::ServiceExt; // for `oneshot`

    #[derive(Clone)]
    struct MockExecutor {
        outcome: ExecutionOutcome,
        received: Arc<Mutex<Vec<String>>>,
    }

    impl MockExecutor {
        fn new(outcome: ExecutionOutcome) -> Self {
            Self {
                outcome,
                received: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    #[async_trait]
    impl CodeExecutor for MockExecutor {
        async fn execute_code(&self, code: &str) -> ExecutionOutcome {
            self.received.lock().unwrap().push(code.to_string());
            self.outcome.clone()
        }
    }

    async fn post_run(app: Router, body: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/run")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_run_returns_output() {
        let mock = MockExecutor::new(ExecutionOutcome::Output {
            text: "1\n2".to_string(),
        });
        let received = mock.received.clone();
        let app = QuirkServer::new(mock).build_router();

        let (status, body) = post_run(app, r#"{"code":"print 1\nprint 2"}"#).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!({ "output": "1\n2" }));
        assert_eq!(received.lock().unwrap().as_slice(), ["print 1\nprint 2"]);
    }

    #[tokio::test]
    async fn test_run_returns_positioned_error() {
        let mock = MockExecutor::new(ExecutionOutcome::PositionedError {
            message: "Undefined variable x (line 3)".to_string(),
            line: 3,
        });
        let app = QuirkServer::new(mock).build_router();

        let (status, body) = post_run(app, r#"{"code":"print x"}"#).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            serde_json::json!({ "error": true, "message": "Undefined variable x (line 3)", "line": 3 })
        );
    }

    #[tokio::test]
    async fn test_run_reports_system_failure_without_line() {
        let mock = MockExecutor::new(ExecutionOutcome::failure(ExecutionError::Overloaded));
        let app = QuirkServer::new(mock).build_router();

        let (status, body) = post_run(app, r#"{"code":"print 1"}"#).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["error"], true);
        assert_eq!(body["kind"], "overloaded");
        assert!(body.get("line").is_none());
    }

    #[tokio::test]
    async fn test_missing_code_runs_empty_program() {
        let mock = MockExecutor::new(ExecutionOutcome::Output {
            text: String::new(),
        });
        let received = mock.received.clone();
        let app = QuirkServer::new(mock).build_router();

        let (status, body) = post_run(app, "{}").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!({ "output": "" }));
        assert_eq!(received.lock().unwrap().as_slice(), [""]);
    }

    #[tokio::test]
    async fn test_malformed_body_is_bad_request() {
        let mock = MockExecutor::new(ExecutionOutcome::Output {
            text: String::new(),
        });
        let received = mock.received.clone();
        let app = QuirkServer::new(mock).build_router();

        let (status, body) = post_run(app, "{not json").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], true);
        assert_eq!(body["kind"], "invalid_request");
        assert!(received.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let mock = MockExecutor::new(ExecutionOutcome::Output {
            text: String::new(),
        });
        let app = QuirkServer::new(mock).build_router();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["status"], "healthy");
        assert!(body.get("admission").is_none());
    }

    #[test]
    fn test_config_from_settings() {
        let settings = ServerSettings {
            bind_addr: "0.0.0.0:8080".to_string(),
            enable_cors: false,
            enable_logging: true,
            max_body_size: 4096,
        };
        let config = ServerConfig::from_settings(&settings).unwrap();
        assert_eq!(config.bind_addr.port(), 8080);
        assert!(!config.enable_cors);
        assert_eq!(config.max_body_size, 4096);
    }

    #[tokio::test]
    async fn test_occupied_bind_addr_is_io_error() {
        let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let config = ServerConfig::new().with_bind_addr(occupied.local_addr().unwrap());
        let server = QuirkServer::with_config(
            MockExecutor::new(ExecutionOutcome::Output {
                text: String::new(),
            }),
            config,
        );

        let result = server.serve_with_shutdown(async {}).await;

        match result {
            Err(err @ ServerError::Io(_)) => {
                assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
                assert_eq!(err.error_type(), "io_error");
            }
            other => panic!("expected io error, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_bind_addr_is_config_error() {
        let result = ServerConfig::new().with_bind_addr_str("localhost");
        assert!(matches!(result, Err(ServerError::Config(_))));
    }
}
