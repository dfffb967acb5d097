//! `GatewayServer`: Axum HTTP + WebSocket front end.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::GatewayConfig;
use crate::eviction::start_sweep_task;
use crate::gateway::{ConnectionGateway, GatewayDeps};
use crate::health;
use crate::metrics;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::session::{reject, run_ws_session};

/// Header accepted when the `session_token` query parameter is absent.
pub const SESSION_TOKEN_HEADER: &str = "x-session-token";

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// The connection gateway.
    pub gateway: Arc<ConnectionGateway>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Prometheus handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
    /// When the server started.
    pub start_time: Instant,
}

/// One gateway instance's HTTP server and background tasks.
pub struct GatewayServer {
    gateway: Arc<ConnectionGateway>,
    shutdown: Arc<ShutdownCoordinator>,
    metrics: Option<PrometheusHandle>,
    start_time: Instant,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl GatewayServer {
    /// Create a server. Pass the handle from
    /// [`install_recorder`](crate::metrics::install_recorder) to serve
    /// `/metrics`.
    pub fn new(config: GatewayConfig, deps: GatewayDeps, metrics: Option<PrometheusHandle>) -> Self {
        let shutdown = Arc::new(ShutdownCoordinator::new());
        let gateway = ConnectionGateway::new(config, deps, &shutdown.token());
        Self {
            gateway,
            shutdown,
            metrics,
            start_time: Instant::now(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            gateway: Arc::clone(&self.gateway),
            shutdown: Arc::clone(&self.shutdown),
            metrics: self.metrics.clone(),
            start_time: self.start_time,
        };

        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/stats", get(stats_handler))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Bind the configured address, then serve and sweep in the background.
    ///
    /// Binding is the only fatal step; everything after it degrades.
    pub async fn listen(&self) -> std::io::Result<SocketAddr> {
        let config = self.gateway.config();
        let listener = tokio::net::TcpListener::bind(config.bind_address()).await?;
        let addr = listener.local_addr()?;
        info!(%addr, instance_id = %config.instance_id, "conduit gateway listening");

        let router = self.router();
        let token = self.shutdown.token();
        let serve = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                error!(error = %e, "server error");
            }
        });
        let sweep = start_sweep_task(
            Arc::clone(&self.gateway),
            config.sweep_interval,
            self.shutdown.token(),
        );

        self.tasks.lock().extend([serve, sweep]);
        Ok(addr)
    }

    /// Close every connection with `1001 shutting_down`, then stop the
    /// listener, the sweep, and the drain workers.
    ///
    /// Returns `false` if tasks had to be aborted at the deadline.
    pub async fn shutdown(&self) -> bool {
        let closed = self.gateway.shutdown_all().await;
        info!(closed, "connections closed for shutdown");

        let mut handles: Vec<_> = self.tasks.lock().drain(..).collect();
        handles.extend(self.gateway.backpressure().take_workers());
        self.shutdown
            .graceful_shutdown(handles, Some(self.gateway.config().shutdown_timeout))
            .await
    }

    /// The connection gateway.
    pub fn gateway(&self) -> &Arc<ConnectionGateway> {
        &self.gateway
    }

    /// Shutdown coordinator.
    pub fn coordinator(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Instance configuration.
    pub fn config(&self) -> &GatewayConfig {
        self.gateway.config()
    }
}

#[derive(Debug, Default, Deserialize)]
struct WsParams {
    session_token: Option<String>,
}

fn session_token(params: WsParams, headers: &HeaderMap) -> String {
    params
        .session_token
        .or_else(|| {
            headers
                .get(SESSION_TOKEN_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned)
        })
        .unwrap_or_default()
}

/// GET /ws
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
    headers: HeaderMap,
) -> Response {
    if state.shutdown.is_shutting_down() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let origin = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok());
    let admitted = state.gateway.check_origin(origin);
    let token = session_token(params, &headers);
    let gateway = state.gateway;
    ws.max_message_size(gateway.config().max_message_size)
        .on_upgrade(move |socket| async move {
            if let Err(reason) = admitted {
                return reject(socket, reason).await;
            }
            match gateway.accept(&token).await {
                Ok(accepted) => run_ws_session(socket, gateway, accepted).await,
                Err(reason) => reject(socket, reason).await,
            }
        })
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Response {
    let gateway = &state.gateway;
    let resp = health::health_check(
        state.start_time,
        gateway.instance_id().to_string(),
        gateway.dependency_health().await,
        gateway.connection_count(),
    );
    let status = if resp.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(resp)).into_response()
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => metrics::render(handle).into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

/// GET /stats
async fn stats_handler(State(state): State<AppState>) -> Response {
    Json(state.gateway.stats().await).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use conduit_auth::StaticSessionValidator;
    use conduit_bus::{BusError, FanOutBus, MemoryBus, Subscription};
    use conduit_core::Identity;
    use conduit_registry::testing::SwitchableStore;
    use conduit_registry::{ConnectionRegistry, MemoryStore};
    use tower::ServiceExt;

    fn deps_with_bus(bus: Arc<dyn FanOutBus>) -> GatewayDeps {
        GatewayDeps {
            validator: Arc::new(
                StaticSessionValidator::default().with_token("tok", Identity::user("alice")),
            ),
            bus,
            registry: ConnectionRegistry::new(
                Arc::new(MemoryStore::new()),
                "srv:",
                std::time::Duration::from_secs(300),
            ),
        }
    }

    fn make_server() -> GatewayServer {
        GatewayServer::new(
            GatewayConfig::default(),
            deps_with_bus(Arc::new(MemoryBus::new())),
            None,
        )
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), 100_000).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null))
    }

    struct DownBus;

    #[async_trait]
    impl FanOutBus for DownBus {
        async fn publish(&self, _: &str, _: &str) -> Result<usize, BusError> {
            Err(BusError::Unavailable("down".into()))
        }
        async fn subscribe(&self, _: &str) -> Result<Subscription, BusError> {
            Err(BusError::Unavailable("down".into()))
        }
        async fn subscriber_count(&self, _: &str) -> Result<usize, BusError> {
            Err(BusError::Unavailable("down".into()))
        }
        async fn health_check(&self) -> bool {
            false
        }
    }

    #[test]
    fn token_from_query_then_header() {
        let mut headers = HeaderMap::new();
        let _ = headers.insert(SESSION_TOKEN_HEADER, "from-header".parse().unwrap());

        let query = WsParams {
            session_token: Some("from-query".into()),
        };
        assert_eq!(session_token(query, &headers), "from-query");
        assert_eq!(session_token(WsParams::default(), &headers), "from-header");
        assert_eq!(session_token(WsParams::default(), &HeaderMap::new()), "");
    }

    #[tokio::test]
    async fn health_ready_with_in_memory_deps() {
        let server = make_server();
        let (status, body) = get(server.router(), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ready");
        assert_eq!(body["dependencies"]["bus"], true);
        assert_eq!(body["instance_id"], server.config().instance_id.as_str());
        assert_eq!(body["connections"], 0);
    }

    #[tokio::test]
    async fn health_not_ready_when_bus_down() {
        let server = GatewayServer::new(GatewayConfig::default(), deps_with_bus(Arc::new(DownBus)), None);
        let (status, body) = get(server.router(), "/health").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "not_ready");
        assert_eq!(body["dependencies"]["bus"], false);
    }

    #[tokio::test]
    async fn stats_reports_counts() {
        let server = make_server();
        let _conn = server.gateway().accept("tok").await.unwrap();
        let (status, body) = get(server.router(), "/stats").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["global"], 1);
        assert_eq!(body["local"], 1);
        assert_eq!(body["by_channel"]["guide"], 1);
    }

    #[tokio::test]
    async fn registry_outage_keeps_health_ready_and_stats_local() {
        let store = Arc::new(SwitchableStore::new());
        let server = GatewayServer::new(
            GatewayConfig::default(),
            GatewayDeps {
                registry: ConnectionRegistry::new(
                    store.clone(),
                    "srv:",
                    std::time::Duration::from_secs(300),
                ),
                ..deps_with_bus(Arc::new(MemoryBus::new()))
            },
            None,
        );
        store.set_down(true);
        let _conn = server.gateway().accept("tok").await.unwrap();

        let (status, body) = get(server.router(), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ready");
        assert_eq!(body["dependencies"]["registry"], false);

        let (status, body) = get(server.router(), "/stats").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["global"].is_null());
        assert_eq!(body["local"], 1);
    }

    #[tokio::test]
    async fn metrics_without_recorder_is_404() {
        let server = make_server();
        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn ws_requires_upgrade() {
        let server = make_server();
        let req = Request::builder().uri("/ws").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert!(resp.status().is_client_error());
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let server = make_server();
        let (status, _) = get(server.router(), "/nonexistent").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn listen_then_shutdown() {
        let server = make_server();
        let addr = server.listen().await.unwrap();
        assert_ne!(addr.port(), 0);
        let _conn = server.gateway().accept("tok").await.unwrap();

        assert!(server.shutdown().await);
        assert!(server.coordinator().is_shutting_down());
        assert_eq!(server.gateway().connection_count(), 0);
    }
}
