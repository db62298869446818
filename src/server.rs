//! Web server module for pingmon.
//!
//! JSON endpoints for the historical series, statistics and peer list, a
//! WebSocket live stream, health probes, and optionally a directory of
//! static web assets.

mod live;

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower_http::{
    cors::CorsLayer,
    services::ServeDir,
    trace::{DefaultMakeSpan, TraceLayer},
};

use crate::broadcast::{LiveBroadcaster, ShutdownBroadcaster, ShutdownToken};
use crate::monitor::{Peer, PeerId, duration_ms};
use crate::series::{MAX_SERIES_POINTS, TimeSeriesService};
use crate::storage::{SampleStore, StorageError, TimeRange};

pub use live::parse_peer_selection;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub series: Arc<TimeSeriesService>,
    pub store: Arc<dyn SampleStore>,
    pub peers: Arc<Vec<Peer>>,
    pub live: LiveBroadcaster,
    pub shutdown: Arc<ShutdownBroadcaster>,
    /// Directory served for every path no route matches.
    pub static_dir: Option<PathBuf>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("peers", &self.peers.len())
            .field("static_dir", &self.static_dir)
            .finish_non_exhaustive()
    }
}

/// API errors.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid query parameter '{0}'")]
    BadParameter(&'static str),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadParameter(_) => (StatusCode::BAD_REQUEST, self.to_string()).into_response(),
            ApiError::Storage(ref e) => {
                tracing::error!(error = %e, "Query failed");
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()).into_response()
            }
        }
    }
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    db: Option<String>,
}

/// Query parameters for the series and stats endpoints.
///
/// Values are kept as text: an empty value counts as absent, anything else
/// must parse or the request is rejected.
#[derive(Debug, Default, Deserialize)]
pub struct SeriesQueryParams {
    pub peer: Option<String>,
    pub start: Option<String>,
    pub stop: Option<String>,
    pub max: Option<String>,
}

impl SeriesQueryParams {
    fn peer_id(&self) -> Result<PeerId, ApiError> {
        parse_param("peer", self.peer.as_deref())?.ok_or(ApiError::BadParameter("peer"))
    }

    /// A range only when both bounds are present.
    fn range(&self) -> Result<Option<TimeRange>, ApiError> {
        let start = parse_param::<i64>("start", self.start.as_deref())?;
        let stop = parse_param::<i64>("stop", self.stop.as_deref())?;
        Ok(start.zip(stop).map(|(start, stop)| TimeRange::new(start, stop)))
    }

    /// Negative values count as absent; anything above
    /// [`MAX_SERIES_POINTS`] is rejected.
    fn max(&self) -> Result<Option<usize>, ApiError> {
        let max = parse_param::<i64>("max", self.max.as_deref())?;
        match max.and_then(|m| usize::try_from(m).ok()) {
            Some(m) if m > MAX_SERIES_POINTS => Err(ApiError::BadParameter("max")),
            max => Ok(max),
        }
    }
}

fn parse_param<T: FromStr>(name: &'static str, value: Option<&str>) -> Result<Option<T>, ApiError> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(text) => text
            .parse()
            .map(Some)
            .map_err(|_| ApiError::BadParameter(name)),
    }
}

/// Configured peer as exposed by `/peers`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PeerView {
    #[serde(rename = "ID")]
    pub id: PeerId,
    pub name: String,
    pub address: String,
    /// Milliseconds.
    pub interval: i64,
    /// Milliseconds.
    pub timeout: i64,
}

impl From<&Peer> for PeerView {
    fn from(peer: &Peer) -> Self {
        Self {
            id: peer.id,
            name: peer.name.clone(),
            address: peer.address.to_string(),
            interval: duration_ms(peer.interval),
            timeout: duration_ms(peer.timeout),
        }
    }
}

/// Create the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    let static_dir = state.static_dir.clone();
    let app_state = Arc::new(state);

    let router = Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .route("/data", get(data_handler))
        .route("/stats", get(stats_handler))
        .route("/peers", get(peers_handler))
        .route("/livedata", get(livedata_handler));

    let router = match static_dir {
        Some(dir) => router.fallback_service(ServeDir::new(dir)),
        None => router,
    };

    router
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(true)),
        )
        .layer(CorsLayer::permissive())
        .with_state(app_state)
}

/// Serve `router` on `listener` until shutdown is signaled, then finish
/// in-flight requests and acknowledge.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    mut token: ShutdownToken,
) -> std::io::Result<()> {
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let watcher = tokio::spawn(async move {
        token.notified().await;
        let _ = stop_tx.send(());
        token
    });

    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "Web server listening");
    }

    let result = axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = stop_rx.await;
        })
        .await;

    match result {
        Ok(()) => {
            match tokio::time::timeout(Duration::from_secs(1), watcher).await {
                Ok(Ok(token)) => token.acknowledge(),
                Ok(Err(e)) => tracing::warn!(error = %e, "Shutdown watcher failed"),
                Err(_) => tracing::warn!("Shutdown watcher did not finish"),
            }
            tracing::info!("Web server stopped");
            Ok(())
        }
        Err(e) => {
            // Dropping the token counts as acknowledgement.
            watcher.abort();
            Err(e)
        }
    }
}

/// Liveness probe.
async fn healthz_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        db: None,
    })
}

/// Readiness probe that checks database availability.
async fn readyz_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.store.health_check().await {
        Ok(()) => Json(HealthResponse {
            status: "ok".to_string(),
            db: Some("ready".to_string()),
        })
        .into_response(),
        Err(err) => {
            tracing::error!(error = %err, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "not_ready".to_string(),
                    db: Some(err.to_string()),
                }),
            )
                .into_response()
        }
    }
}

/// Gap-filled series for one peer.
async fn data_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SeriesQueryParams>,
) -> Result<Response, ApiError> {
    let peer_id = params.peer_id()?;
    let range = params.range()?;
    let max = params.max()?;

    let samples = state.series.series(peer_id, range, max).await?;
    Ok(Json(samples).into_response())
}

/// Average latency and uptime for one peer.
async fn stats_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SeriesQueryParams>,
) -> Result<Response, ApiError> {
    let peer_id = params.peer_id()?;
    let range = params.range()?;

    let stats = state.series.stats(peer_id, range).await?;
    Ok(Json(stats).into_response())
}

/// Configured peers.
async fn peers_handler(State(state): State<Arc<AppState>>) -> Json<Vec<PeerView>> {
    Json(state.peers.iter().map(PeerView::from).collect())
}

/// Live sample stream.
async fn livedata_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    let token = match state.shutdown.subscribe() {
        Ok(token) => token,
        Err(e) => {
            tracing::debug!(error = %e, "Rejecting live session during shutdown");
            return StatusCode::SERVICE_UNAVAILABLE.into_response();
        }
    };
    let subscription = state.live.subscribe();
    ws.on_upgrade(move |socket| live::session(socket, subscription, token))
}
