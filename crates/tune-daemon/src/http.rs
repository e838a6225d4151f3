use std::convert::Infallible;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{Path as UrlPath, State},
    http::StatusCode,
    response::{
        sse::{Event as SseEvent, KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
    routing::{get, post},
    Router,
};
use futures_util::stream::{Stream, StreamExt};
use tokio::net::TcpListener;
use tower_http::services::ServeDir;
use tracing::{debug, error, info, warn};
use tune_proto::catalog::Catalog;
use tune_proto::protocol::ChannelListing;

use crate::broker::BrokerHandle;
use crate::error::PlayerError;
use crate::player::Player;

#[derive(Clone)]
pub struct AppState {
    pub player: Arc<Player>,
    pub broker: BrokerHandle,
    pub catalog: Arc<Catalog>,
}

pub fn router(state: AppState, public_dir: &Path) -> Router {
    Router::new()
        .route("/channels.json", get(channels))
        .route("/play/{station}/{id}", post(play))
        .route("/stop", post(stop))
        .route("/events", get(events))
        .fallback_service(ServeDir::new(public_dir))
        .with_state(state)
}

/// Bind `addr` and serve until `shutdown` resolves and open connections finish.
pub async fn serve<F>(addr: &str, app: Router, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind HTTP server to {}", addr))?;
    info!("HTTP server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server error")?;
    info!("HTTP server stopped");
    Ok(())
}

impl IntoResponse for PlayerError {
    fn into_response(self) -> Response {
        let status = match &self {
            PlayerError::NotFound { .. } => {
                debug!("HTTP API: {}", self);
                StatusCode::NOT_FOUND
            }
            PlayerError::Io(_) => {
                error!("HTTP API: {}", self);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, status.canonical_reason().unwrap_or_default()).into_response()
    }
}

async fn channels(State(state): State<AppState>) -> Json<ChannelListing> {
    Json(state.catalog.listing())
}

async fn play(
    State(state): State<AppState>,
    UrlPath((station, id)): UrlPath<(String, u32)>,
) -> Result<StatusCode, PlayerError> {
    info!("HTTP API: Play {}/{}", station, id);
    state.player.play(&station, id).await?;
    Ok(StatusCode::OK)
}

async fn stop(State(state): State<AppState>) -> Result<StatusCode, PlayerError> {
    info!("HTTP API: Stop");
    state.player.stop().await?;
    Ok(StatusCode::OK)
}

async fn events(
    State(state): State<AppState>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, StatusCode> {
    let subscription = state.broker.subscribe().await.map_err(|e| {
        warn!("SSE: subscribe failed: {}", e);
        StatusCode::SERVICE_UNAVAILABLE
    })?;
    debug!("SSE: subscriber {} connected", subscription.id());

    let stream = subscription
        .into_stream()
        .map(|frame| Ok(SseEvent::default().data(frame)));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
