//! HTTP trigger surface.
//!
//! `GET /flush` runs one pass and answers with the summary line.
//! `POST /campaigns` starts a background campaign using the configured
//! repeats and delay; `DELETE /campaigns/{id}` cancels it.

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::campaign::{CampaignController, CampaignHandle, CampaignStatus};
use crate::client::CacheClient;
use crate::config::FlushConfig;
use crate::directory::CacheDirectory;
use crate::telemetry::TelemetryRecorder;

/// Body returned for failures whose detail stays in the logs.
const FAILURE_BODY: &str = "cache flush failed; see service logs";

/// Query accepted by `GET /flush` and `POST /campaigns`.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct TriggerQuery {
    /// Overrides the configured environment.
    pub environment: Option<String>,
    /// Overrides the configured regions.
    pub regions: Option<String>,
}

/// Body returned when a campaign starts.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct CampaignStarted {
    /// Identifier to cancel the campaign with.
    pub id: Uuid,
}

/// Shared state of the trigger surface.
pub struct AppState<D, C, T> {
    controller: Arc<CampaignController<D, C, T>>,
    config: Arc<FlushConfig>,
    campaigns: Arc<Mutex<HashMap<Uuid, CampaignHandle>>>,
}

impl<D, C, T> Clone for AppState<D, C, T> {
    fn clone(&self) -> Self {
        Self {
            controller: Arc::clone(&self.controller),
            config: Arc::clone(&self.config),
            campaigns: Arc::clone(&self.campaigns),
        }
    }
}

impl<D, C, T> AppState<D, C, T> {
    /// Creates state around a shared controller.
    #[must_use]
    pub fn new(controller: Arc<CampaignController<D, C, T>>, config: FlushConfig) -> Self {
        Self {
            controller,
            config: Arc::new(config),
            campaigns: Arc::default(),
        }
    }

    fn campaigns(&self) -> MutexGuard<'_, HashMap<Uuid, CampaignHandle>> {
        self.campaigns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Cancels every running campaign.
    pub fn cancel_all(&self) {
        for handle in self.campaigns().values() {
            handle.cancel();
        }
    }
}

/// Builds the router.
pub fn router<D, C, T>(state: AppState<D, C, T>) -> Router
where
    D: CacheDirectory + 'static,
    C: CacheClient + 'static,
    T: TelemetryRecorder + 'static,
{
    Router::new()
        .route("/health", get(health))
        .route("/flush", get(flush::<D, C, T>))
        .route("/campaigns", post(start_campaign::<D, C, T>))
        .route("/campaigns/{id}", delete(cancel_campaign::<D, C, T>))
        .with_state(state)
}

/// Serves the router until `shutdown` resolves, then cancels running
/// campaigns.
///
/// # Errors
///
/// Returns any I/O error raised by the server.
pub async fn serve<D, C, T>(
    listener: TcpListener,
    state: AppState<D, C, T>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> io::Result<()>
where
    D: CacheDirectory + 'static,
    C: CacheClient + 'static,
    T: TelemetryRecorder + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "serving flush triggers");
    }
    let result = axum::serve(listener, router(state.clone()))
        .with_graceful_shutdown(shutdown)
        .await;
    state.cancel_all();
    result
}

async fn health() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

async fn flush<D, C, T>(
    State(state): State<AppState<D, C, T>>,
    Query(query): Query<TriggerQuery>,
) -> (StatusCode, String)
where
    D: CacheDirectory + 'static,
    C: CacheClient + 'static,
    T: TelemetryRecorder + 'static,
{
    let environment = match state.config.environment(query.environment.as_deref()) {
        Ok(environment) => environment,
        Err(err) => return (StatusCode::BAD_REQUEST, err.to_string()),
    };
    let regions = state.config.region_filter(query.regions.as_deref());

    match state.controller.flush_once(&environment, &regions).await {
        Ok(summary) => match &summary.status {
            CampaignStatus::Completed => (StatusCode::OK, summary.message()),
            CampaignStatus::NoInstances => (StatusCode::BAD_REQUEST, summary.message()),
            CampaignStatus::DiscoveryFailed(_) | CampaignStatus::Cancelled => {
                error!(environment = %environment, detail = %summary.message(), "flush request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, FAILURE_BODY.to_owned())
            }
        },
        Err(err) => {
            error!(environment = %environment, error = %err, "flush request failed");
            (StatusCode::INTERNAL_SERVER_ERROR, FAILURE_BODY.to_owned())
        }
    }
}

async fn start_campaign<D, C, T>(
    State(state): State<AppState<D, C, T>>,
    Query(query): Query<TriggerQuery>,
) -> Result<(StatusCode, Json<CampaignStarted>), (StatusCode, String)>
where
    D: CacheDirectory + 'static,
    C: CacheClient + 'static,
    T: TelemetryRecorder + 'static,
{
    let environment = state
        .config
        .environment(query.environment.as_deref())
        .map_err(|err| (StatusCode::BAD_REQUEST, err.to_string()))?;
    let regions = state.config.region_filter(query.regions.as_deref());
    let request = state.config.campaign_request(environment, regions);
    request
        .validate()
        .map_err(|err| (StatusCode::BAD_REQUEST, err.to_string()))?;

    let handle = CampaignHandle::spawn(Arc::clone(&state.controller), request);
    let id = handle.id();
    let mut campaigns = state.campaigns();
    campaigns.retain(|_, running| !running.is_finished());
    campaigns.insert(id, handle);
    info!(%id, "campaign started");
    Ok((StatusCode::ACCEPTED, Json(CampaignStarted { id })))
}

async fn cancel_campaign<D, C, T>(
    State(state): State<AppState<D, C, T>>,
    Path(id): Path<Uuid>,
) -> StatusCode
where
    D: CacheDirectory + 'static,
    C: CacheClient + 'static,
    T: TelemetryRecorder + 'static,
{
    let Some(handle) = state.campaigns().remove(&id) else {
        warn!(%id, "cancel requested for unknown campaign");
        return StatusCode::NOT_FOUND;
    };
    handle.cancel();
    info!(%id, "campaign cancelled");
    StatusCode::ACCEPTED
}
