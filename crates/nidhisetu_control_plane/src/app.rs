use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{
        sse::{Event as SseEvent, KeepAlive, Sse},
        IntoResponse,
    },
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use futures::stream::StreamExt;
use nidhisetu_contract::{DraftInput, SyncEventRecord};
use nidhisetu_remote::SubmissionService;
use nidhisetu_storage::{DraftError, DraftPersistence, DraftStore};
use nidhisetu_sync::{
    event_bus, spawn_auto_sync, AutoSyncHandle, NetworkObserver, SharedDrafts, SyncCoordinator,
    SyncSession, TracingObserver,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{error, info};

type ApiError = (StatusCode, Json<Value>);

#[derive(Debug, Deserialize)]
struct EventQuery {
    since: Option<u64>,
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct NetworkUpdate {
    online: bool,
}

struct SessionEntry {
    coordinator: Arc<SyncCoordinator>,
    auto_sync: Option<AutoSyncHandle>,
}

#[derive(Clone)]
pub struct AppState {
    pub persistence: Arc<dyn DraftPersistence>,
    pub service: Arc<dyn SubmissionService>,
    pub network: NetworkObserver,
    pub event_bus: broadcast::Sender<SyncEventRecord>,
    pub auth_token: Option<String>,
    pub require_bearer: bool,
    pub auto_sync: bool,
    sessions: Arc<RwLock<HashMap<String, SessionEntry>>>,
    // One store per beneficiary, shared by all of its sessions.
    drafts: Arc<RwLock<HashMap<String, SharedDrafts>>>,
}

impl AppState {
    pub fn new(
        persistence: Arc<dyn DraftPersistence>,
        service: Arc<dyn SubmissionService>,
        network: NetworkObserver,
        auth_token: Option<String>,
        require_bearer: bool,
        auto_sync: bool,
    ) -> Self {
        Self {
            persistence,
            service,
            network,
            event_bus: event_bus(),
            auth_token,
            require_bearer,
            auto_sync,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            drafts: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn open_session(
        &self,
        beneficiary_id: &str,
    ) -> Result<(Arc<SyncCoordinator>, bool), DraftError> {
        if let Some(coordinator) = self.session(beneficiary_id).await {
            return Ok((coordinator, false));
        }

        let drafts = self.draft_store(beneficiary_id).await?;
        let session = SyncSession::with_drafts(beneficiary_id, drafts, self.event_bus.clone());
        session.events().register(Arc::new(TracingObserver)).await;
        let coordinator = Arc::new(SyncCoordinator::new(
            Arc::new(session),
            self.service.clone(),
            self.network.clone(),
        ));

        let mut sessions = self.sessions.write().await;
        if let Some(entry) = sessions.get(beneficiary_id) {
            return Ok((entry.coordinator.clone(), false));
        }
        let auto_sync = self
            .auto_sync
            .then(|| spawn_auto_sync(coordinator.clone()));
        sessions.insert(
            beneficiary_id.to_string(),
            SessionEntry {
                coordinator: coordinator.clone(),
                auto_sync,
            },
        );
        Ok((coordinator, true))
    }

    // Loaded from persistence once per process; recovery runs only then.
    async fn draft_store(&self, beneficiary_id: &str) -> Result<SharedDrafts, DraftError> {
        if let Some(drafts) = self.drafts.read().await.get(beneficiary_id) {
            return Ok(drafts.clone());
        }

        let store = DraftStore::open(beneficiary_id, self.persistence.clone()).await?;
        let mut drafts = self.drafts.write().await;
        Ok(drafts
            .entry(beneficiary_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(store)))
            .clone())
    }

    /// Returns once any in-flight pass has finished. Drafts are kept.
    pub async fn close_session(&self, beneficiary_id: &str) -> bool {
        let entry = self.sessions.write().await.remove(beneficiary_id);
        match entry {
            Some(entry) => {
                if let Some(handle) = entry.auto_sync {
                    handle.shutdown().await;
                }
                entry.coordinator.session().reset().await;
                true
            }
            None => false,
        }
    }

    pub async fn session(&self, beneficiary_id: &str) -> Option<Arc<SyncCoordinator>> {
        self.sessions
            .read()
            .await
            .get(beneficiary_id)
            .map(|entry| entry.coordinator.clone())
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health/live", get(health_live))
        .route(
            "/v1/sessions/{beneficiary_id}",
            post(open_session).delete(close_session),
        )
        .route("/v1/sessions/{beneficiary_id}/status", get(session_status))
        .route(
            "/v1/sessions/{beneficiary_id}/drafts",
            get(list_drafts).post(enqueue_draft),
        )
        .route("/v1/sessions/{beneficiary_id}/sync", post(trigger_sync))
        .route("/v1/sessions/{beneficiary_id}/events", get(list_events))
        .route("/v1/events/stream", get(stream_events))
        .route("/v1/network", get(network_status).put(update_network))
        .with_state(state)
}

async fn health_live() -> impl IntoResponse {
    Json(json!({
        "status": "live",
        "timestamp": Utc::now().to_rfc3339()
    }))
}

async fn open_session(
    State(state): State<AppState>,
    Path(beneficiary_id): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    authorize(&state, &headers)?;
    if beneficiary_id.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({"error":"beneficiary_id_required"})),
        ));
    }

    let (coordinator, created) = state
        .open_session(&beneficiary_id)
        .await
        .map_err(|e| internal_error(e.into()))?;

    if created {
        info!(beneficiary_id = %beneficiary_id, "session opened");
    }
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(coordinator.status().await)))
}

async fn close_session(
    State(state): State<AppState>,
    Path(beneficiary_id): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    authorize(&state, &headers)?;
    if state.close_session(&beneficiary_id).await {
        info!(beneficiary_id = %beneficiary_id, "session closed");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(session_not_found())
    }
}

async fn session_status(
    State(state): State<AppState>,
    Path(beneficiary_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let coordinator = lookup(&state, &beneficiary_id).await?;
    Ok((StatusCode::OK, Json(coordinator.status().await)))
}

async fn list_drafts(
    State(state): State<AppState>,
    Path(beneficiary_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let coordinator = lookup(&state, &beneficiary_id).await?;
    Ok((StatusCode::OK, Json(json!({ "items": coordinator.list().await }))))
}

async fn enqueue_draft(
    State(state): State<AppState>,
    Path(beneficiary_id): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<DraftInput>,
) -> Result<impl IntoResponse, ApiError> {
    authorize(&state, &headers)?;
    let coordinator = lookup(&state, &beneficiary_id).await?;

    match coordinator.enqueue(payload).await {
        Ok(submission) => Ok((StatusCode::CREATED, Json(submission))),
        Err(DraftError::Validation(err)) => Err((
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "validation_failed", "problems": err.problems })),
        )),
        Err(err) => Err(internal_error(err.into())),
    }
}

async fn trigger_sync(
    State(state): State<AppState>,
    Path(beneficiary_id): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    authorize(&state, &headers)?;
    let coordinator = lookup(&state, &beneficiary_id).await?;

    let outcome = coordinator
        .sync_pending()
        .await
        .map_err(|e| internal_error(e.into()))?;
    Ok((StatusCode::OK, Json(outcome)))
}

async fn list_events(
    State(state): State<AppState>,
    Path(beneficiary_id): Path<String>,
    Query(query): Query<EventQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let coordinator = lookup(&state, &beneficiary_id).await?;
    let items = coordinator
        .session()
        .events()
        .since(query.since.unwrap_or(0), query.limit.unwrap_or(200))
        .await;
    Ok((StatusCode::OK, Json(json!({ "items": items }))))
}

async fn stream_events(
    State(state): State<AppState>,
) -> Sse<impl futures::Stream<Item = Result<SseEvent, std::convert::Infallible>>> {
    let receiver = state.event_bus.subscribe();
    let stream = BroadcastStream::new(receiver).filter_map(|item| async move {
        match item {
            Ok(record) => {
                let data = serde_json::to_string(&record).unwrap_or_else(|_| "{}".to_string());
                Some(Ok(SseEvent::default()
                    .event(record.event.name())
                    .id(record.sequence.to_string())
                    .data(data)))
            }
            Err(_) => None,
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(std::time::Duration::from_secs(15)))
}

async fn network_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "online": state.network.is_online() }))
}

async fn update_network(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<NetworkUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    authorize(&state, &headers)?;
    let changed = state.network.set_online(payload.online);
    Ok((
        StatusCode::OK,
        Json(json!({ "online": payload.online, "changed": changed })),
    ))
}

async fn lookup(state: &AppState, beneficiary_id: &str) -> Result<Arc<SyncCoordinator>, ApiError> {
    state
        .session(beneficiary_id)
        .await
        .ok_or_else(session_not_found)
}

fn session_not_found() -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"error":"session_not_found"})),
    )
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    if !state.require_bearer {
        return Ok(());
    }

    let token = state.auth_token.as_deref().ok_or_else(|| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error":"auth_token_required_but_not_configured"})),
        )
    })?;

    let provided = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    if provided == format!("Bearer {token}") {
        Ok(())
    } else {
        Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({"error":"invalid_or_missing_bearer_token"})),
        ))
    }
}

fn internal_error(error: anyhow::Error) -> ApiError {
    error!(error = %error, "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "internal_error", "detail": error.to_string() })),
    )
}
