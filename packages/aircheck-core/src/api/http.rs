//! HTTP route handlers.
//!
//! All handlers are thin - they delegate to services for business logic.

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::response::{api_accepted, api_success};
use crate::api::ws::ws_handler;
use crate::api::AppState;
use crate::engine::{EngineControl, TtsEnqueue};
use crate::error::{AircheckError, AircheckResult};
use crate::events::{DjEvent, EventEmitter, HistoryEvent};
use crate::ingest::TrackEventIn;
use crate::store::{EventKind, NewPlayEvent, NewTtsArtifact, StoreError, TtsMode};
use crate::utils::{clamp_epoch_ms, normalize_tag, now_millis};
use crate::DEFAULT_COVER;

/// Hard cap for history page sizes.
const MAX_HISTORY_LIMIT: usize = 500;
const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Builds the application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/now", get(get_now))
        .route("/api/next", get(get_next))
        .route("/api/history", get(get_history))
        .route("/api/cover", get(get_cover))
        .route("/api/event", post(post_event))
        .route("/api/enqueue", post(post_enqueue))
        .route("/api/tts_queue", post(post_tts_queue))
        .route("/api/skip", post(post_skip))
        .route("/api/health", get(get_health))
        .route("/api/debug/jobs", get(get_debug_jobs))
        .route("/api/debug/providers", get(get_debug_providers))
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ─────────────────────────────────────────────────────────────────────────────
// Presentation reads
// ─────────────────────────────────────────────────────────────────────────────

async fn get_now(State(state): State<AppState>) -> Response {
    api_success(json!({
        "now": state.cache.now_snapshot(),
        "stale": state.cache.is_stale(),
    }))
}

#[derive(Deserialize)]
struct NextQuery {
    #[serde(default)]
    limit: Option<usize>,
}

async fn get_next(State(state): State<AppState>, Query(query): Query<NextQuery>) -> Response {
    let cap = state.snapshot_config.upcoming_limit;
    let limit = query.limit.unwrap_or(cap).min(cap);
    api_success(json!({
        "entries": state.cache.next_snapshot(limit),
        "stale": state.cache.is_stale(),
    }))
}

#[derive(Deserialize)]
struct HistoryQuery {
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    before: Option<i64>,
}

async fn get_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> AircheckResult<Response> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);
    let events = state.store.history(limit, query.before).await?;
    Ok(api_success(json!({ "events": events })))
}

#[derive(Deserialize)]
struct CoverQuery {
    #[serde(default)]
    file: Option<String>,
    #[serde(default)]
    artist: Option<String>,
    #[serde(default)]
    album: Option<String>,
}

async fn get_cover(State(state): State<AppState>, Query(query): Query<CoverQuery>) -> Response {
    let image = if let Some(file) = query.file.as_deref() {
        state.artwork.cover_for_file(file).await
    } else if let (Some(artist), Some(album)) = (query.artist.as_deref(), query.album.as_deref()) {
        state.artwork.cover_for_album(artist, album).await
    } else {
        None
    };

    match image {
        Some(image) => (
            [(header::CONTENT_TYPE, image.content_type)],
            image.bytes,
        )
            .into_response(),
        // Bundled default instead of a 404; clients always get pixels.
        None => (
            [(header::CONTENT_TYPE, "image/png")],
            DEFAULT_COVER,
        )
            .into_response(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Event ingest
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct EventBody {
    #[serde(default)]
    kind: Option<String>,
    title: String,
    #[serde(default)]
    artist: Option<String>,
    #[serde(default)]
    album: Option<String>,
    #[serde(default)]
    uri: Option<String>,
    #[serde(default)]
    epoch_ms: Option<u64>,
    /// Anything else (annotate metadata round-trips here).
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

async fn post_event(
    State(state): State<AppState>,
    Json(body): Json<EventBody>,
) -> AircheckResult<Response> {
    let kind = match body.kind.as_deref() {
        None | Some("song") => EventKind::Song,
        Some("dj") => EventKind::Dj,
        Some(other) => {
            return Err(AircheckError::InvalidRequest(format!(
                "unknown kind \"{}\"",
                other
            )))
        }
    };
    if body.title.trim().is_empty() {
        return Err(AircheckError::InvalidRequest("title must not be empty".into()));
    }

    let outcome = state
        .ingestor
        .ingest(TrackEventIn {
            kind,
            title: body.title,
            artist: body.artist.unwrap_or_default(),
            album: body.album.unwrap_or_default(),
            source_uri: body.uri,
            epoch_ms: body.epoch_ms,
            extra: body.extra,
        })
        .await?;

    Ok(api_success(json!({
        "ok": true,
        "id": outcome.event_id,
        "deduped": outcome.deduped,
    })))
}

// ─────────────────────────────────────────────────────────────────────────────
// Playback control
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct EnqueueBody {
    file: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    artist: Option<String>,
    #[serde(default)]
    comment: Option<String>,
}

async fn post_enqueue(
    State(state): State<AppState>,
    Json(body): Json<EnqueueBody>,
) -> AircheckResult<Response> {
    if body.file.trim().is_empty() {
        return Err(AircheckError::InvalidRequest("file must not be empty".into()));
    }
    if let Some(comment) = &body.comment {
        log::info!("[API] Manual enqueue ({}): {}", body.file, comment);
    }

    state
        .engine
        .enqueue_tts(&TtsEnqueue {
            audio_path: body.file.into(),
            title: body.title.unwrap_or_default(),
            artist: body.artist.unwrap_or_default(),
            tts_id: None,
        })
        .await?;
    Ok(crate::api::response::api_ok())
}

#[derive(Deserialize)]
struct TtsQueueBody {
    text: String,
    audio_url: String,
    #[serde(default)]
    track_title: Option<String>,
    #[serde(default)]
    track_artist: Option<String>,
}

/// Registers an externally produced TTS segment: one transaction creates the
/// `ready` artifact and its linked `dj` play event, then both are broadcast.
async fn post_tts_queue(
    State(state): State<AppState>,
    Json(body): Json<TtsQueueBody>,
) -> AircheckResult<Response> {
    if body.text.trim().is_empty() || body.audio_url.trim().is_empty() {
        return Err(AircheckError::InvalidRequest(
            "text and audio_url must not be empty".into(),
        ));
    }

    let title = normalize_tag(body.track_title.as_deref().unwrap_or_default());
    let artist = normalize_tag(body.track_artist.as_deref().unwrap_or_default());
    let epoch_ms = clamp_epoch_ms(None);

    let artifact = NewTtsArtifact {
        epoch_ms,
        text: body.text.clone(),
        audio_path: body.audio_url.clone(),
        transcript_path: None,
        track_title: title.clone(),
        track_artist: artist.clone(),
        mode: TtsMode::Custom,
    };
    let event = NewPlayEvent {
        kind: EventKind::Dj,
        epoch_ms,
        title: if title.is_empty() {
            "DJ segment".to_string()
        } else {
            title.clone()
        },
        artist: artist.clone(),
        album: String::new(),
        source_uri: Some(body.audio_url.clone()),
        artwork_ref: None,
        extra: serde_json::Map::new(),
    };

    let (event_id, tts_id) = match state.store.commit_external_tts(artifact, event).await {
        Ok(ids) => ids,
        Err(StoreError::DuplicateEvent { existing_id }) => {
            return Ok(api_success(json!({
                "ok": true,
                "id": existing_id,
                "deduped": true,
            })))
        }
        Err(e) => return Err(e.into()),
    };

    state.event_bridge.emit_history(HistoryEvent::Appended {
        id: event_id,
        kind: EventKind::Dj.to_string(),
        title,
        artist: artist.clone(),
        epoch_ms,
        timestamp: now_millis(),
    });
    state.event_bridge.emit_dj(DjEvent::StateChanged {
        job_id: format!("external-{}", tts_id),
        state: "enqueued".to_string(),
        track_title: body.track_title.unwrap_or_default(),
        track_artist: artist,
        timestamp: now_millis(),
    });

    Ok(api_success(json!({
        "ok": true,
        "id": event_id,
        "ttsId": tts_id,
        "deduped": false,
    })))
}

/// Engine skip: acknowledged immediately, executed in the background.
async fn post_skip(State(state): State<AppState>) -> Response {
    let engine = state.engine.clone();
    tokio::spawn(async move {
        if let Err(e) = engine.skip().await {
            log::warn!("[API] Skip failed: {}", e);
        }
    });
    api_accepted()
}

// ─────────────────────────────────────────────────────────────────────────────
// Health and debug
// ─────────────────────────────────────────────────────────────────────────────

async fn get_health(State(state): State<AppState>) -> Response {
    let engine = state.engine.health();
    let store_ok = state.store.ping().await.is_ok();
    let status = if store_ok && engine.connected {
        "ok"
    } else {
        "degraded"
    };

    let body = json!({
        "status": status,
        "engine": {
            "connected": engine.connected,
            "lastOkMs": engine.last_ok_ms,
            "snapshotStale": state.cache.is_stale(),
        },
        "store": { "reachable": store_ok },
        "connections": state.ws_manager.connection_count(),
        "uptimeSecs": state.started_at.elapsed().as_secs(),
        "version": env!("CARGO_PKG_VERSION"),
    });
    let code = if store_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(body)).into_response()
}

/// All DJ jobs including terminal ones; failed jobs are visible only here.
async fn get_debug_jobs(State(state): State<AppState>) -> Response {
    api_success(json!({ "jobs": state.pipeline.jobs_snapshot() }))
}

async fn get_debug_providers(State(state): State<AppState>) -> Response {
    api_success(json!({ "tiers": state.registry.stats() }))
}
