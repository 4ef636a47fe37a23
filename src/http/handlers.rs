//! Route handlers for the HTTP API layer (§6).

use axum::body::Bytes;
use axum::extract::{Multipart, Path as AxumPath, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::convert::Infallible;

use crate::core::cache::url_hash;
use crate::core::config::Config;
use crate::core::pipeline::{CandidateCover, QueryImage, SessionResult};
use crate::core::progress::{HttpProgressTransport, NullTransport, ProgressReporter, ProgressTransport};
use crate::core::session::{PersistedMatch, QueryOutcome, SessionResultDocument, SessionSummary as PersistedSummary};
use crate::events::EventChannel;
use crate::http::sse;
use crate::http::state::{AppState, SessionStatus};

const CRATE_VERSION: &str = env!("CARGO_PKG_VERSION");

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn bad_request(message: impl Into<String>) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message.into() }))).into_response()
}

fn internal_error(message: impl Into<String>) -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": message.into() }))).into_response()
}

struct ParsedUpload {
    images: Vec<QueryImage>,
    candidate_covers: Vec<CandidateCover>,
    session_id: Option<String>,
}

/// Pull `image`/`images`, `candidate_covers`, and an optional `session_id`
/// field out of a multipart body.
async fn parse_upload(mut multipart: Multipart, allow_multiple: bool) -> Result<ParsedUpload, Response> {
    let mut images = Vec::new();
    let mut candidate_covers_raw: Option<String> = None;
    let mut session_id = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| bad_request(e.to_string()))? {
        let name = field.name().unwrap_or("").to_string();
        if name == "image" || (allow_multiple && (name == "images" || name.starts_with("images["))) {
            let ext = field
                .file_name()
                .and_then(|n| n.rsplit('.').next())
                .unwrap_or("jpg")
                .to_string();
            let bytes: Bytes = field.bytes().await.map_err(|e| bad_request(e.to_string()))?;
            images.push(QueryImage { bytes: bytes.to_vec(), ext });
        } else if name == "candidate_covers" {
            candidate_covers_raw = Some(field.text().await.map_err(|e| bad_request(e.to_string()))?);
        } else if name == "session_id" {
            session_id = Some(field.text().await.map_err(|e| bad_request(e.to_string()))?);
        }
    }

    if images.is_empty() {
        return Err(bad_request("no image field supplied"));
    }
    let raw = candidate_covers_raw.ok_or_else(|| bad_request("candidate_covers field is required"))?;
    let candidate_covers: Vec<CandidateCover> =
        serde_json::from_str(&raw).map_err(|e| bad_request(format!("invalid candidate_covers JSON: {e}")))?;

    Ok(ParsedUpload { images, candidate_covers, session_id })
}

/// Render a `ResultStatus` the way it serializes over the wire
/// (`snake_case`), for the persisted document's plain-string field.
fn status_label(status: crate::core::pipeline::ResultStatus) -> String {
    serde_json::to_value(status)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| "unknown".to_string())
}

fn safe_name_segment(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Persist every successful match's candidate image (best-effort,
/// preferring the byte cache over a re-download), then write the session
/// result document (§4.7). `local_query_urls` must align 1:1 with
/// `result.queries`, already persisted by the caller before the pipeline
/// consumed the original bytes.
fn persist_session(state: &AppState, session_id: &str, local_query_urls: &[String], result: &SessionResult) {
    let store = &state.services.session_store;
    let cache = &state.services.cache;

    let mut queries = Vec::with_capacity(result.queries.len());
    for (index, query) in result.queries.iter().enumerate() {
        let local_query_url = local_query_urls.get(index).cloned().unwrap_or_default();

        let mut matches = Vec::with_capacity(query.matches.len());
        for m in &query.matches {
            let local_url = m.cover_metadata.as_ref().and_then(|meta| {
                let bytes = cache.get_image(&m.url).ok().flatten()?;
                let hash = url_hash(&m.url);
                let safe_name = safe_name_segment(&meta.name);
                store
                    .persist_candidate_image(session_id, &bytes, &safe_name, &meta.issue_number, &hash, "jpg")
                    .ok()
            });
            matches.push(PersistedMatch {
                url: m.url.clone(),
                local_url,
                similarity: m.similarity,
                status: status_label(m.status),
            });
        }
        queries.push(QueryOutcome { local_query_url, matches });
    }

    let document = SessionResultDocument {
        session_id: session_id.to_string(),
        timestamp_millis: now_millis(),
        similarity_threshold: state.services.config.similarity_threshold,
        queries,
        summary: PersistedSummary {
            total_images_processed: result.summary.total_images_processed,
            successful_images: result.summary.successful_images,
            failed_images: result.summary.failed_images,
            total_matches_all_images: result.summary.total_matches_all_images,
        },
    };
    if let Err(e) = store.write_result(&document) {
        tracing::warn!(%session_id, error = %e, "failed to persist session result document");
    }
}

/// Persist each uploaded query image's bytes up front, before the
/// pipeline consumes them, returning their session-relative file names in
/// the same order as `images`.
fn persist_query_images(state: &AppState, session_id: &str, images: &[QueryImage]) -> Vec<String> {
    let store = &state.services.session_store;
    images
        .iter()
        .map(|image| store.persist_query_image(session_id, &image.bytes, &image.ext).unwrap_or_default())
        .collect()
}

/// Builds a session's reporter. `HttpProgressTransport::new` does a
/// blocking startup health probe, so it's constructed off the async
/// runtime via `spawn_blocking` rather than inline in a handler.
async fn reporter_for(state: &AppState, session_id: &str, external_progress: bool) -> (ProgressReporter, crate::events::EventReceiver) {
    let (sender, receiver) = EventChannel::bounded(EventChannel::DEFAULT_CAPACITY);
    let base_url = if external_progress { state.progress_base_url.clone() } else { None };
    let transport: Box<dyn ProgressTransport> = match base_url {
        Some(base) => tokio::task::spawn_blocking(move || {
            Box::new(HttpProgressTransport::new(base)) as Box<dyn ProgressTransport>
        })
        .await
        .unwrap_or_else(|_| Box::new(NullTransport)),
        None => Box::new(NullTransport),
    };
    (ProgressReporter::new(session_id, transport, sender), receiver)
}

/// `POST /image-matcher` (§6).
pub async fn match_single(State(state): State<AppState>, multipart: Multipart) -> Response {
    let upload = match parse_upload(multipart, false).await {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    let session_id = upload.session_id.clone().unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let local_query_urls = persist_query_images(&state, &session_id, &upload.images);
    let (reporter, _receiver) = reporter_for(&state, &session_id, upload.session_id.is_some()).await;

    let services = state.services.clone();
    let sid = session_id.clone();
    let join = tokio::task::spawn_blocking(move || {
        crate::core::pipeline::match_batch(&sid, upload.images, upload.candidate_covers, &services, &reporter)
    });

    match join.await {
        Ok(Ok(result)) => {
            persist_session(&state, &session_id, &local_query_urls, &result);
            let query = result.queries.first().cloned().unwrap_or_default();
            Json(json!({
                "top_matches": query.matches,
                "total_matches": query.total_matches,
                "total_covers_processed": result.summary.total_covers_processed,
                "total_urls_processed": result.summary.total_urls_processed,
                "session_id": session_id,
            }))
            .into_response()
        }
        Ok(Err(e)) => bad_request(e.to_string()),
        Err(e) => internal_error(e.to_string()),
    }
}

/// `POST /image-matcher-multiple` (§6).
pub async fn match_multiple(State(state): State<AppState>, multipart: Multipart) -> Response {
    let upload = match parse_upload(multipart, true).await {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    let session_id = match upload.session_id.clone() {
        Some(s) => s,
        None => return bad_request("session_id is required"),
    };
    let local_query_urls = persist_query_images(&state, &session_id, &upload.images);
    let (reporter, _receiver) = reporter_for(&state, &session_id, true).await;

    let services = state.services.clone();
    let sid = session_id.clone();
    let join = tokio::task::spawn_blocking(move || {
        crate::core::pipeline::match_batch(&sid, upload.images, upload.candidate_covers, &services, &reporter)
    });

    match join.await {
        Ok(Ok(result)) => {
            persist_session(&state, &session_id, &local_query_urls, &result);
            Json(json!({
                "results": result.queries,
                "summary": result.summary,
                "session_id": session_id,
            }))
            .into_response()
        }
        Ok(Err(e)) => bad_request(e.to_string()),
        Err(e) => internal_error(e.to_string()),
    }
}

/// `POST /image-matcher/start` (§6). Allocates a session id, registers its
/// subscriber stream, and spawns the match in the background.
pub async fn match_start(State(state): State<AppState>, multipart: Multipart) -> Response {
    let upload = match parse_upload(multipart, false).await {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    let session_id = uuid::Uuid::new_v4().to_string();
    let local_query_urls = persist_query_images(&state, &session_id, &upload.images);
    let (reporter, receiver) = reporter_for(&state, &session_id, true).await;
    state.register_session(session_id.clone(), receiver);

    let services = state.services.clone();
    let sid = session_id.clone();
    let bg_state = state.clone();
    tokio::task::spawn_blocking(move || {
        let result = crate::core::pipeline::match_batch(&sid, upload.images, upload.candidate_covers, &services, &reporter);
        match result {
            Ok(result) => {
                persist_session(&bg_state, &sid, &local_query_urls, &result);
                bg_state.mark_status(&sid, SessionStatus::Complete);
            }
            Err(e) => {
                if let Err(write_err) = bg_state.services.session_store.write_error_document(&sid, &e.to_string()) {
                    tracing::warn!(session_id = %sid, error = %write_err, "failed to persist error document");
                }
                bg_state.mark_status(&sid, SessionStatus::Error);
            }
        }
    });

    Json(json!({ "sessionId": session_id })).into_response()
}

#[derive(Debug, Deserialize)]
pub struct SessionIdQuery {
    #[serde(rename = "sessionId")]
    session_id: String,
}

/// `GET /image-matcher/progress?sessionId=…` (§6): Server-Sent Events.
pub async fn progress_stream(
    State(state): State<AppState>,
    Query(q): Query<SessionIdQuery>,
) -> Result<Sse<impl tokio_stream::Stream<Item = Result<SseEvent, Infallible>>>, Response> {
    let receiver = state
        .take_receiver(&q.session_id)
        .ok_or_else(|| bad_request("unknown or already-subscribed session_id"))?;
    let stream = sse::bridge(receiver);
    let stream = tokio_stream::StreamExt::map(stream, |payload| Ok(SseEvent::default().data(payload)));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// `GET /image-matcher/status?sessionId=…` (§6).
pub async fn session_status(State(state): State<AppState>, Query(q): Query<SessionIdQuery>) -> Response {
    match state.status_of(&q.session_id) {
        Some(SessionStatus::Running) => Json(json!({ "sessionId": q.session_id, "status": "running" })).into_response(),
        Some(SessionStatus::Complete) => Json(json!({ "sessionId": q.session_id, "status": "complete" })).into_response(),
        Some(SessionStatus::Error) => Json(json!({ "sessionId": q.session_id, "status": "error" })).into_response(),
        None => (StatusCode::NOT_FOUND, Json(json!({ "error": "unknown session_id" }))).into_response(),
    }
}

/// `GET /image-matcher/<sessionId>/data` (§6).
pub async fn session_data(State(state): State<AppState>, AxumPath(session_id): AxumPath<String>) -> Response {
    match state.services.session_store.read_result(&session_id) {
        Ok(json_text) => match serde_json::from_str::<Value>(&json_text) {
            Ok(value) => Json(value).into_response(),
            Err(_) => (StatusCode::OK, json_text).into_response(),
        },
        Err(_) => (StatusCode::NOT_FOUND, Json(json!({ "error": "session not found" }))).into_response(),
    }
}

/// `GET /stored_images/<sessionId>/<filename>` (§6). 403 on path traversal
/// (§8 invariant 8); once the path is known to stay inside the session
/// directory, serving itself is delegated to `tower_http`'s `ServeFile`.
pub async fn stored_image(
    State(state): State<AppState>,
    AxumPath((session_id, filename)): AxumPath<(String, String)>,
    request: axum::extract::Request,
) -> Response {
    let resolved = match state.services.session_store.resolve_stored_path(&session_id, &filename) {
        Ok(path) => path,
        Err(_) => return (StatusCode::FORBIDDEN, "forbidden").into_response(),
    };
    tower::util::ServiceExt::oneshot(tower_http::services::ServeFile::new(resolved), request)
        .await
        .unwrap_or_else(|e: std::convert::Infallible| match e {})
        .into_response()
}

/// `GET /health` (§6).
pub async fn health() -> Response {
    Json(json!({
        "status": "healthy",
        "timestamp": now_millis(),
        "version": CRATE_VERSION,
    }))
    .into_response()
}

/// `GET /config` (§6).
pub async fn get_config(State(state): State<AppState>) -> Response {
    match state.services.config.to_yaml() {
        Ok(yaml) => (StatusCode::OK, yaml).into_response(),
        Err(e) => internal_error(e.to_string()),
    }
}

/// `POST /config` (§6): replaces the effective configuration and persists
/// it to the configured path.
pub async fn post_config(State(state): State<AppState>, body: String) -> Response {
    let config = match Config::from_yaml(&body) {
        Ok(c) => c,
        Err(e) => return bad_request(e.to_string()),
    };
    if let Err(e) = std::fs::write(&state.config_path, &body) {
        return internal_error(e.to_string());
    }
    // Services::config is immutable once built; a restart picks up the
    // new file. We still echo the effective document back.
    Json(json!({ "performanceLevel": config.performance_level, "written": true })).into_response()
}
