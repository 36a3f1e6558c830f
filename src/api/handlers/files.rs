use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use chrono::Utc;
use serde::Serialize;

use super::cluster_error;
use crate::api::format::format_size;
use crate::api::response::{ApiError, JSend};
use crate::backend::BackendKind;
use crate::cache::CacheEntry;
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct WhereResponse {
    pub file_name: String,
    pub bytes: u64,
    pub size: String,
    pub source: String,
    pub duration: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// Serve a file from the fastest node holding it.
///
/// Requests pinned to one backend with `from` bypass the cache in both
/// directions.
pub async fn serve_file(
    state: &AppState,
    path: &str,
    source: Option<BackendKind>,
) -> Result<Response, ApiError> {
    let key = state.cluster.storage_key(path).map_err(cluster_error)?;
    let use_cache = source.is_none() && state.config.cache_enabled();

    if use_cache {
        match state.cache.get_object(&key, Utc::now()) {
            Ok(Some(hit)) => {
                tracing::debug!(key = %key, source = %hit.entry.source, "Cache hit");
                return Ok(file_response(
                    hit.data,
                    &hit.entry.content_type,
                    &hit.entry.source,
                    CacheStatus::Hit,
                    cache_control(state, source),
                ));
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(key = %key, error = %e, "Cache read failed"),
        }
    }

    let won = state
        .cluster
        .fetch(path, source)
        .await
        .map_err(cluster_error)?;

    let content_type = won
        .value
        .content_type
        .filter(|ct| !ct.is_empty())
        .unwrap_or_else(|| guess_content_type(&key));
    let data = won.value.data;

    if use_cache && data.len() as u64 <= state.config.cache.max_object_size {
        let entry = CacheEntry::new(
            &content_type,
            data.len() as u64,
            &won.label,
            Utc::now(),
            state.config.cache.ttl_seconds,
        );
        if let Err(e) = state.cache.put_object(&key, &entry, &data) {
            tracing::warn!(key = %key, error = %e, "Cache write failed");
        }
    }

    Ok(file_response(
        data,
        &content_type,
        &won.label,
        CacheStatus::Miss,
        cache_control(state, source),
    ))
}

/// Report which node answers first for a file, with its size.
pub async fn locate_file(
    state: &AppState,
    path: &str,
) -> Result<Json<JSend<WhereResponse>>, ApiError> {
    let won = state.cluster.locate(path).await.map_err(cluster_error)?;

    Ok(JSend::success(WhereResponse {
        file_name: base_name(path).to_string(),
        bytes: won.value,
        size: format_size(won.value),
        source: won.label,
        duration: format!("{}ms", won.elapsed.as_millis()),
    }))
}

// ============================================================================
// Helpers
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum CacheStatus {
    Hit,
    Miss,
}

impl CacheStatus {
    fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
        }
    }
}

fn base_name(path: &str) -> &str {
    path.trim_matches('/').rsplit('/').next().unwrap_or_default()
}

fn guess_content_type(key: &str) -> String {
    mime_guess::from_path(key)
        .first_raw()
        .unwrap_or("application/octet-stream")
        .to_string()
}

fn cache_control(state: &AppState, source: Option<BackendKind>) -> HeaderValue {
    if source.is_some() || !state.config.cache_enabled() {
        return HeaderValue::from_static("no-store, no-cache, must-revalidate");
    }
    HeaderValue::from_str(&format!("public, max-age={}", state.config.cache.ttl_seconds))
        .unwrap_or(HeaderValue::from_static("no-cache"))
}

fn file_response(
    data: Bytes,
    content_type: &str,
    served_by: &str,
    cache: CacheStatus,
    cache_control: HeaderValue,
) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        content_type
            .parse()
            .unwrap_or(HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CACHE_CONTROL, cache_control);
    // Node names come from configuration and may not be valid header text
    if let Ok(value) = HeaderValue::from_str(served_by) {
        headers.insert("x-served-by", value);
    }
    headers.insert("x-cache", HeaderValue::from_static(cache.as_str()));

    (StatusCode::OK, headers, data).into_response()
}
