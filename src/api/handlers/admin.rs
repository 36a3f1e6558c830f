use axum::extract::State;
use axum::Json;
use serde::Serialize;
use std::sync::Arc;

use super::cluster_error;
use crate::api::format::format_size;
use crate::api::response::{ApiError, JSend};
use crate::backend::{BackendKind, DeleteOutcome, NodeHealth, NodeStatus};
use crate::cache::CacheStats;
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct NodeReport {
    #[serde(flatten)]
    pub node: NodeStatus,
    pub size: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StatusTotals {
    pub nodes: usize,
    pub working: usize,
    pub files: u64,
    pub bytes: u64,
    pub size: String,
}

#[derive(Debug, Serialize)]
pub struct CacheReport {
    pub enabled: bool,
    pub ttl_seconds: u64,
    #[serde(flatten)]
    pub stats: Option<CacheStats>,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub cluster_dir: String,
    pub nodes: Vec<NodeReport>,
    pub totals: StatusTotals,
    pub cache: CacheReport,
}

#[derive(Debug, Serialize)]
pub struct DeletionReport {
    pub backend: BackendKind,
    pub name: String,
    pub outcome: Option<DeleteOutcome>,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub file: String,
    pub key: String,
    pub deleted_from: usize,
    pub nodes: Vec<DeletionReport>,
    pub cache_invalidated: bool,
}

#[derive(Debug, Serialize)]
pub struct PurgeResponse {
    pub entries_deleted: u64,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn health() -> Json<JSend<HealthResponse>> {
    JSend::success(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Per-node diagnostics plus cluster-wide totals.
pub async fn status(state: &AppState) -> Json<JSend<StatusResponse>> {
    let statuses = state.cluster.status().await;

    let bytes: u64 = statuses.iter().filter_map(|s| s.bytes).sum();
    let totals = StatusTotals {
        nodes: statuses.len(),
        working: statuses
            .iter()
            .filter(|s| s.health == NodeHealth::Working)
            .count(),
        files: statuses.iter().map(|s| s.files).sum(),
        bytes,
        size: format_size(bytes),
    };

    let (stats, error) = match state.cache.stats() {
        Ok(stats) => (Some(stats), None),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to read cache stats");
            (None, Some(e.to_string()))
        }
    };
    let cache = CacheReport {
        enabled: state.config.cache_enabled(),
        ttl_seconds: state.config.cache.ttl_seconds,
        stats,
        error,
    };

    let nodes = statuses
        .into_iter()
        .map(|node| NodeReport {
            size: node.bytes.map(format_size),
            node,
        })
        .collect();

    JSend::success(StatusResponse {
        cluster_dir: state.cluster.dir().to_string(),
        nodes,
        totals,
        cache,
    })
}

/// Delete a file from every node and drop any cached copy.
pub async fn delete_file(
    state: &AppState,
    file: &str,
) -> Result<Json<JSend<DeleteResponse>>, ApiError> {
    let key = state.cluster.storage_key(file).map_err(cluster_error)?;

    // A fetch racing the node deletes can store a copy after the first removal
    let evicted_before = invalidate(state, &key);
    let deletions = state.cluster.delete(file).await.map_err(cluster_error)?;
    let evicted_after = invalidate(state, &key);
    let cache_invalidated = evicted_before || evicted_after;

    let nodes: Vec<DeletionReport> = deletions
        .into_iter()
        .map(|d| {
            let (outcome, error) = match d.result {
                Ok(outcome) => (Some(outcome), None),
                Err(e) => (None, Some(e.to_string())),
            };
            DeletionReport {
                backend: d.backend,
                name: d.name,
                outcome,
                error,
            }
        })
        .collect();
    let deleted_from = nodes
        .iter()
        .filter(|n| n.outcome == Some(DeleteOutcome::Deleted))
        .count();

    tracing::info!(key = %key, deleted_from, nodes = nodes.len(), "Deleted file");

    Ok(JSend::success(DeleteResponse {
        file: file.trim_matches('/').to_string(),
        key,
        deleted_from,
        nodes,
        cache_invalidated,
    }))
}

pub async fn admin_purge(
    State(state): State<Arc<AppState>>,
) -> Result<Json<JSend<PurgeResponse>>, ApiError> {
    let stats = state
        .cache
        .purge_all()
        .map_err(|e| ApiError::internal(e.to_string()))?;

    tracing::warn!(entries = stats.entries, "Purged response cache");

    Ok(JSend::success(PurgeResponse {
        entries_deleted: stats.entries,
    }))
}

fn invalidate(state: &AppState, key: &str) -> bool {
    match state.cache.remove_object(key) {
        Ok(removed) => removed,
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "Failed to invalidate cache entry");
            false
        }
    }
}
