mod admin;
mod files;

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use crate::api::response::{ApiError, AppQuery};
use crate::cluster::ClusterError;
use crate::dispatch::RaceError;
use crate::AppState;

pub use admin::{admin_purge, delete_file, health, status};
pub use files::{locate_file, serve_file};

/// Query parameters understood by `GET /*path`.
#[derive(Debug, Default, Deserialize)]
pub struct RequestParams {
    /// `github`, `gitlab`, `r2`, `b2` or `where`
    #[serde(default)]
    pub from: Option<String>,
    /// File to delete, relative to the cluster directory
    #[serde(default)]
    pub file: Option<String>,
}

/// What a request path resolves to.
#[derive(Debug, PartialEq, Eq)]
pub enum Action<'a> {
    Status,
    Delete,
    /// `/del` without the password in front
    DeleteWithoutPassword,
    File(&'a str),
}

/// Classify a wildcard path. An empty password never matches, so status and
/// delete stay disabled until one is configured.
pub fn classify<'a>(path: &'a str, password: &str) -> Action<'a> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    fn is_delete(s: &str) -> bool {
        s == "del" || s == "delete"
    }

    match segments.as_slice() {
        [first] if !password.is_empty() && *first == password => Action::Status,
        [first, second] if !password.is_empty() && *first == password && is_delete(second) => {
            Action::Delete
        }
        [only] if is_delete(only) => Action::DeleteWithoutPassword,
        _ => Action::File(path),
    }
}

/// Entry point for every `GET` outside the internal routes.
pub async fn dispatch(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    AppQuery(params): AppQuery<RequestParams>,
) -> Result<Response, ApiError> {
    match classify(&path, &state.config.check_password) {
        Action::Status => Ok(status(&state).await.into_response()),
        Action::Delete => {
            let file = params
                .file
                .as_deref()
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .ok_or_else(|| ApiError::bad_request("Missing 'file' query parameter"))?;
            Ok(delete_file(&state, file).await?.into_response())
        }
        Action::DeleteWithoutPassword => Err(ApiError::forbidden(
            "Deleting requires the password: /{password}/del?file=path/to/file",
        )),
        Action::File(path) => match source_param(params.from.as_deref()).as_deref() {
            Some("where") => Ok(locate_file(&state, path).await?.into_response()),
            Some(source) => {
                let kind = source.parse().map_err(|_| {
                    ApiError::bad_request(format!(
                        "Unknown source '{source}'. Use github, gitlab, r2, b2 or where"
                    ))
                })?;
                serve_file(&state, path, Some(kind)).await
            }
            None => serve_file(&state, path, None).await,
        },
    }
}

/// Normalise `from`: case-insensitive, and blank means absent.
fn source_param(raw: Option<&str>) -> Option<String> {
    raw.map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty())
}

/// Map a ClusterError to an ApiError
fn cluster_error(e: ClusterError) -> ApiError {
    match e {
        ClusterError::NotConfigured(_) | ClusterError::InvalidPath(_) => {
            ApiError::bad_request(e.to_string())
        }
        ClusterError::Race(RaceError::NoCandidates) => {
            ApiError::unavailable("No storage nodes are configured")
        }
        ClusterError::Race(RaceError::AllFailed(_)) => {
            ApiError::not_found(format!("File not found. {e}"))
        }
    }
}
