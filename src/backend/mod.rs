mod github;
mod gitlab;
mod s3;

pub use github::{GitHubEndpoints, GitHubRepo};
pub use gitlab::GitLabProject;
pub use s3::{region_from_endpoint, S3Bucket, S3Flavor};

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("not found")]
    NotFound,
    #[error("unexpected status {0}: {1}")]
    Status(StatusCode, String),
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid response: {0}")]
    Decode(String),
}

/// The storage services a node can live on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    GitHub,
    GitLab,
    R2,
    B2,
}

impl BackendKind {
    pub const ALL: [BackendKind; 4] = [
        BackendKind::GitHub,
        BackendKind::GitLab,
        BackendKind::R2,
        BackendKind::B2,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::GitHub => "github",
            BackendKind::GitLab => "gitlab",
            BackendKind::R2 => "r2",
            BackendKind::B2 => "b2",
        }
    }

    /// Human-readable service name.
    pub fn display_name(&self) -> &'static str {
        match self {
            BackendKind::GitHub => "GitHub",
            BackendKind::GitLab => "GitLab",
            BackendKind::R2 => "R2 storage",
            BackendKind::B2 => "B2 storage",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "github" => Ok(BackendKind::GitHub),
            "gitlab" => Ok(BackendKind::GitLab),
            "r2" => Ok(BackendKind::R2),
            "b2" => Ok(BackendKind::B2),
            other => Err(format!("unknown backend '{other}'")),
        }
    }
}

/// File content as returned by a node.
#[derive(Debug, Clone)]
pub struct FetchedObject {
    pub data: Bytes,
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeHealth {
    Working,
    NotFound,
    Error,
}

/// Diagnostics for one node, scoped to the cluster directory.
#[derive(Debug, Clone, Serialize)]
pub struct NodeStatus {
    pub backend: BackendKind,
    pub name: String,
    pub health: NodeHealth,
    pub visibility: Option<String>,
    pub owner: Option<String>,
    pub bucket: Option<String>,
    pub files: u64,
    /// Not every service reports sizes (GitLab trees don't).
    pub bytes: Option<u64>,
    pub error: Option<String>,
}

impl NodeStatus {
    pub fn new(backend: BackendKind, name: impl Into<String>) -> Self {
        Self {
            backend,
            name: name.into(),
            health: NodeHealth::Working,
            visibility: None,
            owner: None,
            bucket: None,
            files: 0,
            bytes: None,
            error: None,
        }
    }

    pub fn failed(mut self, health: NodeHealth, error: impl fmt::Display) -> Self {
        self.health = health;
        self.error = Some(error.to_string());
        self
    }
}

/// One storage node of the cluster. Keys are full object paths including the
/// cluster directory prefix.
#[async_trait]
pub trait Backend: Send + Sync {
    fn kind(&self) -> BackendKind;
    fn name(&self) -> &str;

    fn label(&self) -> String {
        format!("{} ({})", self.kind(), self.name())
    }

    async fn fetch(&self, key: &str) -> Result<FetchedObject, BackendError>;
    /// Size in bytes of the object, if this node holds it.
    async fn locate(&self, key: &str) -> Result<u64, BackendError>;
    async fn delete(&self, key: &str) -> Result<DeleteOutcome, BackendError>;
    async fn status(&self, prefix: &str) -> NodeStatus;
}

/// How often and how patiently to retry rate-limited (429) API calls.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_secs(1),
        }
    }
}

/// Send a request, retrying with linear backoff while the server answers 429.
/// The final response is returned as-is, whatever its status.
pub(crate) async fn send_with_retry(
    request: RequestBuilder,
    policy: RetryPolicy,
) -> Result<Response, BackendError> {
    let mut attempt = 1;
    loop {
        let Some(this_try) = request.try_clone() else {
            return Ok(request.send().await?);
        };

        let resp = this_try.send().await?;
        if resp.status() != StatusCode::TOO_MANY_REQUESTS || attempt >= policy.attempts {
            return Ok(resp);
        }

        let delay = policy.backoff * attempt;
        tracing::warn!(
            url = %resp.url(),
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Rate limited, retrying"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

/// Map a non-success response into a `BackendError`, consuming the body.
pub(crate) async fn error_for_status(resp: Response) -> BackendError {
    let status = resp.status();
    if status == StatusCode::NOT_FOUND {
        return BackendError::NotFound;
    }
    let body = resp.text().await.unwrap_or_default();
    BackendError::Status(status, truncate(&body, 200))
}

pub(crate) fn content_type(resp: &Response) -> Option<String> {
    resp.headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// Whether `path` lies under the directory `prefix` (empty prefix = everything).
pub(crate) fn in_prefix(path: &str, prefix: &str) -> bool {
    prefix.is_empty()
        || path
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
