//! The virtual cluster: every configured node viewed as one file namespace.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use thiserror::Error;

use crate::backend::{
    Backend, BackendError, BackendKind, DeleteOutcome, FetchedObject, GitHubEndpoints, GitHubRepo,
    GitLabProject, NodeStatus, RetryPolicy, S3Bucket,
};
use crate::config::Config;
use crate::dispatch::{first_success, Attempt, RaceError, Won};

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("{} service is not configured", .0.display_name())]
    NotConfigured(BackendKind),
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error(transparent)]
    Race(#[from] RaceError),
}

/// Result of deleting a file on one node.
#[derive(Debug)]
pub struct NodeDeletion {
    pub backend: BackendKind,
    pub name: String,
    pub result: Result<DeleteOutcome, BackendError>,
}

pub struct Cluster {
    backends: Vec<Arc<dyn Backend>>,
    dir: String,
}

impl Cluster {
    pub fn new(backends: Vec<Arc<dyn Backend>>, dir: &str) -> Self {
        Self {
            backends,
            dir: dir.trim_matches('/').to_string(),
        }
    }

    /// Build every node named in the configuration, in GitHub, GitLab, R2, B2 order.
    pub fn from_config(config: &Config) -> Result<Self, anyhow::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(concat!("file-cluster/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let retry = RetryPolicy::default();
        let mut backends: Vec<Arc<dyn Backend>> = Vec::new();

        let github = &config.github;
        if github.is_enabled() {
            let endpoints = GitHubEndpoints {
                api_url: github.api_url.clone(),
                raw_url: github.raw_url.clone(),
            };
            for repo in &github.repos {
                backends.push(Arc::new(GitHubRepo::new(
                    client.clone(),
                    endpoints.clone(),
                    &github.username,
                    repo,
                    &github.token,
                    &github.branch,
                    retry,
                )));
            }
        }

        for node in &config.gitlab.nodes {
            backends.push(Arc::new(GitLabProject::new(
                client.clone(),
                &config.gitlab.api_url,
                &node.name,
                &node.project_id,
                &node.token,
                &config.gitlab.branch,
                retry,
            )));
        }

        for node in &config.r2 {
            backends.push(Arc::new(S3Bucket::r2(
                client.clone(),
                &node.name,
                &node.account_id,
                &node.bucket,
                &node.access_key_id,
                &node.secret_access_key,
            )?));
        }

        for node in &config.b2 {
            backends.push(Arc::new(S3Bucket::b2(
                client.clone(),
                &node.name,
                &node.endpoint,
                &node.bucket,
                &node.key_id,
                &node.application_key,
            )?));
        }

        Ok(Self::new(backends, &config.cluster_dir))
    }

    pub fn backends(&self) -> &[Arc<dyn Backend>] {
        &self.backends
    }

    pub fn dir(&self) -> &str {
        &self.dir
    }

    pub fn is_configured(&self, kind: BackendKind) -> bool {
        self.backends.iter().any(|b| b.kind() == kind)
    }

    pub fn configured_kinds(&self) -> Vec<BackendKind> {
        BackendKind::ALL
            .into_iter()
            .filter(|k| self.is_configured(*k))
            .collect()
    }

    /// Map a request path to the object key stored on every node.
    pub fn storage_key(&self, path: &str) -> Result<String, ClusterError> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if segments.is_empty() {
            return Err(ClusterError::InvalidPath("path is empty".to_string()));
        }
        if segments.iter().any(|s| *s == "." || *s == "..") {
            return Err(ClusterError::InvalidPath(format!(
                "'{path}' contains relative segments"
            )));
        }

        let relative = segments.join("/");
        if self.dir.is_empty() {
            Ok(relative)
        } else {
            Ok(format!("{}/{relative}", self.dir))
        }
    }

    /// Race a download across all nodes, or only those of `source`.
    pub async fn fetch(
        &self,
        path: &str,
        source: Option<BackendKind>,
    ) -> Result<Won<FetchedObject>, ClusterError> {
        if let Some(kind) = source {
            if !self.is_configured(kind) {
                return Err(ClusterError::NotConfigured(kind));
            }
        }

        let key = self.storage_key(path)?;
        let attempts = self
            .backends
            .iter()
            .filter(|b| source.map_or(true, |kind| b.kind() == kind))
            .map(|b| Attempt::new(b.label(), b.fetch(&key)))
            .collect();

        let won = first_success(attempts).await?;
        tracing::info!(
            key = %key,
            node = %won.label,
            bytes = won.value.data.len(),
            elapsed_ms = won.elapsed.as_millis() as u64,
            "Fetched file"
        );
        Ok(won)
    }

    /// Race a size lookup across all nodes; the first node holding the file wins.
    pub async fn locate(&self, path: &str) -> Result<Won<u64>, ClusterError> {
        let key = self.storage_key(path)?;
        let attempts = self
            .backends
            .iter()
            .map(|b| Attempt::new(b.label(), b.locate(&key)))
            .collect();

        Ok(first_success(attempts).await?)
    }

    /// Delete the file from every node. Results follow node order.
    pub async fn delete(&self, path: &str) -> Result<Vec<NodeDeletion>, ClusterError> {
        let key = self.storage_key(path)?;
        let results = join_all(self.backends.iter().map(|b| b.delete(&key))).await;

        let deletions: Vec<NodeDeletion> = self
            .backends
            .iter()
            .zip(results)
            .map(|(b, result)| NodeDeletion {
                backend: b.kind(),
                name: b.name().to_string(),
                result,
            })
            .collect();

        for d in &deletions {
            match &d.result {
                Ok(outcome) => tracing::info!(
                    key = %key,
                    backend = %d.backend,
                    node = %d.name,
                    ?outcome,
                    "Delete"
                ),
                Err(e) => tracing::warn!(
                    key = %key,
                    backend = %d.backend,
                    node = %d.name,
                    error = %e,
                    "Delete failed"
                ),
            }
        }

        Ok(deletions)
    }

    /// Diagnostics for every node, in node order.
    pub async fn status(&self) -> Vec<NodeStatus> {
        join_all(self.backends.iter().map(|b| b.status(&self.dir))).await
    }
}
