use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;

use super::{
    error_for_status, in_prefix, send_with_retry, Backend, BackendError, BackendKind,
    DeleteOutcome, FetchedObject, NodeHealth, NodeStatus, RetryPolicy,
};
use crate::sigv4::uri_encode;

const ACCEPT: &str = "application/vnd.github.v3+json";

/// Base URLs for the GitHub REST API and raw content host.
#[derive(Debug, Clone)]
pub struct GitHubEndpoints {
    pub api_url: String,
    pub raw_url: String,
}

impl Default for GitHubEndpoints {
    fn default() -> Self {
        Self {
            api_url: "https://api.github.com".to_string(),
            raw_url: "https://raw.githubusercontent.com".to_string(),
        }
    }
}

/// A GitHub repository used as a storage node.
pub struct GitHubRepo {
    client: Client,
    endpoints: GitHubEndpoints,
    owner: String,
    repo: String,
    token: String,
    branch: String,
    retry: RetryPolicy,
}

#[derive(Deserialize)]
struct ContentEntry {
    sha: String,
    size: u64,
}

#[derive(Deserialize)]
struct RepoOwner {
    login: String,
}

#[derive(Deserialize)]
struct RepoInfo {
    private: bool,
    owner: RepoOwner,
}

#[derive(Deserialize)]
struct TreeEntry {
    path: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    size: Option<u64>,
}

#[derive(Deserialize)]
struct Tree {
    tree: Vec<TreeEntry>,
    #[serde(default)]
    truncated: bool,
}

impl GitHubRepo {
    pub fn new(
        client: Client,
        endpoints: GitHubEndpoints,
        owner: &str,
        repo: &str,
        token: &str,
        branch: &str,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            endpoints,
            owner: owner.to_string(),
            repo: repo.to_string(),
            token: token.to_string(),
            branch: branch.to_string(),
            retry,
        }
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("Authorization", format!("token {}", self.token))
            .header("Accept", ACCEPT)
    }

    fn raw_url(&self, key: &str) -> String {
        format!(
            "{}/{}/{}/{}/{}",
            self.endpoints.raw_url,
            self.owner,
            self.repo,
            self.branch,
            uri_encode(key, false)
        )
    }

    fn contents_url(&self, key: &str) -> String {
        format!(
            "{}/repos/{}/{}/contents/{}",
            self.endpoints.api_url,
            self.owner,
            self.repo,
            uri_encode(key, false)
        )
    }

    fn repo_url(&self) -> String {
        format!(
            "{}/repos/{}/{}",
            self.endpoints.api_url, self.owner, self.repo
        )
    }

    fn tree_url(&self) -> String {
        format!(
            "{}/repos/{}/{}/git/trees/{}?recursive=1",
            self.endpoints.api_url, self.owner, self.repo, self.branch
        )
    }

    async fn content_entry(&self, key: &str) -> Result<ContentEntry, BackendError> {
        let request = self
            .authorized(self.client.get(self.contents_url(key)))
            .query(&[("ref", self.branch.as_str())]);
        let resp = send_with_retry(request, self.retry).await?;
        if !resp.status().is_success() {
            return Err(error_for_status(resp).await);
        }

        // Directories come back as an array and fail to decode here.
        resp.json::<ContentEntry>()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))
    }

    async fn repo_info(&self) -> Result<RepoInfo, BackendError> {
        let request = self.authorized(self.client.get(self.repo_url()));
        let resp = send_with_retry(request, self.retry).await?;
        if !resp.status().is_success() {
            return Err(error_for_status(resp).await);
        }
        resp.json()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))
    }

    async fn tree(&self) -> Result<Tree, BackendError> {
        let request = self.authorized(self.client.get(self.tree_url()));
        let resp = send_with_retry(request, self.retry).await?;
        if !resp.status().is_success() {
            return Err(error_for_status(resp).await);
        }
        resp.json()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))
    }
}

#[async_trait]
impl Backend for GitHubRepo {
    fn kind(&self) -> BackendKind {
        BackendKind::GitHub
    }

    fn name(&self) -> &str {
        &self.repo
    }

    async fn fetch(&self, key: &str) -> Result<FetchedObject, BackendError> {
        let resp = self
            .client
            .get(self.raw_url(key))
            .header("Authorization", format!("token {}", self.token))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(error_for_status(resp).await);
        }

        let data = resp.bytes().await?;

        // The raw host labels everything text/plain, so leave typing to the caller.
        Ok(FetchedObject {
            data,
            content_type: None,
        })
    }

    async fn locate(&self, key: &str) -> Result<u64, BackendError> {
        Ok(self.content_entry(key).await?.size)
    }

    async fn delete(&self, key: &str) -> Result<DeleteOutcome, BackendError> {
        let entry = match self.content_entry(key).await {
            Ok(entry) => entry,
            Err(BackendError::NotFound) => return Ok(DeleteOutcome::NotFound),
            Err(e) => return Err(e),
        };

        let request = self
            .authorized(self.client.delete(self.contents_url(key)))
            .json(&serde_json::json!({
                "message": format!("Delete {key}"),
                "sha": entry.sha,
                "branch": self.branch,
            }));
        let resp = send_with_retry(request, self.retry).await?;

        if resp.status().is_success() {
            return Ok(DeleteOutcome::Deleted);
        }
        match error_for_status(resp).await {
            BackendError::NotFound => Ok(DeleteOutcome::NotFound),
            e => Err(e),
        }
    }

    async fn status(&self, prefix: &str) -> NodeStatus {
        let status = NodeStatus::new(BackendKind::GitHub, &self.repo);

        let info = match self.repo_info().await {
            Ok(info) => info,
            Err(BackendError::NotFound) => {
                return status.failed(NodeHealth::NotFound, "repository not found")
            }
            Err(e) => return status.failed(NodeHealth::Error, e),
        };

        let mut status = NodeStatus {
            visibility: Some(if info.private { "private" } else { "public" }.to_string()),
            owner: Some(info.owner.login),
            ..status
        };

        match self.tree().await {
            Ok(tree) => {
                if tree.truncated {
                    tracing::warn!(
                        repo = %self.repo,
                        "GitHub tree listing truncated, counts are partial"
                    );
                }
                let (files, bytes) = tree
                    .tree
                    .iter()
                    .filter(|e| e.kind == "blob" && in_prefix(&e.path, prefix))
                    .fold((0u64, 0u64), |(n, total), e| {
                        (n + 1, total + e.size.unwrap_or(0))
                    });
                status.files = files;
                status.bytes = Some(bytes);
                status
            }
            // A freshly created repository has no commits and therefore no tree.
            Err(BackendError::NotFound) => {
                status.bytes = Some(0);
                status
            }
            Err(BackendError::Status(code, _)) if code == StatusCode::CONFLICT => {
                status.bytes = Some(0);
                status
            }
            Err(e) => status.failed(NodeHealth::Error, e),
        }
    }
}
