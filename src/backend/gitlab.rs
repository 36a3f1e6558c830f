use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;

use super::{
    error_for_status, send_with_retry, Backend, BackendError, BackendKind, DeleteOutcome,
    FetchedObject, NodeHealth, NodeStatus, RetryPolicy,
};
use crate::sigv4::uri_encode;

const TREE_PAGE_SIZE: u32 = 100;
const MAX_TREE_PAGES: u32 = 50;

/// A GitLab project used as a storage node.
pub struct GitLabProject {
    client: Client,
    api_url: String,
    name: String,
    project_id: String,
    token: String,
    branch: String,
    retry: RetryPolicy,
}

#[derive(Deserialize)]
struct FileInfo {
    size: u64,
}

#[derive(Deserialize)]
struct ProjectOwner {
    username: String,
}

#[derive(Deserialize)]
struct ProjectInfo {
    #[serde(default)]
    visibility: Option<String>,
    #[serde(default)]
    owner: Option<ProjectOwner>,
}

#[derive(Deserialize)]
struct TreeItem {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Deserialize, Default)]
struct ApiMessage {
    #[serde(default)]
    message: Option<String>,
}

impl GitLabProject {
    pub fn new(
        client: Client,
        api_url: &str,
        name: &str,
        project_id: &str,
        token: &str,
        branch: &str,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            api_url: api_url.to_string(),
            name: name.to_string(),
            project_id: project_id.to_string(),
            token: token.to_string(),
            branch: branch.to_string(),
            retry,
        }
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.header("PRIVATE-TOKEN", &self.token)
    }

    fn project_url(&self) -> String {
        format!(
            "{}/projects/{}",
            self.api_url,
            uri_encode(&self.project_id, true)
        )
    }

    /// GitLab wants the whole file path as one encoded segment.
    fn file_url(&self, key: &str) -> String {
        format!(
            "{}/repository/files/{}",
            self.project_url(),
            uri_encode(key, true)
        )
    }

    async fn project_info(&self) -> Result<ProjectInfo, BackendError> {
        let request = self.authorized(self.client.get(self.project_url()));
        let resp = send_with_retry(request, self.retry).await?;
        if !resp.status().is_success() {
            return Err(error_for_status(resp).await);
        }
        resp.json()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))
    }

    async fn count_files(&self, prefix: &str) -> Result<u64, BackendError> {
        let mut files = 0u64;
        let mut page = 1u32;

        loop {
            let request = self
                .authorized(
                    self.client
                        .get(format!("{}/repository/tree", self.project_url())),
                )
                .query(&[
                    ("recursive", "true".to_string()),
                    ("per_page", TREE_PAGE_SIZE.to_string()),
                    ("page", page.to_string()),
                    ("path", prefix.to_string()),
                    ("ref", self.branch.clone()),
                ]);
            let resp = send_with_retry(request, self.retry).await?;
            if !resp.status().is_success() {
                return Err(error_for_status(resp).await);
            }

            let next_page = resp
                .headers()
                .get("x-next-page")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u32>().ok());

            let items: Vec<TreeItem> = resp
                .json()
                .await
                .map_err(|e| BackendError::Decode(e.to_string()))?;
            files += items.iter().filter(|i| i.kind == "blob").count() as u64;

            match next_page {
                Some(next) if next > page && next <= MAX_TREE_PAGES => page = next,
                Some(_) => {
                    tracing::warn!(
                        project = %self.project_id,
                        "GitLab tree listing capped, counts are partial"
                    );
                    return Ok(files);
                }
                None => return Ok(files),
            }
        }
    }
}

#[async_trait]
impl Backend for GitLabProject {
    fn kind(&self) -> BackendKind {
        BackendKind::GitLab
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, key: &str) -> Result<FetchedObject, BackendError> {
        let request = self
            .authorized(self.client.get(format!("{}/raw", self.file_url(key))))
            .query(&[("ref", self.branch.as_str())]);
        let resp = send_with_retry(request, self.retry).await?;

        if !resp.status().is_success() {
            return Err(error_for_status(resp).await);
        }

        let data = resp.bytes().await?;
        Ok(FetchedObject {
            data,
            content_type: None,
        })
    }

    async fn locate(&self, key: &str) -> Result<u64, BackendError> {
        let request = self
            .authorized(self.client.get(self.file_url(key)))
            .query(&[("ref", self.branch.as_str())]);
        let resp = send_with_retry(request, self.retry).await?;
        if !resp.status().is_success() {
            return Err(error_for_status(resp).await);
        }

        let info: FileInfo = resp
            .json()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))?;
        Ok(info.size)
    }

    async fn delete(&self, key: &str) -> Result<DeleteOutcome, BackendError> {
        let request = self
            .authorized(self.client.delete(self.file_url(key)))
            .json(&serde_json::json!({
                "branch": self.branch,
                "commit_message": format!("Delete file: {key}"),
            }));
        let resp = send_with_retry(request, self.retry).await?;

        let status = resp.status();
        if status.is_success() {
            return Ok(DeleteOutcome::Deleted);
        }
        if status == StatusCode::NOT_FOUND {
            return Ok(DeleteOutcome::NotFound);
        }

        let body = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiMessage>(&body)
            .unwrap_or_default()
            .message
            .unwrap_or(body);
        if is_missing_file_message(&message) {
            return Ok(DeleteOutcome::NotFound);
        }
        Err(BackendError::Status(status, message))
    }

    async fn status(&self, prefix: &str) -> NodeStatus {
        let status = NodeStatus::new(BackendKind::GitLab, &self.name);

        let info = match self.project_info().await {
            Ok(info) => info,
            Err(BackendError::NotFound) => {
                return status.failed(NodeHealth::NotFound, "project not found")
            }
            Err(e) => return status.failed(NodeHealth::Error, e),
        };

        let mut status = NodeStatus {
            visibility: info.visibility,
            owner: info.owner.map(|o| o.username),
            ..status
        };

        match self.count_files(prefix).await {
            Ok(files) => status.files = files,
            // Empty projects have no tree yet.
            Err(BackendError::NotFound) => {}
            Err(e) => return status.failed(NodeHealth::Error, e),
        }
        status
    }
}

fn is_missing_file_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("doesn't exist")
        || lower.contains("does not exist")
        || lower.contains("file not found")
}
