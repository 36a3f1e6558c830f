use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use reqwest::{header, Client, Method, RequestBuilder, Url};

use super::{
    content_type, error_for_status, in_prefix, Backend, BackendError, BackendKind, DeleteOutcome,
    FetchedObject, NodeHealth, NodeStatus,
};
use crate::sigv4::{uri_encode, Signer, SigningRequest, UNSIGNED_PAYLOAD};

const MAX_LIST_PAGES: usize = 100;

static CONTENTS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<Contents>(.*?)</Contents>").expect("valid regex"));
static VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<Version>(.*?)</Version>").expect("valid regex"));
static KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<Key>([^<]*)</Key>").expect("valid regex"));
static SIZE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<Size>(\d+)</Size>").expect("valid regex"));
static VERSION_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<VersionId>([^<]+)</VersionId>").expect("valid regex"));
static NEXT_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<NextContinuationToken>([^<]+)</NextContinuationToken>").expect("valid regex")
});

/// Which S3-compatible service a bucket lives on. B2 keeps object versions,
/// so deletes there must remove every version explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum S3Flavor {
    R2,
    B2,
}

/// An R2 or B2 bucket addressed path-style and signed with SigV4.
pub struct S3Bucket {
    client: Client,
    flavor: S3Flavor,
    name: String,
    endpoint: String,
    host: String,
    bucket: String,
    signer: Signer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ListedObject {
    key: String,
    size: u64,
}

#[derive(Debug, Default)]
struct ListPage {
    objects: Vec<ListedObject>,
    next_token: Option<String>,
}

impl S3Bucket {
    /// `endpoint` is a base URL such as `https://s3.us-west-004.backblazeb2.com`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Client,
        flavor: S3Flavor,
        name: &str,
        endpoint: &str,
        bucket: &str,
        access_key_id: &str,
        secret_access_key: &str,
        region: &str,
    ) -> Result<Self, anyhow::Error> {
        let url = Url::parse(endpoint)?;
        let host = url
            .host_str()
            .ok_or_else(|| anyhow::anyhow!("endpoint '{endpoint}' has no host"))?;
        let host = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };

        Ok(Self {
            client,
            flavor,
            name: name.to_string(),
            endpoint: format!("{}://{host}", url.scheme()),
            host,
            bucket: bucket.to_string(),
            signer: Signer::new(access_key_id, secret_access_key, region, "s3"),
        })
    }

    pub fn r2(
        client: Client,
        name: &str,
        account_id: &str,
        bucket: &str,
        access_key_id: &str,
        secret_access_key: &str,
    ) -> Result<Self, anyhow::Error> {
        let endpoint = format!("https://{account_id}.r2.cloudflarestorage.com");
        Self::new(
            client,
            S3Flavor::R2,
            name,
            &endpoint,
            bucket,
            access_key_id,
            secret_access_key,
            "auto",
        )
    }

    pub fn b2(
        client: Client,
        name: &str,
        endpoint: &str,
        bucket: &str,
        key_id: &str,
        application_key: &str,
    ) -> Result<Self, anyhow::Error> {
        let endpoint = if endpoint.contains("://") {
            endpoint.to_string()
        } else {
            format!("https://{endpoint}")
        };
        let host = Url::parse(&endpoint)?
            .host_str()
            .map(|h| h.to_string())
            .unwrap_or_default();
        let region = region_from_endpoint(&host);
        Self::new(
            client,
            S3Flavor::B2,
            name,
            &endpoint,
            bucket,
            key_id,
            application_key,
            &region,
        )
    }

    pub fn region(&self) -> &str {
        self.signer.region()
    }

    fn object_path(&self, key: Option<&str>) -> String {
        match key {
            Some(key) => format!("/{}/{}", self.bucket, uri_encode(key, false)),
            None => format!("/{}", self.bucket),
        }
    }

    fn signed(
        &self,
        method: Method,
        key: Option<&str>,
        query: &[(String, String)],
    ) -> RequestBuilder {
        let path = self.object_path(key);
        let signed = self.signer.sign(
            &SigningRequest {
                method: method.as_str(),
                host: &self.host,
                path: &path,
                query,
                payload_hash: UNSIGNED_PAYLOAD,
            },
            Utc::now(),
        );

        let mut url = format!("{}{path}", self.endpoint);
        if !signed.query_string.is_empty() {
            url.push('?');
            url.push_str(&signed.query_string);
        }

        self.client
            .request(method, url)
            .header(header::AUTHORIZATION, signed.authorization)
            .header("x-amz-date", signed.amz_date)
            .header("x-amz-content-sha256", signed.content_sha256)
    }

    async fn list_page(
        &self,
        prefix: &str,
        token: Option<&str>,
    ) -> Result<ListPage, BackendError> {
        let mut query = vec![
            ("list-type".to_string(), "2".to_string()),
            ("prefix".to_string(), prefix.to_string()),
        ];
        if let Some(token) = token {
            query.push(("continuation-token".to_string(), token.to_string()));
        }

        let resp = self.signed(Method::GET, None, &query).send().await?;
        if !resp.status().is_success() {
            return Err(error_for_status(resp).await);
        }
        let body = resp.text().await?;
        Ok(parse_list_page(&body))
    }

    async fn list_all(&self, prefix: &str) -> Result<Vec<ListedObject>, BackendError> {
        let mut objects = Vec::new();
        let mut token: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let page = self.list_page(prefix, token.as_deref()).await?;
            objects.extend(page.objects);
            match page.next_token {
                Some(next) => token = Some(next),
                None => return Ok(objects),
            }
        }

        tracing::warn!(bucket = %self.bucket, "Bucket listing capped, counts are partial");
        Ok(objects)
    }

    async fn version_ids(&self, key: &str) -> Result<Vec<String>, BackendError> {
        let query = vec![
            ("prefix".to_string(), key.to_string()),
            ("versions".to_string(), String::new()),
        ];
        let resp = self.signed(Method::GET, None, &query).send().await?;
        if !resp.status().is_success() {
            return Err(error_for_status(resp).await);
        }
        let body = resp.text().await?;
        Ok(parse_version_ids(&body, key))
    }

    async fn delete_object(
        &self,
        key: &str,
        version_id: Option<&str>,
    ) -> Result<(), BackendError> {
        let query: Vec<(String, String)> = version_id
            .map(|v| vec![("versionId".to_string(), v.to_string())])
            .unwrap_or_default();

        let resp = self.signed(Method::DELETE, Some(key), &query).send().await?;
        if !resp.status().is_success() {
            return Err(error_for_status(resp).await);
        }
        Ok(())
    }
}

#[async_trait]
impl Backend for S3Bucket {
    fn kind(&self) -> BackendKind {
        match self.flavor {
            S3Flavor::R2 => BackendKind::R2,
            S3Flavor::B2 => BackendKind::B2,
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn label(&self) -> String {
        format!("{} ({} ({}))", self.kind(), self.name, self.bucket)
    }

    async fn fetch(&self, key: &str) -> Result<FetchedObject, BackendError> {
        let resp = self.signed(Method::GET, Some(key), &[]).send().await?;
        if !resp.status().is_success() {
            return Err(error_for_status(resp).await);
        }

        let content_type = content_type(&resp);
        let data = resp.bytes().await?;
        Ok(FetchedObject { data, content_type })
    }

    async fn locate(&self, key: &str) -> Result<u64, BackendError> {
        let resp = self.signed(Method::HEAD, Some(key), &[]).send().await?;
        if !resp.status().is_success() {
            return Err(error_for_status(resp).await);
        }

        resp.headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| BackendError::Decode("missing content-length".to_string()))
    }

    async fn delete(&self, key: &str) -> Result<DeleteOutcome, BackendError> {
        match self.flavor {
            S3Flavor::R2 => {
                let listed = self.list_page(key, None).await?;
                if !listed.objects.iter().any(|o| o.key == key) {
                    return Ok(DeleteOutcome::NotFound);
                }
                self.delete_object(key, None).await?;
            }
            S3Flavor::B2 => {
                let versions = self.version_ids(key).await?;
                if versions.is_empty() {
                    return Ok(DeleteOutcome::NotFound);
                }
                for version in &versions {
                    self.delete_object(key, Some(version)).await?;
                }
                tracing::debug!(
                    bucket = %self.bucket,
                    key,
                    versions = versions.len(),
                    "Deleted all versions"
                );
            }
        }
        Ok(DeleteOutcome::Deleted)
    }

    async fn status(&self, prefix: &str) -> NodeStatus {
        let mut status = NodeStatus::new(self.kind(), &self.name);
        status.bucket = Some(self.bucket.clone());

        let list_prefix = if prefix.is_empty() {
            String::new()
        } else {
            format!("{prefix}/")
        };

        match self.list_all(&list_prefix).await {
            Ok(objects) => {
                let (files, bytes) = objects
                    .iter()
                    .filter(|o| !o.key.ends_with('/') && in_prefix(&o.key, prefix))
                    .fold((0u64, 0u64), |(n, total), o| (n + 1, total + o.size));
                status.files = files;
                status.bytes = Some(bytes);
                status
            }
            Err(BackendError::NotFound) => status.failed(NodeHealth::NotFound, "bucket not found"),
            Err(e) => status.failed(NodeHealth::Error, e),
        }
    }
}

/// B2 endpoints look like `s3.<region>.backblazeb2.com`.
pub fn region_from_endpoint(host: &str) -> String {
    host.split('.')
        .nth(1)
        .filter(|r| !r.is_empty())
        .unwrap_or("auto")
        .to_string()
}

fn parse_list_page(xml: &str) -> ListPage {
    let objects = CONTENTS
        .captures_iter(xml)
        .filter_map(|c| {
            let block = c.get(1)?.as_str();
            let key = KEY.captures(block)?.get(1)?.as_str();
            let size = SIZE.captures(block)?.get(1)?.as_str().parse().ok()?;
            Some(ListedObject {
                key: xml_unescape(key),
                size,
            })
        })
        .collect();

    let truncated = xml.contains("<IsTruncated>true</IsTruncated>");
    let next_token = NEXT_TOKEN
        .captures(xml)
        .and_then(|c| c.get(1))
        .map(|m| xml_unescape(m.as_str()))
        .filter(|_| truncated);

    ListPage {
        objects,
        next_token,
    }
}

fn parse_version_ids(xml: &str, key: &str) -> Vec<String> {
    VERSION
        .captures_iter(xml)
        .filter_map(|c| {
            let block = c.get(1)?.as_str();
            let found = xml_unescape(KEY.captures(block)?.get(1)?.as_str());
            if found != key {
                return None;
            }
            Some(VERSION_ID.captures(block)?.get(1)?.as_str().to_string())
        })
        .collect()
}

fn xml_unescape(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
