//! file-cluster - One HTTP endpoint in front of many free-tier storage nodes
//!
//! Files are spread over GitHub repositories, GitLab projects and
//! S3-compatible buckets (Cloudflare R2, Backblaze B2). This crate provides:
//! - Race-and-fallback reads: every node is asked, the first success is served
//! - A "where" lookup reporting which node holds a file and its size
//! - Password-gated status diagnostics and cluster-wide delete
//! - AWS SigV4 request signing for the S3-compatible nodes
//! - A redb-backed response cache for served files

pub mod api;
pub mod backend;
pub mod cache;
pub mod cluster;
pub mod config;
pub mod dispatch;
pub mod sigv4;
#[cfg(test)]
pub mod testutil;

use cache::Cache;
use cluster::Cluster;
use config::Config;

/// Shared application state
pub struct AppState {
    pub config: Config,
    pub cluster: Cluster,
    pub cache: Cache,
}
