//! Shared test helpers: in-memory storage nodes and a ready-made app state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::backend::{
    in_prefix, Backend, BackendError, BackendKind, DeleteOutcome, FetchedObject, NodeStatus,
};
use crate::cache::Cache;
use crate::cluster::Cluster;
use crate::config::Config;
use crate::AppState;

/// An in-memory node answering after a fixed delay.
pub struct FakeBackend {
    kind: BackendKind,
    name: String,
    delay: Duration,
    files: Mutex<HashMap<String, Bytes>>,
}

impl FakeBackend {
    pub fn new(kind: BackendKind, name: &str) -> Self {
        Self {
            kind,
            name: name.to_string(),
            delay: Duration::ZERO,
            files: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_delay_ms(mut self, ms: u64) -> Self {
        self.delay = Duration::from_millis(ms);
        self
    }

    pub fn with_file(self, key: &str, data: &'static str) -> Self {
        self.files
            .lock()
            .unwrap()
            .insert(key.to_string(), Bytes::from_static(data.as_bytes()));
        self
    }

    fn get(&self, key: &str) -> Option<Bytes> {
        self.files.lock().unwrap().get(key).cloned()
    }
}

#[async_trait]
impl Backend for FakeBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, key: &str) -> Result<FetchedObject, BackendError> {
        tokio::time::sleep(self.delay).await;
        let data = self.get(key).ok_or(BackendError::NotFound)?;
        Ok(FetchedObject {
            data,
            content_type: None,
        })
    }

    async fn locate(&self, key: &str) -> Result<u64, BackendError> {
        tokio::time::sleep(self.delay).await;
        self.get(key)
            .map(|d| d.len() as u64)
            .ok_or(BackendError::NotFound)
    }

    async fn delete(&self, key: &str) -> Result<DeleteOutcome, BackendError> {
        tokio::time::sleep(self.delay).await;
        let removed = self.files.lock().unwrap().remove(key);
        Ok(match removed {
            Some(_) => DeleteOutcome::Deleted,
            None => DeleteOutcome::NotFound,
        })
    }

    async fn status(&self, prefix: &str) -> NodeStatus {
        let files = self.files.lock().unwrap();
        let sizes: Vec<u64> = files
            .iter()
            .filter(|(key, _)| in_prefix(key.as_str(), prefix))
            .map(|(_, data)| data.len() as u64)
            .collect();

        let mut status = NodeStatus::new(self.kind, &self.name);
        status.files = sizes.len() as u64;
        status.bytes = Some(sizes.iter().sum());
        status
    }
}

/// Create a test AppState over the given nodes with a temporary cache database.
pub fn test_state(
    temp_dir: &tempfile::TempDir,
    backends: Vec<Arc<dyn Backend>>,
) -> Arc<AppState> {
    test_state_with(temp_dir, backends, |_| {})
}

/// Like [`test_state`], with a hook to adjust the config first.
pub fn test_state_with(
    temp_dir: &tempfile::TempDir,
    backends: Vec<Arc<dyn Backend>>,
    configure: impl FnOnce(&mut Config),
) -> Arc<AppState> {
    let mut config = Config::default();
    config.data_dir = temp_dir.path().join("data").to_string_lossy().to_string();
    config.check_password = "s3cret".to_string();
    config.cluster_dir = "pics".to_string();
    config.test_mode = true;
    configure(&mut config);

    let cache = Cache::open(&config.data_dir).expect("Failed to open test cache");
    let cluster = Cluster::new(backends, &config.cluster_dir);

    Arc::new(AppState {
        config,
        cluster,
        cache,
    })
}

/// Serve the router on an ephemeral port and return its base URL.
pub async fn spawn_app(state: Arc<AppState>) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test listener");
    let addr = listener.local_addr().expect("listener has an address");
    let app = crate::api::create_router(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    format!("http://{addr}")
}
