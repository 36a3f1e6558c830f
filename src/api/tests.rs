use std::sync::Arc;

use reqwest::StatusCode;
use chrono::Utc;
use serde_json::Value;

use crate::api::handlers::delete_file;
use crate::backend::{Backend, BackendKind};
use crate::cache::CacheEntry;
use crate::testutil::{spawn_app, test_state, test_state_with, FakeBackend};

fn nodes() -> Vec<Arc<dyn Backend>> {
    vec![
        Arc::new(
            FakeBackend::new(BackendKind::GitHub, "pic1")
                .with_delay_ms(60)
                .with_file("pics/a.png", "from-github"),
        ),
        Arc::new(
            FakeBackend::new(BackendKind::GitLab, "pic1")
                .with_delay_ms(5)
                .with_file("pics/a.png", "from-gitlab")
                .with_file("pics/notes.txt", "hello"),
        ),
    ]
}

async fn app() -> (tempfile::TempDir, String) {
    let dir = tempfile::tempdir().unwrap();
    let base = spawn_app(test_state(&dir, nodes())).await;
    (dir, base)
}

fn header<'a>(resp: &'a reqwest::Response, name: &str) -> Option<&'a str> {
    resp.headers().get(name).and_then(|v| v.to_str().ok())
}

#[tokio::test]
async fn test_health() {
    let (_dir, base) = app().await;
    let body: Value = reqwest::get(format!("{base}/_internal/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "success");
    assert_eq!(body["data"]["status"], "ok");
}

#[tokio::test]
async fn test_fetch_serves_fastest_node_then_cache() {
    let (_dir, base) = app().await;

    let first = reqwest::get(format!("{base}/a.png")).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(header(&first, "content-type"), Some("image/png"));
    assert_eq!(header(&first, "x-served-by"), Some("gitlab (pic1)"));
    assert_eq!(header(&first, "x-cache"), Some("MISS"));
    assert_eq!(first.text().await.unwrap(), "from-gitlab");

    let second = reqwest::get(format!("{base}/a.png")).await.unwrap();
    assert_eq!(header(&second, "x-cache"), Some("HIT"));
    assert_eq!(header(&second, "x-served-by"), Some("gitlab (pic1)"));
    assert_eq!(header(&second, "content-type"), Some("image/png"));
    assert_eq!(second.text().await.unwrap(), "from-gitlab");
}

#[tokio::test]
async fn test_fetch_from_one_backend_skips_cache() {
    let (_dir, base) = app().await;

    let pinned = reqwest::get(format!("{base}/a.png?from=github"))
        .await
        .unwrap();
    assert_eq!(pinned.status(), StatusCode::OK);
    assert_eq!(header(&pinned, "x-served-by"), Some("github (pic1)"));
    assert!(header(&pinned, "cache-control")
        .unwrap()
        .contains("no-store"));
    assert_eq!(pinned.text().await.unwrap(), "from-github");

    // Nothing was stored by the pinned request
    let plain = reqwest::get(format!("{base}/a.png")).await.unwrap();
    assert_eq!(header(&plain, "x-cache"), Some("MISS"));
}

#[tokio::test]
async fn test_fetch_from_unconfigured_or_unknown_source() {
    let (_dir, base) = app().await;

    let resp = reqwest::get(format!("{base}/a.png?from=b2")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "fail");
    assert_eq!(
        body["data"]["message"],
        "B2 storage service is not configured"
    );

    let resp = reqwest::get(format!("{base}/a.png?from=dropbox"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_missing_file_reports_every_node() {
    let (_dir, base) = app().await;

    let resp = reqwest::get(format!("{base}/nope.png")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body: Value = resp.json().await.unwrap();
    let message = body["data"]["message"].as_str().unwrap();
    assert!(message.contains("Error in github (pic1)"));
    assert!(message.contains("Error in gitlab (pic1)"));
}

#[tokio::test]
async fn test_where_reports_holder_and_size() {
    let (_dir, base) = app().await;

    let body: Value = reqwest::get(format!("{base}/notes.txt?from=where"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "success");
    assert_eq!(body["data"]["file_name"], "notes.txt");
    assert_eq!(body["data"]["bytes"], 5);
    assert_eq!(body["data"]["size"], "0.00 kB");
    assert_eq!(body["data"]["source"], "gitlab (pic1)");
    assert!(body["data"]["duration"].as_str().unwrap().ends_with("ms"));
}

#[tokio::test]
async fn test_status_requires_password() {
    let (_dir, base) = app().await;

    let body: Value = reqwest::get(format!("{base}/s3cret"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "success");
    assert_eq!(body["data"]["cluster_dir"], "pics");
    assert_eq!(body["data"]["nodes"].as_array().unwrap().len(), 2);
    assert_eq!(body["data"]["nodes"][1]["backend"], "gitlab");
    assert_eq!(body["data"]["nodes"][1]["files"], 2);
    assert_eq!(body["data"]["totals"]["files"], 3);
    assert_eq!(body["data"]["cache"]["entries"], 0);

    // A wrong password is just a path that no node holds
    let resp = reqwest::get(format!("{base}/guess")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_removes_file_everywhere_and_from_cache() {
    let (_dir, base) = app().await;

    // Warm the cache first
    let resp = reqwest::get(format!("{base}/a.png")).await.unwrap();
    assert_eq!(header(&resp, "x-cache"), Some("MISS"));

    let body: Value = reqwest::get(format!("{base}/s3cret/del?file=a.png"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "success");
    assert_eq!(body["data"]["key"], "pics/a.png");
    assert_eq!(body["data"]["deleted_from"], 2);
    assert_eq!(body["data"]["cache_invalidated"], true);
    assert_eq!(body["data"]["nodes"][0]["outcome"], "deleted");

    let resp = reqwest::get(format!("{base}/a.png")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_needs_file_and_password() {
    let (_dir, base) = app().await;

    let resp = reqwest::get(format!("{base}/s3cret/delete")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = reqwest::get(format!("{base}/del?file=a.png")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "fail");
}

#[tokio::test]
async fn test_admin_purge_clears_cache() {
    let (_dir, base) = app().await;
    reqwest::get(format!("{base}/a.png")).await.unwrap();
    reqwest::get(format!("{base}/notes.txt")).await.unwrap();

    let client = reqwest::Client::new();
    let body: Value = client
        .delete(format!("{base}/admin/purge"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["data"]["entries_deleted"], 2);

    let resp = reqwest::get(format!("{base}/a.png")).await.unwrap();
    assert_eq!(header(&resp, "x-cache"), Some("MISS"));
}

#[tokio::test]
async fn test_from_is_case_insensitive_and_blank_means_race() {
    let (_dir, base) = app().await;

    let resp = reqwest::get(format!("{base}/notes.txt?from=WHERE"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["source"], "gitlab (pic1)");

    let pinned = reqwest::get(format!("{base}/a.png?from=GitHub"))
        .await
        .unwrap();
    assert_eq!(header(&pinned, "x-served-by"), Some("github (pic1)"));

    let first = reqwest::get(format!("{base}/a.png?from=")).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(header(&first, "x-cache"), Some("MISS"));
    let second = reqwest::get(format!("{base}/a.png?from=")).await.unwrap();
    assert_eq!(header(&second, "x-cache"), Some("HIT"));
}

#[tokio::test]
async fn test_where_reports_base_name() {
    let dir = tempfile::tempdir().unwrap();
    let node: Arc<dyn Backend> = Arc::new(
        FakeBackend::new(BackendKind::GitLab, "pic1").with_file("pics/2024/trip/a.png", "png"),
    );
    let base = spawn_app(test_state(&dir, vec![node])).await;

    let body: Value = reqwest::get(format!("{base}/2024/trip/a.png?from=where"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["data"]["file_name"], "a.png");
    assert_eq!(body["data"]["bytes"], 3);
}

#[tokio::test]
async fn test_oversized_bodies_are_served_but_not_cached() {
    let dir = tempfile::tempdir().unwrap();
    // "from-gitlab" is 11 bytes, "hello" is 5
    let state = test_state_with(&dir, nodes(), |config| config.cache.max_object_size = 5);
    let base = spawn_app(state).await;

    for _ in 0..2 {
        let resp = reqwest::get(format!("{base}/a.png")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(header(&resp, "x-cache"), Some("MISS"));
        assert_eq!(resp.text().await.unwrap(), "from-gitlab");
    }

    reqwest::get(format!("{base}/notes.txt")).await.unwrap();
    let small = reqwest::get(format!("{base}/notes.txt")).await.unwrap();
    assert_eq!(header(&small, "x-cache"), Some("HIT"));
}

#[tokio::test]
async fn test_zero_ttl_disables_cache() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state_with(&dir, nodes(), |config| config.cache.ttl_seconds = 0);
    let base = spawn_app(state).await;

    for _ in 0..2 {
        let resp = reqwest::get(format!("{base}/a.png")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(header(&resp, "x-cache"), Some("MISS"));
        assert!(header(&resp, "cache-control")
            .unwrap()
            .contains("no-store"));
    }

    let body: Value = reqwest::get(format!("{base}/s3cret"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["data"]["cache"]["enabled"], false);
}

#[tokio::test]
async fn test_no_nodes_is_a_server_error() {
    let dir = tempfile::tempdir().unwrap();
    let base = spawn_app(test_state(&dir, Vec::new())).await;

    let resp = reqwest::get(format!("{base}/a.png")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "error");
    assert_eq!(body["message"], "No storage nodes are configured");
}

#[tokio::test]
async fn test_copy_cached_during_delete_is_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let node: Arc<dyn Backend> = Arc::new(
        FakeBackend::new(BackendKind::GitLab, "pic1")
            .with_delay_ms(100)
            .with_file("pics/a.png", "png"),
    );
    let state = test_state(&dir, vec![node]);

    let deleting = {
        let state = state.clone();
        tokio::spawn(async move { delete_file(&state, "a.png").await.map(|_| ()) })
    };

    // A fetch that won before the node delete stores its copy mid-flight
    tokio::time::sleep(std::time::Duration::from_millis(30)).await;
    let entry = CacheEntry::new("image/png", 3, "gitlab (pic1)", Utc::now(), 3600);
    state.cache.put_object("pics/a.png", &entry, b"png").unwrap();

    deleting.await.unwrap().unwrap();
    assert!(state
        .cache
        .get_object("pics/a.png", Utc::now())
        .unwrap()
        .is_none());
}
