//! Status server tests: the router is served on a free port over a temp
//! SQLite repository and queried with reqwest.

use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;

use crawl_sieve::config::DbConfig;
use crawl_sieve::models::{Item, Verdict};
use crawl_sieve::repository::{Repository, SqliteRepository};
use crawl_sieve::server;

async fn start(tmp: &TempDir) -> String {
    let repo = SqliteRepository::connect(&DbConfig {
        path: tmp.path().join("sieve.sqlite"),
    })
    .await
    .unwrap();

    let mut passed = Item::new("p1", "Kept", "relevant content");
    passed.processed = true;
    passed.filter_result = Some(Verdict::new(true, "on topic").unwrap());

    let mut rejected = Item::new("p2", "Dropped", "noise");
    rejected.processed = true;
    rejected.filter_result = Some(Verdict::new(false, "off topic").unwrap());

    let mut errored = Item::new("p3", "Broken", "timeout");
    errored.filter_result = Some(Verdict::failure("LLM request failed"));

    repo.upsert(&[passed, rejected, errored]).await.unwrap();

    let app = server::router(Arc::new(repo));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    format!("http://{}", addr)
}

async fn get_json(url: &str) -> (u16, Value) {
    let resp = reqwest::get(url).await.unwrap();
    let status = resp.status().as_u16();
    (status, resp.json().await.unwrap())
}

#[tokio::test]
async fn test_health() {
    let tmp = TempDir::new().unwrap();
    let base = start(&tmp).await;

    let (status, body) = get_json(&format!("{}/health", base)).await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_stats() {
    let tmp = TempDir::new().unwrap();
    let base = start(&tmp).await;

    let (status, body) = get_json(&format!("{}/stats", base)).await;
    assert_eq!(status, 200);
    assert_eq!(body["total"], 3);
    assert_eq!(body["processed"], 2);
    assert_eq!(body["passed"], 1);
    assert_eq!(body["failed"], 2);
}

#[tokio::test]
async fn test_get_item_and_not_found() {
    let tmp = TempDir::new().unwrap();
    let base = start(&tmp).await;

    let (status, body) = get_json(&format!("{}/items/p1", base)).await;
    assert_eq!(status, 200);
    assert_eq!(body["title"], "Kept");
    assert_eq!(body["filter_result"]["passed"], true);

    let (status, body) = get_json(&format!("{}/items/nope", base)).await;
    assert_eq!(status, 404);
    assert_eq!(body["error"]["code"], "not_found");
    assert!(body["error"]["message"].as_str().unwrap().contains("nope"));
}

#[tokio::test]
async fn test_list_items_filters() {
    let tmp = TempDir::new().unwrap();
    let base = start(&tmp).await;

    let (status, body) = get_json(&format!("{}/items", base)).await;
    assert_eq!(status, 200);
    assert_eq!(body["items"].as_array().unwrap().len(), 3);
    assert_eq!(body["limit"], 50);
    assert_eq!(body["offset"], 0);

    let (_, body) = get_json(&format!("{}/items?passed=true", base)).await;
    let items = body["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["id"], "p1");

    let (_, body) = get_json(&format!("{}/items?processed=false", base)).await;
    let items = body["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["id"], "p3");

    let (_, body) = get_json(&format!("{}/items?limit=1&offset=1", base)).await;
    assert_eq!(body["items"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_list_items_rejects_bad_paging() {
    let tmp = TempDir::new().unwrap();
    let base = start(&tmp).await;

    let (status, body) = get_json(&format!("{}/items?limit=0", base)).await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "bad_request");

    let (status, _) = get_json(&format!("{}/items?limit=501", base)).await;
    assert_eq!(status, 400);

    let (status, body) = get_json(&format!("{}/items?offset=-1", base)).await;
    assert_eq!(status, 400);
    assert!(body["error"]["message"].as_str().unwrap().contains("offset"));
}
