//! Integration tests for the SQLite dedup store on disk.
//!
//! Each test uses its own directory under the system temp dir so reopened
//! stores see exactly the records the test wrote.

use rss_relay::reader::{FeedRegistration, ReaderOptions, RssReader};
use rss_relay::storage::{DedupStore, SqliteStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

const DAY: Duration = Duration::from_secs(24 * 3600);

fn temp_db(name: &str) -> (PathBuf, String) {
    let dir = std::env::temp_dir().join(format!("rss_relay_store_test_{name}"));
    std::fs::remove_dir_all(&dir).ok();
    std::fs::create_dir_all(&dir).unwrap();
    let db = dir.join("dedup.db").to_string_lossy().into_owned();
    (dir, db)
}

fn rss(guids: &[&str]) -> String {
    let items: String = guids
        .iter()
        .map(|g| format!("<item><guid>{g}</guid><title>{g}</title></item>"))
        .collect();
    format!(r#"<?xml version="1.0"?><rss version="2.0"><channel><title>T</title>{items}</channel></rss>"#)
}

#[tokio::test]
async fn test_records_survive_reopen() {
    let (dir, db) = temp_db("reopen");

    let store = SqliteStore::open(&db).await.unwrap();
    store.set("rss_reader:seen:feed:a", b"{}", DAY).await.unwrap();
    store.set("short", b"x", Duration::ZERO).await.unwrap();
    store.close().await;

    let reopened = SqliteStore::open(&db).await.unwrap();
    assert_eq!(
        reopened.get("rss_reader:seen:feed:a").await.unwrap().as_deref(),
        Some(&b"{}"[..])
    );
    assert!(reopened.get("short").await.unwrap().is_none());
    assert_eq!(reopened.len().await.unwrap(), 1);
    assert_eq!(reopened.evict_expired().await.unwrap(), 1);
    reopened.close().await;

    std::fs::remove_dir_all(&dir).ok();
}

#[tokio::test]
async fn test_open_in_missing_directory_fails() {
    let result = SqliteStore::open("/nonexistent-dir/rss-relay/dedup.db").await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_restart_resumes_without_bootstrap() {
    let (dir, db) = temp_db("restart");
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(rss(&["a"])))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(rss(&["b", "a"])))
        .mount(&server)
        .await;
    let url = format!("{}/rss", server.uri());

    // First run: establishes the baseline, then shuts down.
    {
        let store = SqliteStore::open(&db).await.unwrap();
        let reader = RssReader::new(Arc::new(store.clone()), ReaderOptions::default()).unwrap();
        let first = reader
            .start_parsing(
                FeedRegistration::new(&url, Duration::from_secs(60)),
                CancellationToken::new(),
            )
            .await
            .unwrap()
            .first_cycle
            .unwrap();
        assert!(first.bootstrapped);
        reader.stop().await.unwrap();
        store.close().await;
    }

    // Second run: "b" appeared while the process was down and is delivered.
    let store = SqliteStore::open(&db).await.unwrap();
    let reader = RssReader::new(Arc::new(store.clone()), ReaderOptions::default()).unwrap();
    let mut output = reader.take_output().unwrap();
    let second = reader
        .start_parsing(
            FeedRegistration::new(&url, Duration::from_secs(60)),
            CancellationToken::new(),
        )
        .await
        .unwrap()
        .first_cycle
        .unwrap();
    assert!(!second.bootstrapped);
    assert_eq!(second.emitted, 1);
    assert_eq!(second.skipped, 1);
    assert_eq!(output.try_recv().unwrap().guid, "b");

    reader.stop().await.unwrap();
    store.close().await;
    std::fs::remove_dir_all(&dir).ok();
}
