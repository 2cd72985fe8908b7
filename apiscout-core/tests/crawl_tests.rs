// Tests for the crawl driver against a mock HTTP server

use apiscout_core::crawl::{CrawlOptions, execute_crawl};
use apiscout_core::data::{Database, SessionStatus};
use apiscout_scanner::{CompiledConfig, ScanConfig, ScanError};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn create_test_db() -> (TempDir, Database) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");
    let db = Database::new(&db_path).unwrap();
    (temp_dir, db)
}

fn test_config(respect_robots: bool) -> CompiledConfig {
    let mut config = ScanConfig::default();
    config.crawl.page_delay_ms = 0;
    config.crawl.respect_robots = respect_robots;
    config.detection.min_json_size = 10;
    config.compile().unwrap()
}

fn options(url: String, config: CompiledConfig) -> CrawlOptions {
    CrawlOptions {
        url,
        config,
        show_progress_bars: false,
    }
}

async fn mount_html(server: &MockServer, route: &str, html: &str) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html")
                .set_body_bytes(html.as_bytes().to_vec()),
        )
        .mount(server)
        .await;
}

async fn mount_json(server: &MockServer, route: &str, json: &str) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/json")
                .set_body_bytes(json.as_bytes().to_vec()),
        )
        .mount(server)
        .await;
}

// ============================================================================
// End-to-end Crawl Tests
// ============================================================================

#[tokio::test]
async fn test_crawl_records_endpoints_and_session() {
    let server = MockServer::start().await;
    mount_html(
        &server,
        "/",
        r#"<html><body>
            <a href="/api/users">Users</a>
            <a href="/about">About</a>
        </body></html>"#,
    )
    .await;
    mount_json(
        &server,
        "/api/users",
        r#"{"users": [{"id": 7, "email": "jane@example.com"}]}"#,
    )
    .await;
    mount_html(&server, "/about", "<html><body>About us</body></html>").await;

    let (_temp_dir, db) = create_test_db();
    let cancel = Arc::new(AtomicBool::new(false));

    let report = execute_crawl(
        options(format!("{}/", server.uri()), test_config(false)),
        &db,
        cancel,
    )
    .await
    .unwrap();

    assert!(!report.summary.cancelled);
    assert_eq!(report.summary.pages_visited, 3);
    assert_eq!(report.summary.exchanges_captured, 1);

    let session = db.get_session(&report.session_id).unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.pages_crawled, 3);
    assert_eq!(session.apis_found, 1);

    let endpoints = db.get_all_endpoints().unwrap();
    assert_eq!(endpoints.len(), 1);
    assert!(endpoints[0].url.ends_with("/api/users"));
    assert_eq!(endpoints[0].method, "GET");
    assert_eq!(endpoints[0].call_count, 1);

    let calls = db.get_calls_for_endpoint(endpoints[0].id).unwrap();
    assert_eq!(calls.len(), 1);
    let email = calls[0].response_body["users"][0]["email"].as_str().unwrap();
    assert_ne!(email, "jane@example.com");
    assert_eq!(email.len(), "jane@example.com".len());
    assert_eq!(calls[0].response_body["users"][0]["id"], 7);
}

#[tokio::test]
async fn test_crawl_respects_robots_txt() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "User-agent: *\nDisallow: /private\n",
        ))
        .mount(&server)
        .await;
    mount_html(
        &server,
        "/",
        r#"<html><body>
            <a href="/private/api/keys">Keys</a>
            <a href="/api/public">Public</a>
        </body></html>"#,
    )
    .await;
    mount_json(&server, "/api/public", r#"{"items": [1, 2, 3], "total": 3}"#).await;
    Mock::given(method("GET"))
        .and(path("/private/api/keys"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
        .expect(0)
        .mount(&server)
        .await;

    let (_temp_dir, db) = create_test_db();
    let report = execute_crawl(
        options(server.uri(), test_config(true)),
        &db,
        Arc::new(AtomicBool::new(false)),
    )
    .await
    .unwrap();

    assert_eq!(report.summary.pages_visited, 2);
    let urls: Vec<String> = db
        .get_all_endpoints()
        .unwrap()
        .into_iter()
        .map(|e| e.url)
        .collect();
    assert_eq!(urls.len(), 1);
    assert!(urls[0].ends_with("/api/public"));
}

#[tokio::test]
async fn test_repeat_crawl_counts_calls() {
    let server = MockServer::start().await;
    mount_json(&server, "/api/status", r#"{"status": "ok", "uptime": 1234}"#).await;

    let (_temp_dir, db) = create_test_db();
    let url = format!("{}/api/status", server.uri());

    for _ in 0..2 {
        execute_crawl(
            options(url.clone(), test_config(false)),
            &db,
            Arc::new(AtomicBool::new(false)),
        )
        .await
        .unwrap();
    }

    let endpoints = db.get_all_endpoints().unwrap();
    assert_eq!(endpoints.len(), 1);
    assert_eq!(endpoints[0].call_count, 2);
    assert_eq!(db.get_calls_for_endpoint(endpoints[0].id).unwrap().len(), 2);
}

// ============================================================================
// Cancellation and Error Tests
// ============================================================================

#[tokio::test]
async fn test_cancelled_crawl_marks_session() {
    let server = MockServer::start().await;
    mount_html(&server, "/", "<html><body>Home</body></html>").await;

    let (_temp_dir, db) = create_test_db();
    let report = execute_crawl(
        options(server.uri(), test_config(false)),
        &db,
        Arc::new(AtomicBool::new(true)),
    )
    .await
    .unwrap();

    assert!(report.summary.cancelled);
    assert_eq!(report.summary.pages_visited, 0);

    let session = db.get_session(&report.session_id).unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Cancelled);
    assert!(db.get_all_endpoints().unwrap().is_empty());
}

#[tokio::test]
async fn test_invalid_url_is_rejected() {
    let (_temp_dir, db) = create_test_db();
    let result = execute_crawl(
        options("not a url".to_string(), test_config(false)),
        &db,
        Arc::new(AtomicBool::new(false)),
    )
    .await;

    assert!(matches!(result, Err(ScanError::InvalidUrl(_))));
}
