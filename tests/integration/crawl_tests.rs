//! End-to-end crawl tests against a local HTTP server
//!
//! These tests drive the real `HttpFetcher` and on-disk storage through the
//! coordinator, with wiremock standing in for a fiction site.

use shiori::config::{BookConfig, Config, CrawlerConfig, OutputConfig, SelectorConfig};
use shiori::crawler::{ChapterIdentity, Coordinator, CrawlReport, HttpFetcher};
use shiori::output::{asset_dir, asset_file_name, chapter_dir, chapter_file_name, marker_file_name};
use shiori::storage::{open_storage, RecordKind, RunStatus, SharedStorage, Storage};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const BOOK: &str = "Wandering Inn";

/// Helper to create a test configuration for one book served by `server`
fn create_test_config(server: &MockServer, tmp: &TempDir, retry_budget: u32) -> Config {
    Config {
        crawler: CrawlerConfig {
            retry_budget,
            chapter_timeout: 10_000,
            request_delay: 0,
            asset_workers: 2,
            ..CrawlerConfig::default()
        },
        output: OutputConfig {
            database_path: tmp.path().join("shiori.db").display().to_string(),
        },
        books: vec![BookConfig {
            name: BOOK.to_string(),
            toc_url: format!("{}/toc", server.uri()),
            text_dir: tmp.path().join("text"),
            image_dir: tmp.path().join("images"),
            headers: HashMap::from([("x-reader-token".to_string(), "letmein".to_string())]),
            retry_budget: None,
            chapter_timeout: None,
            request_delay: None,
            host_parallelism: None,
            ignore_failed: None,
            selectors: SelectorConfig {
                volume: Some("div.volume".to_string()),
                volume_title: Some("h2".to_string()),
                volume_listing: Some("a.listing".to_string()),
                chapter_link: "li a".to_string(),
                chapter_title: Some("h1".to_string()),
                content: "div.content".to_string(),
                next_page: Some("a.next-page".to_string()),
                next_chapter: Some("a.next-chapter".to_string()),
                image: Some("div.content img".to_string()),
            },
        }],
    }
}

fn html(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(
        format!("<html><body>{}</body></html>", body),
        "text/html; charset=utf-8",
    )
}

async fn mount_html(server: &MockServer, route: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path(route))
        .and(header("x-reader-token", "letmein"))
        .respond_with(html(body))
        .mount(server)
        .await;
}

/// Two volumes: the first listed inline with an unlinked second chapter,
/// the second on its own listing page with an unresolvable last chapter.
async fn mount_book(server: &MockServer) {
    mount_html(
        server,
        "/toc",
        r#"
        <div class="volume">
          <h2>Arrival</h2>
          <ul><li><a href="/c/1">One</a></li><li><a>Two</a></li></ul>
        </div>
        <div class="volume">
          <h2>Departure</h2>
          <a class="listing" href="/v/2">all chapters</a>
        </div>"#,
    )
    .await;

    mount_html(
        server,
        "/v/2",
        r#"<ul><li><a href="/c/3">Three</a></li><li><a>Four</a></li></ul>"#,
    )
    .await;

    mount_html(
        server,
        "/c/1",
        r#"<h1>One</h1>
        <div class="content"><p>first half</p><img src="/img/map.png"></div>
        <a class="next-page" href="/c/1/2">2</a>"#,
    )
    .await;

    mount_html(
        server,
        "/c/1/2",
        r#"<div class="content"><p>second half</p></div>
        <a class="next-chapter" href="/c/2">next</a>"#,
    )
    .await;

    mount_html(
        server,
        "/c/2",
        r#"<h1>Two</h1><div class="content"><p>two</p></div>"#,
    )
    .await;

    mount_html(
        server,
        "/c/3",
        r#"<h1>Three</h1><div class="content"><p>three</p></div>"#,
    )
    .await;

    Mock::given(method("GET"))
        .and(path("/img/map.png"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(vec![0x89, b'P', b'N', b'G'], "image/png"))
        .mount(server)
        .await;
}

async fn crawl(config: Config, storage: &SharedStorage, ignore_failed: bool) -> CrawlReport {
    let fetcher = HttpFetcher::with_user_agent("shiori-test").expect("Failed to build fetcher");
    Coordinator::new(config, Arc::clone(storage), Arc::new(fetcher), CancellationToken::new())
        .with_config_hash("test")
        .ignore_failed(ignore_failed)
        .run()
        .await
        .expect("Crawl failed")
}

async fn request_count(server: &MockServer, route: &str) -> usize {
    server
        .received_requests()
        .await
        .expect("Request recording disabled")
        .iter()
        .filter(|r| r.url.path() == route)
        .count()
}

fn volume_dir(tmp: &TempDir, index: u32, title: &str) -> PathBuf {
    chapter_dir(&tmp.path().join("text"), BOOK, index, title)
}

#[tokio::test]
async fn test_full_book_crawl() {
    let server = MockServer::start().await;
    mount_book(&server).await;

    let tmp = TempDir::new().expect("Failed to create temp dir");
    let config = create_test_config(&server, &tmp, 1);
    let storage = open_storage(&tmp.path().join("shiori.db")).expect("Failed to open DB");

    let report = crawl(config, &storage, false).await;

    assert!(!report.interrupted);
    assert!(report.failed_books().is_empty());
    assert_eq!(report.saved(), 3);
    assert_eq!(report.failed(), 0);
    assert_eq!(report.books[0].unresolved, vec![ChapterIdentity::new(2, 2)]);

    let arrival = volume_dir(&tmp, 1, "Arrival");
    let one = std::fs::read_to_string(arrival.join(chapter_file_name(1, "One")))
        .expect("Chapter one missing");
    assert!(one.starts_with("<h1>One</h1>\n"));
    let first = one.find("first half").expect("First page missing");
    let second = one.find("second half").expect("Second page missing");
    assert!(first < second);

    let two = std::fs::read_to_string(arrival.join(chapter_file_name(2, "Two")))
        .expect("Chapter two missing");
    assert_eq!(two, "<h1>Two</h1>\n<p>two</p>\n");

    let departure = volume_dir(&tmp, 2, "Departure");
    assert!(departure.join(chapter_file_name(1, "Three")).is_file());
    assert!(!departure.join(chapter_file_name(2, "Four")).exists());

    let image_url = url::Url::parse(&format!("{}/img/map.png", server.uri())).unwrap();
    let image = asset_dir(&tmp.path().join("images"), BOOK).join(asset_file_name(&image_url));
    assert_eq!(std::fs::read(image).expect("Image missing"), vec![0x89, b'P', b'N', b'G']);

    let guard = storage.lock().unwrap();
    assert_eq!(guard.count_records(RecordKind::Chapter).unwrap(), 3);
    assert_eq!(guard.count_records(RecordKind::Asset).unwrap(), 1);
    assert_eq!(guard.count_failed(RecordKind::Chapter).unwrap(), 0);
    let run = guard.get_latest_run().unwrap().expect("Run missing");
    assert_eq!(run.status, RunStatus::Completed);
}

#[tokio::test]
async fn test_second_run_fetches_no_saved_chapter() {
    let server = MockServer::start().await;
    mount_book(&server).await;

    let tmp = TempDir::new().expect("Failed to create temp dir");
    let storage = open_storage(&tmp.path().join("shiori.db")).expect("Failed to open DB");

    let first = crawl(create_test_config(&server, &tmp, 1), &storage, false).await;
    assert_eq!(first.saved(), 3);

    let second = crawl(create_test_config(&server, &tmp, 1), &storage, false).await;
    assert_eq!(second.saved(), 0);
    assert_eq!(second.skipped(), 3);

    // the table of contents and listing are read every run; chapters only once
    assert_eq!(request_count(&server, "/toc").await, 2);
    assert_eq!(request_count(&server, "/v/2").await, 2);
    for route in ["/c/1", "/c/1/2", "/c/2", "/c/3", "/img/map.png"] {
        assert_eq!(request_count(&server, route).await, 1, "{} fetched again", route);
    }
}

#[tokio::test]
async fn test_server_error_exhausts_retry_budget() {
    let server = MockServer::start().await;
    mount_html(
        &server,
        "/toc",
        r#"<div class="volume"><h2>Arrival</h2><ul><li><a href="/c/1">One</a></li></ul></div>"#,
    )
    .await;

    Mock::given(method("GET"))
        .and(path("/c/1"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let tmp = TempDir::new().expect("Failed to create temp dir");
    let storage = open_storage(&tmp.path().join("shiori.db")).expect("Failed to open DB");

    let report = crawl(create_test_config(&server, &tmp, 2), &storage, false).await;

    assert_eq!(report.failed(), 1);
    assert_eq!(report.saved(), 0);

    let marker = volume_dir(&tmp, 1, "Arrival").join(marker_file_name(&chapter_file_name(1, "One")));
    let text = std::fs::read_to_string(marker).expect("Failure marker missing");
    assert!(text.starts_with(&format!("{}/c/1", server.uri())));
    assert!(text.contains("500"));

    server.verify().await;
}

#[tokio::test]
async fn test_missing_chapter_is_not_retried() {
    let server = MockServer::start().await;
    mount_html(
        &server,
        "/toc",
        r#"<div class="volume"><h2>Arrival</h2><ul><li><a href="/c/1">One</a></li></ul></div>"#,
    )
    .await;

    Mock::given(method("GET"))
        .and(path("/c/1"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let tmp = TempDir::new().expect("Failed to create temp dir");
    let storage = open_storage(&tmp.path().join("shiori.db")).expect("Failed to open DB");

    let report = crawl(create_test_config(&server, &tmp, 3), &storage, false).await;

    assert_eq!(report.failed(), 1);
    server.verify().await;
}

#[tokio::test]
async fn test_ignore_failed_skips_marked_chapter() {
    let server = MockServer::start().await;
    mount_html(
        &server,
        "/toc",
        r#"<div class="volume"><h2>Arrival</h2><ul><li><a href="/c/1">One</a></li></ul></div>"#,
    )
    .await;

    Mock::given(method("GET"))
        .and(path("/c/1"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let tmp = TempDir::new().expect("Failed to create temp dir");
    let storage = open_storage(&tmp.path().join("shiori.db")).expect("Failed to open DB");

    let first = crawl(create_test_config(&server, &tmp, 0), &storage, false).await;
    assert_eq!(first.failed(), 1);
    assert_eq!(request_count(&server, "/c/1").await, 1);

    let ignored = crawl(create_test_config(&server, &tmp, 0), &storage, true).await;
    assert_eq!(ignored.skipped(), 1);
    assert_eq!(request_count(&server, "/c/1").await, 1);

    // without the flag the chapter is attempted again
    let retried = crawl(create_test_config(&server, &tmp, 0), &storage, false).await;
    assert_eq!(retried.failed(), 1);
    assert_eq!(request_count(&server, "/c/1").await, 2);
}

#[tokio::test]
async fn test_unreachable_table_of_contents_fails_book() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/toc"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let tmp = TempDir::new().expect("Failed to create temp dir");
    let storage = open_storage(&tmp.path().join("shiori.db")).expect("Failed to open DB");

    let report = crawl(create_test_config(&server, &tmp, 0), &storage, false).await;

    assert_eq!(report.failed_books(), vec![BOOK]);
    assert_eq!(report.saved(), 0);
    let run = storage.lock().unwrap().get_latest_run().unwrap().expect("Run missing");
    assert_eq!(run.status, RunStatus::Failed);
}

#[tokio::test]
async fn test_host_queue_deeper_than_chapter_timeout() {
    let server = MockServer::start().await;
    let links: String = (1..=12)
        .map(|n| format!(r#"<li><a href="/c/{n}">Chapter {n}</a></li>"#))
        .collect();
    mount_html(
        &server,
        "/toc",
        &format!(r#"<div class="volume"><h2>Arrival</h2><ul>{}</ul></div>"#, links),
    )
    .await;
    for n in 1..=12 {
        mount_html(
            &server,
            &format!("/c/{}", n),
            &format!(r#"<h1>Chapter {n}</h1><div class="content"><p>{n}</p></div>"#),
        )
        .await;
    }

    let tmp = TempDir::new().expect("Failed to create temp dir");
    let mut config = create_test_config(&server, &tmp, 0);
    // twelve requests 200ms apart take well over one timeout window
    config.crawler.request_delay = 200;
    config.crawler.host_parallelism = 1;
    config.crawler.chapter_timeout = 1_000;
    let storage = open_storage(&tmp.path().join("shiori.db")).expect("Failed to open DB");

    let report = crawl(config, &storage, false).await;

    assert_eq!(report.failed(), 0);
    assert_eq!(report.saved(), 12);
    let arrival = volume_dir(&tmp, 1, "Arrival");
    assert!(arrival.join(chapter_file_name(12, "Chapter 12")).is_file());
}
