//! End-to-end single-feed fetches through `RssFetcher` and the real HTTP
//! transport, against a local mock server.

use feedpull::{Config, FetchError, RssFetcher};
use pretty_assertions::assert_eq;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Integration Feed</title>
    <link>https://example.com/</link>
    <description>Feed served by the mock server</description>
    <item>
      <title>Hello</title>
      <link>https://example.com/hello</link>
      <pubDate>Tue, 07 Jan 2025 08:30:00 GMT</pubDate>
      <description>First entry</description>
    </item>
  </channel>
</rss>"#;

fn rss_response() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(RSS, "application/rss+xml")
}

fn config() -> Config {
    Config {
        user_agents: vec!["agent-one".to_string(), "agent-two".to_string()],
        request_timeout_secs: 5,
        ..Config::default()
    }
}

#[tokio::test]
async fn test_fetch_feed_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .respond_with(rss_response())
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = RssFetcher::from_config(&config()).unwrap();
    let outcome = fetcher
        .fetch_feed(&format!("{}/feed.xml", server.uri()))
        .await;

    let feed = outcome.feed().expect("feed should be fetched");
    assert_eq!(feed.title(), Some("Integration Feed"));
    assert_eq!(feed.entry_count(), 1);
    assert!(!feed.malformed);
}

#[tokio::test]
async fn test_blocked_request_rotates_user_agent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header("user-agent", "agent-one"))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(header("user-agent", "agent-two"))
        .respond_with(rss_response())
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = RssFetcher::from_config(&config()).unwrap();
    let outcome = fetcher.fetch_feed(&format!("{}/feed", server.uri())).await;

    assert!(outcome.is_success(), "{:?}", outcome.error());
}

#[tokio::test]
async fn test_not_found_is_terminal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = RssFetcher::from_config(&config()).unwrap();
    let outcome = fetcher.fetch_feed(&format!("{}/missing", server.uri())).await;

    assert_eq!(outcome.error(), Some(&FetchError::NotFound(404)));
}

#[tokio::test]
async fn test_server_error_retried_until_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(rss_response())
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = RssFetcher::from_config(&config()).unwrap();
    let outcome = fetcher.fetch_feed(&format!("{}/flaky", server.uri())).await;

    assert!(outcome.is_success());
}

#[tokio::test]
async fn test_cache_hit_makes_no_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(rss_response())
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = RssFetcher::from_config(&config()).unwrap();
    let url = format!("{}/cached", server.uri());

    assert!(fetcher.fetch_feed(&url).await.is_success());
    assert!(fetcher.fetch_feed(&url).await.is_success());
    assert_eq!(fetcher.cache().len(), 1);
    assert_eq!(fetcher.limiter().admitted_total(), 1);
}

#[tokio::test]
async fn test_request_can_bypass_cache() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(rss_response())
        .expect(2)
        .mount(&server)
        .await;

    let fetcher = RssFetcher::from_config(&config()).unwrap();
    let url = format!("{}/fresh", server.uri());

    assert!(fetcher.fetch_feed(&url).await.is_success());
    let request = fetcher.request(&url).use_cache(false);
    assert!(fetcher.fetch(&request).await.is_success());
}

#[tokio::test]
async fn test_html_page_is_parse_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw("<html><body>Not a feed</body></html>", "text/html"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = RssFetcher::from_config(&config()).unwrap();
    let outcome = fetcher.fetch_feed(&format!("{}/page", server.uri())).await;

    assert!(matches!(outcome.error(), Some(FetchError::Parse(_))));
    assert!(fetcher.cache().is_empty());
}

#[tokio::test]
async fn test_fetch_then_export_json() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(rss_response())
        .mount(&server)
        .await;

    let fetcher = RssFetcher::from_config(&config()).unwrap();
    let outcome = fetcher.fetch_feed(&format!("{}/feed", server.uri())).await;
    let feed = outcome.feed().expect("feed should be fetched");

    let dir = std::env::temp_dir().join("feedpull_it_export");
    std::fs::create_dir_all(&dir).unwrap();
    let out = dir.join("feed.json");
    fetcher.export_to_json(feed, &out).unwrap();

    let value: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
    assert_eq!(value["feed_info"]["title"], "Integration Feed");
    assert_eq!(value["feed_info"]["link"], "https://example.com/");
    assert_eq!(value["entries"][0]["title"], "Hello");
    assert_eq!(value["entries"][0]["published"], "2025-01-07T08:30:00Z");
    assert_eq!(value["entries"][0]["summary"], "First entry");

    std::fs::remove_dir_all(&dir).ok();
}
