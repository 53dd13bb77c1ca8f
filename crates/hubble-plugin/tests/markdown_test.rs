use reqwest::Client;
use wiremock::matchers::{header_regex, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use hubble_core::Error;
use hubble_plugin::url_to_markdown;

#[tokio::test]
async fn test_url_to_markdown_fetches_main_content() {
    let server = MockServer::start().await;
    let page = r#"<html><head><title>Post</title></head><body>
        <nav><a href="/">Home</a></nav>
        <main><h1>Release</h1><p>See <a href="/changelog">the changelog</a>.</p></main>
    </body></html>"#;
    Mock::given(method("GET"))
        .and(path("/post"))
        .and(header_regex("user-agent", "^Mozilla/5.0"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page))
        .mount(&server)
        .await;

    // The mock server listens on 127.0.0.1, which has a dotted host.
    let url = format!("{}/post", server.uri());
    let markdown = url_to_markdown(&Client::new(), &url).await.unwrap();

    assert_eq!(
        markdown,
        format!("# Release\n\nSee [the changelog]({}/changelog).", server.uri())
    );
}

#[tokio::test]
async fn test_url_to_markdown_rejects_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let err = url_to_markdown(&Client::new(), &format!("{}/broken", server.uri()))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Request(ref msg) if msg.contains("500")), "{err:?}");
}

#[tokio::test]
async fn test_url_to_markdown_rejects_invalid_url() {
    let err = url_to_markdown(&Client::new(), "ftp://example.com/file")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}
