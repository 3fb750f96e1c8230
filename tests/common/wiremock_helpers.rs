use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};
use std::time::Duration;

/// Mounts a search-results page for one lookup term on `server`.
///
/// Matches GET `/index.php` with the decoded `em` term and `year`, so callers
/// assert on the exact term the resolver sends. `expected_calls` is verified
/// when the server drops.
pub async fn mount_lookup_page(server: &MockServer, term: &str, year: u32, html: &str, expected_calls: u64) {
    Mock::given(method("GET"))
        .and(path("/index.php"))
        .and(query_param("em", term))
        .and(query_param("year", year.to_string()))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(html.to_string())
                .insert_header("content-type", "text/html; charset=utf-8"),
        )
        .expect(expected_calls)
        .mount(server)
        .await;
}

/// Creates a mock listing site serving `html` for the term `term`.
pub async fn mock_lookup_page(term: &str, year: u32, html: &str) -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/index.php"))
        .and(query_param("em", term))
        .and(query_param("year", year.to_string()))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(html.to_string())
                .insert_header("content-type", "text/html; charset=utf-8"),
        )
        .mount(&server)
        .await;

    server
}

/// Creates a mock HTTP server that delays responses to simulate network timeouts.
pub async fn mock_timeout_server(delay_ms: u64) -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("delayed response")
                .set_delay(Duration::from_millis(delay_ms)),
        )
        .mount(&server)
        .await;

    server
}

/// Creates a mock HTTP server that returns the specified HTTP error status code.
pub async fn mock_error_server(status_code: u16) -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(status_code))
        .mount(&server)
        .await;

    server
}
