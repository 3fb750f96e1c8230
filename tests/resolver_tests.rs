mod common;

use chrono::NaiveDate;
use std::sync::Arc;
use std::time::Duration;
use wiremock::MockServer;

use common::fixtures::{filing_row, results_page};
use common::wiremock_helpers::{mock_error_server, mock_lookup_page, mock_timeout_server, mount_lookup_page};
use h1bfilter::clock::ManualClock;
use h1bfilter::normalizer::normalize;
use h1bfilter::resolver::{FailureReason, HttpResolver, LookupSource, Resolve, ResolutionFailure};

const YEAR: u32 = 2024;

fn resolver_for(server: &MockServer, today: NaiveDate, timeout: Duration) -> HttpResolver {
    HttpResolver::new(
        LookupSource {
            base_url: server.uri(),
            year: YEAR,
        },
        "h1bfilter-tests",
        timeout,
        Arc::new(ManualClock::at_date(today)),
    )
    .expect("client should build")
}

fn june_first() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
}

#[tokio::test]
async fn test_meta_lookup_uses_override_term() {
    let html = results_page(&[filing_row("META PLATFORMS INC", "01/15/2024")]);
    let server = mock_lookup_page("meta platforms", YEAR, &html).await;
    let resolver = resolver_for(&server, june_first(), Duration::from_secs(5));

    let verdict = resolver.resolve(&normalize(" Meta ")).await.unwrap();
    assert!(verdict.is_sponsor);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].url.query().unwrap().contains("em=meta+platforms"));
}

#[tokio::test]
async fn test_amazon_entity_folds_to_trailing_space_term() {
    let html = results_page(&[filing_row("AMAZON.COM SERVICES LLC", "11/20/2023")]);
    let server = mock_lookup_page("amazon ", YEAR, &html).await;
    let resolver = resolver_for(&server, june_first(), Duration::from_secs(5));

    let verdict = resolver.resolve(&normalize("Amazon.com Services LLC")).await.unwrap();
    assert!(verdict.is_sponsor);

    let requests = server.received_requests().await.unwrap();
    assert!(requests[0].url.query().unwrap().contains("em=amazon+&"));
}

#[tokio::test]
async fn test_old_filing_is_not_recent() {
    let html = results_page(&[
        filing_row("ACME ROBOTICS", "05/01/2023"),
        filing_row("ACME ROBOTICS", "05/01/2024"),
    ]);
    let server = mock_lookup_page("acme robotics", YEAR, &html).await;
    let resolver = resolver_for(&server, june_first(), Duration::from_secs(5));

    // only the first data row counts
    let verdict = resolver.resolve(&normalize("Acme Robotics")).await.unwrap();
    assert!(!verdict.is_sponsor);
}

#[tokio::test]
async fn test_resolved_at_comes_from_clock() {
    let html = results_page(&[filing_row("STRIPE INC", "02/02/2024")]);
    let server = mock_lookup_page("stripe", YEAR, &html).await;
    let resolver = resolver_for(&server, june_first(), Duration::from_secs(5));

    let verdict = resolver.resolve(&normalize("Stripe")).await.unwrap();
    assert_eq!(verdict.resolved_at.date_naive(), june_first());
}

#[tokio::test]
async fn test_server_error_is_fetch_failure() {
    let server = mock_error_server(503).await;
    let resolver = resolver_for(&server, june_first(), Duration::from_secs(5));

    let failure = resolver.resolve(&normalize("Stripe")).await.unwrap_err();
    assert!(matches!(failure, ResolutionFailure::Fetch { status: Some(503), .. }));
    assert_eq!(failure.reason(), FailureReason::FetchError);
}

#[tokio::test]
async fn test_timeout_is_fetch_failure_without_status() {
    let server = mock_timeout_server(2_000).await;
    let resolver = resolver_for(&server, june_first(), Duration::from_millis(100));

    let failure = resolver.resolve(&normalize("Stripe")).await.unwrap_err();
    assert!(matches!(failure, ResolutionFailure::Fetch { status: None, .. }));
}

#[tokio::test]
async fn test_empty_results_is_no_data() {
    let server = mock_lookup_page("unknown startup", YEAR, &results_page(&[])).await;
    let resolver = resolver_for(&server, june_first(), Duration::from_secs(5));

    let failure = resolver.resolve(&normalize("Unknown Startup")).await.unwrap_err();
    assert_eq!(failure, ResolutionFailure::NoData);
}

#[tokio::test]
async fn test_unparseable_date_is_bad_date() {
    let html = results_page(&[filing_row("ACME", "13/45/2024")]);
    let server = mock_lookup_page("acme", YEAR, &html).await;
    let resolver = resolver_for(&server, june_first(), Duration::from_secs(5));

    let failure = resolver.resolve(&normalize("ACME")).await.unwrap_err();
    assert_eq!(failure.reason(), FailureReason::BadDate);
}

#[tokio::test]
async fn test_empty_key_is_looked_up_once() {
    let server = MockServer::start().await;
    mount_lookup_page(&server, "", YEAR, &results_page(&[]), 1).await;
    let resolver = resolver_for(&server, june_first(), Duration::from_secs(5));

    let failure = resolver.resolve(&normalize("   ")).await.unwrap_err();
    assert_eq!(failure, ResolutionFailure::NoData);
}

#[tokio::test]
async fn test_each_resolve_issues_one_request() {
    let server = MockServer::start().await;
    let html = results_page(&[filing_row("STRIPE INC", "02/02/2024")]);
    mount_lookup_page(&server, "stripe", YEAR, &html, 2).await;
    let resolver = resolver_for(&server, june_first(), Duration::from_secs(5));

    // the resolver keeps no memory of its own
    resolver.resolve(&normalize("Stripe")).await.unwrap();
    resolver.resolve(&normalize("stripe")).await.unwrap();
}
