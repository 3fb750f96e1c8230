//! Sponsorship resolution against the public H-1B filing listing.
//!
//! The listing site has no API. A lookup fetches its HTML search results for a
//! company and reads the submit date out of the first data row:
//! - Build `index.php?em=<term>&year=<year>` for the company key
//! - Fetch once, no retries (retrying is the orchestrator's call)
//! - First `<tr>` with `<td>` cells outside `<thead>` is the data row
//! - Column 4 holds the submit date as `month/day/year`
//! - Recent means within 365 days of today in either direction
//!
//! Every failure comes back as a typed [`ResolutionFailure`]; nothing here
//! panics or surfaces transport errors any other way.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::clock::Clock;
use crate::config::SourceConfig;
use crate::normalizer::CompanyKey;

/// Zero-based column of the submit date in a result row.
pub const SUBMIT_DATE_COLUMN: usize = 4;

/// A filing is recent when it is strictly fewer than this many days from today.
pub const RECENT_WINDOW_DAYS: i64 = 365;

// Safety: selector strings are constants and always parse.
static ROW_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("tr").unwrap()
});

static DATA_CELL_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("td").unwrap()
});

/// Outcome of a successful lookup. Immutable once produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SponsorshipVerdict {
    /// Filed a sponsorship record within the trailing 365 days
    pub is_sponsor: bool,
    /// When the lookup completed
    pub resolved_at: DateTime<Utc>,
}

/// Why a lookup did not produce a verdict.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionFailure {
    #[error("lookup request failed: {message}")]
    Fetch { status: Option<u16>, message: String },

    #[error("lookup response contains no data rows")]
    NoData,

    #[error("first data row has {cells} cells, expected at least {expected}")]
    MalformedRow { cells: usize, expected: usize },

    #[error("submit date '{text}' is not month/day/year")]
    BadDate { text: String },
}

impl ResolutionFailure {
    pub fn reason(&self) -> FailureReason {
        match self {
            ResolutionFailure::Fetch { .. } => FailureReason::FetchError,
            ResolutionFailure::NoData => FailureReason::NoData,
            ResolutionFailure::MalformedRow { .. } => FailureReason::MalformedRow,
            ResolutionFailure::BadDate { .. } => FailureReason::BadDate,
        }
    }

    /// Transport and HTTP status failures; the only kind worth retrying.
    pub fn is_fetch(&self) -> bool {
        matches!(self, ResolutionFailure::Fetch { .. })
    }
}

/// Stable, serializable failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureReason {
    FetchError,
    NoData,
    MalformedRow,
    BadDate,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::FetchError => "fetch-error",
            FailureReason::NoData => "no-data",
            FailureReason::MalformedRow => "malformed-row",
            FailureReason::BadDate => "bad-date",
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Anything that can turn a company key into a verdict.
#[async_trait]
pub trait Resolve: Send + Sync {
    async fn resolve(&self, key: &CompanyKey) -> Result<SponsorshipVerdict, ResolutionFailure>;
}

/// Where lookups are sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupSource {
    /// Scheme and host, e.g. `https://h1bdata.info`
    pub base_url: String,
    /// Filing year queried
    pub year: u32,
}

impl Default for LookupSource {
    fn default() -> Self {
        Self {
            base_url: "https://h1bdata.info".to_string(),
            year: 2024,
        }
    }
}

/// Search term for a key. Two high-volume employers file under a name that
/// differs from their canonical key.
pub fn lookup_term(key: &CompanyKey) -> &str {
    match key.as_str() {
        "meta" => "meta platforms",
        // trailing space keeps "amazon" from prefix-matching unrelated filers
        "amazon" => "amazon ",
        other => other,
    }
}

/// Build the lookup URL. The term is form-encoded, so spaces become `+`.
pub fn build_lookup_url(source: &LookupSource, key: &CompanyKey) -> Result<Url, ResolutionFailure> {
    let endpoint = format!("{}/index.php", source.base_url.trim_end_matches('/'));
    let year = source.year.to_string();

    Url::parse_with_params(&endpoint, &[("em", lookup_term(key)), ("year", year.as_str())])
        .map_err(|e| ResolutionFailure::Fetch {
            status: None,
            message: format!("invalid lookup URL '{}': {}", endpoint, e),
        })
}

/// Pull the submit-date text out of the first data row of a result page.
pub fn extract_submit_date(html: &str) -> Result<String, ResolutionFailure> {
    let document = Html::parse_document(html);

    let row = document
        .select(&ROW_SELECTOR)
        .filter(|row| !in_table_head(row))
        .find(|row| row.select(&DATA_CELL_SELECTOR).next().is_some())
        .ok_or(ResolutionFailure::NoData)?;

    let cells: Vec<String> = row
        .select(&DATA_CELL_SELECTOR)
        .map(|cell| cell.text().collect::<String>().trim().to_string())
        .collect();

    match cells.get(SUBMIT_DATE_COLUMN) {
        Some(date) => Ok(date.clone()),
        None => Err(ResolutionFailure::MalformedRow {
            cells: cells.len(),
            expected: SUBMIT_DATE_COLUMN + 1,
        }),
    }
}

fn in_table_head(row: &ElementRef<'_>) -> bool {
    row.ancestors()
        .filter_map(ElementRef::wrap)
        .any(|el| el.value().name() == "thead")
}

/// Parse `month/day/year`. Every component must be a positive integer and
/// the result a real calendar date.
pub fn parse_submit_date(text: &str) -> Result<NaiveDate, ResolutionFailure> {
    let bad_date = || ResolutionFailure::BadDate { text: text.to_string() };

    let parts: Vec<&str> = text.trim().split('/').collect();
    if parts.len() != 3 {
        return Err(bad_date());
    }

    let mut numbers = [0u32; 3];
    for (slot, part) in numbers.iter_mut().zip(&parts) {
        *slot = part.trim().parse::<u32>().map_err(|_| bad_date())?;
        if *slot == 0 {
            return Err(bad_date());
        }
    }
    let [month, day, year] = numbers;
    let year = i32::try_from(year).map_err(|_| bad_date())?;

    NaiveDate::from_ymd_opt(year, month, day).ok_or_else(bad_date)
}

/// Absolute day distance under the window. Forward-dated filings count the
/// same as past ones.
pub fn is_recent(today: NaiveDate, submitted: NaiveDate) -> bool {
    today.signed_duration_since(submitted).num_days().abs() < RECENT_WINDOW_DAYS
}

/// Full document-to-verdict step, independent of transport.
pub fn verdict_from_document(
    html: &str,
    today: NaiveDate,
    now: DateTime<Utc>,
) -> Result<SponsorshipVerdict, ResolutionFailure> {
    let text = extract_submit_date(html)?;
    let submitted = parse_submit_date(&text)?;
    let is_sponsor = is_recent(today, submitted);

    debug!(
        "Submit date {} is {} days from {} (sponsor: {})",
        submitted,
        today.signed_duration_since(submitted).num_days().abs(),
        today,
        is_sponsor
    );

    Ok(SponsorshipVerdict { is_sponsor, resolved_at: now })
}

/// Resolver that scrapes the listing site over HTTP.
pub struct HttpResolver {
    client: reqwest::Client,
    source: LookupSource,
    clock: Arc<dyn Clock>,
}

impl HttpResolver {
    fn create_http_client(user_agent: &str, timeout: Duration) -> reqwest::Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
    }

    pub fn new(
        source: LookupSource,
        user_agent: &str,
        timeout: Duration,
        clock: Arc<dyn Clock>,
    ) -> reqwest::Result<Self> {
        Ok(Self {
            client: Self::create_http_client(user_agent, timeout)?,
            source,
            clock,
        })
    }

    pub fn from_config(config: &SourceConfig, clock: Arc<dyn Clock>) -> reqwest::Result<Self> {
        Self::new(
            LookupSource {
                base_url: config.base_url.clone(),
                year: config.year,
            },
            &config.user_agent,
            Duration::from_secs(config.request_timeout_secs),
            clock,
        )
    }
}

#[async_trait]
impl Resolve for HttpResolver {
    async fn resolve(&self, key: &CompanyKey) -> Result<SponsorshipVerdict, ResolutionFailure> {
        let url = build_lookup_url(&self.source, key)?;
        debug!("Looking up '{}' at {}", key, url);

        let response = self.client.get(url.clone()).send().await.map_err(|e| {
            ResolutionFailure::Fetch {
                status: None,
                message: format!("request to {} failed: {}", url, e),
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ResolutionFailure::Fetch {
                status: Some(status.as_u16()),
                message: format!("non-success status {} for {}", status, url),
            });
        }

        let body = response.text().await.map_err(|e| ResolutionFailure::Fetch {
            status: Some(status.as_u16()),
            message: format!("failed to read response body: {}", e),
        })?;

        verdict_from_document(&body, self.clock.today(), self.clock.now())
    }
}
