//! Batch checking of scraped job listings
//!
//! Listings arrive in page order as raw company text (optionally with the job
//! title). Supports:
//! - Plain text, one company per line, optional `company<TAB>title`
//! - CSV with a `company` column (and optional `title` column)
//! - JSON array of strings or `{company, title}` objects, or `{"listings": [...]}`
//!
//! Each listing is resolved through the verdict cache, turned into a
//! disposition by the filter policy, and tallied into processing stats.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use crate::cache::{VerdictCache, VerdictOutcome};
use crate::logger::CheckLogger;
use crate::policy::{FilterPolicy, ListingDisposition};
use crate::rate_limit::LookupPacer;

/// One job card as scraped from the page
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Listing {
    pub company: String,
    #[serde(default)]
    pub title: Option<String>,
}

impl Listing {
    pub fn new(company: impl Into<String>) -> Self {
        Self {
            company: company.into(),
            title: None,
        }
    }

    pub fn with_title(company: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            company: company.into(),
            title: Some(title.into()),
        }
    }
}

/// Input format for listing files
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputFormat {
    Text,
    Csv,
    Json,
}

impl InputFormat {
    /// Detect format from file extension; anything unknown is plain text
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()).map(|e| e.to_lowercase()).as_deref() {
            Some("csv") => Self::Csv,
            Some("json") => Self::Json,
            _ => Self::Text,
        }
    }
}

/// Parse listings from a file (format from extension)
pub fn parse_listing_file(path: &Path) -> Result<Vec<Listing>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read input file: {}", path.display()))?;

    parse_listings(&content, InputFormat::from_path(path))
}

pub fn parse_listings(content: &str, format: InputFormat) -> Result<Vec<Listing>> {
    match format {
        InputFormat::Text => Ok(parse_text_listings(content)),
        InputFormat::Csv => parse_csv_listings(content),
        InputFormat::Json => parse_json_listings(content),
    }
}

/// One company per line; `#` comments and blank lines skipped
pub fn parse_text_listings(content: &str) -> Vec<Listing> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| match line.split_once('\t') {
            Some((company, title)) if !title.trim().is_empty() => {
                Listing::with_title(company.trim(), title.trim())
            }
            Some((company, _)) => Listing::new(company.trim()),
            None => Listing::new(line),
        })
        .collect()
}

/// CSV with a `company` header column
pub fn parse_csv_listings(content: &str) -> Result<Vec<Listing>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(content.as_bytes());

    let headers = reader.headers().context("Failed to read CSV headers")?.clone();

    let company_idx = headers
        .iter()
        .position(|h| h.trim().eq_ignore_ascii_case("company"))
        .context("CSV must have a 'company' column")?;
    let title_idx = headers.iter().position(|h| h.trim().eq_ignore_ascii_case("title"));

    let mut listings = Vec::new();
    for result in reader.records() {
        let record = result.context("Failed to parse CSV record")?;

        let company = match record.get(company_idx).map(str::trim) {
            Some(company) if !company.is_empty() => company.to_string(),
            _ => continue,
        };
        let title = title_idx
            .and_then(|idx| record.get(idx))
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        listings.push(Listing { company, title });
    }

    Ok(listings)
}

/// JSON array of strings / objects, or an object with a `listings` array
pub fn parse_json_listings(content: &str) -> Result<Vec<Listing>> {
    let value: serde_json::Value = serde_json::from_str(content).context("Failed to parse JSON content")?;

    let items = match &value {
        serde_json::Value::Array(arr) => arr,
        serde_json::Value::Object(obj) => match obj.get("listings") {
            Some(serde_json::Value::Array(arr)) => arr,
            Some(_) => bail!("'listings' field must be an array"),
            None => bail!("JSON object must have a 'listings' array field"),
        },
        _ => bail!("JSON must be an array of listings or an object with a 'listings' field"),
    };

    let mut listings = Vec::new();
    for item in items {
        match item {
            serde_json::Value::String(company) if !company.trim().is_empty() => {
                listings.push(Listing::new(company.trim()));
            }
            serde_json::Value::Object(obj) => {
                if let Some(company) = obj.get("company").and_then(|v| v.as_str()) {
                    let company = company.trim();
                    if company.is_empty() {
                        continue;
                    }
                    let title = obj
                        .get("title")
                        .and_then(|v| v.as_str())
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty());
                    listings.push(Listing {
                        company: company.to_string(),
                        title,
                    });
                }
            }
            _ => {}
        }
    }

    Ok(listings)
}

/// Result for one listing
#[derive(Debug, Clone, Serialize)]
pub struct ListingResult {
    /// Position in page order
    pub index: usize,
    pub company: String,
    pub title: Option<String>,
    /// None when the filter is off or the name was empty
    pub outcome: Option<VerdictOutcome>,
    pub disposition: ListingDisposition,
}

/// Running totals, as shown by the popup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProcessingStats {
    pub total_jobs: usize,
    pub sponsor_count: usize,
    pub hidden: usize,
    pub dimmed: usize,
    pub unknown: usize,
    pub skipped: usize,
}

impl ProcessingStats {
    fn record(&mut self, result: &ListingResult) {
        match &result.outcome {
            None if result.company.trim().is_empty() => {
                self.skipped += 1;
                return;
            }
            Some(outcome) if outcome.is_unknown() => self.unknown += 1,
            Some(outcome) if outcome.is_sponsor => self.sponsor_count += 1,
            _ => {}
        }

        self.total_jobs += 1;
        match result.disposition {
            ListingDisposition::Hide => self.hidden += 1,
            ListingDisposition::Dim => self.dimmed += 1,
            ListingDisposition::Show => {}
        }
    }
}

/// Outcome of checking one batch
#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub policy: FilterPolicy,
    pub results: Vec<ListingResult>,
    pub stats: ProcessingStats,
    pub started_at: String,
    pub completed_at: String,
}

impl CheckReport {
    pub fn export_json(&self, output_path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize check report")?;
        fs::write(output_path, json)
            .with_context(|| format!("Failed to write check report to: {}", output_path.display()))?;
        Ok(())
    }
}

/// Runs listings through the cache in page order
pub struct ListingChecker {
    cache: Arc<VerdictCache>,
    policy: FilterPolicy,
    pacer: LookupPacer,
}

impl ListingChecker {
    pub fn new(cache: Arc<VerdictCache>, policy: FilterPolicy, pacer: LookupPacer) -> Self {
        Self { cache, policy, pacer }
    }

    /// Check a single listing
    pub async fn check(&self, index: usize, listing: &Listing) -> ListingResult {
        let company = listing.company.trim();

        if !self.policy.filter_enabled || company.is_empty() {
            return ListingResult {
                index,
                company: listing.company.clone(),
                title: listing.title.clone(),
                outcome: None,
                disposition: ListingDisposition::Show,
            };
        }

        // only pace when this will go to the network
        let key = self.cache.normalizer().normalize(company);
        if self.cache.get(&key).await.is_none() {
            self.pacer.wait_turn().await;
        }

        let outcome = self.cache.resolve_with_cache(company, self.policy.hide_unknown).await;
        let disposition = self.policy.disposition(&outcome);
        debug!("Listing {} '{}' -> {} ({})", index, company, disposition, outcome.source);

        ListingResult {
            index,
            company: listing.company.clone(),
            title: listing.title.clone(),
            outcome: Some(outcome),
            disposition,
        }
    }

    pub async fn check_all(&self, listings: &[Listing]) -> CheckReport {
        self.check_all_with_logger(listings, None).await
    }

    /// Check listings in order, reporting progress to `logger` if given
    pub async fn check_all_with_logger(&self, listings: &[Listing], logger: Option<&CheckLogger>) -> CheckReport {
        let started_at = Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string();
        let mut stats = ProcessingStats::default();
        let mut results = Vec::with_capacity(listings.len());

        if let Some(logger) = logger {
            logger.start_progress(listings.len() as u64).await;
        }

        for (index, listing) in listings.iter().enumerate() {
            if let Some(logger) = logger {
                logger.update_progress(&format!("Checking {}", listing.company.trim())).await;
            }

            let result = self.check(index, listing).await;
            stats.record(&result);

            if let Some(logger) = logger {
                logger.log_listing(&result);
                logger.advance_progress(1).await;
            }
            results.push(result);
        }

        if let Some(logger) = logger {
            logger
                .finish_progress(&format!(
                    "Checked {} listings: {} sponsors, {} hidden, {} dimmed, {} unknown",
                    stats.total_jobs, stats.sponsor_count, stats.hidden, stats.dimmed, stats.unknown
                ))
                .await;
        }

        CheckReport {
            policy: self.policy,
            results,
            stats,
            started_at,
            completed_at: Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        }
    }
}
