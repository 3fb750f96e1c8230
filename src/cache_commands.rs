//! Cache management commands for the h1bfilter CLI
//!
//! List, show, clear and clean up the verdict cache stored in the JSON
//! storage file named by `[cache] path`.

use anyhow::{bail, Result};
use chrono::{DateTime, Duration, Utc};

use crate::cache::{CacheEntry, VerdictCache};

/// List all cached companies, most recently resolved first
pub async fn list_cached_companies(cache: &VerdictCache) -> Result<()> {
    let entries = cache.entries().await;

    if entries.is_empty() {
        println!("No cached companies found. Run 'h1bfilter check' to populate the cache.");
        return Ok(());
    }

    println!("Cached Companies ({} total):", entries.len());
    println!("{}", "=".repeat(80));
    println!("{:<40} {:<10} {:<25} {}", "Company", "Sponsor", "Resolved", "Status");
    println!("{}", "-".repeat(80));

    for entry in &entries {
        println!(
            "{:<40} {:<10} {:<25} {}",
            truncate(entry.key.as_str(), 39),
            if entry.verdict.is_sponsor { "yes" } else { "no" },
            format_timestamp(entry.verdict.resolved_at),
            freshness(cache, entry)
        );
    }

    println!();
    println!("Last cleanup: {}", format_timestamp(cache.last_cleanup().await));

    Ok(())
}

/// Show the cached verdict for one company
pub async fn show_cache_entry(cache: &VerdictCache, name: &str) -> Result<()> {
    let key = cache.normalizer().normalize(name);

    match cache.entry(&key).await {
        Some(entry) => {
            println!("Cache Entry for: {}", entry.key);
            println!("{}", "=".repeat(60));
            println!();
            println!("Recent Sponsor: {}", entry.verdict.is_sponsor);
            println!("Resolved At: {}", format_timestamp(entry.verdict.resolved_at));
            println!("Expires At: {}", expires_at(entry.verdict.resolved_at, cache.settings().expiry));
            println!("Status: {}", freshness(cache, &entry));
            println!("Cache Version: {}", entry.schema_version);
            Ok(())
        }
        None => {
            let similar: Vec<String> = cache
                .entries()
                .await
                .into_iter()
                .map(|e| e.key.into_inner())
                .filter(|cached| !key.is_empty() && (cached.contains(key.as_str()) || key.as_str().contains(cached.as_str())))
                .collect();

            if !similar.is_empty() {
                eprintln!("Did you mean one of these?");
                for s in similar {
                    eprintln!("  - {}", s);
                }
            }

            bail!("No cache entry found for: {} (key '{}')", name, key)
        }
    }
}

/// Clear the cached verdict for one company
pub async fn clear_company_cache(cache: &VerdictCache, name: &str) -> Result<()> {
    let key = cache.normalizer().normalize(name);

    if cache.remove(&key).await {
        println!("Successfully cleared cache for: {}", key);
        Ok(())
    } else {
        bail!("No cache entry found for: {} (key '{}')", name, key)
    }
}

/// Clear every cached verdict
pub async fn clear_all_cache(cache: &VerdictCache) -> Result<()> {
    let count = cache.clear().await;

    if count > 0 {
        println!("Successfully cleared {} cache entries.", count);
    } else {
        println!("No cache entries to clear.");
    }

    Ok(())
}

/// Sweep expired entries and evict beyond the size limit
pub async fn cleanup_cache(cache: &VerdictCache) -> Result<()> {
    let report = cache.cleanup().await;

    println!("Cleanup Summary:");
    println!("{}", "=".repeat(40));
    println!("Expired:   {} entries", report.expired);
    println!("Evicted:   {} entries", report.evicted);
    println!("Remaining: {} entries", report.remaining);

    Ok(())
}

fn freshness(cache: &VerdictCache, entry: &CacheEntry) -> &'static str {
    if cache.is_entry_fresh(entry) {
        "fresh"
    } else {
        "expired"
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        let head: String = text.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    }
}

fn expires_at(resolved_at: DateTime<Utc>, expiry: Duration) -> String {
    match resolved_at.checked_add_signed(expiry) {
        Some(instant) => format_timestamp(instant),
        None => "never".to_string(),
    }
}

fn format_timestamp(instant: DateTime<Utc>) -> String {
    instant.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}
