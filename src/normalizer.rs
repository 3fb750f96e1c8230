//! Company Name Normalization
//!
//! Turns the freeform company text scraped from a job card into the key used
//! for lookups and cache entries:
//! - Case and surrounding whitespace: "  AMAZON " vs "amazon"
//! - Known legal-entity names: "Amazon.com Services LLC" -> "amazon"
//! - Parent-brand substrings: "Amazon Robotics" -> "amazon"
//! - Extra alias overrides from configuration
//!
//! Brand folding is a plain substring test, so any name that merely contains
//! a brand token folds to that brand ("Amazonia Coffee" -> "amazon"). This is
//! a known imprecision and is kept on purpose.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use once_cell::sync::Lazy;
use tracing::debug;

/// Normalized company name used as the lookup and cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompanyKey(String);

impl CompanyKey {
    /// Wrap an already-normalized key. Callers holding raw page text should
    /// go through [`normalize`] instead.
    pub fn from_normalized(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for CompanyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CompanyKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Legal-entity names that fold to a single canonical key.
/// Matched exactly after lower-casing and trimming.
const BUILTIN_ALIASES: &[(&str, &str)] = &[
    // Amazon subsidiaries as they appear on job cards and filings
    ("amazon.com services llc", "amazon"),
    ("amazon.com services inc", "amazon"),
    ("amazon.com services, inc.", "amazon"),
    ("amazon web services inc", "amazon"),
    ("amazon web services, inc.", "amazon"),
    ("amazon data services inc", "amazon"),
    ("amazon data services, inc.", "amazon"),
    ("amazon.com", "amazon"),
    ("amazon.com, inc.", "amazon"),
    // Meta
    ("meta platforms", "meta"),
    ("meta platforms inc", "meta"),
    ("meta platforms, inc.", "meta"),
    ("facebook", "meta"),
    ("facebook inc", "meta"),
    ("facebook, inc.", "meta"),
];

/// Parent-brand tokens. Any name containing the token folds to its key.
/// Checked in order; the first hit wins.
const BRAND_TOKENS: &[(&str, &str)] = &[
    ("amazon", "amazon"),
];

static DEFAULT_NORMALIZER: Lazy<CompanyNormalizer> = Lazy::new(CompanyNormalizer::new);

/// Normalize with the built-in alias table only.
pub fn normalize(raw: &str) -> CompanyKey {
    DEFAULT_NORMALIZER.normalize(raw)
}

/// Company normalizer with the built-in alias table plus configured overrides.
#[derive(Debug, Clone)]
pub struct CompanyNormalizer {
    /// lower-cased legal name -> canonical key
    aliases: HashMap<String, String>,
    /// (substring token, canonical key)
    brand_tokens: Vec<(String, String)>,
}

impl Default for CompanyNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl CompanyNormalizer {
    /// Create a normalizer with the built-in aliases and brand tokens.
    pub fn new() -> Self {
        let aliases = BUILTIN_ALIASES
            .iter()
            .map(|(alias, key)| (alias.to_string(), key.to_string()))
            .collect();
        let brand_tokens = BRAND_TOKENS
            .iter()
            .map(|(token, key)| (token.to_string(), key.to_string()))
            .collect();

        Self { aliases, brand_tokens }
    }

    /// Add configured aliases on top of the built-in table.
    /// Both sides are lower-cased and trimmed before insertion.
    pub fn with_aliases(mut self, aliases: &HashMap<String, String>) -> Self {
        for (alias, canonical) in aliases {
            self.add_alias(alias, canonical);
        }
        self
    }

    /// Add a single alias mapping.
    pub fn add_alias(&mut self, alias: &str, canonical: &str) {
        self.aliases.insert(fold_case(alias), fold_case(canonical));
    }

    /// Normalize a raw company name into its lookup key.
    ///
    /// Total and deterministic. Whitespace-only input yields an empty key;
    /// rejecting that is up to the caller.
    pub fn normalize(&self, raw: &str) -> CompanyKey {
        let folded = fold_case(raw);

        if let Some(canonical) = self.aliases.get(&folded) {
            debug!("Normalized '{}' to '{}' via alias", raw, canonical);
            return CompanyKey(canonical.clone());
        }

        if !folded.is_empty() {
            if let Some((token, key)) = self
                .brand_tokens
                .iter()
                .find(|(token, _)| folded.contains(token.as_str()))
            {
                debug!("Normalized '{}' to '{}' via brand token '{}'", raw, key, token);
                return CompanyKey(key.clone());
            }
        }

        CompanyKey(folded)
    }

    /// Aliases whose canonical key does not normalize to itself.
    ///
    /// Such an entry makes `normalize(normalize(x)) != normalize(x)`,
    /// so configuration loading rejects it.
    pub fn unstable_aliases(&self) -> Vec<(String, String)> {
        let mut unstable: Vec<(String, String)> = self
            .aliases
            .iter()
            .filter(|(_, canonical)| self.normalize(canonical).as_str() != canonical.as_str())
            .map(|(alias, canonical)| (alias.clone(), canonical.clone()))
            .collect();
        unstable.sort();
        unstable
    }
}

/// Lower-case and trim.
fn fold_case(raw: &str) -> String {
    raw.trim().to_lowercase()
}
