//! Configuration management for h1bfilter
//!
//! Configuration is loaded from `./config/h1bfilter.toml` unless a path is
//! given on the command line. The shipped defaults live in the embedded
//! template, which `--init` writes out.

use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::normalizer::CompanyNormalizer;
use crate::policy::{FilterPolicy, NonSponsorAction};

/// Configuration file path relative to working directory
pub const CONFIG_PATH: &str = "./config/h1bfilter.toml";

/// Default configuration file content
pub const DEFAULT_CONFIG: &str = include_str!("../config/h1bfilter.toml");

/// Upper bound for `cache.expiry_days` (ten years)
pub const MAX_EXPIRY_DAYS: u32 = 3650;

/// Upper bound for `cache.cleanup_interval_hours` (one year)
pub const MAX_CLEANUP_INTERVAL_HOURS: u32 = 8760;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found at {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] io::Error),

    #[error("Failed to parse configuration file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid URL in '{field}': {url}")]
    InvalidUrl { field: String, url: String },

    #[error("Configuration field '{field}' cannot be empty")]
    EmptyRequired { field: String },

    #[error("Configuration field '{field}' out of range: {reason}")]
    OutOfRange { field: String, reason: String },

    #[error("Alias '{alias}' maps to '{canonical}', which itself normalizes to something else")]
    UnstableAlias { alias: String, canonical: String },
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub source: SourceConfig,
    pub cache: CacheConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Extra legal-name -> canonical key mappings
    #[serde(default)]
    pub aliases: HashMap<String, String>,
}

/// External listing site
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub base_url: String,
    pub year: u32,
    pub user_agent: String,
    pub request_timeout_secs: u64,
}

/// Verdict cache limits and location
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// JSON storage file holding the cache record
    pub path: PathBuf,
    pub expiry_days: u32,
    pub max_items: usize,
    pub cleanup_interval_hours: u32,
}

/// Listing policy defaults; CLI flags override these
#[derive(Debug, Clone, Deserialize)]
pub struct PolicyConfig {
    #[serde(default = "default_filter_enabled")]
    pub filter_enabled: bool,
    #[serde(default)]
    pub hide_unknown: bool,
    #[serde(default)]
    pub non_sponsor_action: NonSponsorAction,
}

fn default_filter_enabled() -> bool {
    true
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            filter_enabled: default_filter_enabled(),
            hide_unknown: false,
            non_sponsor_action: NonSponsorAction::default(),
        }
    }
}

impl PolicyConfig {
    pub fn to_policy(&self) -> FilterPolicy {
        FilterPolicy {
            filter_enabled: self.filter_enabled,
            hide_unknown: self.hide_unknown,
            non_sponsor_action: self.non_sponsor_action,
        }
    }
}

/// Backoff strategy for retrying failed lookups
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    #[default]
    Linear,
    Exponential,
}

/// Pacing between lookups and retry behaviour
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Network lookups per second during a batch (0 = unlimited)
    #[serde(default = "default_lookups_per_second")]
    pub lookups_per_second: u32,
    /// Retries for fetch failures (0 = never retry)
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default)]
    pub backoff_strategy: BackoffStrategy,
    #[serde(default = "default_backoff_base_delay_ms")]
    pub backoff_base_delay_ms: u64,
    #[serde(default = "default_backoff_max_delay_ms")]
    pub backoff_max_delay_ms: u64,
}

fn default_lookups_per_second() -> u32 {
    2
}

fn default_backoff_base_delay_ms() -> u64 {
    1000
}

fn default_backoff_max_delay_ms() -> u64 {
    30000
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            lookups_per_second: default_lookups_per_second(),
            max_retries: 0,
            backoff_strategy: BackoffStrategy::default(),
            backoff_base_delay_ms: default_backoff_base_delay_ms(),
            backoff_max_delay_ms: default_backoff_max_delay_ms(),
        }
    }
}

impl RateLimitConfig {
    /// Delay before retry `attempt` (1-based). Attempt 0 never waits.
    pub fn calculate_backoff_delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base = self.backoff_base_delay_ms;
        let delay_ms = match self.backoff_strategy {
            BackoffStrategy::Linear => base.saturating_mul(attempt as u64),
            BackoffStrategy::Exponential => {
                let factor = 2u64.checked_pow(attempt - 1).unwrap_or(u64::MAX);
                base.saturating_mul(factor)
            }
        };

        Duration::from_millis(delay_ms.min(self.backoff_max_delay_ms))
    }
}

impl AppConfig {
    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// The embedded default configuration
    pub fn defaults() -> Result<Self, ConfigError> {
        Self::from_toml(DEFAULT_CONFIG)
    }

    /// Validate all configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.source.base_url.starts_with("https://") || self.source.base_url.starts_with("http://")) {
            return Err(ConfigError::InvalidUrl {
                field: "source.base_url".to_string(),
                url: self.source.base_url.clone(),
            });
        }
        if url::Url::parse(&self.source.base_url).is_err() {
            return Err(ConfigError::InvalidUrl {
                field: "source.base_url".to_string(),
                url: self.source.base_url.clone(),
            });
        }
        if self.source.user_agent.is_empty() {
            return Err(ConfigError::EmptyRequired {
                field: "source.user_agent".to_string(),
            });
        }
        if self.source.request_timeout_secs == 0 {
            return Err(ConfigError::EmptyRequired {
                field: "source.request_timeout_secs".to_string(),
            });
        }
        if self.source.year < 2000 {
            return Err(ConfigError::OutOfRange {
                field: "source.year".to_string(),
                reason: format!("{} is before any published filing year", self.source.year),
            });
        }

        if self.cache.path.as_os_str().is_empty() {
            return Err(ConfigError::EmptyRequired {
                field: "cache.path".to_string(),
            });
        }
        if self.cache.expiry_days == 0 || self.cache.expiry_days > MAX_EXPIRY_DAYS {
            return Err(ConfigError::OutOfRange {
                field: "cache.expiry_days".to_string(),
                reason: format!("must be between 1 and {}", MAX_EXPIRY_DAYS),
            });
        }
        if self.cache.cleanup_interval_hours > MAX_CLEANUP_INTERVAL_HOURS {
            return Err(ConfigError::OutOfRange {
                field: "cache.cleanup_interval_hours".to_string(),
                reason: format!("must be at most {}", MAX_CLEANUP_INTERVAL_HOURS),
            });
        }
        if self.cache.max_items == 0 {
            return Err(ConfigError::OutOfRange {
                field: "cache.max_items".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        if self.rate_limit.backoff_base_delay_ms > self.rate_limit.backoff_max_delay_ms {
            return Err(ConfigError::OutOfRange {
                field: "rate_limit.backoff_base_delay_ms".to_string(),
                reason: "exceeds rate_limit.backoff_max_delay_ms".to_string(),
            });
        }

        if let Some((alias, canonical)) = self.normalizer().unstable_aliases().into_iter().next() {
            return Err(ConfigError::UnstableAlias { alias, canonical });
        }

        Ok(())
    }

    /// Normalizer with the built-in table plus configured aliases
    pub fn normalizer(&self) -> CompanyNormalizer {
        CompanyNormalizer::new().with_aliases(&self.aliases)
    }

    pub fn create_default_config_at(path: &Path) -> Result<PathBuf, ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = fs::File::create(path)?;
        file.write_all(DEFAULT_CONFIG.as_bytes())?;

        Ok(path.to_path_buf())
    }

    /// Check if stdin is a TTY (interactive terminal)
    pub fn is_interactive() -> bool {
        io::stdin().is_terminal()
    }

    /// Prompt user to create default config (only in interactive mode)
    pub fn prompt_create_config(path: &Path) -> Result<Option<PathBuf>, ConfigError> {
        if !Self::is_interactive() {
            return Ok(None);
        }

        print!("Configuration file not found. Create default config? [Y/n] ");
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        let input = input.trim().to_lowercase();

        if input.is_empty() || input == "y" || input == "yes" {
            let path = Self::create_default_config_at(path)?;
            Ok(Some(path))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[source]
base_url = "https://h1bdata.info"
year = 2024
user_agent = "test/1.0"
request_timeout_secs = 30

[cache]
path = "cache/storage.json"
expiry_days = 7
max_items = 1000
cleanup_interval_hours = 24
"#;

    #[test]
    fn test_default_config_parses_and_validates() {
        let config = AppConfig::defaults();
        assert!(config.is_ok(), "Default config should load: {:?}", config.err());

        let config = config.unwrap();
        assert_eq!(config.cache.expiry_days, 7);
        assert_eq!(config.cache.max_items, 1000);
        assert_eq!(config.source.year, 2024);
    }

    #[test]
    fn test_optional_sections_default() {
        let config = AppConfig::from_toml(MINIMAL).expect("minimal config should parse");

        assert!(config.policy.filter_enabled, "filter_enabled should default to true");
        assert!(!config.policy.hide_unknown, "hide_unknown should default to false");
        assert_eq!(config.policy.non_sponsor_action, NonSponsorAction::Hide);
        assert_eq!(config.rate_limit.lookups_per_second, 2);
        assert_eq!(config.rate_limit.max_retries, 0);
        assert!(config.aliases.is_empty());
    }

    #[test]
    fn test_policy_section() {
        let text = format!(
            "{}\n[policy]\nfilter_enabled = false\nhide_unknown = true\nnon_sponsor_action = \"dim\"\n",
            MINIMAL
        );
        let config = AppConfig::from_toml(&text).unwrap();
        let policy = config.policy.to_policy();

        assert!(!policy.filter_enabled);
        assert!(policy.hide_unknown);
        assert_eq!(policy.non_sponsor_action, NonSponsorAction::Dim);
    }

    #[test]
    fn test_rejects_bad_base_url() {
        let text = MINIMAL.replace("https://h1bdata.info", "ftp://h1bdata.info");
        assert!(matches!(AppConfig::from_toml(&text), Err(ConfigError::InvalidUrl { .. })));
    }

    #[test]
    fn test_rejects_zero_max_items() {
        let text = MINIMAL.replace("max_items = 1000", "max_items = 0");
        assert!(matches!(AppConfig::from_toml(&text), Err(ConfigError::OutOfRange { .. })));
    }

    #[test]
    fn test_rejects_unbounded_expiry() {
        let text = MINIMAL.replace("expiry_days = 7", "expiry_days = 4294967295");
        match AppConfig::from_toml(&text) {
            Err(ConfigError::OutOfRange { field, .. }) => assert_eq!(field, "cache.expiry_days"),
            other => panic!("expected OutOfRange, got {:?}", other),
        }

        let text = MINIMAL.replace("expiry_days = 7", &format!("expiry_days = {}", MAX_EXPIRY_DAYS));
        assert!(AppConfig::from_toml(&text).is_ok());

        let text = MINIMAL.replace("cleanup_interval_hours = 24", "cleanup_interval_hours = 4294967295");
        assert!(matches!(AppConfig::from_toml(&text), Err(ConfigError::OutOfRange { .. })));
    }

    #[test]
    fn test_configured_aliases_applied() {
        let text = format!("{}\n[aliases]\n\"Alphabet Inc\" = \"google\"\n", MINIMAL);
        let config = AppConfig::from_toml(&text).unwrap();
        assert_eq!(config.normalizer().normalize("ALPHABET INC").as_str(), "google");
    }

    #[test]
    fn test_rejects_unstable_alias() {
        let text = format!("{}\n[aliases]\n\"zappos\" = \"Amazon Retail\"\n", MINIMAL);
        match AppConfig::from_toml(&text) {
            Err(ConfigError::UnstableAlias { alias, canonical }) => {
                assert_eq!(alias, "zappos");
                assert_eq!(canonical, "amazon retail");
            }
            other => panic!("expected UnstableAlias, got {:?}", other),
        }
    }

    #[test]
    fn test_backoff_calculation_linear() {
        let config = RateLimitConfig {
            lookups_per_second: 2,
            max_retries: 3,
            backoff_strategy: BackoffStrategy::Linear,
            backoff_base_delay_ms: 1000,
            backoff_max_delay_ms: 30000,
        };

        assert_eq!(config.calculate_backoff_delay(0), Duration::ZERO);
        assert_eq!(config.calculate_backoff_delay(1), Duration::from_millis(1000));
        assert_eq!(config.calculate_backoff_delay(3), Duration::from_millis(3000));
    }

    #[test]
    fn test_backoff_calculation_exponential_capped() {
        let config = RateLimitConfig {
            lookups_per_second: 2,
            max_retries: 10,
            backoff_strategy: BackoffStrategy::Exponential,
            backoff_base_delay_ms: 1000,
            backoff_max_delay_ms: 5000,
        };

        assert_eq!(config.calculate_backoff_delay(2), Duration::from_millis(2000));
        assert_eq!(config.calculate_backoff_delay(3), Duration::from_millis(4000));
        assert_eq!(config.calculate_backoff_delay(10), Duration::from_millis(5000));
    }
}
