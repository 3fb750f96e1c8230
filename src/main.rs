use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use h1bfilter::cache::{CacheSettings, VerdictCache};
use h1bfilter::cache_commands;
use h1bfilter::cli::{CacheCommands, Cli, Commands, OutputFormat};
use h1bfilter::clock::{Clock, SystemClock};
use h1bfilter::config::{self, AppConfig, CONFIG_PATH};
use h1bfilter::listing::{parse_listing_file, CheckReport, Listing, ListingChecker};
use h1bfilter::logger::{CheckLogger, VerbosityLevel};
use h1bfilter::rate_limit::{RetryHelper, LookupPacer};
use h1bfilter::resolver::HttpResolver;
use h1bfilter::storage::JsonFileStorage;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose);

    let config_path = cli.config.clone().unwrap_or_else(|| PathBuf::from(CONFIG_PATH));

    // Handle --init flag first (before any other processing)
    if cli.init {
        match AppConfig::create_default_config_at(&config_path) {
            Ok(path) => {
                println!("✅ Created default configuration file at: {}", path.display());
                println!("   Edit this file to customize settings, then run h1bfilter again.");
                return Ok(());
            }
            Err(e) => {
                eprintln!("❌ Failed to create configuration file: {}", e);
                std::process::exit(1);
            }
        }
    }

    if let Err(e) = cli.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(2);
    }

    let app_config = match AppConfig::load_from_path(&config_path) {
        Ok(cfg) => cfg,
        Err(config::ConfigError::FileNotFound(path)) => match AppConfig::prompt_create_config(&path) {
            Ok(Some(created_path)) => {
                println!("✅ Created default configuration file at: {}", created_path.display());
                println!("   Edit this file to customize settings, then run h1bfilter again.");
                return Ok(());
            }
            Ok(None) => {
                eprintln!("❌ Configuration file not found at: {}", path.display());
                eprintln!("   Run with --init to create a default configuration file.");
                std::process::exit(1);
            }
            Err(e) => {
                eprintln!("❌ Failed to create configuration file: {}", e);
                std::process::exit(1);
            }
        },
        Err(e) => {
            eprintln!("❌ Configuration error: {}", e);
            std::process::exit(1);
        }
    };
    debug!("Loaded configuration from {}", config_path.display());

    let cache = Arc::new(open_cache(&app_config).await?);

    match &cli.command {
        Some(Commands::Cache { action }) => match action {
            CacheCommands::List => cache_commands::list_cached_companies(&cache).await,
            CacheCommands::Show { name } => cache_commands::show_cache_entry(&cache, name).await,
            CacheCommands::Clear { name: Some(name), .. } => cache_commands::clear_company_cache(&cache, name).await,
            CacheCommands::Clear { name: None, .. } => cache_commands::clear_all_cache(&cache).await,
            CacheCommands::Cleanup => cache_commands::cleanup_cache(&cache).await,
        },
        Some(Commands::Check { names, input, format, output }) => {
            let mut listings: Vec<Listing> = names.iter().map(|name| Listing::new(name.as_str())).collect();
            if let Some(input) = input {
                listings.extend(parse_listing_file(input)?);
            }

            let policy = cli.apply_policy_overrides(app_config.policy.to_policy());
            let pacer = LookupPacer::from_config(&app_config.rate_limit);
            let checker = ListingChecker::new(cache.clone(), policy, pacer);

            let verbosity = match format {
                OutputFormat::Json => VerbosityLevel::Silent,
                OutputFormat::Text => VerbosityLevel::from_verbose_count(cli.verbose),
            };
            let logger = match &cli.log_file {
                Some(path) => CheckLogger::with_log_file(verbosity, path.clone()),
                None => CheckLogger::new(verbosity),
            };

            let report = checker.check_all_with_logger(&listings, Some(&logger)).await;

            match format {
                OutputFormat::Json => {
                    let json = serde_json::to_string_pretty(&report).context("Failed to serialize check report")?;
                    println!("{}", json);
                }
                OutputFormat::Text => {
                    print_report_table(&report);
                    logger.print_final_summary(&report);
                }
            }

            if let Some(output) = output {
                report.export_json(output)?;
                logger.info(&format!("Report written to {}", output.display()));
            }

            if logger.is_log_export_enabled() {
                logger.export_logs().context("Failed to write log file")?;
            }

            Ok(())
        }
        None => Ok(()),
    }
}

/// Map `-v` occurrences onto a tracing filter; `RUST_LOG` wins when quiet
fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .init();
}

async fn open_cache(app_config: &AppConfig) -> Result<VerdictCache> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let resolver = HttpResolver::from_config(&app_config.source, clock.clone())
        .context("Failed to create HTTP client")?;
    let storage = Arc::new(JsonFileStorage::new(app_config.cache.path.clone()));

    let mut cache = VerdictCache::load(
        storage,
        Arc::new(resolver),
        clock,
        CacheSettings::from_config(&app_config.cache),
    )
    .await
    .with_normalizer(app_config.normalizer());

    if let Some(retry) = RetryHelper::from_config(&app_config.rate_limit) {
        cache = cache.with_retry(retry);
    }

    Ok(cache)
}

fn print_report_table(report: &CheckReport) {
    println!("{:<35} {:<25} {:<10} {:<22} {}", "Company", "Key", "Verdict", "Source", "Disposition");
    println!("{}", "-".repeat(105));

    for result in &report.results {
        let (key, verdict, source) = match &result.outcome {
            Some(outcome) => (
                outcome.key.to_string(),
                if outcome.is_sponsor { "sponsor" } else { "no" },
                outcome.source.to_string(),
            ),
            None => ("-".to_string(), "-", "not checked".to_string()),
        };

        println!(
            "{:<35} {:<25} {:<10} {:<22} {}",
            result.company, key, verdict, source, result.disposition
        );
    }
}
