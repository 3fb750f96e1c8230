use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::policy::{FilterPolicy, NonSponsorAction};

#[derive(Parser, Debug)]
#[command(name = "h1bfilter")]
#[command(about = "Check whether job listings come from recent H-1B sponsors")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Create default configuration file at ./config/h1bfilter.toml
    #[arg(long, global = true)]
    pub init: bool,

    /// Path to configuration file (defaults to ./config/h1bfilter.toml)
    #[arg(short, long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Verbose logging (use -v for INFO, -vv for DEBUG, -vvv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Export execution logs to a file (specify file path)
    #[arg(long, global = true)]
    pub log_file: Option<String>,

    /// Treat companies that cannot be resolved as non-sponsors (overrides config)
    #[arg(long, global = true, conflicts_with = "show_unknown")]
    pub hide_unknown: bool,

    /// Treat companies that cannot be resolved as sponsors (overrides config)
    #[arg(long, global = true)]
    pub show_unknown: bool,

    /// Dim non-sponsor listings instead of hiding them (overrides config)
    #[arg(long, global = true, conflicts_with = "hide")]
    pub dim: bool,

    /// Hide non-sponsor listings (overrides config)
    #[arg(long, global = true)]
    pub hide: bool,

    /// Show every listing without looking anything up (overrides config)
    #[arg(long, global = true)]
    pub disable_filter: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Check company names or a file of listings
    Check {
        /// Company names as they appear on job listings
        names: Vec<String>,

        /// Text, CSV or JSON file of listings (format from extension)
        #[arg(short, long, value_name = "FILE")]
        input: Option<PathBuf>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,

        /// Write the JSON report to this file as well
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Manage the verdict cache
    Cache {
        #[command(subcommand)]
        action: CacheCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum CacheCommands {
    /// List all cached companies
    List,

    /// Show the cached verdict for a company
    Show {
        /// Company name (normalized before lookup)
        name: String,
    },

    /// Clear the cached verdict for a company or all companies
    Clear {
        /// Company to clear (omit to use --all)
        name: Option<String>,

        /// Clear every cached verdict
        #[arg(long)]
        all: bool,
    },

    /// Drop expired verdicts and evict beyond the size limit
    Cleanup,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

impl Cli {
    /// Apply the policy flags on top of the configured policy
    pub fn apply_policy_overrides(&self, mut policy: FilterPolicy) -> FilterPolicy {
        if self.hide_unknown {
            policy.hide_unknown = true;
        } else if self.show_unknown {
            policy.hide_unknown = false;
        }

        if self.dim {
            policy.non_sponsor_action = NonSponsorAction::Dim;
        } else if self.hide {
            policy.non_sponsor_action = NonSponsorAction::Hide;
        }

        if self.disable_filter {
            policy.filter_enabled = false;
        }

        policy
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.init {
            return Ok(());
        }

        match &self.command {
            None => Err("A command is required (use 'check' or 'cache', or --init)".to_string()),
            Some(Commands::Check { names, input, .. }) => {
                if names.is_empty() && input.is_none() {
                    return Err("Provide company names or --input FILE".to_string());
                }
                Ok(())
            }
            Some(Commands::Cache { action: CacheCommands::Clear { name, all } }) => {
                if name.is_none() && !all {
                    return Err("Specify a company name or use --all".to_string());
                }
                if name.is_some() && *all {
                    return Err("Cannot specify both a company name and --all".to_string());
                }
                Ok(())
            }
            Some(Commands::Cache { .. }) => Ok(()),
        }
    }
}
