use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::Local;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::RwLock;

use crate::cache::VerdictSource;
use crate::listing::{CheckReport, ListingResult};

#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub enum VerbosityLevel {
    Silent = 0,   // Only progress bar and final summary
    Summary = 1,  // Batch progress (default)
    Detailed = 2, // Per-listing verdicts and warnings
    Debug = 3,    // Everything, including cache hits
}

impl VerbosityLevel {
    pub fn from_verbose_count(count: u8) -> Self {
        match count {
            0 => VerbosityLevel::Summary,
            1 => VerbosityLevel::Detailed,
            2.. => VerbosityLevel::Debug,
        }
    }
}

/// User-facing progress output for a check run.
///
/// Messages go through the progress bar while one is active so the bar stays
/// pinned to the bottom of the terminal.
#[derive(Clone)]
pub struct CheckLogger {
    verbosity: VerbosityLevel,
    progress_bar: Arc<RwLock<Option<ProgressBar>>>,
    started_at: Arc<Mutex<Option<Instant>>>,
    log_buffer: Arc<Mutex<Vec<String>>>,
    log_file_path: Option<String>,
}

impl CheckLogger {
    pub fn new(verbosity: VerbosityLevel) -> Self {
        Self {
            verbosity,
            progress_bar: Arc::new(RwLock::new(None)),
            started_at: Arc::new(Mutex::new(None)),
            log_buffer: Arc::new(Mutex::new(Vec::new())),
            log_file_path: None,
        }
    }

    pub fn with_log_file(verbosity: VerbosityLevel, log_file_path: String) -> Self {
        Self {
            log_file_path: Some(log_file_path),
            ..Self::new(verbosity)
        }
    }

    pub fn info(&self, message: &str) {
        if self.verbosity >= VerbosityLevel::Summary {
            self.print_message("INFO", message);
        }
    }

    pub fn warn(&self, message: &str) {
        if self.verbosity >= VerbosityLevel::Detailed {
            self.print_message("WARN", message);
        }
    }

    pub fn error(&self, message: &str) {
        // never hidden
        self.print_message("ERROR", message);
    }

    pub fn debug(&self, message: &str) {
        if self.verbosity >= VerbosityLevel::Debug {
            self.print_message("DEBUG", message);
        }
    }

    fn print_message(&self, level: &str, message: &str) {
        let msg = format!("[{}] {}: {}", Local::now().format("%H:%M:%S%.3f"), level, message);

        if self.log_file_path.is_some() {
            if let Ok(mut buffer) = self.log_buffer.lock() {
                buffer.push(msg.clone());
            }
        }

        if let Ok(guard) = self.progress_bar.try_read() {
            if let Some(pb) = guard.as_ref() {
                pb.println(msg);
                return;
            }
        }

        eprintln!("{}", msg);
    }

    pub async fn start_progress(&self, total_steps: u64) {
        let pb = ProgressBar::new(total_steps);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("##-"),
        );
        pb.set_message("Starting...");

        *self.progress_bar.write().await = Some(pb);
        if let Ok(mut started) = self.started_at.lock() {
            *started = Some(Instant::now());
        }
    }

    pub async fn update_progress(&self, message: &str) {
        if let Some(pb) = self.progress_bar.read().await.as_ref() {
            pb.set_message(message.to_string());
        }
    }

    pub async fn advance_progress(&self, steps: u64) {
        if let Some(pb) = self.progress_bar.read().await.as_ref() {
            pb.inc(steps);
        }
    }

    pub async fn finish_progress(&self, final_message: &str) {
        if let Some(pb) = self.progress_bar.write().await.take() {
            pb.finish_and_clear();
        }

        let elapsed = self
            .started_at
            .lock()
            .ok()
            .and_then(|started| started.map(|s| s.elapsed()));

        match elapsed {
            Some(elapsed) => self.info(&format!("{} in {:.2}s", final_message, elapsed.as_secs_f64())),
            None => self.info(final_message),
        }
    }

    pub fn log_listing(&self, result: &ListingResult) {
        let Some(outcome) = &result.outcome else {
            self.debug(&format!("Listing {} not checked: '{}'", result.index, result.company));
            return;
        };

        match &outcome.source {
            VerdictSource::Cached => self.debug(&format!(
                "Cache hit - {}: sponsor={} -> {}",
                outcome.key, outcome.is_sponsor, result.disposition
            )),
            VerdictSource::Resolved => self.detail(&format!(
                "Resolved {}: sponsor={} -> {}",
                outcome.key, outcome.is_sponsor, result.disposition
            )),
            VerdictSource::Fallback { reason } => self.warn(&format!(
                "Could not resolve {} ({}), assuming sponsor={} -> {}",
                outcome.key, reason, outcome.is_sponsor, result.disposition
            )),
        }
    }

    fn detail(&self, message: &str) {
        if self.verbosity >= VerbosityLevel::Detailed {
            self.print_message("INFO", message);
        }
    }

    /// Summary block printed after a batch, regardless of verbosity
    pub fn print_final_summary(&self, report: &CheckReport) {
        let stats = &report.stats;

        print!("\x1b[2K\r");
        let _ = io::stdout().flush();

        println!("\n=== CHECK SUMMARY ===");
        println!("Listings Checked: {}", stats.total_jobs);
        println!("Recent Sponsors: {}", stats.sponsor_count);
        println!("Hidden: {}", stats.hidden);
        println!("Dimmed: {}", stats.dimmed);
        println!("Unknown: {}", stats.unknown);
        if stats.skipped > 0 {
            println!("Skipped (no company): {}", stats.skipped);
        }
        if !report.policy.filter_enabled {
            println!("Filter disabled: nothing was looked up");
        }
        println!("=====================\n");
    }

    /// Write buffered messages to the log file, if one was configured
    pub fn export_logs(&self) -> io::Result<()> {
        let Some(ref log_file_path) = self.log_file_path else {
            return Ok(());
        };

        if let Some(parent) = Path::new(log_file_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(log_file_path)?;

        if let Ok(buffer) = self.log_buffer.lock() {
            for entry in buffer.iter() {
                writeln!(file, "{}", entry)?;
            }
        }

        file.flush()
    }

    pub fn is_log_export_enabled(&self) -> bool {
        self.log_file_path.is_some()
    }

    pub fn get_log_count(&self) -> usize {
        self.log_buffer.lock().map(|b| b.len()).unwrap_or(0)
    }
}
