//! Argument handling for the `ingest-load` binary.

use anyhow::{Context, Result};
use clap::Parser;
use ingest_load::{LoadOptions, LoadSettings, Tables};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug, Clone)]
#[command(name = "ingest-load")]
#[command(about = "Load standardized tables into a target service")]
pub struct Args {
    /// Load settings (JSON): target, entities and key composition
    pub settings: PathBuf,

    /// Standardized tables (JSON object of table name to record array)
    pub tables: PathBuf,

    /// Override the settings' target service URL
    #[arg(long)]
    pub target_url: Option<String>,

    /// Override the settings' project id
    #[arg(long)]
    pub project_id: Option<String>,

    /// Submit records of one entity type concurrently
    #[arg(long)]
    pub use_async: bool,

    /// Maximum concurrent submissions
    #[arg(long, default_value = "16")]
    pub workers: usize,

    /// Build everything but send nothing
    #[arg(long)]
    pub dry_run: bool,

    /// Replay until a cached id starting with this token, then load
    #[arg(long)]
    pub resume_from: Option<String>,

    /// Delete the identifier cache first (ignored when resuming)
    #[arg(long)]
    pub clear_cache: bool,

    /// Directory holding identifier cache files
    #[arg(long, default_value = ".")]
    pub cache_dir: PathBuf,

    /// Directory for the sent-message log
    #[arg(long, default_value = ".")]
    pub output_dir: PathBuf,

    /// Enable verbose debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Settings from file with command-line overrides applied.
    pub fn settings(&self) -> Result<LoadSettings> {
        let mut settings = LoadSettings::from_file(&self.settings)
            .with_context(|| format!("failed to load settings from {}", self.settings.display()))?;
        if let Some(url) = &self.target_url {
            settings.target_url = url.clone();
        }
        if let Some(project) = &self.project_id {
            settings.project_id = project.clone();
        }
        settings.validate().context("invalid settings after command-line overrides")?;
        Ok(settings)
    }

    pub fn options(&self) -> LoadOptions {
        LoadOptions {
            use_async: self.use_async,
            workers: self.workers,
            dry_run: self.dry_run,
            resume_from: self.resume_from.clone(),
            clear_cache: self.clear_cache,
            cache_dir: self.cache_dir.clone(),
            output_dir: self.output_dir.clone(),
        }
    }

    /// `RUST_LOG` wins; otherwise `debug` with `--verbose`, else `info`.
    pub fn default_log_filter(&self) -> &'static str {
        if self.verbose { "debug" } else { "info" }
    }
}

pub fn read_tables(path: &Path) -> Result<Tables> {
    let file = File::open(path).with_context(|| format!("failed to open tables {}", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("failed to parse tables {}", path.display()))
}
