use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;
use svo_catalog::config::{CatalogConfig, DEFAULT_EXTENSION, DEFAULT_INDEX_NAME};
use svo_catalog::scraper::ScrapeOptions;
use svo_catalog::timestamp::RANGE_FORMAT;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Directory holding the recordings
    #[arg(long, env = "SVO_CATALOG_ROOT")]
    pub root: PathBuf,

    /// Stem of the index files written into the root
    #[arg(long, env = "SVO_CATALOG_INDEX", default_value = DEFAULT_INDEX_NAME)]
    pub index_name: String,

    /// Extension of recording files
    #[arg(long, default_value = DEFAULT_EXTENSION)]
    pub extension: String,

    /// Recordings scraped concurrently
    #[arg(long, env = "SVO_CATALOG_WORKERS", default_value_t = 1)]
    pub workers: usize,

    /// Record unreadable recordings and carry on instead of aborting
    #[arg(long)]
    pub keep_going: bool,

    /// Milliseconds to wait for a single frame before skipping it
    #[arg(long, default_value_t = 2000)]
    pub frame_timeout_ms: u64,

    /// Show a progress bar while scraping
    #[arg(long)]
    pub progress: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Scrape new recordings and rewrite the index
    Build {
        /// Scrape every recording again
        #[arg(long)]
        force: bool,
        /// Keep full frame lists and lookup tables in memory
        #[arg(long)]
        with_lookup: bool,
    },
    /// Read the index, scraping only recordings it does not know
    Load,
    /// List recordings overlapping a wall-clock range
    Range {
        #[arg(long)]
        start: String,
        #[arg(long)]
        end: String,
        #[arg(long, default_value = "range")]
        name: String,
        #[arg(long, default_value = RANGE_FORMAT)]
        format: String,
    },
    /// Group recordings by day or by device serial
    Group {
        #[arg(long, value_enum, default_value_t = GroupBy::Day)]
        by: GroupBy,
    },
    /// List recordings running at a wall-clock time
    At {
        time: String,
        #[arg(long, default_value = RANGE_FORMAT)]
        format: String,
    },
    /// Print timing statistics for one recording or the whole catalog
    Info { filename: Option<String> },
    /// Resolve the frame of a recording showing at a wall-clock time
    Frame {
        filename: String,
        time: String,
        #[arg(long, default_value = RANGE_FORMAT)]
        format: String,
    },
    /// Copy recordings overlapping a range into a new catalog
    Export {
        #[arg(long)]
        start: String,
        #[arg(long)]
        end: String,
        #[arg(long)]
        dest: PathBuf,
        #[arg(long, default_value = RANGE_FORMAT)]
        format: String,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroupBy {
    Day,
    Serial,
}

impl Args {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn config(&self) -> CatalogConfig {
        let (force_recreate, with_lookup) = match self.command {
            Command::Build { force, with_lookup } => (force, with_lookup),
            _ => (false, false),
        };
        CatalogConfig {
            index_name: self.index_name.clone(),
            extension: self.extension.clone(),
            with_lookup,
            force_recreate,
            workers: self.workers.max(1),
            strict: !self.keep_going,
            scrape: ScrapeOptions {
                acquire_timeout: Duration::from_millis(self.frame_timeout_ms),
                show_progress: self.progress,
                ..ScrapeOptions::default()
            },
        }
    }
}
