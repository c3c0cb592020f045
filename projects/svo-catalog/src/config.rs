use crate::scraper::ScrapeOptions;

pub const DEFAULT_INDEX_NAME: &str = "_database";
pub const DEFAULT_EXTENSION: &str = "svo";

/// Settings for a catalog build or load pass.
#[derive(Debug, Clone)]
pub struct CatalogConfig {
    /// Stem of the index files written into the recordings directory.
    pub index_name: String,
    /// Extension of eligible recording files, without the dot.
    pub extension: String,
    /// Attach full frame lists and lookup tables to cached entries.
    pub with_lookup: bool,
    /// Scrape every recording even when the index already has it.
    pub force_recreate: bool,
    /// Concurrent scrapes; 1 keeps the pass strictly sequential.
    pub workers: usize,
    /// Abort the pass on the first recording that cannot be scraped.
    pub strict: bool,
    pub scrape: ScrapeOptions,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            index_name: DEFAULT_INDEX_NAME.to_string(),
            extension: DEFAULT_EXTENSION.to_string(),
            with_lookup: false,
            force_recreate: false,
            workers: 1,
            strict: true,
            scrape: ScrapeOptions::default(),
        }
    }
}

impl CatalogConfig {
    pub fn is_eligible(&self, extension: &str) -> bool {
        extension.eq_ignore_ascii_case(&self.extension)
    }
}
