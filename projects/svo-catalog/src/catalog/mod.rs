// Catalog: the ordered set of recordings in one directory
//
// A build pass lists eligible recordings, reuses what the persisted index
// already knows, scrapes the rest and writes the index back after every
// scrape so an interrupted pass loses at most one recording's work.

pub mod query;
pub mod store;

pub use query::{grouped_by_day, grouped_by_day_in, grouped_by_serial, overlaps, Range};
pub use store::{CatalogDocument, CatalogInfo, CatalogStore, EntryRecord, StoreMode};

use crate::config::CatalogConfig;
use crate::error::{CatalogError, IndexError, Result};
use crate::index::{FrameIndex, OrderingRepair};
use crate::scraper::{self, Scrape, ScrapeOptions};
use crate::source::SourceOpener;
use crossbeam::channel;
use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use walkdir::WalkDir;

/// A recording that could not be scraped in a keep-going pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedEntry {
    pub filename: String,
    pub path: PathBuf,
    pub reason: String,
}

/// Counters describing what a pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
    pub listed: usize,
    pub cached: usize,
    pub scraped: usize,
    pub lookups_loaded: usize,
    pub failed: usize,
    pub timeouts: usize,
    pub repaired: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PassKind {
    Build,
    Load,
}

#[derive(Debug, Clone)]
pub struct Catalog {
    directory: PathBuf,
    index_name: String,
    store: Arc<CatalogStore>,
    entries: Vec<FrameIndex>,
    total_frames: usize,
    failures: Vec<FailedEntry>,
    report: BuildReport,
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

/// Recordings directly inside `directory` with the configured extension, by name.
pub fn list_recordings(directory: &Path, config: &CatalogConfig) -> Result<Vec<PathBuf>> {
    if !directory.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} is not a directory", directory.display()),
        )
        .into());
    }
    Ok(WalkDir::new(directory)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|s| s.to_str())
                .map(|s| config.is_eligible(s))
                .unwrap_or(false)
        })
        .map(|e| e.path().to_path_buf())
        .collect())
}

/// Opens, scrapes and closes one recording.
fn scrape_file(opener: &dyn SourceOpener, path: &Path, options: &ScrapeOptions) -> Result<Scrape> {
    let mut source = opener.open(path).map_err(|e| CatalogError::OpenFailure {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let result = scraper::scrape(source.as_mut(), path, options);
    source.close();
    result
}

/// Loads the side file for `index` and attaches its frames and lookup table.
/// Returns false when no usable side file exists.
fn attach_lookup(store: &CatalogStore, index: &mut FrameIndex) -> Result<bool> {
    let Some(record) = store.read_lookup(&index.filename)? else {
        return Ok(false);
    };
    let full = record.into_index()?;
    if full.frame_count() != index.frame_count() {
        tracing::warn!(
            "{}: lookup file has {} frames but the index has {}, ignoring it",
            index.filename,
            full.frame_count(),
            index.frame_count()
        );
        return Ok(false);
    }
    let lookup = full.lookup().map(<[usize]>::to_vec).unwrap_or_default();
    index.attach_full(full.frames().to_vec(), lookup);
    Ok(true)
}

struct Pass<'a> {
    store: Arc<CatalogStore>,
    config: &'a CatalogConfig,
    /// Persisted entries awaiting a fresh scrape; kept in the index until replaced.
    retained: BTreeMap<String, FrameIndex>,
    entries: Vec<FrameIndex>,
    total_frames: usize,
    failures: Vec<FailedEntry>,
    report: BuildReport,
}

impl<'a> Pass<'a> {
    fn insert(&mut self, index: FrameIndex) {
        self.total_frames += index.frame_count();
        self.entries.push(index);
    }

    fn persist(&self) -> Result<()> {
        let all: Vec<&FrameIndex> = self.entries.iter().chain(self.retained.values()).collect();
        self.store.write(&all, StoreMode::Metadata)
    }

    /// Folds one scrape outcome into the pass. Errors only when the pass must stop.
    fn record(&mut self, path: PathBuf, result: Result<Scrape>) -> Result<()> {
        match result {
            Ok(scrape) => {
                self.report.scraped += 1;
                self.report.timeouts += scrape.report.timeouts.len();
                if scrape.report.repair != OrderingRepair::Intact {
                    self.report.repaired += 1;
                }
                self.store.write_lookup(&scrape.index)?;
                self.retained.remove(&scrape.index.filename);
                self.insert(scrape.index);
                self.persist()
            }
            Err(e) if e.is_per_file() => {
                tracing::error!("failed to scrape {}: {}", path.display(), e);
                if self.config.strict {
                    return Err(e);
                }
                self.report.failed += 1;
                self.failures.push(FailedEntry {
                    filename: file_name(&path),
                    path,
                    reason: e.to_string(),
                });
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn scrape_sequential(&mut self, opener: &dyn SourceOpener, pending: Vec<PathBuf>) -> Result<()> {
        for path in pending {
            let result = scrape_file(opener, &path, &self.config.scrape);
            self.record(path, result)?;
        }
        Ok(())
    }

    /// Scrapes on a worker pool; this thread is the only writer.
    fn scrape_parallel(&mut self, opener: &dyn SourceOpener, pending: Vec<PathBuf>) -> Result<()> {
        let workers = self.config.workers.min(pending.len());
        let config = self.config;
        let job_pool = Mutex::new(VecDeque::from(pending));
        let (result_tx, result_rx) = channel::unbounded::<(PathBuf, Result<Scrape>)>();
        let stop = AtomicBool::new(false);
        tracing::info!("scraping with {} workers", workers);

        let outcome = crossbeam::scope(|s| {
            for worker in 0..workers {
                let result_tx = result_tx.clone();
                let job_pool = &job_pool;
                let stop = &stop;
                s.spawn(move |_| {
                    tracing::debug!("scrape worker {} started", worker);
                    while !stop.load(Ordering::Relaxed) {
                        let next = job_pool
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .pop_front();
                        let Some(path) = next else {
                            break;
                        };
                        let result = scrape_file(opener, &path, &config.scrape);
                        if result_tx.send((path, result)).is_err() {
                            break;
                        }
                    }
                    tracing::debug!("scrape worker {} finished", worker);
                });
            }
            drop(result_tx);

            let mut first_error = None;
            for (path, result) in result_rx.iter() {
                if first_error.is_some() {
                    continue;
                }
                if let Err(e) = self.record(path, result) {
                    stop.store(true, Ordering::Relaxed);
                    first_error = Some(e);
                }
            }
            first_error.map_or(Ok(()), Err)
        });

        outcome.map_err(|_| CatalogError::WorkerPanicked)?
    }

    fn finish(mut self, directory: &Path) -> Catalog {
        self.entries.sort_by_key(|e| e.sort_key());
        Catalog {
            directory: directory.to_path_buf(),
            index_name: self.config.index_name.clone(),
            store: self.store,
            entries: self.entries,
            total_frames: self.total_frames,
            failures: self.failures,
            report: self.report,
        }
    }
}

impl Catalog {
    /// Builds the catalog for `directory`, scraping every recording the
    /// persisted index does not cover (or all of them with `force_recreate`).
    pub fn build(
        directory: impl AsRef<Path>,
        opener: &dyn SourceOpener,
        config: &CatalogConfig,
    ) -> Result<Self> {
        Self::run(directory.as_ref(), opener, config, PassKind::Build)
    }

    /// Reads the persisted index, scraping only recordings it does not know.
    /// The index is rewritten only when something was scraped.
    pub fn load(
        directory: impl AsRef<Path>,
        opener: &dyn SourceOpener,
        config: &CatalogConfig,
    ) -> Result<Self> {
        Self::run(directory.as_ref(), opener, config, PassKind::Load)
    }

    fn run(
        directory: &Path,
        opener: &dyn SourceOpener,
        config: &CatalogConfig,
        kind: PassKind,
    ) -> Result<Self> {
        let started = Instant::now();
        let files = list_recordings(directory, config)?;
        let store = Arc::new(CatalogStore::new(directory, config.index_name.clone()));
        let mut doc = store.read()?;
        let force = kind == PassKind::Build && config.force_recreate;

        tracing::info!(
            "{:?} pass over {}: {} recordings, {} indexed",
            kind,
            directory.display(),
            files.len(),
            doc.files.len()
        );

        let mut pass = Pass {
            store,
            config,
            retained: BTreeMap::new(),
            entries: Vec::with_capacity(files.len()),
            total_frames: 0,
            failures: Vec::new(),
            report: BuildReport {
                listed: files.len(),
                ..BuildReport::default()
            },
        };

        let mut pending = Vec::new();
        for path in files {
            let filename = file_name(&path);
            let mut index = match doc.files.remove(&filename).map(EntryRecord::into_index) {
                None => {
                    tracing::debug!("{} is not indexed yet", filename);
                    pending.push(path);
                    continue;
                }
                Some(Err(e)) => {
                    tracing::warn!("{}: indexed record is unusable ({}), scraping again", filename, e);
                    pending.push(path);
                    continue;
                }
                Some(Ok(index)) => index,
            };
            index.path = path.clone();

            if force {
                pass.retained.insert(filename, index);
                pending.push(path);
                continue;
            }

            if config.with_lookup && !index.has_lookup() {
                if attach_lookup(&pass.store, &mut index)? {
                    pass.report.lookups_loaded += 1;
                } else {
                    tracing::info!("{}: no cached lookup, scraping again", filename);
                    pass.retained.insert(filename, index);
                    pending.push(path);
                    continue;
                }
            }

            pass.report.cached += 1;
            pass.insert(index);
        }

        if !pending.is_empty() {
            if config.workers > 1 && pending.len() > 1 {
                pass.scrape_parallel(opener, pending)?;
            } else {
                pass.scrape_sequential(opener, pending)?;
            }
        }

        if kind == PassKind::Build || pass.report.scraped > 0 {
            pass.persist()?;
        }

        let report = pass.report.clone();
        let catalog = pass.finish(directory);
        tracing::info!(
            "catalog {} ready in {:?}: {} recordings, {} frames ({} cached, {} scraped, {} failed)",
            directory.display(),
            started.elapsed(),
            catalog.len(),
            catalog.total_frames,
            report.cached,
            report.scraped,
            report.failed
        );
        Ok(catalog)
    }

    /// A catalog over already-built entries; nothing is read or written.
    pub fn from_entries(
        directory: impl Into<PathBuf>,
        index_name: impl Into<String>,
        entries: Vec<FrameIndex>,
    ) -> Self {
        let directory = directory.into();
        let index_name = index_name.into();
        let store = Arc::new(CatalogStore::new(&directory, index_name.clone()));
        Self::with_store(directory, index_name, store, entries)
    }

    fn with_store(
        directory: PathBuf,
        index_name: String,
        store: Arc<CatalogStore>,
        mut entries: Vec<FrameIndex>,
    ) -> Self {
        entries.sort_by_key(|e| e.sort_key());
        let total_frames = entries.iter().map(|e| e.frame_count()).sum();
        Self {
            directory,
            index_name,
            store,
            entries,
            total_frames,
            failures: Vec::new(),
            report: BuildReport::default(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    /// The persisted index; every write for this catalog goes through it.
    pub fn store(&self) -> &CatalogStore {
        &self.store
    }

    /// Entries ordered by start time.
    pub fn entries(&self) -> &[FrameIndex] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, filename: &str) -> Option<&FrameIndex> {
        self.entries.iter().find(|e| e.filename == filename)
    }

    pub fn total_frames(&self) -> usize {
        self.total_frames
    }

    pub fn failures(&self) -> &[FailedEntry] {
        &self.failures
    }

    pub fn report(&self) -> &BuildReport {
        &self.report
    }

    pub fn info(&self) -> CatalogInfo {
        let refs: Vec<&FrameIndex> = self.entries.iter().collect();
        CatalogInfo::from_entries(&refs)
    }

    /// Earliest start across the catalog.
    pub fn start(&self) -> Option<u64> {
        self.entries.iter().filter_map(|e| e.start().ok()).min()
    }

    /// Latest end across the catalog.
    pub fn end(&self) -> Option<u64> {
        self.entries.iter().filter_map(|e| e.end().ok()).max()
    }

    /// Recordings running at `timestamp`.
    pub fn entries_at(&self, timestamp: u64) -> Vec<&FrameIndex> {
        self.entries.iter().filter(|e| e.contains(timestamp)).collect()
    }

    /// Makes sure `filename` has its full frame list and lookup table in memory.
    pub fn ensure_lookup(&mut self, filename: &str) -> Result<&FrameIndex> {
        let store = &self.store;
        let index = self
            .entries
            .iter_mut()
            .find(|e| e.filename == filename)
            .ok_or_else(|| CatalogError::UnknownEntry {
                filename: filename.to_string(),
            })?;
        if !index.has_lookup() && !attach_lookup(store, index)? {
            return Err(IndexError::LookupNotLoaded {
                filename: filename.to_string(),
            }
            .into());
        }
        Ok(index)
    }

    /// Rewrites the persisted index from the in-memory entries.
    pub fn write(&self, mode: StoreMode) -> Result<()> {
        let refs: Vec<&FrameIndex> = self.entries.iter().collect();
        self.store().write(&refs, mode)
    }

    /// Copies `selection` into `destination` and writes a full index there.
    pub fn export(
        &self,
        selection: &[&FrameIndex],
        destination: impl AsRef<Path>,
        index_name: &str,
    ) -> Result<Catalog> {
        let destination = destination.as_ref();
        fs::create_dir_all(destination)?;
        let target_store = Arc::new(CatalogStore::new(destination, index_name));

        let mut exported = Vec::with_capacity(selection.len());
        for entry in selection {
            let mut index = (*entry).clone();
            if !index.has_lookup() && !attach_lookup(&self.store, &mut index)? {
                tracing::warn!("{}: no lookup available, exporting metadata only", index.filename);
            }
            let target = destination.join(&index.filename);
            fs::copy(&index.path, &target)?;
            index.path = target;
            if index.has_lookup() && index.has_all_frames() {
                target_store.write_lookup(&index)?;
            }
            tracing::info!("exported {} to {}", index.filename, destination.display());
            exported.push(index);
        }

        let catalog = Catalog::with_store(
            destination.to_path_buf(),
            index_name.to_string(),
            target_store,
            exported,
        );
        catalog.write(StoreMode::Full)?;
        Ok(catalog)
    }
}
