// CatalogStore: JSON index, CSV summary and per-file lookup side files
//
// Layout inside the recordings directory:
//   <name>.json          master index (metadata or full records)
//   <name>.csv           human-readable summary, never read back
//   <name>.lookup/<f>.json  full record for one recording

use crate::error::{CatalogError, IndexError, Result};
use crate::index::{Frame, FrameIndex, LookupBuilder};
use crate::timestamp::{human_duration, NANOS_PER_MILLI};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;

/// How much of each recording a write persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    /// First and last timestamp only.
    Metadata,
    /// Every frame timestamp and the lookup table.
    Full,
}

/// One recording as persisted.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EntryRecord {
    pub filename: String,
    pub path: String,
    pub fps: f64,
    pub frame_count: usize,
    /// Frame numbers never captured, whether timed out or jumped over.
    #[serde(default)]
    pub skipped: Vec<usize>,
    pub timestamps: Vec<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lookup: Option<Vec<usize>>,
}

impl EntryRecord {
    pub fn from_index(index: &FrameIndex, mode: StoreMode) -> Self {
        let full = mode == StoreMode::Full && index.has_all_frames();
        let frames = index.frames();
        let timestamps = if full || frames.len() <= 2 {
            frames.iter().map(|f| f.timestamp).collect()
        } else {
            let mut ends = Vec::with_capacity(2);
            ends.extend(frames.first().map(|f| f.timestamp));
            ends.extend(frames.last().map(|f| f.timestamp));
            ends
        };

        Self {
            filename: index.filename.clone(),
            path: index.path.to_string_lossy().to_string(),
            fps: index.fps,
            frame_count: index.frame_count(),
            skipped: index.skipped().to_vec(),
            timestamps,
            lookup: if full {
                index.lookup().map(|l| l.to_vec())
            } else {
                None
            },
        }
    }

    /// Frame numbers of the captured frames, in capture order.
    fn frame_numbers(&self) -> impl Iterator<Item = usize> + '_ {
        let skipped: HashSet<usize> = self.skipped.iter().copied().collect();
        (0..)
            .filter(move |n| !skipped.contains(n))
            .take(self.frame_count)
    }

    pub fn is_full(&self) -> bool {
        self.frame_count > 0 && self.timestamps.len() == self.frame_count
    }

    pub fn into_index(self) -> Result<FrameIndex, IndexError> {
        if self.timestamps.is_empty() || self.frame_count == 0 {
            return Err(IndexError::NoFrames {
                filename: self.filename,
            });
        }

        if self.is_full() {
            let frames: Vec<Frame> = self
                .frame_numbers()
                .zip(self.timestamps.iter())
                .map(|(number, &timestamp)| Frame { number, timestamp })
                .collect();
            let lookup = match self.lookup {
                Some(lookup) => lookup,
                None => LookupBuilder::from_frames(self.fps, &frames),
            };
            return Ok(FrameIndex::new(
                self.filename,
                self.path,
                self.fps,
                frames,
                self.skipped,
                lookup,
            ));
        }

        let first_number = self.frame_numbers().next().unwrap_or(0);
        let last_number = self.frame_numbers().last().unwrap_or(first_number);
        let first = Frame {
            number: first_number,
            timestamp: self.timestamps[0],
        };
        let last = Frame {
            number: last_number,
            timestamp: self.timestamps[self.timestamps.len() - 1],
        };
        Ok(FrameIndex::from_metadata(
            self.filename,
            self.path,
            self.fps,
            first,
            last,
            self.frame_count,
            self.skipped,
        ))
    }
}

/// Aggregate block written alongside the per-file records.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CatalogInfo {
    pub total_files: usize,
    pub total_frames: usize,
    pub predicted_frames: usize,
    pub dropped_percent: String,
    pub total_duration: String,
}

impl CatalogInfo {
    pub fn from_entries(entries: &[&FrameIndex]) -> Self {
        let total_frames: usize = entries.iter().map(|e| e.frame_count()).sum();
        let predicted_frames: usize = entries.iter().map(|e| e.predicted_frames()).sum();
        let total_millis: i64 = entries.iter().map(|e| e.duration_millis().max(0)).sum();
        let dropped_percent = if predicted_frames == 0 {
            "0%".to_string()
        } else {
            let percent = 100.0 - 100.0 * total_frames as f64 / predicted_frames as f64;
            format!("{}%", percent.round() as i64)
        };
        Self {
            total_files: entries.len(),
            total_frames,
            predicted_frames,
            dropped_percent,
            total_duration: human_duration(0, total_millis as u64 * NANOS_PER_MILLI),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct CatalogDocument {
    #[serde(default)]
    pub files: BTreeMap<String, EntryRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<CatalogInfo>,
}

#[derive(Serialize)]
struct MetadataRow<'a> {
    #[serde(rename = "Filename")]
    filename: &'a str,
    #[serde(rename = "Path")]
    path: String,
    #[serde(rename = "FPS")]
    fps: f64,
    #[serde(rename = "Start")]
    start: u64,
    #[serde(rename = "End")]
    end: u64,
    #[serde(rename = "Duration")]
    duration: String,
    #[serde(rename = "Frames")]
    frames: usize,
    #[serde(rename = "Predicted")]
    predicted: usize,
    #[serde(rename = "Dropped")]
    dropped: String,
}

#[derive(Serialize)]
struct FullRow<'a> {
    #[serde(rename = "Filename")]
    filename: &'a str,
    #[serde(rename = "Path")]
    path: String,
    #[serde(rename = "FPS")]
    fps: f64,
    #[serde(rename = "Timestamps")]
    timestamps: String,
    #[serde(rename = "Lookup")]
    lookup: String,
}

fn join_spaced<T: ToString>(values: impl Iterator<Item = T>) -> String {
    values.map(|v| v.to_string()).collect::<Vec<_>>().join(" ")
}

/// Writes via a sibling temporary file so readers never see a partial file.
fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut tmp_name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)
}

/// Handle on one persisted catalog. Writes through the same handle are
/// serialised; share it (the catalog holds it in an `Arc`) rather than
/// opening a second one for the same index.
#[derive(Debug)]
pub struct CatalogStore {
    directory: PathBuf,
    name: String,
    write_lock: Mutex<()>,
}

impl CatalogStore {
    pub fn new(directory: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            name: name.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn index_path(&self) -> PathBuf {
        self.directory.join(format!("{}.json", self.name))
    }

    pub fn csv_path(&self) -> PathBuf {
        self.directory.join(format!("{}.csv", self.name))
    }

    pub fn lookup_dir(&self) -> PathBuf {
        self.directory.join(format!("{}.lookup", self.name))
    }

    pub fn lookup_path(&self, filename: &str) -> PathBuf {
        self.lookup_dir().join(format!("{}.json", filename))
    }

    /// Reads the master index. A missing index is empty; an unreadable one is
    /// logged and treated as empty so every recording is scraped again.
    pub fn read(&self) -> Result<CatalogDocument> {
        let path = self.index_path();
        if !path.exists() {
            tracing::info!("no catalog index at {}, starting empty", path.display());
            return Ok(CatalogDocument::default());
        }
        let content = fs::read_to_string(&path)?;
        match serde_json::from_str(&content) {
            Ok(doc) => Ok(doc),
            Err(e) => {
                tracing::warn!(
                    "catalog index {} is unreadable ({}), rebuilding from scratch",
                    path.display(),
                    e
                );
                Ok(CatalogDocument::default())
            }
        }
    }

    /// Writes the master index and CSV summary for `entries`, sorted by start time.
    pub fn write(&self, entries: &[&FrameIndex], mode: StoreMode) -> Result<()> {
        let started = Instant::now();
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let mut sorted: Vec<&FrameIndex> = entries.to_vec();
        sorted.sort_by_key(|e| e.sort_key());

        let doc = CatalogDocument {
            files: sorted
                .iter()
                .map(|e| (e.filename.clone(), EntryRecord::from_index(e, mode)))
                .collect(),
            info: Some(CatalogInfo::from_entries(&sorted)),
        };

        fs::create_dir_all(&self.directory)?;
        let json = serde_json::to_string_pretty(&doc)?;
        write_atomic(&self.index_path(), json.as_bytes())?;
        write_atomic(&self.csv_path(), &self.render_csv(&sorted, mode)?)?;

        tracing::debug!(
            "writing catalog {} ({} files) took {:?}",
            self.index_path().display(),
            sorted.len(),
            started.elapsed()
        );
        Ok(())
    }

    fn render_csv(&self, entries: &[&FrameIndex], mode: StoreMode) -> Result<Vec<u8>> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        for entry in entries {
            let path = entry.path.to_string_lossy().to_string();
            match mode {
                StoreMode::Metadata => writer.serialize(MetadataRow {
                    filename: &entry.filename,
                    path,
                    fps: entry.fps,
                    start: entry.sort_key(),
                    end: entry.end().unwrap_or(0),
                    duration: entry.human_duration(),
                    frames: entry.frame_count(),
                    predicted: entry.predicted_frames(),
                    dropped: entry.dropped_percent(),
                })?,
                StoreMode::Full => writer.serialize(FullRow {
                    filename: &entry.filename,
                    path,
                    fps: entry.fps,
                    timestamps: join_spaced(entry.frames().iter().map(|f| f.timestamp)),
                    lookup: join_spaced(entry.lookup().unwrap_or(&[]).iter()),
                })?,
            }
        }
        writer
            .into_inner()
            .map_err(|e| CatalogError::Io(e.into_error()))
    }

    /// Persists one recording's full frame list and lookup table.
    pub fn write_lookup(&self, index: &FrameIndex) -> Result<()> {
        if !index.has_all_frames() || !index.has_lookup() {
            return Err(IndexError::LookupNotLoaded {
                filename: index.filename.clone(),
            }
            .into());
        }
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        fs::create_dir_all(self.lookup_dir())?;
        let record = EntryRecord::from_index(index, StoreMode::Full);
        let json = serde_json::to_string(&record)?;
        write_atomic(&self.lookup_path(&index.filename), json.as_bytes())?;
        Ok(())
    }

    /// Reads one recording's side file, if it exists. A corrupt side file is
    /// logged and treated as missing so the recording gets scraped again.
    pub fn read_lookup(&self, filename: &str) -> Result<Option<EntryRecord>> {
        let path = self.lookup_path(filename);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        let record: EntryRecord = match serde_json::from_str(&content) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(
                    "lookup file {} for {} is unreadable ({}), ignoring it",
                    path.display(),
                    filename,
                    e
                );
                return Ok(None);
            }
        };
        if !record.is_full() {
            tracing::warn!("lookup file {} is incomplete, ignoring it", path.display());
            return Ok(None);
        }
        Ok(Some(record))
    }
}
