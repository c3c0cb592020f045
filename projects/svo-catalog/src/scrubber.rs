// Scrubber: keeps a set of open recordings aligned to one playback time
//
// Each stream allows a single seek in flight. A request arriving while the
// previous one is still running is dropped rather than queued, so rapid
// scrubbing never builds a backlog.

use crate::catalog::Catalog;
use crate::error::{CatalogError, IndexError, Result, SourceError};
use crate::index::FrameIndex;
use crate::source::{FrameSource, Grab, SourceOpener};
use crate::timestamp::{increment_seconds, map_value_to_time};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Closed,
    Open,
    Seeking,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekOutcome {
    Issued(usize),
    /// Dropped because a previous seek had not finished.
    Busy,
    Closed,
}

struct Stream {
    source: Mutex<Box<dyn FrameSource>>,
    busy: AtomicBool,
}

/// Clears the busy flag when the operation holding it ends, even by panic.
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Stream {
    /// Runs `op` on the source unless another operation is in flight.
    fn guarded<R>(
        &self,
        op: impl FnOnce(&mut dyn FrameSource) -> std::result::Result<R, SourceError>,
    ) -> std::result::Result<Option<R>, SourceError> {
        let Some(_guard) = BusyGuard::acquire(&self.busy) else {
            return Ok(None);
        };
        let mut source = self.source.lock().unwrap_or_else(PoisonError::into_inner);
        op(source.as_mut()).map(Some)
    }

    fn seek(&self, name: &str, frame: usize) -> std::result::Result<SeekOutcome, SourceError> {
        let issued = self.guarded(|source| {
            source.seek_to_frame(frame)?;
            Ok(frame)
        })?;
        Ok(match issued {
            Some(frame) => SeekOutcome::Issued(frame),
            None => {
                tracing::debug!("{}: seek to {} dropped, previous seek in flight", name, frame);
                SeekOutcome::Busy
            }
        })
    }
}

pub struct Scrubber<'a> {
    catalog: &'a Catalog,
    streams: BTreeMap<String, Stream>,
    current_time: AtomicU64,
}

impl<'a> Scrubber<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        Self {
            catalog,
            streams: BTreeMap::new(),
            current_time: AtomicU64::new(catalog.start().unwrap_or(0)),
        }
    }

    fn entry(&self, filename: &str) -> Result<&'a FrameIndex> {
        self.catalog
            .get(filename)
            .ok_or_else(|| CatalogError::UnknownEntry {
                filename: filename.to_string(),
            })
    }

    /// Opens a playback handle on `filename`. Its lookup table must be loaded.
    pub fn open(&mut self, filename: &str, opener: &dyn SourceOpener) -> Result<()> {
        if self.streams.contains_key(filename) {
            return Ok(());
        }
        let entry = self.entry(filename)?;
        if !entry.has_lookup() {
            return Err(IndexError::LookupNotLoaded {
                filename: filename.to_string(),
            }
            .into());
        }
        let source = opener.open(&entry.path).map_err(|e| CatalogError::OpenFailure {
            path: entry.path.clone(),
            reason: e.to_string(),
        })?;
        tracing::info!("opened {} for playback", filename);
        self.streams.insert(
            filename.to_string(),
            Stream {
                source: Mutex::new(source),
                busy: AtomicBool::new(false),
            },
        );
        Ok(())
    }

    pub fn close(&mut self, filename: &str) -> bool {
        match self.streams.remove(filename) {
            Some(stream) => {
                stream
                    .source
                    .into_inner()
                    .unwrap_or_else(PoisonError::into_inner)
                    .close();
                tracing::info!("closed {}", filename);
                true
            }
            None => false,
        }
    }

    /// Opens exactly `filenames`, closing every other stream.
    pub fn set_streams(&mut self, filenames: &[&str], opener: &dyn SourceOpener) -> Result<()> {
        let stale: Vec<String> = self
            .streams
            .keys()
            .filter(|name| !filenames.contains(&name.as_str()))
            .cloned()
            .collect();
        for name in stale {
            self.close(&name);
        }
        for name in filenames {
            self.open(name, opener)?;
        }
        Ok(())
    }

    pub fn state(&self, filename: &str) -> StreamState {
        match self.streams.get(filename) {
            None => StreamState::Closed,
            Some(stream) if stream.busy.load(Ordering::Acquire) => StreamState::Seeking,
            Some(_) => StreamState::Open,
        }
    }

    pub fn open_streams(&self) -> Vec<&str> {
        self.streams.keys().map(String::as_str).collect()
    }

    /// Earliest start across open streams.
    pub fn start(&self) -> Option<u64> {
        self.open_entries().filter_map(|e| e.start().ok()).min()
    }

    /// Latest end across open streams.
    pub fn end(&self) -> Option<u64> {
        self.open_entries().filter_map(|e| e.end().ok()).max()
    }

    fn open_entries(&self) -> impl Iterator<Item = &'a FrameIndex> + '_ {
        self.streams.keys().filter_map(|name| self.catalog.get(name))
    }

    pub fn current_time(&self) -> u64 {
        self.current_time.load(Ordering::Acquire)
    }

    /// Seeks one stream to an absolute frame.
    pub fn seek(&self, filename: &str, frame: usize) -> Result<SeekOutcome> {
        match self.streams.get(filename) {
            Some(stream) => Ok(stream.seek(filename, frame)?),
            None => Ok(SeekOutcome::Closed),
        }
    }

    /// Issues the per-stream seeks concurrently and gathers their outcomes.
    fn dispatch(&self, targets: Vec<(&str, &Stream, usize)>) -> Result<Vec<(String, SeekOutcome)>> {
        let joined = crossbeam::scope(|s| {
            let handles: Vec<_> = targets
                .into_iter()
                .map(|(name, stream, frame)| {
                    s.spawn(move |_| (name.to_string(), stream.seek(name, frame)))
                })
                .collect();
            handles.into_iter().map(|h| h.join()).collect::<Vec<_>>()
        })
        .map_err(|_| CatalogError::WorkerPanicked)?;

        joined
            .into_iter()
            .map(|outcome| -> Result<(String, SeekOutcome)> {
                let (name, result) = outcome.map_err(|_| CatalogError::WorkerPanicked)?;
                Ok((name, result?))
            })
            .collect()
    }

    /// Moves every open stream to the frame showing at `timestamp`.
    pub fn scrub_to_time(&self, timestamp: u64) -> Result<Vec<(String, SeekOutcome)>> {
        self.current_time.store(timestamp, Ordering::Release);
        let mut targets = Vec::with_capacity(self.streams.len());
        for (name, stream) in &self.streams {
            let frame = self.entry(name)?.frame_for_timestamp(timestamp)?;
            targets.push((name.as_str(), stream, frame));
        }
        self.dispatch(targets)
    }

    /// Maps `value` within `[in_low, in_high]` onto the open streams' time span
    /// and scrubs there. Does nothing when no stream is open.
    pub fn scrub_to_value(
        &self,
        value: f64,
        in_low: f64,
        in_high: f64,
    ) -> Result<Vec<(String, SeekOutcome)>> {
        let (Some(start), Some(end)) = (self.start(), self.end()) else {
            tracing::debug!("scrub ignored, no open streams");
            return Ok(Vec::new());
        };
        let timestamp = map_value_to_time(value, in_low, in_high, start, end, true);
        self.scrub_to_time(timestamp)
    }

    /// Jumps the playback time by `seconds` and scrubs there.
    pub fn skip_seconds(&self, seconds: f64) -> Result<Vec<(String, SeekOutcome)>> {
        let target = increment_seconds(self.current_time(), seconds);
        self.scrub_to_time(target)
    }

    /// Moves every open stream by `frames` relative to its current position.
    pub fn nudge(&self, frames: i64) -> Result<Vec<(String, SeekOutcome)>> {
        let mut outcomes = Vec::with_capacity(self.streams.len());
        for (name, stream) in &self.streams {
            let moved = stream.guarded(|source| {
                let last = source.total_frame_count().saturating_sub(1) as i64;
                let target = (source.current_frame_position() as i64 + frames).clamp(0, last.max(0));
                source.seek_to_frame(target as usize)?;
                Ok(target as usize)
            })?;
            outcomes.push((
                name.clone(),
                moved.map_or(SeekOutcome::Busy, SeekOutcome::Issued),
            ));
        }
        Ok(outcomes)
    }

    /// Grabs the next frame on every idle stream and advances the playback
    /// time to the latest frame shown. Returns the new time, if any frame arrived.
    pub fn advance(&self) -> Result<Option<u64>> {
        let mut latest = None;
        for stream in self.streams.values() {
            let grabbed = stream.guarded(|source| match source.grab_next_frame()? {
                Grab::Success => Ok(Some(source.current_frame_timestamp())),
                Grab::Timeout | Grab::EndOfStream => Ok(None),
            })?;
            if let Some(Some(timestamp)) = grabbed {
                latest = latest.max(Some(timestamp));
            }
        }
        if let Some(timestamp) = latest {
            self.current_time.store(timestamp, Ordering::Release);
        }
        Ok(latest)
    }
}

impl Drop for Scrubber<'_> {
    fn drop(&mut self) {
        let names: Vec<String> = self.streams.keys().cloned().collect();
        for name in names {
            self.close(&name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::tests::BASE;
    use crate::scraper::{scrape, ScrapeOptions};
    use crate::source::testing::{uniform_log, MemoryOpener};
    use crate::source::{FrameLog, FrameLogSource};
    use crate::timestamp::NANOS_PER_SECOND;
    use std::path::Path;
    use std::thread;
    use std::time::Duration;

    const A: &str = "/data/SN1_a.svo";
    const B: &str = "/data/SN2_a.svo";

    fn scraped(path: &str, log: FrameLog) -> FrameIndex {
        let mut source = FrameLogSource::in_memory(path, log);
        scrape(&mut source, Path::new(path), &ScrapeOptions::default())
            .unwrap()
            .index
    }

    fn setup(seek_delay: Duration) -> (Catalog, MemoryOpener) {
        let log_a = uniform_log(30.0, BASE, 300, &[]);
        let log_b = uniform_log(30.0, BASE + 5 * NANOS_PER_SECOND, 300, &[]);
        let catalog = Catalog::from_entries(
            "/data",
            "_database",
            vec![scraped(A, log_a.clone()), scraped(B, log_b.clone())],
        );
        let mut opener = MemoryOpener::default().with(A, log_a).with(B, log_b);
        opener.seek_delay = seek_delay;
        (catalog, opener)
    }

    #[test]
    fn test_open_requires_known_entry_with_lookup() {
        let (catalog, opener) = setup(Duration::ZERO);
        let mut scrubber = Scrubber::new(&catalog);
        assert!(matches!(
            scrubber.open("missing.svo", &opener),
            Err(CatalogError::UnknownEntry { .. })
        ));

        let full = catalog.get("SN1_a.svo").unwrap();
        let meta = FrameIndex::from_metadata(
            "SN1_a.svo",
            A,
            30.0,
            full.frames()[0],
            *full.frames().last().unwrap(),
            full.frame_count(),
            vec![],
        );
        let metadata_only = Catalog::from_entries("/data", "_database", vec![meta]);
        let mut scrubber = Scrubber::new(&metadata_only);
        assert!(matches!(
            scrubber.open("SN1_a.svo", &opener),
            Err(CatalogError::Index(IndexError::LookupNotLoaded { .. }))
        ));
    }

    #[test]
    fn test_scrub_to_value_seeks_every_stream() {
        let (catalog, opener) = setup(Duration::ZERO);
        let mut scrubber = Scrubber::new(&catalog);
        scrubber.set_streams(&["SN1_a.svo", "SN2_a.svo"], &opener).unwrap();

        let start = scrubber.start().unwrap();
        let end = scrubber.end().unwrap();
        assert_eq!(start, BASE);

        let outcomes = scrubber.scrub_to_value(50.0, 0.0, 100.0).unwrap();
        assert_eq!(outcomes.len(), 2);

        let t = scrubber.current_time();
        assert_eq!(t, map_value_to_time(50.0, 0.0, 100.0, start, end, true));
        let expect_a = catalog.get("SN1_a.svo").unwrap().frame_for_timestamp(t).unwrap();
        let expect_b = catalog.get("SN2_a.svo").unwrap().frame_for_timestamp(t).unwrap();
        assert_eq!(opener.seeks_on(A), vec![expect_a]);
        assert_eq!(opener.seeks_on(B), vec![expect_b]);
        assert!(outcomes.contains(&("SN1_a.svo".to_string(), SeekOutcome::Issued(expect_a))));
    }

    #[test]
    fn test_seek_while_busy_is_dropped() {
        let (catalog, opener) = setup(Duration::from_millis(200));
        let mut scrubber = Scrubber::new(&catalog);
        scrubber.open("SN1_a.svo", &opener).unwrap();

        let scrubber = &scrubber;
        crossbeam::scope(|s| {
            let first = s.spawn(|_| scrubber.seek("SN1_a.svo", 10).unwrap());
            thread::sleep(Duration::from_millis(50));
            assert_eq!(scrubber.state("SN1_a.svo"), StreamState::Seeking);
            assert_eq!(scrubber.seek("SN1_a.svo", 20).unwrap(), SeekOutcome::Busy);
            assert_eq!(first.join().unwrap(), SeekOutcome::Issued(10));
        })
        .unwrap();

        assert_eq!(opener.seeks_on(A), vec![10]);
        assert_eq!(scrubber.state("SN1_a.svo"), StreamState::Open);
    }

    #[test]
    fn test_skip_seconds_moves_time() {
        let (catalog, opener) = setup(Duration::ZERO);
        let mut scrubber = Scrubber::new(&catalog);
        scrubber.open("SN1_a.svo", &opener).unwrap();
        assert_eq!(scrubber.current_time(), BASE);

        scrubber.skip_seconds(2.0).unwrap();
        assert_eq!(scrubber.current_time(), BASE + 2 * NANOS_PER_SECOND);
        let entry = catalog.get("SN1_a.svo").unwrap();
        let expected = entry.frame_for_timestamp(BASE + 2 * NANOS_PER_SECOND).unwrap();
        assert_eq!(opener.seeks_on(A), vec![expected]);
    }

    #[test]
    fn test_nudge_is_relative_and_clamped() {
        let (catalog, opener) = setup(Duration::ZERO);
        let mut scrubber = Scrubber::new(&catalog);
        scrubber.open("SN1_a.svo", &opener).unwrap();

        scrubber.seek("SN1_a.svo", 10).unwrap();
        let moved = scrubber.nudge(5).unwrap();
        assert_eq!(moved, vec![("SN1_a.svo".to_string(), SeekOutcome::Issued(15))]);
        scrubber.nudge(-100).unwrap();
        scrubber.nudge(1_000).unwrap();
        assert_eq!(opener.seeks_on(A), vec![10, 15, 0, 299]);
    }

    #[test]
    fn test_advance_moves_playback_time() {
        let (catalog, opener) = setup(Duration::ZERO);
        let mut scrubber = Scrubber::new(&catalog);
        scrubber.open("SN1_a.svo", &opener).unwrap();

        scrubber.seek("SN1_a.svo", 30).unwrap();
        let shown = scrubber.advance().unwrap().unwrap();
        assert_eq!(shown, catalog.get("SN1_a.svo").unwrap().frames()[30].timestamp);
        assert_eq!(scrubber.current_time(), shown);
    }

    #[test]
    fn test_closed_streams() {
        let (catalog, opener) = setup(Duration::ZERO);
        let mut scrubber = Scrubber::new(&catalog);
        assert!(scrubber.scrub_to_value(10.0, 0.0, 100.0).unwrap().is_empty());

        scrubber.set_streams(&["SN1_a.svo", "SN2_a.svo"], &opener).unwrap();
        scrubber.set_streams(&["SN2_a.svo"], &opener).unwrap();
        assert_eq!(scrubber.open_streams(), vec!["SN2_a.svo"]);
        assert_eq!(scrubber.state("SN1_a.svo"), StreamState::Closed);
        assert_eq!(scrubber.seek("SN1_a.svo", 3).unwrap(), SeekOutcome::Closed);
        assert_eq!(opener.open_count(), 2);
    }
}
