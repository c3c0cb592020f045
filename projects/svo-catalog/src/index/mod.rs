// Per-recording frame index
//
// A FrameIndex owns one recording's frame timestamps and its resampled lookup
// table. Entries loaded metadata-only carry just the first and last frame
// until the full frame list is attached.

pub mod lookup;

pub use lookup::{repair_ordering, LookupBuilder, OrderingRepair};

use crate::error::IndexError;
use crate::timestamp::{
    duration_millis, human_duration, human_timestamp, map_time_to_value,
    DEFAULT_TIMESTAMP_FORMAT,
};
use std::path::PathBuf;

/// One captured frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub number: usize,
    /// Nanoseconds since the Unix epoch.
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameIndex {
    pub filename: String,
    pub path: PathBuf,
    pub fps: f64,
    frames: Vec<Frame>,
    frame_count: usize,
    skipped: Vec<usize>,
    lookup: Option<Vec<usize>>,
}

impl FrameIndex {
    /// Builds a complete index from every captured frame.
    pub fn new(
        filename: impl Into<String>,
        path: impl Into<PathBuf>,
        fps: f64,
        frames: Vec<Frame>,
        skipped: Vec<usize>,
        lookup: Vec<usize>,
    ) -> Self {
        let frame_count = frames.len();
        Self {
            filename: filename.into(),
            path: path.into(),
            fps,
            frames,
            frame_count,
            skipped,
            lookup: Some(lookup),
        }
    }

    /// Builds an index carrying only the first and last frame.
    pub fn from_metadata(
        filename: impl Into<String>,
        path: impl Into<PathBuf>,
        fps: f64,
        first: Frame,
        last: Frame,
        frame_count: usize,
        skipped: Vec<usize>,
    ) -> Self {
        let frames = if frame_count <= 1 {
            vec![first]
        } else {
            vec![first, last]
        };
        Self {
            filename: filename.into(),
            path: path.into(),
            fps,
            frames,
            frame_count,
            skipped,
            lookup: None,
        }
    }

    /// Replaces the endpoint-only frame list with the full one and caches the lookup table.
    pub fn attach_full(&mut self, frames: Vec<Frame>, lookup: Vec<usize>) {
        self.frame_count = frames.len();
        self.frames = frames;
        self.lookup = Some(lookup);
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// True when every captured frame is held in memory.
    pub fn has_all_frames(&self) -> bool {
        self.frames.len() == self.frame_count
    }

    pub fn skipped(&self) -> &[usize] {
        &self.skipped
    }

    pub fn lookup(&self) -> Option<&[usize]> {
        self.lookup.as_deref()
    }

    pub fn has_lookup(&self) -> bool {
        self.lookup.is_some()
    }

    pub fn start(&self) -> Result<u64, IndexError> {
        match self.frames.first() {
            Some(frame) => Ok(frame.timestamp),
            None => {
                tracing::error!("{}: no frames to get start time", self.filename);
                Err(self.no_frames())
            }
        }
    }

    pub fn end(&self) -> Result<u64, IndexError> {
        let (first, last) = match (self.frames.first(), self.frames.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => {
                tracing::error!("{}: no frames to get end time", self.filename);
                return Err(self.no_frames());
            }
        };
        if last.timestamp < first.timestamp {
            tracing::error!(
                "{}: end timestamp {} precedes start {}",
                self.filename,
                last.timestamp,
                first.timestamp
            );
        }
        Ok(last.timestamp)
    }

    /// Start time used as the sort key; empty indexes sort first.
    pub fn sort_key(&self) -> u64 {
        self.frames.first().map(|f| f.timestamp).unwrap_or(0)
    }

    pub fn duration_millis(&self) -> i64 {
        match (self.start(), self.end()) {
            (Ok(start), Ok(end)) => duration_millis(start, end),
            _ => 0,
        }
    }

    /// Number of frames actually captured.
    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    /// Frames expected at the nominal rate over the recording's duration.
    pub fn predicted_frames(&self) -> usize {
        let seconds = self.duration_millis().max(0) as f64 / 1000.0;
        (seconds * self.fps) as usize
    }

    pub fn lookup_len(&self) -> usize {
        self.lookup.as_ref().map(Vec::len).unwrap_or(0)
    }

    /// Share of predicted frames that never arrived; zero when nothing was predicted.
    pub fn dropped_fraction(&self) -> f64 {
        let predicted = self.predicted_frames();
        if predicted == 0 {
            return 0.0;
        }
        1.0 - self.frame_count as f64 / predicted as f64
    }

    pub fn dropped_percent(&self) -> String {
        let predicted = self.predicted_frames();
        if predicted == 0 {
            return "0%".to_string();
        }
        let percent = 100.0 - (100.0 * self.frame_count as f64 / predicted as f64);
        format!("{}%", percent.round() as i64)
    }

    pub fn average_fps(&self) -> f64 {
        let seconds = self.duration_millis() as f64 / 1000.0;
        if seconds <= 0.0 {
            return 0.0;
        }
        self.frame_count as f64 / seconds
    }

    /// Device serial, taken from the filename up to the first underscore.
    pub fn serial(&self) -> &str {
        self.filename
            .split_once('_')
            .map(|(serial, _)| serial)
            .unwrap_or(&self.filename)
    }

    /// True when `timestamp` falls in `[start, end)`.
    pub fn contains(&self, timestamp: u64) -> bool {
        match (self.start(), self.end()) {
            (Ok(start), Ok(end)) => timestamp >= start && timestamp < end,
            _ => false,
        }
    }

    /// Resolves a wall-clock timestamp to the frame number to display.
    pub fn frame_for_timestamp(&self, timestamp: u64) -> Result<usize, IndexError> {
        let lookup = self
            .lookup
            .as_deref()
            .ok_or_else(|| IndexError::LookupNotLoaded {
                filename: self.filename.clone(),
            })?;
        let start = self.start()?;
        let end = self.end()?;

        if lookup.is_empty() {
            return Ok(self.frames[0].number);
        }

        let len = lookup.len();
        let slot = map_time_to_value(timestamp, start, end, 0.0, len as f64, true) as usize;
        Ok(lookup[slot.min(len - 1)])
    }

    /// Timestamp of `number`, or of the closest earlier captured frame.
    /// Requires the full frame list.
    pub fn timestamp_of_frame(&self, number: usize) -> Option<u64> {
        if !self.has_all_frames() {
            return None;
        }
        let idx = self.frames.partition_point(|f| f.number <= number);
        if idx == 0 {
            self.frames.first().map(|f| f.timestamp)
        } else {
            Some(self.frames[idx - 1].timestamp)
        }
    }

    pub fn human_duration(&self) -> String {
        match (self.start(), self.end()) {
            (Ok(start), Ok(end)) => human_duration(start, end),
            _ => human_duration(0, 0),
        }
    }

    /// Multi-line report of the recording's timing statistics.
    pub fn summary(&self) -> String {
        let stamp = |t: Result<u64, IndexError>| {
            t.ok()
                .and_then(|t| human_timestamp(t, DEFAULT_TIMESTAMP_FORMAT).ok())
                .unwrap_or_else(|| "-".to_string())
        };
        format!(
            "File: {}\nFPS: {}\nStart time: {}\nEnd time: {}\nPredicted size: {}\nActual size: {}\nLookup size: {}\nDuration: {}\nDropped amount: {}\nAverage FPS: {:.2}\n",
            self.filename,
            self.fps,
            stamp(self.start()),
            stamp(self.end()),
            self.predicted_frames(),
            self.frame_count,
            self.lookup_len(),
            self.human_duration(),
            self.dropped_percent(),
            self.average_fps(),
        )
    }

    fn no_frames(&self) -> IndexError {
        IndexError::NoFrames {
            filename: self.filename.clone(),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub const BASE: u64 = 1_565_781_840_000_000_000;

    /// Tick `t` of a 30 FPS clock starting at BASE.
    pub fn tick(t: u64) -> u64 {
        BASE + t * 1_000_000_000 / 30
    }

    /// 10 s at 30 FPS with every tenth tick lost: 270 frames over 300 ticks.
    pub fn dropped_recording() -> FrameIndex {
        let frames: Vec<Frame> = (0..=300u64)
            .filter(|t| t % 10 != 5 && *t != 150)
            .enumerate()
            .map(|(number, t)| Frame {
                number,
                timestamp: tick(t),
            })
            .collect();
        let lookup = LookupBuilder::from_frames(30.0, &frames);
        FrameIndex::new("SN123_dropped.svo", "/data/SN123_dropped.svo", 30.0, frames, vec![], lookup)
    }

    pub fn span(filename: &str, start: u64, end: u64) -> FrameIndex {
        let frames = vec![
            Frame {
                number: 0,
                timestamp: start,
            },
            Frame {
                number: 1,
                timestamp: end,
            },
        ];
        let lookup = LookupBuilder::from_frames(30.0, &frames);
        FrameIndex::new(filename, format!("/data/{}", filename), 30.0, frames, vec![], lookup)
    }

    #[test]
    fn test_dropped_recording_statistics() {
        let index = dropped_recording();
        assert_eq!(index.frame_count(), 270);
        assert_eq!(index.predicted_frames(), 300);
        assert_eq!(index.dropped_percent(), "10%");
        assert!((index.dropped_fraction() - 0.1).abs() < 1e-9);
        assert_eq!(index.lookup_len(), 300);
    }

    #[test]
    fn test_frame_for_timestamp_holds_through_drops() {
        let index = dropped_recording();
        let start = index.start().unwrap();
        let end = index.end().unwrap();

        assert_eq!(index.frame_for_timestamp(start).unwrap(), 1);
        let last = index.frames().last().unwrap().number;
        assert_eq!(index.frame_for_timestamp(end).unwrap(), last);
        assert_eq!(index.frame_for_timestamp(end + 1_000_000_000).unwrap(), last);

        // Tick 5 was dropped, so its slot holds frame 5 (captured at tick 6).
        let at_tick_5 = index.frame_for_timestamp(tick(5)).unwrap();
        assert_eq!(at_tick_5, 5);
        assert_eq!(index.frames()[5].timestamp, tick(6));
    }

    #[test]
    fn test_empty_index_reports_no_frames() {
        let index = FrameIndex::new("empty.svo", "/data/empty.svo", 30.0, vec![], vec![], vec![]);
        assert_eq!(
            index.start(),
            Err(IndexError::NoFrames {
                filename: "empty.svo".to_string()
            })
        );
        assert!(index.end().is_err());
        assert_eq!(index.sort_key(), 0);
        assert!(index.frame_for_timestamp(BASE).is_err());
    }

    #[test]
    fn test_metadata_only_needs_lookup() {
        let full = dropped_recording();
        let first = full.frames()[0];
        let last = *full.frames().last().unwrap();
        let meta = FrameIndex::from_metadata(
            full.filename.clone(),
            full.path.clone(),
            30.0,
            first,
            last,
            full.frame_count(),
            vec![],
        );
        assert_eq!(meta.start(), full.start());
        assert_eq!(meta.end(), full.end());
        assert_eq!(meta.frame_count(), 270);
        assert_eq!(meta.dropped_percent(), "10%");
        assert!(!meta.has_all_frames());
        assert!(matches!(
            meta.frame_for_timestamp(BASE),
            Err(IndexError::LookupNotLoaded { .. })
        ));
        assert_eq!(meta.timestamp_of_frame(3), None);
    }

    #[test]
    fn test_serial_and_contains() {
        let index = span("SN123_2019-08-14.svo", BASE, BASE + 1_000);
        assert_eq!(index.serial(), "SN123");
        assert!(index.contains(BASE));
        assert!(!index.contains(BASE + 1_000));

        let bare = span("noserial.svo", BASE, BASE + 1_000);
        assert_eq!(bare.serial(), "noserial.svo");
    }

    #[test]
    fn test_timestamp_of_frame_uses_previous_capture() {
        let frames = vec![
            Frame { number: 0, timestamp: 10 },
            Frame { number: 1, timestamp: 20 },
            Frame { number: 3, timestamp: 40 },
        ];
        let index = FrameIndex::new("a.svo", "/a.svo", 30.0, frames, vec![2], vec![]);
        assert_eq!(index.timestamp_of_frame(2), Some(20));
        assert_eq!(index.timestamp_of_frame(3), Some(40));
        assert_eq!(index.timestamp_of_frame(99), Some(40));
    }
}
