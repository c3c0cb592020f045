// Lookup-table construction and tail ordering repair
//
// The lookup table resamples an irregular frame sequence onto uniform ticks at
// the nominal frame rate: slot i holds the frame to show at virtual tick i.

use super::Frame;
use crate::timestamp::duration_millis;

/// Number of nominal ticks covered by a gap between two frames.
pub fn repetitions(gap_millis: i64, step_millis: f64) -> usize {
    if gap_millis <= 0 || !step_millis.is_finite() || step_millis <= 0.0 {
        return 0;
    }
    (gap_millis as f64 / step_millis).round() as usize
}

/// Incrementally builds a lookup table from frames fed in capture order.
#[derive(Debug, Clone)]
pub struct LookupBuilder {
    step_millis: f64,
    previous: Option<u64>,
    table: Vec<usize>,
    total_repetitions: usize,
}

impl LookupBuilder {
    pub fn new(fps: f64) -> Self {
        let step_millis = if fps > 0.0 { 1000.0 / fps } else { f64::INFINITY };
        Self {
            step_millis,
            previous: None,
            table: Vec::new(),
            total_repetitions: 0,
        }
    }

    /// Appends `frame` once per nominal tick elapsed since the previous frame.
    /// The first frame contributes nothing. Returns the repetition count.
    pub fn push(&mut self, frame: &Frame) -> usize {
        let reps = match self.previous {
            Some(prev) => repetitions(duration_millis(prev, frame.timestamp), self.step_millis),
            None => 0,
        };
        self.table.extend(std::iter::repeat(frame.number).take(reps));
        self.total_repetitions += reps;
        self.previous = Some(frame.timestamp);
        reps
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn total_repetitions(&self) -> usize {
        self.total_repetitions
    }

    pub fn finish(self) -> Vec<usize> {
        self.table
    }

    pub fn from_frames(fps: f64, frames: &[Frame]) -> Vec<usize> {
        let mut builder = Self::new(fps);
        for frame in frames {
            builder.push(frame);
        }
        builder.finish()
    }
}

/// Outcome of checking a scraped sequence for a corrupt tail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderingRepair {
    Intact,
    /// Trailing frames stamped before the first frame were removed.
    Repaired { dropped: usize },
    /// No frame after the first was usable; only the first frame remains.
    Exhausted { dropped: usize },
}

/// Walks backward from the tail until the last frame is no earlier than the
/// first, truncating the corrupt frames behind it.
pub fn repair_ordering(filename: &str, frames: &mut Vec<Frame>) -> OrderingRepair {
    let (start, end) = match (frames.first(), frames.last()) {
        (Some(first), Some(last)) => (first.timestamp, last.timestamp),
        _ => return OrderingRepair::Intact,
    };
    if end >= start {
        return OrderingRepair::Intact;
    }

    let keep = frames
        .iter()
        .rposition(|f| f.timestamp >= start)
        .unwrap_or(0);
    let dropped = frames.len() - (keep + 1);
    let new_end = frames[keep].timestamp;
    frames.truncate(keep + 1);

    if keep == 0 {
        tracing::warn!(
            "{}: end timestamp {} precedes start {}, repair exhausted all {} trailing frames",
            filename,
            end,
            start,
            dropped
        );
        OrderingRepair::Exhausted { dropped }
    } else {
        tracing::warn!(
            "{}: end timestamp {} precedes start {}, dropped {} trailing frames, new end {}",
            filename,
            end,
            start,
            dropped,
            new_end
        );
        OrderingRepair::Repaired { dropped }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STEP_NS: u64 = 1_000_000_000 / 30;

    fn frame(number: usize, timestamp: u64) -> Frame {
        Frame { number, timestamp }
    }

    #[test]
    fn test_repetitions_rounding() {
        let step = 1000.0 / 30.0;
        assert_eq!(repetitions(33, step), 1);
        assert_eq!(repetitions(10, step), 0);
        assert_eq!(repetitions(66, step), 2);
        assert_eq!(repetitions(-5, step), 0);
        assert_eq!(repetitions(100, f64::INFINITY), 0);
    }

    #[test]
    fn test_first_frame_contributes_nothing() {
        let mut builder = LookupBuilder::new(30.0);
        assert_eq!(builder.push(&frame(0, 0)), 0);
        assert!(builder.is_empty());
        assert_eq!(builder.push(&frame(1, STEP_NS)), 1);
        assert_eq!(builder.finish(), vec![1]);
    }

    #[test]
    fn test_gap_repeats_frame() {
        let frames = vec![frame(0, 0), frame(1, STEP_NS), frame(2, 4 * STEP_NS + 10)];
        let table = LookupBuilder::from_frames(30.0, &frames);
        assert_eq!(table, vec![1, 2, 2, 2]);
    }

    #[test]
    fn test_total_repetitions_matches_length() {
        let mut builder = LookupBuilder::new(25.0);
        let mut t = 0;
        for n in 0..50usize {
            t += if n % 7 == 0 { 120_000_000 } else { 40_000_000 };
            builder.push(&frame(n, t));
        }
        assert_eq!(builder.total_repetitions(), builder.len());
    }

    #[test]
    fn test_repair_truncates_corrupt_tail() {
        let mut frames = vec![
            frame(0, 1_000),
            frame(1, 2_000),
            frame(2, 3_000),
            frame(3, 500),
            frame(4, 10),
        ];
        assert_eq!(
            repair_ordering("a.svo", &mut frames),
            OrderingRepair::Repaired { dropped: 2 }
        );
        assert_eq!(frames.last().map(|f| f.timestamp), Some(3_000));
    }

    #[test]
    fn test_repair_exhausted() {
        let mut frames = vec![frame(0, 1_000), frame(1, 10), frame(2, 20)];
        assert_eq!(
            repair_ordering("a.svo", &mut frames),
            OrderingRepair::Exhausted { dropped: 2 }
        );
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn test_repair_leaves_ordered_frames() {
        let mut frames = vec![frame(0, 1_000), frame(1, 2_000)];
        assert_eq!(repair_ordering("a.svo", &mut frames), OrderingRepair::Intact);
        assert_eq!(frames.len(), 2);
    }
}
