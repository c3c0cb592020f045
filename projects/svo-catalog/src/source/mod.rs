pub mod frame_log;

use crate::error::SourceError;
use std::path::Path;

pub use frame_log::{FrameLog, FrameLogOpener, FrameLogSource, Slot};

/// Result of asking a source for its next frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grab {
    Success,
    /// Nothing arrived yet; the caller may retry.
    Timeout,
    EndOfStream,
}

/// Narrow capability interface over a recorded-frame SDK.
///
/// Positions follow the recording's own numbering: `current_frame_position`
/// is the number of the frame the next successful grab returns.
pub trait FrameSource: Send {
    fn open(&mut self, path: &Path) -> Result<(), SourceError>;
    fn is_open(&self) -> bool;
    fn seek_to_frame(&mut self, frame: usize) -> Result<(), SourceError>;
    fn grab_next_frame(&mut self) -> Result<Grab, SourceError>;
    /// Timestamp of the most recently grabbed frame.
    fn current_frame_timestamp(&self) -> u64;
    fn current_frame_position(&self) -> usize;
    fn total_frame_count(&self) -> usize;
    fn nominal_fps(&self) -> f64;
    fn close(&mut self);
}

/// Opens an independent source handle per recording.
pub trait SourceOpener: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>, SourceError>;
}

/// Any matching closure can open sources.
impl<F> SourceOpener for F
where
    F: Fn(&Path) -> Result<Box<dyn FrameSource>, SourceError> + Send + Sync,
{
    fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>, SourceError> {
        self(path)
    }
}
