// Frame source backed by a plain-text frame log
//
// Format:
//   # fps=30
//   1565781840000000000
//   1565781840033333333
//   timeout
//
// One line per frame position. `timeout` marks a frame that never arrives.

use super::{FrameSource, Grab, SourceOpener};
use crate::error::SourceError;
use std::fs;
use std::path::{Path, PathBuf};

const FALLBACK_FPS: f64 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Frame(u64),
    Timeout,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameLog {
    pub fps: f64,
    pub slots: Vec<Slot>,
}

impl FrameLog {
    pub fn parse(path: &Path, content: &str) -> Result<Self, SourceError> {
        let mut fps = None;
        let mut slots = Vec::new();

        for (idx, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(header) = line.strip_prefix('#') {
                if let Some(value) = header.trim().strip_prefix("fps=") {
                    let parsed = value.trim().parse::<f64>().map_err(|e| SourceError::Malformed {
                        path: path.to_path_buf(),
                        line: idx + 1,
                        reason: format!("bad fps {:?}: {}", value, e),
                    })?;
                    fps = Some(parsed);
                }
                continue;
            }
            if line.eq_ignore_ascii_case("timeout") {
                slots.push(Slot::Timeout);
                continue;
            }
            let timestamp = line.parse::<u64>().map_err(|e| SourceError::Malformed {
                path: path.to_path_buf(),
                line: idx + 1,
                reason: format!("bad timestamp {:?}: {}", line, e),
            })?;
            slots.push(Slot::Frame(timestamp));
        }

        let fps = match fps {
            Some(fps) if fps > 0.0 => fps,
            _ => {
                tracing::warn!(
                    "FrameLogSource: no usable fps in {}, falling back to {}",
                    path.display(),
                    FALLBACK_FPS
                );
                FALLBACK_FPS
            }
        };

        Ok(Self { fps, slots })
    }

    pub fn to_text(&self) -> String {
        let mut out = format!("# fps={}\n", self.fps);
        for slot in &self.slots {
            match slot {
                Slot::Frame(ts) => out.push_str(&ts.to_string()),
                Slot::Timeout => out.push_str("timeout"),
            }
            out.push('\n');
        }
        out
    }
}

pub struct FrameLogSource {
    path: Option<PathBuf>,
    log: FrameLog,
    position: usize,
    current_timestamp: u64,
}

impl FrameLogSource {
    pub fn new() -> Self {
        Self {
            path: None,
            log: FrameLog {
                fps: FALLBACK_FPS,
                slots: Vec::new(),
            },
            position: 0,
            current_timestamp: 0,
        }
    }

    /// An already-open source over an in-memory log.
    pub fn in_memory(path: impl Into<PathBuf>, log: FrameLog) -> Self {
        Self {
            path: Some(path.into()),
            log,
            position: 0,
            current_timestamp: 0,
        }
    }
}

impl Default for FrameLogSource {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSource for FrameLogSource {
    fn open(&mut self, path: &Path) -> Result<(), SourceError> {
        let content = fs::read_to_string(path)?;
        self.log = FrameLog::parse(path, &content)?;
        self.path = Some(path.to_path_buf());
        self.position = 0;
        self.current_timestamp = 0;

        tracing::debug!(
            "FrameLogSource: opened {}, fps={:.2}, positions={}",
            path.display(),
            self.log.fps,
            self.log.slots.len()
        );
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.path.is_some()
    }

    fn seek_to_frame(&mut self, frame: usize) -> Result<(), SourceError> {
        if !self.is_open() {
            return Err(SourceError::NotOpen);
        }
        self.position = frame.min(self.log.slots.len());
        Ok(())
    }

    fn grab_next_frame(&mut self) -> Result<Grab, SourceError> {
        if !self.is_open() {
            return Err(SourceError::NotOpen);
        }
        match self.log.slots.get(self.position) {
            None => Ok(Grab::EndOfStream),
            Some(Slot::Timeout) => Ok(Grab::Timeout),
            Some(Slot::Frame(ts)) => {
                self.current_timestamp = *ts;
                self.position += 1;
                Ok(Grab::Success)
            }
        }
    }

    fn current_frame_timestamp(&self) -> u64 {
        self.current_timestamp
    }

    fn current_frame_position(&self) -> usize {
        self.position
    }

    fn total_frame_count(&self) -> usize {
        self.log.slots.len()
    }

    fn nominal_fps(&self) -> f64 {
        self.log.fps
    }

    fn close(&mut self) {
        self.path = None;
        self.position = 0;
    }
}

/// Opens a fresh [`FrameLogSource`] for each recording.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameLogOpener;

impl SourceOpener for FrameLogOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>, SourceError> {
        let mut source = FrameLogSource::new();
        source.open(path)?;
        Ok(Box::new(source))
    }
}
