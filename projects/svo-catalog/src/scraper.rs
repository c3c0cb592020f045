// Scraper: walks every frame of an open source and builds its FrameIndex
//
// Acquisition is strictly sequential. Each frame gets a bounded poll-sleep
// retry; a frame that never arrives is skipped and the scrape carries on.

use crate::error::CatalogError;
use crate::index::{repair_ordering, Frame, FrameIndex, LookupBuilder, OrderingRepair};
use crate::source::{FrameSource, Grab};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

const FALLBACK_FPS: f64 = 30.0;

#[derive(Debug, Clone)]
pub struct ScrapeOptions {
    /// Longest wait for a single frame before it is skipped.
    pub acquire_timeout: Duration,
    /// Sleep between grab attempts while waiting.
    pub poll_interval: Duration,
    pub show_progress: bool,
}

impl Default for ScrapeOptions {
    fn default() -> Self {
        Self {
            acquire_timeout: Duration::from_secs(2),
            poll_interval: Duration::from_millis(1),
            show_progress: false,
        }
    }
}

/// Recoverable conditions met while scraping one recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapeReport {
    /// Positions skipped after the acquisition timeout elapsed.
    pub timeouts: Vec<usize>,
    /// Grabs whose reported position disagreed with the expected one.
    pub position_mismatches: usize,
    /// Positions the source jumped over between two successful grabs.
    pub jumped: Vec<usize>,
    pub repair: OrderingRepair,
    pub elapsed: Duration,
}

pub struct Scrape {
    pub index: FrameIndex,
    pub report: ScrapeReport,
}

enum Acquired {
    Frame,
    TimedOut,
    End,
}

fn acquire(source: &mut dyn FrameSource, options: &ScrapeOptions) -> Result<Acquired, CatalogError> {
    let deadline = Instant::now() + options.acquire_timeout;
    loop {
        match source.grab_next_frame()? {
            Grab::Success => return Ok(Acquired::Frame),
            Grab::EndOfStream => return Ok(Acquired::End),
            Grab::Timeout => {
                if Instant::now() >= deadline {
                    return Ok(Acquired::TimedOut);
                }
                thread::sleep(options.poll_interval);
            }
        }
    }
}

fn progress_bar(total: usize, options: &ScrapeOptions) -> ProgressBar {
    if !options.show_progress {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec:.1.yellow}, {eta}) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    pb
}

/// Reads every frame timestamp from `source` and builds the recording's index.
///
/// Fails with `EmptyRecording` when no frame at all could be captured.
pub fn scrape(
    source: &mut dyn FrameSource,
    path: &Path,
    options: &ScrapeOptions,
) -> Result<Scrape, CatalogError> {
    let started = Instant::now();
    let filename = path
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());

    source.seek_to_frame(0)?;
    let total = source.total_frame_count();
    let mut fps = source.nominal_fps();
    if !fps.is_finite() || fps <= 0.0 {
        tracing::warn!(
            "{}: source reported fps {}, falling back to {}",
            filename,
            fps,
            FALLBACK_FPS
        );
        fps = FALLBACK_FPS;
    }

    let pb = progress_bar(total, options);
    pb.set_message(filename.clone());

    let mut frames: Vec<Frame> = Vec::with_capacity(total);
    let mut builder = LookupBuilder::new(fps);
    let mut timeouts = Vec::new();
    let mut position_mismatches = 0;
    let mut jumped = Vec::new();
    let mut expected = 0usize;

    while source.current_frame_position() < total {
        match acquire(source, options)? {
            Acquired::Frame => {
                let number = source.current_frame_position().saturating_sub(1);
                if number != expected {
                    tracing::debug!(
                        "{}: grabbed frame {} but expected {}",
                        filename,
                        number,
                        expected
                    );
                    position_mismatches += 1;
                    if number > expected {
                        jumped.extend(expected..number);
                    }
                }
                let frame = Frame {
                    number,
                    timestamp: source.current_frame_timestamp(),
                };
                builder.push(&frame);
                frames.push(frame);
                expected = number + 1;
            }
            Acquired::TimedOut => {
                let position = source.current_frame_position();
                tracing::warn!(
                    "{}: timed out after {:?} waiting for frame {}, skipping it",
                    filename,
                    options.acquire_timeout,
                    position
                );
                timeouts.push(position);
                source.seek_to_frame(position + 1)?;
                expected = position + 1;
            }
            Acquired::End => break,
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    if frames.is_empty() {
        tracing::error!("{}: no frames captured from {} positions", filename, total);
        return Err(CatalogError::EmptyRecording {
            path: path.to_path_buf(),
        });
    }

    let repair = repair_ordering(&filename, &mut frames);
    let lookup = match repair {
        OrderingRepair::Intact => builder.finish(),
        _ => LookupBuilder::from_frames(fps, &frames),
    };

    // Frame numbers are rebuilt from the skipped list on reload.
    let mut skipped: Vec<usize> = timeouts.iter().chain(jumped.iter()).copied().collect();
    skipped.sort_unstable();
    skipped.dedup();

    let index = FrameIndex::new(filename, path, fps, frames, skipped, lookup);
    tracing::info!("scraped {}\n{}", path.display(), index.summary());

    Ok(Scrape {
        index,
        report: ScrapeReport {
            timeouts,
            position_mismatches,
            jumped,
            repair,
            elapsed: started.elapsed(),
        },
    })
}
