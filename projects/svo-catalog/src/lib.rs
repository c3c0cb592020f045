//! Timestamp-indexed catalog of stereo-camera recordings.
//!
//! Each recording is scraped once for its frame timestamps. The resulting
//! [`index::FrameIndex`] resamples those timestamps onto the nominal frame
//! rate so a wall-clock time maps to a frame in constant time, even across
//! dropped frames. A [`catalog::Catalog`] keeps every recording of a
//! directory ordered by start time, persists the indexes next to the
//! recordings, and answers range and grouping queries. A
//! [`scrubber::Scrubber`] keeps several open recordings aligned to one
//! playback time.

pub mod catalog;
pub mod config;
pub mod error;
pub mod index;
pub mod scraper;
pub mod scrubber;
pub mod source;
pub mod timestamp;

pub use catalog::Catalog;
pub use config::CatalogConfig;
pub use error::{CatalogError, Result};
