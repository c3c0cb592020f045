mod cli;

use anyhow::{Context, Result};
use cli::{Args, Command, GroupBy};
use std::collections::BTreeMap;
use svo_catalog::catalog::{grouped_by_day, grouped_by_serial, Catalog, Range};
use svo_catalog::index::FrameIndex;
use svo_catalog::source::FrameLogOpener;
use svo_catalog::timestamp::{human_timestamp, parse_timestamp, DEFAULT_TIMESTAMP_FORMAT};

fn print_entries(entries: &[&FrameIndex]) {
    for entry in entries {
        let start = entry
            .start()
            .ok()
            .and_then(|t| human_timestamp(t, DEFAULT_TIMESTAMP_FORMAT).ok())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}\t{}\t{}\t{} frames\t{} dropped",
            entry.filename,
            start,
            entry.human_duration(),
            entry.frame_count(),
            entry.dropped_percent()
        );
    }
}

fn print_groups(groups: &BTreeMap<String, Vec<&FrameIndex>>) {
    for (label, entries) in groups {
        println!("{} ({})", label, entries.len());
        print_entries(entries);
    }
}

fn main() -> Result<()> {
    // Load environment variables from .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    let args = Args::parse_args();
    let config = args.config();
    let root = args.root.as_path();
    let opener = FrameLogOpener;

    let mut catalog = match args.command {
        Command::Build { .. } => Catalog::build(root, &opener, &config),
        _ => Catalog::load(root, &opener, &config),
    }
    .with_context(|| format!("Failed to catalog recordings in {}", root.display()))?;

    for failure in catalog.failures() {
        tracing::warn!("skipped {}: {}", failure.filename, failure.reason);
    }

    match &args.command {
        Command::Build { .. } | Command::Load => {
            let info = catalog.info();
            println!(
                "{} recordings, {} frames ({} predicted, {} dropped), {}",
                info.total_files,
                info.total_frames,
                info.predicted_frames,
                info.dropped_percent,
                info.total_duration
            );
        }
        Command::Range {
            start,
            end,
            name,
            format,
        } => {
            let range = parse_range(name, start, end, format)?;
            print_entries(&catalog.filtered_by(&range));
        }
        Command::Group { by } => {
            let entries: Vec<&FrameIndex> = catalog.entries().iter().collect();
            let groups = match by {
                GroupBy::Day => grouped_by_day(&entries),
                GroupBy::Serial => grouped_by_serial(&entries),
            };
            print_groups(&groups);
        }
        Command::At { time, format } => {
            let t = parse_timestamp(time, format)
                .with_context(|| format!("Invalid time: {}", time))?;
            print_entries(&catalog.entries_at(t));
        }
        Command::Info { filename } => match filename {
            Some(filename) => {
                let entry = catalog
                    .get(filename)
                    .with_context(|| format!("No recording named {}", filename))?;
                print!("{}", entry.summary());
            }
            None => {
                for entry in catalog.entries() {
                    println!("{}", entry.summary());
                }
            }
        },
        Command::Frame {
            filename,
            time,
            format,
        } => {
            let t = parse_timestamp(time, format)
                .with_context(|| format!("Invalid time: {}", time))?;
            let entry = catalog
                .ensure_lookup(filename)
                .with_context(|| format!("Failed to load lookup for {}", filename))?;
            let frame = entry.frame_for_timestamp(t)?;
            let shown = entry
                .timestamp_of_frame(frame)
                .and_then(|ts| human_timestamp(ts, DEFAULT_TIMESTAMP_FORMAT).ok())
                .unwrap_or_else(|| "-".to_string());
            println!("{}\t{}", frame, shown);
        }
        Command::Export {
            start,
            end,
            dest,
            format,
        } => {
            let ranges = vec![parse_range("export", start, end, format)?];
            let selection = catalog.filtered_by_ranges(&ranges);
            let exported = catalog
                .export(&selection, dest, &config.index_name)
                .with_context(|| format!("Failed to export to {}", dest.display()))?;
            println!("exported {} recordings to {}", exported.len(), dest.display());
        }
    }

    Ok(())
}

fn parse_range(name: &str, start: &str, end: &str, format: &str) -> Result<Range> {
    let range = Range::parse_in(name, start, end, format, &chrono::Local)
        .with_context(|| format!("Invalid range {} .. {}", start, end))?;
    if !range.is_valid() {
        anyhow::bail!("Range {} starts after it ends", name);
    }
    Ok(range)
}
