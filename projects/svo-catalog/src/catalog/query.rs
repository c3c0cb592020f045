// Range filtering and grouping over catalog entries

use super::Catalog;
use crate::error::TimeError;
use crate::index::FrameIndex;
use crate::timestamp::{format_in, parse_in, DAY_FORMAT, RANGE_FORMAT};
use chrono::{Local, TimeZone};
use std::collections::BTreeMap;
use std::fmt::Display;

/// A named wall-clock interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Range {
    pub name: String,
    pub start: u64,
    pub end: u64,
}

impl Range {
    pub fn new(name: impl Into<String>, start: u64, end: u64) -> Self {
        Self {
            name: name.into(),
            start,
            end,
        }
    }

    /// Parses local `dd/mm/YYYY HH:MM:SS` bounds.
    pub fn parse(name: &str, start: &str, end: &str) -> Result<Self, TimeError> {
        Self::parse_in(name, start, end, RANGE_FORMAT, &Local)
    }

    pub fn parse_in<Tz: TimeZone>(
        name: &str,
        start: &str,
        end: &str,
        format: &str,
        tz: &Tz,
    ) -> Result<Self, TimeError> {
        Ok(Self::new(
            name,
            parse_in(start, format, tz)?,
            parse_in(end, format, tz)?,
        ))
    }

    pub fn is_valid(&self) -> bool {
        self.start <= self.end
    }
}

/// Inclusive overlap between a recording and a query interval: either end of
/// the recording lies inside the query, or the recording wraps it.
pub fn overlaps(entry_start: u64, entry_end: u64, query_start: u64, query_end: u64) -> bool {
    let start_inside = entry_start >= query_start && entry_start <= query_end;
    let end_inside = entry_end >= query_start && entry_end <= query_end;
    let wraps = entry_start <= query_start && entry_end >= query_end;
    start_inside || end_inside || wraps
}

impl Catalog {
    /// Entries whose span overlaps `[start, end]`, in catalog order.
    pub fn filtered_by_range(&self, start: u64, end: u64) -> Vec<&FrameIndex> {
        if self.is_empty() {
            tracing::warn!("catalog {} is empty, nothing to filter", self.directory().display());
            return Vec::new();
        }
        if start > end {
            tracing::warn!("range start {} is after its end {}", start, end);
            return Vec::new();
        }
        self.entries()
            .iter()
            .filter(|entry| match (entry.start(), entry.end()) {
                (Ok(s), Ok(e)) => overlaps(s, e, start, end),
                _ => false,
            })
            .collect()
    }

    pub fn filtered_by(&self, range: &Range) -> Vec<&FrameIndex> {
        let found = self.filtered_by_range(range.start, range.end);
        tracing::debug!("range {}: {} recordings", range.name, found.len());
        found
    }

    /// Entries overlapping any of `ranges`, each once, in catalog order.
    pub fn filtered_by_ranges(&self, ranges: &[Range]) -> Vec<&FrameIndex> {
        let mut selected = vec![false; self.len()];
        for range in ranges {
            for entry in self.filtered_by(range) {
                if let Some(pos) = self.entries().iter().position(|e| std::ptr::eq(e, entry)) {
                    selected[pos] = true;
                }
            }
        }
        self.entries()
            .iter()
            .zip(selected)
            .filter_map(|(entry, keep)| keep.then_some(entry))
            .collect()
    }
}

fn group_by<'a, K, F>(entries: &[&'a FrameIndex], key: F) -> BTreeMap<String, Vec<&'a FrameIndex>>
where
    F: Fn(&FrameIndex) -> Option<K>,
    K: Into<String>,
{
    let mut groups: BTreeMap<String, Vec<&'a FrameIndex>> = BTreeMap::new();
    for &entry in entries {
        if let Some(label) = key(entry) {
            groups.entry(label.into()).or_default().push(entry);
        }
    }
    for group in groups.values_mut() {
        group.sort_by_key(|e| e.sort_key());
    }
    groups
}

/// Groups entries by the local calendar day of their start ("Wednesday 14 Aug").
pub fn grouped_by_day<'a>(entries: &[&'a FrameIndex]) -> BTreeMap<String, Vec<&'a FrameIndex>> {
    grouped_by_day_in(entries, &Local)
}

pub fn grouped_by_day_in<'a, Tz>(
    entries: &[&'a FrameIndex],
    tz: &Tz,
) -> BTreeMap<String, Vec<&'a FrameIndex>>
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    group_by(entries, |entry| {
        let start = entry.start().ok()?;
        match format_in(start, DAY_FORMAT, tz) {
            Ok(day) => Some(day),
            Err(e) => {
                tracing::warn!("{}: no day label ({})", entry.filename, e);
                None
            }
        }
    })
}

/// Groups entries by device serial, the filename up to its first underscore.
pub fn grouped_by_serial<'a>(entries: &[&'a FrameIndex]) -> BTreeMap<String, Vec<&'a FrameIndex>> {
    group_by(entries, |entry| Some(entry.serial().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::tests::{span, BASE};
    use crate::timestamp::NANOS_PER_SECOND;
    use chrono::Utc;

    fn catalog(entries: Vec<FrameIndex>) -> Catalog {
        Catalog::from_entries("/data", "_database", entries)
    }

    #[test]
    fn test_overlap_cases() {
        assert!(overlaps(100, 200, 180, 260));
        assert!(overlaps(250, 300, 180, 260));
        assert!(overlaps(100, 300, 180, 260));
        assert!(overlaps(190, 200, 180, 260));
        assert!(overlaps(100, 180, 180, 260));
        assert!(!overlaps(100, 179, 180, 260));
        assert!(!overlaps(261, 300, 180, 260));
    }

    #[test]
    fn test_filtered_by_range() {
        let cat = catalog(vec![
            span("SN1_a.svo", 100, 200),
            span("SN1_b.svo", 250, 300),
            span("SN1_c.svo", 400, 500),
        ]);
        let names: Vec<&str> = cat
            .filtered_by_range(180, 260)
            .iter()
            .map(|e| e.filename.as_str())
            .collect();
        assert_eq!(names, vec!["SN1_a.svo", "SN1_b.svo"]);
    }

    #[test]
    fn test_filtered_by_ranges_deduplicates() {
        let cat = catalog(vec![
            span("SN1_a.svo", 100, 200),
            span("SN1_b.svo", 250, 300),
            span("SN1_c.svo", 400, 500),
        ]);
        let ranges = vec![
            Range::new("early", 150, 260),
            Range::new("late", 190, 450),
            Range::new("inverted", 900, 800),
        ];
        let names: Vec<&str> = cat
            .filtered_by_ranges(&ranges)
            .iter()
            .map(|e| e.filename.as_str())
            .collect();
        assert_eq!(names, vec!["SN1_a.svo", "SN1_b.svo", "SN1_c.svo"]);
        assert!(cat.filtered_by_ranges(&[]).is_empty());
    }

    #[test]
    fn test_malformed_range_is_empty() {
        let cat = catalog(vec![span("SN1_a.svo", 100, 200)]);
        assert!(cat.filtered_by_range(260, 180).is_empty());
        assert!(catalog(vec![]).filtered_by_range(0, 1_000).is_empty());
    }

    #[test]
    fn test_range_parse() {
        let range = Range::parse_in(
            "morning",
            "14/08/2019 11:24:00",
            "14/08/2019 11:25:00",
            RANGE_FORMAT,
            &Utc,
        )
        .unwrap();
        assert_eq!(range.start, BASE);
        assert_eq!(range.end, BASE + 60 * NANOS_PER_SECOND);
        assert!(range.is_valid());

        assert!(Range::parse_in("bad", "14-08-2019", "x", RANGE_FORMAT, &Utc).is_err());
    }

    #[test]
    fn test_grouped_by_serial() {
        let a = span("SN123_b.svo", BASE + 50, BASE + 60);
        let b = span("SN123_a.svo", BASE + 10, BASE + 20);
        let c = span("SN9_a.svo", BASE, BASE + 5);
        let groups = grouped_by_serial(&[&a, &b, &c]);

        assert_eq!(groups.len(), 2);
        let sn123: Vec<&str> = groups["SN123"].iter().map(|e| e.filename.as_str()).collect();
        assert_eq!(sn123, vec!["SN123_a.svo", "SN123_b.svo"]);
        assert_eq!(groups["SN9"].len(), 1);
    }

    #[test]
    fn test_grouped_by_day() {
        let day = 24 * 3600 * NANOS_PER_SECOND;
        let a = span("SN1_a.svo", BASE, BASE + 10);
        let b = span("SN1_b.svo", BASE + day, BASE + day + 10);
        let c = span("SN2_a.svo", BASE - 5, BASE + 10);
        let groups = grouped_by_day_in(&[&a, &b, &c], &Utc);

        assert_eq!(groups.len(), 2);
        let wednesday: Vec<&str> = groups["Wednesday 14 Aug"]
            .iter()
            .map(|e| e.filename.as_str())
            .collect();
        assert_eq!(wednesday, vec!["SN2_a.svo", "SN1_a.svo"]);
        assert_eq!(groups["Thursday 15 Aug"].len(), 1);
    }

    #[test]
    fn test_groups_keep_input_order_on_equal_starts() {
        let late = span("SN1_c.svo", BASE + 10, BASE + 20);
        let z = span("SN1_z.svo", BASE, BASE + 5);
        let a = span("SN1_a.svo", BASE, BASE + 9);

        let by_serial = grouped_by_serial(&[&late, &z, &a]);
        let names: Vec<&str> = by_serial["SN1"].iter().map(|e| e.filename.as_str()).collect();
        assert_eq!(names, vec!["SN1_z.svo", "SN1_a.svo", "SN1_c.svo"]);

        let by_day = grouped_by_day_in(&[&a, &late, &z], &Utc);
        let day = by_day.values().next().unwrap();
        let names: Vec<&str> = day.iter().map(|e| e.filename.as_str()).collect();
        assert_eq!(names, vec!["SN1_a.svo", "SN1_z.svo", "SN1_c.svo"]);
    }
}
