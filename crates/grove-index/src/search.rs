//! Metadata search over indexed records.
//!
//! This is substring matching on names and paths, not content search.
//! Scores:
//! - name contains the query: 10
//! - full path contains it: 5
//! - language tag contains it: 3
//! - modified within a day: +5, within a week: +2
//!
//! The recency boost only applies to records that matched textually. An
//! empty query matches everything and ranks by recency alone.

use grove_core::FileRecord;
use std::time::{Duration, SystemTime};

pub const NAME_WEIGHT: f64 = 10.0;
pub const PATH_WEIGHT: f64 = 5.0;
pub const LANGUAGE_WEIGHT: f64 = 3.0;
pub const RECENT_DAY_BOOST: f64 = 5.0;
pub const RECENT_WEEK_BOOST: f64 = 2.0;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);
const WEEK: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Scores one record. Returns None if it doesn't match at all.
pub fn score_record(record: &FileRecord, query: &str, now: SystemTime) -> Option<f64> {
    let query = query.trim().to_lowercase();
    let mut score = 0.0;
    let mut matched = query.is_empty();

    if !query.is_empty() {
        if record.name.to_lowercase().contains(&query) {
            score += NAME_WEIGHT;
            matched = true;
        }
        if record.path.to_string_lossy().to_lowercase().contains(&query) {
            score += PATH_WEIGHT;
            matched = true;
        }
        if record
            .language
            .as_deref()
            .map_or(false, |lang| lang.contains(&query))
        {
            score += LANGUAGE_WEIGHT;
            matched = true;
        }
    }

    if !matched {
        return None;
    }

    if let Some(age) = record
        .modified
        .and_then(|modified| now.duration_since(modified).ok())
    {
        if age <= DAY {
            score += RECENT_DAY_BOOST;
        } else if age <= WEEK {
            score += RECENT_WEEK_BOOST;
        }
    }

    Some(score)
}

/// Ranks `records` against `query` and keeps the best `limit`.
///
/// `records` must come in insertion order; equal scores keep that order.
pub fn rank<'a, I>(records: I, query: &str, limit: usize, now: SystemTime) -> Vec<FileRecord>
where
    I: IntoIterator<Item = &'a FileRecord>,
{
    let mut scored: Vec<(f64, &FileRecord)> = records
        .into_iter()
        .filter(|record| !record.is_dir)
        .filter_map(|record| score_record(record, query, now).map(|score| (score, record)))
        .collect();

    // Stable sort keeps insertion order among ties.
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

    scored
        .into_iter()
        .take(limit)
        .map(|(score, record)| record.clone().with_relevance(score))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(path: &str, modified: Option<SystemTime>) -> FileRecord {
        FileRecord::new(path, 10, modified, false)
    }

    #[test]
    fn test_name_outranks_path() {
        let now = SystemTime::now();
        let old = now - Duration::from_secs(30 * 24 * 60 * 60);
        let records = vec![
            record("/w/button/index.ts", Some(old)),
            record("/w/src/Button.tsx", Some(old)),
        ];

        let results = rank(&records, "button", 10, now);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].name, "Button.tsx");
        assert_eq!(results[0].relevance, NAME_WEIGHT + PATH_WEIGHT);
        assert_eq!(results[1].relevance, PATH_WEIGHT);
    }

    #[test]
    fn test_recency_boost_and_ties() {
        let now = SystemTime::now();
        let records = vec![
            record("/w/a/util.rs", Some(now - Duration::from_secs(3 * 24 * 60 * 60))),
            record("/w/b/util.rs", Some(now - Duration::from_secs(60))),
            record("/w/c/util.rs", None),
            record("/w/d/util.rs", None),
        ];

        let results = rank(&records, "util", 10, now);
        let order: Vec<_> = results.iter().map(|r| r.path.to_string_lossy().into_owned()).collect();
        assert_eq!(
            order,
            vec!["/w/b/util.rs", "/w/a/util.rs", "/w/c/util.rs", "/w/d/util.rs"]
        );
        assert_eq!(results[0].relevance, NAME_WEIGHT + PATH_WEIGHT + RECENT_DAY_BOOST);
    }

    #[test]
    fn test_no_match_no_boost() {
        let now = SystemTime::now();
        let fresh = record("/w/readme.md", Some(now));
        assert_eq!(score_record(&fresh, "zzz", now), None);
        assert_eq!(score_record(&fresh, "", now), Some(RECENT_DAY_BOOST));
    }

    #[test]
    fn test_language_match_and_limit() {
        let now = SystemTime::now();
        let records = vec![record("/w/a.py", None), record("/w/b.py", None), record("/w/c.rs", None)];

        let results = rank(&records, "python", 1, now);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].name, "a.py");
        assert_eq!(results[0].relevance, LANGUAGE_WEIGHT);
    }
}
