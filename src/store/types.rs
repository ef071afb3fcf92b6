//! Data model and search filters for the observation store

use std::collections::HashSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// The atomic retrievable unit: a short text record produced by the
/// upstream extraction pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    /// Store-assigned id. Unique, immutable, never reused.
    pub id: i64,
    pub title: String,
    pub content: String,
    pub project: String,
    pub session_id: Option<String>,
    /// Semantic event time, epoch milliseconds. May be backdated; it is
    /// independent of `created_at`.
    pub timestamp: i64,
    /// Row insert time, epoch milliseconds. Monotonic non-decreasing per
    /// process.
    pub created_at: i64,
}

/// Observation fields supplied by the caller; `id` and `created_at` are
/// assigned by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewObservation {
    pub title: String,
    pub content: String,
    pub project: String,
    pub session_id: Option<String>,
    pub timestamp: i64,
}

/// Staged raw activity awaiting promotion into observations by the
/// upstream collaborator. Never embedded or vector-searched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingEvent {
    pub id: i64,
    pub session_id: String,
    pub project: String,
    pub tool_name: String,
    pub compressed: String,
    pub timestamp: i64,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPendingEvent {
    pub session_id: String,
    pub project: String,
    pub tool_name: String,
    pub compressed: String,
    pub timestamp: i64,
}

/// Caller-supplied date filter that is not a real calendar date in strict
/// `YYYY-MM-DD` form. This is a contract violation, raised synchronously;
/// it is never swallowed like transport failures are.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FilterError {
    #[error("invalid date filter {0:?}: expected YYYY-MM-DD")]
    InvalidDateFormat(String),
    #[error("invalid date filter {0:?}: not a calendar date")]
    NotACalendarDate(String),
}

/// Strict calendar-day parser: zero-padded `YYYY-MM-DD`, and the date must
/// exist (`2024-02-29` is fine, `2025-02-30` is not).
pub fn parse_day(input: &str) -> Result<NaiveDate, FilterError> {
    let bytes = input.as_bytes();
    let well_formed = bytes.len() == 10
        && bytes[4] == b'-'
        && bytes[7] == b'-'
        && bytes
            .iter()
            .enumerate()
            .all(|(i, b)| if i == 4 || i == 7 { *b == b'-' } else { b.is_ascii_digit() });
    if !well_formed {
        return Err(FilterError::InvalidDateFormat(input.to_string()));
    }

    let year: i32 = input[0..4].parse().map_err(|_| FilterError::InvalidDateFormat(input.to_string()))?;
    let month: u32 = input[5..7].parse().map_err(|_| FilterError::InvalidDateFormat(input.to_string()))?;
    let day: u32 = input[8..10].parse().map_err(|_| FilterError::InvalidDateFormat(input.to_string()))?;

    NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| FilterError::NotACalendarDate(input.to_string()))
}

fn day_start_ms(day: NaiveDate) -> i64 {
    day.and_hms_opt(0, 0, 0)
        .expect("midnight exists for every calendar day")
        .and_utc()
        .timestamp_millis()
}

/// Filters applied to both query shapes of the store.
///
/// Calendar days are inclusive and resolved to UTC day boundaries; the
/// project filter is set membership; every file token must appear in the
/// observation content.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub projects: HashSet<String>,
    pub after: Option<NaiveDate>,
    pub before: Option<NaiveDate>,
    pub files: Vec<String>,
}

impl SearchFilters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.projects.insert(project.into());
        self
    }

    /// Lower bound (inclusive), e.g. `"2025-01-15"`. Fails on malformed or
    /// impossible dates.
    pub fn with_after(mut self, day: &str) -> Result<Self, FilterError> {
        self.after = Some(parse_day(day)?);
        Ok(self)
    }

    /// Upper bound (inclusive).
    pub fn with_before(mut self, day: &str) -> Result<Self, FilterError> {
        self.before = Some(parse_day(day)?);
        Ok(self)
    }

    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.files.push(file.into());
        self
    }

    /// Inclusive lower timestamp bound in epoch milliseconds.
    pub(crate) fn after_bound_ms(&self) -> Option<i64> {
        self.after.map(day_start_ms)
    }

    /// Exclusive upper timestamp bound: the start of the day after
    /// `before`, so the whole `before` day is included.
    pub(crate) fn before_bound_ms(&self) -> Option<i64> {
        self.before
            .and_then(|day| day.succ_opt())
            .map(day_start_ms)
    }

    /// Whether any filter narrows results after the raw query. Drives the
    /// candidate over-fetch in vector search.
    pub(crate) fn is_narrowing(&self) -> bool {
        !self.projects.is_empty()
            || self.after.is_some()
            || self.before.is_some()
            || !self.files.is_empty()
    }

    /// Post-filter predicate used after the nearest-neighbor pass.
    pub(crate) fn matches(&self, obs: &Observation) -> bool {
        if !self.projects.is_empty() && !self.projects.contains(&obs.project) {
            return false;
        }
        if let Some(after) = self.after_bound_ms() {
            if obs.timestamp < after {
                return false;
            }
        }
        if let Some(before) = self.before_bound_ms() {
            if obs.timestamp >= before {
                return false;
            }
        }
        self.files.iter().all(|file| obs.content.contains(file.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(project: &str, timestamp: i64, content: &str) -> Observation {
        Observation {
            id: 1,
            title: "t".to_string(),
            content: content.to_string(),
            project: project.to_string(),
            session_id: None,
            timestamp,
            created_at: timestamp,
        }
    }

    #[test]
    fn parse_day_accepts_real_dates() {
        assert!(parse_day("2025-01-20").is_ok());
        assert!(parse_day("2024-02-29").is_ok());
    }

    #[test]
    fn parse_day_rejects_unpadded_and_impossible() {
        assert_eq!(
            parse_day("2025-1-5"),
            Err(FilterError::InvalidDateFormat("2025-1-5".to_string()))
        );
        assert_eq!(
            parse_day("2025-13-01"),
            Err(FilterError::NotACalendarDate("2025-13-01".to_string()))
        );
        assert_eq!(
            parse_day("2025-02-30"),
            Err(FilterError::NotACalendarDate("2025-02-30".to_string()))
        );
        assert!(parse_day("not-a-date").is_err());
        assert!(parse_day("2025/01/20").is_err());
    }

    #[test]
    fn before_bound_covers_the_whole_day() {
        let filters = SearchFilters::new().with_before("2025-01-20").unwrap();
        let end_of_day = parse_day("2025-01-20")
            .unwrap()
            .and_hms_opt(23, 59, 59)
            .unwrap()
            .and_utc()
            .timestamp_millis();
        assert!(filters.matches(&obs("a", end_of_day, "")));
        assert!(!filters.matches(&obs("a", end_of_day + 1_000, "")));
    }

    #[test]
    fn file_tokens_are_all_required() {
        let filters = SearchFilters::new()
            .with_file("src/main.rs")
            .with_file("lib.rs");
        assert!(filters.matches(&obs("a", 0, "touched src/main.rs and src/lib.rs")));
        assert!(!filters.matches(&obs("a", 0, "touched src/main.rs only")));
    }

    #[test]
    fn empty_filters_match_everything() {
        let filters = SearchFilters::new();
        assert!(!filters.is_narrowing());
        assert!(filters.matches(&obs("anything", -5, "")));
    }
}
