//! IMAP SEARCH criteria construction
//!
//! Translates an optional date range and keyword into a search string. Pure
//! apart from reading the local clock for default bounds; the `_on` variants
//! take "today" explicitly.

use chrono::{Days, Local, NaiveDate};

use crate::errors::{AppError, AppResult};

/// Days before today used when no start date is given
const DEFAULT_LOOKBACK_DAYS: u64 = 7;

/// Inclusive calendar date range with defaults resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// Resolve optional `YYYY-MM-DD` bounds against `today`
    ///
    /// A missing start becomes seven days before `today`; a missing end
    /// becomes `today`.
    ///
    /// # Errors
    ///
    /// - `InvalidInput` if a bound is not a calendar date
    /// - `InvalidInput` if the resolved start is after the resolved end
    pub fn resolve_on(
        today: NaiveDate,
        start: Option<&str>,
        end: Option<&str>,
    ) -> AppResult<Self> {
        let start = match non_empty(start) {
            Some(s) => parse_ymd(s)?,
            None => today - Days::new(DEFAULT_LOOKBACK_DAYS),
        };
        let end = match non_empty(end) {
            Some(s) => parse_ymd(s)?,
            None => today,
        };
        if start > end {
            return Err(AppError::InvalidInput(format!(
                "start date {start} is after end date {end}"
            )));
        }
        Ok(Self { start, end })
    }

    /// Resolve optional bounds against the local date
    pub fn resolve(start: Option<&str>, end: Option<&str>) -> AppResult<Self> {
        Self::resolve_on(today(), start, end)
    }

    /// Every day in the range, oldest first
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + use<> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d <= end)
    }

    /// Number of days in the range (at least 1)
    pub fn day_count(&self) -> usize {
        usize::try_from((self.end - self.start).num_days()).map_or(usize::MAX, |n| n + 1)
    }

    /// Whether the range covers exactly one day
    pub fn is_single_day(&self) -> bool {
        self.start == self.end
    }
}

/// Current local calendar date
pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// Build the search string for optional bounds and keyword
///
/// # Errors
///
/// See [`build_criteria_on`].
pub fn build_criteria(
    start: Option<&str>,
    end: Option<&str>,
    keyword: Option<&str>,
) -> AppResult<String> {
    build_criteria_on(today(), start, end, keyword)
}

/// Build the search string relative to an explicit `today`
///
/// Single-day ranges use `ON`; longer ranges use `SINCE`/`BEFORE` with the
/// exclusive upper bound one day past the resolved end. A keyword is matched
/// against subject or body and conjoined with the date criteria.
///
/// # Errors
///
/// - `InvalidInput` for malformed or inverted dates
/// - `InvalidInput` if the keyword contains control characters or is longer
///   than 256 characters
pub fn build_criteria_on(
    today: NaiveDate,
    start: Option<&str>,
    end: Option<&str>,
    keyword: Option<&str>,
) -> AppResult<String> {
    let range = DateRange::resolve_on(today, start, end)?;
    let dates = date_criteria(&range)?;
    match keyword.filter(|k| !k.is_empty()) {
        Some(k) => {
            let k = escape_imap_quoted(k)?;
            Ok(format!("((OR SUBJECT \"{k}\" BODY \"{k}\") {dates})"))
        }
        None => Ok(dates),
    }
}

/// Date portion of the search string
///
/// # Errors
///
/// Returns `InvalidInput` if the day after `end` is not representable.
pub fn date_criteria(range: &DateRange) -> AppResult<String> {
    if range.is_single_day() {
        return Ok(format!("ON \"{}\"", imap_date(range.start)));
    }
    let before = range
        .end
        .checked_add_days(Days::new(1))
        .ok_or_else(|| AppError::invalid("end date is out of range"))?;
    Ok(format!(
        "SINCE \"{}\" BEFORE \"{}\"",
        imap_date(range.start),
        imap_date(before)
    ))
}

/// Format date as IMAP SEARCH date (e.g., "05-Jan-2024")
pub fn imap_date(date: NaiveDate) -> String {
    date.format("%d-%b-%Y").to_string()
}

/// Parse YYYY-MM-DD date string
pub fn parse_ymd(input: &str) -> AppResult<NaiveDate> {
    NaiveDate::parse_from_str(input.trim(), "%Y-%m-%d")
        .map_err(|_| AppError::InvalidInput(format!("invalid date '{input}', expected YYYY-MM-DD")))
}

/// Escape backslashes and quotes for IMAP quoted strings
fn escape_imap_quoted(input: &str) -> AppResult<String> {
    if input.chars().count() > 256 {
        return Err(AppError::invalid("keyword must be at most 256 characters"));
    }
    if input.chars().any(|ch| ch.is_control()) {
        return Err(AppError::invalid(
            "keyword must not contain control characters",
        ));
    }
    Ok(input.replace('\\', "\\\\").replace('"', "\\\""))
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}
