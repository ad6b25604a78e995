//! Timeframe and effort-string parsing.
//!
//! Timeframe strings (`"2025q2"`, `"2025W07"`, `"2025h1"`, `"2025-03"`, `"2025"`)
//! resolve to an inclusive `(start, end)` date range. Effort strings (`"5d"`, `"2w"`,
//! `"1.5m"`, `"L"`) resolve to a number of calendar days.

use chrono::{Datelike, Duration, NaiveDate, Weekday};

/// Parse a timeframe label into an inclusive `(start, end)` date range.
///
/// `fiscal_year_start` is the calendar month (1-12) the fiscal year begins in;
/// quarter and half-year labels are anchored to it. Unparseable labels return `None`.
pub fn parse_timeframe(timeframe: &str, fiscal_year_start: u32) -> Option<(NaiveDate, NaiveDate)> {
    let s = timeframe.trim();
    if let Some((year, quarter)) = match_year_letter_digit(s, &['q', 'Q'], 1..=4) {
        return Some(quarter_range(year, quarter, fiscal_year_start));
    }
    if let Some((year, half)) = match_year_letter_digit(s, &['h', 'H'], 1..=2) {
        return Some(half_range(year, half, fiscal_year_start));
    }
    if let Some((year, week)) = match_year_week(s) {
        return Some(week_range(year, week));
    }
    if let Some((year, month)) = match_year_month(s) {
        let start = NaiveDate::from_ymd_opt(year, month, 1)?;
        let end = add_months(start, 1) - Duration::days(1);
        return Some((start, end));
    }
    if let Some(year) = match_bare_year(s) {
        let start = NaiveDate::from_ymd_opt(year, 1, 1)?;
        let end = NaiveDate::from_ymd_opt(year, 12, 31)?;
        return Some((start, end));
    }
    None
}

fn match_year_letter_digit(
    s: &str,
    letters: &[char; 2],
    valid: std::ops::RangeInclusive<u32>,
) -> Option<(i32, u32)> {
    let bytes: Vec<char> = s.chars().collect();
    if bytes.len() != 6 {
        return None;
    }
    let year: i32 = bytes[0..4].iter().collect::<String>().parse().ok()?;
    if bytes[4] != letters[0] && bytes[4] != letters[1] {
        return None;
    }
    let n = bytes[5].to_digit(10)?;
    if valid.contains(&n) {
        Some((year, n))
    } else {
        None
    }
}

fn match_year_week(s: &str) -> Option<(i32, u32)> {
    let bytes: Vec<char> = s.chars().collect();
    if bytes.len() != 7 {
        return None;
    }
    let year: i32 = bytes[0..4].iter().collect::<String>().parse().ok()?;
    if bytes[4] != 'w' && bytes[4] != 'W' {
        return None;
    }
    let week: u32 = bytes[5..7].iter().collect::<String>().parse().ok()?;
    if (1..=53).contains(&week) {
        Some((year, week))
    } else {
        None
    }
}

fn match_year_month(s: &str) -> Option<(i32, u32)> {
    let parts: Vec<&str> = s.split('-').collect();
    if parts.len() != 2 || parts[0].len() != 4 || parts[1].len() != 2 {
        return None;
    }
    let year: i32 = parts[0].parse().ok()?;
    let month: u32 = parts[1].parse().ok()?;
    if (1..=12).contains(&month) {
        Some((year, month))
    } else {
        None
    }
}

fn match_bare_year(s: &str) -> Option<i32> {
    if s.len() == 4 && s.chars().all(|c| c.is_ascii_digit()) {
        s.parse().ok()
    } else {
        None
    }
}

/// Move a date forward by whole calendar months, clamped to the 1st of the target month.
fn add_months(d: NaiveDate, months: i32) -> NaiveDate {
    let total = d.month0() as i32 + months;
    let year = d.year() + total.div_euclid(12);
    let month = total.rem_euclid(12) as u32 + 1;
    NaiveDate::from_ymd_opt(year, month, 1).expect("valid calendar month")
}

fn quarter_range(year: i32, quarter: u32, fiscal_year_start: u32) -> (NaiveDate, NaiveDate) {
    let start_month = ((quarter as i32 - 1) * 3 + fiscal_year_start as i32 - 1).rem_euclid(12) + 1;
    let start_year = if start_month as u32 >= fiscal_year_start {
        year
    } else {
        year + 1
    };
    let start = NaiveDate::from_ymd_opt(start_year, start_month as u32, 1).expect("valid month");
    let end = add_months(start, 3) - Duration::days(1);
    (start, end)
}

fn half_range(year: i32, half: u32, fiscal_year_start: u32) -> (NaiveDate, NaiveDate) {
    let start_month = ((half as i32 - 1) * 6 + fiscal_year_start as i32 - 1).rem_euclid(12) + 1;
    let start_year = if start_month as u32 >= fiscal_year_start {
        year
    } else {
        year + 1
    };
    let start = NaiveDate::from_ymd_opt(start_year, start_month as u32, 1).expect("valid month");
    let end = add_months(start, 6) - Duration::days(1);
    (start, end)
}

/// ISO-8601 week-date range: the Monday of week 1 is the Monday of the week
/// containing January 4th.
fn week_range(year: i32, week: u32) -> (NaiveDate, NaiveDate) {
    let jan4 = NaiveDate::from_ymd_opt(year, 1, 4).expect("jan 4 always valid");
    let offset = jan4.weekday().num_days_from_monday() as i64;
    let week1_monday = jan4 - Duration::days(offset);
    let start = week1_monday + Duration::days((week as i64 - 1) * 7);
    let end = start + Duration::days(6);
    (start, end)
}

/// Parse an effort string to a number of calendar days.
///
/// `"L"`/`"l"` is a special-case "large" effort of 60 days. Otherwise the string is a
/// leading number followed by a unit suffix: `d` (days, ×1), `w` (weeks, ×7), `m`
/// (months, ×30). An unparseable string defaults to 7.0 days.
pub fn parse_effort(effort: &str) -> f64 {
    let trimmed = effort.trim();
    if trimmed.eq_ignore_ascii_case("l") {
        return 60.0;
    }

    let lower = trimmed.to_ascii_lowercase();
    let mut split_at = lower.len();
    for (i, c) in lower.char_indices() {
        if !(c.is_ascii_digit() || c == '.') {
            split_at = i;
            break;
        }
    }
    let (number_part, suffix) = lower.split_at(split_at);
    let Ok(value) = number_part.parse::<f64>() else {
        return 7.0;
    };
    match suffix {
        "d" => value,
        "w" => value * 7.0,
        "m" => value * 30.0,
        _ => 7.0,
    }
}

/// Effective resource capacity contribution for an allocation fraction; unit-clamped
/// the way the validator treats allocations below zero or above one as configuration
/// errors rather than silently accepting them.
pub fn clamp_allocation(allocation: f64) -> f64 {
    allocation.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn parses_bare_year() {
        assert_eq!(parse_timeframe("2025", 1), Some((d(2025, 1, 1), d(2025, 12, 31))));
    }

    #[test]
    fn parses_month() {
        assert_eq!(parse_timeframe("2025-03", 1), Some((d(2025, 3, 1), d(2025, 3, 31))));
    }

    #[test]
    fn parses_month_with_30_days() {
        assert_eq!(parse_timeframe("2025-04", 1), Some((d(2025, 4, 1), d(2025, 4, 30))));
    }

    #[test]
    fn parses_quarter_default_fiscal_year() {
        assert_eq!(parse_timeframe("2025q2", 1), Some((d(2025, 4, 1), d(2025, 6, 30))));
    }

    #[test]
    fn parses_quarter_fiscal_year_rollover() {
        // FY start = October; Q1 starts in the named calendar year's October.
        assert_eq!(parse_timeframe("2025q1", 10), Some((d(2025, 10, 1), d(2025, 12, 31))));
        // Q2 rolls into the following calendar year.
        assert_eq!(parse_timeframe("2025q2", 10), Some((d(2026, 1, 1), d(2026, 3, 31))));
    }

    #[test]
    fn parses_half() {
        assert_eq!(parse_timeframe("2025h1", 1), Some((d(2025, 1, 1), d(2025, 6, 30))));
        assert_eq!(parse_timeframe("2025h2", 1), Some((d(2025, 7, 1), d(2025, 12, 31))));
    }

    #[test]
    fn parses_iso_week() {
        // Jan 4, 2025 is a Saturday; week 1 Monday is Dec 30, 2024.
        assert_eq!(parse_timeframe("2025W01", 1), Some((d(2024, 12, 30), d(2025, 1, 5))));
        assert_eq!(parse_timeframe("2025W07", 1), Some((d(2025, 2, 10), d(2025, 2, 16))));
    }

    #[test]
    fn unparseable_timeframe_returns_none() {
        assert_eq!(parse_timeframe("not-a-timeframe", 1), None);
        assert_eq!(parse_timeframe("", 1), None);
    }

    #[test]
    fn parses_effort_units() {
        assert_eq!(parse_effort("5d"), 5.0);
        assert_eq!(parse_effort("2w"), 14.0);
        assert_eq!(parse_effort("1.5m"), 45.0);
        assert_eq!(parse_effort("L"), 60.0);
        assert_eq!(parse_effort("l"), 60.0);
    }

    #[test]
    fn parse_effort_default_on_unmatched() {
        assert_eq!(parse_effort("bogus"), 7.0);
        assert_eq!(parse_effort("5x"), 7.0);
    }

    #[test]
    fn clamp_allocation_bounds() {
        assert_eq!(clamp_allocation(-0.5), 0.0);
        assert_eq!(clamp_allocation(1.5), 1.0);
        assert_eq!(clamp_allocation(0.5), 0.5);
    }
}
