//! Datetime formatting for remote query parameters (`YYYY-MM-DD+HH:MM:SS`).

use chrono::{NaiveDateTime, TimeDelta};

pub const REMOTE_DATETIME_FORMAT: &str = "%Y-%m-%d+%H:%M:%S";

pub const DEFAULT_WINDOW_DAYS: i64 = 90;

pub fn format_remote_datetime(at: &NaiveDateTime) -> String {
    at.format(REMOTE_DATETIME_FORMAT).to_string()
}

/// Rewrites the date/time separator (space or `T`) of user input to `+`.
pub fn normalize_remote_datetime(input: &str) -> String {
    let s = input.trim();
    match s.char_indices().nth(10) {
        Some((i, ' ' | 'T')) => format!("{}+{}", &s[..i], &s[i + 1..]),
        _ => s.to_string(),
    }
}

/// `(start, end)` covering the `days` before `end`, both formatted. A span
/// chrono cannot represent falls back to [`DEFAULT_WINDOW_DAYS`].
pub fn trailing_window(end: NaiveDateTime, days: i64) -> (String, String) {
    let back = |days: i64| TimeDelta::try_days(days).and_then(|span| end.checked_sub_signed(span));
    let start = back(days)
        .or_else(|| back(DEFAULT_WINDOW_DAYS))
        .unwrap_or(end);
    (format_remote_datetime(&start), format_remote_datetime(&end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, m: u32, d: u32, hh: u32, mm: u32, ss: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(hh, mm, ss)
            .unwrap()
    }

    #[test]
    fn formats_with_plus_separator() {
        assert_eq!(format_remote_datetime(&at(2026, 3, 5, 7, 8, 9)), "2026-03-05+07:08:09");
    }

    #[test]
    fn normalizes_space_and_t_separators() {
        assert_eq!(normalize_remote_datetime("2026-03-05 07:08:09"), "2026-03-05+07:08:09");
        assert_eq!(normalize_remote_datetime(" 2026-03-05T07:08:09 "), "2026-03-05+07:08:09");
        assert_eq!(normalize_remote_datetime("2026-03-05+07:08:09"), "2026-03-05+07:08:09");
        assert_eq!(normalize_remote_datetime("2026-03-05"), "2026-03-05");
    }

    #[test]
    fn trailing_window_spans_requested_days() {
        let (start, end) = trailing_window(at(2026, 4, 1, 12, 0, 0), 90);
        assert_eq!(start, "2026-01-01+12:00:00");
        assert_eq!(end, "2026-04-01+12:00:00");
    }

    #[test]
    fn oversized_window_falls_back_to_default() {
        let (start, end) = trailing_window(at(2026, 4, 1, 12, 0, 0), 1_000_000_000);
        assert_eq!(start, "2026-01-01+12:00:00");
        assert_eq!(end, "2026-04-01+12:00:00");

        let (start, _) = trailing_window(at(2026, 4, 1, 12, 0, 0), i64::MAX);
        assert_eq!(start, "2026-01-01+12:00:00");
    }
}
