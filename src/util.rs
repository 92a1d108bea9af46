//! Extra utilities for use elsewhere in the API.

use time::{Duration, OffsetDateTime};
use uuid::Uuid;

pub fn current_time() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

/// The current time, nudged forward if needed so it is strictly after `previous`.
pub fn current_time_after(previous: OffsetDateTime) -> OffsetDateTime {
    let now = current_time();
    if now > previous {
        now
    } else {
        previous + Duration::microseconds(1)
    }
}

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Case-insensitive substring match; an empty needle matches everything.
pub fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// Formats a byte count the way the resource listings show it, e.g. `"12.5 KB"`.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];

    if bytes < 1024 {
        return format!("{} B", bytes);
    }

    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }

    format!("{:.1} {}", size, UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_are_human_readable() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(5 * 1024 * 1024 + 512 * 1024), "5.5 MB");
    }

    #[test]
    fn later_times_are_strictly_later() {
        let future = current_time() + Duration::hours(1);
        assert!(current_time_after(future) > future);
    }

    #[test]
    fn search_ignores_case() {
        assert!(contains_ignore_case("Spring Conference", "spring conf"));
        assert!(contains_ignore_case("anything", ""));
        assert!(!contains_ignore_case("Hall A", "hall b"));
    }
}
