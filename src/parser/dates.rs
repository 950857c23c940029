use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use regex::Regex;

static DMY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d{1,2})/(\d{1,2})/(\d{4})$").unwrap());
static DMYY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d{1,2})/(\d{1,2})/(\d{2})$").unwrap());
static DM_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d{1,2})/(\d{1,2})$").unwrap());

const GENERIC_DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d-%m-%Y", "%d.%m.%Y"];
const GENERIC_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
];

/// Day-first parse. Tries `D/M/YYYY`, `D/M/YY`, `D/M` (completed with
/// `current_year`), then a handful of generic layouts. Never fails loudly.
pub fn parse_date_in_year(text: &str, current_year: i32) -> Option<NaiveDate> {
    let cleaned = clean(text);
    if cleaned.is_empty() {
        return None;
    }

    if let Some(caps) = DMY_RE.captures(cleaned) {
        return ymd(caps[3].parse().ok()?, &caps[2], &caps[1]);
    }
    if let Some(caps) = DMYY_RE.captures(cleaned) {
        return ymd(expand_two_digit_year(caps[3].parse().ok()?), &caps[2], &caps[1]);
    }
    if let Some(caps) = DM_RE.captures(cleaned) {
        return ymd(current_year, &caps[2], &caps[1]);
    }

    parse_generic(cleaned)
}

/// Trim whitespace and one spreadsheet text-coercion apostrophe at either end.
fn clean(text: &str) -> &str {
    let t = text.trim();
    let t = t.strip_suffix('\'').unwrap_or(t);
    let t = t.strip_prefix('\'').unwrap_or(t);
    t.trim()
}

/// 00-68 → 2000s, 69-99 → 1900s.
fn expand_two_digit_year(yy: i32) -> i32 {
    if yy <= 68 {
        2000 + yy
    } else {
        1900 + yy
    }
}

fn ymd(year: i32, month: &str, day: &str) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month.parse().ok()?, day.parse().ok()?)
}

fn parse_generic(text: &str) -> Option<NaiveDate> {
    GENERIC_DATE_FORMATS
        .iter()
        .find_map(|f| NaiveDate::parse_from_str(text, f).ok())
        .or_else(|| {
            GENERIC_DATETIME_FORMATS
                .iter()
                .find_map(|f| NaiveDateTime::parse_from_str(text, f).ok())
                .map(|dt| dt.date())
        })
        .or_else(|| DateTime::parse_from_rfc3339(text).ok().map(|dt| dt.date_naive()))
}
