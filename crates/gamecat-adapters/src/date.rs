//! Release-date normalisation to `dd.mm.yyyy`.

use chrono::NaiveDate;
use gamecat_core::NOT_AVAILABLE;

const ENGLISH_MONTHS: [(&str, u32); 12] = [
    ("jan", 1),
    ("feb", 2),
    ("mar", 3),
    ("apr", 4),
    ("may", 5),
    ("jun", 6),
    ("jul", 7),
    ("aug", 8),
    ("sep", 9),
    ("oct", 10),
    ("nov", 11),
    ("dec", 12),
];

// "мар" must be tried before "ма" (май / мая).
const RUSSIAN_MONTHS: [(&str, u32); 12] = [
    ("янв", 1),
    ("фев", 2),
    ("мар", 3),
    ("апр", 4),
    ("ма", 5),
    ("июн", 6),
    ("июл", 7),
    ("авг", 8),
    ("сен", 9),
    ("окт", 10),
    ("ноя", 11),
    ("дек", 12),
];

/// Month number for an English or Russian month name or abbreviation.
pub fn month_number(token: &str) -> Option<u32> {
    let token = token.to_lowercase();
    ENGLISH_MONTHS
        .iter()
        .chain(RUSSIAN_MONTHS.iter())
        .find(|(prefix, _)| token.starts_with(prefix))
        .map(|(_, month)| *month)
}

/// Normalise storefront release-date text. Anything that does not name a real calendar day
/// (or month, for `Feb 2012`) becomes the `N/A` sentinel.
pub fn format_release_date(raw: &str) -> String {
    parse_release_date(raw)
        .map(|date| date.format("%d.%m.%Y").to_string())
        .unwrap_or_else(|| NOT_AVAILABLE.to_string())
}

pub fn parse_release_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date);
    }

    let cleaned = raw.replace([',', '.'], " ");
    let tokens: Vec<&str> = cleaned
        .split_whitespace()
        .filter(|t| *t != "г" && *t != "года")
        .collect();

    let (day, month, year) = match tokens.as_slice() {
        [day, month, year] if is_number(day) => (day.parse().ok()?, month_number(month)?, *year),
        [month, day, year] if is_number(day) => (day.parse().ok()?, month_number(month)?, *year),
        [month, year] => (1, month_number(month)?, *year),
        _ => return None,
    };
    if year.len() != 4 || !is_number(year) {
        return None;
    }
    NaiveDate::from_ymd_opt(year.parse().ok()?, month, day)
}

fn is_number(token: &str) -> bool {
    !token.is_empty() && token.chars().all(|c| c.is_ascii_digit())
}
