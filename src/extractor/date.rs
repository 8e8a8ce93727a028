//! Publication date discovery and normalization
//!
//! Dates appear as free text ("vendredi 5 janvier 2024", "Friday, January 5, 2024",
//! "05/01/2024"). They are normalized to `YYYY-MM-DD`. Numeric dates are read
//! day-first before month-first.

use chrono::NaiveDate;
use regex::Regex;
use std::sync::LazyLock;

use super::clean_text;

const FRENCH_MONTHS: &[(&str, &str)] = &[
    ("janvier", "january"),
    ("février", "february"),
    ("fevrier", "february"),
    ("mars", "march"),
    ("avril", "april"),
    ("mai", "may"),
    ("juin", "june"),
    ("juillet", "july"),
    ("août", "august"),
    ("aout", "august"),
    ("septembre", "september"),
    ("octobre", "october"),
    ("novembre", "november"),
    ("décembre", "december"),
    ("decembre", "december"),
];

const DAY_FIRST_FORMATS: &[&str] = &[
    "%d %B %Y", "%d %b %Y", "%d/%m/%Y", "%d-%m-%Y", "%d.%m.%Y", "%Y-%m-%d", "%Y/%m/%d",
];

const MONTH_FIRST_FORMATS: &[&str] = &[
    "%B %d, %Y", "%B %d %Y", "%b %d, %Y", "%b %d %Y", "%m/%d/%Y", "%m-%d-%Y",
];

/// Date layouts found in document headers, most specific first
static DATE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)\b(?:monday|tuesday|wednesday|thursday|friday|saturday|sunday),\s+[a-z]+\s+\d{1,2},\s+\d{4}\b",
        r"(?i)\b[a-z]+\s+\d{1,2},\s+\d{4}\b",
        r"(?i)\b\d{1,2}(?:er)?\s+[a-zà-ÿ]+\s+\d{4}\b",
        r"\b\d{4}-\d{2}-\d{2}\b",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

static WEEKDAYS: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:lundi|mardi|mercredi|jeudi|vendredi|samedi|dimanche|monday|tuesday|wednesday|thursday|friday|saturday|sunday)\b,?",
    )
    .ok()
});

static ORDINAL_DAY: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\b(\d{1,2})(?:er|st|nd|rd|th)\b").ok());

static ISO_PREFIX: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^(\d{4})-(\d{2})-(\d{2})(?:[T ]|$)").ok());

static WORD_COUNT: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+)\s*(?:mots?|words?)\b").ok());

/// Normalize a free-text date to `YYYY-MM-DD`
///
/// Returns None when no supported layout matches or the date does not exist.
pub fn normalize_date(raw: &str) -> Option<String> {
    let value = clean_text(raw);
    if value.is_empty() {
        return None;
    }

    if let Some(caps) = ISO_PREFIX.as_ref().and_then(|re| re.captures(&value)) {
        let date = NaiveDate::from_ymd_opt(
            caps[1].parse().ok()?,
            caps[2].parse().ok()?,
            caps[3].parse().ok()?,
        )?;
        return Some(date.format("%Y-%m-%d").to_string());
    }

    let mut normalized = value.to_lowercase();
    for (french, english) in FRENCH_MONTHS {
        normalized = normalized.replace(french, english);
    }
    if let Some(re) = WEEKDAYS.as_ref() {
        normalized = re.replace_all(&normalized, "").into_owned();
    }
    if let Some(re) = ORDINAL_DAY.as_ref() {
        normalized = re.replace_all(&normalized, "$1").into_owned();
    }
    let normalized = clean_text(&normalized);
    let normalized = normalized.trim_matches(|c: char| c == ',' || c.is_whitespace());

    DAY_FIRST_FORMATS
        .iter()
        .chain(MONTH_FIRST_FORMATS)
        .find_map(|format| NaiveDate::parse_from_str(normalized, format).ok())
        .map(|date| date.format("%Y-%m-%d").to_string())
}

/// First date-looking span in `text`, as written
pub fn find_date(text: &str) -> Option<String> {
    DATE_PATTERNS
        .iter()
        .find_map(|re| re.find(text))
        .map(|m| clean_text(m.as_str()))
}

/// Fields carried by a document header line such as
/// `"Le Devoir, Actualités, vendredi 5 janvier 2024, p. A3, 812 mots"`
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HeaderParts {
    /// Date as written
    pub date_raw: Option<String>,
    /// Date as `YYYY-MM-DD`
    pub date: Option<String>,
    /// Text before the date
    pub section: Option<String>,
    /// Announced word count
    pub word_count: Option<u32>,
}

/// Split a document header into date, section and word count
pub fn parse_header(header: &str) -> HeaderParts {
    let header = clean_text(header);
    if header.is_empty() {
        return HeaderParts::default();
    }

    let word_count = WORD_COUNT
        .as_ref()
        .and_then(|re| re.captures(&header))
        .and_then(|caps| caps[1].parse().ok());

    let date_raw = find_date(&header);
    let date = date_raw.as_deref().and_then(normalize_date);

    let section = date_raw.as_deref().and_then(|raw| {
        let (prefix, _) = header.split_once(raw)?;
        let mut prefix = clean_text(prefix);
        // A weekday written before a day-first date belongs to the date
        if let Some(re) = WEEKDAYS.as_ref() {
            let trimmed = prefix.trim_end_matches([' ', ',', ';', '-', '|']);
            if let Some(last) = re.find_iter(trimmed).last() {
                if last.end() == trimmed.len() {
                    prefix = trimmed[..last.start()].to_string();
                }
            }
        }
        let prefix = prefix.trim_matches([' ', ',', ';', '-', '|']);
        (!prefix.is_empty()).then(|| prefix.to_string())
    });

    HeaderParts {
        date_raw,
        date,
        section,
        word_count,
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_french_dates() {
        assert_eq!(normalize_date("vendredi 5 janvier 2024").as_deref(), Some("2024-01-05"));
        assert_eq!(normalize_date("1er février 2023").as_deref(), Some("2023-02-01"));
        assert_eq!(normalize_date("15 aout 2022").as_deref(), Some("2022-08-15"));
        assert_eq!(normalize_date("31 Décembre 2021").as_deref(), Some("2021-12-31"));
    }

    #[test]
    fn test_normalize_english_dates() {
        assert_eq!(
            normalize_date("Friday, January 5, 2024").as_deref(),
            Some("2024-01-05")
        );
        assert_eq!(normalize_date("March 3, 2020").as_deref(), Some("2020-03-03"));
        assert_eq!(normalize_date("Sep 9 2019").as_deref(), Some("2019-09-09"));
    }

    #[test]
    fn test_numeric_dates_are_day_first() {
        assert_eq!(normalize_date("05/01/2024").as_deref(), Some("2024-01-05"));
        // Not a valid day-first date, so month-first applies
        assert_eq!(normalize_date("12/25/2024").as_deref(), Some("2024-12-25"));
        assert_eq!(normalize_date("2024-01-05T08:30:00Z").as_deref(), Some("2024-01-05"));
    }

    #[test]
    fn test_unparseable_dates() {
        assert_eq!(normalize_date(""), None);
        assert_eq!(normalize_date("hier"), None);
        assert_eq!(normalize_date("31 février 2024"), None);
        assert_eq!(normalize_date("2024-13-40"), None);
    }

    #[test]
    fn test_parse_french_header() {
        let parts = parse_header("Le Devoir, Actualités, vendredi 5 janvier 2024, p. A3 812 mots");
        assert_eq!(parts.date_raw.as_deref(), Some("5 janvier 2024"));
        assert_eq!(parts.date.as_deref(), Some("2024-01-05"));
        assert_eq!(parts.section.as_deref(), Some("Le Devoir, Actualités"));
        assert_eq!(parts.word_count, Some(812));
    }

    #[test]
    fn test_parse_english_header() {
        let parts = parse_header("News | Friday, January 5, 2024 | 450 words");
        assert_eq!(parts.date_raw.as_deref(), Some("Friday, January 5, 2024"));
        assert_eq!(parts.date.as_deref(), Some("2024-01-05"));
        assert_eq!(parts.section.as_deref(), Some("News"));
        assert_eq!(parts.word_count, Some(450));
    }

    #[test]
    fn test_parse_header_without_date() {
        let parts = parse_header("Sports 120 mots");
        assert_eq!(parts.word_count, Some(120));
        assert_eq!(parts.date_raw, None);
        assert_eq!(parts.section, None);
        assert_eq!(parse_header("   "), HeaderParts::default());
    }
}
