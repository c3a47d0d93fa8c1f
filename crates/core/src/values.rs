//! Typed interpretation of string cell values: null conventions,
//! numeric parsing, flexible date parsing, and the value-shape
//! sniffers used by profiling and governance classification.

use time::{Date, Month};

/// Null convention: empty/whitespace strings and the usual textual
/// placeholders count as missing.
pub fn is_null(value: &str) -> bool {
    let v = value.trim();
    v.is_empty() || matches!(v.to_ascii_lowercase().as_str(), "nan" | "null" | "none" | "na")
}

/// Parse a cell as a number. Returns `None` for nulls and non-numeric text.
pub fn parse_number(value: &str) -> Option<f64> {
    let v = value.trim();
    if is_null(v) {
        return None;
    }
    v.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Parse a cell as a date, returning it normalized to `YYYY-MM-DD`.
///
/// Accepted shapes: `YYYY-MM-DD`, `YYYY/MM/DD`, `M/D/YYYY`, each with
/// an optional `HH:MM` or `HH:MM:SS` tail. Calendar validity is checked
/// (`2023-02-30` does not parse).
pub fn parse_date(value: &str) -> Option<String> {
    let v = value.trim();
    if is_null(v) {
        return None;
    }

    // Strip an optional time-of-day tail.
    let date_part = v.split_once(' ').map_or(v, |(d, t)| {
        if looks_like_time(t) {
            d
        } else {
            v
        }
    });

    let (y, m, d) = if let Some((y, m, d)) = split_ymd(date_part, '-') {
        (y, m, d)
    } else if let Some((y, m, d)) = split_ymd(date_part, '/') {
        (y, m, d)
    } else if let Some((m, d, y)) = split_mdy(date_part) {
        (y, m, d)
    } else {
        return None;
    };

    let month = Month::try_from(m).ok()?;
    Date::from_calendar_date(y as i32, month, d).ok()?;
    Some(format!("{:04}-{:02}-{:02}", y, m, d))
}

/// Email shape: something@something.something, no whitespace.
pub fn looks_like_email(value: &str) -> bool {
    let v = value.trim();
    if v.contains(char::is_whitespace) {
        return false;
    }
    match v.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.ends_with('.')
        }
        None => false,
    }
}

/// Phone shape: at least seven digits, only digits and +-() space
/// separators. A value that reads as a plain number or a calendar date
/// is never phone-shaped: epoch timestamps, cent amounts, and date
/// columns carry that many digits too.
pub fn looks_like_phone(value: &str) -> bool {
    let v = value.trim();
    if parse_number(v).is_some() || parse_date(v).is_some() {
        return false;
    }
    let digits = v.chars().filter(|c| c.is_ascii_digit()).count();
    digits >= 7
        && v.chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '(' | ')' | ' ' | '.'))
}

fn looks_like_time(s: &str) -> bool {
    let parts: Vec<&str> = s.split(':').collect();
    (parts.len() == 2 || parts.len() == 3)
        && parts
            .iter()
            .all(|p| p.len() <= 2 && !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()))
}

/// `YYYY<sep>MM<sep>DD` with a four-digit year first.
fn split_ymd(s: &str, sep: char) -> Option<(u32, u8, u8)> {
    let parts: Vec<&str> = s.split(sep).collect();
    if parts.len() != 3 || parts[0].len() != 4 {
        return None;
    }
    Some((
        parts[0].parse().ok()?,
        parts[1].parse().ok()?,
        parts[2].parse().ok()?,
    ))
}

/// `M/D/YYYY` with a four-digit year last.
fn split_mdy(s: &str) -> Option<(u8, u8, u32)> {
    let parts: Vec<&str> = s.split('/').collect();
    if parts.len() != 3 || parts[2].len() != 4 {
        return None;
    }
    Some((
        parts[0].parse().ok()?,
        parts[1].parse().ok()?,
        parts[2].parse().ok()?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_convention_covers_placeholders() {
        for v in ["", "  ", "NaN", "null", "None", "NA"] {
            assert!(is_null(v), "{:?} should be null", v);
        }
        assert!(!is_null("0"));
        assert!(!is_null("n/a-ish"));
    }

    #[test]
    fn parse_number_rejects_text_and_infinities() {
        assert_eq!(parse_number(" 3.5 "), Some(3.5));
        assert_eq!(parse_number("-12"), Some(-12.0));
        assert_eq!(parse_number("abc"), None);
        assert_eq!(parse_number(""), None);
        assert_eq!(parse_number("inf"), None);
    }

    #[test]
    fn parse_date_normalizes_accepted_shapes() {
        assert_eq!(parse_date("2023-05-09"), Some("2023-05-09".into()));
        assert_eq!(parse_date("2023/05/09"), Some("2023-05-09".into()));
        assert_eq!(parse_date("5/9/2023"), Some("2023-05-09".into()));
        assert_eq!(parse_date("2023-05-09 14:30:00"), Some("2023-05-09".into()));
    }

    #[test]
    fn parse_date_rejects_invalid_calendar_dates() {
        assert_eq!(parse_date("2023-02-30"), None);
        assert_eq!(parse_date("2023-13-01"), None);
        assert_eq!(parse_date("not-a-date"), None);
        assert_eq!(parse_date("20230509"), None);
    }

    #[test]
    fn email_and_phone_shapes() {
        assert!(looks_like_email("a.person@example.com"));
        assert!(!looks_like_email("not an email"));
        assert!(!looks_like_email("trailing@dot."));
        assert!(looks_like_phone("+49 (30) 1234567"));
        assert!(looks_like_phone("030-12345678"));
        assert!(!looks_like_phone("12345"));
        assert!(!looks_like_phone("call me maybe"));
    }

    #[test]
    fn numbers_and_dates_are_not_phone_shaped() {
        // Epoch seconds, cent amounts, and dates all carry seven or
        // more digits without being contact data.
        assert!(!looks_like_phone("1700000000"));
        assert!(!looks_like_phone("1234567.89"));
        assert!(!looks_like_phone("2023-01-05"));
    }
}
