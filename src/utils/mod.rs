use anyhow::{anyhow, Result};
use chrono::{NaiveDate, Utc};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

pub fn sha256_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

pub fn format_decimal(value: f64) -> String {
    format!("{:.2}", value)
}

/// `1234.5` -> `1234,50`, as German bookkeeping tools expect.
pub fn format_decimal_comma(value: f64) -> String {
    format_decimal(value).replace('.', ",")
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Parses amounts in German or English notation: `1.880,20`, `1,880.20`,
/// `1880,20`, `1880.20 €`.
pub fn parse_decimal(value: &str) -> Result<f64> {
    let cleaned: String = value
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == ',' || *c == '.' || *c == '-')
        .collect();
    if cleaned.is_empty() {
        return Err(anyhow!("Parse decimal: no digits in {:?}", value));
    }

    let last_comma = cleaned.rfind(',');
    let last_dot = cleaned.rfind('.');
    let normalized = match (last_comma, last_dot) {
        (Some(c), Some(d)) if c > d => cleaned.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => cleaned.replace(',', ""),
        (Some(_), None) => {
            if cleaned.matches(',').count() > 1 {
                cleaned.replace(',', "")
            } else {
                cleaned.replace(',', ".")
            }
        }
        (None, Some(_)) if cleaned.matches('.').count() > 1 || is_dot_grouped(&cleaned) => {
            cleaned.replace('.', "")
        }
        _ => cleaned,
    };

    normalized
        .parse::<f64>()
        .map_err(|e| anyhow!("Parse decimal: {}", e))
}

/// `1.880` or `-12.500`: dots between groups of exactly three digits.
fn is_dot_grouped(value: &str) -> bool {
    let digits = value.strip_prefix('-').unwrap_or(value);
    let mut groups = digits.split('.');
    let lead_ok = groups
        .next()
        .is_some_and(|g| (1..=3).contains(&g.len()) && g.chars().all(|c| c.is_ascii_digit()));
    let rest: Vec<&str> = groups.collect();
    lead_ok
        && !rest.is_empty()
        && rest
            .iter()
            .all(|g| g.len() == 3 && g.chars().all(|c| c.is_ascii_digit()))
}

pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let raw = value.trim();
    let raw = raw.split('T').next().unwrap_or(raw);
    let formats = ["%Y-%m-%d", "%d.%m.%Y", "%d/%m/%Y", "%Y/%m/%d", "%Y.%m.%d"];
    formats
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
}

pub fn normalize_date(value: Option<String>) -> Option<String> {
    let raw = value?.trim().to_string();
    if raw.is_empty() {
        return None;
    }

    match parse_date(&raw) {
        Some(date) => Some(date.format("%Y-%m-%d").to_string()),
        None => Some(raw),
    }
}

/// Cuts to at most `max` characters without splitting a code point.
pub fn truncate_chars(value: &str, max: usize) -> String {
    value.chars().take(max).collect()
}

pub fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_german_and_english_amounts() {
        assert_eq!(parse_decimal("1.880,20").unwrap(), 1880.20);
        assert_eq!(parse_decimal("1,880.20").unwrap(), 1880.20);
        assert_eq!(parse_decimal("1880,20").unwrap(), 1880.20);
        assert_eq!(parse_decimal("1880.20 €").unwrap(), 1880.20);
        assert_eq!(parse_decimal("EUR 12").unwrap(), 12.0);
        assert_eq!(parse_decimal("1.234.567").unwrap(), 1_234_567.0);
        assert!(parse_decimal("n/a").is_err());
    }

    #[test]
    fn single_dot_before_three_digits_groups_thousands() {
        assert_eq!(parse_decimal("1.880").unwrap(), 1880.0);
        assert_eq!(parse_decimal("1.880 €").unwrap(), 1880.0);
        assert_eq!(parse_decimal("-12.500").unwrap(), -12_500.0);
        assert_eq!(parse_decimal("1.88").unwrap(), 1.88);
        assert_eq!(parse_decimal("1880.200").unwrap(), 1880.2);
    }

    #[test]
    fn normalizes_common_date_formats() {
        assert_eq!(normalize_date(Some("15.03.2024".into())).as_deref(), Some("2024-03-15"));
        assert_eq!(normalize_date(Some("2024/03/15".into())).as_deref(), Some("2024-03-15"));
        assert_eq!(
            normalize_date(Some("2024-03-15T00:00:00".into())).as_deref(),
            Some("2024-03-15")
        );
        assert_eq!(normalize_date(Some("  ".into())), None);
        assert_eq!(normalize_date(Some("März".into())).as_deref(), Some("März"));
    }

    #[test]
    fn comma_decimal_and_truncation() {
        assert_eq!(format_decimal_comma(1234.5), "1234,50");
        assert_eq!(truncate_chars("Müller GmbH", 6), "Müller");
        assert_eq!(round2(10.005_1), 10.01);
    }
}
