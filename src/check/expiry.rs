//! Expiry extraction from loosely-typed profile payloads
//!
//! Portals disagree on where the expiry lives. Candidates are scanned in a
//! fixed order so the same payload always resolves to the same field.

use chrono::{NaiveDate, NaiveDateTime};
use serde_json::Value;

use crate::api::wire::value_as_string;

/// Candidate expiry fields, highest priority first
pub const EXPIRY_FIELDS: &[&str] = &[
    "expire_date",
    "expiration_date",
    "exp_date",
    "end_date",
    "expire_billing_date",
    "phone",
];

/// Placeholder portals use for "no expiry"
const ZERO_SENTINEL: &str = "0";

const DATETIME_FORMATS: &[&str] = &["%B %d, %Y, %I:%M %p", "%Y-%m-%d %H:%M:%S"];
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d.%m.%Y"];

/// Field that supplied the expiry and its raw value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiryCandidate {
    pub field: &'static str,
    pub raw: String,
}

/// First candidate that is present, non-empty and not the zero sentinel
pub fn select_expiry_field(profile: &Value) -> Option<ExpiryCandidate> {
    EXPIRY_FIELDS.iter().find_map(|field| {
        let raw = profile.get(*field).and_then(value_as_string)?;
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed == ZERO_SENTINEL {
            return None;
        }
        Some(ExpiryCandidate {
            field,
            raw: trimmed.to_string(),
        })
    })
}

/// Parse a portal date into unix seconds (UTC)
pub fn parse_portal_date(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if raw.chars().all(|c| c.is_ascii_digit()) {
        return raw.parse().ok();
    }

    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(dt.and_utc().timestamp());
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return date
                .and_hms_opt(0, 0, 0)
                .map(|dt| dt.and_utc().timestamp());
        }
    }
    None
}

/// Expiry timestamp of a profile, if any candidate parses
pub fn extract_expiry(profile: &Value) -> Option<i64> {
    select_expiry_field(profile).and_then(|c| parse_portal_date(&c.raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_skips_zero_sentinel_and_empty() {
        let profile = json!({
            "id": "1",
            "expire_date": "0",
            "expiration_date": "1700000000",
        });
        let candidate = select_expiry_field(&profile).unwrap();
        assert_eq!(candidate.field, "expiration_date");
        assert_eq!(extract_expiry(&profile), Some(1_700_000_000));

        let profile = json!({"expire_date": "", "exp_date": 1800000000});
        assert_eq!(select_expiry_field(&profile).unwrap().field, "exp_date");
    }

    #[test]
    fn test_selection_independent_of_field_order() {
        let a: Value =
            serde_json::from_str(r#"{"phone":"2030-01-01","end_date":"2029-05-05"}"#).unwrap();
        let b: Value =
            serde_json::from_str(r#"{"end_date":"2029-05-05","phone":"2030-01-01"}"#).unwrap();
        let first = select_expiry_field(&a).unwrap();
        for _ in 0..3 {
            assert_eq!(select_expiry_field(&a).unwrap(), first);
            assert_eq!(select_expiry_field(&b).unwrap(), first);
        }
        assert_eq!(first.field, "end_date");
    }

    #[test]
    fn test_no_candidates() {
        assert_eq!(select_expiry_field(&json!({"id": "1"})), None);
        assert_eq!(select_expiry_field(&json!({"expire_date": "0"})), None);
        assert_eq!(extract_expiry(&json!([])), None);
    }

    #[test]
    fn test_parse_portal_date_formats() {
        assert_eq!(parse_portal_date("1700000000"), Some(1_700_000_000));
        assert_eq!(parse_portal_date("2024-01-01 00:00:00"), Some(1_704_067_200));
        assert_eq!(parse_portal_date("2024-01-01"), Some(1_704_067_200));
        assert_eq!(parse_portal_date("01.01.2024"), Some(1_704_067_200));
        assert_eq!(
            parse_portal_date("January 01, 2024, 12:00 AM"),
            Some(1_704_067_200)
        );
        assert_eq!(parse_portal_date("unlimited"), None);
        assert_eq!(parse_portal_date(""), None);
    }
}
