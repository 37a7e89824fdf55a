use chrono::{DateTime, Utc};
use getrandom::getrandom;
use sha2::{Digest, Sha256};

const SLUG_MAX_CHARS: usize = 48;

pub fn validate_identifier_value(kind: &str, value: &str) -> Result<(), String> {
    if value.is_empty() {
        return Err(format!("{kind} must be non-empty"));
    }
    if value.starts_with('.') {
        return Err(format!("{kind} must not start with '.'"));
    }
    if value
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' || ch == '.')
    {
        return Ok(());
    }
    Err(format!(
        "{kind} must use only ASCII letters, digits, '-', '_' or '.'"
    ))
}

pub fn random_hex(byte_len: usize) -> Result<String, String> {
    let mut bytes = vec![0u8; byte_len];
    getrandom(&mut bytes).map_err(|err| format!("failed to gather id randomness: {err}"))?;
    Ok(hex_encode(&bytes))
}

/// `approval_<YYYYMMDDHHMMSS>_<8 hex>`; lexical order follows creation time.
pub fn approval_id(now: DateTime<Utc>) -> Result<String, String> {
    Ok(format!(
        "approval_{}_{}",
        now.format("%Y%m%d%H%M%S"),
        random_hex(4)?
    ))
}

pub fn operation_id(now: DateTime<Utc>) -> Result<String, String> {
    Ok(format!(
        "op_{}_{}",
        now.format("%Y%m%d%H%M%S"),
        random_hex(4)?
    ))
}

/// Stable id for a scheduled task name. Names that slug to the same text
/// ("Daily Briefing" vs "daily-briefing") stay distinct through the digest
/// suffix.
pub fn schedule_id(name: &str) -> Result<String, String> {
    let trimmed = name.trim();
    let mut slug = String::new();
    let mut last_dash = true;
    for ch in trimmed.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
        if slug.len() >= SLUG_MAX_CHARS {
            break;
        }
    }
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        return Err(format!(
            "schedule name `{name}` must contain at least one letter or digit"
        ));
    }
    let digest = Sha256::digest(trimmed.as_bytes());
    Ok(format!("{slug}-{}", hex_encode(&digest[..4])))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn approval_ids_carry_timestamp_and_hex_suffix() {
        let now = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        let id = approval_id(now).expect("id");
        assert!(id.starts_with("approval_20260304050607_"), "{id}");
        let suffix = id.rsplit('_').next().expect("suffix");
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|ch| ch.is_ascii_hexdigit()));
        assert_ne!(id, approval_id(now).expect("second id"));
    }

    #[test]
    fn schedule_ids_are_deterministic_per_name() {
        let a = schedule_id("Daily Briefing").expect("id");
        assert_eq!(a, schedule_id("Daily Briefing").expect("same"));
        assert!(a.starts_with("daily-briefing-"));
        assert_ne!(a, schedule_id("daily-briefing").expect("other"));
        assert!(schedule_id("  !!  ").is_err());
    }

    #[test]
    fn identifiers_reject_path_separators() {
        assert!(validate_identifier_value("service", "gmail").is_ok());
        assert!(validate_identifier_value("service", "../etc").is_err());
        assert!(validate_identifier_value("service", "a/b").is_err());
        assert!(validate_identifier_value("service", "").is_err());
    }
}
