use super::ErrorCategory;

const AUTH_MARKERS: &[&str] = &[
    "unauthorized",
    "unauthenticated",
    "forbidden",
    "permission denied",
    "access denied",
    "authentication",
    "invalid token",
    "token expired",
    "expired token",
    "invalid_grant",
    "credential",
];

const TRANSIENT_MARKERS: &[&str] = &[
    "timeout",
    "timed out",
    "connection",
    "temporarily",
    "unavailable",
    "rate limit",
    "too many requests",
    "try again",
    "network",
    "dns",
    "broken pipe",
    "econnreset",
];

const PERMANENT_MARKERS: &[&str] = &[
    "bad request",
    "not found",
    "invalid",
    "malformed",
    "unsupported",
    "unprocessable",
    "does not exist",
];

/// Sorts an error message into a retry category by inspecting its text.
///
/// Authentication markers win over everything else, so "invalid token" is
/// an auth failure rather than a permanent one. An embedded HTTP status code
/// decides when no marker matches.
pub fn classify_error(message: &str) -> ErrorCategory {
    let lower = message.to_ascii_lowercase();
    if AUTH_MARKERS.iter().any(|marker| lower.contains(marker)) {
        return ErrorCategory::Authentication;
    }
    if TRANSIENT_MARKERS.iter().any(|marker| lower.contains(marker)) {
        return ErrorCategory::Transient;
    }
    if let Some(category) = status_code_category(&lower) {
        return category;
    }
    if PERMANENT_MARKERS.iter().any(|marker| lower.contains(marker)) {
        return ErrorCategory::Permanent;
    }
    ErrorCategory::Unknown
}

fn status_code_category(message: &str) -> Option<ErrorCategory> {
    for word in message.split(|c: char| !c.is_ascii_digit()) {
        if word.len() != 3 {
            continue;
        }
        let Ok(code) = word.parse::<u16>() else {
            continue;
        };
        match code {
            401 | 403 => return Some(ErrorCategory::Authentication),
            408 | 429 | 500..=599 => return Some(ErrorCategory::Transient),
            400..=499 => return Some(ErrorCategory::Permanent),
            _ => {}
        }
    }
    None
}
