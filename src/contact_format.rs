//! Phone and email validation for export rows.

use once_cell::sync::Lazy;
use regex::Regex;

static EMAIL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$")
        .expect("email regex is valid")
});

static PHONE_SEPARATORS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\s\-().+]").expect("separator regex is valid"));

/// Validate email address (`local@domain.tld` shape).
pub fn is_valid_email(email: &str) -> bool {
    let email = email.trim();
    if email.is_empty() {
        return false;
    }
    let valid = EMAIL_REGEX.is_match(email);
    if !valid {
        tracing::debug!("❌ Invalid email format: {}", email);
    }
    valid
}

/// Removes whitespace, `-`, `(`, `)`, `.` and `+`.
pub fn strip_phone_separators(raw: &str) -> String {
    PHONE_SEPARATORS.replace_all(raw, "").into_owned()
}

/// A phone is accepted when, stripped of separators, it is 10 to 15 digits.
pub fn is_valid_phone(raw: &str) -> bool {
    let digits = strip_phone_separators(raw);
    (10..=15).contains(&digits.len()) && digits.chars().all(|c| c.is_ascii_digit())
}

/// Normalizes a Brazilian phone to `+55` followed by 11 digits.
///
/// A leading `55` country code is dropped first; longer numbers keep their
/// last 11 digits, shorter ones (or any non-digit content) yield `""`.
pub fn format_phone(raw: &str) -> String {
    let digits = strip_phone_separators(raw);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return String::new();
    }

    let national = digits.strip_prefix("55").unwrap_or(&digits);
    let significant = match national.len() {
        11 => national,
        n if n > 11 => &national[n - 11..],
        _ => return String::new(),
    };
    format!("+55{}", significant)
}

/// First candidate that validates, formatted; empty when none does.
pub fn first_valid_phone<I, S>(candidates: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    candidates
        .into_iter()
        .filter(|c| is_valid_phone(c.as_ref()))
        .map(|c| format_phone(c.as_ref()))
        .find(|formatted| !formatted.is_empty())
        .unwrap_or_default()
}

pub fn first_valid_email<I, S>(candidates: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    candidates
        .into_iter()
        .map(|c| c.as_ref().trim().to_string())
        .find(|c| is_valid_email(c))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_validation() {
        assert!(is_valid_email("joao@example.com"));
        assert!(is_valid_email("maria.silva@company.co.uk"));
        assert!(!is_valid_email("invalid@"));
        assert!(!is_valid_email("@invalid.com"));
        assert!(!is_valid_email("sem-arroba.com"));
        assert!(!is_valid_email(""));
    }

    #[test]
    fn test_phone_validation() {
        assert!(is_valid_phone("(11) 98765-4321"));
        assert!(is_valid_phone("+55 11 98765-4321"));
        assert!(!is_valid_phone("98765-4321"));
        assert!(!is_valid_phone("1234567890123456"));
        assert!(!is_valid_phone("11 9876x-4321"));
    }

    #[test]
    fn test_format_phone() {
        assert_eq!(format_phone("(11) 98765-4321"), "+5511987654321");
        assert_eq!(format_phone("+55 11 98765-4321"), "+5511987654321");
        assert_eq!(format_phone("0055 11 98765 4321"), "+5511987654321");
        assert_eq!(format_phone("11 8765-4321"), "");
        assert_eq!(format_phone("abc"), "");
    }

    #[test]
    fn test_format_phone_is_idempotent_on_valid_input() {
        let once = format_phone("11987654321");
        assert_eq!(once, "+5511987654321");
        assert_eq!(format_phone(&once), once);
    }

    #[test]
    fn test_first_valid_candidate_wins() {
        assert_eq!(
            first_valid_phone(["123", "(21) 99999-0000", "11987654321"]),
            "+5521999990000"
        );
        assert_eq!(first_valid_phone(Vec::<String>::new()), "");
        assert_eq!(
            first_valid_email(["nope", " ana@site.com.br "]),
            "ana@site.com.br"
        );
    }
}
