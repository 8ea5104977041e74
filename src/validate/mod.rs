// src/validate/mod.rs

pub mod contract;
pub mod invoice;

use regex::Regex;
use std::sync::LazyLock;

/// Currency labels the oracle leaves inside amount strings.
static CURRENCY_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)SAR|USD|US\$|SR|\$|ر\.س|ريال").expect("currency label pattern")
});

/// Parse an amount like `"10,500 SAR"` or `"1 234.50"` into a float.
///
/// Returns `None` for anything that does not coerce; callers treat that as a
/// failed check, never as a crash.
pub fn parse_amount(raw: &str) -> Option<f64> {
    let stripped = CURRENCY_LABEL.replace_all(raw, "");
    let cleaned: String = stripped
        .chars()
        .filter(|c| *c != ',' && !c.is_whitespace())
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Strip spaces and hyphens from a VAT registration number and fold
/// Arabic-Indic digits (U+0660..U+0669, U+06F0..U+06F9) to ASCII.
pub fn clean_vat(raw: &str) -> String {
    raw.chars()
        .filter(|c| *c != ' ' && *c != '-')
        .map(ascii_digit)
        .collect()
}

fn ascii_digit(c: char) -> char {
    let offset = match c {
        '\u{0660}'..='\u{0669}' => c as u32 - 0x0660,
        '\u{06F0}'..='\u{06F9}' => c as u32 - 0x06F0,
        _ => return c,
    };
    char::from_digit(offset, 10).unwrap_or(c)
}

/// Saudi VAT numbers are exactly 15 ASCII digits once separators are removed.
pub fn is_valid_vat(raw: &str) -> bool {
    let clean = clean_vat(raw.trim());
    clean.len() == 15 && clean.chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amounts_with_labels_and_separators() {
        assert_eq!(parse_amount("10,500 SAR"), Some(10500.0));
        assert_eq!(parse_amount("SAR 1,234.50"), Some(1234.5));
        assert_eq!(parse_amount("2800"), Some(2800.0));
        assert_eq!(parse_amount("2,800 USD"), Some(2800.0));
        assert_eq!(parse_amount("$99.90"), Some(99.9));
        assert_eq!(parse_amount(" 115 "), Some(115.0));
        assert_eq!(parse_amount("1 150 ر.س"), Some(1150.0));
    }

    #[test]
    fn unparseable_amounts_are_none() {
        assert_eq!(parse_amount("N/A"), None);
        assert_eq!(parse_amount(""), None);
        assert_eq!(parse_amount("SAR"), None);
        assert_eq!(parse_amount("ten thousand"), None);
        assert_eq!(parse_amount("inf"), None);
    }

    #[test]
    fn vat_numbers() {
        assert!(is_valid_vat("123456789012345"));
        assert!(is_valid_vat("300-123-456-700-003"));
        assert!(is_valid_vat("300 1234 5670 0003"));
        assert!(!is_valid_vat("12345"));
        assert!(!is_valid_vat("1234567890123456"));
        assert!(!is_valid_vat("12345678901234X"));
        assert!(!is_valid_vat("N/A"));
    }

    #[test]
    fn arabic_indic_vat_digits() {
        assert_eq!(clean_vat("٣٠٠-١٢٣"), "300123");
        assert!(is_valid_vat("٣٠٠١٢٣٤٥٦٧٠٠٠٠٣"));
        assert!(is_valid_vat("۳۰۰۱۲۳۴۵۶۷۰۰۰۰۳"));
        assert!(is_valid_vat("٣٠٠ 123 ٤٥٦ 700 ٠٠٣"));
        assert!(!is_valid_vat("٣٠٠١٢٣"));
    }
}
