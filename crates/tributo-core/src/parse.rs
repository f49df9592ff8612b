//! # Locale-Aware Parsing
//!
//! The portal renders numbers the Chilean way — `.` for thousands, `,` for
//! decimals, an optional `$` prefix — and dates in several day-first
//! formats. These helpers normalise both into canonical values.
//!
//! Two strictness levels exist for amounts:
//!
//! - [`parse_chilean_number`] is strict: it returns `None` for empty or
//!   placeholder values (`"N/A"`, `"No disponible"`, `"-"`) and `Err` for
//!   garbage. Used by the form detail extractor, where absence is meaningful.
//! - [`parse_amount_lenient`] never fails: unparseable input becomes zero
//!   with a warning left to the caller. Used by the document mapper, where
//!   a bad amount must not reject the document.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::error::ValidationError;

/// Placeholder strings the portal uses for "no value".
const PLACEHOLDERS: &[&str] = &["N/A", "NO DISPONIBLE", "-"];

/// Date renderings accepted from portal payloads, tried in order.
const DATE_FORMATS: &[&str] = &["%d/%m/%Y", "%d-%m-%Y", "%Y-%m-%d", "%d/%m/%y", "%d-%m-%y"];

/// Parse a Chilean-rendered number strictly.
///
/// `"1.023.785"` → `1023785`, `"0,25"` → `0.25`, `"123.456,78"` →
/// `123456.78`. Empty and placeholder values yield `Ok(None)`.
pub fn parse_chilean_number(input: &str) -> Result<Option<Decimal>, ValidationError> {
    let trimmed = input.trim();
    if trimmed.is_empty() || PLACEHOLDERS.contains(&trimmed.to_uppercase().as_str()) {
        return Ok(None);
    }

    let stripped = trimmed.trim_start_matches('$').trim();

    let normalised = if let Some((integral, fractional)) = stripped.rsplit_once(',') {
        // Comma present: it is the decimal separator, dots are thousands.
        format!("{}.{}", integral.replace('.', ""), fractional)
    } else {
        // No comma: every dot is a thousands separator.
        stripped.replace('.', "")
    };

    Decimal::from_str(&normalised)
        .map(Some)
        .map_err(|_| ValidationError::UnparseableAmount(input.to_string()))
}

/// Parse an amount leniently: unparseable values become zero.
///
/// Returns the amount and whether the input was degraded. The caller owns
/// the warning, so the record's identity can be attached to it.
pub fn parse_amount_lenient(input: &str) -> (Decimal, bool) {
    match parse_chilean_number(input) {
        Ok(Some(value)) => (value, false),
        Ok(None) => (Decimal::ZERO, false),
        Err(_) => (Decimal::ZERO, true),
    }
}

/// Parse a date from the accepted portal renderings, tried in order.
pub fn parse_flexible_date(input: &str) -> Result<NaiveDate, ValidationError> {
    let trimmed = input.trim();
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return Ok(date);
        }
    }
    Err(ValidationError::UnparseableDate(input.to_string()))
}

/// Check that a string can be read as a number, either directly or after
/// Chilean normalisation. Used by the validator, which must not reject a
/// record for rendering differences alone.
pub fn is_numeric_like(input: &str) -> bool {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return false;
    }
    if f64::from_str(trimmed).is_ok() {
        return true;
    }
    matches!(parse_chilean_number(trimmed), Ok(Some(_)))
}

/// Extract the first run of decimal digits from a string, if any.
///
/// The mapper falls back to this when a document type arrives as free text
/// that matches no known name (e.g. `"DTE tipo 46"` → `46`).
pub fn first_integer(input: &str) -> Option<i32> {
    let mut digits = String::new();
    for c in input.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
        } else if !digits.is_empty() {
            break;
        }
    }
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    #[test]
    fn thousands_only() {
        assert_eq!(
            parse_chilean_number("1.023.785").unwrap(),
            Some(dec!(1023785))
        );
    }

    #[test]
    fn decimal_comma() {
        assert_eq!(parse_chilean_number("0,25").unwrap(), Some(dec!(0.25)));
    }

    #[test]
    fn thousands_and_decimal() {
        assert_eq!(
            parse_chilean_number("123.456,78").unwrap(),
            Some(dec!(123456.78))
        );
    }

    #[test]
    fn empty_and_placeholders_are_none() {
        assert_eq!(parse_chilean_number("").unwrap(), None);
        assert_eq!(parse_chilean_number("N/A").unwrap(), None);
        assert_eq!(parse_chilean_number("no disponible").unwrap(), None);
        assert_eq!(parse_chilean_number("-").unwrap(), None);
        assert_eq!(parse_chilean_number("  ").unwrap(), None);
    }

    #[test]
    fn currency_prefix_is_stripped() {
        assert_eq!(
            parse_chilean_number("$ 1.500").unwrap(),
            Some(dec!(1500))
        );
    }

    #[test]
    fn negative_amounts_pass() {
        // Credit notes carry negative amounts.
        assert_eq!(parse_chilean_number("-42").unwrap(), Some(dec!(-42)));
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(parse_chilean_number("abc").is_err());
        assert!(parse_chilean_number("1,2,3").is_err());
    }

    #[test]
    fn lenient_degrades_to_zero() {
        assert_eq!(parse_amount_lenient("garbage"), (Decimal::ZERO, true));
        assert_eq!(parse_amount_lenient(""), (Decimal::ZERO, false));
        assert_eq!(parse_amount_lenient("19.000"), (dec!(19000), false));
    }

    #[test]
    fn all_date_formats_agree() {
        let expected = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        for rendering in ["15/01/2024", "15-01-2024", "2024-01-15", "15/01/24", "15-01-24"] {
            assert_eq!(parse_flexible_date(rendering).unwrap(), expected, "{rendering}");
        }
    }

    #[test]
    fn unparseable_date_is_an_error() {
        assert!(parse_flexible_date("Jan 15 2024").is_err());
        assert!(parse_flexible_date("").is_err());
    }

    #[test]
    fn first_integer_extraction() {
        assert_eq!(first_integer("DTE tipo 46"), Some(46));
        assert_eq!(first_integer("factura"), None);
        assert_eq!(first_integer("33 y 61"), Some(33));
    }

    proptest! {
        #[test]
        fn plain_integers_round_trip(n in 0u64..1_000_000_000) {
            let parsed = parse_chilean_number(&n.to_string()).unwrap().unwrap();
            prop_assert_eq!(parsed, Decimal::from(n));
        }

        #[test]
        fn grouped_integers_match_plain(n in 1_000u64..1_000_000_000) {
            // Render with Chilean thousands grouping and re-parse.
            let plain = n.to_string();
            let mut grouped = String::new();
            for (i, c) in plain.chars().rev().enumerate() {
                if i > 0 && i % 3 == 0 {
                    grouped.push('.');
                }
                grouped.push(c);
            }
            let grouped: String = grouped.chars().rev().collect();
            let parsed = parse_chilean_number(&grouped).unwrap().unwrap();
            prop_assert_eq!(parsed, Decimal::from(n));
        }
    }
}
