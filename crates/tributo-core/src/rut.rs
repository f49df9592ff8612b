//! # Chilean Tax Identifier
//!
//! A RUT is the tuple `(digits, check digit)` where `digits` is a 7- or
//! 8-digit positive integer and the check digit is a decimal digit or the
//! letter `K`. The canonical textual form is `"<digits>-<DV>"`; storage
//! always normalises the check digit to upper case.
//!
//! Dotted renderings (`12.345.678-9`) appear in portal payloads and legacy
//! contact rows; parsing strips the thousands dots, serialization never
//! emits them.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound (exclusive) for the numeric part of a RUT.
const MAX_DIGITS: u32 = 100_000_000;

/// Lower bound (inclusive): anything below seven digits is not a taxpayer.
const MIN_DIGITS: u32 = 1_000_000;

/// Errors produced when interpreting a RUT.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RutError {
    /// The input is missing the `digits-DV` separator.
    #[error("RUT \"{0}\" is missing the '-' separator")]
    MissingSeparator(String),

    /// The numeric part is not a 7- or 8-digit positive integer.
    #[error("RUT digits \"{0}\" must be a 7- or 8-digit positive integer")]
    InvalidDigits(String),

    /// The check digit is not `0`-`9` or `K`.
    #[error("RUT check digit \"{0}\" must be a decimal digit or K")]
    InvalidCheckDigit(String),
}

/// A Chilean tax identifier in canonical form.
///
/// Serializes as the canonical string (`"77794858-K"`), never as a struct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Rut {
    digits: u32,
    dv: char,
}

impl Rut {
    /// Construct from parts, validating ranges and normalising the check
    /// digit to upper case.
    pub fn new(digits: u32, dv: char) -> Result<Self, RutError> {
        if !(MIN_DIGITS..MAX_DIGITS).contains(&digits) {
            return Err(RutError::InvalidDigits(digits.to_string()));
        }
        let dv = dv.to_ascii_uppercase();
        if !(dv.is_ascii_digit() || dv == 'K') {
            return Err(RutError::InvalidCheckDigit(dv.to_string()));
        }
        Ok(Self { digits, dv })
    }

    /// Parse the canonical or dotted textual form.
    pub fn parse(input: &str) -> Result<Self, RutError> {
        let trimmed = input.trim();
        let (digits_part, dv_part) = trimmed
            .rsplit_once('-')
            .ok_or_else(|| RutError::MissingSeparator(trimmed.to_string()))?;

        let cleaned: String = digits_part.chars().filter(|c| *c != '.').collect();
        let digits: u32 = cleaned
            .parse()
            .map_err(|_| RutError::InvalidDigits(digits_part.to_string()))?;

        let mut dv_chars = dv_part.chars();
        let dv = dv_chars
            .next()
            .ok_or_else(|| RutError::InvalidCheckDigit(dv_part.to_string()))?;
        if dv_chars.next().is_some() {
            return Err(RutError::InvalidCheckDigit(dv_part.to_string()));
        }

        Self::new(digits, dv)
    }

    /// Parse a pair of already-split fields, as returned by portal rows
    /// that carry the numeric part and the check digit separately.
    pub fn from_parts(digits: &str, dv: &str) -> Result<Self, RutError> {
        let cleaned: String = digits.trim().chars().filter(|c| *c != '.').collect();
        let numeric: u32 = cleaned
            .parse()
            .map_err(|_| RutError::InvalidDigits(digits.to_string()))?;
        let dv_char = dv
            .trim()
            .chars()
            .next()
            .ok_or_else(|| RutError::InvalidCheckDigit(dv.to_string()))?;
        Self::new(numeric, dv_char)
    }

    /// The numeric part.
    pub fn digits(&self) -> u32 {
        self.digits
    }

    /// The check digit, always upper case.
    pub fn check_digit(&self) -> char {
        self.dv
    }

    /// The canonical textual form, `"<digits>-<DV>"`.
    pub fn canonical(&self) -> String {
        format!("{}-{}", self.digits, self.dv)
    }
}

impl std::fmt::Display for Rut {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.digits, self.dv)
    }
}

impl std::str::FromStr for Rut {
    type Err = RutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Rut {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.canonical())
    }
}

impl<'de> Deserialize<'de> for Rut {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_canonical_form() {
        let rut = Rut::parse("77794858-K").unwrap();
        assert_eq!(rut.digits(), 77_794_858);
        assert_eq!(rut.check_digit(), 'K');
        assert_eq!(rut.canonical(), "77794858-K");
    }

    #[test]
    fn parses_dotted_form_and_drops_dots() {
        let rut = Rut::parse("12.345.678-5").unwrap();
        assert_eq!(rut.canonical(), "12345678-5");
    }

    #[test]
    fn normalises_check_digit_to_upper_case() {
        let rut = Rut::parse("77794858-k").unwrap();
        assert_eq!(rut.check_digit(), 'K');
    }

    #[test]
    fn rejects_missing_separator() {
        assert!(matches!(
            Rut::parse("77794858K"),
            Err(RutError::MissingSeparator(_))
        ));
    }

    #[test]
    fn rejects_out_of_range_digits() {
        assert!(Rut::parse("123456-5").is_err());
        assert!(Rut::parse("123456789-5").is_err());
    }

    #[test]
    fn rejects_bad_check_digit() {
        assert!(matches!(
            Rut::parse("7779485-X"),
            Err(RutError::InvalidCheckDigit(_))
        ));
        assert!(Rut::parse("7779485-12").is_err());
    }

    #[test]
    fn from_parts_matches_parse() {
        let a = Rut::from_parts("77794858", "k").unwrap();
        let b = Rut::parse("77794858-K").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn serde_round_trip_is_canonical() {
        let rut = Rut::parse("9.123.456-7").unwrap();
        let json = serde_json::to_string(&rut).unwrap();
        assert_eq!(json, "\"9123456-7\"");
        let back: Rut = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rut);
    }
}
