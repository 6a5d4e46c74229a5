//! Phone Number Parsing
//!
//! Canonicalizes user input to E.164 and classifies it coarsely, backed by
//! the libphonenumber metadata shipped with the `phonenumber` crate.
//! International input is tried first; national input falls back to the
//! caller's country hint.

use phonenumber::{country, metadata::DATABASE, Mode, PhoneNumber, Type};
use serde::{Deserialize, Serialize};

/// Region assumed for national-format input without a hint
pub const DEFAULT_REGION: &str = "US";

const UNKNOWN_REGION: &str = "UNKNOWN";

/// Digit count a national number needs before the hint is tried
const MIN_DIGITS: usize = 7;
const MAX_DIGITS: usize = 15;

/// Coarse line classification
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineType {
    Mobile,
    Landline,
    Unknown,
}

impl From<Type> for LineType {
    fn from(kind: Type) -> Self {
        match kind {
            // NANP numbers cannot be told apart
            Type::Mobile | Type::FixedLineOrMobile => LineType::Mobile,
            Type::FixedLine => LineType::Landline,
            _ => LineType::Unknown,
        }
    }
}

/// A parsed phone number
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ParsedPhone {
    pub valid: bool,
    /// `+<cc><national>`
    pub e164: String,
    /// ISO 3166 alpha-2, or `UNKNOWN`
    pub region: String,
    pub line_type: LineType,
}

/// Phone parser seam
pub trait PhoneParser: Send + Sync {
    /// Parse `raw`, using `country_hint` for national-format input.
    ///
    /// `None` when the input cannot be read as a phone number at all.
    fn parse(&self, raw: &str, country_hint: Option<&str>) -> Option<ParsedPhone>;
}

/// libphonenumber-backed parser
#[derive(Clone, Copy, Debug, Default)]
pub struct E164Parser;

impl E164Parser {
    pub fn new() -> Self {
        Self
    }

    fn read(raw: &str, country_hint: Option<&str>) -> Option<PhoneNumber> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }

        // `00` is the international prefix nearly everywhere outside NANP
        let international = match trimmed.strip_prefix("00") {
            Some(rest) => format!("+{rest}"),
            None => trimmed.to_string(),
        };
        if let Ok(number) = phonenumber::parse(None, &international) {
            return Some(number);
        }

        let digits = trimmed.chars().filter(char::is_ascii_digit).count();
        if !(MIN_DIGITS..=MAX_DIGITS).contains(&digits) {
            return None;
        }

        let region: country::Id = country_hint
            .unwrap_or(DEFAULT_REGION)
            .trim()
            .to_ascii_uppercase()
            .parse()
            .ok()?;
        phonenumber::parse(Some(region), trimmed).ok()
    }
}

impl PhoneParser for E164Parser {
    fn parse(&self, raw: &str, country_hint: Option<&str>) -> Option<ParsedPhone> {
        let number = Self::read(raw, country_hint)?;
        let valid = phonenumber::is_valid(&number);

        // Debug of a country id is its ISO code
        let region = number
            .country()
            .id()
            .map_or_else(|| UNKNOWN_REGION.to_string(), |id| format!("{id:?}"));

        let line_type = if valid {
            LineType::from(number.number_type(&DATABASE))
        } else {
            LineType::Unknown
        };

        Some(ParsedPhone {
            valid,
            e164: number.format().mode(Mode::E164).to_string(),
            region,
            line_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str, hint: Option<&str>) -> Option<ParsedPhone> {
        E164Parser::new().parse(raw, hint)
    }

    #[test]
    fn test_international_us() {
        let p = parse("+1 (415) 555-2671", None).unwrap();
        assert!(p.valid);
        assert_eq!(p.e164, "+14155552671");
        assert_eq!(p.region, "US");
        assert_eq!(p.line_type, LineType::Mobile);
    }

    #[test]
    fn test_double_zero_prefix() {
        let p = parse("0044 7400 123456", None).unwrap();
        assert!(p.valid);
        assert_eq!(p.e164, "+447400123456");
        assert_eq!(p.region, "GB");
        assert_eq!(p.line_type, LineType::Mobile);
    }

    #[test]
    fn test_national_with_hint_strips_trunk() {
        let p = parse("020 7946 0958", Some("gb")).unwrap();
        assert!(p.valid);
        assert_eq!(p.e164, "+442079460958");
        assert_eq!(p.line_type, LineType::Landline);

        let fr = parse("06 12 34 56 78", Some("FR")).unwrap();
        assert_eq!(fr.e164, "+33612345678");
        assert_eq!(fr.line_type, LineType::Mobile);
    }

    #[test]
    fn test_italian_numbers_keep_leading_zero() {
        let p = parse("+39 02 1234 5678", None).unwrap();
        assert!(p.valid);
        assert_eq!(p.e164, "+390212345678");
        assert_eq!(p.region, "IT");
        assert_eq!(p.line_type, LineType::Landline);

        let national = parse("02 1234 5678", Some("IT")).unwrap();
        assert!(national.valid);
        assert_eq!(national.e164, "+390212345678");
    }

    #[test]
    fn test_regions_outside_core_markets() {
        for (raw, region, e164) in [
            ("+353 87 123 4567", "IE", "+353871234567"),
            ("+48 601 234 567", "PL", "+48601234567"),
            ("+971 50 123 4567", "AE", "+971501234567"),
        ] {
            let p = parse(raw, None).unwrap();
            assert!(p.valid, "{raw} should be valid");
            assert_eq!(p.region, region);
            assert_eq!(p.e164, e164);
            assert_eq!(p.line_type, LineType::Mobile);
        }
    }

    #[test]
    fn test_national_defaults_to_us() {
        let p = parse("415-555-2671", None).unwrap();
        assert_eq!(p.e164, "+14155552671");
        let with_trunk = parse("1 415 555 2671", None).unwrap();
        assert_eq!(with_trunk.e164, "+14155552671");
    }

    #[test]
    fn test_invalid_numbers_are_flagged() {
        let p = parse("+1 115 555 2671", None).unwrap();
        assert!(!p.valid);
        assert_eq!(p.line_type, LineType::Unknown);

        assert!(parse("+44 7400 12345", None).is_none_or(|p| !p.valid));
        assert!(parse("12345", None).is_none());
        assert!(parse("+1234567890123456", None).is_none());
    }

    #[test]
    fn test_unknown_calling_code_is_unreadable() {
        assert!(parse("+999 1234 5678", None).is_none());
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(parse("call me maybe", None).is_none());
        assert!(parse("", None).is_none());
        assert!(parse("555-CALL-NOW", None).is_none());
        assert!(parse("4155552671", Some("ZZ")).is_none());
    }
}
