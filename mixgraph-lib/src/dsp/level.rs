//! Linear/dB conversions and a serde helper for gain fields.
//!
//! Gain fields in graph and effect JSON accept either a plain linear number
//! (`0.5`) or a decibel string (`"-6db"`, `"+3 dB"`).

use serde::de::{Error as DeError, Visitor};
use serde::Deserializer;
use std::fmt;

/// Convert decibels to a linear amplitude factor.
pub fn db_to_linear(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

/// Convert a linear amplitude factor to decibels. Silence maps to a very
/// large negative value instead of `-inf`.
pub fn linear_to_db(value: f32) -> f32 {
    20.0 * value.abs().max(f32::MIN_POSITIVE).log10()
}

/// Deserialize a linear gain that may be written as a dB string.
pub fn deserialize_linear_gain<'de, D>(deserializer: D) -> Result<f32, D::Error>
where
    D: Deserializer<'de>,
{
    struct LinearGainVisitor;

    impl<'de> Visitor<'de> for LinearGainVisitor {
        type Value = f32;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a linear gain number or a string like \"-6db\"")
        }

        fn visit_f64<E: DeError>(self, value: f64) -> Result<f32, E> {
            Ok(value as f32)
        }

        fn visit_i64<E: DeError>(self, value: i64) -> Result<f32, E> {
            Ok(value as f32)
        }

        fn visit_u64<E: DeError>(self, value: u64) -> Result<f32, E> {
            Ok(value as f32)
        }

        fn visit_str<E: DeError>(self, value: &str) -> Result<f32, E> {
            parse_gain_str(value)
                .ok_or_else(|| DeError::custom(format!("invalid gain value \"{}\"", value)))
        }
    }

    deserializer.deserialize_any(LinearGainVisitor)
}

/// Parse `"0.5"`, `"-6db"` or `"3 dB"` into a linear gain.
pub fn parse_gain_str(value: &str) -> Option<f32> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    let lower = trimmed.to_ascii_lowercase();
    match lower.strip_suffix("db") {
        Some(db) => db.trim().parse::<f32>().ok().map(db_to_linear),
        None => lower.parse::<f32>().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_round_trips_through_linear() {
        for db in [-24.0_f32, -6.0, 0.0, 3.0] {
            assert!((linear_to_db(db_to_linear(db)) - db).abs() < 1e-4);
        }
    }

    #[test]
    fn silence_has_finite_db() {
        assert!(linear_to_db(0.0).is_finite());
    }

    #[test]
    fn parses_db_and_linear_strings() {
        assert!((parse_gain_str("-6db").unwrap() - db_to_linear(-6.0)).abs() < 1e-6);
        assert!((parse_gain_str(" +3 dB ").unwrap() - db_to_linear(3.0)).abs() < 1e-6);
        assert_eq!(parse_gain_str("0.25"), Some(0.25));
        assert_eq!(parse_gain_str("loud"), None);
        assert_eq!(parse_gain_str(""), None);
    }
}
