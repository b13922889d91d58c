//! Raw driver responses and their normalization into channel values.
//!
//! Sensor drivers do not agree on the shape of a measurement response. Some
//! return a record with named fields, some a flat list, and some a nested
//! list whose first element holds the mass concentrations. [`RawValue`]
//! captures all of these and [`normalize`] extracts the four mass channels
//! from any of them.

use std::collections::BTreeMap;

use crate::error::{ParseError, ParseResult};
use crate::sample::CHANNEL_COUNT;

/// Field names used by record-shaped responses, in channel order.
pub const RECORD_FIELDS: [&str; CHANNEL_COUNT] = ["pm1p0", "pm2p5", "pm4p0", "pm10p0"];

/// An untyped response value as produced by a legacy driver.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum RawValue {
    /// A numeric value.
    Number(f64),
    /// A textual value, parsed leniently when converted to a number.
    Text(String),
    /// No value at all.
    #[default]
    Missing,
    /// A positional list of values.
    Sequence(Vec<RawValue>),
    /// A set of named values.
    Record(BTreeMap<String, RawValue>),
}

impl RawValue {
    /// Build a flat numeric sequence.
    pub fn numbers<I: IntoIterator<Item = f64>>(values: I) -> Self {
        RawValue::Sequence(values.into_iter().map(RawValue::Number).collect())
    }

    /// Build a record from `(name, value)` pairs.
    pub fn record<K, I>(fields: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, RawValue)>,
    {
        RawValue::Record(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Returns `true` for the sequence variant.
    pub fn is_sequence(&self) -> bool {
        matches!(self, RawValue::Sequence(_))
    }

    /// Coerce to a float. Anything that is not a number becomes `NaN`.
    pub fn as_f64(&self) -> f64 {
        match self {
            RawValue::Number(n) => *n,
            RawValue::Text(s) => s.trim().parse().unwrap_or(f64::NAN),
            _ => f64::NAN,
        }
    }

    fn shape(&self) -> String {
        match self {
            RawValue::Number(_) => "number".to_string(),
            RawValue::Text(_) => "text".to_string(),
            RawValue::Missing => "missing".to_string(),
            RawValue::Sequence(items) => format!("sequence of {}", items.len()),
            RawValue::Record(fields) => format!("record with {} fields", fields.len()),
        }
    }
}

impl From<f64> for RawValue {
    fn from(value: f64) -> Self {
        RawValue::Number(value)
    }
}

impl From<&str> for RawValue {
    fn from(value: &str) -> Self {
        RawValue::Text(value.to_string())
    }
}

impl From<Vec<RawValue>> for RawValue {
    fn from(items: Vec<RawValue>) -> Self {
        RawValue::Sequence(items)
    }
}

#[cfg(feature = "serde")]
impl From<serde_json::Value> for RawValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => RawValue::Missing,
            Value::Bool(b) => RawValue::Number(if b { 1.0 } else { 0.0 }),
            Value::Number(n) => n.as_f64().map_or(RawValue::Missing, RawValue::Number),
            Value::String(s) => RawValue::Text(s),
            Value::Array(items) => RawValue::Sequence(items.into_iter().map(Into::into).collect()),
            Value::Object(fields) => {
                RawValue::Record(fields.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

/// Extract the four mass-concentration channels from a raw response.
///
/// Accepted shapes, checked in order:
///
/// 1. a record, read by [`RECORD_FIELDS`] (absent fields become `NaN`);
/// 2. a flat sequence of at least four elements whose first element is not
///    itself a sequence;
/// 3. a sequence whose first element is a sequence of at least four elements.
///
/// Individual values that cannot be read as numbers become `NaN` without
/// affecting the other channels.
///
/// # Errors
///
/// Returns [`ParseError::UnrecognizedShape`] for any other shape.
pub fn normalize(raw: &RawValue) -> ParseResult<[f64; CHANNEL_COUNT]> {
    match raw {
        RawValue::Record(fields) => Ok(RECORD_FIELDS.map(|name| {
            fields.get(name).map_or(f64::NAN, RawValue::as_f64)
        })),
        RawValue::Sequence(items) if items.len() >= CHANNEL_COUNT && !items[0].is_sequence() => {
            Ok(first_four(items))
        }
        RawValue::Sequence(items) => match items.first() {
            Some(RawValue::Sequence(inner)) if inner.len() >= CHANNEL_COUNT => {
                Ok(first_four(inner))
            }
            _ => Err(ParseError::UnrecognizedShape(raw.shape())),
        },
        other => Err(ParseError::UnrecognizedShape(other.shape())),
    }
}

fn first_four(items: &[RawValue]) -> [f64; CHANNEL_COUNT] {
    [
        items[0].as_f64(),
        items[1].as_f64(),
        items[2].as_f64(),
        items[3].as_f64(),
    ]
}

/// Rescaling applied to integer register values from modern drivers.
///
/// Some firmware revisions report mass concentrations scaled up by a fixed
/// factor. When the largest channel exceeds `threshold`, every channel is
/// divided by `divisor`. The defaults (1000.0 and 100000.0) are empirical.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScalingPolicy {
    /// Largest plausible unscaled value.
    pub threshold: f64,
    /// Divisor applied when `threshold` is exceeded.
    pub divisor: f64,
    /// Whether rescaling is applied at all.
    pub enabled: bool,
}

impl Default for ScalingPolicy {
    fn default() -> Self {
        Self {
            threshold: 1000.0,
            divisor: 100_000.0,
            enabled: true,
        }
    }
}

impl ScalingPolicy {
    /// A policy that never rescales.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Convert raw register values to concentrations.
    #[must_use]
    pub fn apply(&self, raw: [u16; CHANNEL_COUNT]) -> [f64; CHANNEL_COUNT] {
        let values = raw.map(f64::from);
        let max = values.iter().copied().fold(f64::MIN, f64::max);
        if self.enabled && max > self.threshold {
            values.map(|v| v / self.divisor)
        } else {
            values
        }
    }

    /// Check that the policy can be applied.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::InvalidData`] if the divisor is not a positive
    /// finite number or the threshold is not finite.
    pub fn validate(&self) -> ParseResult<()> {
        if !self.divisor.is_finite() || self.divisor <= 0.0 {
            return Err(ParseError::InvalidData(
                "scaling divisor must be a positive number".to_string(),
            ));
        }
        if !self.threshold.is_finite() {
            return Err(ParseError::InvalidData(
                "scaling threshold must be finite".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_values(actual: [f64; 4], expected: [f64; 4]) {
        for (a, e) in actual.iter().zip(expected.iter()) {
            assert!((a - e).abs() < f64::EPSILON, "{actual:?} != {expected:?}");
        }
    }

    #[test]
    fn test_flat_sequence() {
        let raw = RawValue::numbers([1.0, 2.0, 3.0, 4.0]);
        assert_values(normalize(&raw).unwrap(), [1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_flat_sequence_with_extra_fields() {
        let raw = RawValue::numbers([1.0, 2.0, 3.0, 4.0, 9.0, 9.0, 9.0, 9.0, 9.0, 0.5]);
        assert_values(normalize(&raw).unwrap(), [1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_nested_sequence() {
        let raw = RawValue::Sequence(vec![
            RawValue::numbers([1.0, 2.0, 3.0, 4.0]),
            RawValue::numbers([10.0, 20.0, 30.0, 40.0, 50.0]),
            RawValue::Number(5.0),
        ]);
        assert_values(normalize(&raw).unwrap(), [1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_nested_sequence_too_short() {
        let raw = RawValue::Sequence(vec![RawValue::numbers([1.0, 2.0]), RawValue::Number(5.0)]);
        assert!(matches!(
            normalize(&raw),
            Err(ParseError::UnrecognizedShape(_))
        ));
    }

    #[test]
    fn test_record_by_name() {
        let raw = RawValue::record([
            ("pm10p0", RawValue::Number(4.0)),
            ("pm1p0", RawValue::Number(1.0)),
            ("pm2p5", RawValue::Number(2.0)),
            ("pm4p0", RawValue::Number(3.0)),
            ("nc0p5", RawValue::Number(99.0)),
        ]);
        assert_values(normalize(&raw).unwrap(), [1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_record_missing_field_is_nan() {
        let raw = RawValue::record([
            ("pm1p0", RawValue::Number(1.0)),
            ("pm2p5", RawValue::Number(2.0)),
        ]);
        let values = normalize(&raw).unwrap();
        assert_eq!(values[0], 1.0);
        assert_eq!(values[1], 2.0);
        assert!(values[2].is_nan());
        assert!(values[3].is_nan());
    }

    #[test]
    fn test_unparsable_field_is_nan_others_unaffected() {
        let raw = RawValue::Sequence(vec![
            RawValue::Number(1.0),
            RawValue::from("n/a"),
            RawValue::from(" 3.5 "),
            RawValue::Missing,
        ]);
        let values = normalize(&raw).unwrap();
        assert_eq!(values[0], 1.0);
        assert!(values[1].is_nan());
        assert_eq!(values[2], 3.5);
        assert!(values[3].is_nan());
    }

    #[test]
    fn test_unrecognized_shapes() {
        for raw in [
            RawValue::Number(1.0),
            RawValue::Missing,
            RawValue::from("1,2,3,4"),
            RawValue::numbers([1.0, 2.0, 3.0]),
            RawValue::Sequence(Vec::new()),
        ] {
            assert!(normalize(&raw).is_err(), "{raw:?} should be rejected");
        }
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_from_json_value() {
        let raw: RawValue = serde_json::json!([[1, 2, "3", null], [0], 7]).into();
        let values = normalize(&raw).unwrap();
        assert_eq!(values[0], 1.0);
        assert_eq!(values[2], 3.0);
        assert!(values[3].is_nan());
    }

    #[test]
    fn test_scaling_leaves_plausible_values() {
        let policy = ScalingPolicy::default();
        assert_values(policy.apply([12, 25, 30, 1000]), [12.0, 25.0, 30.0, 1000.0]);
    }

    #[test]
    fn test_scaling_divides_large_values() {
        let policy = ScalingPolicy::default();
        let values = policy.apply([50_000, 60_000, 0, 1_000]);
        assert_values(values, [0.5, 0.6, 0.0, 0.01]);
    }

    #[test]
    fn test_scaling_disabled() {
        let policy = ScalingPolicy::disabled();
        assert_values(policy.apply([50_000, 1, 2, 3]), [50_000.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_scaling_validate() {
        assert!(ScalingPolicy::default().validate().is_ok());
        let bad = ScalingPolicy {
            divisor: 0.0,
            ..ScalingPolicy::default()
        };
        assert!(bad.validate().is_err());
    }
}
