//! Normalized particulate-matter samples.

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Number of mass-concentration channels in a [`Sample`].
pub const CHANNEL_COUNT: usize = 4;

/// One of the four mass-concentration channels reported by the sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Channel {
    /// PM1.0, particles below 1.0 µm.
    Pm1_0,
    /// PM2.5, particles below 2.5 µm.
    Pm2_5,
    /// PM4.0, particles below 4.0 µm.
    Pm4_0,
    /// PM10, particles below 10 µm.
    Pm10_0,
}

impl Channel {
    /// All channels in reporting order.
    pub const ALL: [Channel; CHANNEL_COUNT] =
        [Channel::Pm1_0, Channel::Pm2_5, Channel::Pm4_0, Channel::Pm10_0];

    /// Position of the channel in the reporting order.
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            Channel::Pm1_0 => 0,
            Channel::Pm2_5 => 1,
            Channel::Pm4_0 => 2,
            Channel::Pm10_0 => 3,
        }
    }

    /// Column name used in the persisted CSV log.
    #[must_use]
    pub fn column(self) -> &'static str {
        match self {
            Channel::Pm1_0 => "pm1",
            Channel::Pm2_5 => "pm2_5",
            Channel::Pm4_0 => "pm4",
            Channel::Pm10_0 => "pm10",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Pm1_0 => write!(f, "PM1.0"),
            Channel::Pm2_5 => write!(f, "PM2.5"),
            Channel::Pm4_0 => write!(f, "PM4.0"),
            Channel::Pm10_0 => write!(f, "PM10"),
        }
    }
}

/// A normalized particulate-matter reading.
///
/// Concentrations are in µg/m³. A channel that could not be read is `NaN`;
/// `NaN` never affects the other channels of the same sample.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Sample {
    /// When the reading was taken.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub timestamp: OffsetDateTime,
    /// PM1.0 mass concentration.
    pub pm1_0: f64,
    /// PM2.5 mass concentration.
    pub pm2_5: f64,
    /// PM4.0 mass concentration.
    pub pm4_0: f64,
    /// PM10 mass concentration.
    pub pm10_0: f64,
}

impl Sample {
    /// Build a sample from channel values in reporting order.
    #[must_use]
    pub fn new(timestamp: OffsetDateTime, values: [f64; CHANNEL_COUNT]) -> Self {
        let [pm1_0, pm2_5, pm4_0, pm10_0] = values;
        Self {
            timestamp,
            pm1_0,
            pm2_5,
            pm4_0,
            pm10_0,
        }
    }

    /// Channel values in reporting order.
    #[must_use]
    pub fn values(&self) -> [f64; CHANNEL_COUNT] {
        [self.pm1_0, self.pm2_5, self.pm4_0, self.pm10_0]
    }

    /// Value of a single channel.
    #[must_use]
    pub fn get(&self, channel: Channel) -> f64 {
        self.values()[channel.index()]
    }

    /// Returns `true` when every channel carries a value.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.values().iter().all(|v| !v.is_nan())
    }
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PM1.0 {:.1}  PM2.5 {:.1}  PM4.0 {:.1}  PM10 {:.1} µg/m³",
            self.pm1_0, self.pm2_5, self.pm4_0, self.pm10_0
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_new_assigns_channels_in_order() {
        let sample = Sample::new(datetime!(2024-03-01 12:00 UTC), [1.0, 2.0, 3.0, 4.0]);
        assert_eq!(sample.pm1_0, 1.0);
        assert_eq!(sample.pm2_5, 2.0);
        assert_eq!(sample.pm4_0, 3.0);
        assert_eq!(sample.pm10_0, 4.0);
        assert_eq!(sample.get(Channel::Pm4_0), 3.0);
    }

    #[test]
    fn test_nan_channel_is_isolated() {
        let sample = Sample::new(datetime!(2024-03-01 12:00 UTC), [1.0, f64::NAN, 3.0, 4.0]);
        assert!(!sample.is_complete());
        assert!(sample.pm2_5.is_nan());
        assert_eq!(sample.pm10_0, 4.0);
    }

    #[test]
    fn test_channel_columns() {
        let columns: Vec<_> = Channel::ALL.iter().map(|c| c.column()).collect();
        assert_eq!(columns, vec!["pm1", "pm2_5", "pm4", "pm10"]);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_sample_serializes_rfc3339() {
        let sample = Sample::new(datetime!(2024-03-01 12:00:05 UTC), [1.0, 2.0, 3.0, 4.0]);
        let json = serde_json::to_value(sample).unwrap();
        assert_eq!(json["timestamp"], "2024-03-01T12:00:05Z");
        assert_eq!(json["pm2_5"], 2.0);
    }
}
