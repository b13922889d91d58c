//! Window presets and per-window statistics.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::Duration;

use pmsense_types::{CHANNEL_COUNT, Channel, Sample};

/// Trailing window presets offered to operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TimeWindow {
    /// Last hour.
    #[default]
    #[serde(rename = "1h")]
    LastHour,
    /// Last 3 hours.
    #[serde(rename = "3h")]
    Last3Hours,
    /// Last 12 hours.
    #[serde(rename = "12h")]
    Last12Hours,
    /// Last 24 hours.
    #[serde(rename = "24h")]
    Last24Hours,
    /// Everything retained.
    #[serde(rename = "all")]
    All,
}

impl TimeWindow {
    /// All presets, narrowest first.
    pub const ALL: [TimeWindow; 5] = [
        TimeWindow::LastHour,
        TimeWindow::Last3Hours,
        TimeWindow::Last12Hours,
        TimeWindow::Last24Hours,
        TimeWindow::All,
    ];

    /// Trailing duration; `None` for [`TimeWindow::All`].
    pub fn duration(self) -> Option<Duration> {
        match self {
            Self::LastHour => Some(Duration::hours(1)),
            Self::Last3Hours => Some(Duration::hours(3)),
            Self::Last12Hours => Some(Duration::hours(12)),
            Self::Last24Hours => Some(Duration::hours(24)),
            Self::All => None,
        }
    }

    /// Short key used in query strings.
    pub fn key(self) -> &'static str {
        match self {
            Self::LastHour => "1h",
            Self::Last3Hours => "3h",
            Self::Last12Hours => "12h",
            Self::Last24Hours => "24h",
            Self::All => "all",
        }
    }

    /// Human-readable label.
    pub fn label(self) -> &'static str {
        match self {
            Self::LastHour => "Last 1h",
            Self::Last3Hours => "Last 3h",
            Self::Last12Hours => "Last 12h",
            Self::Last24Hours => "Last 24h",
            Self::All => "All time",
        }
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for TimeWindow {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|w| w.key() == key)
            .ok_or_else(|| format!("unknown window '{s}' (expected 1h, 3h, 12h, 24h or all)"))
    }
}

/// Latest, mean, and peak value of one channel.
///
/// Fields are `NaN` when no value is available; serialized as `null`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChannelStats {
    /// Value in the most recent sample.
    pub now: f64,
    /// Mean over the window, ignoring `NaN`.
    pub avg: f64,
    /// Peak over the window, ignoring `NaN`.
    pub max: f64,
}

impl ChannelStats {
    const EMPTY: Self = Self {
        now: f64::NAN,
        avg: f64::NAN,
        max: f64::NAN,
    };
}

/// Summary of one window.
#[derive(Debug, Clone, Serialize)]
pub struct WindowStats {
    /// Window the statistics cover.
    pub window: TimeWindow,
    /// Samples in the window.
    pub count: usize,
    /// PM1.0 statistics.
    pub pm1_0: ChannelStats,
    /// PM2.5 statistics.
    pub pm2_5: ChannelStats,
    /// PM4.0 statistics.
    pub pm4_0: ChannelStats,
    /// PM10 statistics.
    pub pm10_0: ChannelStats,
}

impl WindowStats {
    /// Compute statistics over `samples` (in timestamp order).
    pub fn compute(window: TimeWindow, samples: &[Sample]) -> Self {
        let mut channels = [ChannelStats::EMPTY; CHANNEL_COUNT];
        for channel in Channel::ALL {
            let values = samples.iter().map(|s| s.get(channel));
            channels[channel.index()] = ChannelStats {
                now: samples.last().map_or(f64::NAN, |s| s.get(channel)),
                avg: nan_mean(values.clone()),
                max: nan_max(values),
            };
        }
        let [pm1_0, pm2_5, pm4_0, pm10_0] = channels;
        Self {
            window,
            count: samples.len(),
            pm1_0,
            pm2_5,
            pm4_0,
            pm10_0,
        }
    }

    /// Statistics for one channel.
    pub fn channel(&self, channel: Channel) -> &ChannelStats {
        match channel {
            Channel::Pm1_0 => &self.pm1_0,
            Channel::Pm2_5 => &self.pm2_5,
            Channel::Pm4_0 => &self.pm4_0,
            Channel::Pm10_0 => &self.pm10_0,
        }
    }
}

/// Mean of the non-`NaN` values; `NaN` if there are none.
pub fn nan_mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values
        .filter(|v| !v.is_nan())
        .fold((0.0, 0u32), |(sum, n), v| (sum + v, n + 1));
    if n == 0 { f64::NAN } else { sum / f64::from(n) }
}

/// Maximum of the non-`NaN` values; `NaN` if there are none.
pub fn nan_max(values: impl Iterator<Item = f64>) -> f64 {
    values
        .filter(|v| !v.is_nan())
        .fold(f64::NAN, |acc, v| if acc.is_nan() || v > acc { v } else { acc })
}
