//! Sensor driver capabilities.
//!
//! The same sensor family can be reached through two driver generations:
//!
//! - [`ModernSensor`]: parameterized start, integer register reads.
//! - [`LegacySensor`]: parameterless start, untyped structured reads.
//!
//! [`SensorDriver`] is the tagged union of the two. The variant is chosen
//! once when a port is opened and never re-probed. Drivers are created from
//! an open [`SerialHandle`] by a [`DriverSet`]; the wire protocol itself lives
//! in the factory implementations.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, UtcOffset};
use tracing::debug;

use pmsense_types::{ParseError, RawValue, Sample, ScalingPolicy, normalize};

use crate::error::{Error, Result};
use crate::transport::SerialHandle;

/// Output format requested from modern drivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutputFormat(pub u16);

impl OutputFormat {
    /// Unsigned 16-bit integer output.
    pub const UINT16: OutputFormat = OutputFormat(261);
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self::UINT16
    }
}

/// Modern driver generation.
#[async_trait]
pub trait ModernSensor: Send + Sync {
    /// Start continuous measurement in the given output format.
    async fn start_measurement(&self, format: OutputFormat) -> Result<()>;

    /// Start continuous measurement in the device's default format.
    async fn start_measurement_default(&self) -> Result<()>;

    /// Whether a new measurement is available.
    async fn is_data_ready(&self) -> Result<bool>;

    /// Read the four mass-concentration registers.
    async fn read_values(&self) -> Result<[u16; 4]>;

    /// Stop measurement.
    async fn stop_measurement(&self) -> Result<()>;

    /// Device serial number.
    async fn serial_number(&self) -> Result<String> {
        Err(Error::unsupported("serial_number"))
    }
}

/// Legacy driver generation.
#[async_trait]
pub trait LegacySensor: Send + Sync {
    /// Start continuous measurement.
    async fn start_measurement(&self) -> Result<()>;

    /// Whether a new measurement is available.
    async fn is_data_ready(&self) -> Result<bool>;

    /// Read one measurement in whatever shape the driver produces.
    async fn read_values(&self) -> Result<RawValue>;

    /// Stop measurement.
    async fn stop_measurement(&self) -> Result<()>;

    /// Device serial number.
    async fn serial_number(&self) -> Result<String> {
        Err(Error::unsupported("serial_number"))
    }
}

/// Creates a [`ModernSensor`] on an open link.
pub trait ModernDriverFactory: Send + Sync {
    /// Attach a driver to the link.
    fn attach(&self, link: SerialHandle) -> Result<Box<dyn ModernSensor>>;
}

/// Creates a [`LegacySensor`] on an open link.
pub trait LegacyDriverFactory: Send + Sync {
    /// Attach a driver to the link.
    fn attach(&self, link: SerialHandle) -> Result<Box<dyn LegacySensor>>;
}

/// Which driver generation is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverVariant {
    /// [`ModernSensor`].
    Modern,
    /// [`LegacySensor`].
    Legacy,
}

impl fmt::Display for DriverVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverVariant::Modern => write!(f, "UART"),
            DriverVariant::Legacy => write!(f, "SHDLC"),
        }
    }
}

/// The driver backends available to the connection manager.
#[derive(Clone, Default)]
pub struct DriverSet {
    modern: Option<Arc<dyn ModernDriverFactory>>,
    legacy: Option<Arc<dyn LegacyDriverFactory>>,
}

impl fmt::Debug for DriverSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverSet")
            .field("modern", &self.modern.is_some())
            .field("legacy", &self.legacy.is_some())
            .finish()
    }
}

impl DriverSet {
    /// An empty set. Connecting with it always fails with
    /// [`Error::DriverUnavailable`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the modern backend.
    #[must_use]
    pub fn with_modern(mut self, factory: Arc<dyn ModernDriverFactory>) -> Self {
        self.modern = Some(factory);
        self
    }

    /// Register the legacy backend.
    #[must_use]
    pub fn with_legacy(mut self, factory: Arc<dyn LegacyDriverFactory>) -> Self {
        self.legacy = Some(factory);
        self
    }

    /// Returns `true` if no backend is registered.
    pub fn is_empty(&self) -> bool {
        self.modern.is_none() && self.legacy.is_none()
    }

    /// Attach a driver to `link`, preferring the modern backend.
    pub fn attach(&self, link: SerialHandle) -> Result<SensorDriver> {
        if let Some(factory) = &self.modern {
            return factory.attach(link).map(SensorDriver::Modern);
        }
        if let Some(factory) = &self.legacy {
            return factory.attach(link).map(SensorDriver::Legacy);
        }
        Err(Error::DriverUnavailable)
    }
}

/// Number of readiness polls before a modern read.
pub const MODERN_READY_POLLS: u32 = 20;
/// Number of readiness polls before a legacy read.
pub const LEGACY_READY_POLLS: u32 = 10;
/// Delay between readiness polls.
pub const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Outcome of one read attempt.
#[derive(Debug)]
pub enum ReadOutcome {
    /// A normalized sample.
    Sample(Sample),
    /// The driver answered but the response held no usable measurement.
    NoData(ParseError),
    /// The read itself failed.
    TransientError(Error),
}

impl ReadOutcome {
    /// The sample, if the read succeeded.
    pub fn sample(&self) -> Option<&Sample> {
        match self {
            ReadOutcome::Sample(sample) => Some(sample),
            _ => None,
        }
    }
}

/// An attached driver of either generation.
pub enum SensorDriver {
    /// Modern driver.
    Modern(Box<dyn ModernSensor>),
    /// Legacy driver.
    Legacy(Box<dyn LegacySensor>),
}

impl fmt::Debug for SensorDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SensorDriver").field(&self.variant()).finish()
    }
}

impl SensorDriver {
    /// Which generation this driver belongs to.
    pub fn variant(&self) -> DriverVariant {
        match self {
            SensorDriver::Modern(_) => DriverVariant::Modern,
            SensorDriver::Legacy(_) => DriverVariant::Legacy,
        }
    }

    /// Start with an explicit output format. Only modern drivers accept one.
    pub async fn start_with_format(&self, format: OutputFormat) -> Result<()> {
        match self {
            SensorDriver::Modern(sensor) => sensor.start_measurement(format).await,
            SensorDriver::Legacy(_) => Err(Error::unsupported("start_measurement(format)")),
        }
    }

    /// Start without parameters.
    pub async fn start(&self) -> Result<()> {
        match self {
            SensorDriver::Modern(sensor) => sensor.start_measurement_default().await,
            SensorDriver::Legacy(sensor) => sensor.start_measurement().await,
        }
    }

    /// Stop measurement.
    pub async fn stop(&self) -> Result<()> {
        match self {
            SensorDriver::Modern(sensor) => sensor.stop_measurement().await,
            SensorDriver::Legacy(sensor) => sensor.stop_measurement().await,
        }
    }

    /// Device serial number, if the driver can report one.
    pub async fn serial_number(&self) -> Result<String> {
        match self {
            SensorDriver::Modern(sensor) => sensor.serial_number().await,
            SensorDriver::Legacy(sensor) => sensor.serial_number().await,
        }
    }

    async fn is_data_ready(&self) -> Result<bool> {
        match self {
            SensorDriver::Modern(sensor) => sensor.is_data_ready().await,
            SensorDriver::Legacy(sensor) => sensor.is_data_ready().await,
        }
    }

    /// Poll readiness a bounded number of times.
    ///
    /// The read proceeds whether or not the device reported ready; an error
    /// from the readiness query ends the polling early.
    async fn wait_until_ready(&self) {
        let polls = match self {
            SensorDriver::Modern(_) => MODERN_READY_POLLS,
            SensorDriver::Legacy(_) => LEGACY_READY_POLLS,
        };
        for _ in 0..polls {
            match self.is_data_ready().await {
                Ok(true) => return,
                Ok(false) => tokio::time::sleep(READY_POLL_INTERVAL).await,
                Err(e) => {
                    debug!("Data-ready query failed: {}", e);
                    return;
                }
            }
        }
    }

    /// Read raw channel values, normalized but without a timestamp.
    ///
    /// Modern register values go through `scaling`; legacy responses go
    /// through shape normalization.
    pub async fn read_values(&self, scaling: &ScalingPolicy) -> Result<[f64; 4]> {
        self.wait_until_ready().await;
        match self {
            SensorDriver::Modern(sensor) => {
                let raw = sensor.read_values().await?;
                Ok(scaling.apply(raw))
            }
            SensorDriver::Legacy(sensor) => {
                let raw = sensor.read_values().await?;
                Ok(normalize(&raw)?)
            }
        }
    }

    /// Perform one read and classify the result.
    pub async fn read(&self, scaling: &ScalingPolicy, offset: UtcOffset) -> ReadOutcome {
        match self.read_values(scaling).await {
            Ok(values) => {
                let timestamp = OffsetDateTime::now_utc().to_offset(offset);
                ReadOutcome::Sample(Sample::new(timestamp, values))
            }
            Err(Error::Parse(e)) => ReadOutcome::NoData(e),
            Err(e) => ReadOutcome::TransientError(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockLegacySensor, MockModernSensor};

    #[test]
    fn test_output_format_value() {
        assert_eq!(OutputFormat::default().0, 261);
    }

    #[test]
    fn test_empty_driver_set() {
        let set = DriverSet::new();
        assert!(set.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_modern_read_applies_scaling() {
        let sensor = MockModernSensor::new();
        sensor.push_values([50_000, 60_000, 70_000, 80_000]);
        let driver = SensorDriver::Modern(Box::new(sensor.clone()));

        let outcome = driver.read(&ScalingPolicy::default(), UtcOffset::UTC).await;
        let sample = outcome.sample().copied().unwrap();
        assert_eq!(sample.pm1_0, 0.5);
        assert_eq!(sample.pm10_0, 0.8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_legacy_read_normalizes_nested_shape() {
        let sensor = MockLegacySensor::new();
        sensor.push_response(RawValue::Sequence(vec![
            RawValue::numbers([1.0, 2.0, 3.0, 4.0]),
            RawValue::numbers([5.0, 6.0, 7.0, 8.0, 9.0]),
            RawValue::Number(0.6),
        ]));
        let driver = SensorDriver::Legacy(Box::new(sensor));

        let outcome = driver.read(&ScalingPolicy::default(), UtcOffset::UTC).await;
        assert_eq!(outcome.sample().map(|s| s.values()), Some([1.0, 2.0, 3.0, 4.0]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_legacy_unrecognized_shape_is_no_data() {
        let sensor = MockLegacySensor::new();
        sensor.push_response(RawValue::Number(12.0));
        let driver = SensorDriver::Legacy(Box::new(sensor));

        let outcome = driver.read(&ScalingPolicy::default(), UtcOffset::UTC).await;
        assert!(matches!(outcome, ReadOutcome::NoData(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_error_is_transient() {
        let sensor = MockModernSensor::new();
        sensor.fail_reads(1);
        let driver = SensorDriver::Modern(Box::new(sensor));

        let outcome = driver.read(&ScalingPolicy::default(), UtcOffset::UTC).await;
        assert!(matches!(outcome, ReadOutcome::TransientError(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_readiness_is_polled_up_to_limit() {
        let sensor = MockLegacySensor::new();
        sensor.set_data_ready(false);
        sensor.push_response(RawValue::numbers([1.0, 1.0, 1.0, 1.0]));
        let driver = SensorDriver::Legacy(Box::new(sensor.clone()));

        let start = tokio::time::Instant::now();
        let outcome = driver.read(&ScalingPolicy::default(), UtcOffset::UTC).await;
        assert!(outcome.sample().is_some());
        assert_eq!(sensor.ready_polls(), LEGACY_READY_POLLS);
        assert_eq!(start.elapsed(), READY_POLL_INTERVAL * LEGACY_READY_POLLS);
    }

    #[tokio::test]
    async fn test_legacy_rejects_format_start() {
        let driver = SensorDriver::Legacy(Box::new(MockLegacySensor::new()));
        assert!(matches!(
            driver.start_with_format(OutputFormat::UINT16).await,
            Err(Error::Unsupported(_))
        ));
        assert!(driver.start().await.is_ok());
    }
}
