//! Mock transport and drivers for testing.
//!
//! This module provides in-memory stand-ins for serial ports and both driver
//! generations so the connection manager and sampler can be exercised
//! without hardware. The service's simulation mode uses them as well.
//!
//! # Features
//!
//! - **Call recording**: every port open/close and driver command is counted
//! - **Failure injection**: fail specific ports, starts, stops, or reads
//! - **Scripted responses**: queue exact register values or raw shapes
//! - **Generators**: derive values from the read count for long-running runs

use std::collections::{HashSet, VecDeque};
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use pmsense_types::RawValue;

use crate::driver::{
    LegacyDriverFactory, LegacySensor, ModernDriverFactory, ModernSensor, OutputFormat,
};
use crate::error::{Error, Result};
use crate::transport::{LinkSettings, SerialHandle, SerialLink, Transport};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// One call to [`Transport::open`] on a [`MockTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenAttempt {
    /// Requested port.
    pub port: String,
    /// Response-time allowance that was requested.
    pub additional_response_time: Option<Duration>,
    /// Whether the open succeeded.
    pub succeeded: bool,
}

#[derive(Debug, Default)]
struct TransportState {
    attempts: Mutex<Vec<OpenAttempt>>,
    closes: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
    fail_all: AtomicBool,
    reject_response_time: AtomicBool,
    exclusive: AtomicBool,
    open_latency: Mutex<Duration>,
    input_clears: AtomicU32,
}

/// An in-memory [`Transport`].
///
/// Opens succeed unless the port was marked failing, or the transport is
/// exclusive and the port already has an open link. Links accept writes,
/// return no bytes, and record their port when closed.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<TransportState>,
}

impl MockTransport {
    /// Create a transport where every port opens.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make opens of `port` fail.
    pub fn fail_port(&self, port: &str) {
        lock(&self.state.failing).insert(port.to_string());
    }

    /// Make every open fail (or stop doing so).
    pub fn fail_all(&self, fail: bool) {
        self.state.fail_all.store(fail, Ordering::SeqCst);
    }

    /// Reject opens that request a response-time allowance.
    pub fn reject_response_time(&self, reject: bool) {
        self.state.reject_response_time.store(reject, Ordering::SeqCst);
    }

    /// Reject opens of a port that already has an open link, the way an
    /// operating system refuses a second handle to a busy serial device.
    pub fn exclusive(&self, exclusive: bool) {
        self.state.exclusive.store(exclusive, Ordering::SeqCst);
    }

    /// Delay every successful open by `latency`. The port counts as open
    /// for the whole delay.
    pub fn set_open_latency(&self, latency: Duration) {
        *lock(&self.state.open_latency) = latency;
    }

    /// Number of times any link discarded its pending input.
    pub fn input_clears(&self) -> u32 {
        self.state.input_clears.load(Ordering::SeqCst)
    }

    /// Every open attempt, in order.
    pub fn open_attempts(&self) -> Vec<OpenAttempt> {
        lock(&self.state.attempts).clone()
    }

    /// Ports of every open attempt, in order, without the response-time
    /// retries.
    pub fn opens(&self) -> Vec<String> {
        let attempts = lock(&self.state.attempts);
        let mut ports: Vec<String> = Vec::with_capacity(attempts.len());
        for attempt in attempts.iter() {
            let retry = attempt.additional_response_time.is_none()
                && ports.last() == Some(&attempt.port)
                && self.state.reject_response_time.load(Ordering::SeqCst);
            if !retry {
                ports.push(attempt.port.clone());
            }
        }
        ports
    }

    /// Ports whose links were closed, in order.
    pub fn closes(&self) -> Vec<String> {
        lock(&self.state.closes).clone()
    }

    /// Number of currently open links.
    pub fn open_links(&self) -> usize {
        let opened = lock(&self.state.attempts)
            .iter()
            .filter(|a| a.succeeded)
            .count();
        opened - lock(&self.state.closes).len()
    }
}

impl TransportState {
    fn is_open(&self, port: &str) -> bool {
        let opened = lock(&self.attempts)
            .iter()
            .filter(|a| a.succeeded && a.port == port)
            .count();
        let closed = lock(&self.closes).iter().filter(|p| *p == port).count();
        opened > closed
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self, port: &str, settings: &LinkSettings) -> Result<SerialHandle> {
        let busy = self.state.exclusive.load(Ordering::SeqCst) && self.state.is_open(port);
        let rejected = self.state.reject_response_time.load(Ordering::SeqCst)
            && settings.additional_response_time.is_some();
        let failing = self.state.fail_all.load(Ordering::SeqCst)
            || lock(&self.state.failing).contains(port);

        lock(&self.state.attempts).push(OpenAttempt {
            port: port.to_string(),
            additional_response_time: settings.additional_response_time,
            succeeded: !busy && !rejected && !failing,
        });

        if busy {
            return Err(Error::port_open(port, "port is busy"));
        }
        if rejected {
            return Err(Error::UnsupportedSetting(
                "additional_response_time".to_string(),
            ));
        }
        if failing {
            return Err(Error::port_open(port, "mock port unavailable"));
        }
        let handle = SerialHandle::new(
            port,
            Box::new(MockLink {
                port: port.to_string(),
                state: Arc::clone(&self.state),
            }),
        );
        let latency = *lock(&self.state.open_latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        Ok(handle)
    }
}

struct MockLink {
    port: String,
    state: Arc<TransportState>,
}

impl Read for MockLink {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Ok(0)
    }
}

impl Write for MockLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SerialLink for MockLink {
    fn clear_input(&mut self) -> io::Result<()> {
        self.state.input_clears.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for MockLink {
    fn drop(&mut self) {
        lock(&self.state.closes).push(self.port.clone());
    }
}

/// Counters and switches shared by both mock sensor generations.
#[derive(Debug, Default)]
struct SensorControls {
    data_ready: AtomicBool,
    ready_polls: AtomicU32,
    reads: AtomicU32,
    remaining_read_failures: AtomicU32,
    fail_reads: AtomicBool,
    fail_starts: AtomicBool,
    fail_stops: AtomicBool,
    format_starts: AtomicU32,
    plain_starts: AtomicU32,
    stops: AtomicU32,
    read_latency: Mutex<Duration>,
    serial: Mutex<Option<String>>,
}

impl SensorControls {
    fn new() -> Self {
        Self {
            data_ready: AtomicBool::new(true),
            serial: Mutex::new(Some("MOCK0123456789".to_string())),
            ..Default::default()
        }
    }

    fn poll_ready(&self) -> bool {
        self.ready_polls.fetch_add(1, Ordering::SeqCst);
        self.data_ready.load(Ordering::SeqCst)
    }

    /// Common read preamble: latency, then failure injection.
    async fn begin_read(&self) -> Result<u32> {
        let latency = *lock(&self.read_latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let count = self.reads.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Error::driver("read_values", "mock read failure"));
        }
        let remaining = self.remaining_read_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.remaining_read_failures
                .store(remaining - 1, Ordering::SeqCst);
            return Err(Error::driver("read_values", "mock transient failure"));
        }
        Ok(count)
    }

    fn start(&self, with_format: bool) -> Result<()> {
        if self.fail_starts.load(Ordering::SeqCst) {
            return Err(Error::driver("start_measurement", "mock start failure"));
        }
        let counter = if with_format {
            &self.format_starts
        } else {
            &self.plain_starts
        };
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        if self.fail_stops.load(Ordering::SeqCst) {
            return Err(Error::driver("stop_measurement", "mock stop failure"));
        }
        Ok(())
    }

    fn serial(&self) -> Result<String> {
        lock(&self.serial)
            .clone()
            .ok_or_else(|| Error::unsupported("serial_number"))
    }
}

macro_rules! sensor_controls {
    ($ty:ident) => {
        impl $ty {
            /// Set whether the data-ready flag reports ready.
            pub fn set_data_ready(&self, ready: bool) {
                self.controls.data_ready.store(ready, Ordering::SeqCst);
            }

            /// Fail the next `count` reads.
            pub fn fail_reads(&self, count: u32) {
                self.controls
                    .remaining_read_failures
                    .store(count, Ordering::SeqCst);
            }

            /// Fail every read until switched off.
            pub fn fail_all_reads(&self, fail: bool) {
                self.controls.fail_reads.store(fail, Ordering::SeqCst);
            }

            /// Fail every start command.
            pub fn fail_starts(&self, fail: bool) {
                self.controls.fail_starts.store(fail, Ordering::SeqCst);
            }

            /// Fail every stop command.
            pub fn fail_stops(&self, fail: bool) {
                self.controls.fail_stops.store(fail, Ordering::SeqCst);
            }

            /// Delay every read by `latency`.
            pub fn set_read_latency(&self, latency: Duration) {
                *lock(&self.controls.read_latency) = latency;
            }

            /// Serial number to report; `None` makes the query unsupported.
            pub fn set_serial_number(&self, serial: Option<&str>) {
                *lock(&self.controls.serial) = serial.map(str::to_string);
            }

            /// Number of data-ready queries so far.
            pub fn ready_polls(&self) -> u32 {
                self.controls.ready_polls.load(Ordering::SeqCst)
            }

            /// Number of read attempts so far.
            pub fn reads(&self) -> u32 {
                self.controls.reads.load(Ordering::SeqCst)
            }

            /// Number of successful parameterless starts.
            pub fn plain_starts(&self) -> u32 {
                self.controls.plain_starts.load(Ordering::SeqCst)
            }

            /// Number of stop commands.
            pub fn stops(&self) -> u32 {
                self.controls.stops.load(Ordering::SeqCst)
            }
        }
    };
}

type ValueGenerator = Box<dyn Fn(u32) -> [u16; 4] + Send + Sync>;

/// A mock [`ModernSensor`].
///
/// Reads pop queued values first and fall back to the generator (or fixed
/// default values) when the queue is empty. Clones share all state.
#[derive(Clone)]
pub struct MockModernSensor {
    controls: Arc<SensorControls>,
    queued: Arc<Mutex<VecDeque<[u16; 4]>>>,
    generator: Arc<Mutex<Option<ValueGenerator>>>,
    reject_format: Arc<AtomicBool>,
}

impl std::fmt::Debug for MockModernSensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockModernSensor")
            .field("reads", &self.reads())
            .finish()
    }
}

impl Default for MockModernSensor {
    fn default() -> Self {
        Self::new()
    }
}

/// Register values returned when nothing is queued.
pub const DEFAULT_MOCK_VALUES: [u16; 4] = [8, 12, 14, 15];

impl MockModernSensor {
    /// Create a sensor returning [`DEFAULT_MOCK_VALUES`].
    pub fn new() -> Self {
        Self {
            controls: Arc::new(SensorControls::new()),
            queued: Arc::new(Mutex::new(VecDeque::new())),
            generator: Arc::new(Mutex::new(None)),
            reject_format: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A sensor whose values drift slowly with the read count.
    pub fn simulated() -> Self {
        let sensor = Self::new();
        sensor.set_generator(|n| {
            let phase = (n % 60) as f64 / 60.0 * std::f64::consts::TAU;
            let base = 12.0 + 6.0 * phase.sin();
            let pm1 = base.max(0.0);
            [
                pm1 as u16,
                (pm1 * 1.4) as u16,
                (pm1 * 1.6) as u16,
                (pm1 * 1.7) as u16,
            ]
        });
        sensor
    }

    /// Queue one set of register values.
    pub fn push_values(&self, values: [u16; 4]) {
        lock(&self.queued).push_back(values);
    }

    /// Produce values from the 1-based read count when nothing is queued.
    pub fn set_generator<F>(&self, generator: F)
    where
        F: Fn(u32) -> [u16; 4] + Send + Sync + 'static,
    {
        *lock(&self.generator) = Some(Box::new(generator));
    }

    /// Reject starts that carry an output format.
    pub fn reject_format_start(&self, reject: bool) {
        self.reject_format.store(reject, Ordering::SeqCst);
    }

    /// Number of successful starts with an output format.
    pub fn format_starts(&self) -> u32 {
        self.controls.format_starts.load(Ordering::SeqCst)
    }
}

sensor_controls!(MockModernSensor);

#[async_trait]
impl ModernSensor for MockModernSensor {
    async fn start_measurement(&self, _format: OutputFormat) -> Result<()> {
        if self.reject_format.load(Ordering::SeqCst) {
            return Err(Error::unsupported("start_measurement(format)"));
        }
        self.controls.start(true)
    }

    async fn start_measurement_default(&self) -> Result<()> {
        self.controls.start(false)
    }

    async fn is_data_ready(&self) -> Result<bool> {
        Ok(self.controls.poll_ready())
    }

    async fn read_values(&self) -> Result<[u16; 4]> {
        let count = self.controls.begin_read().await?;
        if let Some(values) = lock(&self.queued).pop_front() {
            return Ok(values);
        }
        Ok(lock(&self.generator)
            .as_ref()
            .map_or(DEFAULT_MOCK_VALUES, |g| g(count)))
    }

    async fn stop_measurement(&self) -> Result<()> {
        self.controls.stop()
    }

    async fn serial_number(&self) -> Result<String> {
        self.controls.serial()
    }
}

/// A mock [`LegacySensor`] returning scripted raw responses.
#[derive(Clone)]
pub struct MockLegacySensor {
    controls: Arc<SensorControls>,
    queued: Arc<Mutex<VecDeque<RawValue>>>,
    fallback: Arc<Mutex<RawValue>>,
}

impl std::fmt::Debug for MockLegacySensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockLegacySensor")
            .field("reads", &self.reads())
            .finish()
    }
}

impl Default for MockLegacySensor {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLegacySensor {
    /// Create a sensor answering with a nested mass/number/size response.
    pub fn new() -> Self {
        let fallback = RawValue::Sequence(vec![
            RawValue::numbers(DEFAULT_MOCK_VALUES.map(f64::from)),
            RawValue::numbers([40.0, 48.0, 50.0, 51.0, 51.0]),
            RawValue::Number(0.55),
        ]);
        Self {
            controls: Arc::new(SensorControls::new()),
            queued: Arc::new(Mutex::new(VecDeque::new())),
            fallback: Arc::new(Mutex::new(fallback)),
        }
    }

    /// Queue one raw response.
    pub fn push_response(&self, response: RawValue) {
        lock(&self.queued).push_back(response);
    }

    /// Response returned when nothing is queued.
    pub fn set_fallback(&self, response: RawValue) {
        *lock(&self.fallback) = response;
    }
}

sensor_controls!(MockLegacySensor);

#[async_trait]
impl LegacySensor for MockLegacySensor {
    async fn start_measurement(&self) -> Result<()> {
        self.controls.start(false)
    }

    async fn is_data_ready(&self) -> Result<bool> {
        Ok(self.controls.poll_ready())
    }

    async fn read_values(&self) -> Result<RawValue> {
        self.controls.begin_read().await?;
        if let Some(response) = lock(&self.queued).pop_front() {
            return Ok(response);
        }
        Ok(lock(&self.fallback).clone())
    }

    async fn stop_measurement(&self) -> Result<()> {
        self.controls.stop()
    }

    async fn serial_number(&self) -> Result<String> {
        self.controls.serial()
    }
}

/// A sensor bound to a link: operations fail once the link is closed.
struct Attached<S> {
    sensor: S,
    link: SerialHandle,
}

impl<S> Attached<S> {
    fn check(&self) -> Result<()> {
        if self.link.is_open() {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }
}

#[async_trait]
impl ModernSensor for Attached<MockModernSensor> {
    async fn start_measurement(&self, format: OutputFormat) -> Result<()> {
        self.check()?;
        self.sensor.start_measurement(format).await
    }

    async fn start_measurement_default(&self) -> Result<()> {
        self.check()?;
        self.sensor.start_measurement_default().await
    }

    async fn is_data_ready(&self) -> Result<bool> {
        self.check()?;
        self.sensor.is_data_ready().await
    }

    async fn read_values(&self) -> Result<[u16; 4]> {
        self.check()?;
        ModernSensor::read_values(&self.sensor).await
    }

    async fn stop_measurement(&self) -> Result<()> {
        self.check()?;
        ModernSensor::stop_measurement(&self.sensor).await
    }

    async fn serial_number(&self) -> Result<String> {
        self.check()?;
        ModernSensor::serial_number(&self.sensor).await
    }
}

#[async_trait]
impl LegacySensor for Attached<MockLegacySensor> {
    async fn start_measurement(&self) -> Result<()> {
        self.check()?;
        LegacySensor::start_measurement(&self.sensor).await
    }

    async fn is_data_ready(&self) -> Result<bool> {
        self.check()?;
        LegacySensor::is_data_ready(&self.sensor).await
    }

    async fn read_values(&self) -> Result<RawValue> {
        self.check()?;
        LegacySensor::read_values(&self.sensor).await
    }

    async fn stop_measurement(&self) -> Result<()> {
        self.check()?;
        LegacySensor::stop_measurement(&self.sensor).await
    }

    async fn serial_number(&self) -> Result<String> {
        self.check()?;
        LegacySensor::serial_number(&self.sensor).await
    }
}

#[derive(Debug, Default)]
struct FactoryState {
    failing: Mutex<HashSet<String>>,
    attached: Mutex<Vec<String>>,
}

impl FactoryState {
    fn attach(&self, link: &SerialHandle) -> Result<()> {
        if lock(&self.failing).contains(link.port()) {
            return Err(Error::driver("attach", "no sensor answered"));
        }
        lock(&self.attached).push(link.port().to_string());
        Ok(())
    }
}

macro_rules! factory_controls {
    ($ty:ident, $sensor:ident) => {
        impl $ty {
            /// Create a factory around a fresh sensor.
            pub fn new() -> Self {
                Self::with_sensor($sensor::new())
            }

            /// Create a factory that hands out `sensor` on every attach.
            pub fn with_sensor(sensor: $sensor) -> Self {
                Self {
                    sensor,
                    state: Arc::new(FactoryState::default()),
                }
            }

            /// The shared sensor.
            pub fn sensor(&self) -> $sensor {
                self.sensor.clone()
            }

            /// Fail to attach on `port`, as if nothing answered there.
            pub fn fail_on(&self, port: &str) {
                lock(&self.state.failing).insert(port.to_string());
            }

            /// Ports a driver was attached to, in order.
            pub fn attached(&self) -> Vec<String> {
                lock(&self.state.attached).clone()
            }
        }

        impl Default for $ty {
            fn default() -> Self {
                Self::new()
            }
        }
    };
}

/// Factory for [`MockModernSensor`] drivers.
#[derive(Debug, Clone)]
pub struct MockModernFactory {
    sensor: MockModernSensor,
    state: Arc<FactoryState>,
}

factory_controls!(MockModernFactory, MockModernSensor);

impl ModernDriverFactory for MockModernFactory {
    fn attach(&self, link: SerialHandle) -> Result<Box<dyn ModernSensor>> {
        self.state.attach(&link)?;
        Ok(Box::new(Attached {
            sensor: self.sensor.clone(),
            link,
        }))
    }
}

/// Factory for [`MockLegacySensor`] drivers.
#[derive(Debug, Clone)]
pub struct MockLegacyFactory {
    sensor: MockLegacySensor,
    state: Arc<FactoryState>,
}

factory_controls!(MockLegacyFactory, MockLegacySensor);

impl LegacyDriverFactory for MockLegacyFactory {
    fn attach(&self, link: SerialHandle) -> Result<Box<dyn LegacySensor>> {
        self.state.attach(&link)?;
        Ok(Box::new(Attached {
            sensor: self.sensor.clone(),
            link,
        }))
    }
}
