//! The sampling loop.
//!
//! A [`Sampler`] runs one background task that owns the device: it connects
//! (with capped backoff), waits out the warm-up window, reads on a fixed
//! period, and forces a reconnect after too many consecutive failed reads.
//! Samples are published through a bounded channel ([`SampleStream`]) and an
//! optional callback; neither can block or break the loop.
//!
//! The control methods ([`pause`](Sampler::pause), [`resume`](Sampler::resume),
//! [`set_port`](Sampler::set_port), [`release`](Sampler::release)) only set
//! flags. The loop applies them at its next tick.
//!
//! # Example
//!
//! ```no_run
//! use futures::StreamExt;
//! use pmsense_core::{Sampler, SamplerConfig};
//!
//! # async fn example() -> pmsense_core::Result<()> {
//! let config = SamplerConfig::default().port("COM3");
//! let (sampler, mut samples) = Sampler::builder(config).spawn()?;
//!
//! while let Some(sample) = samples.next().await {
//!     println!("{sample}");
//! }
//! sampler.stop().await;
//! # Ok(())
//! # }
//! ```

use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::stream::Stream;
use serde::Serialize;
use time::UtcOffset;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use pmsense_types::{Sample, ScalingPolicy};

use crate::backoff::{Backoff, BackoffPolicy};
use crate::connection::{ConnectionManager, DEFAULT_WARMUP};
use crate::driver::{DriverSet, DriverVariant, ReadOutcome};
use crate::error::{Error, Result};
use crate::events::{DisconnectReason, EventDispatcher, EventReceiver, SamplerEvent};
use crate::ports::{PortLister, SystemPorts};
use crate::transport::{LinkSettings, SerialHandle, SerialPortTransport, Transport};

/// Shortest accepted sample period.
pub const MIN_SAMPLE_PERIOD: Duration = Duration::from_millis(500);
/// Sleep while paused or released.
pub const PAUSE_POLL: Duration = Duration::from_millis(200);
/// Sleep while waiting out the warm-up window.
pub const WARMUP_POLL: Duration = Duration::from_millis(200);
/// Granularity of the idle wait between samples.
pub const IDLE_STEP: Duration = Duration::from_millis(50);
/// Sleep after a failed read below the threshold.
pub const RETRY_DELAY: Duration = Duration::from_millis(500);
/// Sleep after a forced reconnect.
pub const RECONNECT_PAUSE: Duration = Duration::from_secs(1);
/// How long [`Sampler::stop`] waits for the loop before aborting it.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(3);
/// Longest [`Sampler::release`] waits for the loop to let go of the port.
pub const RELEASE_TIMEOUT: Duration = Duration::from_secs(5);

/// Error type a sample callback may return.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// Callback invoked on the sampling task for every sample.
///
/// Errors and panics are logged and otherwise ignored.
pub type SampleCallback =
    Arc<dyn Fn(&Sample) -> std::result::Result<(), CallbackError> + Send + Sync>;

/// Sampler configuration.
#[derive(Debug, Clone)]
pub struct SamplerConfig {
    /// Port to use; `None` scans discovered ports.
    pub port: Option<String>,
    /// Time between samples. Values below [`MIN_SAMPLE_PERIOD`] are raised to it.
    pub sample_period: Duration,
    /// Reads are suppressed for this long after connecting.
    pub warmup: Duration,
    /// Consecutive failed reads that force a reconnect.
    pub max_consecutive_failures: u32,
    /// Delay schedule between failed connection attempts.
    pub backoff: BackoffPolicy,
    /// A sample older than this no longer counts as connected.
    pub liveness_window: Duration,
    /// Rescaling for modern driver register values.
    pub scaling: ScalingPolicy,
    /// Serial link settings.
    pub link: LinkSettings,
    /// Offset applied to sample timestamps.
    pub utc_offset: UtcOffset,
    /// Capacity of the sample channel.
    pub channel_capacity: usize,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            port: None,
            sample_period: Duration::from_secs(5),
            warmup: DEFAULT_WARMUP,
            max_consecutive_failures: 50,
            backoff: BackoffPolicy::default(),
            liveness_window: Duration::from_secs(20),
            scaling: ScalingPolicy::default(),
            link: LinkSettings::default(),
            utc_offset: UtcOffset::UTC,
            channel_capacity: 64,
        }
    }
}

impl SamplerConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin the sampler to one port.
    #[must_use]
    pub fn port(mut self, port: impl Into<String>) -> Self {
        self.port = Some(port.into());
        self
    }

    /// Set the sample period.
    #[must_use]
    pub fn sample_period(mut self, period: Duration) -> Self {
        self.sample_period = period;
        self
    }

    /// Set the warm-up window.
    #[must_use]
    pub fn warmup(mut self, warmup: Duration) -> Self {
        self.warmup = warmup;
        self
    }

    /// Set the consecutive-failure threshold.
    #[must_use]
    pub fn max_consecutive_failures(mut self, max: u32) -> Self {
        self.max_consecutive_failures = max;
        self
    }

    /// Set the connect backoff schedule.
    #[must_use]
    pub fn backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set the modern-driver scaling policy.
    #[must_use]
    pub fn scaling(mut self, scaling: ScalingPolicy) -> Self {
        self.scaling = scaling;
        self
    }

    /// Set the timestamp offset.
    #[must_use]
    pub fn utc_offset(mut self, offset: UtcOffset) -> Self {
        self.utc_offset = offset;
        self
    }

    /// Sample period after applying the minimum.
    pub fn effective_period(&self) -> Duration {
        self.sample_period.max(MIN_SAMPLE_PERIOD)
    }

    /// Validate the configuration and return an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.max_consecutive_failures == 0 {
            return Err(Error::invalid_config(
                "max_consecutive_failures must be > 0",
            ));
        }
        if self.channel_capacity == 0 {
            return Err(Error::invalid_config("channel_capacity must be > 0"));
        }
        if self.liveness_window.is_zero() {
            return Err(Error::invalid_config("liveness_window must be > 0"));
        }
        if self.port.as_deref().is_some_and(|p| p.trim().is_empty()) {
            return Err(Error::invalid_config("port must not be empty"));
        }
        self.backoff.validate()?;
        self.link.validate()?;
        self.scaling.validate()?;
        Ok(())
    }
}

/// Point-in-time view of the sampler for status displays.
#[derive(Debug, Clone, Serialize)]
pub struct SamplerStatus {
    /// Derived liveness: an open link and a recent sample.
    pub connected: bool,
    /// Whether reads are paused.
    pub paused: bool,
    /// Whether the port has been released to another user.
    pub released: bool,
    /// Requested port (`None` is auto-scan).
    pub target_port: Option<String>,
    /// Port of the open session.
    pub active_port: Option<String>,
    /// Driver generation of the open session.
    pub driver: Option<DriverVariant>,
    /// Seconds since the last sample.
    pub last_sample_age_secs: Option<f64>,
}

/// State shared between the sampling task and the control surface.
#[derive(Debug)]
struct Shared {
    paused: AtomicBool,
    released: AtomicBool,
    reset_requested: AtomicBool,
    rearm_requested: AtomicBool,
    target_port: Mutex<Option<String>>,
    link: Mutex<Option<(SerialHandle, DriverVariant)>>,
    last_sample: Mutex<Option<Instant>>,
    liveness_window: Duration,
    /// `true` while the loop is connecting or has a session.
    holding: watch::Sender<bool>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl Shared {
    fn target_port(&self) -> Option<String> {
        lock(&self.target_port).clone()
    }

    fn publish_link(&self, link: Option<(SerialHandle, DriverVariant)>) {
        *lock(&self.link) = link;
    }

    fn close_link(&self) {
        if let Some((link, _)) = lock(&self.link).take() {
            link.close();
        }
    }

    fn set_holding(&self, holding: bool) {
        self.holding
            .send_if_modified(|current| std::mem::replace(current, holding) != holding);
    }

    fn clear_last_sample(&self) {
        *lock(&self.last_sample) = None;
    }

    fn is_connected(&self) -> bool {
        let open = lock(&self.link)
            .as_ref()
            .is_some_and(|(link, _)| link.is_open());
        open && lock(&self.last_sample).is_some_and(|t| t.elapsed() < self.liveness_window)
    }
}

/// Builder for a [`Sampler`].
pub struct SamplerBuilder {
    config: SamplerConfig,
    transport: Arc<dyn Transport>,
    ports: Arc<dyn PortLister>,
    drivers: DriverSet,
    callback: Option<SampleCallback>,
    events: Option<EventDispatcher>,
}

impl SamplerBuilder {
    /// Use `transport` to open ports.
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    /// Use `ports` for auto-scan.
    #[must_use]
    pub fn ports(mut self, ports: Arc<dyn PortLister>) -> Self {
        self.ports = ports;
        self
    }

    /// Use these driver backends.
    #[must_use]
    pub fn drivers(mut self, drivers: DriverSet) -> Self {
        self.drivers = drivers;
        self
    }

    /// Invoke `callback` for every sample.
    #[must_use]
    pub fn on_sample<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Sample) -> std::result::Result<(), CallbackError> + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
        self
    }

    /// Send lifecycle events through `events`.
    #[must_use]
    pub fn events(mut self, events: EventDispatcher) -> Self {
        self.events = Some(events);
        self
    }

    /// Validate the configuration and start the sampling task.
    ///
    /// Must be called within a Tokio runtime.
    pub fn spawn(self) -> Result<(Sampler, SampleStream)> {
        self.config.validate()?;

        let config = self.config;
        let events = self.events.unwrap_or_default();
        let (tx, rx) = mpsc::channel(config.channel_capacity);
        let cancel = CancellationToken::new();

        let shared = Arc::new(Shared {
            paused: AtomicBool::new(false),
            released: AtomicBool::new(false),
            reset_requested: AtomicBool::new(false),
            rearm_requested: AtomicBool::new(false),
            target_port: Mutex::new(config.port.clone()),
            link: Mutex::new(None),
            last_sample: Mutex::new(None),
            liveness_window: config.liveness_window,
            holding: watch::Sender::new(false),
        });

        let manager = ConnectionManager::new(self.transport, self.ports, self.drivers)
            .with_settings(config.link.clone())
            .with_warmup(config.warmup)
            .with_events(events.clone());

        let worker = Worker {
            manager,
            backoff: Backoff::new(config.backoff.clone()),
            config,
            shared: Arc::clone(&shared),
            cancel: cancel.clone(),
            tx,
            callback: self.callback,
            events: events.clone(),
            consecutive_failures: 0,
        };
        let task = tokio::spawn(worker.run());

        let sampler = Sampler {
            shared,
            cancel,
            task: tokio::sync::Mutex::new(Some(task)),
            events,
        };
        Ok((sampler, SampleStream { receiver: rx }))
    }
}

/// Handle to a running sampling loop.
///
/// Dropping the handle cancels the loop and closes the port.
pub struct Sampler {
    shared: Arc<Shared>,
    cancel: CancellationToken,
    task: tokio::sync::Mutex<Option<JoinHandle<ConnectionManager>>>,
    events: EventDispatcher,
}

impl std::fmt::Debug for Sampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sampler")
            .field("shared", &self.shared)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl Sampler {
    /// Start building a sampler on the system transport and port discovery.
    ///
    /// No driver backend is registered by default; add one with
    /// [`SamplerBuilder::drivers`].
    pub fn builder(config: SamplerConfig) -> SamplerBuilder {
        SamplerBuilder {
            config,
            transport: Arc::new(SerialPortTransport::new()),
            ports: Arc::new(SystemPorts::new()),
            drivers: DriverSet::new(),
            callback: None,
            events: None,
        }
    }

    /// Stop reading. The session stays open.
    pub fn pause(&self) {
        if !self.shared.paused.swap(true, Ordering::SeqCst) {
            info!("Sampling paused");
            self.events.send(SamplerEvent::Paused);
        }
    }

    /// Resume reading and re-arm measurement on the next tick.
    pub fn resume(&self) {
        self.shared.released.store(false, Ordering::SeqCst);
        self.shared.rearm_requested.store(true, Ordering::SeqCst);
        if self.shared.paused.swap(false, Ordering::SeqCst) {
            info!("Sampling resumed");
            self.events.send(SamplerEvent::Resumed);
        }
    }

    /// Returns `true` while paused.
    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::SeqCst)
    }

    /// Change the target port (`None` for auto-scan).
    ///
    /// The current session is torn down on the next tick and the following
    /// connect uses only the new target.
    pub fn set_port(&self, port: Option<String>) {
        info!(
            "Target port set to {}",
            port.as_deref().unwrap_or("auto")
        );
        *lock(&self.shared.target_port) = port.clone();
        self.shared.clear_last_sample();
        self.shared.reset_requested.store(true, Ordering::SeqCst);
        self.events.send(SamplerEvent::PortChanged { port });
    }

    /// Current target port.
    pub fn target_port(&self) -> Option<String> {
        self.shared.target_port()
    }

    /// Pause, close the port, and wait for the loop to let go of it so
    /// another user can open it.
    ///
    /// A connect in progress is allowed to finish and is then torn down.
    /// Returns `false` if the loop still held the port after
    /// [`RELEASE_TIMEOUT`]. The loop will not reconnect until
    /// [`resume`](Self::resume).
    pub async fn release(&self) -> bool {
        self.pause();
        self.shared.released.store(true, Ordering::SeqCst);
        self.shared.clear_last_sample();
        self.shared.close_link();

        let mut holding = self.shared.holding.subscribe();
        let let_go = async {
            tokio::select! {
                _ = self.cancel.cancelled() => {}
                _ = holding.wait_for(|held| !*held) => {}
            }
        };
        match tokio::time::timeout(RELEASE_TIMEOUT, let_go).await {
            Ok(()) => {
                debug!("Port released");
                true
            }
            Err(_) => {
                warn!("Sampling loop still holds the port after {:?}", RELEASE_TIMEOUT);
                false
            }
        }
    }

    /// Derived liveness: an open link and a sample within the liveness window.
    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    /// Snapshot for status displays.
    pub fn status(&self) -> SamplerStatus {
        let (active_port, driver) = lock(&self.shared.link)
            .as_ref()
            .filter(|(link, _)| link.is_open())
            .map(|(link, variant)| (Some(link.port().to_string()), Some(*variant)))
            .unwrap_or((None, None));
        SamplerStatus {
            connected: self.is_connected(),
            paused: self.is_paused(),
            released: self.shared.released.load(Ordering::SeqCst),
            target_port: self.target_port(),
            active_port,
            driver,
            last_sample_age_secs: lock(&self.shared.last_sample)
                .map(|t| t.elapsed().as_secs_f64()),
        }
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    /// Returns `true` once the sampling task has exited.
    pub async fn is_finished(&self) -> bool {
        self.task
            .lock()
            .await
            .as_ref()
            .is_none_or(JoinHandle::is_finished)
    }

    /// Stop the loop and close the device.
    ///
    /// Waits up to [`STOP_TIMEOUT`] for the loop to exit, then aborts it.
    /// Safe to call more than once.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let task = self.task.lock().await.take();

        if let Some(mut task) = task {
            match tokio::time::timeout(STOP_TIMEOUT, &mut task).await {
                Ok(Ok(mut manager)) => {
                    manager.disconnect(DisconnectReason::Shutdown).await;
                }
                Ok(Err(e)) => warn!("Sampling task ended abnormally: {}", e),
                Err(_) => {
                    warn!("Sampling task did not stop within {:?}, aborting", STOP_TIMEOUT);
                    task.abort();
                }
            }
            info!("Sampler stopped");
        }
        self.shared.close_link();
        self.shared.publish_link(None);
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.shared.close_link();
    }
}

/// Stream of samples produced by a [`Sampler`].
///
/// The sampler never waits for this stream: when the buffer is full, new
/// samples are dropped with a warning.
#[derive(Debug)]
pub struct SampleStream {
    receiver: mpsc::Receiver<Sample>,
}

impl SampleStream {
    /// Receive the next sample; `None` once the sampler has stopped.
    pub async fn recv(&mut self) -> Option<Sample> {
        self.receiver.recv().await
    }

    /// Take a sample if one is buffered.
    pub fn try_recv(&mut self) -> Option<Sample> {
        self.receiver.try_recv().ok()
    }
}

impl Stream for SampleStream {
    type Item = Sample;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.receiver).poll_recv(cx)
    }
}

/// The sampling task's state. Owned exclusively by the task.
struct Worker {
    manager: ConnectionManager,
    config: SamplerConfig,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    tx: mpsc::Sender<Sample>,
    callback: Option<SampleCallback>,
    events: EventDispatcher,
    backoff: Backoff,
    consecutive_failures: u32,
}

impl Worker {
    async fn run(mut self) -> ConnectionManager {
        debug!("Sampling loop started");
        while !self.cancel.is_cancelled() {
            self.apply_controls().await;

            if self.shared.released.load(Ordering::SeqCst) {
                if self.sleep(PAUSE_POLL).await {
                    break;
                }
                continue;
            }

            if !self.manager.is_open() {
                self.shared.set_holding(true);
                if self.shared.released.load(Ordering::SeqCst) {
                    self.shared.set_holding(false);
                    continue;
                }
                let target = self.shared.target_port();
                let connected = tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    connected = self.manager.connect(target.as_deref()) => connected,
                };
                if connected {
                    self.on_connected();
                } else {
                    self.shared.set_holding(false);
                    let delay = self.backoff.next_delay();
                    let candidates = self.manager.candidates(target.as_deref()).await;
                    debug!("No sensor found on {:?}, retrying in {:?}", candidates, delay);
                    self.events.send(SamplerEvent::ConnectFailed {
                        candidates,
                        retry_in_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    });
                    if self.sleep(delay).await {
                        break;
                    }
                    continue;
                }
            }

            if self.shared.paused.load(Ordering::SeqCst) {
                if self.sleep(PAUSE_POLL).await {
                    break;
                }
                continue;
            }

            if self.manager.in_warmup() {
                if self.sleep(WARMUP_POLL).await {
                    break;
                }
                continue;
            }

            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => break,
                outcome = self.manager.read(&self.config.scaling, self.config.utc_offset) => outcome,
            };

            let cancelled = match outcome {
                ReadOutcome::Sample(sample) => {
                    self.on_sample(sample);
                    self.idle().await
                }
                ReadOutcome::NoData(e) => self.on_failure(&e.to_string()).await,
                ReadOutcome::TransientError(e) => self.on_failure(&e.to_string()).await,
            };
            if cancelled {
                break;
            }
        }
        debug!("Sampling loop exiting");
        self.shared.set_holding(false);
        self.manager
    }

    /// Apply flags set by the control surface since the last tick.
    async fn apply_controls(&mut self) {
        if self.shared.reset_requested.swap(false, Ordering::SeqCst) {
            self.teardown(DisconnectReason::PortChanged).await;
        }
        if self.shared.released.load(Ordering::SeqCst) && self.manager.session().is_some() {
            self.teardown(DisconnectReason::UserRequested).await;
        }
        if self.manager.is_stale() {
            self.teardown(DisconnectReason::UserRequested).await;
        }
        if self.shared.rearm_requested.swap(false, Ordering::SeqCst) {
            self.manager.ensure_started().await;
        }
    }

    async fn teardown(&mut self, reason: DisconnectReason) {
        self.manager.disconnect(reason).await;
        self.shared.publish_link(None);
        self.shared.set_holding(false);
        self.consecutive_failures = 0;
    }

    fn on_connected(&mut self) {
        self.backoff.reset();
        self.consecutive_failures = 0;
        let link = self
            .manager
            .session()
            .map(|s| (s.link().clone(), s.variant()));
        self.shared.publish_link(link);
    }

    fn on_sample(&mut self, sample: Sample) {
        self.consecutive_failures = 0;
        *lock(&self.shared.last_sample) = Some(Instant::now());

        if let Some(callback) = &self.callback {
            match std::panic::catch_unwind(AssertUnwindSafe(|| callback(&sample))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Sample callback failed: {}", e),
                Err(_) => warn!("Sample callback panicked"),
            }
        }

        match self.tx.try_send(sample) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Sample consumer is lagging, dropping sample")
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
        self.events.send(SamplerEvent::Sample { sample });
    }

    /// Count a failed read. Returns `true` if cancelled while sleeping.
    async fn on_failure(&mut self, reason: &str) -> bool {
        self.consecutive_failures += 1;
        debug!(
            "Read failed ({}/{}): {}",
            self.consecutive_failures, self.config.max_consecutive_failures, reason
        );

        let port = self
            .manager
            .session()
            .map(|s| s.port().to_string())
            .unwrap_or_default();
        self.events.send(SamplerEvent::ReadFailed {
            port: port.clone(),
            failures: self.consecutive_failures,
            reason: reason.to_string(),
        });

        if self.consecutive_failures >= self.config.max_consecutive_failures {
            warn!(
                "{} consecutive failed reads on {}, reconnecting",
                self.consecutive_failures, port
            );
            self.events.send(SamplerEvent::FailureThresholdReached {
                port,
                failures: self.consecutive_failures,
            });
            self.teardown(DisconnectReason::ReadFailures).await;
            self.sleep(RECONNECT_PAUSE).await
        } else {
            self.manager.ensure_started().await;
            self.sleep(RETRY_DELAY).await
        }
    }

    /// Wait out the rest of the sample period. Returns `true` if cancelled.
    ///
    /// Ends early when paused, released, or the port changes.
    async fn idle(&self) -> bool {
        let deadline = Instant::now() + self.config.effective_period();
        loop {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            if self.shared.paused.load(Ordering::SeqCst)
                || self.shared.released.load(Ordering::SeqCst)
                || self.shared.reset_requested.load(Ordering::SeqCst)
            {
                return false;
            }
            if self.sleep(IDLE_STEP.min(deadline - now)).await {
                return true;
            }
        }
    }

    /// Sleep unless cancelled. Returns `true` if cancelled.
    async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => true,
            _ = tokio::time::sleep(duration) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = SamplerConfig::default();
        assert_eq!(config.sample_period, Duration::from_secs(5));
        assert_eq!(config.warmup, Duration::from_secs(5));
        assert_eq!(config.max_consecutive_failures, 50);
        assert_eq!(config.liveness_window, Duration::from_secs(20));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_minimum_period_enforced() {
        let config = SamplerConfig::default().sample_period(Duration::from_millis(100));
        assert_eq!(config.effective_period(), MIN_SAMPLE_PERIOD);
        let config = SamplerConfig::default().sample_period(Duration::from_secs(2));
        assert_eq!(config.effective_period(), Duration::from_secs(2));
    }

    #[test]
    fn test_config_validation() {
        assert!(
            SamplerConfig::default()
                .max_consecutive_failures(0)
                .validate()
                .is_err()
        );
        assert!(SamplerConfig::default().port("  ").validate().is_err());
        assert!(
            SamplerConfig::default()
                .backoff(BackoffPolicy::default().multiplier(0.1))
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_invalid_scaling_is_rejected() {
        let scaling = ScalingPolicy {
            divisor: -1.0,
            ..ScalingPolicy::default()
        };
        let err = SamplerConfig::default().scaling(scaling).validate().unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }
}
