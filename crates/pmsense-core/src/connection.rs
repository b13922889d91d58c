//! Port selection, session setup and teardown.
//!
//! [`ConnectionManager`] is owned by the sampling loop. It turns a target
//! port (or auto-scan) into an open [`Session`]: a serial link, an attached
//! driver, and the measurement/warm-up state for that link. Every failure is
//! absorbed here and reported as `false` or a log line, never as an error.

use std::sync::Arc;
use std::time::Duration;

use time::UtcOffset;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use pmsense_types::ScalingPolicy;

use crate::driver::{DriverSet, DriverVariant, OutputFormat, ReadOutcome, SensorDriver};
use crate::error::{Error, Result};
use crate::events::{DisconnectReason, EventDispatcher, SamplerEvent};
use crate::ports::{PortLister, fallback_range};
use crate::transport::{LinkSettings, SerialHandle, Transport};

/// Default time after connecting during which reads are suppressed.
pub const DEFAULT_WARMUP: Duration = Duration::from_secs(5);

/// An open driver session on one port.
#[derive(Debug)]
pub struct Session {
    port: String,
    link: SerialHandle,
    driver: SensorDriver,
    measurement_started: bool,
    warmup_deadline: Instant,
    reads: u64,
}

impl Session {
    /// Port the session is open on.
    pub fn port(&self) -> &str {
        &self.port
    }

    /// The serial link.
    pub fn link(&self) -> &SerialHandle {
        &self.link
    }

    /// Active driver generation.
    pub fn variant(&self) -> DriverVariant {
        self.driver.variant()
    }

    /// Whether a start command has succeeded on this link.
    pub fn measurement_started(&self) -> bool {
        self.measurement_started
    }

    /// End of the warm-up window.
    pub fn warmup_deadline(&self) -> Instant {
        self.warmup_deadline
    }
}

/// Opens, starts and tears down sensor sessions.
pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    ports: Arc<dyn PortLister>,
    drivers: DriverSet,
    settings: LinkSettings,
    warmup: Duration,
    events: EventDispatcher,
    session: Option<Session>,
    driver_missing_reported: bool,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("drivers", &self.drivers)
            .field("settings", &self.settings)
            .field("session", &self.session)
            .finish()
    }
}

impl ConnectionManager {
    /// Create a manager with default link settings and warm-up.
    pub fn new(
        transport: Arc<dyn Transport>,
        ports: Arc<dyn PortLister>,
        drivers: DriverSet,
    ) -> Self {
        Self {
            transport,
            ports,
            drivers,
            settings: LinkSettings::default(),
            warmup: DEFAULT_WARMUP,
            events: EventDispatcher::default(),
            session: None,
            driver_missing_reported: false,
        }
    }

    /// Set the link settings.
    #[must_use]
    pub fn with_settings(mut self, settings: LinkSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Set the warm-up window.
    #[must_use]
    pub fn with_warmup(mut self, warmup: Duration) -> Self {
        self.warmup = warmup;
        self
    }

    /// Send lifecycle events through `events`.
    #[must_use]
    pub fn with_events(mut self, events: EventDispatcher) -> Self {
        self.events = events;
        self
    }

    /// The current session, if any.
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Returns `true` while a session with an open link exists.
    pub fn is_open(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.link.is_open())
    }

    /// Returns `true` if a session exists but its link was closed elsewhere.
    pub fn is_stale(&self) -> bool {
        self.session.as_ref().is_some_and(|s| !s.link.is_open())
    }

    /// Returns `true` while reads should still be suppressed.
    pub fn in_warmup(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| Instant::now() < s.warmup_deadline)
    }

    /// Ports to try for `preferred`: just that port, or discovered ports,
    /// or the fallback range when discovery finds nothing.
    pub async fn candidates(&self, preferred: Option<&str>) -> Vec<String> {
        if let Some(port) = preferred {
            return vec![port.to_string()];
        }
        let discovered = self.ports.list_ports().await;
        if discovered.is_empty() {
            fallback_range()
        } else {
            discovered
        }
    }

    /// Try to open a session, scanning candidates in order.
    ///
    /// Returns `true` on the first candidate that opens and accepts a
    /// driver. Any existing session is torn down first.
    pub async fn connect(&mut self, preferred: Option<&str>) -> bool {
        if self.session.is_some() {
            self.disconnect(DisconnectReason::PortChanged).await;
        }

        if self.drivers.is_empty() {
            if !self.driver_missing_reported {
                error!("No compatible sensor driver available; sampling cannot start");
                self.events.send(SamplerEvent::DriverUnavailable);
                self.driver_missing_reported = true;
            }
            return false;
        }

        for port in self.candidates(preferred).await {
            match self.open_session(&port).await {
                Ok(session) => {
                    info!("Using {} driver on {}", session.variant(), port);
                    self.events.send(SamplerEvent::Connected {
                        port: port.clone(),
                        driver: session.variant(),
                    });
                    self.session = Some(session);
                    self.ensure_started().await;
                    return true;
                }
                Err(e) => debug!("Candidate {} failed: {}", port, e),
            }
        }
        false
    }

    async fn open_session(&self, port: &str) -> Result<Session> {
        let link = self.open_link(port).await?;
        if let Err(e) = link.clear_input() {
            debug!("Could not clear stale input on {}: {}", port, e);
        }
        let driver = match self.drivers.attach(link.clone()) {
            Ok(driver) => driver,
            Err(e) => {
                link.close();
                return Err(e);
            }
        };
        Ok(Session {
            port: port.to_string(),
            link,
            driver,
            measurement_started: false,
            warmup_deadline: Instant::now() + self.warmup,
            reads: 0,
        })
    }

    async fn open_link(&self, port: &str) -> Result<SerialHandle> {
        match self.transport.open(port, &self.settings).await {
            Err(Error::UnsupportedSetting(setting))
                if self.settings.additional_response_time.is_some() =>
            {
                debug!("{} rejected {}, reopening without response padding", port, setting);
                self.transport
                    .open(port, &self.settings.without_response_time())
                    .await
            }
            other => other,
        }
    }

    /// Put the device into measurement mode if it is not already.
    ///
    /// Tries a start with an explicit output format, then a parameterless
    /// start. Failures are logged and swallowed. Returns whether measurement
    /// is running.
    pub async fn ensure_started(&mut self) -> bool {
        let Some(session) = self.session.as_mut() else {
            return false;
        };
        if session.measurement_started {
            return true;
        }

        let with_format = match session.driver.start_with_format(OutputFormat::UINT16).await {
            Ok(()) => true,
            Err(first) => {
                debug!("Formatted start failed on {}: {}", session.port, first);
                if let Err(e) = session.driver.start().await {
                    debug!("Start failed on {}: {}", session.port, e);
                    return false;
                }
                false
            }
        };

        session.measurement_started = true;
        info!(
            "Measurement started on {} ({}{})",
            session.port,
            session.variant(),
            if with_format { ", uint16" } else { "" }
        );
        self.events.send(SamplerEvent::MeasurementStarted {
            port: session.port.clone(),
            with_format,
        });
        true
    }

    /// Perform one read on the current session.
    pub async fn read(&mut self, scaling: &ScalingPolicy, offset: UtcOffset) -> ReadOutcome {
        let Some(session) = self.session.as_mut() else {
            return ReadOutcome::TransientError(Error::NotConnected);
        };

        let outcome = session.driver.read(scaling, offset).await;
        session.reads += 1;
        if session.reads % 10 == 1 {
            match &outcome {
                ReadOutcome::Sample(sample) => debug!(
                    "{} read #{}: pm1={} pm2.5={} pm4={} pm10={}",
                    session.port,
                    session.reads,
                    sample.pm1_0,
                    sample.pm2_5,
                    sample.pm4_0,
                    sample.pm10_0
                ),
                ReadOutcome::NoData(e) => debug!("{} read #{}: {}", session.port, session.reads, e),
                ReadOutcome::TransientError(e) => {
                    debug!("{} read #{} failed: {}", session.port, session.reads, e)
                }
            }
        }
        outcome
    }

    /// Tear down the current session.
    ///
    /// Stops measurement and closes the link, ignoring errors from either.
    /// Returns `false` if there was no session.
    pub async fn disconnect(&mut self, reason: DisconnectReason) -> bool {
        let Some(session) = self.session.take() else {
            return false;
        };

        if session.link.is_open()
            && let Err(e) = session.driver.stop().await
        {
            debug!("Stop failed on {}: {}", session.port, e);
        }
        session.link.close();

        match reason {
            DisconnectReason::Shutdown | DisconnectReason::PortChanged => {
                info!("Disconnected from {} ({})", session.port, reason)
            }
            _ => warn!("Disconnected from {} ({})", session.port, reason),
        }
        self.events.send(SamplerEvent::Disconnected {
            port: session.port,
            reason,
        });
        true
    }
}
