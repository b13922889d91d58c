//! One-shot connection test.
//!
//! A probe opens a port, attaches a driver, asks for the serial number (or,
//! failing that, one measurement), and closes the port again. It never keeps
//! a session open, so it can run while the sampler has released the port.

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

use pmsense_types::ScalingPolicy;

use crate::driver::{DriverSet, DriverVariant};
use crate::error::{Error, Result};
use crate::ports::PortLister;
use crate::transport::{LinkSettings, Transport};

/// Delay between the start command and the first query.
pub const PROBE_SETTLE: Duration = Duration::from_millis(500);

/// Result of a successful probe.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    /// Port that answered.
    pub port: String,
    /// Driver generation used.
    pub driver: DriverVariant,
    /// Serial number, when the driver reports one.
    pub serial_number: Option<String>,
    /// Channel values, when the serial-number query was unavailable.
    pub values: Option<[f64; 4]>,
}

/// Result of probing one port.
#[derive(Debug)]
pub struct PortAttempt {
    /// Port that was tried.
    pub port: String,
    /// What happened.
    pub result: Result<ProbeReport>,
}

/// Probes ports with a transport and driver set.
pub struct Prober<'a> {
    transport: &'a dyn Transport,
    drivers: &'a DriverSet,
    settings: LinkSettings,
    scaling: ScalingPolicy,
}

impl<'a> Prober<'a> {
    /// Create a prober with default link settings.
    pub fn new(transport: &'a dyn Transport, drivers: &'a DriverSet) -> Self {
        Self {
            transport,
            drivers,
            settings: LinkSettings::default().without_response_time(),
            scaling: ScalingPolicy::default(),
        }
    }

    /// Set the scaling policy for the measurement fallback.
    #[must_use]
    pub fn scaling(mut self, scaling: ScalingPolicy) -> Self {
        self.scaling = scaling;
        self
    }

    /// Probe a single port. The port is always closed afterwards.
    pub async fn probe_port(&self, port: &str) -> Result<ProbeReport> {
        debug!("Probing {} at {} baud", port, self.settings.baud_rate);
        let link = self.transport.open(port, &self.settings).await?;
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

        if let Err(e) = driver.start().await {
            debug!("Start during probe of {} failed: {}", port, e);
        }
        tokio::time::sleep(PROBE_SETTLE).await;

        let report = match driver.serial_number().await {
            Ok(serial) => Ok(ProbeReport {
                port: port.to_string(),
                driver: driver.variant(),
                serial_number: Some(serial),
                values: None,
            }),
            Err(e) => {
                debug!("Serial number query on {} failed: {}", port, e);
                driver
                    .read_values(&self.scaling)
                    .await
                    .map(|values| ProbeReport {
                        port: port.to_string(),
                        driver: driver.variant(),
                        serial_number: None,
                        values: Some(values),
                    })
            }
        };

        let _ = driver.stop().await;
        link.close();
        report
    }

    /// Probe `candidates` in order and stop at the first that answers.
    ///
    /// Returns every attempt made; the last one is the success, if any.
    pub async fn probe_until_found(&self, candidates: &[String]) -> Vec<PortAttempt> {
        let mut attempts = Vec::new();
        if self.drivers.is_empty() {
            return attempts;
        }
        for port in candidates {
            let result = self.probe_port(port).await;
            let found = result.is_ok();
            if let Ok(report) = &result {
                info!(
                    "OK on {} (SN: {})",
                    report.port,
                    report.serial_number.as_deref().unwrap_or("n/a")
                );
            }
            attempts.push(PortAttempt {
                port: port.clone(),
                result,
            });
            if found {
                break;
            }
        }
        attempts
    }
}

/// Candidate list for a probe: the preferred port, or discovered ports.
pub async fn probe_candidates(ports: &dyn PortLister, preferred: Option<&str>) -> Vec<String> {
    match preferred {
        Some(port) => vec![port.to_string()],
        None => ports.list_ports().await,
    }
}

/// Probe and return the first report, or the last error.
pub async fn probe(
    transport: &dyn Transport,
    drivers: &DriverSet,
    candidates: &[String],
) -> Result<ProbeReport> {
    if drivers.is_empty() {
        return Err(Error::DriverUnavailable);
    }
    let attempts = Prober::new(transport, drivers)
        .probe_until_found(candidates)
        .await;
    match attempts.into_iter().last() {
        Some(attempt) => attempt.result,
        None => Err(Error::invalid_config("no ports to probe")),
    }
}
