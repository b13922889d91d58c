//! Application state shared across handlers.
//!
//! The sampler owns the device; handlers only flip its control flags and
//! read snapshots. The data store is the one structure written by the
//! collector and read by handlers concurrently, and it locks internally.

use std::sync::Arc;

use time::OffsetDateTime;

use pmsense_core::{DriverSet, PortLister, Sampler, Transport};
use pmsense_store::DataStore;

use crate::config::Config;

/// Device backends used by the sampler and the connection probe.
#[derive(Clone)]
pub struct Backend {
    /// Opens serial links.
    pub transport: Arc<dyn Transport>,
    /// Lists candidate ports.
    pub ports: Arc<dyn PortLister>,
    /// Available driver generations.
    pub drivers: DriverSet,
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("drivers", &self.drivers)
            .finish_non_exhaustive()
    }
}

/// Shared application state.
pub struct AppState {
    /// The running sampler.
    pub sampler: Sampler,
    /// Rolling sample history.
    pub store: Arc<DataStore>,
    /// Backends, for port listing and connection probes.
    pub backend: Backend,
    /// Configuration the service was started with.
    pub config: Config,
    /// When the service started.
    pub started_at: OffsetDateTime,
    /// Held for the whole of a connection check so checks never overlap.
    pub check_lock: tokio::sync::Mutex<()>,
}

impl AppState {
    /// Create new application state.
    pub fn new(sampler: Sampler, store: Arc<DataStore>, backend: Backend, config: Config) -> Arc<Self> {
        Arc::new(Self {
            sampler,
            store,
            backend,
            config,
            started_at: OffsetDateTime::now_utc(),
            check_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Seconds since the service started.
    pub fn uptime_seconds(&self) -> u64 {
        let elapsed = OffsetDateTime::now_utc() - self.started_at;
        u64::try_from(elapsed.whole_seconds()).unwrap_or(0)
    }
}
