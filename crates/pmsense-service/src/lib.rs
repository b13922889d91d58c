//! Background sampler, CSV logger, and HTTP REST API for particulate-matter
//! sensors.
//!
//! This crate provides a service that:
//! - Keeps a serial sensor connected and sampled on a fixed period
//! - Holds a rolling in-memory history and computes window statistics
//! - Appends every sample to a daily CSV file
//! - Records connection lifecycle events in `connection.log`
//! - Exposes a REST API for status, data, and sampler control
//!
//! # REST API Endpoints
//!
//! - `GET /api/health` - Service health check
//! - `GET /api/status` - Sampler state and the latest sample
//! - `GET /api/samples?window=1h` - Samples in a window (`1h`, `3h`, `12h`, `24h`, `all`)
//! - `GET /api/stats?window=1h` - Now/avg/max per channel for a window
//! - `GET /api/ports` - Discovered ports plus `auto`
//! - `PUT /api/port` - Change the target port (`{"port": "COM5"}` or `{"port": "auto"}`)
//! - `POST /api/pause` / `POST /api/resume` - Stop or restart reads
//! - `POST /api/check` - Release the port and probe for a sensor
//!
//! # Configuration
//!
//! The service reads configuration from `~/.config/pmsense/config.toml`:
//!
//! ```toml
//! [sensor]
//! port = "auto"
//! sample_period_secs = 5.0
//! scaling_threshold = 1000.0
//! scaling_divisor = 100000.0
//! scaling_enabled = true
//!
//! [logging]
//! directory = "/var/lib/pmsense/logs"
//! file_prefix = "sps30"
//!
//! [server]
//! enabled = true
//! bind = "127.0.0.1:8080"
//! ```

pub mod api;
pub mod collector;
pub mod config;
pub mod state;

pub use collector::{Collector, ConnectionLog};
pub use config::{
    Config, ConfigError, LoggingConfig, SensorConfig, ServerConfig, ValidationError,
};
pub use state::{AppState, Backend};
