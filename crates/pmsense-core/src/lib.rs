//! Serial sampling engine for particulate-matter sensors.
//!
//! This crate continuously samples a particulate-matter sensor over a serial
//! link and tolerates disconnects and driver variance along the way.
//!
//! # Features
//!
//! - **Port discovery**: native enumeration, shell fallback, synthetic range
//! - **Two driver generations**: modern (register reads) and legacy
//!   (structured reads), selected once per connection
//! - **Reconnect state machine**: capped backoff, warm-up window,
//!   consecutive-failure threshold
//! - **Non-blocking publication**: samples flow through a bounded channel
//!   and an optional callback
//! - **Connection probe**: one-shot serial-number check per port
//!
//! # Architecture
//!
//! ```text
//! PortLister ─► ConnectionManager ─► SensorDriver ─► Sampler ─► SampleStream
//!                 (Transport)          (DriverSet)       │
//!                                                        └─► SamplerEvent
//! ```
//!
//! The wire protocol is not part of this crate. Driver backends implement
//! [`ModernDriverFactory`] or [`LegacyDriverFactory`] on top of a
//! [`SerialHandle`]; [`mock`] provides in-memory backends.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use pmsense_core::{DriverSet, Sampler, SamplerConfig};
//! use pmsense_core::mock::MockModernFactory;
//!
//! #[tokio::main]
//! async fn main() -> pmsense_core::Result<()> {
//!     let drivers = DriverSet::new().with_modern(Arc::new(MockModernFactory::new()));
//!     let (sampler, mut samples) = Sampler::builder(SamplerConfig::default())
//!         .drivers(drivers)
//!         .spawn()?;
//!
//!     if let Some(sample) = samples.recv().await {
//!         println!("{sample}");
//!     }
//!     sampler.stop().await;
//!     Ok(())
//! }
//! ```

pub mod backoff;
pub mod connection;
pub mod driver;
pub mod error;
pub mod events;
pub mod mock;
pub mod ports;
pub mod probe;
pub mod sampler;
pub mod transport;
pub mod util;

pub use backoff::{Backoff, BackoffPolicy};
pub use connection::{ConnectionManager, Session};
pub use driver::{
    DriverSet, DriverVariant, LegacyDriverFactory, LegacySensor, ModernDriverFactory,
    ModernSensor, OutputFormat, ReadOutcome, SensorDriver,
};
pub use error::{Error, Result};
pub use events::{DisconnectReason, EventDispatcher, EventReceiver, EventSender, SamplerEvent};
pub use ports::{PortLister, StaticPorts, SystemPorts, sort_ports};
pub use probe::{ProbeReport, Prober, probe, probe_candidates};
pub use sampler::{
    SampleCallback, SampleStream, Sampler, SamplerBuilder, SamplerConfig, SamplerStatus,
};
pub use transport::{LinkSettings, SerialHandle, SerialLink, SerialPortTransport, Transport};
pub use util::local_offset;

// Re-export from pmsense-types
pub use pmsense_types::{Channel, RawValue, Sample, ScalingPolicy};
