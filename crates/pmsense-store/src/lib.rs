//! Sample history and persistence for particulate-matter readings.
//!
//! This crate holds what the sampling engine produces: a seven-day rolling
//! buffer that dashboards and APIs query by trailing window, and a daily CSV
//! log for durable records.
//!
//! # Features
//!
//! - Thread-safe, time-ordered buffer with lazy retention trimming
//! - Window presets (1h, 3h, 12h, 24h, all) with now/avg/max per channel
//! - One CSV file per day, header written only on creation
//!
//! # Example
//!
//! ```
//! use pmsense_store::{DataStore, TimeWindow};
//! use pmsense_types::Sample;
//! use time::OffsetDateTime;
//!
//! let store = DataStore::new();
//! store.add(Sample::new(OffsetDateTime::now_utc(), [8.0, 12.0, 14.0, 15.0]));
//!
//! let stats = store.stats(TimeWindow::LastHour);
//! assert_eq!(stats.count, 1);
//! assert_eq!(stats.pm2_5.now, 12.0);
//! ```

mod buffer;
mod csv_log;
mod error;
mod stats;

pub use buffer::{DEFAULT_RETENTION, DataStore};
pub use csv_log::{
    CsvLog, DEFAULT_FILE_PREFIX, LogSink, ensure_dir, format_timestamp, format_value,
};
pub use error::{Error, Result};
pub use stats::{ChannelStats, TimeWindow, WindowStats, nan_max, nan_mean};

/// Default log directory following platform conventions.
///
/// - Linux: `~/.local/share/pmsense/logs`
/// - macOS: `~/Library/Application Support/pmsense/logs`
/// - Windows: `C:\Users\<user>\AppData\Local\pmsense\logs`
pub fn default_log_dir() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("pmsense")
        .join("logs")
}
