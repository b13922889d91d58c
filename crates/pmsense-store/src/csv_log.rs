//! Daily CSV sample log.
//!
//! One file per calendar day, named `<prefix>_YYYY-MM-DD.csv`. The header
//! row is written only when the file is created, so appending to an existing
//! day (after a restart) continues the same table.
//!
//! ```text
//! timestamp,pm1,pm2_5,pm4,pm10
//! 2025-03-01T12:00:05,8.000,12.000,14.000,nan
//! ```

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use time::macros::format_description;
use time::{Date, OffsetDateTime};
use tracing::{debug, info};

use pmsense_types::{Channel, Sample};

use crate::error::{Error, Result};

/// Default file name prefix.
pub const DEFAULT_FILE_PREFIX: &str = "sps30";

/// Destination for persisted samples.
pub trait LogSink: Send + Sync {
    /// Persist one sample.
    fn append(&self, sample: &Sample) -> Result<()>;
}

/// Appends samples to one CSV file per day.
#[derive(Debug, Clone)]
pub struct CsvLog {
    dir: PathBuf,
    prefix: String,
}

impl CsvLog {
    /// Create a log in `dir`, creating the directory if needed.
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        Self::with_prefix(dir, DEFAULT_FILE_PREFIX)
    }

    /// Create a log with a custom file name prefix.
    pub fn with_prefix<P: AsRef<Path>>(dir: P, prefix: impl Into<String>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        ensure_dir(&dir)?;
        info!("Logging samples to {}", dir.display());
        Ok(Self {
            dir,
            prefix: prefix.into(),
        })
    }

    /// Directory holding the log files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File that holds samples for `date`.
    pub fn path_for(&self, date: Date) -> Result<PathBuf> {
        let day = date.format(format_description!("[year]-[month]-[day]"))?;
        Ok(self.dir.join(format!("{}_{}.csv", self.prefix, day)))
    }
}

impl LogSink for CsvLog {
    fn append(&self, sample: &Sample) -> Result<()> {
        let path = self.path_for(sample.timestamp.date())?;
        let is_new = !path.exists();

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        if is_new {
            debug!("Starting new log file {}", path.display());
            let mut header = vec!["timestamp"];
            header.extend(Channel::ALL.map(Channel::column));
            writer.write_record(&header)?;
        }

        let mut record = vec![format_timestamp(sample.timestamp)?];
        record.extend(sample.values().map(format_value));
        writer.write_record(&record)?;
        writer.flush()?;
        Ok(())
    }
}

/// Local timestamp truncated to whole seconds, without an offset.
pub fn format_timestamp(timestamp: OffsetDateTime) -> Result<String> {
    Ok(timestamp.format(format_description!(
        "[year]-[month]-[day]T[hour]:[minute]:[second]"
    ))?)
}

/// A concentration with three decimals; `NaN` as `nan`.
pub fn format_value(value: f64) -> String {
    if value.is_nan() {
        "nan".to_string()
    } else {
        format!("{value:.3}")
    }
}

/// Create `dir` and its parents if missing.
pub fn ensure_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        std::fs::create_dir_all(dir).map_err(|e| Error::CreateDirectory {
            path: dir.to_path_buf(),
            source: e,
        })?;
    }
    Ok(())
}
