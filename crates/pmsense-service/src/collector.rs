//! Background consumers of the sampler's output.
//!
//! [`Collector`] drains the sample stream into the data store and the CSV
//! log. [`ConnectionLog`] turns lifecycle events into `connection.log`
//! lines for after-the-fact diagnosis.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::StreamExt;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use pmsense_core::{EventReceiver, SampleStream, SamplerEvent};
use pmsense_store::{DataStore, LogSink, ensure_dir};

/// File name of the connection diagnostics log.
pub const CONNECTION_LOG_FILE: &str = "connection.log";

/// Drains samples into the store and an optional persistent sink.
pub struct Collector {
    store: Arc<DataStore>,
    sink: Option<Arc<dyn LogSink>>,
}

impl Collector {
    /// Create a collector that only fills `store`.
    pub fn new(store: Arc<DataStore>) -> Self {
        Self { store, sink: None }
    }

    /// Also persist every sample to `sink`.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Consume `samples` until the sampler stops. Returns the sample count.
    pub async fn run(self, mut samples: SampleStream) -> u64 {
        let mut collected = 0u64;
        let mut consecutive_failures = 0u32;

        while let Some(sample) = samples.next().await {
            collected += 1;
            self.store.add(sample);

            let Some(sink) = &self.sink else {
                continue;
            };
            match sink.append(&sample) {
                Ok(()) => consecutive_failures = 0,
                Err(e) => {
                    consecutive_failures += 1;
                    if consecutive_failures <= 3 {
                        warn!("Failed to persist sample: {} (attempt {})", e, consecutive_failures);
                    } else if consecutive_failures == 4 {
                        error!(
                            "Failed to persist {} samples in a row, will continue trying silently",
                            consecutive_failures
                        );
                    }
                }
            }
        }

        debug!("Sample stream closed after {} samples", collected);
        collected
    }

    /// Run in a background task.
    pub fn spawn(self, samples: SampleStream) -> JoinHandle<u64> {
        tokio::spawn(self.run(samples))
    }
}

/// Appends timestamped lines to `connection.log`.
#[derive(Debug, Clone)]
pub struct ConnectionLog {
    path: PathBuf,
    offset: UtcOffset,
}

impl ConnectionLog {
    /// Log into `dir/connection.log`, creating `dir` if needed.
    pub fn new<P: AsRef<Path>>(dir: P, offset: UtcOffset) -> pmsense_store::Result<Self> {
        ensure_dir(dir.as_ref())?;
        Ok(Self {
            path: dir.as_ref().join(CONNECTION_LOG_FILE),
            offset,
        })
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one `[YYYY-MM-DD HH:MM:SS] message` line.
    pub fn write(&self, message: &str) -> std::io::Result<()> {
        let now = OffsetDateTime::now_utc().to_offset(self.offset);
        let stamp = now
            .format(format_description!(
                "[year]-[month]-[day] [hour]:[minute]:[second]"
            ))
            .map_err(std::io::Error::other)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "[{}] {}", stamp, message)
    }

    /// Write every loggable event until the sampler goes away.
    pub async fn follow(self, mut events: EventReceiver) {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Some(message) = describe_event(&event)
                        && let Err(e) = self.write(&message)
                    {
                        debug!("Failed to write {}: {}", self.path.display(), e);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    if let Err(e) = self.write(&format!("({} events not logged)", skipped)) {
                        debug!("Failed to write {}: {}", self.path.display(), e);
                    }
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    /// Run [`follow`](Self::follow) in a background task.
    pub fn spawn(self, events: EventReceiver) -> JoinHandle<()> {
        tokio::spawn(self.follow(events))
    }
}

/// One-line description of a lifecycle event, or `None` for per-read noise.
pub fn describe_event(event: &SamplerEvent) -> Option<String> {
    let message = match event {
        SamplerEvent::Connected { port, driver } => format!("Using {} driver on {}", driver, port),
        SamplerEvent::ConnectFailed {
            candidates,
            retry_in_ms,
        } => format!(
            "No sensor found on [{}], retrying in {:.1}s",
            candidates.join(", "),
            *retry_in_ms as f64 / 1000.0
        ),
        SamplerEvent::DriverUnavailable => {
            "No compatible sensor driver available".to_string()
        }
        SamplerEvent::MeasurementStarted { port, with_format } => {
            if *with_format {
                format!("Measurement started on {} (format 261)", port)
            } else {
                format!("Measurement started on {}", port)
            }
        }
        SamplerEvent::Disconnected { port, reason } => {
            format!("Disconnected from {} ({})", port, reason)
        }
        SamplerEvent::FailureThresholdReached { port, failures } => {
            format!("{} consecutive failed reads on {}, reconnecting", failures, port)
        }
        SamplerEvent::Paused => "Sampling paused".to_string(),
        SamplerEvent::Resumed => "Sampling resumed".to_string(),
        SamplerEvent::PortChanged { port } => {
            format!("Target port set to {}", port.as_deref().unwrap_or("auto"))
        }
        _ => return None,
    };
    Some(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pmsense_core::{DisconnectReason, DriverVariant, EventDispatcher};
    use pmsense_types::Sample;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingSink {
        samples: Mutex<Vec<Sample>>,
        fail: bool,
    }

    impl LogSink for RecordingSink {
        fn append(&self, sample: &Sample) -> pmsense_store::Result<()> {
            if self.fail {
                return Err(std::io::Error::other("disk full").into());
            }
            self.samples.lock().unwrap().push(*sample);
            Ok(())
        }
    }

    #[test]
    fn test_describe_event() {
        let connected = SamplerEvent::Connected {
            port: "COM3".to_string(),
            driver: DriverVariant::Modern,
        };
        assert_eq!(
            describe_event(&connected).as_deref(),
            Some("Using UART driver on COM3")
        );

        let failed = SamplerEvent::ConnectFailed {
            candidates: vec!["COM1".to_string(), "COM2".to_string()],
            retry_in_ms: 1500,
        };
        assert_eq!(
            describe_event(&failed).as_deref(),
            Some("No sensor found on [COM1, COM2], retrying in 1.5s")
        );

        let disconnected = SamplerEvent::Disconnected {
            port: "COM3".to_string(),
            reason: DisconnectReason::ReadFailures,
        };
        assert_eq!(
            describe_event(&disconnected).as_deref(),
            Some("Disconnected from COM3 (too many failed reads)")
        );

        let sample = SamplerEvent::Sample {
            sample: Sample::new(OffsetDateTime::now_utc(), [1.0; 4]),
        };
        assert!(describe_event(&sample).is_none());
    }

    #[test]
    fn test_connection_log_line_format() {
        let dir = tempfile::tempdir().unwrap();
        let log = ConnectionLog::new(dir.path(), UtcOffset::UTC).unwrap();
        log.write("Using UART driver on COM3").unwrap();
        log.write("Measurement started on COM3").unwrap();

        let content = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with('['));
        assert_eq!(&lines[0][20..22], "] ");
        assert!(lines[0].ends_with("Using UART driver on COM3"));
    }

    #[tokio::test]
    async fn test_follow_writes_until_closed() {
        let dir = tempfile::tempdir().unwrap();
        let log = ConnectionLog::new(dir.path(), UtcOffset::UTC).unwrap();
        let path = log.path().to_path_buf();

        let dispatcher = EventDispatcher::new(16);
        let task = log.spawn(dispatcher.subscribe());
        dispatcher.send(SamplerEvent::DriverUnavailable);
        dispatcher.send(SamplerEvent::Sample {
            sample: Sample::new(OffsetDateTime::now_utc(), [1.0; 4]),
        });
        dispatcher.send(SamplerEvent::Paused);
        drop(dispatcher);

        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        let content = std::fs::read_to_string(path).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.contains("No compatible sensor driver available"));
        assert!(content.contains("Sampling paused"));
    }

    #[tokio::test]
    async fn test_follow_notes_lagged_events() {
        let dir = tempfile::tempdir().unwrap();
        let log = ConnectionLog::new(dir.path(), UtcOffset::UTC).unwrap();
        let path = log.path().to_path_buf();

        let dispatcher = EventDispatcher::new(2);
        let events = dispatcher.subscribe();
        for _ in 0..5 {
            dispatcher.send(SamplerEvent::Paused);
        }
        drop(dispatcher);

        tokio::time::timeout(Duration::from_secs(5), log.follow(events))
            .await
            .unwrap();
        let content = std::fs::read_to_string(path).unwrap();
        assert!(content.lines().next().unwrap().ends_with("(3 events not logged)"));
        assert_eq!(content.lines().count(), 3);
    }

    #[tokio::test]
    async fn test_follow_survives_unwritable_log() {
        let dir = tempfile::tempdir().unwrap();
        let log = ConnectionLog::new(dir.path(), UtcOffset::UTC).unwrap();
        std::fs::create_dir(log.path()).unwrap();
        assert!(log.write("unwritable").is_err());

        let dispatcher = EventDispatcher::new(2);
        let events = dispatcher.subscribe();
        for _ in 0..5 {
            dispatcher.send(SamplerEvent::Paused);
        }
        drop(dispatcher);

        tokio::time::timeout(Duration::from_secs(5), log.clone().follow(events))
            .await
            .unwrap();
        assert!(log.path().is_dir());
    }

    #[tokio::test(start_paused = true)]
    async fn test_collector_fills_store_and_sink() {
        use pmsense_core::mock::{MockModernFactory, MockTransport};
        use pmsense_core::{DriverSet, Sampler, SamplerConfig, StaticPorts};

        let store = Arc::new(DataStore::new());
        let sink = Arc::new(RecordingSink::default());
        let (sampler, samples) = Sampler::builder(
            SamplerConfig::default().sample_period(Duration::from_secs(1)),
        )
        .transport(Arc::new(MockTransport::new()))
        .ports(Arc::new(StaticPorts::new(["COM3"])))
        .drivers(DriverSet::new().with_modern(Arc::new(MockModernFactory::new())))
        .spawn()
        .unwrap();

        let task = Collector::new(Arc::clone(&store))
            .with_sink(sink.clone())
            .spawn(samples);

        tokio::time::sleep(Duration::from_millis(7500)).await;
        sampler.stop().await;
        let collected = task.await.unwrap();

        assert!(collected >= 2);
        assert_eq!(store.len() as u64, collected);
        assert_eq!(sink.samples.lock().unwrap().len() as u64, collected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sink_failures_do_not_stop_collection() {
        use pmsense_core::mock::{MockModernFactory, MockTransport};
        use pmsense_core::{DriverSet, Sampler, SamplerConfig, StaticPorts};

        let store = Arc::new(DataStore::new());
        let sink = Arc::new(RecordingSink {
            fail: true,
            ..Default::default()
        });
        let (sampler, samples) = Sampler::builder(
            SamplerConfig::default().sample_period(Duration::from_millis(500)),
        )
        .transport(Arc::new(MockTransport::new()))
        .ports(Arc::new(StaticPorts::new(["COM3"])))
        .drivers(DriverSet::new().with_modern(Arc::new(MockModernFactory::new())))
        .spawn()
        .unwrap();

        let task = Collector::new(Arc::clone(&store)).with_sink(sink).spawn(samples);
        tokio::time::sleep(Duration::from_secs(9)).await;
        sampler.stop().await;
        let collected = task.await.unwrap();

        assert!(collected >= 5);
        assert_eq!(store.len() as u64, collected);
    }
}
