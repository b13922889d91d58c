//! Serial transport: opening ports and sharing the open link with drivers.
//!
//! A [`Transport`] opens a named port and returns a [`SerialHandle`]. The
//! handle is cheap to clone so a driver can keep one while the connection
//! manager keeps another; [`SerialHandle::close`] closes the OS handle for
//! every clone at once.

use std::fmt;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serialport::{ClearBuffer, SerialPort};
use tracing::debug;

use crate::error::{Error, Result};

/// Baud rate used by the sensor family.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Settings used when opening a serial link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSettings {
    /// Line speed.
    pub baud_rate: u32,
    /// Base read timeout.
    pub timeout: Duration,
    /// Extra time allowed for a device response, if the transport supports it.
    pub additional_response_time: Option<Duration>,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            timeout: Duration::from_millis(500),
            additional_response_time: Some(Duration::from_millis(200)),
        }
    }
}

impl LinkSettings {
    /// The same settings without the response-time allowance.
    #[must_use]
    pub fn without_response_time(&self) -> Self {
        Self {
            additional_response_time: None,
            ..self.clone()
        }
    }

    /// Read timeout including the response-time allowance.
    pub fn effective_timeout(&self) -> Duration {
        self.timeout + self.additional_response_time.unwrap_or_default()
    }

    /// Validate the settings and return an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.baud_rate == 0 {
            return Err(Error::invalid_config("baud_rate must be > 0"));
        }
        if self.timeout.is_zero() {
            return Err(Error::invalid_config("link timeout must be > 0"));
        }
        Ok(())
    }
}

/// A byte-level serial connection.
pub trait SerialLink: Read + Write + Send {
    /// Discard any bytes waiting in the input buffer.
    fn clear_input(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Shared, closable handle to an open serial link.
#[derive(Clone)]
pub struct SerialHandle {
    port: Arc<str>,
    link: Arc<Mutex<Option<Box<dyn SerialLink>>>>,
}

impl fmt::Debug for SerialHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialHandle")
            .field("port", &self.port)
            .field("open", &self.is_open())
            .finish()
    }
}

impl SerialHandle {
    /// Wrap an open link.
    pub fn new(port: impl Into<String>, link: Box<dyn SerialLink>) -> Self {
        let port: String = port.into();
        Self {
            port: Arc::from(port),
            link: Arc::new(Mutex::new(Some(link))),
        }
    }

    /// Name of the port this handle was opened on.
    pub fn port(&self) -> &str {
        &self.port
    }

    /// Returns `true` until [`close`](Self::close) is called on any clone.
    pub fn is_open(&self) -> bool {
        self.lock().is_some()
    }

    /// Close the link. Returns `false` if it was already closed.
    pub fn close(&self) -> bool {
        let link = self.lock().take();
        if link.is_some() {
            debug!("Closed serial link on {}", self.port);
        }
        link.is_some()
    }

    /// Run a blocking operation against the open link.
    pub fn with_link<R>(&self, f: impl FnOnce(&mut dyn SerialLink) -> io::Result<R>) -> Result<R> {
        let mut guard = self.lock();
        let link = guard.as_mut().ok_or(Error::NotConnected)?;
        Ok(f(link.as_mut())?)
    }

    /// Discard bytes the device sent before this session began.
    pub fn clear_input(&self) -> Result<()> {
        self.with_link(|link| link.clear_input())
    }

    /// Run a blocking operation against the open link on the blocking pool.
    pub async fn run_blocking<R, F>(&self, operation: &str, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut dyn SerialLink) -> io::Result<R> + Send + 'static,
    {
        let handle = self.clone();
        tokio::task::spawn_blocking(move || handle.with_link(f))
            .await
            .map_err(|e| Error::driver(operation, e.to_string()))?
    }

    fn lock(&self) -> MutexGuard<'_, Option<Box<dyn SerialLink>>> {
        self.link.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Something that can open serial ports.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open `port` with the given settings.
    ///
    /// Returns [`Error::UnsupportedSetting`] if a setting cannot be honoured,
    /// in which case the caller may retry with different settings.
    async fn open(&self, port: &str, settings: &LinkSettings) -> Result<SerialHandle>;
}

/// [`Transport`] backed by the operating system's serial ports.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialPortTransport;

impl SerialPortTransport {
    /// Create a new system transport.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for SerialPortTransport {
    async fn open(&self, port: &str, settings: &LinkSettings) -> Result<SerialHandle> {
        let name = port.to_string();
        let baud_rate = settings.baud_rate;
        let timeout = settings.effective_timeout();

        let opened = tokio::task::spawn_blocking(move || {
            serialport::new(&name, baud_rate).timeout(timeout).open()
        })
        .await
        .map_err(|e| Error::driver("open", e.to_string()))?;

        let serial = opened.map_err(|e| Error::port_open(port, e.to_string()))?;
        debug!("Opened {} at {} baud (timeout {:?})", port, baud_rate, timeout);
        Ok(SerialHandle::new(port, Box::new(NativeLink { port: serial })))
    }
}

/// A link over a `serialport` handle.
struct NativeLink {
    port: Box<dyn SerialPort>,
}

impl Read for NativeLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }
}

impl Write for NativeLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

impl SerialLink for NativeLink {
    fn clear_input(&mut self) -> io::Result<()> {
        self.port.clear(ClearBuffer::Input).map_err(io::Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Loopback(Vec<u8>);

    impl Read for Loopback {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = buf.len().min(self.0.len());
            buf[..n].copy_from_slice(&self.0[..n]);
            self.0.drain(..n);
            Ok(n)
        }
    }

    impl Write for Loopback {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SerialLink for Loopback {}

    #[test]
    fn test_link_settings_defaults() {
        let settings = LinkSettings::default();
        assert_eq!(settings.baud_rate, 115_200);
        assert_eq!(settings.effective_timeout(), Duration::from_millis(700));
        let plain = settings.without_response_time();
        assert_eq!(plain.additional_response_time, None);
        assert_eq!(plain.effective_timeout(), Duration::from_millis(500));
    }

    #[test]
    fn test_link_settings_validate() {
        assert!(LinkSettings::default().validate().is_ok());
        let bad = LinkSettings {
            baud_rate: 0,
            ..LinkSettings::default()
        };
        assert!(matches!(bad.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_close_applies_to_all_clones() {
        let handle = SerialHandle::new("COM3", Box::new(Loopback(Vec::new())));
        let driver_copy = handle.clone();

        driver_copy
            .with_link(|link| link.write_all(b"ping"))
            .unwrap();
        assert!(handle.close());
        assert!(!handle.close());
        assert!(!driver_copy.is_open());
        assert!(matches!(
            driver_copy.with_link(|link| link.flush()),
            Err(Error::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_run_blocking_round_trip() {
        let handle = SerialHandle::new("COM4", Box::new(Loopback(Vec::new())));
        let echoed = handle
            .run_blocking("echo", |link| {
                link.write_all(b"abc")?;
                let mut buf = [0u8; 3];
                link.read_exact(&mut buf)?;
                Ok(buf)
            })
            .await
            .unwrap();
        assert_eq!(&echoed, b"abc");
    }
}
