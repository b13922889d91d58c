//! Serial port discovery.
//!
//! Discovery tries, in order: native enumeration through `serialport`, an OS
//! shell query bounded by a timeout, and finally a fixed range of likely port
//! names. The result is deduplicated and sorted by numeric suffix.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

/// Default bound on the shell-query fallback.
pub const DEFAULT_SHELL_TIMEOUT: Duration = Duration::from_secs(3);

/// Something that can list candidate serial ports.
#[async_trait]
pub trait PortLister: Send + Sync {
    /// Candidate ports, best first.
    async fn list_ports(&self) -> Vec<String>;
}

/// Discovers ports on the local machine.
#[derive(Debug, Clone)]
pub struct SystemPorts {
    shell_timeout: Duration,
}

impl Default for SystemPorts {
    fn default() -> Self {
        Self {
            shell_timeout: DEFAULT_SHELL_TIMEOUT,
        }
    }
}

impl SystemPorts {
    /// Create a lister with the default shell timeout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the timeout for the shell-query fallback.
    #[must_use]
    pub fn shell_timeout(mut self, timeout: Duration) -> Self {
        self.shell_timeout = timeout;
        self
    }

    async fn native(&self) -> Vec<String> {
        match tokio::task::spawn_blocking(serialport::available_ports).await {
            Ok(Ok(ports)) => ports.into_iter().map(|p| p.port_name).collect(),
            Ok(Err(e)) => {
                debug!("Native port enumeration failed: {}", e);
                Vec::new()
            }
            Err(e) => {
                warn!("Port enumeration task failed: {}", e);
                Vec::new()
            }
        }
    }

    async fn shell(&self) -> Vec<String> {
        let mut command = shell_command();
        command.kill_on_drop(true);

        match tokio::time::timeout(self.shell_timeout, command.output()).await {
            Ok(Ok(output)) if output.status.success() => {
                parse_port_list(&String::from_utf8_lossy(&output.stdout))
            }
            Ok(Ok(output)) => {
                debug!("Port query exited with {}", output.status);
                Vec::new()
            }
            Ok(Err(e)) => {
                debug!("Port query could not run: {}", e);
                Vec::new()
            }
            Err(_) => {
                warn!("Port query timed out after {:?}", self.shell_timeout);
                Vec::new()
            }
        }
    }
}

#[cfg(windows)]
fn shell_command() -> Command {
    let mut command = Command::new("powershell");
    command.args([
        "-NoProfile",
        "-Command",
        "[System.IO.Ports.SerialPort]::GetPortNames() -join '|'",
    ]);
    command
}

#[cfg(not(windows))]
fn shell_command() -> Command {
    let mut command = Command::new("sh");
    command.args(["-c", "ls -1 /dev/ttyUSB* /dev/ttyACM* 2>/dev/null"]);
    command
}

#[async_trait]
impl PortLister for SystemPorts {
    async fn list_ports(&self) -> Vec<String> {
        let mut ports = self.native().await;
        if ports.is_empty() {
            ports = self.shell().await;
        }
        if ports.is_empty() {
            debug!("No ports discovered, using fallback range");
            ports = fallback_range();
        }
        sort_ports(ports)
    }
}

/// A fixed list of ports.
#[derive(Debug, Clone, Default)]
pub struct StaticPorts(pub Vec<String>);

impl StaticPorts {
    /// Create a lister that always returns `ports`.
    pub fn new<I, S>(ports: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(ports.into_iter().map(Into::into).collect())
    }
}

#[async_trait]
impl PortLister for StaticPorts {
    async fn list_ports(&self) -> Vec<String> {
        self.0.clone()
    }
}

/// Synthetic port names tried when nothing else is known.
pub fn fallback_range() -> Vec<String> {
    if cfg!(windows) {
        (1..=40).map(|i| format!("COM{i}")).collect()
    } else {
        (0..10)
            .map(|i| format!("/dev/ttyUSB{i}"))
            .chain((0..10).map(|i| format!("/dev/ttyACM{i}")))
            .collect()
    }
}

/// Split shell output on `|` and whitespace.
pub fn parse_port_list(output: &str) -> Vec<String> {
    output
        .split(|c: char| c == '|' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Deduplicate and order ports by their trailing number.
///
/// `COM` names are case-insensitive and are upper-cased; other names are
/// kept verbatim. Names without a trailing number sort last.
pub fn sort_ports<I: IntoIterator<Item = String>>(ports: I) -> Vec<String> {
    let unique: BTreeSet<String> = ports
        .into_iter()
        .map(|p| {
            let p = p.trim().to_string();
            if p.get(..3).is_some_and(|s| s.eq_ignore_ascii_case("com")) {
                p.to_uppercase()
            } else {
                p
            }
        })
        .filter(|p| !p.is_empty())
        .collect();

    let mut sorted: Vec<String> = unique.into_iter().collect();
    sorted.sort_by_key(|name| (numeric_suffix(name).unwrap_or(u32::MAX), name.clone()));
    sorted
}

fn numeric_suffix(name: &str) -> Option<u32> {
    let digits = name.len() - name.trim_end_matches(|c: char| c.is_ascii_digit()).len();
    if digits == 0 {
        return None;
    }
    name[name.len() - digits..].parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_sort_by_numeric_suffix() {
        let sorted = sort_ports(strings(&["COM10", "COM3", "com4", "COM1"]));
        assert_eq!(sorted, strings(&["COM1", "COM3", "COM4", "COM10"]));
    }

    #[test]
    fn test_dedupes_case_insensitive_com_names() {
        let sorted = sort_ports(strings(&["com3", "COM3", " COM3 "]));
        assert_eq!(sorted, strings(&["COM3"]));
    }

    #[test]
    fn test_names_without_number_sort_last() {
        let sorted = sort_ports(strings(&["/dev/serial", "/dev/ttyUSB1", "/dev/ttyUSB0"]));
        assert_eq!(
            sorted,
            strings(&["/dev/ttyUSB0", "/dev/ttyUSB1", "/dev/serial"])
        );
    }

    #[test]
    fn test_unix_paths_keep_case() {
        let sorted = sort_ports(strings(&["/dev/ttyACM0"]));
        assert_eq!(sorted, strings(&["/dev/ttyACM0"]));
    }

    #[test]
    fn test_parse_port_list() {
        assert_eq!(parse_port_list("COM3|COM4|"), strings(&["COM3", "COM4"]));
        assert_eq!(
            parse_port_list("/dev/ttyUSB0\n/dev/ttyACM0\n"),
            strings(&["/dev/ttyUSB0", "/dev/ttyACM0"])
        );
        assert!(parse_port_list("  \n").is_empty());
    }

    #[test]
    fn test_fallback_range_is_not_empty() {
        let range = fallback_range();
        assert!(!range.is_empty());
        assert_eq!(sort_ports(range.clone()).len(), range.len());
    }

    #[tokio::test]
    async fn test_static_ports() {
        let lister = StaticPorts::new(["COM5", "COM6"]);
        assert_eq!(lister.list_ports().await, strings(&["COM5", "COM6"]));
    }
}
