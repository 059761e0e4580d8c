//! Simulator discovery via UDP broadcast.
//!
//! The simulator announces itself on the local network by broadcasting a
//! JSON datagram to UDP port 15000. This module listens for these
//! broadcasts and adopts the first instance whose announcement carries an
//! IPv4 address -- discovery is single-peer by design.
//!
//! # Usage
//!
//! ```no_run
//! use ifconnect::discovery;
//! use std::time::Duration;
//!
//! # async fn example() -> ifconnect_core::Result<()> {
//! let instance = discovery::discover(Duration::from_secs(5)).await?;
//! println!("{} at {}:{}", instance.device_name, instance.address, instance.port);
//! # Ok(())
//! # }
//! ```

use std::net::Ipv4Addr;
use std::time::Duration;

use serde::Deserialize;

use ifconnect_core::{Error, Result};

/// UDP port the simulator broadcasts announcements on.
pub const DISCOVERY_PORT: u16 = 15000;

/// TCP port assumed when an announcement does not state one.
const DEFAULT_ANNOUNCED_PORT: u16 = 10112;

/// A simulator instance discovered on the local network.
#[derive(Debug, Clone)]
pub struct DiscoveredInstance {
    /// First IPv4 address from the announcement.
    pub address: Ipv4Addr,
    /// TCP port announced by the instance (10112 unless stated otherwise).
    pub port: u16,
    /// Device the simulator is running on (e.g. "iPad Pro").
    pub device_name: String,
    /// Simulator state string from the announcement.
    pub state: String,
    /// Simulator version string.
    pub version: String,
}

/// The on-wire announcement shape. Only `Addresses` is required; the other
/// fields are informational and default to empty when absent.
#[derive(Debug, Deserialize)]
struct Announcement {
    #[serde(rename = "Addresses", default)]
    addresses: Vec<String>,
    #[serde(rename = "Port", default = "default_announced_port")]
    port: u16,
    #[serde(rename = "DeviceName", default)]
    device_name: String,
    #[serde(rename = "State", default)]
    state: String,
    #[serde(rename = "Version", default)]
    version: String,
}

fn default_announced_port() -> u16 {
    DEFAULT_ANNOUNCED_PORT
}

/// Listen for simulator announcements on the default port (15000).
///
/// Returns the first instance that announces an IPv4 address, or
/// [`Error::DiscoveryTimeout`] if none arrives within the deadline. The
/// socket is closed as soon as an acceptable datagram is received.
pub async fn discover(timeout: Duration) -> Result<DiscoveredInstance> {
    discover_on_port(DISCOVERY_PORT, timeout).await
}

/// Listen for simulator announcements on a specific port.
///
/// This variant allows tests to use a non-privileged port for mock
/// announcements sent via loopback.
pub async fn discover_on_port(port: u16, timeout: Duration) -> Result<DiscoveredInstance> {
    let bind_addr = format!("0.0.0.0:{port}");
    let socket = tokio::net::UdpSocket::bind(&bind_addr).await.map_err(|e| {
        Error::Transport(format!(
            "failed to bind discovery socket on {bind_addr}: {e}"
        ))
    })?;

    tracing::debug!(port = port, "Listening for simulator announcements");

    let mut buf = [0u8; 4096];
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }

        match tokio::time::timeout(remaining, socket.recv_from(&mut buf)).await {
            Ok(Ok((n, src_addr))) => match parse_announcement(&buf[..n]) {
                Ok(instance) => {
                    tracing::debug!(
                        address = %instance.address,
                        port = instance.port,
                        device = %instance.device_name,
                        "Discovered simulator"
                    );
                    return Ok(instance);
                }
                Err(e) => {
                    // Not an announcement we can use -- keep listening.
                    tracing::trace!(src = %src_addr, error = %e, "Ignoring datagram");
                }
            },
            Ok(Err(e)) => {
                tracing::trace!(error = %e, "Discovery recv error");
            }
            Err(_) => {
                // Deadline reached.
                break;
            }
        }
    }

    Err(Error::DiscoveryTimeout)
}

/// Parse a single UDP datagram as a simulator announcement.
///
/// The datagram must be UTF-8 JSON with an `Addresses` array; the first
/// entry that parses as an IPv4 dotted quad wins. IPv6 entries are skipped.
fn parse_announcement(data: &[u8]) -> Result<DiscoveredInstance> {
    let text = std::str::from_utf8(data)
        .map_err(|_| Error::Protocol("announcement is not valid UTF-8".into()))?;

    let announcement: Announcement = serde_json::from_str(text)
        .map_err(|e| Error::Protocol(format!("announcement is not valid JSON: {e}")))?;

    let address = announcement
        .addresses
        .iter()
        .find_map(|a| a.parse::<Ipv4Addr>().ok())
        .ok_or_else(|| Error::Protocol("announcement carries no IPv4 address".into()))?;

    Ok(DiscoveredInstance {
        address,
        port: announcement.port,
        device_name: announcement.device_name,
        state: announcement.state,
        version: announcement.version,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn discover_timeout_when_nothing_broadcasts() {
        let socket = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = socket.local_addr().unwrap().port();
        drop(socket);

        let result = discover_on_port(port, Duration::from_millis(50)).await;
        assert!(matches!(result, Err(Error::DiscoveryTimeout)));
    }

    #[test]
    fn parse_full_announcement() {
        let json = r#"{
            "Addresses": ["192.168.1.17", "fe80::1c2f:7f00:aa10:42"],
            "Port": 10112,
            "DeviceName": "iPad Pro",
            "State": "Playing",
            "Version": "23.3.1"
        }"#;
        let instance = parse_announcement(json.as_bytes()).unwrap();
        assert_eq!(instance.address, "192.168.1.17".parse::<Ipv4Addr>().unwrap());
        assert_eq!(instance.port, 10112);
        assert_eq!(instance.device_name, "iPad Pro");
        assert_eq!(instance.state, "Playing");
        assert_eq!(instance.version, "23.3.1");
    }

    #[test]
    fn parse_skips_ipv6_entries() {
        let json = r#"{"Addresses": ["fe80::1", "10.0.0.5"]}"#;
        let instance = parse_announcement(json.as_bytes()).unwrap();
        assert_eq!(instance.address, "10.0.0.5".parse::<Ipv4Addr>().unwrap());
        // Missing informational fields default to empty / 10112.
        assert_eq!(instance.port, 10112);
        assert_eq!(instance.device_name, "");
    }

    #[test]
    fn parse_rejects_no_ipv4() {
        let json = r#"{"Addresses": ["fe80::1", "not-an-address"]}"#;
        assert!(parse_announcement(json.as_bytes()).is_err());
    }

    #[test]
    fn parse_rejects_non_json() {
        assert!(parse_announcement(b"hello there").is_err());
        assert!(parse_announcement(&[0xFF, 0xFE, 0x00]).is_err());
    }

    #[tokio::test]
    async fn discover_with_mock_broadcast() {
        let recv_socket = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let recv_port = recv_socket.local_addr().unwrap().port();
        // Drop so discover_on_port can bind the same port.
        drop(recv_socket);

        let sender = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let sock = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
            let json = r#"{"Addresses":["127.0.0.1"],"Port":10112,"DeviceName":"Test"}"#;
            let dest: std::net::SocketAddr = format!("127.0.0.1:{recv_port}").parse().unwrap();
            sock.send_to(json.as_bytes(), dest).await.unwrap();
        });

        let instance = discover_on_port(recv_port, Duration::from_millis(500))
            .await
            .unwrap();

        sender.await.unwrap();

        assert_eq!(instance.address, Ipv4Addr::LOCALHOST);
        assert_eq!(instance.device_name, "Test");
    }

    #[tokio::test]
    async fn discover_ignores_garbage_then_accepts() {
        let recv_socket = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let recv_port = recv_socket.local_addr().unwrap().port();
        drop(recv_socket);

        let sender = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let sock = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
            let dest: std::net::SocketAddr = format!("127.0.0.1:{recv_port}").parse().unwrap();
            sock.send_to(b"not json", dest).await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            let json = r#"{"Addresses":["192.168.4.4"]}"#;
            sock.send_to(json.as_bytes(), dest).await.unwrap();
        });

        let instance = discover_on_port(recv_port, Duration::from_millis(500))
            .await
            .unwrap();

        sender.await.unwrap();
        assert_eq!(instance.address, "192.168.4.4".parse::<Ipv4Addr>().unwrap());
    }
}
