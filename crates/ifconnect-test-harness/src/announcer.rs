//! Mock discovery announcements.
//!
//! The real simulator broadcasts a JSON datagram to UDP port 15000 every
//! second. [`announce_once`] emits a single such datagram at a target port
//! on loopback, which is all a discovery test needs.

use tokio::net::UdpSocket;

/// Send one discovery announcement to `127.0.0.1:discovery_port`.
///
/// `addresses` fills the announcement's `Addresses` array verbatim, so
/// tests can exercise IPv6-skipping by listing non-IPv4 entries first.
pub async fn announce_once(
    discovery_port: u16,
    addresses: &[&str],
    tcp_port: u16,
) -> std::io::Result<()> {
    let socket = UdpSocket::bind("127.0.0.1:0").await?;
    let payload = serde_json::json!({
        "Addresses": addresses,
        "Port": tcp_port,
        "DeviceName": "MockSimulator",
        "State": "Playing",
        "Version": "0.0.0",
    })
    .to_string();

    tracing::trace!(port = discovery_port, "Sending mock announcement");
    socket
        .send_to(payload.as_bytes(), ("127.0.0.1", discovery_port))
        .await?;
    Ok(())
}
