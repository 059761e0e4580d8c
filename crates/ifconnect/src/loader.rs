//! Manifest fetch over a short-lived TCP connection.
//!
//! The command catalog is negotiated once per connection lifecycle on a
//! dedicated socket: connect, send the manifest request, accumulate the
//! response, parse, disconnect. The response is a normal frame for the
//! sentinel command id `-1` whose payload is `[i32 text_len][text bytes]`,
//! where the text is lines of `command_id,type,name`.
//!
//! Every failure mode here -- connect failure, read timeout, peer close
//! before the full payload, malformed text -- surfaces as
//! [`Error::Manifest`] and aborts connection setup.

use std::net::SocketAddr;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use ifconnect_core::{Error, Manifest, Result, MANIFEST_COMMAND_ID};

use crate::codec;

/// Offset of the inner text length within the assembled response:
/// `[i32 id][i32 payload_len][i32 text_len][text]`.
const TEXT_LEN_OFFSET: usize = 8;

/// Bytes preceding the manifest text itself.
const TEXT_OFFSET: usize = 12;

/// Fetch and parse the manifest from `addr`.
///
/// `timeout` bounds the connect and each individual read (default 1000 ms
/// at the client layer).
pub async fn fetch_manifest(addr: SocketAddr, timeout: Duration) -> Result<Manifest> {
    tracing::debug!(addr = %addr, timeout_ms = timeout.as_millis(), "Fetching manifest");

    let mut stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| Error::Manifest(format!("connect to {addr} timed out")))?
        .map_err(|e| Error::Manifest(format!("connect to {addr} failed: {e}")))?;

    stream
        .write_all(&codec::encode_manifest_request())
        .await
        .map_err(|e| Error::Manifest(format!("failed to send manifest request: {e}")))?;

    let mut buf = BytesMut::with_capacity(64 * 1024);

    // First the 12-byte prefix, to learn the text length.
    while buf.len() < TEXT_OFFSET {
        read_more(&mut stream, &mut buf, timeout).await?;
    }

    let command_id = (&buf[0..4]).get_i32_le();
    if command_id != MANIFEST_COMMAND_ID {
        return Err(Error::Manifest(format!(
            "unexpected command id {command_id} in manifest response"
        )));
    }

    let text_len = (&buf[TEXT_LEN_OFFSET..TEXT_OFFSET]).get_i32_le();
    if text_len < 0 {
        return Err(Error::Manifest(format!(
            "negative manifest text length {text_len}"
        )));
    }

    let total = TEXT_OFFSET + text_len as usize;
    while buf.len() < total {
        read_more(&mut stream, &mut buf, timeout).await?;
    }

    let text = std::str::from_utf8(&buf[TEXT_OFFSET..total])
        .map_err(|_| Error::Manifest("manifest text is not valid UTF-8".into()))?;
    let manifest = Manifest::parse(text);

    tracing::debug!(addr = %addr, entries = manifest.len(), "Manifest loaded");
    Ok(manifest)
}

async fn read_more(stream: &mut TcpStream, buf: &mut BytesMut, timeout: Duration) -> Result<()> {
    let mut chunk = [0u8; 8192];
    let n = tokio::time::timeout(timeout, stream.read(&mut chunk))
        .await
        .map_err(|_| Error::Manifest("manifest read timed out".into()))?
        .map_err(|e| Error::Manifest(format!("manifest read failed: {e}")))?;
    if n == 0 {
        return Err(Error::Manifest(
            "peer closed before full manifest payload".into(),
        ));
    }
    buf.extend_from_slice(&chunk[..n]);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ifconnect_core::{EntryKind, WireType};
    use tokio::net::TcpListener;

    /// Build a full manifest response frame for the given catalog text.
    fn manifest_response(text: &str) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&MANIFEST_COMMAND_ID.to_le_bytes());
        out.extend_from_slice(&((text.len() + 4) as i32).to_le_bytes());
        out.extend_from_slice(&(text.len() as i32).to_le_bytes());
        out.extend_from_slice(text.as_bytes());
        out
    }

    async fn expect_manifest_request(stream: &mut TcpStream) {
        let mut req = [0u8; 5];
        stream.read_exact(&mut req).await.unwrap();
        assert_eq!(req, [0xFF, 0xFF, 0xFF, 0xFF, 0x00]);
    }

    #[tokio::test]
    async fn fetch_single_entry_manifest() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            expect_manifest_request(&mut stream).await;
            stream
                .write_all(&manifest_response("1,2,aircraft/0/alt\n"))
                .await
                .unwrap();
        });

        let manifest = fetch_manifest(addr, Duration::from_secs(1)).await.unwrap();
        server.await.unwrap();

        assert_eq!(manifest.len(), 1);
        let entry = manifest.entry_by_name("aircraft/0/alt").unwrap();
        assert_eq!(entry.id, 1);
        assert_eq!(entry.kind, EntryKind::Value(WireType::Float));
    }

    #[tokio::test]
    async fn fetch_tolerates_split_delivery() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            expect_manifest_request(&mut stream).await;
            let response =
                manifest_response("1,2,aircraft/0/alt\n7,4,aircraft/0/callsign\n42,-1,commands/Brakes\n");
            // Dribble the response one fragment at a time, splitting inside
            // the 12-byte prefix and inside the text.
            for piece in response.chunks(5) {
                stream.write_all(piece).await.unwrap();
                stream.flush().await.unwrap();
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        });

        let manifest = fetch_manifest(addr, Duration::from_secs(1)).await.unwrap();
        server.await.unwrap();

        assert_eq!(manifest.len(), 3);
        assert_eq!(
            manifest.entry_by_name("commands/Brakes").unwrap().kind,
            EntryKind::Invokable
        );
    }

    #[tokio::test]
    async fn fetch_times_out_on_silent_peer() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let result = fetch_manifest(addr, Duration::from_millis(100)).await;
        assert!(matches!(result, Err(Error::Manifest(_))));

        server.abort();
    }

    #[tokio::test]
    async fn fetch_fails_on_early_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            expect_manifest_request(&mut stream).await;
            // Declare 100 bytes of text but close after a few.
            let mut partial = Vec::new();
            partial.extend_from_slice(&MANIFEST_COMMAND_ID.to_le_bytes());
            partial.extend_from_slice(&104i32.to_le_bytes());
            partial.extend_from_slice(&100i32.to_le_bytes());
            partial.extend_from_slice(b"1,2,x");
            stream.write_all(&partial).await.unwrap();
            stream.flush().await.unwrap();
            drop(stream);
        });

        let result = fetch_manifest(addr, Duration::from_millis(500)).await;
        server.await.unwrap();
        assert!(matches!(result, Err(Error::Manifest(_))));
    }

    #[tokio::test]
    async fn fetch_rejects_wrong_command_id() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            expect_manifest_request(&mut stream).await;
            let mut bad = Vec::new();
            bad.extend_from_slice(&7i32.to_le_bytes());
            bad.extend_from_slice(&4i32.to_le_bytes());
            bad.extend_from_slice(&0i32.to_le_bytes());
            stream.write_all(&bad).await.unwrap();
        });

        let result = fetch_manifest(addr, Duration::from_millis(500)).await;
        server.await.unwrap();
        assert!(matches!(result, Err(Error::Manifest(_))));
    }
}
