//! Connect v2 request/response framing.
//!
//! All encoding and decoding in this module is pure byte manipulation -- no
//! I/O is performed. Multi-byte fields are little-endian throughout.
//!
//! # Request formats
//!
//! ```text
//! Read:     [i32 command_id][u8 0]
//! Write:    [i32 command_id][u8 1][value per wire type]
//! Invoke:   [i32 command_id][u8 1][i32 n_args]
//!           then per arg [i32 name_len][name][i32 value_len][value]
//! Manifest: [i32 -1][u8 0]
//! ```
//!
//! # Response format
//!
//! ```text
//! [i32 command_id][i32 payload_len][payload_len bytes]
//! ```
//!
//! Payload interpretation depends on the entry's manifest-declared wire
//! type; strings carry an inner `[i32 len][len bytes UTF-8]` prefix of
//! their own.

use bytes::{Buf, BufMut, BytesMut};

use ifconnect_core::{Error, Result, Value, WireType, MANIFEST_COMMAND_ID};

/// Request flag byte for reads.
pub const READ_FLAG: u8 = 0;

/// Request flag byte for writes and invokes.
pub const WRITE_FLAG: u8 = 1;

/// Length of the `[i32 command_id][i32 payload_len]` response header.
pub const RESPONSE_HEADER_LEN: usize = 8;

/// Encode a read request for the given command id.
pub fn encode_read(id: i32) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(5);
    buf.put_i32_le(id);
    buf.put_u8(READ_FLAG);
    buf.to_vec()
}

/// Encode the manifest-fetch request.
pub fn encode_manifest_request() -> Vec<u8> {
    encode_read(MANIFEST_COMMAND_ID)
}

/// Encode a write request carrying a typed value.
///
/// The caller is responsible for having checked the value against the
/// entry's manifest type; this function encodes whatever it is given.
pub fn encode_write(id: i32, value: &Value) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(16);
    buf.put_i32_le(id);
    buf.put_u8(WRITE_FLAG);
    put_value(&mut buf, value);
    buf.to_vec()
}

/// Encode an invoke request with string-valued named arguments.
pub fn encode_invoke(id: i32, args: &[(&str, &str)]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(16);
    buf.put_i32_le(id);
    buf.put_u8(WRITE_FLAG);
    buf.put_i32_le(args.len() as i32);
    for (name, value) in args {
        buf.put_i32_le(name.len() as i32);
        buf.put_slice(name.as_bytes());
        buf.put_i32_le(value.len() as i32);
        buf.put_slice(value.as_bytes());
    }
    buf.to_vec()
}

fn put_value(buf: &mut BytesMut, value: &Value) {
    match value {
        Value::Boolean(b) => buf.put_u8(u8::from(*b)),
        Value::Integer(v) => buf.put_i32_le(*v),
        Value::Float(v) => buf.put_f32_le(*v),
        Value::Double(v) => buf.put_f64_le(*v),
        Value::Text(s) => {
            buf.put_i32_le(s.len() as i32);
            buf.put_slice(s.as_bytes());
        }
        Value::Long(v) => buf.put_i64_le(*v),
    }
}

/// Result of attempting to frame one response from a byte buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDecode {
    /// The buffer does not yet hold a complete frame. More bytes are needed.
    Incomplete,
    /// A complete frame starts at the head of the buffer.
    Complete {
        /// Command id from the frame header.
        command_id: i32,
        /// Payload length in bytes; the whole frame spans
        /// `RESPONSE_HEADER_LEN + payload_len` bytes.
        payload_len: usize,
    },
}

/// Attempt to frame one response at the head of `buf`.
///
/// Returns [`FrameDecode::Incomplete`] until the header and the full
/// declared payload are buffered. A negative declared payload length means
/// stream framing is lost and is reported as a protocol error.
pub fn decode_frame(buf: &[u8]) -> Result<FrameDecode> {
    if buf.len() < RESPONSE_HEADER_LEN {
        return Ok(FrameDecode::Incomplete);
    }

    let mut header = &buf[..RESPONSE_HEADER_LEN];
    let command_id = header.get_i32_le();
    let declared = header.get_i32_le();
    if declared < 0 {
        return Err(Error::Protocol(format!(
            "negative payload length {declared} for command {command_id}"
        )));
    }

    let payload_len = declared as usize;
    if buf.len() < RESPONSE_HEADER_LEN + payload_len {
        return Ok(FrameDecode::Incomplete);
    }

    Ok(FrameDecode::Complete {
        command_id,
        payload_len,
    })
}

/// Decode a response payload according to its manifest wire type.
///
/// Payload lengths are validated exactly; a short or oversized payload is a
/// protocol error rather than a partial read.
pub fn decode_value(ty: WireType, payload: &[u8]) -> Result<Value> {
    match ty {
        WireType::Boolean => {
            expect_len(ty, payload, 1)?;
            Ok(Value::Boolean(payload[0] != 0))
        }
        WireType::Integer => {
            expect_len(ty, payload, 4)?;
            Ok(Value::Integer((&payload[..]).get_i32_le()))
        }
        WireType::Float => {
            expect_len(ty, payload, 4)?;
            Ok(Value::Float((&payload[..]).get_f32_le()))
        }
        WireType::Double => {
            expect_len(ty, payload, 8)?;
            Ok(Value::Double((&payload[..]).get_f64_le()))
        }
        WireType::Long => {
            expect_len(ty, payload, 8)?;
            Ok(Value::Long((&payload[..]).get_i64_le()))
        }
        WireType::String => {
            if payload.len() < 4 {
                return Err(Error::Protocol(format!(
                    "String payload too short: {} bytes",
                    payload.len()
                )));
            }
            let declared = (&payload[..4]).get_i32_le();
            if declared < 0 {
                return Err(Error::Protocol(format!(
                    "negative string length {declared}"
                )));
            }
            let text = &payload[4..];
            if text.len() != declared as usize {
                return Err(Error::Protocol(format!(
                    "string length {declared} disagrees with payload ({} bytes)",
                    text.len()
                )));
            }
            let s = std::str::from_utf8(text)
                .map_err(|_| Error::Protocol("string payload is not valid UTF-8".into()))?;
            Ok(Value::Text(s.to_string()))
        }
    }
}

fn expect_len(ty: WireType, payload: &[u8], expected: usize) -> Result<()> {
    if payload.len() != expected {
        return Err(Error::Protocol(format!(
            "{ty} payload must be {expected} bytes, got {}",
            payload.len()
        )));
    }
    Ok(())
}
