//! Mock Connect v2 simulator for protocol-level testing.
//!
//! [`MockSimulator`] listens on a random localhost port and accepts any
//! number of connections (the client opens three: manifest loader, command
//! session, poll session). Each connection parses requests incrementally
//! and answers them from a shared entry table:
//!
//! - manifest requests (`id == -1`) get the catalog as `id,type,name` lines;
//! - reads of value entries get a correctly framed typed response;
//! - reads of silent entries get no response (for timeout/abandon tests);
//! - writes and invokes are decoded, recorded, and left unanswered, as the
//!   real simulator does.
//!
//! [`MockSimulator::disconnect_all`] severs every live connection while the
//! listener keeps accepting, which is exactly the shape of a reconnect
//! test.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

use ifconnect_core::{EntryKind, Value, WireType, MANIFEST_COMMAND_ID};

/// A decoded write received from the client.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteRecord {
    /// Command id the write addressed.
    pub id: i32,
    /// Manifest name of the entry.
    pub name: String,
    /// The decoded value.
    pub value: Value,
}

/// A decoded invoke received from the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvokeRecord {
    /// Command id of the invoked entry.
    pub id: i32,
    /// Manifest name of the entry.
    pub name: String,
    /// Named arguments in wire order.
    pub args: Vec<(String, String)>,
}

/// One entry of the mock catalog.
#[derive(Debug, Clone)]
struct SimEntry {
    id: i32,
    name: String,
    kind: EntryKind,
    /// Value served on reads. `None` means reads go unanswered.
    value: Option<Value>,
}

#[derive(Default)]
struct SimState {
    entries: Mutex<Vec<SimEntry>>,
    writes: Mutex<Vec<WriteRecord>>,
    invokes: Mutex<Vec<InvokeRecord>>,
    kill: Notify,
}

/// A scriptable Connect v2 peer listening on localhost.
pub struct MockSimulator {
    addr: SocketAddr,
    state: Arc<SimState>,
    accept_task: JoinHandle<()>,
}

impl MockSimulator {
    /// Bind a random localhost port and start accepting connections.
    pub async fn start() -> std::io::Result<MockSimulator> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(SimState::default());

        let accept_state = Arc::clone(&state);
        let accept_task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        tracing::debug!(peer = %peer, "Mock simulator accepted connection");
                        let state = Arc::clone(&accept_state);
                        tokio::spawn(handle_connection(stream, state));
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "Mock simulator accept failed");
                        return;
                    }
                }
            }
        });

        Ok(MockSimulator {
            addr,
            state,
            accept_task,
        })
    }

    /// The address the simulator is listening on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// The TCP port the simulator is listening on.
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Add a readable/writable state entry with an initial value.
    ///
    /// The wire type is taken from the value.
    pub async fn insert_state(&self, id: i32, name: &str, value: Value) {
        self.state.entries.lock().await.push(SimEntry {
            id,
            name: name.to_string(),
            kind: EntryKind::Value(value.wire_type()),
            value: Some(value),
        });
    }

    /// Add a state entry whose reads are never answered.
    pub async fn insert_silent(&self, id: i32, name: &str, ty: WireType) {
        self.state.entries.lock().await.push(SimEntry {
            id,
            name: name.to_string(),
            kind: EntryKind::Value(ty),
            value: None,
        });
    }

    /// Add an invokable command entry.
    pub async fn insert_command(&self, id: i32, name: &str) {
        self.state.entries.lock().await.push(SimEntry {
            id,
            name: name.to_string(),
            kind: EntryKind::Invokable,
            value: None,
        });
    }

    /// Change the value served for `name`.
    pub async fn set_state(&self, name: &str, value: Value) {
        let mut entries = self.state.entries.lock().await;
        if let Some(entry) = entries.iter_mut().find(|e| e.name == name) {
            entry.value = Some(value);
        }
    }

    /// All writes decoded so far, in arrival order.
    pub async fn writes(&self) -> Vec<WriteRecord> {
        self.state.writes.lock().await.clone()
    }

    /// All invokes decoded so far, in arrival order.
    pub async fn invokes(&self) -> Vec<InvokeRecord> {
        self.state.invokes.lock().await.clone()
    }

    /// Sever every live connection. The listener keeps accepting, so
    /// reconnecting clients come straight back.
    pub fn disconnect_all(&self) {
        self.state.kill.notify_waiters();
    }
}

impl Drop for MockSimulator {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

// ---------------------------------------------------------------------------
// Connection handling
// ---------------------------------------------------------------------------

/// A request decoded from the client byte stream.
#[derive(Debug)]
enum Request {
    Read { id: i32 },
    Write { id: i32, value: Value },
    Invoke { id: i32, args: Vec<(String, String)> },
}

/// Outcome of an incremental parse attempt.
enum Parsed {
    /// Not enough bytes buffered yet.
    Need,
    /// The stream is unparseable; drop the connection.
    Bad,
    /// One request decoded, consuming `consumed` bytes.
    Request { consumed: usize, request: Request },
}

async fn handle_connection(mut stream: TcpStream, state: Arc<SimState>) {
    let mut buf = BytesMut::new();
    let mut chunk = [0u8; 4096];

    loop {
        tokio::select! {
            _ = state.kill.notified() => {
                let _ = stream.shutdown().await;
                return;
            }
            res = stream.read(&mut chunk) => {
                let n = match res {
                    Ok(0) | Err(_) => return,
                    Ok(n) => n,
                };
                buf.extend_from_slice(&chunk[..n]);

                loop {
                    match parse_request(&buf, &state).await {
                        Parsed::Need => break,
                        Parsed::Bad => {
                            tracing::debug!("Mock simulator dropping unparseable connection");
                            return;
                        }
                        Parsed::Request { consumed, request } => {
                            let _ = buf.split_to(consumed);
                            if respond(&mut stream, &state, request).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            }
        }
    }
}

async fn parse_request(buf: &[u8], state: &SimState) -> Parsed {
    if buf.len() < 5 {
        return Parsed::Need;
    }
    let id = (&buf[0..4]).get_i32_le();
    let flag = buf[4];

    if flag == 0 {
        return Parsed::Request {
            consumed: 5,
            request: Request::Read { id },
        };
    }
    if flag != 1 {
        return Parsed::Bad;
    }

    // Writes and invokes need the entry's declared shape to be sized.
    let kind = {
        let entries = state.entries.lock().await;
        match entries.iter().find(|e| e.id == id) {
            Some(entry) => entry.kind,
            None => return Parsed::Bad,
        }
    };

    match kind {
        EntryKind::Value(ty) => parse_write(buf, id, ty),
        EntryKind::Invokable => parse_invoke(buf, id),
    }
}

fn parse_write(buf: &[u8], id: i32, ty: WireType) -> Parsed {
    let body = &buf[5..];
    let (value, body_len) = match ty {
        WireType::Boolean => {
            if body.is_empty() {
                return Parsed::Need;
            }
            (Value::Boolean(body[0] != 0), 1)
        }
        WireType::Integer => {
            if body.len() < 4 {
                return Parsed::Need;
            }
            (Value::Integer((&body[..4]).get_i32_le()), 4)
        }
        WireType::Float => {
            if body.len() < 4 {
                return Parsed::Need;
            }
            (Value::Float((&body[..4]).get_f32_le()), 4)
        }
        WireType::Double => {
            if body.len() < 8 {
                return Parsed::Need;
            }
            (Value::Double((&body[..8]).get_f64_le()), 8)
        }
        WireType::Long => {
            if body.len() < 8 {
                return Parsed::Need;
            }
            (Value::Long((&body[..8]).get_i64_le()), 8)
        }
        WireType::String => {
            if body.len() < 4 {
                return Parsed::Need;
            }
            let len = (&body[..4]).get_i32_le();
            if len < 0 {
                return Parsed::Bad;
            }
            let len = len as usize;
            if body.len() < 4 + len {
                return Parsed::Need;
            }
            match std::str::from_utf8(&body[4..4 + len]) {
                Ok(s) => (Value::Text(s.to_string()), 4 + len),
                Err(_) => return Parsed::Bad,
            }
        }
    };

    Parsed::Request {
        consumed: 5 + body_len,
        request: Request::Write { id, value },
    }
}

fn parse_invoke(buf: &[u8], id: i32) -> Parsed {
    let mut offset = 5usize;
    if buf.len() < offset + 4 {
        return Parsed::Need;
    }
    let n_args = (&buf[offset..offset + 4]).get_i32_le();
    offset += 4;
    if n_args < 0 {
        return Parsed::Bad;
    }

    let mut args = Vec::with_capacity(n_args as usize);
    for _ in 0..n_args {
        let mut pair = [String::new(), String::new()];
        for slot in &mut pair {
            if buf.len() < offset + 4 {
                return Parsed::Need;
            }
            let len = (&buf[offset..offset + 4]).get_i32_le();
            offset += 4;
            if len < 0 {
                return Parsed::Bad;
            }
            let len = len as usize;
            if buf.len() < offset + len {
                return Parsed::Need;
            }
            match std::str::from_utf8(&buf[offset..offset + len]) {
                Ok(s) => *slot = s.to_string(),
                Err(_) => return Parsed::Bad,
            }
            offset += len;
        }
        let [name, value] = pair;
        args.push((name, value));
    }

    Parsed::Request {
        consumed: offset,
        request: Request::Invoke { id, args },
    }
}

async fn respond(
    stream: &mut TcpStream,
    state: &SimState,
    request: Request,
) -> std::io::Result<()> {
    match request {
        Request::Read { id } if id == MANIFEST_COMMAND_ID => {
            let frame = manifest_frame(state).await;
            stream.write_all(&frame).await?;
            stream.flush().await
        }
        Request::Read { id } => {
            let response = {
                let entries = state.entries.lock().await;
                entries
                    .iter()
                    .find(|e| e.id == id)
                    .and_then(|e| e.value.as_ref().map(|v| response_frame(id, v)))
            };
            // Unknown, silent, and invokable entries stay quiet.
            if let Some(frame) = response {
                stream.write_all(&frame).await?;
                stream.flush().await?;
            }
            Ok(())
        }
        Request::Write { id, value } => {
            let mut entries = state.entries.lock().await;
            if let Some(entry) = entries.iter_mut().find(|e| e.id == id) {
                let record = WriteRecord {
                    id,
                    name: entry.name.clone(),
                    value: value.clone(),
                };
                entry.value = Some(value);
                drop(entries);
                state.writes.lock().await.push(record);
            }
            Ok(())
        }
        Request::Invoke { id, args } => {
            let name = {
                let entries = state.entries.lock().await;
                entries
                    .iter()
                    .find(|e| e.id == id)
                    .map(|e| e.name.clone())
                    .unwrap_or_default()
            };
            state.invokes.lock().await.push(InvokeRecord { id, name, args });
            Ok(())
        }
    }
}

/// Frame the catalog as a manifest response.
async fn manifest_frame(state: &SimState) -> Vec<u8> {
    let entries = state.entries.lock().await;
    let mut text = String::new();
    for entry in entries.iter() {
        let code = match entry.kind {
            EntryKind::Value(ty) => ty.code(),
            EntryKind::Invokable => -1,
        };
        text.push_str(&format!("{},{},{}\n", entry.id, code, entry.name));
    }

    let mut frame = Vec::with_capacity(12 + text.len());
    frame.extend_from_slice(&MANIFEST_COMMAND_ID.to_le_bytes());
    frame.extend_from_slice(&((text.len() + 4) as i32).to_le_bytes());
    frame.extend_from_slice(&(text.len() as i32).to_le_bytes());
    frame.extend_from_slice(text.as_bytes());
    frame
}

/// Frame a typed read response.
fn response_frame(id: i32, value: &Value) -> Vec<u8> {
    let payload = value_payload(value);
    let mut frame = Vec::with_capacity(8 + payload.len());
    frame.extend_from_slice(&id.to_le_bytes());
    frame.extend_from_slice(&(payload.len() as i32).to_le_bytes());
    frame.extend_from_slice(&payload);
    frame
}

fn value_payload(value: &Value) -> Vec<u8> {
    match value {
        Value::Boolean(b) => vec![u8::from(*b)],
        Value::Integer(v) => v.to_le_bytes().to_vec(),
        Value::Float(v) => v.to_le_bytes().to_vec(),
        Value::Double(v) => v.to_le_bytes().to_vec(),
        Value::Long(v) => v.to_le_bytes().to_vec(),
        Value::Text(s) => {
            let mut out = Vec::with_capacity(4 + s.len());
            out.extend_from_slice(&(s.len() as i32).to_le_bytes());
            out.extend_from_slice(s.as_bytes());
            out
        }
    }
}
