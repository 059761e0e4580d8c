//! Long-lived session IO tasks.
//!
//! The client owns two independent TCP sessions to the same peer: the
//! **command session** carries one-shot reads (queued, one in flight at a
//! time) plus fire-and-forget writes and invokes; the **poll session**
//! drives the round-robin subscription loop. Each session runs as a single
//! spawned task that owns its stream, receive buffer, and wait list, so no
//! protocol state is shared across tasks without a lock.
//!
//! Responses carry no in-band request identifier beyond the command id, so
//! correlation works by matching the id against the session's wait list in
//! FIFO order. Frames for ids that are unknown or not awaited are logged
//! and discarded.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpSocket, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use ifconnect_core::{ClientEvent, EntryKind, Error, Manifest, Result, SessionKind, Value};

use crate::client::Shared;
use crate::codec::{self, FrameDecode};
use crate::poll::PollSet;

/// Timeout for establishing a TCP connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Delay between reconnection attempts.
const RECONNECT_DELAY: Duration = Duration::from_millis(500);

/// Interval of the command-session queue drain tick.
const DRAIN_INTERVAL: Duration = Duration::from_millis(250);

/// Read chunk size for both sessions.
const READ_CHUNK: usize = 4096;

/// Static configuration of one session task.
#[derive(Debug, Clone)]
pub(crate) struct SessionConfig {
    pub addr: SocketAddr,
    pub kind: SessionKind,
    pub keep_alive: bool,
    pub read_timeout: Option<Duration>,
    pub reconnect: bool,
}

/// Work submitted to the command session.
pub(crate) enum CommandRequest {
    /// A one-shot read; the decoded value is delivered through `reply`.
    Read {
        id: i32,
        name: String,
        reply: oneshot::Sender<Result<Value>>,
    },
    /// A pre-encoded write or invoke frame. Produces no response.
    Send { frame: Vec<u8> },
}

/// Subscription changes submitted to the poll session.
pub(crate) enum PollControl {
    Register { id: i32, name: String },
    Deregister { name: String },
}

/// A read that has been written to a session and not yet answered.
struct PendingRead {
    id: i32,
    name: String,
    /// `Some` for one-shot reads; `None` for poll reads, which are
    /// delivered as `Data` events instead.
    reply: Option<oneshot::Sender<Result<Value>>>,
}

/// Why a drive loop ended.
enum Fault {
    Shutdown,
    ChannelClosed,
    ReadTimeout,
    Transport(String),
}

/// Establish a TCP connection with the session socket options applied.
pub(crate) async fn connect_session(addr: SocketAddr, keep_alive: bool) -> Result<TcpStream> {
    let socket = TcpSocket::new_v4().map_err(Error::Io)?;
    if keep_alive {
        socket.set_keepalive(true).map_err(Error::Io)?;
    }

    let stream = tokio::time::timeout(CONNECT_TIMEOUT, socket.connect(addr))
        .await
        .map_err(|_| {
            tracing::error!(addr = %addr, "TCP connection timed out");
            Error::Timeout
        })?
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::ConnectionRefused => {
                Error::Transport(format!("connection refused: {addr}"))
            }
            _ => Error::Io(e),
        })?;

    // Disable Nagle; requests are small and latency-sensitive.
    if let Err(e) = stream.set_nodelay(true) {
        tracing::warn!(addr = %addr, error = %e, "Failed to set TCP_NODELAY (continuing anyway)");
    }

    tracing::debug!(addr = %addr, "Session connected");
    Ok(stream)
}

// ---------------------------------------------------------------------------
// Command session
// ---------------------------------------------------------------------------

/// IO task for the command session.
///
/// Reads queue behind a single in-flight slot; writes and invokes are sent
/// the moment they arrive. A periodic drain tick re-pumps the queue so
/// enqueues that race a drain, or that arrive while the link is down, still
/// make progress.
pub(crate) async fn run_command_session(
    stream: TcpStream,
    cfg: SessionConfig,
    manifest: Arc<Manifest>,
    shared: Arc<Shared>,
    mut rx: mpsc::Receiver<CommandRequest>,
    cancel: CancellationToken,
) {
    let mut queue: VecDeque<PendingRead> = VecDeque::new();
    let mut waits: VecDeque<PendingRead> = VecDeque::new();
    let mut rx_buf = BytesMut::with_capacity(READ_CHUNK);
    let mut chunk = [0u8; READ_CHUNK];
    let mut stream = Some(stream);

    'session: loop {
        let Some(current) = stream.take() else {
            break 'session;
        };
        let (mut rd, mut wr) = current.into_split();
        rx_buf.clear();
        let mut deadline_at: Option<tokio::time::Instant> = None;

        let fault: Fault = 'drive: {
            // Reads queued while the link was down go out now.
            match pump_queue(&mut queue, &mut waits, &mut wr).await {
                Ok(true) => deadline_at = arm_deadline(&cfg, &waits),
                Ok(false) => {}
                Err(e) => break 'drive Fault::Transport(e.to_string()),
            }

            let mut drain_tick = tokio::time::interval(DRAIN_INTERVAL);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break 'drive Fault::Shutdown,

                    req = rx.recv() => match req {
                        Some(CommandRequest::Read { id, name, reply }) => {
                            queue.push_back(PendingRead { id, name, reply: Some(reply) });
                            match pump_queue(&mut queue, &mut waits, &mut wr).await {
                                Ok(true) => deadline_at = arm_deadline(&cfg, &waits),
                                Ok(false) => {}
                                Err(e) => break 'drive Fault::Transport(e.to_string()),
                            }
                        }
                        Some(CommandRequest::Send { frame }) => {
                            // Writes and invokes bypass the read queue.
                            if let Err(e) = wr.write_all(&frame).await {
                                break 'drive Fault::Transport(e.to_string());
                            }
                        }
                        None => break 'drive Fault::ChannelClosed,
                    },

                    _ = drain_tick.tick() => {
                        match pump_queue(&mut queue, &mut waits, &mut wr).await {
                            Ok(true) => deadline_at = arm_deadline(&cfg, &waits),
                            Ok(false) => {}
                            Err(e) => break 'drive Fault::Transport(e.to_string()),
                        }
                    }

                    res = read_some(&mut rd, &mut chunk, deadline_at) => match res {
                        Ok(n) => {
                            rx_buf.extend_from_slice(&chunk[..n]);
                            match drain_frames(&mut rx_buf, &mut waits, &manifest, &shared, cfg.kind).await {
                                Ok(()) => {
                                    // Any inbound data counts as activity.
                                    deadline_at = arm_deadline(&cfg, &waits);
                                    if waits.is_empty() {
                                        match pump_queue(&mut queue, &mut waits, &mut wr).await {
                                            Ok(true) => deadline_at = arm_deadline(&cfg, &waits),
                                            Ok(false) => {}
                                            Err(e) => break 'drive Fault::Transport(e.to_string()),
                                        }
                                    }
                                }
                                Err(e) => break 'drive Fault::Transport(e.to_string()),
                            }
                        }
                        Err(ReadFailure::Timeout) => break 'drive Fault::ReadTimeout,
                        Err(ReadFailure::Closed) => {
                            break 'drive Fault::Transport("peer closed connection".into());
                        }
                        Err(ReadFailure::Io(e)) => break 'drive Fault::Transport(e.to_string()),
                    },
                }
            }
        };

        match handle_fault(fault, &cfg, &shared, &cancel, &mut waits, &mut rx_buf, wr).await {
            Some(next) => stream = Some(next),
            None => break 'session,
        }
    }

    tracing::debug!(session = %cfg.kind, "Session task exited");
}

/// Dispatch the next queued read when nothing is in flight.
///
/// Returns `true` when a read was actually written.
async fn pump_queue(
    queue: &mut VecDeque<PendingRead>,
    waits: &mut VecDeque<PendingRead>,
    wr: &mut OwnedWriteHalf,
) -> std::io::Result<bool> {
    // One outstanding read at a time on the command session.
    if !waits.is_empty() {
        return Ok(false);
    }
    let Some(next) = queue.pop_front() else {
        return Ok(false);
    };
    let frame = codec::encode_read(next.id);
    tracing::trace!(id = next.id, name = %next.name, "Dispatching queued read");
    wr.write_all(&frame).await?;
    waits.push_back(next);
    Ok(true)
}

// ---------------------------------------------------------------------------
// Poll session
// ---------------------------------------------------------------------------

/// IO task for the poll session.
///
/// Holds the subscription set and its cursor. At most one poll request is
/// outstanding; the next one is dispatched `throttle` after the previous
/// response fully decodes (immediately when the throttle is zero).
pub(crate) async fn run_poll_session(
    stream: TcpStream,
    cfg: SessionConfig,
    manifest: Arc<Manifest>,
    shared: Arc<Shared>,
    mut rx: mpsc::Receiver<PollControl>,
    cancel: CancellationToken,
    throttle: Duration,
) {
    let mut set = PollSet::new();
    let mut waits: VecDeque<PendingRead> = VecDeque::new();
    let mut rx_buf = BytesMut::with_capacity(READ_CHUNK);
    let mut chunk = [0u8; READ_CHUNK];
    let mut stream = Some(stream);

    'session: loop {
        let Some(current) = stream.take() else {
            break 'session;
        };
        let (mut rd, mut wr) = current.into_split();
        rx_buf.clear();
        let mut deadline_at: Option<tokio::time::Instant> = None;
        // Resume from the current cursor after (re)connect.
        let mut dispatch_at = if set.is_empty() {
            None
        } else {
            Some(tokio::time::Instant::now() + throttle)
        };

        let fault: Fault = 'drive: loop {
            tokio::select! {
                _ = cancel.cancelled() => break 'drive Fault::Shutdown,

                ctrl = rx.recv() => match ctrl {
                    Some(PollControl::Register { id, name }) => {
                        if set.insert(&name, id) {
                            tracing::debug!(name = %name, id = id, "Subscription registered");
                        }
                        if waits.is_empty() && dispatch_at.is_none() {
                            dispatch_at = Some(tokio::time::Instant::now() + throttle);
                        }
                    }
                    Some(PollControl::Deregister { name }) => {
                        if set.remove(&name) {
                            tracing::debug!(name = %name, "Subscription removed");
                        }
                        if set.is_empty() {
                            dispatch_at = None;
                        }
                    }
                    None => break 'drive Fault::ChannelClosed,
                },

                _ = sleep_until_or_forever(dispatch_at) => {
                    dispatch_at = None;
                    let next = set.peek().map(|e| (e.id, e.name.clone()));
                    if let Some((id, name)) = next {
                        if waits.iter().any(|w| w.id == id) {
                            // Already in flight; the next demultiplex
                            // restarts the cycle.
                            tracing::trace!(name = %name, "Poll skipped, response still pending");
                        } else {
                            set.advance();
                            let frame = codec::encode_read(id);
                            tracing::trace!(id = id, name = %name, "Dispatching poll read");
                            if let Err(e) = wr.write_all(&frame).await {
                                break 'drive Fault::Transport(e.to_string());
                            }
                            waits.push_back(PendingRead { id, name, reply: None });
                            deadline_at = arm_deadline(&cfg, &waits);
                        }
                    }
                },

                res = read_some(&mut rd, &mut chunk, deadline_at) => match res {
                    Ok(n) => {
                        rx_buf.extend_from_slice(&chunk[..n]);
                        match drain_frames(&mut rx_buf, &mut waits, &manifest, &shared, cfg.kind).await {
                            Ok(()) => {
                                // Any inbound data counts as activity.
                                deadline_at = arm_deadline(&cfg, &waits);
                                if waits.is_empty() && !set.is_empty() && dispatch_at.is_none() {
                                    dispatch_at = Some(tokio::time::Instant::now() + throttle);
                                }
                            }
                            Err(e) => break 'drive Fault::Transport(e.to_string()),
                        }
                    }
                    Err(ReadFailure::Timeout) => break 'drive Fault::ReadTimeout,
                    Err(ReadFailure::Closed) => {
                        break 'drive Fault::Transport("peer closed connection".into());
                    }
                    Err(ReadFailure::Io(e)) => break 'drive Fault::Transport(e.to_string()),
                },
            }
        };

        match handle_fault(fault, &cfg, &shared, &cancel, &mut waits, &mut rx_buf, wr).await {
            Some(next) => stream = Some(next),
            None => break 'session,
        }
    }

    tracing::debug!(session = %cfg.kind, "Session task exited");
}

/// Sleep until the given instant, or forever when no dispatch is armed.
async fn sleep_until_or_forever(at: Option<tokio::time::Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

// ---------------------------------------------------------------------------
// Shared machinery
// ---------------------------------------------------------------------------

/// React to a drive-loop fault.
///
/// Returns the replacement stream when the session should keep running, or
/// `None` when the task must exit.
async fn handle_fault(
    fault: Fault,
    cfg: &SessionConfig,
    shared: &Shared,
    cancel: &CancellationToken,
    waits: &mut VecDeque<PendingRead>,
    rx_buf: &mut BytesMut,
    mut wr: OwnedWriteHalf,
) -> Option<TcpStream> {
    match fault {
        Fault::Shutdown => {
            let _ = wr.shutdown().await;
            None
        }
        Fault::ChannelClosed => None,
        Fault::ReadTimeout | Fault::Transport(_) => {
            match &fault {
                Fault::ReadTimeout => {
                    tracing::debug!(session = %cfg.kind, "Read timed out");
                    let _ = shared.event_tx.send(ClientEvent::ReadTimeout { session: cfg.kind });
                }
                Fault::Transport(msg) => {
                    tracing::debug!(session = %cfg.kind, error = %msg, "Session transport failure");
                }
                _ => {}
            }
            drop(wr);

            if !cfg.reconnect {
                shared.connected.store(false, Ordering::SeqCst);
                let _ = shared.event_tx.send(ClientEvent::Disconnected);
                // Dropping the wait list errors out any pending one-shot reads.
                waits.clear();
                return None;
            }

            // Abandon in-flight reads and stale bytes; the redialed link
            // starts clean.
            waits.clear();
            rx_buf.clear();
            redial(cfg, shared, cancel).await
        }
    }
}

/// Re-establish a failed session, retrying until success or cancellation.
async fn redial(
    cfg: &SessionConfig,
    shared: &Shared,
    cancel: &CancellationToken,
) -> Option<TcpStream> {
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        let _ = shared.event_tx.send(ClientEvent::Reconnecting {
            session: cfg.kind,
            attempt,
        });
        tracing::debug!(session = %cfg.kind, attempt = attempt, "Reconnecting session");

        tokio::select! {
            _ = cancel.cancelled() => return None,
            result = connect_session(cfg.addr, cfg.keep_alive) => match result {
                Ok(stream) => {
                    tracing::debug!(session = %cfg.kind, "Session reconnected");
                    let _ = shared.event_tx.send(ClientEvent::Reconnected { session: cfg.kind });
                    return Some(stream);
                }
                Err(e) => {
                    tracing::debug!(session = %cfg.kind, error = %e, "Reconnect attempt failed");
                }
            },
        }

        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
        }
    }
}

/// How a read attempt failed.
enum ReadFailure {
    Timeout,
    Closed,
    Io(std::io::Error),
}

/// The read timeout is armed only while a response is actually expected
/// and re-armed on every data arrival; an idle session may legitimately
/// stay silent indefinitely.
fn arm_deadline(
    cfg: &SessionConfig,
    waits: &VecDeque<PendingRead>,
) -> Option<tokio::time::Instant> {
    if waits.is_empty() {
        None
    } else {
        cfg.read_timeout
            .map(|t| tokio::time::Instant::now() + t)
    }
}

async fn read_some(
    rd: &mut OwnedReadHalf,
    chunk: &mut [u8],
    deadline: Option<tokio::time::Instant>,
) -> std::result::Result<usize, ReadFailure> {
    let result = match deadline {
        Some(at) => match tokio::time::timeout_at(at, rd.read(chunk)).await {
            Ok(inner) => inner,
            Err(_) => return Err(ReadFailure::Timeout),
        },
        None => rd.read(chunk).await,
    };
    match result {
        Ok(0) => Err(ReadFailure::Closed),
        Ok(n) => Ok(n),
        Err(e) => Err(ReadFailure::Io(e)),
    }
}

/// Drain every complete frame from the head of the receive buffer.
///
/// Each decoded frame removes exactly `RESPONSE_HEADER_LEN + payload_len`
/// bytes; remaining bytes stay buffered for the next arrival. Unknown or
/// uncorrelated frames are logged and discarded.
async fn drain_frames(
    rx_buf: &mut BytesMut,
    waits: &mut VecDeque<PendingRead>,
    manifest: &Manifest,
    shared: &Shared,
    kind: SessionKind,
) -> Result<()> {
    loop {
        let (command_id, payload_len) = match codec::decode_frame(&rx_buf[..])? {
            FrameDecode::Incomplete => break,
            FrameDecode::Complete {
                command_id,
                payload_len,
            } => (command_id, payload_len),
        };

        let frame = rx_buf.split_to(codec::RESPONSE_HEADER_LEN + payload_len);
        let payload = &frame[codec::RESPONSE_HEADER_LEN..];

        let Some(entry) = manifest.entry_by_id(command_id) else {
            tracing::warn!(session = %kind, id = command_id, "Response for unknown command id discarded");
            continue;
        };
        let ty = match entry.kind {
            EntryKind::Value(ty) => ty,
            EntryKind::Invokable => {
                tracing::warn!(session = %kind, id = command_id, name = %entry.name, "Response for invokable command discarded");
                continue;
            }
        };

        // Responses carry no sequence number; match by command id, first
        // occurrence wins.
        let Some(pos) = waits.iter().position(|w| w.id == command_id) else {
            tracing::debug!(session = %kind, id = command_id, name = %entry.name, "Uncorrelated response discarded");
            continue;
        };
        let Some(pending) = waits.remove(pos) else {
            continue;
        };

        match codec::decode_value(ty, payload) {
            Ok(value) => {
                tracing::trace!(session = %kind, name = %pending.name, value = %value, "Response decoded");
                shared
                    .cache
                    .lock()
                    .await
                    .update(&pending.name, value.clone());
                match pending.reply {
                    Some(reply) => {
                        let _ = reply.send(Ok(value));
                    }
                    None => {
                        let _ = shared.event_tx.send(ClientEvent::Data {
                            name: pending.name,
                            value,
                        });
                    }
                }
            }
            Err(e) => {
                tracing::warn!(session = %kind, name = %pending.name, error = %e, "Failed to decode response payload");
                if let Some(reply) = pending.reply {
                    let _ = reply.send(Err(e));
                }
            }
        }
    }
    Ok(())
}
