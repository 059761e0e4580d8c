//! The public client handle.
//!
//! [`Client`] carries everything one connection lifecycle owns: the
//! manifest snapshot, the state cache, the event channel, and the two
//! session IO tasks. Multiple clients can coexist in one process; nothing
//! is global.
//!
//! # Lifecycle
//!
//! ```text
//! connect(config)
//!   -> discovery (skipped when `host` is set)
//!   -> manifest fetch (short-lived connection)
//!   -> command session opens
//!   -> poll session opens
//!   -> Ready
//! close()
//!   -> sessions torn down, manifest and cache cleared, Closed emitted
//! ```

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use ifconnect_core::{
    ClientEvent, EntryKind, Error, Manifest, ManifestEntry, Result, SessionKind, Value,
};

use crate::cache::StateCache;
use crate::codec;
use crate::discovery;
use crate::loader;
use crate::session::{self, CommandRequest, PollControl, SessionConfig};

/// TCP port the simulator listens on.
pub const DEFAULT_PORT: u16 = 10112;

/// Default deadline for the manifest fetch.
const DEFAULT_MANIFEST_TIMEOUT: Duration = Duration::from_millis(1000);

/// Default deadline for UDP discovery.
const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Broadcast channel capacity for event subscribers.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Capacity of the per-session request channels.
const REQUEST_CHANNEL_CAPACITY: usize = 64;

/// How long `close` waits for the session tasks before aborting them.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Options for configuring a client connection.
#[derive(Debug, Clone)]
pub struct Config {
    /// Connect directly to this address instead of discovering.
    pub host: Option<Ipv4Addr>,
    /// TCP port for the manifest, command, and poll connections.
    pub port: u16,
    /// Enable TCP keepalive on both long-lived sessions.
    pub keep_alive: bool,
    /// Re-establish a session after a socket error or read timeout.
    pub reconnect: bool,
    /// Read timeout on the long-lived sessions while a response is
    /// expected. `None` waits indefinitely.
    pub read_timeout: Option<Duration>,
    /// Deadline for the manifest fetch connection.
    pub manifest_timeout: Duration,
    /// Delay before each poll request. Zero dispatches immediately.
    pub poll_throttle: Duration,
    /// How long discovery waits for an announcement.
    pub discovery_timeout: Duration,
    /// UDP port discovery listens on. Overridable for tests.
    pub discovery_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: None,
            port: DEFAULT_PORT,
            keep_alive: false,
            reconnect: true,
            read_timeout: None,
            manifest_timeout: DEFAULT_MANIFEST_TIMEOUT,
            poll_throttle: Duration::ZERO,
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
            discovery_port: discovery::DISCOVERY_PORT,
        }
    }
}

/// State shared between the client handle and the session tasks.
pub(crate) struct Shared {
    /// The manifest snapshot; cleared by `close`.
    pub(crate) manifest: Mutex<Option<Arc<Manifest>>>,
    /// Last decoded value per manifest name.
    pub(crate) cache: Mutex<StateCache>,
    /// Lifecycle and data event channel.
    pub(crate) event_tx: broadcast::Sender<ClientEvent>,
    /// Whether the client is usable (atomic for lock-free reads).
    pub(crate) connected: AtomicBool,
}

impl Shared {
    pub(crate) fn new(event_tx: broadcast::Sender<ClientEvent>) -> Shared {
        Shared {
            manifest: Mutex::new(None),
            cache: Mutex::new(StateCache::new()),
            event_tx,
            connected: AtomicBool::new(true),
        }
    }
}

/// A connected Connect v2 client.
///
/// Obtained from [`Client::connect`]; usable until [`Client::close`]. All
/// methods take `&self` and the handle is `Send + Sync`, so it can be
/// shared across tasks behind an `Arc`.
pub struct Client {
    shared: Arc<Shared>,
    cmd_tx: mpsc::Sender<CommandRequest>,
    poll_tx: mpsc::Sender<PollControl>,
    cancel: CancellationToken,
    closed: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Client {
    /// Discover (or directly dial) a simulator, fetch the manifest, and
    /// open both long-lived sessions.
    ///
    /// Returns once the client is ready for `get`/`set`/`run` and poll
    /// registration. The `ManifestLoaded` and `Ready` events fire during
    /// this call; subscribe via [`Client::events`] afterwards for the
    /// ongoing feed.
    pub async fn connect(config: Config) -> Result<Client> {
        let peer = match config.host {
            Some(host) => host,
            None => {
                tracing::debug!("No host configured, discovering simulator");
                discovery::discover_on_port(config.discovery_port, config.discovery_timeout)
                    .await?
                    .address
            }
        };
        let addr = SocketAddr::from((peer, config.port));

        let manifest = Arc::new(loader::fetch_manifest(addr, config.manifest_timeout).await?);

        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let _ = event_tx.send(ClientEvent::ManifestLoaded {
            entries: manifest.len(),
        });

        let command_stream = session::connect_session(addr, config.keep_alive).await?;
        let poll_stream = session::connect_session(addr, config.keep_alive).await?;

        let shared = Arc::new(Shared::new(event_tx.clone()));
        *shared.manifest.lock().await = Some(Arc::clone(&manifest));

        let cancel = CancellationToken::new();
        let (cmd_tx, cmd_rx) = mpsc::channel(REQUEST_CHANNEL_CAPACITY);
        let (poll_tx, poll_rx) = mpsc::channel(REQUEST_CHANNEL_CAPACITY);

        let command_cfg = SessionConfig {
            addr,
            kind: SessionKind::Command,
            keep_alive: config.keep_alive,
            read_timeout: config.read_timeout,
            reconnect: config.reconnect,
        };
        let poll_cfg = SessionConfig {
            kind: SessionKind::Poll,
            ..command_cfg.clone()
        };

        let tasks = vec![
            tokio::spawn(session::run_command_session(
                command_stream,
                command_cfg,
                Arc::clone(&manifest),
                Arc::clone(&shared),
                cmd_rx,
                cancel.clone(),
            )),
            tokio::spawn(session::run_poll_session(
                poll_stream,
                poll_cfg,
                manifest,
                Arc::clone(&shared),
                poll_rx,
                cancel.clone(),
                config.poll_throttle,
            )),
        ];

        let _ = event_tx.send(ClientEvent::Ready);
        tracing::debug!(addr = %addr, "Client ready");

        Ok(Client {
            shared,
            cmd_tx,
            poll_tx,
            cancel,
            closed: AtomicBool::new(false),
            tasks: Mutex::new(tasks),
        })
    }

    /// Read one state variable.
    ///
    /// The read is queued behind any other outstanding one-shot read and
    /// resolves when the response is decoded. If the session resets while
    /// the read is in flight, the read is abandoned and this returns
    /// [`Error::ConnectionLost`].
    pub async fn get(&self, name: &str) -> Result<Value> {
        let entry = self.lookup(name).await?;
        if entry.kind == EntryKind::Invokable {
            return Err(Error::TypeMismatch(format!(
                "{name} is an invokable command, not readable state"
            )));
        }

        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(CommandRequest::Read {
                id: entry.id,
                name: entry.name,
                reply: tx,
            })
            .await
            .map_err(|_| Error::NotConnected)?;

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(Error::ConnectionLost),
        }
    }

    /// Write one state variable.
    ///
    /// The value must match the entry's manifest type exactly; no numeric
    /// coercion is applied. Writes produce no response and return as soon
    /// as the frame is handed to the command session.
    pub async fn set(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let entry = self.lookup(name).await?;
        let ty = match entry.kind {
            EntryKind::Value(ty) => ty,
            EntryKind::Invokable => {
                return Err(Error::TypeMismatch(format!(
                    "{name} is an invokable command and cannot be set"
                )));
            }
        };
        if value.wire_type() != ty {
            return Err(Error::TypeMismatch(format!(
                "{name} expects {ty}, got {}",
                value.wire_type()
            )));
        }

        let frame = codec::encode_write(entry.id, &value);
        self.cmd_tx
            .send(CommandRequest::Send { frame })
            .await
            .map_err(|_| Error::NotConnected)
    }

    /// Invoke a command with string-valued named arguments.
    ///
    /// The entry must be invokable. Commands produce no response.
    pub async fn run(&self, name: &str, args: &[(&str, &str)]) -> Result<()> {
        let entry = self.lookup(name).await?;
        if entry.kind != EntryKind::Invokable {
            return Err(Error::TypeMismatch(format!(
                "{name} is typed state, not an invokable command"
            )));
        }

        let frame = codec::encode_invoke(entry.id, args);
        self.cmd_tx
            .send(CommandRequest::Send { frame })
            .await
            .map_err(|_| Error::NotConnected)
    }

    /// Add a name to the round-robin refresh loop. Idempotent by name.
    ///
    /// Refreshed values arrive as [`ClientEvent::Data`] events and update
    /// the state cache.
    pub async fn poll_register(&self, name: &str) -> Result<()> {
        let entry = self.lookup(name).await?;
        if entry.kind == EntryKind::Invokable {
            return Err(Error::TypeMismatch(format!(
                "{name} is an invokable command and cannot be polled"
            )));
        }
        self.poll_tx
            .send(PollControl::Register {
                id: entry.id,
                name: entry.name,
            })
            .await
            .map_err(|_| Error::NotConnected)
    }

    /// Remove a name from the refresh loop.
    pub async fn poll_deregister(&self, name: &str) -> Result<()> {
        let entry = self.lookup(name).await?;
        self.poll_tx
            .send(PollControl::Deregister { name: entry.name })
            .await
            .map_err(|_| Error::NotConnected)
    }

    /// Subscribe to the lifecycle and data event feed.
    ///
    /// Each receiver gets an independent copy of every event from the
    /// moment of subscription.
    pub fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.shared.event_tx.subscribe()
    }

    /// The last decoded value for `name`, with its decode timestamp.
    pub async fn cached(&self, name: &str) -> Option<(Value, Instant)> {
        self.shared
            .cache
            .lock()
            .await
            .get(name)
            .map(|c| (c.value.clone(), c.updated))
    }

    /// The manifest snapshot, or `None` after `close`.
    pub async fn manifest(&self) -> Option<Arc<Manifest>> {
        self.shared.manifest.lock().await.clone()
    }

    /// Whether the client is currently usable.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Tear down both sessions and reset all state.
    ///
    /// Pending reads are cancelled, the manifest and state cache are
    /// cleared, and [`ClientEvent::Closed`] is emitted exactly once.
    /// Calling `close` again is a no-op.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!("Closing client");

        self.shared.connected.store(false, Ordering::SeqCst);
        self.cancel.cancel();

        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            let abort = task.abort_handle();
            if tokio::time::timeout(SHUTDOWN_GRACE, task).await.is_err() {
                abort.abort();
            }
        }

        self.shared.manifest.lock().await.take();
        self.shared.cache.lock().await.clear();

        let _ = self.shared.event_tx.send(ClientEvent::Closed);
        tracing::debug!("Client closed");
    }

    /// Resolve a name against the manifest, checking connection state.
    async fn lookup(&self, name: &str) -> Result<ManifestEntry> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        let guard = self.shared.manifest.lock().await;
        let manifest = guard.as_ref().ok_or(Error::NotConnected)?;
        manifest
            .entry_by_name(name)
            .cloned()
            .ok_or_else(|| Error::UnknownCommand(name.to_string()))
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        // Stops the session tasks even if the embedder never called close.
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ifconnect_core::WireType;
    use ifconnect_test_harness::{announce_once, MockSimulator};

    async fn sim_with_catalog() -> MockSimulator {
        let sim = MockSimulator::start().await.unwrap();
        sim.insert_state(1, "aircraft/0/altitude_msl", Value::Float(3500.0))
            .await;
        sim.insert_state(2, "aircraft/0/on_ground", Value::Boolean(false))
            .await;
        sim.insert_state(7, "aircraft/0/callsign", Value::Text("NINJA".into()))
            .await;
        sim.insert_state(9, "aircraft/0/groundspeed", Value::Double(250.0))
            .await;
        sim.insert_state(11, "aircraft/0/heading", Value::Integer(270))
            .await;
        sim.insert_command(42, "commands/Autopilot.Engage").await;
        sim
    }

    fn config_for(sim: &MockSimulator) -> Config {
        Config {
            host: Some(Ipv4Addr::LOCALHOST),
            port: sim.port(),
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn connect_and_get_each_type() {
        let sim = sim_with_catalog().await;
        let client = Client::connect(config_for(&sim)).await.unwrap();

        assert!(client.is_connected());
        assert_eq!(client.manifest().await.unwrap().len(), 6);

        assert_eq!(
            client.get("aircraft/0/altitude_msl").await.unwrap(),
            Value::Float(3500.0)
        );
        assert_eq!(
            client.get("aircraft/0/on_ground").await.unwrap(),
            Value::Boolean(false)
        );
        assert_eq!(
            client.get("aircraft/0/callsign").await.unwrap(),
            Value::Text("NINJA".into())
        );
        assert_eq!(
            client.get("aircraft/0/groundspeed").await.unwrap(),
            Value::Double(250.0)
        );
        assert_eq!(
            client.get("aircraft/0/heading").await.unwrap(),
            Value::Integer(270)
        );

        // Every delivery lands in the cache.
        let (value, _) = client.cached("aircraft/0/callsign").await.unwrap();
        assert_eq!(value, Value::Text("NINJA".into()));

        client.close().await;
    }

    #[tokio::test]
    async fn get_unknown_name_fails_synchronously() {
        let sim = sim_with_catalog().await;
        let client = Client::connect(config_for(&sim)).await.unwrap();

        let result = client.get("aircraft/0/bogus").await;
        assert!(matches!(result, Err(Error::UnknownCommand(_))));

        // Connection state is untouched by caller errors.
        assert!(client.is_connected());
        assert_eq!(
            client.get("aircraft/0/heading").await.unwrap(),
            Value::Integer(270)
        );

        client.close().await;
    }

    #[tokio::test]
    async fn get_on_invokable_is_type_mismatch() {
        let sim = sim_with_catalog().await;
        let client = Client::connect(config_for(&sim)).await.unwrap();

        let result = client.get("commands/Autopilot.Engage").await;
        assert!(matches!(result, Err(Error::TypeMismatch(_))));

        client.close().await;
    }

    #[tokio::test]
    async fn set_reaches_the_peer_with_the_declared_type() {
        let sim = sim_with_catalog().await;
        let client = Client::connect(config_for(&sim)).await.unwrap();

        client
            .set("aircraft/0/callsign", Value::Text("N123AB".into()))
            .await
            .unwrap();
        client.set("aircraft/0/heading", 180i32).await.unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;

        let writes = sim.writes().await;
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].id, 7);
        assert_eq!(writes[0].value, Value::Text("N123AB".into()));
        assert_eq!(writes[1].id, 11);
        assert_eq!(writes[1].value, Value::Integer(180));

        client.close().await;
    }

    #[tokio::test]
    async fn set_with_wrong_type_is_rejected() {
        let sim = sim_with_catalog().await;
        let client = Client::connect(config_for(&sim)).await.unwrap();

        let result = client
            .set("aircraft/0/altitude_msl", Value::Text("high".into()))
            .await;
        assert!(matches!(result, Err(Error::TypeMismatch(_))));

        let result = client.set("commands/Autopilot.Engage", true).await;
        assert!(matches!(result, Err(Error::TypeMismatch(_))));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(sim.writes().await.is_empty());

        client.close().await;
    }

    #[tokio::test]
    async fn run_invokes_command_with_args() {
        let sim = sim_with_catalog().await;
        let client = Client::connect(config_for(&sim)).await.unwrap();

        client
            .run("commands/Autopilot.Engage", &[("x", "1")])
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;

        let invokes = sim.invokes().await;
        assert_eq!(invokes.len(), 1);
        assert_eq!(invokes[0].id, 42);
        assert_eq!(invokes[0].args, vec![("x".to_string(), "1".to_string())]);

        // run on typed state is rejected.
        let result = client.run("aircraft/0/heading", &[]).await;
        assert!(matches!(result, Err(Error::TypeMismatch(_))));

        client.close().await;
    }

    #[tokio::test]
    async fn poll_delivers_data_events_round_robin() {
        let sim = sim_with_catalog().await;
        let client = Client::connect(Config {
            // Keep the loop slow enough that the subscriber cannot lag.
            poll_throttle: Duration::from_millis(10),
            ..config_for(&sim)
        })
        .await
        .unwrap();
        let mut events = client.events();

        client.poll_register("aircraft/0/altitude_msl").await.unwrap();
        client.poll_register("aircraft/0/groundspeed").await.unwrap();
        // Registering again must not change the rotation.
        client.poll_register("aircraft/0/altitude_msl").await.unwrap();

        let mut altitude_seen = 0usize;
        let mut groundspeed_seen = 0usize;
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while altitude_seen < 3 || groundspeed_seen < 3 {
            let event = tokio::time::timeout_at(deadline, events.recv())
                .await
                .expect("poll events should keep arriving")
                .unwrap();
            if let ClientEvent::Data { name, value } = event {
                match name.as_str() {
                    "aircraft/0/altitude_msl" => {
                        assert_eq!(value, Value::Float(3500.0));
                        altitude_seen += 1;
                    }
                    "aircraft/0/groundspeed" => {
                        assert_eq!(value, Value::Double(250.0));
                        groundspeed_seen += 1;
                    }
                    other => panic!("unexpected polled name {other}"),
                }
            }
        }

        // The cache follows the poll loop.
        assert!(client.cached("aircraft/0/altitude_msl").await.is_some());
        assert!(client.cached("aircraft/0/groundspeed").await.is_some());

        client.close().await;
    }

    #[tokio::test]
    async fn poll_deregister_stops_deliveries_for_that_name() {
        let sim = sim_with_catalog().await;
        let client = Client::connect(Config {
            poll_throttle: Duration::from_millis(10),
            ..config_for(&sim)
        })
        .await
        .unwrap();

        client.poll_register("aircraft/0/altitude_msl").await.unwrap();
        client.poll_register("aircraft/0/groundspeed").await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        client.poll_deregister("aircraft/0/altitude_msl").await.unwrap();
        // Let any response already in flight for the removed name land
        // before subscribing.
        tokio::time::sleep(Duration::from_millis(100)).await;

        let mut events = client.events();
        tokio::time::sleep(Duration::from_millis(200)).await;
        let mut saw_groundspeed = false;
        loop {
            use tokio::sync::broadcast::error::TryRecvError;
            match events.try_recv() {
                Ok(ClientEvent::Data { name, .. }) => {
                    assert_eq!(name, "aircraft/0/groundspeed");
                    saw_groundspeed = true;
                }
                Ok(_) => {}
                Err(TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
        assert!(saw_groundspeed);

        client.close().await;
    }

    #[tokio::test]
    async fn poll_throttle_spaces_requests_out() {
        let sim = sim_with_catalog().await;
        let client = Client::connect(Config {
            poll_throttle: Duration::from_millis(100),
            ..config_for(&sim)
        })
        .await
        .unwrap();
        let mut events = client.events();

        client.poll_register("aircraft/0/altitude_msl").await.unwrap();

        // Count Data events over half a second; with a 100 ms throttle
        // there can be at most ~6.
        let deadline = tokio::time::Instant::now() + Duration::from_millis(550);
        let mut deliveries = 0usize;
        loop {
            match tokio::time::timeout_at(deadline, events.recv()).await {
                Ok(Ok(ClientEvent::Data { .. })) => deliveries += 1,
                Ok(Ok(_)) => {}
                Ok(Err(_)) | Err(_) => break,
            }
        }
        assert!(
            (1..=7).contains(&deliveries),
            "expected throttled delivery count, got {deliveries}"
        );

        client.close().await;
    }

    #[tokio::test]
    async fn reconnect_after_peer_drop() {
        let sim = sim_with_catalog().await;
        let client = Client::connect(config_for(&sim)).await.unwrap();
        let mut events = client.events();

        sim.disconnect_all();

        // Both sessions redial; watch for the lifecycle pair.
        let mut reconnecting = false;
        let mut reconnected = false;
        let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
        while !(reconnecting && reconnected) {
            let event = tokio::time::timeout_at(deadline, events.recv())
                .await
                .expect("reconnect events should arrive")
                .unwrap();
            match event {
                ClientEvent::Reconnecting { .. } => reconnecting = true,
                ClientEvent::Reconnected { .. } => reconnected = true,
                _ => {}
            }
        }

        // Give the other session a moment to settle, then reads work again.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(
            client.get("aircraft/0/heading").await.unwrap(),
            Value::Integer(270)
        );

        client.close().await;
    }

    #[tokio::test]
    async fn inflight_get_is_abandoned_on_reconnect() {
        let sim = sim_with_catalog().await;
        // An entry the simulator never answers keeps the read in flight.
        // Inserted before connect so it lands in the fetched manifest.
        sim.insert_silent(5, "aircraft/0/silent", WireType::Float)
            .await;
        let client = Arc::new(Client::connect(config_for(&sim)).await.unwrap());

        let pending = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.get("aircraft/0/silent").await })
        };
        tokio::time::sleep(Duration::from_millis(200)).await;

        sim.disconnect_all();

        let result = pending.await.unwrap();
        assert!(matches!(result, Err(Error::ConnectionLost)));

        // The session recovers and later reads succeed.
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(
            client.get("aircraft/0/heading").await.unwrap(),
            Value::Integer(270)
        );

        client.close().await;
    }

    #[tokio::test]
    async fn fatal_disconnect_without_reconnect() {
        let sim = sim_with_catalog().await;
        let client = Client::connect(Config {
            reconnect: false,
            ..config_for(&sim)
        })
        .await
        .unwrap();
        let mut events = client.events();

        let _ = client.get("aircraft/0/heading").await.unwrap();
        sim.disconnect_all();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let event = tokio::time::timeout_at(deadline, events.recv())
                .await
                .expect("Disconnected event should arrive")
                .unwrap();
            if matches!(event, ClientEvent::Disconnected) {
                break;
            }
        }

        assert!(!client.is_connected());
        let result = client.get("aircraft/0/heading").await;
        assert!(matches!(result, Err(Error::NotConnected)));

        client.close().await;
    }

    #[tokio::test]
    async fn read_timeout_surfaces_and_reconnects() {
        let sim = sim_with_catalog().await;
        sim.insert_silent(5, "aircraft/0/silent", WireType::Float)
            .await;
        let client = Client::connect(Config {
            read_timeout: Some(Duration::from_millis(150)),
            ..config_for(&sim)
        })
        .await
        .unwrap();
        let mut events = client.events();

        // The simulator never answers this read; the session times out,
        // reconnects, and the read is abandoned.
        let result = client.get("aircraft/0/silent").await;
        assert!(matches!(result, Err(Error::ConnectionLost)));

        let mut saw_timeout = false;
        let mut reconnected = false;
        let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
        while !(saw_timeout && reconnected) {
            let event = tokio::time::timeout_at(deadline, events.recv())
                .await
                .expect("timeout lifecycle events should arrive")
                .unwrap();
            match event {
                ClientEvent::ReadTimeout { session } => {
                    assert_eq!(session, SessionKind::Command);
                    saw_timeout = true;
                }
                ClientEvent::Reconnected { .. } => reconnected = true,
                _ => {}
            }
        }

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(
            client.get("aircraft/0/heading").await.unwrap(),
            Value::Integer(270)
        );

        client.close().await;
    }

    #[tokio::test]
    async fn close_resets_everything_exactly_once() {
        let sim = sim_with_catalog().await;
        let client = Client::connect(config_for(&sim)).await.unwrap();
        let mut events = client.events();

        let _ = client.get("aircraft/0/heading").await.unwrap();
        assert!(client.cached("aircraft/0/heading").await.is_some());

        client.close().await;
        client.close().await; // idempotent

        assert!(!client.is_connected());
        assert!(client.manifest().await.is_none());
        assert!(client.cached("aircraft/0/heading").await.is_none());
        assert!(matches!(
            client.get("aircraft/0/heading").await,
            Err(Error::NotConnected)
        ));
        assert!(matches!(
            client.set("aircraft/0/heading", 1i32).await,
            Err(Error::NotConnected)
        ));
        assert!(matches!(
            client.run("commands/Autopilot.Engage", &[]).await,
            Err(Error::NotConnected)
        ));

        let mut closed_count = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, ClientEvent::Closed) {
                closed_count += 1;
            }
        }
        assert_eq!(closed_count, 1);
    }

    #[tokio::test]
    async fn connect_via_discovery() {
        let sim = sim_with_catalog().await;

        // A free UDP port for the mock announcement.
        let probe = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let discovery_port = probe.local_addr().unwrap().port();
        drop(probe);

        let announcer = tokio::spawn(async move {
            for _ in 0..10 {
                tokio::time::sleep(Duration::from_millis(50)).await;
                let _ = announce_once(discovery_port, &["127.0.0.1"], DEFAULT_PORT).await;
            }
        });

        let client = Client::connect(Config {
            host: None,
            port: sim.port(),
            discovery_port,
            discovery_timeout: Duration::from_secs(2),
            ..Config::default()
        })
        .await
        .unwrap();

        assert_eq!(
            client.get("aircraft/0/heading").await.unwrap(),
            Value::Integer(270)
        );

        announcer.abort();
        client.close().await;
    }

    #[tokio::test]
    async fn connect_fails_when_nothing_listens() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = Client::connect(Config {
            host: Some(Ipv4Addr::LOCALHOST),
            port,
            ..Config::default()
        })
        .await;
        assert!(matches!(result, Err(Error::Manifest(_))));
    }

    #[tokio::test]
    async fn duplicate_gets_yield_two_deliveries() {
        let sim = sim_with_catalog().await;
        let client = Arc::new(Client::connect(config_for(&sim)).await.unwrap());

        // No duplicate suppression on the command queue: both resolve.
        let a = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.get("aircraft/0/heading").await })
        };
        let b = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.get("aircraft/0/heading").await })
        };

        assert_eq!(a.await.unwrap().unwrap(), Value::Integer(270));
        assert_eq!(b.await.unwrap().unwrap(), Value::Integer(270));

        client.close().await;
    }
}
