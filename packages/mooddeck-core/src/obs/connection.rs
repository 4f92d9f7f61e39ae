//! OBS connection lifecycle management.
//!
//! The manager owns exactly one session slot and the reconnect policy
//! around it:
//!
//! - Connect attempts run the Identify handshake; an auth rejection with a
//!   configured password is retried once without it before giving up.
//! - Attempts carry a generation. A dial overtaken mid-handshake by a
//!   newer connect or disconnect closes its socket instead of installing
//!   it, so the slot never leaks a second live session.
//! - Lost sessions arm a fixed-delay reconnect timer. The timer never
//!   stacks; scheduling while armed is a no-op.
//! - Authentication failure parks the manager until the user reconnects
//!   with new credentials.
//!
//! After a session is installed the manager waits a settle period, then
//! runs the registered [`ConnectedHook`]s (source discovery lives there).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{BridgeError, BridgeResult, ObsError};
use crate::events::{ConnectionEvent, EventEmitter};
use crate::obs::client::SocketHandle;
use crate::obs::protocol::subscription;
use crate::obs::socket::{ConnectOptions, ObsSocket};
use crate::obs::types::ObsEvent;
use crate::runtime::{TaskSpawner, TokioSpawner};
use crate::state::{BridgeConfig, ConnectParams, ConnectionStatus, ObsState};
use crate::utils::now_millis;

/// Work to run once a session is identified and settled.
#[async_trait]
pub trait ConnectedHook: Send + Sync {
    async fn on_connected(&self);
}

// ─────────────────────────────────────────────────────────────────────────────
// Reconnect Timer
// ─────────────────────────────────────────────────────────────────────────────

/// Single-slot reconnect timer with a fixed delay.
///
/// `arm` is a no-op while an attempt is pending, so repeated disconnect
/// signals cannot stack timers. `cancel` aborts a pending attempt and
/// replaces the token so the timer can be armed again later.
pub(crate) struct ReconnectTimer {
    armed: AtomicBool,
    delay_ms: u64,
    token: RwLock<CancellationToken>,
}

impl ReconnectTimer {
    pub(crate) fn new(delay_ms: u64) -> Self {
        Self {
            armed: AtomicBool::new(false),
            delay_ms,
            token: RwLock::new(CancellationToken::new()),
        }
    }

    /// Arms the timer unless one is already pending. Returns true when
    /// this call armed it.
    pub(crate) fn arm<S, F, Fut>(self: &Arc<Self>, spawner: &S, attempt: F) -> bool
    where
        S: TaskSpawner,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        if self.armed.swap(true, Ordering::SeqCst) {
            return false;
        }

        let token = self.token.read().clone();
        let timer = Arc::clone(self);
        let delay = Duration::from_millis(self.delay_ms);
        spawner.spawn(async move {
            tokio::select! {
                // cancel() already reset the armed flag
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    timer.armed.store(false, Ordering::SeqCst);
                    attempt().await;
                }
            }
        });
        true
    }

    /// Cancels a pending attempt, keeping the timer reusable.
    pub(crate) fn cancel(&self) {
        let mut guard = self.token.write();
        guard.cancel();
        *guard = CancellationToken::new();
        self.armed.store(false, Ordering::SeqCst);
    }

    #[cfg(test)]
    pub(crate) fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Connection Manager
// ─────────────────────────────────────────────────────────────────────────────

/// Owns the OBS session slot and its reconnect policy.
pub struct ObsConnectionManager {
    config: Arc<RwLock<BridgeConfig>>,
    state: Arc<ObsState>,
    socket: SocketHandle,
    event_tx: mpsc::Sender<ObsEvent>,
    emitter: Arc<dyn EventEmitter>,
    hooks: RwLock<Vec<Arc<dyn ConnectedHook>>>,
    reconnect: Arc<ReconnectTimer>,
    shutdown: CancellationToken,
    spawner: TokioSpawner,
    /// Effective host/port/password of the current attempt, reused by
    /// reconnects.
    current: RwLock<Option<(String, u16, String)>>,
    /// Attempt generation, bumped by connect and disconnect under the
    /// slot lock. A dial may only install the session carrying the
    /// current value.
    epoch: AtomicU64,
}

impl ObsConnectionManager {
    /// Creates a manager over the shared session slot.
    pub fn new(
        config: Arc<RwLock<BridgeConfig>>,
        state: Arc<ObsState>,
        socket: SocketHandle,
        event_tx: mpsc::Sender<ObsEvent>,
        emitter: Arc<dyn EventEmitter>,
        spawner: TokioSpawner,
    ) -> Self {
        let delay_ms = config.read().reconnect_delay_ms;
        Self {
            config,
            state,
            socket,
            event_tx,
            emitter,
            hooks: RwLock::new(Vec::new()),
            reconnect: Arc::new(ReconnectTimer::new(delay_ms)),
            shutdown: CancellationToken::new(),
            spawner,
            current: RwLock::new(None),
            epoch: AtomicU64::new(0),
        }
    }

    /// Registers work to run after each successful (settled) connect.
    pub fn register_connected_hook(&self, hook: Arc<dyn ConnectedHook>) {
        self.hooks.write().push(hook);
    }

    /// Connects with the given parameters, falling back to config values.
    ///
    /// Supersedes any pending reconnect attempt and any dial still in
    /// flight. On failure the reconnect timer is armed unless
    /// authentication was rejected.
    pub async fn connect(self: &Arc<Self>, params: ConnectParams) -> BridgeResult<()> {
        let (host, port, password) = params.resolve(&self.config.read());
        self.reconnect.cancel();
        *self.current.write() = Some((host.clone(), port, password.clone()));

        // Bump and take under one lock: a dial from before this call can
        // neither keep the slot nor install into it later
        let (epoch, previous) = {
            let mut guard = self.socket.write();
            let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
            (epoch, guard.take())
        };
        if let Some(previous) = previous {
            previous.close().await;
        }

        self.dial(epoch, host, port, password).await
    }

    /// Disconnects and stops any pending reconnect. A dial still in
    /// flight is superseded and cannot install its session.
    pub async fn disconnect(&self) {
        self.reconnect.cancel();
        let socket = {
            let mut guard = self.socket.write();
            self.epoch.fetch_add(1, Ordering::SeqCst);
            guard.take()
        };
        if let Some(socket) = socket {
            socket.close().await;
        }
        self.state.clear_sources();
        self.set_status(ConnectionStatus::Disconnected, None);
    }

    /// Current connection status.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.state.status()
    }

    /// Stops reconnects and closes the session for process shutdown.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.disconnect().await;
    }

    async fn dial(
        self: &Arc<Self>,
        epoch: u64,
        host: String,
        port: u16,
        password: String,
    ) -> BridgeResult<()> {
        if self.is_stale(epoch) {
            return Err(superseded());
        }
        self.set_status(ConnectionStatus::Connecting, None);

        let options = ConnectOptions {
            host: host.clone(),
            port,
            password: password.clone(),
            event_subscriptions: subscription::bridge_default(),
            request_timeout: Duration::from_millis(self.config.read().request_timeout_ms),
        };

        let result = ObsSocket::connect(&options, self.event_tx.clone(), &self.spawner).await;
        let result = match result {
            // A stale password against a server with auth disabled is the
            // common misconfiguration; one password-less attempt covers it
            Err(ObsError::AuthFailed) if !password.is_empty() => {
                log::warn!("[ObsConnection] Authentication failed, retrying without password");
                let retry = ConnectOptions {
                    password: String::new(),
                    ..options
                };
                ObsSocket::connect(&retry, self.event_tx.clone(), &self.spawner).await
            }
            other => other,
        };

        // A connect or disconnect issued during the handshake owns the
        // slot now; this result must not install, change status, or arm
        // a reconnect
        if self.is_stale(epoch) {
            if let Ok(socket) = result {
                socket.close().await;
            }
            log::info!(
                "[ObsConnection] Dropping superseded attempt to {}:{}",
                host,
                port
            );
            return Err(superseded());
        }

        match result {
            Ok(socket) => {
                if self.install_session(epoch, socket).await {
                    Ok(())
                } else {
                    Err(superseded())
                }
            }
            Err(ObsError::AuthFailed) => {
                log::error!("[ObsConnection] Authentication failed for {}:{}", host, port);
                self.set_status(ConnectionStatus::AuthFailed, Some("authentication failed"));
                Err(ObsError::AuthFailed.into())
            }
            Err(e) => {
                log::warn!("[ObsConnection] Connect to {}:{} failed: {}", host, port, e);
                self.set_status(ConnectionStatus::Reconnecting, Some(&e.to_string()));
                self.schedule_reconnect();
                Err(e.into())
            }
        }
    }

    /// Installs an identified session into the slot.
    ///
    /// The generation is re-checked under the slot lock: a stale session
    /// is closed and refused, a same-generation occupant is displaced and
    /// closed. Returns whether the session was installed.
    async fn install_session(self: &Arc<Self>, epoch: u64, socket: Arc<ObsSocket>) -> bool {
        // None: stale, refuse; Some(previous): installed over previous
        let installed = {
            let mut guard = self.socket.write();
            if self.epoch.load(Ordering::SeqCst) == epoch {
                Some(guard.replace(Arc::clone(&socket)))
            } else {
                None
            }
        };
        let Some(displaced) = installed else {
            log::info!("[ObsConnection] Discarding session from a superseded attempt");
            socket.close().await;
            return false;
        };
        if let Some(displaced) = displaced {
            log::warn!("[ObsConnection] Closing a displaced session");
            displaced.close().await;
        }

        self.set_status(ConnectionStatus::Connected, None);

        // Close watcher: turns a lost session into a reconnect cycle
        let manager = Arc::clone(self);
        let watched = Arc::clone(&socket);
        self.spawner.spawn(async move {
            watched.closed().cancelled().await;
            manager.handle_disconnect(&watched);
        });

        // Discovery after the settle delay, unless the session dies first
        let manager = Arc::clone(self);
        let settle = Duration::from_millis(self.config.read().connect_settle_ms);
        self.spawner.spawn(async move {
            tokio::select! {
                _ = socket.closed().cancelled() => return,
                _ = manager.shutdown.cancelled() => return,
                _ = tokio::time::sleep(settle) => {}
            }
            manager.run_connected_hooks().await;
        });
        true
    }

    fn is_stale(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) != epoch
    }

    /// Reacts to a session ending that the manager didn't initiate.
    fn handle_disconnect(self: &Arc<Self>, socket: &Arc<ObsSocket>) {
        {
            let mut guard = self.socket.write();
            match guard.as_ref() {
                Some(current) if Arc::ptr_eq(current, socket) => {
                    guard.take();
                }
                // Superseded or already cleared by disconnect()
                _ => return,
            }
        }
        if self.shutdown.is_cancelled() {
            return;
        }

        self.state.clear_sources();
        let detail = socket.close_reason();
        log::warn!(
            "[ObsConnection] Session lost: {}",
            detail.as_deref().unwrap_or("unknown reason")
        );
        self.set_status(ConnectionStatus::Reconnecting, detail.as_deref());
        self.schedule_reconnect();
    }

    fn schedule_reconnect(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        let armed = self
            .reconnect
            .arm(&self.spawner, move || async move {
                manager.try_reconnect().await;
            });

        if armed {
            log::info!(
                "[ObsConnection] Reconnecting in {}ms",
                self.config.read().reconnect_delay_ms
            );
        } else {
            log::debug!("[ObsConnection] Reconnect already scheduled");
        }
    }

    async fn try_reconnect(self: &Arc<Self>) {
        if self.shutdown.is_cancelled() {
            return;
        }
        // disconnect() or a successful manual connect ends the cycle
        if self.state.status() != ConnectionStatus::Reconnecting {
            log::debug!("[ObsConnection] Skipping reconnect, no longer pending");
            return;
        }
        let epoch = self.epoch.load(Ordering::SeqCst);
        let Some((host, port, password)) = self.current.read().clone() else {
            return;
        };

        log::info!("[ObsConnection] Reconnect attempt to {}:{}", host, port);
        if let Err(e) = self.dial(epoch, host, port, password).await {
            // dial armed the next attempt, parked on auth failure, or
            // lost the slot to a newer connect
            log::debug!("[ObsConnection] Reconnect attempt failed: {}", e);
        }
    }

    async fn run_connected_hooks(&self) {
        let hooks: Vec<_> = self.hooks.read().clone();
        for hook in hooks {
            hook.on_connected().await;
        }
    }

    /// Emits a StateChanged event when the status actually changes.
    fn set_status(&self, status: ConnectionStatus, detail: Option<&str>) {
        let previous = self.state.set_status(status);
        if previous == status {
            return;
        }

        let (host, port) = self.endpoint();
        log::info!("[ObsConnection] {:?} -> {:?}", previous, status);
        self.emitter.emit_connection(ConnectionEvent::StateChanged {
            status,
            host,
            port,
            detail: detail.map(str::to_string),
            timestamp: now_millis(),
        });
    }

    fn endpoint(&self) -> (String, u16) {
        if let Some((host, port, _)) = self.current.read().as_ref() {
            (host.clone(), *port)
        } else {
            let config = self.config.read();
            (config.obs_host.clone(), config.obs_port)
        }
    }
}

/// Error for an attempt overtaken by a newer connect or disconnect.
fn superseded() -> BridgeError {
    ObsError::Closed("superseded by a newer connection attempt".to_string()).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{AudioEvent, DisplayEvent, MidiEvent};
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicU32;

    struct Recorder(Mutex<Vec<ConnectionEvent>>);

    impl EventEmitter for Recorder {
        fn emit_midi(&self, _event: MidiEvent) {}
        fn emit_connection(&self, event: ConnectionEvent) {
            self.0.lock().push(event);
        }
        fn emit_audio(&self, _event: AudioEvent) {}
        fn emit_display(&self, _event: DisplayEvent) {}
    }

    fn manager(recorder: &Arc<Recorder>) -> Arc<ObsConnectionManager> {
        let (event_tx, _event_rx) = mpsc::channel(8);
        Arc::new(ObsConnectionManager::new(
            Arc::new(RwLock::new(BridgeConfig::default())),
            Arc::new(ObsState::default()),
            Arc::new(RwLock::new(None)),
            event_tx,
            recorder.clone(),
            TokioSpawner::current(),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn timer_fires_once_after_the_delay() {
        let fired = Arc::new(AtomicU32::new(0));
        let timer = Arc::new(ReconnectTimer::new(5000));

        let counter = fired.clone();
        assert!(timer.arm(&TokioSpawner::current(), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        tokio::time::sleep(Duration::from_millis(4999)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn arming_while_pending_does_not_stack() {
        let fired = Arc::new(AtomicU32::new(0));
        let timer = Arc::new(ReconnectTimer::new(5000));

        for _ in 0..3 {
            let counter = fired.clone();
            timer.arm(&TokioSpawner::current(), move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert!(timer.is_armed());

        tokio::time::sleep(Duration::from_millis(5100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // The slot is free again after firing
        let counter = fired.clone();
        assert!(timer.arm(&TokioSpawner::current(), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        tokio::time::sleep(Duration::from_millis(5100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_aborts_the_pending_attempt() {
        let fired = Arc::new(AtomicU32::new(0));
        let timer = Arc::new(ReconnectTimer::new(5000));

        let counter = fired.clone();
        timer.arm(&TokioSpawner::current(), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        timer.cancel();
        assert!(!timer.is_armed());

        tokio::time::sleep(Duration::from_millis(6000)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn status_changes_emit_once() {
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let manager = manager(&recorder);

        manager.set_status(ConnectionStatus::Connecting, None);
        manager.set_status(ConnectionStatus::Connecting, None);
        manager.set_status(ConnectionStatus::Connected, None);

        let events = recorder.0.lock();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[0],
            ConnectionEvent::StateChanged {
                status: ConnectionStatus::Connecting,
                ..
            }
        ));
        assert!(matches!(
            events[1],
            ConnectionEvent::StateChanged {
                status: ConnectionStatus::Connected,
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_attempt_skips_when_no_longer_pending() {
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let manager = manager(&recorder);

        // Armed while in Reconnecting, then the user disconnects
        manager.set_status(ConnectionStatus::Reconnecting, Some("lost"));
        manager.schedule_reconnect();
        manager.disconnect().await;
        assert!(!manager.reconnect.is_armed());

        tokio::time::sleep(Duration::from_millis(6000)).await;
        // No Connecting transition ever happened
        let events = recorder.0.lock();
        assert!(!events.iter().any(|e| matches!(
            e,
            ConnectionEvent::StateChanged {
                status: ConnectionStatus::Connecting,
                ..
            }
        )));
    }

    #[tokio::test]
    async fn disconnect_clears_mirrored_state() {
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let manager = manager(&recorder);

        manager
            .state
            .sync_audio_sources(vec![crate::state::AudioSourceRecord::new(
                "Music".into(),
                "pulse".into(),
                -5.0,
                false,
            )]);
        manager.set_status(ConnectionStatus::Connected, None);

        manager.disconnect().await;
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
        assert!(manager.state.audio_sources.is_empty());
    }

    /// Minimal scripted obs-websocket endpoint. Serves Hello, waits for
    /// the Identify, answers Identified after the per-session delay, then
    /// holds the session open until the peer ends it.
    struct ScriptedObs {
        port: u16,
        identified: Arc<AtomicU32>,
        closed: Arc<AtomicU32>,
    }

    impl ScriptedObs {
        async fn start(identified_delays_ms: Vec<u64>) -> Self {
            use futures::{SinkExt, StreamExt};
            use tokio_tungstenite::tungstenite::Message;

            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let port = listener.local_addr().unwrap().port();
            let identified = Arc::new(AtomicU32::new(0));
            let closed = Arc::new(AtomicU32::new(0));

            let identified_count = identified.clone();
            let closed_count = closed.clone();
            tokio::spawn(async move {
                let mut session = 0;
                loop {
                    let Ok((stream, _)) = listener.accept().await else {
                        break;
                    };
                    let delay = identified_delays_ms.get(session).copied().unwrap_or(0);
                    session += 1;
                    let identified = identified_count.clone();
                    let closed = closed_count.clone();
                    tokio::spawn(async move {
                        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                        ws.send(Message::text(
                            r#"{"op":0,"d":{"obsWebSocketVersion":"5.3.3","rpcVersion":1}}"#,
                        ))
                        .await
                        .unwrap();
                        while let Some(Ok(frame)) = ws.next().await {
                            if frame.is_text() {
                                break;
                            }
                        }
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                        if ws
                            .send(Message::text(r#"{"op":2,"d":{"negotiatedRpcVersion":1}}"#))
                            .await
                            .is_err()
                        {
                            return;
                        }
                        identified.fetch_add(1, Ordering::SeqCst);
                        while let Some(Ok(frame)) = ws.next().await {
                            if frame.is_close() {
                                break;
                            }
                        }
                        closed.fetch_add(1, Ordering::SeqCst);
                    });
                }
            });

            Self {
                port,
                identified,
                closed,
            }
        }

        fn params(&self) -> ConnectParams {
            ConnectParams {
                host: Some("127.0.0.1".to_string()),
                port: Some(self.port),
                password: None,
            }
        }
    }

    async fn wait_for(counter: &Arc<AtomicU32>, expected: u32) -> bool {
        for _ in 0..100 {
            if counter.load(Ordering::SeqCst) >= expected {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn connect_during_inflight_dial_closes_the_superseded_session() {
        let slow = ScriptedObs::start(vec![400]).await;
        let fast = ScriptedObs::start(vec![0]).await;
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let manager = manager(&recorder);

        let first = {
            let manager = Arc::clone(&manager);
            let params = slow.params();
            tokio::spawn(async move { manager.connect(params).await })
        };
        // Let the first dial stall on its delayed Identified
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(manager.connect(fast.params()).await.is_ok());
        assert_eq!(manager.status(), ConnectionStatus::Connected);

        // The stalled handshake still completes but must not install
        assert!(first.await.unwrap().is_err());
        assert!(
            wait_for(&slow.closed, 1).await,
            "superseded session was never closed"
        );
        assert_eq!(slow.identified.load(Ordering::SeqCst), 1);

        // The session from the newer parameters is the one that survives
        assert_eq!(fast.closed.load(Ordering::SeqCst), 0);
        assert_eq!(manager.status(), ConnectionStatus::Connected);
        assert!(!manager.reconnect.is_armed());
    }

    #[tokio::test]
    async fn disconnect_refuses_a_dial_still_in_flight() {
        let server = ScriptedObs::start(vec![300]).await;
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let manager = manager(&recorder);

        let pending = {
            let manager = Arc::clone(&manager);
            let params = server.params();
            tokio::spawn(async move { manager.connect(params).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        manager.disconnect().await;

        assert!(pending.await.unwrap().is_err());
        assert!(
            wait_for(&server.closed, 1).await,
            "orphaned session was never closed"
        );
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
        assert!(manager.socket.read().is_none());
        assert!(!manager.reconnect.is_armed());
    }
}
