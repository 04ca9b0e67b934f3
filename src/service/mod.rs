// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Chat connection service.
//!
//! [`ChatService`] runs at most one worker at a time: an accept worker while
//! listening, a connect worker while dialing, or a session worker while
//! connected. Each worker is a tokio task that reports back through a
//! [`Reporter`] stamped with the generation it was spawned under. Every
//! `start`, `connect`, `stop` and every established connection bumps the
//! generation, so a report from a worker that has since been replaced is
//! dropped on arrival.
//!
//! Two locks guard the service. `shared` holds state, generation and the
//! current worker and is never held while calling the sink. `delivery` is
//! re-entrant and is held for the whole of an operation including its event
//! delivery; it serializes deliveries against transitions so that once
//! `stop()` returns no event from the old session can reach the sink, while
//! still letting a sink call back into the service from `on_event`.

mod accept;
mod connect;
mod session;

use parking_lot::{Mutex, ReentrantMutex, RwLock};
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ServiceConfig;
use crate::error::ChatError;
use crate::events::{ChatEvent, EventSink};
use crate::state::{ConnectionState, StateCell};
use crate::transport::{Adapter, BoxTransport, PeerIdentity};

use accept::AcceptWorker;
use connect::ConnectWorker;
use session::{SessionHandle, SessionWorker};

/// The worker currently owned by the service.
enum Worker {
    Idle,
    Accepting(JoinHandle<()>),
    Connecting(JoinHandle<()>),
    Session(SessionHandle),
}

impl Worker {
    /// Cancel the worker and hand back its task so the next worker can
    /// wait for its resources to be released.
    fn retire(&mut self) -> Option<JoinHandle<()>> {
        match std::mem::replace(self, Worker::Idle) {
            Worker::Idle => None,
            Worker::Accepting(task) | Worker::Connecting(task) => {
                task.abort();
                Some(task)
            }
            Worker::Session(session) => Some(session.abort()),
        }
    }
}

struct Shared {
    state: ConnectionState,
    generation: u64,
    worker: Worker,
}

struct Inner {
    adapter: Arc<dyn Adapter>,
    sink: RwLock<Arc<dyn EventSink>>,
    config: ServiceConfig,
    runtime: Handle,
    delivery: ReentrantMutex<()>,
    shared: Mutex<Shared>,
    state: StateCell,
}

/// Connection manager for a two-peer chat.
///
/// Cheap to clone; clones share the same state. All operations return
/// without waiting on the transport; outcomes arrive as [`ChatEvent`]s.
#[derive(Clone)]
pub struct ChatService {
    inner: Arc<Inner>,
}

impl ChatService {
    /// Create a service on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn new(
        adapter: Arc<dyn Adapter>,
        sink: Arc<dyn EventSink>,
        config: ServiceConfig,
    ) -> Self {
        Self::with_runtime(Handle::current(), adapter, sink, config)
    }

    /// Create a service whose workers run on `runtime`.
    ///
    /// Operations may then be called from threads outside the runtime.
    pub fn with_runtime(
        runtime: Handle,
        adapter: Arc<dyn Adapter>,
        sink: Arc<dyn EventSink>,
        config: ServiceConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                adapter,
                sink: RwLock::new(sink),
                config,
                runtime,
                delivery: ReentrantMutex::new(()),
                shared: Mutex::new(Shared {
                    state: ConnectionState::None,
                    generation: 0,
                    worker: Worker::Idle,
                }),
                state: StateCell::default(),
            }),
        }
    }

    /// Replace the event sink. Later events go to `sink` only.
    pub fn register_sink(&self, sink: Arc<dyn EventSink>) {
        *self.inner.sink.write() = sink;
    }

    /// Start listening for an inbound connection.
    ///
    /// Does nothing while already listening or connected. A dial in
    /// progress is cancelled.
    pub fn start(&self) {
        self.inner.start();
    }

    /// Dial `peer`, cancelling whatever the service was doing.
    pub fn connect(&self, peer: PeerIdentity) {
        self.inner.connect(peer);
    }

    /// Queue `payload` for the connected peer.
    ///
    /// Returns whether the payload was queued. When no session is up, a
    /// `Notice` is emitted instead and nothing touches the transport.
    /// Empty payloads are ignored.
    pub fn send(&self, payload: impl Into<Vec<u8>>) -> bool {
        self.inner.send(payload.into())
    }

    /// Snapshot of the current state. Never blocks.
    pub fn current_state(&self) -> ConnectionState {
        self.inner.state.get()
    }

    /// Peer of the live session, if any.
    pub fn connected_peer(&self) -> Option<PeerIdentity> {
        match &self.inner.shared.lock().worker {
            Worker::Session(session) => Some(session.peer().clone()),
            _ => None,
        }
    }

    /// Cancel all workers, drop the session and return to `None`.
    pub fn stop(&self) {
        // The aborted task winds down on the runtime by itself.
        let _ = self.inner.stop();
    }

    /// Like [`stop`](Self::stop), then wait until the cancelled worker has
    /// released its transport or listening socket.
    pub async fn shutdown(&self) {
        if let Some(task) = self.inner.stop() {
            let _ = task.await;
        }
    }
}

impl Inner {
    fn emit(&self, event: ChatEvent) {
        let sink = self.sink.read().clone();
        sink.on_event(event);
    }

    fn set_state(&self, shared: &mut Shared, state: ConnectionState) -> bool {
        let changed = shared.state != state;
        shared.state = state;
        self.state.set(state);
        changed
    }

    fn is_current(&self, generation: u64) -> bool {
        self.shared.lock().generation == generation
    }

    fn reporter(self: &Arc<Self>, generation: u64, role: ConnectionState) -> Reporter {
        Reporter {
            inner: Arc::downgrade(self),
            generation,
            role,
        }
    }

    fn spawn_accept(
        self: &Arc<Self>,
        generation: u64,
        retired: Option<JoinHandle<()>>,
    ) -> JoinHandle<()> {
        let worker = AcceptWorker::new(
            self.adapter.clone(),
            self.reporter(generation, ConnectionState::Listen),
            retired,
            &self.config,
        );
        self.runtime.spawn(worker.run())
    }

    fn start(self: &Arc<Self>) {
        let _delivery = self.delivery.lock();
        let mut shared = self.shared.lock();

        if matches!(
            shared.state,
            ConnectionState::Listen | ConnectionState::Connected
        ) {
            debug!("start() ignored while {}", shared.state);
            return;
        }

        let retired = shared.worker.retire();
        shared.generation += 1;
        shared.worker = Worker::Accepting(self.spawn_accept(shared.generation, retired));
        self.set_state(&mut shared, ConnectionState::Listen);
        drop(shared);

        info!("Listening for connections");
        self.emit(ChatEvent::StateChanged(ConnectionState::Listen));
    }

    fn connect(self: &Arc<Self>, peer: PeerIdentity) {
        let _delivery = self.delivery.lock();
        let mut shared = self.shared.lock();

        let retired = shared.worker.retire();
        shared.generation += 1;
        let worker = ConnectWorker::new(
            self.adapter.clone(),
            peer.clone(),
            self.reporter(shared.generation, ConnectionState::Connecting),
            retired,
            &self.config,
        );
        shared.worker = Worker::Connecting(self.runtime.spawn(worker.run()));
        let changed = self.set_state(&mut shared, ConnectionState::Connecting);
        drop(shared);

        info!("Connecting to {}", peer);
        if changed {
            self.emit(ChatEvent::StateChanged(ConnectionState::Connecting));
        }
    }

    fn send(&self, payload: Vec<u8>) -> bool {
        if payload.is_empty() {
            debug!("Ignoring empty payload");
            return false;
        }

        let _delivery = self.delivery.lock();
        let shared = self.shared.lock();
        let result = match &shared.worker {
            Worker::Session(session) if shared.state == ConnectionState::Connected => {
                session.enqueue(payload)
            }
            _ => Err(ChatError::not_connected()),
        };
        drop(shared);

        match result {
            Ok(()) => true,
            Err(e) => {
                warn!("Send rejected: {}", e);
                self.emit(ChatEvent::Notice(e.to_string()));
                false
            }
        }
    }

    fn stop(&self) -> Option<JoinHandle<()>> {
        let _delivery = self.delivery.lock();
        let mut shared = self.shared.lock();

        shared.generation += 1;
        let retired = shared.worker.retire();
        let changed = self.set_state(&mut shared, ConnectionState::None);
        drop(shared);

        if changed {
            info!("Chat service stopped");
            self.emit(ChatEvent::StateChanged(ConnectionState::None));
        }
        retired
    }

    /// An accept or connect worker produced a transport.
    fn on_established(
        self: &Arc<Self>,
        generation: u64,
        expected: ConnectionState,
        transport: BoxTransport,
        peer: PeerIdentity,
    ) {
        let _delivery = self.delivery.lock();
        let mut shared = self.shared.lock();

        if shared.generation != generation || shared.state != expected {
            debug!("Closing stale connection with {}", peer);
            return;
        }

        // The caller is the worker task itself; it exits right after this
        // returns, so its handle is dropped rather than aborted.
        shared.worker = Worker::Idle;
        shared.generation += 1;
        let session = SessionWorker::spawn(
            &self.runtime,
            transport,
            peer.clone(),
            self.reporter(shared.generation, ConnectionState::Connected),
            &self.config,
        );
        shared.worker = Worker::Session(session);
        self.set_state(&mut shared, ConnectionState::Connected);
        let session_generation = shared.generation;
        drop(shared);

        info!("Connected to {}", peer);
        self.emit(ChatEvent::StateChanged(ConnectionState::Connected));
        if self.is_current(session_generation) {
            self.emit(ChatEvent::DeviceIdentified(peer));
        }
    }

    /// An accept or connect worker gave up.
    fn on_attempt_failed(&self, generation: u64, expected: ConnectionState, err: ChatError) {
        let _delivery = self.delivery.lock();
        let mut shared = self.shared.lock();

        if shared.generation != generation || shared.state != expected {
            debug!("Ignoring stale failure: {}", err);
            return;
        }

        shared.worker = Worker::Idle;
        let changed = self.set_state(&mut shared, ConnectionState::None);
        drop(shared);

        warn!("{}", err);
        if changed {
            self.emit(ChatEvent::StateChanged(ConnectionState::None));
        }
        // The notice belongs to the transition above, so it goes out even
        // if the sink has already moved the service on.
        self.emit(ChatEvent::Notice(err.to_string()));
    }

    /// The session worker stopped on its own.
    fn on_session_ended(self: &Arc<Self>, generation: u64, reason: ChatError) {
        let _delivery = self.delivery.lock();
        let mut shared = self.shared.lock();

        if shared.generation != generation || shared.state != ConnectionState::Connected {
            debug!("Ignoring end of stale session: {}", reason);
            return;
        }

        // Not aborted: the session task is already on its way out and the
        // accept worker waits for it to finish closing the transport.
        let finished = match std::mem::replace(&mut shared.worker, Worker::Idle) {
            Worker::Session(session) => Some(session.into_task()),
            _ => None,
        };
        shared.generation += 1;

        let next = if self.config.resume_listen_on_disconnect {
            shared.worker = Worker::Accepting(self.spawn_accept(shared.generation, finished));
            ConnectionState::Listen
        } else {
            ConnectionState::None
        };
        self.set_state(&mut shared, next);
        drop(shared);

        warn!("Session ended: {}", reason);
        self.emit(ChatEvent::StateChanged(next));
        self.emit(ChatEvent::Notice(reason.to_string()));
    }

    /// Deliver a data event from the session of `generation`.
    ///
    /// Returns `false` once that session has been superseded.
    fn deliver_data(&self, generation: u64, event: ChatEvent) -> bool {
        let _delivery = self.delivery.lock();
        {
            let shared = self.shared.lock();
            if shared.generation != generation || shared.state != ConnectionState::Connected {
                return false;
            }
        }
        self.emit(event);
        true
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let _ = self.shared.get_mut().worker.retire();
    }
}

/// A worker's only line back to the service.
///
/// Holds a weak reference: once the service is gone every report is a
/// no-op and the worker winds down.
#[derive(Clone)]
pub(crate) struct Reporter {
    inner: Weak<Inner>,
    generation: u64,
    role: ConnectionState,
}

impl Reporter {
    /// Whether the worker still belongs to the live generation.
    pub(crate) fn is_current(&self) -> bool {
        self.inner
            .upgrade()
            .map(|inner| inner.is_current(self.generation))
            .unwrap_or(false)
    }

    /// Hand over an accepted or dialed transport. Stale transports are
    /// dropped, which closes them.
    pub(crate) fn established(&self, transport: BoxTransport, peer: PeerIdentity) {
        if let Some(inner) = self.inner.upgrade() {
            inner.on_established(self.generation, self.role, transport, peer);
        }
    }

    pub(crate) fn attempt_failed(&self, err: ChatError) {
        if let Some(inner) = self.inner.upgrade() {
            inner.on_attempt_failed(self.generation, self.role, err);
        }
    }

    pub(crate) fn data_received(&self, data: Vec<u8>) -> bool {
        self.deliver(ChatEvent::DataReceived(data))
    }

    pub(crate) fn data_sent(&self, data: Vec<u8>) -> bool {
        self.deliver(ChatEvent::DataSent(data))
    }

    pub(crate) fn session_ended(&self, reason: ChatError) {
        if let Some(inner) = self.inner.upgrade() {
            inner.on_session_ended(self.generation, reason);
        }
    }

    fn deliver(&self, event: ChatEvent) -> bool {
        match self.inner.upgrade() {
            Some(inner) => inner.deliver_data(self.generation, event),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{Acceptor, MemoryNetwork};
    use futures::future::{BoxFuture, FutureExt};
    use std::collections::VecDeque;
    use std::io;
    use std::time::Duration;
    use tokio::sync::mpsc;

    const WAIT: Duration = Duration::from_secs(2);

    fn service_on(
        network: &MemoryNetwork,
        address: &str,
        config: ServiceConfig,
    ) -> (ChatService, mpsc::UnboundedReceiver<ChatEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let adapter = network.adapter(PeerIdentity::new(address, address.to_uppercase()));
        (ChatService::new(Arc::new(adapter), Arc::new(tx), config), rx)
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<ChatEvent>) -> ChatEvent {
        tokio::time::timeout(WAIT, rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        tokio::time::timeout(WAIT, async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached");
    }

    #[tokio::test]
    async fn test_stale_accept_is_discarded() {
        let network = MemoryNetwork::new();
        let (tx, mut events) = mpsc::unbounded_channel();
        // Dials hang, so connect() below stays in Connecting.
        let adapter = network
            .adapter(PeerIdentity::from_address("local"))
            .with_dial_delay(Duration::from_secs(60));
        let service = ChatService::new(Arc::new(adapter), Arc::new(tx), ServiceConfig::default());

        service.start();
        assert_eq!(
            next_event(&mut events).await,
            ChatEvent::StateChanged(ConnectionState::Listen)
        );
        let listen_generation = service.inner.shared.lock().generation;
        let stale = service
            .inner
            .reporter(listen_generation, ConnectionState::Listen);

        service.connect(PeerIdentity::from_address("elsewhere"));
        assert_eq!(
            next_event(&mut events).await,
            ChatEvent::StateChanged(ConnectionState::Connecting)
        );

        // The old accept worker completes after connect() moved on.
        let remote = network.adapter(PeerIdentity::from_address("remote"));
        let _remote_acceptor = remote.bind().unwrap();
        let transport = remote
            .open(&PeerIdentity::from_address("remote"))
            .await
            .unwrap();
        let before = network.open_streams();
        stale.established(Box::new(transport), PeerIdentity::from_address("remote"));

        assert_eq!(service.current_state(), ConnectionState::Connecting);
        assert_eq!(network.open_streams(), before - 1);
        assert!(service.connected_peer().is_none());
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let network = MemoryNetwork::new();
        let (service, mut events) = service_on(&network, "local", ServiceConfig::default());

        service.stop();
        service.start();
        service.stop();
        service.stop();

        assert_eq!(service.current_state(), ConnectionState::None);
        assert_eq!(
            next_event(&mut events).await,
            ChatEvent::StateChanged(ConnectionState::Listen)
        );
        assert_eq!(
            next_event(&mut events).await,
            ChatEvent::StateChanged(ConnectionState::None)
        );
        assert!(events.try_recv().is_err());

        wait_until(|| !network.is_listening("local")).await;
    }

    #[tokio::test]
    async fn test_start_is_noop_while_listening() {
        let network = MemoryNetwork::new();
        let (service, mut events) = service_on(&network, "local", ServiceConfig::default());

        service.start();
        let generation = service.inner.shared.lock().generation;
        service.start();

        assert_eq!(service.inner.shared.lock().generation, generation);
        assert_eq!(
            next_event(&mut events).await,
            ChatEvent::StateChanged(ConnectionState::Listen)
        );
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_send_while_disconnected() {
        let network = MemoryNetwork::new();
        let (service, mut events) = service_on(&network, "local", ServiceConfig::default());

        assert!(!service.send("hello"));
        assert_eq!(
            next_event(&mut events).await,
            ChatEvent::Notice("You are not connected to a device".into())
        );
        assert!(!service.send(Vec::new()));
        assert!(events.try_recv().is_err());
        assert_eq!(network.opened_total(), 0);
    }

    #[tokio::test]
    async fn test_fatal_accept_error() {
        let network = MemoryNetwork::new();
        let (service, mut events) = service_on(&network, "local", ServiceConfig::default());

        service.start();
        next_event(&mut events).await;
        wait_until(|| network.is_listening("local")).await;
        network.close_listener("local");

        assert_eq!(
            next_event(&mut events).await,
            ChatEvent::StateChanged(ConnectionState::None)
        );
        match next_event(&mut events).await {
            ChatEvent::Notice(text) => assert!(text.starts_with("Unable to listen")),
            other => panic!("unexpected event {:?}", other),
        }
    }

    /// Adapter whose acceptor fails with the queued errors before
    /// delegating to a memory listener.
    struct FlakyAdapter {
        inner: crate::transport::MemoryAdapter,
        errors: Arc<Mutex<VecDeque<io::ErrorKind>>>,
    }

    struct FlakyAcceptor {
        inner: crate::transport::memory::MemoryAcceptor,
        errors: Arc<Mutex<VecDeque<io::ErrorKind>>>,
    }

    impl Adapter for FlakyAdapter {
        fn listen(&self) -> BoxFuture<'_, crate::error::Result<Box<dyn Acceptor>>> {
            async move {
                Ok(Box::new(FlakyAcceptor {
                    inner: self.inner.bind()?,
                    errors: self.errors.clone(),
                }) as Box<dyn Acceptor>)
            }
            .boxed()
        }

        fn dial<'a>(
            &'a self,
            peer: &'a PeerIdentity,
        ) -> BoxFuture<'a, crate::error::Result<BoxTransport>> {
            self.inner.dial(peer)
        }
    }

    impl Acceptor for FlakyAcceptor {
        fn accept(&mut self) -> BoxFuture<'_, io::Result<(BoxTransport, PeerIdentity)>> {
            async move {
                let queued = self.errors.lock().pop_front();
                if let Some(kind) = queued {
                    return Err(io::Error::from(kind));
                }
                self.inner.accept().await
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn test_transient_accept_error_keeps_listening() {
        let network = MemoryNetwork::new();
        let errors = Arc::new(Mutex::new(VecDeque::from([
            io::ErrorKind::ConnectionAborted,
            io::ErrorKind::Interrupted,
        ])));
        let adapter = FlakyAdapter {
            inner: network.adapter(PeerIdentity::from_address("local")),
            errors: errors.clone(),
        };
        let (tx, mut events) = mpsc::unbounded_channel();
        let config = ServiceConfig {
            accept_retry_delay_ms: 5,
            ..ServiceConfig::default()
        };
        let service = ChatService::new(Arc::new(adapter), Arc::new(tx), config);

        service.start();
        next_event(&mut events).await;
        wait_until(|| errors.lock().is_empty()).await;
        assert_eq!(service.current_state(), ConnectionState::Listen);

        let remote = network.adapter(PeerIdentity::new("remote", "Remote"));
        let _stream = remote
            .open(&PeerIdentity::from_address("local"))
            .await
            .unwrap();

        assert_eq!(
            next_event(&mut events).await,
            ChatEvent::StateChanged(ConnectionState::Connected)
        );
        assert_eq!(
            next_event(&mut events).await,
            ChatEvent::DeviceIdentified(PeerIdentity::new("remote", "Remote"))
        );
    }
}
