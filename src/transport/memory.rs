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

//! In-memory loopback network.
//!
//! Every [`MemoryAdapter`] attached to the same [`MemoryNetwork`] can dial
//! every other one. Streams are `tokio::io::duplex` pairs. The network counts
//! open streams and registered listeners so tests can check that nothing
//! leaks.

use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use pin_project_lite::pin_project;
use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::sync::mpsc;
use tracing::debug;

use super::{Acceptor, Adapter, BoxTransport, PeerIdentity};
use crate::error::{ChatError, Result};

/// Buffer size of each duplex pipe.
const PIPE_CAPACITY: usize = 64 * 1024;

type Incoming = (MemoryStream, PeerIdentity);

#[derive(Default)]
struct Registry {
    listeners: HashMap<String, (u64, mpsc::UnboundedSender<Incoming>)>,
    next_id: u64,
}

/// A shared in-memory network.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    registry: Arc<Mutex<Registry>>,
    open_streams: Arc<AtomicUsize>,
    opened_total: Arc<AtomicUsize>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an adapter with the given identity.
    pub fn adapter(&self, identity: PeerIdentity) -> MemoryAdapter {
        MemoryAdapter {
            network: self.clone(),
            identity,
            dial_delay: None,
        }
    }

    /// Number of stream ends currently alive.
    pub fn open_streams(&self) -> usize {
        self.open_streams.load(Ordering::SeqCst)
    }

    /// Number of stream ends ever created.
    pub fn opened_total(&self) -> usize {
        self.opened_total.load(Ordering::SeqCst)
    }

    /// Whether something is listening at `address`.
    pub fn is_listening(&self, address: &str) -> bool {
        self.registry.lock().listeners.contains_key(address)
    }

    /// Forcibly close the listener at `address`.
    ///
    /// A pending accept on it fails with a non-transient error.
    pub fn close_listener(&self, address: &str) -> bool {
        self.registry.lock().listeners.remove(address).is_some()
    }

    fn stream_pair(&self) -> (MemoryStream, MemoryStream) {
        let (a, b) = tokio::io::duplex(PIPE_CAPACITY);
        (self.track(a), self.track(b))
    }

    fn track(&self, inner: DuplexStream) -> MemoryStream {
        self.open_streams.fetch_add(1, Ordering::SeqCst);
        self.opened_total.fetch_add(1, Ordering::SeqCst);
        MemoryStream {
            inner,
            _guard: StreamGuard(self.open_streams.clone()),
        }
    }
}

struct StreamGuard(Arc<AtomicUsize>);

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pin_project! {
    /// One end of an in-memory stream.
    pub struct MemoryStream {
        #[pin]
        inner: DuplexStream,
        _guard: StreamGuard,
    }
}

impl AsyncRead for MemoryStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.project().inner.poll_read(cx, buf)
    }
}

impl AsyncWrite for MemoryStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.project().inner.poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_shutdown(cx)
    }
}

/// An endpoint on a [`MemoryNetwork`].
#[derive(Clone)]
pub struct MemoryAdapter {
    network: MemoryNetwork,
    identity: PeerIdentity,
    dial_delay: Option<Duration>,
}

impl MemoryAdapter {
    /// Delay every dial by `delay` before it completes.
    pub fn with_dial_delay(mut self, delay: Duration) -> Self {
        self.dial_delay = Some(delay);
        self
    }

    pub fn identity(&self) -> &PeerIdentity {
        &self.identity
    }

    /// Open a stream to whoever listens at `peer` without going through a
    /// chat service. Useful for driving a remote side by hand.
    pub async fn open(&self, peer: &PeerIdentity) -> Result<MemoryStream> {
        if let Some(delay) = self.dial_delay {
            tokio::time::sleep(delay).await;
        }

        let listener = self
            .network
            .registry
            .lock()
            .listeners
            .get(peer.address())
            .map(|(_, tx)| tx.clone())
            .ok_or_else(|| {
                ChatError::ConnectFailed(format!("nobody listening at {}", peer.address()))
            })?;

        let (local, remote) = self.network.stream_pair();
        listener
            .send((remote, self.identity.clone()))
            .map_err(|_| ChatError::ConnectFailed(format!("{} stopped listening", peer.address())))?;

        debug!("Memory stream {} -> {}", self.identity.address(), peer.address());
        Ok(local)
    }

    /// Listen without going through a chat service.
    pub fn bind(&self) -> Result<MemoryAcceptor> {
        let mut registry = self.network.registry.lock();
        let address = self.identity.address().to_string();
        if registry.listeners.contains_key(&address) {
            return Err(ChatError::TransportUnavailable(format!(
                "{} is already listening",
                address
            )));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.listeners.insert(address.clone(), (id, tx));

        Ok(MemoryAcceptor {
            network: self.network.clone(),
            address,
            id,
            rx,
        })
    }
}

impl Adapter for MemoryAdapter {
    fn listen(&self) -> BoxFuture<'_, Result<Box<dyn Acceptor>>> {
        async move {
            let acceptor = self.bind()?;
            Ok(Box::new(acceptor) as Box<dyn Acceptor>)
        }
        .boxed()
    }

    fn dial<'a>(&'a self, peer: &'a PeerIdentity) -> BoxFuture<'a, Result<BoxTransport>> {
        async move {
            let stream = self.open(peer).await?;
            Ok(Box::new(stream) as BoxTransport)
        }
        .boxed()
    }
}

/// Listening registration on a [`MemoryNetwork`].
pub struct MemoryAcceptor {
    network: MemoryNetwork,
    address: String,
    id: u64,
    rx: mpsc::UnboundedReceiver<Incoming>,
}

impl MemoryAcceptor {
    pub async fn next(&mut self) -> io::Result<(MemoryStream, PeerIdentity)> {
        self.rx
            .recv()
            .await
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "listener closed"))
    }
}

impl Acceptor for MemoryAcceptor {
    fn accept(&mut self) -> BoxFuture<'_, io::Result<(BoxTransport, PeerIdentity)>> {
        async move {
            let (stream, peer) = self.next().await?;
            Ok((Box::new(stream) as BoxTransport, peer))
        }
        .boxed()
    }
}

impl Drop for MemoryAcceptor {
    fn drop(&mut self) {
        let mut registry = self.network.registry.lock();
        if matches!(registry.listeners.get(&self.address), Some((id, _)) if *id == self.id) {
            registry.listeners.remove(&self.address);
        }
    }
}
