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

//! TCP transport, for running two chat peers on machines without Bluetooth.

use futures::future::{BoxFuture, FutureExt};
use std::io;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

use super::{Acceptor, Adapter, BoxTransport, PeerIdentity};
use crate::error::{ChatError, Result};

/// TCP endpoint listening on a fixed address.
#[derive(Debug, Clone)]
pub struct TcpAdapter {
    listen_addr: SocketAddr,
}

impl TcpAdapter {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self { listen_addr }
    }

    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }
}

impl Adapter for TcpAdapter {
    fn listen(&self) -> BoxFuture<'_, Result<Box<dyn Acceptor>>> {
        async move {
            let listener = TcpListener::bind(self.listen_addr)
                .await
                .map_err(|e| ChatError::TransportUnavailable(format!("{}: {}", self.listen_addr, e)))?;
            info!("TCP server listening on {}", listener.local_addr().unwrap_or(self.listen_addr));
            Ok(Box::new(TcpAcceptor { listener }) as Box<dyn Acceptor>)
        }
        .boxed()
    }

    fn dial<'a>(&'a self, peer: &'a PeerIdentity) -> BoxFuture<'a, Result<BoxTransport>> {
        async move {
            let stream = TcpStream::connect(peer.address())
                .await
                .map_err(|e| ChatError::ConnectFailed(e.to_string()))?;
            if let Err(e) = stream.set_nodelay(true) {
                debug!("Could not set TCP_NODELAY: {}", e);
            }
            Ok(Box::new(stream) as BoxTransport)
        }
        .boxed()
    }
}

struct TcpAcceptor {
    listener: TcpListener,
}

impl Acceptor for TcpAcceptor {
    fn accept(&mut self) -> BoxFuture<'_, io::Result<(BoxTransport, PeerIdentity)>> {
        async move {
            let (stream, remote_addr) = self.listener.accept().await?;
            debug!("TCP connection from {}", remote_addr);
            let _ = stream.set_nodelay(true);
            Ok((
                Box::new(stream) as BoxTransport,
                PeerIdentity::from_address(remote_addr.to_string()),
            ))
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_tcp_dial_accept() {
        // Bind on an ephemeral port first so the dial target is known.
        let reserved = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = reserved.local_addr().unwrap();
        drop(reserved);

        let adapter = TcpAdapter::new(addr);
        let mut acceptor = adapter.listen().await.unwrap();

        let target = PeerIdentity::from_address(addr.to_string());
        let (dialed, accepted) = tokio::join!(adapter.dial(&target), acceptor.accept());
        let mut dialed = dialed.unwrap();
        let (mut accepted, _peer) = accepted.unwrap();

        dialed.write_all(b"hi").await.unwrap();
        let mut buf = [0u8; 2];
        accepted.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hi");
    }

    #[tokio::test]
    async fn test_tcp_dial_refused() {
        let reserved = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = reserved.local_addr().unwrap();
        drop(reserved);

        let adapter = TcpAdapter::new(addr);
        let result = adapter.dial(&PeerIdentity::from_address(addr.to_string())).await;
        assert!(matches!(result, Err(ChatError::ConnectFailed(_))));
    }
}
