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

//! Bluetooth RFCOMM transport backed by BlueZ.

use bluer::rfcomm::{Listener, SocketAddr, Stream};
use bluer::Address;
use futures::future::{BoxFuture, FutureExt};
use std::io;
use std::str::FromStr;
use tracing::{debug, info};

use super::{Acceptor, Adapter, BoxTransport, PeerIdentity};
use crate::error::{ChatError, Result};

/// RFCOMM endpoint on the default Bluetooth adapter.
pub struct RfcommAdapter {
    adapter: bluer::Adapter,
    channel: u8,
}

impl RfcommAdapter {
    /// Open the default adapter, power it on and set its alias.
    pub async fn new(device_name: &str, channel: u8) -> Result<Self> {
        info!("Initializing Bluetooth adapter...");

        let session = bluer::Session::new().await.map_err(unavailable)?;
        let adapter = session.default_adapter().await.map_err(unavailable)?;
        info!("Using Bluetooth adapter: {}", adapter.name());

        if !adapter.is_powered().await.map_err(unavailable)? {
            info!("Powering on Bluetooth adapter...");
            adapter.set_powered(true).await.map_err(unavailable)?;
        }

        adapter
            .set_alias(device_name.to_string())
            .await
            .map_err(unavailable)?;
        info!("Bluetooth name set to: {}", device_name);

        Ok(Self { adapter, channel })
    }

    /// Local adapter address.
    pub async fn address(&self) -> Result<Address> {
        self.adapter.address().await.map_err(unavailable)
    }
}

fn unavailable(e: bluer::Error) -> ChatError {
    ChatError::TransportUnavailable(e.to_string())
}

/// Look up the alias BlueZ has for `addr`, falling back to the address.
async fn identify(adapter: &bluer::Adapter, addr: Address) -> PeerIdentity {
    let name = match adapter.device(addr) {
        Ok(device) => device.alias().await.unwrap_or_else(|_| addr.to_string()),
        Err(_) => addr.to_string(),
    };
    PeerIdentity::new(addr.to_string(), name)
}

impl Adapter for RfcommAdapter {
    fn listen(&self) -> BoxFuture<'_, Result<Box<dyn Acceptor>>> {
        async move {
            let local_addr = SocketAddr::new(Address::any(), self.channel);
            let listener = Listener::bind(local_addr)
                .await
                .map_err(|e| ChatError::TransportUnavailable(e.to_string()))?;
            info!("RFCOMM server listening on channel {}", self.channel);

            Ok(Box::new(RfcommAcceptor {
                listener,
                adapter: self.adapter.clone(),
            }) as Box<dyn Acceptor>)
        }
        .boxed()
    }

    fn dial<'a>(&'a self, peer: &'a PeerIdentity) -> BoxFuture<'a, Result<BoxTransport>> {
        async move {
            let addr = Address::from_str(peer.address()).map_err(|e| {
                ChatError::ConnectFailed(format!("invalid address {}: {}", peer.address(), e))
            })?;
            let stream = Stream::connect(SocketAddr::new(addr, self.channel))
                .await
                .map_err(|e| ChatError::ConnectFailed(e.to_string()))?;
            debug!("RFCOMM stream to {} on channel {}", addr, self.channel);
            Ok(Box::new(stream) as BoxTransport)
        }
        .boxed()
    }
}

struct RfcommAcceptor {
    listener: Listener,
    adapter: bluer::Adapter,
}

impl Acceptor for RfcommAcceptor {
    fn accept(&mut self) -> BoxFuture<'_, io::Result<(BoxTransport, PeerIdentity)>> {
        async move {
            let (stream, remote_addr) = self.listener.accept().await?;
            info!("Connection from: {:?}", remote_addr);
            let peer = identify(&self.adapter, remote_addr.addr).await;
            Ok((Box::new(stream) as BoxTransport, peer))
        }
        .boxed()
    }
}
