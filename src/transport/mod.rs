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

//! Point-to-point stream transports.
//!
//! An [`Adapter`] can listen for one inbound stream at a time and dial a
//! known peer. The chat service only ever sees boxed duplex streams, so
//! RFCOMM, TCP and the in-memory loopback network are interchangeable.

use futures::future::BoxFuture;
use std::fmt;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;

pub mod memory;
#[cfg(feature = "rfcomm")]
pub mod rfcomm;
pub mod tcp;

pub use memory::{MemoryAdapter, MemoryNetwork};
#[cfg(feature = "rfcomm")]
pub use rfcomm::RfcommAdapter;
pub use tcp::TcpAdapter;

/// A duplex byte stream to a peer.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// Owned, type-erased transport.
pub type BoxTransport = Box<dyn Transport>;

/// Address and display name of a connectable device.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerIdentity {
    address: String,
    name: String,
}

impl PeerIdentity {
    pub fn new(address: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: name.into(),
        }
    }

    /// Peer known only by address; the address doubles as its name.
    pub fn from_address(address: impl Into<String>) -> Self {
        let address = address.into();
        Self {
            name: address.clone(),
            address,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name == self.address {
            write!(f, "{}", self.address)
        } else {
            write!(f, "{} ({})", self.name, self.address)
        }
    }
}

/// A listening resource waiting for inbound streams.
///
/// Dropping it releases the underlying socket or registration.
pub trait Acceptor: Send {
    fn accept(&mut self) -> BoxFuture<'_, io::Result<(BoxTransport, PeerIdentity)>>;
}

/// A local transport endpoint.
pub trait Adapter: Send + Sync {
    /// Acquire a listening resource.
    fn listen(&self) -> BoxFuture<'_, Result<Box<dyn Acceptor>>>;

    /// Make a single attempt to open a stream to `peer`.
    fn dial<'a>(&'a self, peer: &'a PeerIdentity) -> BoxFuture<'a, Result<BoxTransport>>;
}

/// Whether an accept error leaves the listening resource usable.
pub(crate) fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::TimedOut
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_display() {
        let peer = PeerIdentity::new("00:11:22:33:44:55", "Phone");
        assert_eq!(peer.to_string(), "Phone (00:11:22:33:44:55)");

        let bare = PeerIdentity::from_address("127.0.0.1:7700");
        assert_eq!(bare.name(), "127.0.0.1:7700");
        assert_eq!(bare.to_string(), "127.0.0.1:7700");
    }

    #[test]
    fn test_transient_errors() {
        assert!(is_transient(&io::Error::from(io::ErrorKind::ConnectionAborted)));
        assert!(is_transient(&io::Error::from(io::ErrorKind::Interrupted)));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::BrokenPipe)));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::AddrInUse)));
    }
}
