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

//! Events emitted by the chat service and the sinks that receive them.

use tokio::sync::mpsc;
use tracing::debug;

use crate::state::ConnectionState;
use crate::transport::PeerIdentity;

/// Events emitted by the chat service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// The service moved to a new state.
    StateChanged(ConnectionState),
    /// The peer of a freshly established session.
    DeviceIdentified(PeerIdentity),
    /// Bytes read from the peer.
    DataReceived(Vec<u8>),
    /// Bytes written to the peer.
    DataSent(Vec<u8>),
    /// Non-fatal advisory, e.g. "Device connection was lost".
    Notice(String),
}

/// Receiver of chat events.
///
/// Called synchronously on whichever thread produced the event, so
/// implementations should hand the event off rather than do slow work.
/// Calling back into the service from `on_event` is allowed.
pub trait EventSink: Send + Sync {
    fn on_event(&self, event: ChatEvent);
}

impl EventSink for mpsc::UnboundedSender<ChatEvent> {
    fn on_event(&self, event: ChatEvent) {
        if self.send(event).is_err() {
            debug!("Event receiver dropped, discarding event");
        }
    }
}

impl EventSink for async_channel::Sender<ChatEvent> {
    fn on_event(&self, event: ChatEvent) {
        if let Err(e) = self.try_send(event) {
            debug!("Discarding event: {}", e);
        }
    }
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn on_event(&self, _event: ChatEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unbounded_sender_sink() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.on_event(ChatEvent::Notice("hello".into()));
        tx.on_event(ChatEvent::StateChanged(ConnectionState::Listen));

        assert_eq!(rx.try_recv().unwrap(), ChatEvent::Notice("hello".into()));
        assert_eq!(
            rx.try_recv().unwrap(),
            ChatEvent::StateChanged(ConnectionState::Listen)
        );
    }

    #[test]
    fn test_closed_sink_does_not_panic() {
        let (tx, rx) = mpsc::unbounded_channel::<ChatEvent>();
        drop(rx);
        tx.on_event(ChatEvent::DataSent(b"x".to_vec()));

        let (tx, rx) = async_channel::bounded::<ChatEvent>(1);
        tx.on_event(ChatEvent::DataSent(b"a".to_vec()));
        // Full: second event is dropped.
        tx.on_event(ChatEvent::DataSent(b"b".to_vec()));
        assert_eq!(rx.try_recv().unwrap(), ChatEvent::DataSent(b"a".to_vec()));
        assert!(rx.try_recv().is_err());
    }
}
