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

//! Chat transcript built from service events.

use crate::events::ChatEvent;
use crate::state::ConnectionState;

/// Name shown for messages that arrive before the peer is identified.
const UNKNOWN_PEER: &str = "Peer";

/// What a front-end should show for one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    /// A new transcript line.
    Line(String),
    /// A transient message, not part of the transcript.
    Toast(String),
    /// The transcript was cleared for a new session.
    Cleared,
}

/// Transcript of the current chat session.
#[derive(Debug, Default)]
pub struct Conversation {
    lines: Vec<String>,
    peer_name: Option<String>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Name of the connected device, once identified.
    pub fn peer_name(&self) -> Option<&str> {
        self.peer_name.as_deref()
    }

    /// Fold one event into the transcript.
    pub fn apply(&mut self, event: &ChatEvent) -> Option<Output> {
        match event {
            ChatEvent::StateChanged(ConnectionState::Connected) => {
                self.lines.clear();
                Some(Output::Cleared)
            }
            ChatEvent::StateChanged(_) => None,
            ChatEvent::DeviceIdentified(peer) => {
                self.peer_name = Some(peer.name().to_string());
                Some(Output::Toast(format!("Connected to {}", peer.name())))
            }
            ChatEvent::DataSent(data) => {
                Some(self.push(format!("Me:  {}", String::from_utf8_lossy(data))))
            }
            ChatEvent::DataReceived(data) if data.is_empty() => None,
            ChatEvent::DataReceived(data) => {
                let name = self.peer_name.as_deref().unwrap_or(UNKNOWN_PEER);
                let line = format!("{}:  {}", name, String::from_utf8_lossy(data));
                Some(self.push(line))
            }
            ChatEvent::Notice(text) => Some(Output::Toast(text.clone())),
        }
    }

    fn push(&mut self, line: String) -> Output {
        self.lines.push(line.clone());
        Output::Line(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::PeerIdentity;

    #[test]
    fn test_transcript() {
        let mut conversation = Conversation::new();

        assert_eq!(
            conversation.apply(&ChatEvent::DataReceived(b"early".to_vec())),
            Some(Output::Line("Peer:  early".into()))
        );
        assert_eq!(
            conversation.apply(&ChatEvent::StateChanged(ConnectionState::Connected)),
            Some(Output::Cleared)
        );
        assert!(conversation.lines().is_empty());

        assert_eq!(
            conversation.apply(&ChatEvent::DeviceIdentified(PeerIdentity::new(
                "00:11:22:33:44:55",
                "Nexus"
            ))),
            Some(Output::Toast("Connected to Nexus".into()))
        );
        conversation.apply(&ChatEvent::DataSent(b"hi".to_vec()));
        conversation.apply(&ChatEvent::DataReceived(b"hello".to_vec()));
        conversation.apply(&ChatEvent::DataReceived(Vec::new()));

        assert_eq!(conversation.lines(), ["Me:  hi", "Nexus:  hello"]);
        assert_eq!(conversation.peer_name(), Some("Nexus"));
    }

    #[test]
    fn test_notice_is_a_toast() {
        let mut conversation = Conversation::new();
        assert_eq!(
            conversation.apply(&ChatEvent::Notice("Device connection was lost".into())),
            Some(Output::Toast("Device connection was lost".into()))
        );
        assert_eq!(
            conversation.apply(&ChatEvent::StateChanged(ConnectionState::None)),
            None
        );
        assert!(conversation.lines().is_empty());
    }
}
