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

//! Connection state.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Connection state of the chat service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Doing nothing.
    #[default]
    None,
    /// Waiting for an inbound connection.
    Listen,
    /// Dialing a peer.
    Connecting,
    /// A session is up.
    Connected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::None => "Not connected",
            ConnectionState::Listen => "Listening",
            ConnectionState::Connecting => "Connecting...",
            ConnectionState::Connected => "Connected",
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            ConnectionState::None => 0,
            ConnectionState::Listen => 1,
            ConnectionState::Connecting => 2,
            ConnectionState::Connected => 3,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnectionState::Listen,
            2 => ConnectionState::Connecting,
            3 => ConnectionState::Connected,
            _ => ConnectionState::None,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lock-free mirror of the current state.
///
/// Only the service writes it, and only while holding its transition lock;
/// anyone may read it at any time without blocking.
#[derive(Debug, Default)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, state: ConnectionState) {
        self.0.store(state.to_u8(), Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_cell_roundtrip() {
        let cell = StateCell::default();
        assert_eq!(cell.get(), ConnectionState::None);

        for state in [
            ConnectionState::Listen,
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::None,
        ] {
            cell.set(state);
            assert_eq!(cell.get(), state);
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(ConnectionState::Connecting.to_string(), "Connecting...");
    }
}
