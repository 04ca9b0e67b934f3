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

//! Two-peer Bluetooth chat.
//!
//! [`ChatService`] manages a single connection to one peer: it listens for
//! an inbound stream, dials out, or runs a session, and reports everything
//! through an [`EventSink`].

pub mod config;
pub mod console;
pub mod conversation;
pub mod error;
pub mod events;
pub mod service;
pub mod state;
pub mod transport;

pub use config::{Config, ServiceConfig};
pub use error::ChatError;
pub use events::{ChatEvent, EventSink};
pub use service::ChatService;
pub use state::ConnectionState;
pub use transport::{Adapter, PeerIdentity};
