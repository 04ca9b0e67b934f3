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

//! Error types for the chat service.
//!
//! None of these ever escape [`ChatService`](crate::service::ChatService):
//! the service turns them into `Notice` events. Their `Display` text is
//! what the user ends up reading.

use thiserror::Error;

/// Errors raised by transports and workers.
#[derive(Debug, Error)]
pub enum ChatError {
    /// No adapter or listening resource is available.
    #[error("Transport is not available: {0}")]
    TransportUnavailable(String),

    /// A dial attempt failed or timed out.
    #[error("Unable to connect device: {0}")]
    ConnectFailed(String),

    /// The listening socket was closed or errored.
    #[error("Unable to listen for connections: {0}")]
    AcceptFailed(String),

    /// Read or write failure on an established session.
    #[error("Device connection was lost: {0}")]
    SessionIo(#[from] std::io::Error),

    /// The remote peer closed the session.
    #[error("Device connection was lost")]
    PeerClosed,

    /// Operation not valid in the current state.
    #[error("{0}")]
    InvalidOperation(&'static str),

    /// The bounded outbound queue rejected a payload.
    #[error("Outbound queue is full, message dropped")]
    QueueFull,
}

impl ChatError {
    /// The error raised by `send` while no session is up.
    pub fn not_connected() -> Self {
        ChatError::InvalidOperation("You are not connected to a device")
    }
}

/// Result alias used across transports and workers.
pub type Result<T> = std::result::Result<T, ChatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notice_texts() {
        assert_eq!(
            ChatError::not_connected().to_string(),
            "You are not connected to a device"
        );
        assert_eq!(ChatError::PeerClosed.to_string(), "Device connection was lost");
        assert_eq!(
            ChatError::ConnectFailed("timed out".into()).to_string(),
            "Unable to connect device: timed out"
        );
        assert_eq!(
            ChatError::TransportUnavailable("127.0.0.1:7700: address in use".into()).to_string(),
            "Transport is not available: 127.0.0.1:7700: address in use"
        );
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err: ChatError = io.into();
        assert!(matches!(err, ChatError::SessionIo(_)));
        assert!(err.to_string().starts_with("Device connection was lost"));
    }
}
