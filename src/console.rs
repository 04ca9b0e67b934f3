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

//! Terminal input parsing.

use crate::transport::PeerIdentity;

/// One line typed at the terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// `/connect <address> [name]`
    Connect(PeerIdentity),
    /// `/listen`
    Listen,
    /// `/stop`
    Stop,
    /// `/state`
    State,
    /// `/history`
    History,
    /// `/quit`
    Quit,
    /// Anything else is chat text.
    Message(String),
    /// A command that could not be understood.
    Invalid(String),
}

pub const HELP: &str =
    "Commands: /connect <address> [name], /listen, /stop, /state, /history, /quit";

impl Input {
    pub fn parse(line: &str) -> Self {
        let line = line.trim_end_matches(&['\r', '\n'][..]);
        // "//text" sends a message starting with a slash.
        if let Some(text) = line.strip_prefix("//") {
            return Input::Message(format!("/{}", text));
        }
        let Some(command) = line.strip_prefix('/') else {
            return Input::Message(line.to_string());
        };

        let mut parts = command.split_whitespace();
        match parts.next() {
            Some("connect") => match parts.next() {
                Some(address) => {
                    let name = parts.collect::<Vec<_>>().join(" ");
                    if name.is_empty() {
                        Input::Connect(PeerIdentity::from_address(address))
                    } else {
                        Input::Connect(PeerIdentity::new(address, name))
                    }
                }
                None => Input::Invalid("usage: /connect <address> [name]".to_string()),
            },
            Some("listen") => Input::Listen,
            Some("stop") => Input::Stop,
            Some("state") => Input::State,
            Some("history") => Input::History,
            Some("quit") | Some("exit") => Input::Quit,
            _ => Input::Invalid(HELP.to_string()),
        }
    }
}
