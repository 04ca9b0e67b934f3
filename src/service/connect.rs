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

//! Connect worker: one bounded dial attempt.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::Reporter;
use crate::config::ServiceConfig;
use crate::error::ChatError;
use crate::transport::{Adapter, PeerIdentity};

pub(super) struct ConnectWorker {
    adapter: Arc<dyn Adapter>,
    peer: PeerIdentity,
    reporter: Reporter,
    retired: Option<JoinHandle<()>>,
    timeout: Duration,
}

impl ConnectWorker {
    pub(super) fn new(
        adapter: Arc<dyn Adapter>,
        peer: PeerIdentity,
        reporter: Reporter,
        retired: Option<JoinHandle<()>>,
        config: &ServiceConfig,
    ) -> Self {
        Self {
            adapter,
            peer,
            reporter,
            retired,
            timeout: config.connect_timeout(),
        }
    }

    pub(super) async fn run(self) {
        // The previous worker must have released its transport before we
        // open a new one.
        if let Some(previous) = self.retired {
            let _ = previous.await;
        }

        let dial = self.adapter.dial(&self.peer);
        let result = match tokio::time::timeout(self.timeout, dial).await {
            Ok(result) => result,
            Err(_) => Err(ChatError::ConnectFailed(format!(
                "timed out after {} ms",
                self.timeout.as_millis()
            ))),
        };

        match result {
            Ok(transport) => {
                info!("Dialed {}", self.peer);
                self.reporter.established(transport, self.peer);
            }
            Err(e) => {
                warn!("Connect to {} failed: {}", self.peer, e);
                self.reporter.attempt_failed(e);
            }
        }
    }
}
