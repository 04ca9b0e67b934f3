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

//! Accept worker: waits for one inbound connection.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::Reporter;
use crate::config::ServiceConfig;
use crate::error::ChatError;
use crate::transport::{is_transient, Adapter};

pub(super) struct AcceptWorker {
    adapter: Arc<dyn Adapter>,
    reporter: Reporter,
    retired: Option<JoinHandle<()>>,
    retry_transient: bool,
    retry_delay: Duration,
}

impl AcceptWorker {
    pub(super) fn new(
        adapter: Arc<dyn Adapter>,
        reporter: Reporter,
        retired: Option<JoinHandle<()>>,
        config: &ServiceConfig,
    ) -> Self {
        Self {
            adapter,
            reporter,
            retired,
            retry_transient: config.retry_transient_accept,
            retry_delay: config.accept_retry_delay(),
        }
    }

    /// The listening resource lives inside this future, so it is released
    /// on success, on failure and when the task is aborted.
    pub(super) async fn run(self) {
        if let Some(previous) = self.retired {
            let _ = previous.await;
        }

        let mut acceptor = match self.adapter.listen().await {
            Ok(acceptor) => acceptor,
            Err(e) => {
                error!("Failed to listen: {}", e);
                self.reporter.attempt_failed(e);
                return;
            }
        };
        info!("Waiting for connections...");

        loop {
            match acceptor.accept().await {
                Ok((transport, peer)) => {
                    info!("Connection from: {}", peer);
                    // Stop listening before the session starts.
                    drop(acceptor);
                    self.reporter.established(transport, peer);
                    return;
                }
                Err(e) if self.retry_transient && is_transient(&e) => {
                    warn!("Accept error: {}", e);
                    tokio::time::sleep(self.retry_delay).await;
                    if !self.reporter.is_current() {
                        debug!("Accept worker superseded");
                        return;
                    }
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                    self.reporter
                        .attempt_failed(ChatError::AcceptFailed(e.to_string()));
                    return;
                }
            }
        }
    }
}
