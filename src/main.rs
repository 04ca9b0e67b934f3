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

//! Bluetooth Chat terminal client

use anyhow::Result;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bluetooth_chat::config::{Config, TransportKind};
use bluetooth_chat::console::{Input, HELP};
use bluetooth_chat::conversation::{Conversation, Output};
use bluetooth_chat::transport::{Adapter, TcpAdapter};
use bluetooth_chat::{ChatEvent, ChatService};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging; stdout is for the chat itself
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("bluetooth_chat=info".parse()?),
        )
        .init();

    info!("Starting Bluetooth Chat v{}...", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = Config::load()?;
    info!("Configuration loaded");

    let adapter = create_adapter(&config).await?;

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<ChatEvent>();
    let service = ChatService::new(adapter, Arc::new(event_tx), config.service.clone());
    service.start();

    println!("{}", HELP);

    let mut conversation = Conversation::new();
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            Some(event) = event_rx.recv() => {
                if let ChatEvent::StateChanged(state) = &event {
                    println!("-- {}", state);
                }
                match conversation.apply(&event) {
                    Some(Output::Line(line)) => println!("{}", line),
                    Some(Output::Toast(text)) => println!("** {}", text),
                    Some(Output::Cleared) | None => {}
                }
            }
            line = stdin.next_line() => {
                let Some(line) = line? else {
                    info!("End of input");
                    break;
                };
                match Input::parse(&line) {
                    Input::Connect(peer) => service.connect(peer),
                    Input::Listen => service.start(),
                    Input::Stop => service.stop(),
                    Input::State => match service.connected_peer() {
                        Some(peer) => println!("-- {} to {}", service.current_state(), peer),
                        None => println!("-- {}", service.current_state()),
                    },
                    Input::History => {
                        for line in conversation.lines() {
                            println!("{}", line);
                        }
                    }
                    Input::Quit => break,
                    Input::Message(text) => {
                        service.send(text.into_bytes());
                    }
                    Input::Invalid(usage) => println!("{}", usage),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    service.shutdown().await;
    info!("Bluetooth Chat stopped");
    Ok(())
}

async fn create_adapter(config: &Config) -> Result<Arc<dyn Adapter>> {
    match config.transport.kind {
        TransportKind::Tcp => {
            let addr = config.transport.tcp_listen.parse()?;
            info!("Using TCP transport on {}", addr);
            Ok(Arc::new(TcpAdapter::new(addr)))
        }
        TransportKind::Rfcomm => rfcomm_adapter(config).await,
    }
}

#[cfg(feature = "rfcomm")]
async fn rfcomm_adapter(config: &Config) -> Result<Arc<dyn Adapter>> {
    let adapter = bluetooth_chat::transport::RfcommAdapter::new(
        &config.transport.device_name,
        config.transport.rfcomm_channel,
    )
    .await?;
    info!("Local Bluetooth address: {}", adapter.address().await?);
    Ok(Arc::new(adapter))
}

#[cfg(not(feature = "rfcomm"))]
async fn rfcomm_adapter(_config: &Config) -> Result<Arc<dyn Adapter>> {
    anyhow::bail!("built without RFCOMM support; set transport.kind = \"tcp\" or enable the `rfcomm` feature")
}
