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

//! Session worker: owns one established transport.

use async_channel::{Receiver, Sender, TrySendError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::Reporter;
use crate::config::ServiceConfig;
use crate::error::{ChatError, Result};
use crate::transport::{BoxTransport, PeerIdentity};

/// The service's side of a running session.
pub(super) struct SessionHandle {
    task: JoinHandle<()>,
    outbound: Sender<Vec<u8>>,
    peer: PeerIdentity,
}

impl SessionHandle {
    /// Queue a payload for the write duty without waiting.
    pub(super) fn enqueue(&self, payload: Vec<u8>) -> Result<()> {
        enqueue(&self.outbound, payload)
    }

    pub(super) fn peer(&self) -> &PeerIdentity {
        &self.peer
    }

    /// Cancel both duties. The transport is closed when the task is dropped.
    pub(super) fn abort(self) -> JoinHandle<()> {
        self.outbound.close();
        self.task.abort();
        self.task
    }

    /// Give up the handle without cancelling the task.
    pub(super) fn into_task(self) -> JoinHandle<()> {
        self.task
    }
}

/// Outbound queue; `max == 0` means unbounded.
fn outbound_queue(max: usize) -> (Sender<Vec<u8>>, Receiver<Vec<u8>>) {
    if max == 0 {
        async_channel::unbounded()
    } else {
        async_channel::bounded(max)
    }
}

fn enqueue(outbound: &Sender<Vec<u8>>, payload: Vec<u8>) -> Result<()> {
    outbound.try_send(payload).map_err(|e| match e {
        TrySendError::Full(_) => ChatError::QueueFull,
        TrySendError::Closed(_) => ChatError::not_connected(),
    })
}

pub(super) struct SessionWorker {
    transport: BoxTransport,
    outbound: Receiver<Vec<u8>>,
    reporter: Reporter,
    read_buffer_size: usize,
}

impl SessionWorker {
    /// Start both duties on `transport`.
    pub(super) fn spawn(
        runtime: &Handle,
        transport: BoxTransport,
        peer: PeerIdentity,
        reporter: Reporter,
        config: &ServiceConfig,
    ) -> SessionHandle {
        let (tx, rx) = outbound_queue(config.max_outbound_queue);
        let worker = Self {
            transport,
            outbound: rx,
            reporter,
            read_buffer_size: config.read_buffer_size.max(1),
        };

        SessionHandle {
            task: runtime.spawn(worker.run()),
            outbound: tx,
            peer,
        }
    }

    async fn run(self) {
        let Self {
            transport,
            outbound,
            reporter,
            read_buffer_size,
        } = self;
        info!("Session started");

        let (reader, writer) = tokio::io::split(transport);

        // Whichever duty finishes first ends the session; the other one is
        // dropped with its half of the transport, so exactly one outcome is
        // reported and the stream is closed before the report goes out.
        let outcome = tokio::select! {
            r = read_loop(reader, &reporter, read_buffer_size) => r,
            r = write_loop(writer, &outbound, &reporter) => r,
        };

        match outcome {
            Ok(()) => debug!("Session superseded, exiting"),
            Err(reason) => reporter.session_ended(reason),
        }
    }
}

/// Returns `Ok` only when the session was superseded.
async fn read_loop<R>(mut reader: R, reporter: &Reporter, buffer_size: usize) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; buffer_size];

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                info!("Connection closed by remote");
                return Err(ChatError::PeerClosed);
            }
            Ok(n) => {
                debug!("Received {} bytes", n);
                if !reporter.data_received(buf[..n].to_vec()) {
                    return Ok(());
                }
            }
            Err(e) => {
                error!("Read error: {}", e);
                return Err(e.into());
            }
        }
    }
}

/// Returns `Ok` when the session was superseded or the queue was closed.
async fn write_loop<W>(mut writer: W, outbound: &Receiver<Vec<u8>>, reporter: &Reporter) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Ok(payload) = outbound.recv().await {
        if let Err(e) = write_payload(&mut writer, &payload).await {
            error!("Write error: {}", e);
            return Err(e.into());
        }
        debug!("Sent {} bytes", payload.len());
        if !reporter.data_sent(payload) {
            return Ok(());
        }
    }
    Ok(())
}

async fn write_payload<W>(writer: &mut W, payload: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(payload).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounded_queue_rejects_when_full() {
        let (tx, _rx) = outbound_queue(1);
        assert!(enqueue(&tx, b"first".to_vec()).is_ok());
        assert!(matches!(
            enqueue(&tx, b"second".to_vec()),
            Err(ChatError::QueueFull)
        ));
    }

    #[test]
    fn test_unbounded_queue_is_fifo() {
        let (tx, rx) = outbound_queue(0);
        for i in 0..100u8 {
            enqueue(&tx, vec![i]).unwrap();
        }
        for i in 0..100u8 {
            assert_eq!(rx.try_recv().unwrap(), vec![i]);
        }
    }

    #[test]
    fn test_closed_queue_means_not_connected() {
        let (tx, rx) = outbound_queue(4);
        tx.close();
        drop(rx);
        let err = enqueue(&tx, b"late".to_vec()).unwrap_err();
        assert_eq!(err.to_string(), "You are not connected to a device");
    }

    #[tokio::test]
    async fn test_write_payload_flushes_everything() {
        let (mut a, mut b) = tokio::io::duplex(4);
        let writer = tokio::spawn(async move {
            write_payload(&mut a, b"longer than the pipe").await.unwrap();
        });
        let mut received = vec![0u8; 20];
        b.read_exact(&mut received).await.unwrap();
        writer.await.unwrap();
        assert_eq!(&received, b"longer than the pipe");
    }
}
