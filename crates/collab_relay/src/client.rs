//! Minimal relay client
//!
//! Joins one room, pushes raw updates and hands received updates back out
//! untouched. Connection status is published on a watch channel so a UI
//! can follow `connecting -> connected -> disconnected` without polling.

use anyhow::{Context, Result};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::connection::UpdateMessage;

/// Connection status as seen by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
}

impl From<UpdateMessage> for Message {
    fn from(update: UpdateMessage) -> Self {
        match update {
            UpdateMessage::Binary(data) => Message::Binary(data.to_vec()),
            UpdateMessage::Text(text) => Message::Text(text),
        }
    }
}

/// Build the room URL the same way y-websocket does: `<server>/<room>`
pub fn room_url(server_url: &str, room: &str) -> String {
    format!("{}/{}", server_url.trim_end_matches('/'), room)
}

pub struct RelayClient {
    outbound: Option<mpsc::UnboundedSender<UpdateMessage>>,
    inbound: mpsc::UnboundedReceiver<UpdateMessage>,
    status: watch::Receiver<ConnectionStatus>,
    task: JoinHandle<()>,
}

impl RelayClient {
    /// Connect to `room` on the relay at `server_url` (e.g. `ws://localhost:1234`)
    pub async fn connect(server_url: &str, room: &str) -> Result<Self> {
        Self::connect_url(&room_url(server_url, room)).await
    }

    /// Connect to a full room URL and wait for the handshake to finish
    pub async fn connect_url(url: &str) -> Result<Self> {
        let client = Self::start(url);

        let mut status = client.watch_status();
        let settled = *status
            .wait_for(|s| *s != ConnectionStatus::Connecting)
            .await
            .with_context(|| format!("Connection task for {} ended early", url))?;

        match settled {
            ConnectionStatus::Connected => Ok(client),
            _ => anyhow::bail!("Failed to connect to {}", url),
        }
    }

    /// Start connecting in the background and return at once.
    ///
    /// The status reads `Connecting` until the handshake settles. Updates sent
    /// meanwhile are queued and go out once the connection is up.
    pub fn start(url: &str) -> Self {
        let url = url.to_string();
        let (status_tx, status) = watch::channel(ConnectionStatus::Connecting);
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<UpdateMessage>();
        let (inbound_tx, inbound) = mpsc::unbounded_channel::<UpdateMessage>();

        let task = tokio::spawn(async move {
            debug!(url = %url, "Connecting to relay");

            let ws_stream = match connect_async(url.as_str()).await {
                Ok((stream, _)) => stream,
                Err(e) => {
                    warn!(url = %url, error = %e, "Failed to connect to relay");
                    let _ = status_tx.send(ConnectionStatus::Disconnected);
                    return;
                }
            };

            let _ = status_tx.send(ConnectionStatus::Connected);
            info!(url = %url, "Connected to relay");

            let (mut write, mut read) = ws_stream.split();

            loop {
                tokio::select! {
                    outgoing = outbound_rx.recv() => {
                        match outgoing {
                            Some(update) => {
                                if let Err(e) = write.send(Message::from(update)).await {
                                    warn!(error = %e, "Failed to send update");
                                    break;
                                }
                            }
                            None => {
                                let _ = write.close().await;
                                break;
                            }
                        }
                    }
                    incoming = read.next() => {
                        match incoming {
                            Some(Ok(Message::Binary(data))) => {
                                let _ = inbound_tx.send(UpdateMessage::binary(data));
                            }
                            Some(Ok(Message::Text(text))) => {
                                let _ = inbound_tx.send(UpdateMessage::text(text));
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Relay closed the connection");
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                warn!(error = %e, "Relay connection error");
                                break;
                            }
                        }
                    }
                }
            }

            let _ = status_tx.send(ConnectionStatus::Disconnected);
        });

        Self {
            outbound: Some(outbound_tx),
            inbound,
            status,
            task,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// Subscribe to status changes
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    pub fn send(&self, update: UpdateMessage) -> Result<()> {
        self.outbound
            .as_ref()
            .context("Client is closed")?
            .send(update)
            .map_err(|_| anyhow::anyhow!("Relay connection is closed"))
    }

    pub fn send_binary(&self, data: impl Into<Bytes>) -> Result<()> {
        self.send(UpdateMessage::binary(data))
    }

    /// Next update from the relay, or `None` once the connection is gone
    pub async fn recv(&mut self) -> Option<UpdateMessage> {
        self.inbound.recv().await
    }

    /// Send a close frame and wait for the connection task to finish
    pub async fn close(mut self) {
        self.outbound.take();
        let _ = (&mut self.task).await;
    }
}

impl Drop for RelayClient {
    fn drop(&mut self) {
        self.task.abort();
    }
}
