//! Websocket transport
//!
//! The socket is split into a reader task and a writer task; the session
//! only ever talks to the two channels.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::error::SessionError;

const INBOUND_CAPACITY: usize = 4096;
const OUTBOUND_CAPACITY: usize = 256;

/// Frame delivered by the reader task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Text(String),
    /// The socket closed or failed; nothing follows
    Closed,
}

pub struct Transport {
    inbound: mpsc::Receiver<Inbound>,
    outbound: mpsc::Sender<String>,
}

/// Far end of an in-memory transport
pub struct RemoteEnd {
    pub inbound: mpsc::Sender<Inbound>,
    pub outbound: mpsc::Receiver<String>,
}

impl RemoteEnd {
    /// Deliver a text frame to the session
    pub async fn push(&self, text: impl Into<String>) -> bool {
        self.inbound.send(Inbound::Text(text.into())).await.is_ok()
    }

    pub async fn close(&self) {
        let _ = self.inbound.send(Inbound::Closed).await;
    }
}

impl Transport {
    /// Connect to a coordinator websocket
    pub async fn connect(url: &str) -> Result<Self, SessionError> {
        let (ws_stream, _) = connect_async(url).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        tracing::info!("Connected to coordinator at {}", url);

        let (inbound_tx, inbound) = mpsc::channel::<Inbound>(INBOUND_CAPACITY);
        let (outbound, mut outbound_rx) = mpsc::channel::<String>(OUTBOUND_CAPACITY);

        // Reader
        tokio::spawn(async move {
            while let Some(msg) = ws_receiver.next().await {
                let text = match msg {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Binary(data)) => match String::from_utf8(data) {
                        Ok(text) => text,
                        Err(_) => {
                            tracing::debug!("Dropping non-utf8 binary frame");
                            continue;
                        }
                    },
                    Ok(Message::Close(frame)) => {
                        tracing::warn!("Coordinator closed connection: {:?}", frame);
                        break;
                    }
                    Err(e) => {
                        tracing::error!("WebSocket error: {}", e);
                        break;
                    }
                    _ => continue,
                };
                if inbound_tx.send(Inbound::Text(text)).await.is_err() {
                    return;
                }
            }
            let _ = inbound_tx.send(Inbound::Closed).await;
        });

        // Writer
        tokio::spawn(async move {
            while let Some(text) = outbound_rx.recv().await {
                if let Err(e) = ws_sender.send(Message::Text(text)).await {
                    tracing::warn!("Send to coordinator failed: {}", e);
                    break;
                }
            }
            let _ = ws_sender.close().await;
        });

        Ok(Self { inbound, outbound })
    }

    /// Transport backed by channels, with the far end handed back
    pub fn in_memory() -> (Self, RemoteEnd) {
        let (inbound_tx, inbound) = mpsc::channel(INBOUND_CAPACITY);
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        (
            Self { inbound, outbound },
            RemoteEnd {
                inbound: inbound_tx,
                outbound: outbound_rx,
            },
        )
    }

    pub async fn send(&self, text: String) -> Result<(), SessionError> {
        self.outbound.send(text).await.map_err(|_| SessionError::Closed)
    }

    /// Next frame; `None` once both the socket and reader are gone
    pub async fn recv(&mut self) -> Option<Inbound> {
        self.inbound.recv().await
    }

    /// Next frame if one is already buffered
    pub fn try_recv(&mut self) -> Option<Inbound> {
        self.inbound.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_round_trip() {
        let (mut transport, mut remote) = Transport::in_memory();
        transport.send("hello".into()).await.unwrap();
        assert_eq!(remote.outbound.recv().await.as_deref(), Some("hello"));

        assert!(remote.push("{}").await);
        remote.close().await;
        assert_eq!(transport.recv().await, Some(Inbound::Text("{}".into())));
        assert_eq!(transport.try_recv(), Some(Inbound::Closed));
        assert_eq!(transport.try_recv(), None);
    }

    #[tokio::test]
    async fn test_send_after_remote_dropped() {
        let (transport, remote) = Transport::in_memory();
        drop(remote);
        assert!(matches!(
            transport.send("x".into()).await,
            Err(SessionError::Closed)
        ));
    }
}
