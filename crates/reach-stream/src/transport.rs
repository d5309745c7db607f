//! Message-oriented duplex channels carrying PCD2 frames and control text.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

use crate::error::{Result, StreamError};

/// One message on the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    /// Control text.
    Text(String),
    /// PCD2 frame.
    Binary(Vec<u8>),
}

/// A connected, ordered, message-oriented channel.
///
/// Reconnection and authentication belong to implementations, not callers.
#[async_trait]
pub trait Transport: Send {
    /// Whether messages can currently be sent.
    fn is_open(&self) -> bool;

    /// Send a control string.
    async fn send_text(&mut self, text: &str) -> Result<()>;

    /// Send one binary frame.
    async fn send_binary(&mut self, bytes: Vec<u8>) -> Result<()>;

    /// Next message from the peer; `None` once the peer has closed.
    async fn recv(&mut self) -> Result<Option<WireMessage>>;

    /// Close the sending half.
    async fn close(&mut self) -> Result<()>;
}

/// In-process transport backed by a pair of tokio channels.
#[derive(Debug)]
pub struct MemoryTransport {
    tx: Option<mpsc::UnboundedSender<WireMessage>>,
    rx: mpsc::UnboundedReceiver<WireMessage>,
}

impl MemoryTransport {
    /// Two connected ends: whatever one sends, the other receives.
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (
            Self {
                tx: Some(a_tx),
                rx: b_rx,
            },
            Self {
                tx: Some(b_tx),
                rx: a_rx,
            },
        )
    }

    /// Next message if one is already queued.
    pub fn try_recv(&mut self) -> Option<WireMessage> {
        self.rx.try_recv().ok()
    }

    fn push(&self, msg: WireMessage) -> Result<()> {
        let tx = self.tx.as_ref().ok_or(StreamError::Closed)?;
        tx.send(msg).map_err(|_| StreamError::Closed)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn is_open(&self) -> bool {
        self.tx.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    async fn send_text(&mut self, text: &str) -> Result<()> {
        self.push(WireMessage::Text(text.to_string()))
    }

    async fn send_binary(&mut self, bytes: Vec<u8>) -> Result<()> {
        self.push(WireMessage::Binary(bytes))
    }

    async fn recv(&mut self) -> Result<Option<WireMessage>> {
        Ok(self.rx.recv().await)
    }

    async fn close(&mut self) -> Result<()> {
        self.tx = None;
        Ok(())
    }
}

/// WebSocket transport over tokio-tungstenite.
pub struct WsTransport<S> {
    ws: WebSocketStream<S>,
    open: bool,
}

impl WsTransport<MaybeTlsStream<TcpStream>> {
    /// Connect as a client. A bare `host:port` is treated as `ws://`.
    pub async fn connect(address: &str) -> Result<Self> {
        let url = if address.starts_with("ws://") || address.starts_with("wss://") {
            address.to_string()
        } else {
            format!("ws://{address}")
        };
        let (ws, _) = connect_async(url.as_str())
            .await
            .map_err(|e| StreamError::Transport(e.to_string()))?;
        info!(%url, "websocket connected");
        Ok(Self { ws, open: true })
    }
}

impl WsTransport<TcpStream> {
    /// Complete the server-side handshake on an accepted TCP connection.
    pub async fn accept(stream: TcpStream) -> Result<Self> {
        let ws = accept_async(stream)
            .await
            .map_err(|e| StreamError::Transport(e.to_string()))?;
        Ok(Self { ws, open: true })
    }
}

impl<S> WsTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send_message(&mut self, msg: Message) -> Result<()> {
        if !self.open {
            return Err(StreamError::Closed);
        }
        self.ws.send(msg).await.map_err(|e| {
            self.open = false;
            StreamError::Transport(e.to_string())
        })
    }
}

#[async_trait]
impl<S> Transport for WsTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn is_open(&self) -> bool {
        self.open
    }

    async fn send_text(&mut self, text: &str) -> Result<()> {
        self.send_message(Message::Text(text.to_string())).await
    }

    async fn send_binary(&mut self, bytes: Vec<u8>) -> Result<()> {
        self.send_message(Message::Binary(bytes)).await
    }

    async fn recv(&mut self) -> Result<Option<WireMessage>> {
        while let Some(msg) = self.ws.next().await {
            match msg.map_err(|e| StreamError::Transport(e.to_string()))? {
                Message::Text(text) => return Ok(Some(WireMessage::Text(text))),
                Message::Binary(bytes) => return Ok(Some(WireMessage::Binary(bytes))),
                Message::Close(frame) => {
                    debug!(?frame, "websocket closed by peer");
                    self.open = false;
                    return Ok(None);
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
        self.open = false;
        Ok(None)
    }

    async fn close(&mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        self.ws
            .close(None)
            .await
            .map_err(|e| StreamError::Transport(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_pair_is_duplex_and_ordered() {
        let (mut a, mut b) = MemoryTransport::pair();
        a.send_text("ping").await.unwrap();
        a.send_binary(vec![1, 2, 3]).await.unwrap();
        b.send_text("pong").await.unwrap();

        assert_eq!(b.recv().await.unwrap(), Some(WireMessage::Text("ping".into())));
        assert_eq!(b.recv().await.unwrap(), Some(WireMessage::Binary(vec![1, 2, 3])));
        assert_eq!(a.recv().await.unwrap(), Some(WireMessage::Text("pong".into())));
    }

    #[tokio::test]
    async fn closing_ends_peer_stream() {
        let (mut a, mut b) = MemoryTransport::pair();
        assert!(a.is_open());
        a.send_text("last").await.unwrap();
        a.close().await.unwrap();

        assert!(!a.is_open());
        assert!(matches!(a.send_text("more").await, Err(StreamError::Closed)));
        assert_eq!(b.recv().await.unwrap(), Some(WireMessage::Text("last".into())));
        assert_eq!(b.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn dropped_peer_is_not_open() {
        let (a, b) = MemoryTransport::pair();
        drop(b);
        assert!(!a.is_open());
    }

    #[tokio::test]
    async fn websocket_round_trip() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = WsTransport::accept(stream).await.unwrap();
            let msg = ws.recv().await.unwrap();
            ws.send_text("pong").await.unwrap();
            msg
        });

        let mut client = WsTransport::connect(&addr.to_string()).await.unwrap();
        client.send_binary(b"PCD2".to_vec()).await.unwrap();
        assert_eq!(
            client.recv().await.unwrap(),
            Some(WireMessage::Text("pong".into()))
        );
        assert_eq!(
            server.await.unwrap(),
            Some(WireMessage::Binary(b"PCD2".to_vec()))
        );
    }
}
