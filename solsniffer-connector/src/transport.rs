//! The streaming transport seam used by the subscription client.
//!
//! A [`Dialer`] opens a connection and hands back its two halves. The write half
//! sends requests, pings and the close handshake; the read half yields data frames.
//! [`WsDialer`] is the production implementation over `tokio-tungstenite`.

use crate::error::{Result, SnifferError};
use async_trait::async_trait;
use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use tokio::net::TcpStream;
use tokio_tungstenite::{tungstenite::Message, MaybeTlsStream, WebSocketStream};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[async_trait]
pub trait FrameSink: Send {
    async fn send_text(&mut self, text: String) -> Result<()>;
    async fn ping(&mut self) -> Result<()>;
    async fn close(&mut self) -> Result<()>;
}

#[async_trait]
pub trait FrameStream: Send {
    /// Waits for the next data frame. Control frames are consumed silently.
    async fn next_frame(&mut self) -> Result<Vec<u8>>;
}

#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self) -> Result<(Box<dyn FrameSink>, Box<dyn FrameStream>)>;

    /// The endpoint, for logging.
    fn endpoint(&self) -> String;
}

/// Dials a WebSocket endpoint.
#[derive(Debug, Clone)]
pub struct WsDialer {
    url: Url,
}

impl WsDialer {
    pub fn new(url: Url) -> Self {
        Self { url }
    }
}

#[async_trait]
impl Dialer for WsDialer {
    async fn dial(&self) -> Result<(Box<dyn FrameSink>, Box<dyn FrameStream>)> {
        let (stream, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| {
                SnifferError::ConnectionLost(format!("failed to dial {}: {}", self.url, e))
            })?;
        let (sink, stream) = stream.split();
        tracing::debug!(endpoint = %self.url, "WebSocket connection established");
        Ok((Box::new(WsSink(sink)), Box::new(WsFrames(stream))))
    }

    fn endpoint(&self) -> String {
        self.url.to_string()
    }
}

struct WsSink(SplitSink<WsStream, Message>);

#[async_trait]
impl FrameSink for WsSink {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.0
            .send(Message::Text(text))
            .await
            .map_err(|e| SnifferError::ConnectionLost(e.to_string()))
    }

    async fn ping(&mut self) -> Result<()> {
        self.0
            .send(Message::Ping(Vec::new()))
            .await
            .map_err(|e| SnifferError::ConnectionLost(e.to_string()))
    }

    async fn close(&mut self) -> Result<()> {
        self.0
            .close()
            .await
            .map_err(|e| SnifferError::ConnectionLost(e.to_string()))
    }
}

struct WsFrames(SplitStream<WsStream>);

#[async_trait]
impl FrameStream for WsFrames {
    async fn next_frame(&mut self) -> Result<Vec<u8>> {
        loop {
            match self.0.next().await {
                Some(Ok(Message::Text(text))) => return Ok(text.into_bytes()),
                Some(Ok(Message::Binary(data))) => return Ok(data),
                Some(Ok(Message::Close(frame))) => {
                    return Err(SnifferError::ConnectionLost(format!(
                        "closed by peer: {:?}",
                        frame
                    )))
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(SnifferError::ConnectionLost(e.to_string())),
                None => {
                    return Err(SnifferError::ConnectionLost(
                        "stream ended".to_string(),
                    ))
                }
            }
        }
    }
}
