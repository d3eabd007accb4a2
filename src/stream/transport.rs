//! Telemetry transports
//!
//! A `Connector` opens one logical connection and hands back a stream of raw text
//! messages. The supervisor owns retry and decoding; connectors only move bytes.
//!
//! Current implementations:
//! - WebSocket: the live device stream
//! - Replay: a recorded JSON-lines capture played back at a fixed interval

use futures_util::future::BoxFuture;
use futures_util::stream::{self, BoxStream};
use futures_util::{FutureExt, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// Raw text messages from one connection; the stream ends when the peer closes.
pub type MessageStream = BoxStream<'static, Result<String, TransportError>>;

/// Errors raised by a transport.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("receive failed: {0}")]
    Receive(String),
    #[error("capture file error: {0}")]
    Capture(String),
}

/// Opens connections to a telemetry source.
pub trait Connector: Send + Sync + 'static {
    /// Open a new connection.
    fn connect(&self) -> BoxFuture<'static, Result<MessageStream, TransportError>>;

    /// Short description for logs.
    fn describe(&self) -> String;
}

/// Upper bound on the WebSocket handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// WebSocket connection to the device gateway.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
    connect_timeout: Duration,
}

impl WebSocketConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Connector for WebSocketConnector {
    fn connect(&self) -> BoxFuture<'static, Result<MessageStream, TransportError>> {
        let url = self.url.clone();
        let connect_timeout = self.connect_timeout;
        async move {
            let (ws_stream, _) = tokio::time::timeout(connect_timeout, connect_async(url.as_str()))
                .await
                .map_err(|_| {
                    TransportError::Connect(format!(
                        "handshake timed out after {:.1}s",
                        connect_timeout.as_secs_f64()
                    ))
                })?
                .map_err(|e| TransportError::Connect(e.to_string()))?;

            let messages = ws_stream.filter_map(|message| async move {
                match message {
                    Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                    Ok(Message::Binary(data)) => Some(
                        String::from_utf8(data.to_vec())
                            .map_err(|e| TransportError::Receive(format!("binary frame: {e}"))),
                    ),
                    // Ping/pong are answered by the library; close ends the stream.
                    Ok(_) => None,
                    Err(e) => Some(Err(TransportError::Receive(e.to_string()))),
                }
            });

            Ok(messages.boxed())
        }
        .boxed()
    }

    fn describe(&self) -> String {
        format!("websocket {}", self.url)
    }
}

/// Plays back recorded messages, one per `interval`.
///
/// Useful for replaying a captured session and for exercising the pipeline
/// without hardware.
#[derive(Debug, Clone)]
pub struct ReplayConnector {
    messages: Vec<String>,
    interval: Duration,
    loop_playback: bool,
    origin: Option<PathBuf>,
}

impl ReplayConnector {
    pub fn new(messages: Vec<String>, interval: Duration) -> Self {
        Self {
            messages,
            interval,
            loop_playback: false,
            origin: None,
        }
    }

    /// Load a JSON-lines capture; blank lines are skipped.
    pub fn from_capture(path: &Path, interval: Duration) -> Result<Self, TransportError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| TransportError::Capture(format!("{}: {e}", path.display())))?;
        let messages: Vec<String> = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_owned)
            .collect();

        if messages.is_empty() {
            return Err(TransportError::Capture(format!(
                "{}: no messages",
                path.display()
            )));
        }

        Ok(Self {
            messages,
            interval,
            loop_playback: false,
            origin: Some(path.to_path_buf()),
        })
    }

    /// Restart from the first message when the capture runs out.
    pub fn looping(mut self) -> Self {
        self.loop_playback = true;
        self
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl Connector for ReplayConnector {
    fn connect(&self) -> BoxFuture<'static, Result<MessageStream, TransportError>> {
        let messages = Arc::new(self.messages.clone());
        let interval = self.interval;
        let loop_playback = self.loop_playback;

        async move {
            let playback = stream::unfold(0usize, move |index| {
                let messages = Arc::clone(&messages);
                async move {
                    let position = if loop_playback && !messages.is_empty() {
                        index % messages.len()
                    } else {
                        index
                    };
                    let message = messages.get(position)?.clone();
                    if index > 0 {
                        tokio::time::sleep(interval).await;
                    }
                    Some((Ok(message), index + 1))
                }
            });
            Ok(playback.boxed())
        }
        .boxed()
    }

    fn describe(&self) -> String {
        match &self.origin {
            Some(path) => format!("replay {}", path.display()),
            None => format!("replay of {} messages", self.messages.len()),
        }
    }
}
