use crate::error::LlmError;
use crate::streaming::FrameStream;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use reqwest::header::HeaderMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::Message;

const CHANNEL_CAPACITY: usize = 64;

pub(crate) struct AbortOnDrop(pub(crate) JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// An open text-frame connection.
///
/// Dropping the connection, or the frame stream made from it, closes the
/// socket.
pub struct WsConnection {
    outbound: mpsc::Sender<String>,
    inbound: mpsc::Receiver<Result<String, LlmError>>,
    task: Option<AbortOnDrop>,
}

/// Far end of an in-memory [`WsConnection`].
pub struct WsPeer {
    /// Text the connection sent.
    pub sent: mpsc::Receiver<String>,
    /// Frames to deliver to the connection.
    pub frames: mpsc::Sender<Result<String, LlmError>>,
}

impl WsPeer {
    pub async fn next_sent(&mut self) -> Option<String> {
        self.sent.recv().await
    }

    pub async fn push(&self, frame: impl Into<String>) -> bool {
        self.frames.send(Ok(frame.into())).await.is_ok()
    }
}

impl WsConnection {
    /// Connected pair with no socket in between.
    pub fn in_memory() -> (Self, WsPeer) {
        let (outbound, sent) = mpsc::channel(CHANNEL_CAPACITY);
        let (frames, inbound) = mpsc::channel(CHANNEL_CAPACITY);
        let connection = Self {
            outbound,
            inbound,
            task: None,
        };
        (connection, WsPeer { sent, frames })
    }

    pub async fn send(&self, text: impl Into<String>) -> Result<(), LlmError> {
        self.outbound
            .send(text.into())
            .await
            .map_err(|_| LlmError::transport("WebSocket connection is closed", true))
    }

    /// Sender for background writers such as keep-alives.
    pub fn sender(&self) -> mpsc::Sender<String> {
        self.outbound.clone()
    }

    pub async fn recv(&mut self) -> Option<Result<String, LlmError>> {
        self.inbound.recv().await
    }

    /// Remaining inbound frames. The stream owns the connection.
    pub fn into_frames(self) -> FrameStream<String> {
        let Self {
            outbound,
            mut inbound,
            task,
        } = self;
        Box::pin(async_stream::stream! {
            let _task = task;
            let _outbound = outbound;
            while let Some(frame) = inbound.recv().await {
                yield frame;
            }
        })
    }
}

/// Opens text-frame connections.
#[async_trait]
pub trait WebSocketConnector: Send + Sync {
    async fn connect(&self, url: &str, headers: &HeaderMap) -> Result<WsConnection, LlmError>;
}

/// [`WebSocketConnector`] over `tokio-tungstenite`.
#[derive(Debug, Clone, Default)]
pub struct TungsteniteConnector;

impl TungsteniteConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl WebSocketConnector for TungsteniteConnector {
    async fn connect(&self, url: &str, headers: &HeaderMap) -> Result<WsConnection, LlmError> {
        let mut request = url
            .into_client_request()
            .map_err(|e| LlmError::ConfigurationError(format!("Invalid WebSocket URL: {e}")))?;
        for (name, value) in headers {
            request.headers_mut().insert(name, value.clone());
        }

        let (ws, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| LlmError::transport(format!("WebSocket connect failed: {e}"), true))?;
        tracing::debug!(%url, "websocket connected");

        let (mut sink, mut stream) = ws.split();
        let (outbound, mut out_rx) = mpsc::channel::<String>(CHANNEL_CAPACITY);
        let (in_tx, inbound) = mpsc::channel(CHANNEL_CAPACITY);

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    out = out_rx.recv() => {
                        let Some(text) = out else {
                            let _ = sink.close().await;
                            break;
                        };
                        if let Err(e) = sink.send(Message::Text(text.into())).await {
                            let _ = in_tx.send(Err(e.into())).await;
                            break;
                        }
                    }
                    msg = stream.next() => {
                        let frame = match msg {
                            Some(Ok(Message::Text(text))) => Ok(text.as_str().to_owned()),
                            Some(Ok(Message::Binary(bytes))) => String::from_utf8(bytes.to_vec())
                                .map_err(|e| LlmError::ParseError(format!("WebSocket binary frame is not valid UTF-8: {e}"))),
                            Some(Ok(Message::Ping(payload))) => {
                                let _ = sink.send(Message::Pong(payload)).await;
                                continue;
                            }
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Ok(_)) => continue,
                            Some(Err(e)) => Err(e.into()),
                        };
                        let failed = frame.is_err();
                        if in_tx.send(frame).await.is_err() || failed {
                            break;
                        }
                    }
                }
            }
        });

        Ok(WsConnection {
            outbound,
            inbound,
            task: Some(AbortOnDrop(task)),
        })
    }
}
