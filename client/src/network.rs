//! WebSocket client connection: JSON envelope encode/decode over a split
//! stream. Undecodable frames from the server are logged and skipped.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{info, warn};
use shared::protocol::{decode_server, encode, ClientMessage, InputPayload, ServerMessage};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type ClientError = Box<dyn std::error::Error + Send + Sync>;
type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Outbound half of a connection.
pub struct MessageSink {
    sender: WsSink,
}

impl MessageSink {
    pub async fn send(&mut self, message: &ClientMessage) -> Result<(), ClientError> {
        let text = encode(message)?;
        self.sender.send(Message::Text(text)).await?;
        Ok(())
    }

    pub async fn join(
        &mut self,
        name: Option<String>,
        character_class: Option<String>,
        resume_token: Option<String>,
    ) -> Result<(), ClientError> {
        self.send(&ClientMessage::Join {
            name,
            character_class,
            resume_token,
        })
        .await
    }

    pub async fn send_input(
        &mut self,
        sequence: u32,
        input: InputPayload,
    ) -> Result<(), ClientError> {
        self.send(&ClientMessage::Input { sequence, input }).await
    }

    pub async fn heartbeat(&mut self) -> Result<(), ClientError> {
        self.send(&ClientMessage::Heartbeat {}).await
    }

    pub async fn close(&mut self) {
        let _ = self.sender.send(Message::Close(None)).await;
    }
}

/// Inbound half of a connection.
pub struct MessageSource {
    receiver: WsSource,
}

impl MessageSource {
    /// Next decodable server message, or `None` once the connection closes.
    pub async fn next_message(&mut self) -> Option<ServerMessage> {
        while let Some(frame) = self.receiver.next().await {
            match frame {
                Ok(Message::Text(text)) => match decode_server(&text) {
                    Ok(message) => return Some(message),
                    Err(e) => warn!("undecodable server message skipped: {}", e),
                },
                Ok(Message::Close(_)) | Err(_) => return None,
                Ok(_) => {}
            }
        }
        None
    }
}

pub struct Connection {
    sink: MessageSink,
    source: MessageSource,
}

impl Connection {
    pub async fn connect(url: &str) -> Result<Self, ClientError> {
        let (stream, _) = connect_async(url).await?;
        info!("connected to {}", url);
        let (sender, receiver) = stream.split();
        Ok(Connection {
            sink: MessageSink { sender },
            source: MessageSource { receiver },
        })
    }

    /// Separates the two halves so sending and receiving can live on
    /// different tasks.
    pub fn into_split(self) -> (MessageSink, MessageSource) {
        (self.sink, self.source)
    }

    pub async fn send(&mut self, message: &ClientMessage) -> Result<(), ClientError> {
        self.sink.send(message).await
    }

    pub async fn join(
        &mut self,
        name: Option<String>,
        character_class: Option<String>,
        resume_token: Option<String>,
    ) -> Result<(), ClientError> {
        self.sink.join(name, character_class, resume_token).await
    }

    pub async fn send_input(
        &mut self,
        sequence: u32,
        input: InputPayload,
    ) -> Result<(), ClientError> {
        self.sink.send_input(sequence, input).await
    }

    pub async fn heartbeat(&mut self) -> Result<(), ClientError> {
        self.sink.heartbeat().await
    }

    pub async fn next_message(&mut self) -> Option<ServerMessage> {
        self.source.next_message().await
    }

    pub async fn close(&mut self) {
        self.sink.close().await
    }
}
