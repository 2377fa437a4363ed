//! WebSocket client for connecting to the relay server.
//!
//! A [`RelayClient`] is an explicitly constructed connection handle: the
//! application creates it, connects it, and passes it to whatever needs to
//! send events. There is no process-wide socket.
//!
//! Provides:
//! - Connection lifecycle (connect, close)
//! - Sending [`ClientEvent`]s in JSON or binary frames
//! - A stream of inbound [`ServerEvent`]s; the stream ends when the
//!   connection is lost
//!
//! There is no reconnect. A new connection is a new peer and has to join
//! and catch up from scratch.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;

use crate::protocol::{ClientEvent, PeerId, ProtocolError, RoomKey, ServerEvent, WireFormat, WireMessage};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// The relay client.
pub struct RelayClient {
    server_url: String,
    format: WireFormat,

    /// Connection state
    state: Arc<RwLock<ConnectionState>>,

    /// Identity assigned by the server in its `connected` frame
    peer_id: Arc<RwLock<Option<PeerId>>>,

    /// Channel to the WebSocket writer task
    outgoing_tx: Option<mpsc::Sender<Message>>,

    /// Event receiver for the application
    event_rx: Option<mpsc::Receiver<ServerEvent>>,

    /// Moved into the reader task on connect
    event_tx: Option<mpsc::Sender<ServerEvent>>,
}

impl RelayClient {
    /// Create a new client for `server_url` (`ws://host:port`).
    pub fn new(server_url: impl Into<String>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            server_url: server_url.into(),
            format: WireFormat::Json,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            peer_id: Arc::new(RwLock::new(None)),
            outgoing_tx: None,
            event_rx: Some(event_rx),
            event_tx: Some(event_tx),
        }
    }

    /// Use the given frame encoding for outgoing events.
    pub fn with_format(mut self, format: WireFormat) -> Self {
        self.format = format;
        self
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<ServerEvent>> {
        self.event_rx.take()
    }

    /// Connect to the server.
    ///
    /// Spawns background tasks for reading/writing WebSocket messages.
    /// A client connects at most once.
    pub async fn connect(&mut self) -> Result<(), ProtocolError> {
        let Some(event_tx) = self.event_tx.take() else {
            return Err(ProtocolError::Connect("client was already connected once".to_string()));
        };

        *self.state.write().await = ConnectionState::Connecting;

        let (ws_stream, _) = match tokio_tungstenite::connect_async(self.server_url.as_str()).await {
            Ok(connected) => connected,
            Err(e) => {
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(ProtocolError::Connect(e.to_string()));
            }
        };
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        // Writer task: forward outgoing channel to WebSocket
        let (out_tx, mut out_rx) = mpsc::channel::<Message>(256);
        self.outgoing_tx = Some(out_tx);
        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                let closing = matches!(frame, Message::Close(_));
                if ws_writer.send(frame).await.is_err() || closing {
                    break;
                }
            }
        });

        *self.state.write().await = ConnectionState::Connected;

        // Reader task: decode inbound frames into events
        let state = self.state.clone();
        let peer_id = self.peer_id.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                let decoded = match msg {
                    Ok(Message::Text(text)) => ServerEvent::from_json(text.as_str()),
                    Ok(Message::Binary(data)) => ServerEvent::from_binary(&data),
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => continue,
                };

                match decoded {
                    Ok(event) => {
                        if let ServerEvent::Connected { peer_id: id } = &event {
                            *peer_id.write().await = Some(*id);
                        }
                        if event_tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => log::warn!("Ignoring undecodable frame from server: {e}"),
                }
            }

            // Connection lost; dropping event_tx ends the application's stream.
            *state.write().await = ConnectionState::Disconnected;
        });

        Ok(())
    }

    /// Send an event to the server.
    pub async fn send(&self, event: &ClientEvent) -> Result<(), ProtocolError> {
        let frame = match self.format {
            WireFormat::Json => Message::Text(event.to_json()?.into()),
            WireFormat::Binary => Message::Binary(event.to_binary()?.into()),
        };
        self.send_frame(frame).await
    }

    /// Join a room.
    pub async fn join(&self, room: impl Into<RoomKey>) -> Result<(), ProtocolError> {
        self.send(&ClientEvent::JoinRoom { room: room.into() }).await
    }

    /// Send every event in order.
    pub async fn send_all(&self, events: &[ClientEvent]) -> Result<(), ProtocolError> {
        for event in events {
            self.send(event).await?;
        }
        Ok(())
    }

    /// Close the connection. The server treats this as a disconnect.
    pub async fn close(&mut self) -> Result<(), ProtocolError> {
        let result = self.send_frame(Message::Close(None)).await;
        self.outgoing_tx = None;
        *self.state.write().await = ConnectionState::Disconnected;
        result
    }

    async fn send_frame(&self, frame: Message) -> Result<(), ProtocolError> {
        if *self.state.read().await != ConnectionState::Connected {
            return Err(ProtocolError::ConnectionClosed);
        }
        let tx = self.outgoing_tx.as_ref().ok_or(ProtocolError::ConnectionClosed)?;
        tx.send(frame).await.map_err(|_| ProtocolError::ConnectionClosed)
    }

    /// Get the current connection state.
    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Identity assigned by the server, once its welcome frame arrived.
    pub async fn peer_id(&self) -> Option<PeerId> {
        *self.peer_id.read().await
    }

    /// Get the server URL.
    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    pub fn format(&self) -> WireFormat {
        self.format
    }
}
