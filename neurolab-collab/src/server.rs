//! WebSocket relay server with room-based fan-out.
//!
//! Architecture:
//! ```text
//! Client A ──┐                         ┌──► Client B
//!            ├── connection task ──► EventRelay ──► RoomRegistry lookup
//! Client C ──┘   (PeerLifecycle)       └──► Client C
//! ```
//!
//! Each connection runs in its own task that owns a [`PeerLifecycle`] and
//! selects between inbound frames and its outbound queue. The registry is
//! the only shared state; the server never stores the shared artifact, so
//! late joiners learn it from the peers already in the room.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio_tungstenite::tungstenite::Message;

use crate::error::RelayError;
use crate::lifecycle::{JoinNotice, PeerLifecycle};
use crate::protocol::{ClientEvent, PeerId, ProtocolError, Route, ServerEvent, WireFormat, WireMessage};
use crate::registry::RoomRegistry;
use crate::relay::{EventRelay, RelayStats};
use crate::session::SessionHandle;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Outbound frames buffered per session before new ones are dropped
    pub outbound_capacity: usize,
    /// Who hears about a new member
    pub join_notice: JoinNotice,
    /// Also ask existing members to re-announce state on join
    pub request_state_refresh: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: format!("0.0.0.0:{}", Self::DEFAULT_PORT),
            outbound_capacity: 256,
            join_notice: JoinNotice::default(),
            request_state_refresh: false,
        }
    }
}

/// Invalid configuration value.
#[derive(Debug, Error)]
#[error("invalid value {value:?} for {key}: {reason}")]
pub struct ConfigError {
    pub key: &'static str,
    pub value: String,
    pub reason: String,
}

impl ServerConfig {
    pub const DEFAULT_PORT: u16 = 3001;

    /// Read configuration from the process environment.
    ///
    /// `PORT` (default 3001), `NEUROLAB_HOST` (default `0.0.0.0`),
    /// `NEUROLAB_OUTBOUND_CAPACITY`, `NEUROLAB_JOIN_NOTICE`
    /// (`existing` | `everyone`), `NEUROLAB_REQUEST_REFRESH`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let port = match lookup("PORT") {
            Some(raw) => parse(&raw, "PORT", |v| v.trim().parse::<u16>().map_err(|e| e.to_string()))?,
            None => Self::DEFAULT_PORT,
        };
        let host = lookup("NEUROLAB_HOST")
            .map(|h| h.trim().to_owned())
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| "0.0.0.0".to_string());

        let outbound_capacity = match lookup("NEUROLAB_OUTBOUND_CAPACITY") {
            Some(raw) => parse(&raw, "NEUROLAB_OUTBOUND_CAPACITY", |v| {
                match v.trim().parse::<usize>() {
                    Ok(0) => Err("must be at least 1".to_string()),
                    Ok(n) => Ok(n),
                    Err(e) => Err(e.to_string()),
                }
            })?,
            None => defaults.outbound_capacity,
        };

        let join_notice = match lookup("NEUROLAB_JOIN_NOTICE") {
            Some(raw) => parse(&raw, "NEUROLAB_JOIN_NOTICE", |v| v.parse::<JoinNotice>())?,
            None => defaults.join_notice,
        };

        let request_state_refresh = match lookup("NEUROLAB_REQUEST_REFRESH") {
            Some(raw) => parse(&raw, "NEUROLAB_REQUEST_REFRESH", parse_flag)?,
            None => defaults.request_state_refresh,
        };

        Ok(Self {
            bind_addr: format!("{host}:{port}"),
            outbound_capacity,
            join_notice,
            request_state_refresh,
        })
    }
}

fn parse<T>(
    raw: &str,
    key: &'static str,
    f: impl FnOnce(&str) -> Result<T, String>,
) -> Result<T, ConfigError> {
    f(raw).map_err(|reason| ConfigError { key, value: raw.to_string(), reason })
}

fn parse_flag(raw: &str) -> Result<bool, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(format!("expected a boolean, got `{other}`")),
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_frames: u64,
    pub total_bytes: u64,
    pub malformed_frames: u64,
    pub active_rooms: usize,
    pub relay: RelayStats,
}

/// Human-readable time stamped on chat messages.
fn chat_timestamp() -> String {
    chrono::Local::now().format("%H:%M:%S").to_string()
}

/// The relay server.
pub struct RelayServer {
    config: ServerConfig,
    relay: Arc<EventRelay>,
    stats: Arc<RwLock<ServerStats>>,
}

impl RelayServer {
    pub fn new(config: ServerConfig) -> Self {
        let registry = Arc::new(RoomRegistry::new());
        Self {
            config,
            relay: Arc::new(EventRelay::new(registry)),
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    /// Create with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    /// Bind the configured address and serve until the listener fails.
    pub async fn run(&self) -> Result<(), BoxError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already-bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), BoxError> {
        log::info!("Relay server listening on {}", listener.local_addr()?);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let relay = self.relay.clone();
            let stats = self.stats.clone();
            let config = self.config.clone();

            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, relay, stats, config).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Handle a single WebSocket connection.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        relay: Arc<EventRelay>,
        stats: Arc<RwLock<ServerStats>>,
        config: ServerConfig,
    ) -> Result<(), BoxError> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let peer_id = PeerId::random();
        let (session, mut outbound_rx) = SessionHandle::new(peer_id, config.outbound_capacity);
        let mut lifecycle = PeerLifecycle::new(
            session,
            relay.clone(),
            config.join_notice,
            config.request_state_refresh,
        );
        // Answer in whatever encoding the peer last used.
        let mut format = WireFormat::Json;

        log::info!("Peer {peer_id} connected from {addr}");

        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        let welcome = ServerEvent::Connected { peer_id };
        let mut result = match encode_frame(&welcome, format) {
            Ok(frame) => ws_sender.send(frame).await.map_err(BoxError::from),
            Err(e) => Err(e.into()),
        };

        while result.is_ok() {
            tokio::select! {
                msg = ws_receiver.next() => {
                    let decoded = match msg {
                        Some(Ok(Message::Text(text))) => {
                            format = WireFormat::Json;
                            Self::count_frame(&stats, text.len()).await;
                            ClientEvent::from_json(text.as_str())
                        }
                        Some(Ok(Message::Binary(data))) => {
                            format = WireFormat::Binary;
                            Self::count_frame(&stats, data.len()).await;
                            ClientEvent::from_binary(&data)
                        }
                        Some(Ok(Message::Ping(data))) => {
                            result = ws_sender.send(Message::Pong(data)).await.map_err(BoxError::from);
                            continue;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            log::info!("Connection closed from {addr}");
                            break;
                        }
                        Some(Err(e)) => {
                            result = Err(e.into());
                            break;
                        }
                        Some(Ok(_)) => continue,
                    };

                    Self::dispatch(decoded, &mut lifecycle, &relay, &stats).await;
                }

                Some(event) = outbound_rx.recv() => {
                    result = match encode_frame(&event, format) {
                        Ok(frame) => ws_sender.send(frame).await.map_err(|e| {
                            log::debug!("{}", RelayError::TransportFailure(peer_id));
                            BoxError::from(e)
                        }),
                        Err(e) => {
                            log::warn!("Could not encode {} for {peer_id}: {e}", event.name());
                            Ok(())
                        }
                    };
                }
            }
        }

        // Runs on every exit path, so remaining members always hear peer_left.
        lifecycle.disconnect().await;

        {
            let mut s = stats.write().await;
            s.active_connections = s.active_connections.saturating_sub(1);
        }
        log::info!("Peer {peer_id} disconnected");

        result
    }

    /// Route one decoded frame. Errors stop here and are only logged.
    async fn dispatch(
        decoded: Result<ClientEvent, ProtocolError>,
        lifecycle: &mut PeerLifecycle,
        relay: &EventRelay,
        stats: &RwLock<ServerStats>,
    ) {
        let peer = lifecycle.peer_id();
        let event = match decoded {
            Ok(event) => event,
            Err(e) => {
                log::warn!("Dropping frame from {peer}: {}", RelayError::from(e));
                stats.write().await.malformed_frames += 1;
                return;
            }
        };

        match event.route(peer, chat_timestamp) {
            Route::Join(room) => {
                if let Err(e) = lifecycle.join(room).await {
                    log::warn!("Join rejected for {peer}: {e}");
                }
            }
            Route::Relay { room, event, scope } => {
                if let Err(e) = relay.relay(event, peer, &room, scope).await {
                    log::debug!("Relay from {peer} failed: {e}");
                }
            }
        }
    }

    async fn count_frame(stats: &RwLock<ServerStats>, len: usize) {
        let mut s = stats.write().await;
        s.total_frames += 1;
        s.total_bytes += len as u64;
    }

    /// Get server statistics.
    pub async fn stats(&self) -> ServerStats {
        let mut stats = self.stats.read().await.clone();
        stats.active_rooms = self.relay.registry().room_count().await;
        stats.relay = self.relay.stats();
        stats
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get the configured bind address.
    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn registry(&self) -> &Arc<RoomRegistry> {
        self.relay.registry()
    }
}

fn encode_frame(event: &ServerEvent, format: WireFormat) -> Result<Message, ProtocolError> {
    Ok(match format {
        WireFormat::Json => Message::Text(event.to_json()?.into()),
        WireFormat::Binary => Message::Binary(event.to_binary()?.into()),
    })
}
