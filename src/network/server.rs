//! Realtime Gateway
//!
//! Async WebSocket server managing connections, room broadcast groups,
//! and routing between clients and the session coordinator. Identity is
//! bound to a connection once, at authentication; inbound events are
//! acted on under that identity only.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::time::interval;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, instrument, warn};

use crate::accounts::AccountStore;
use crate::game::room::PlayerId;
use crate::network::auth::{verify_token, AuthConfig};
use crate::network::protocol::{
    AuthRequest, AuthResult, ClientMessage, ErrorCode, ServerError, ServerMessage,
};
use crate::session::cleanup::{self, CleanupConfig};
use crate::session::coordinator::{Coordinator, JoinOutcome, MoveReply};

/// Connection identifier, unique for the gateway's lifetime.
pub type ConnId = u64;

/// Outbound queue depth per connection. A slow client loses messages
/// rather than stalling the room; delivery is best-effort by design.
const OUTBOUND_QUEUE: usize = 64;

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Close connections with no inbound frames for this long.
    pub idle_timeout: Duration,
    /// Server version string.
    pub version: String,
    /// Token verification settings.
    pub auth: AuthConfig,
    /// Room retirement settings.
    pub cleanup: CleanupConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".parse().expect("static bind addr"),
            max_connections: 1000,
            idle_timeout: Duration::from_secs(300),
            version: env!("CARGO_PKG_VERSION").to_string(),
            auth: AuthConfig::default(),
            cleanup: CleanupConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Create config from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: std::env::var("BIND_ADDR")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.bind_addr),
            auth: AuthConfig::from_env(),
            ..defaults
        }
    }
}

/// Gateway errors.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Failed to bind the listener.
    #[error("failed to bind: {0}")]
    Bind(#[from] std::io::Error),
}

/// Per-connection state, scoped to the gateway's lifetime and cleared
/// on disconnect.
struct ConnectionEntry {
    /// Identity bound at authentication.
    identity: Option<PlayerId>,
    /// Room this connection is subscribed to.
    room: Option<String>,
    /// Outbound channel (for direct messaging outside the room group).
    #[allow(dead_code)]
    sender: mpsc::Sender<ServerMessage>,
    /// Connection time, for logs.
    connected_at: Instant,
}

// =============================================================================
// BROADCAST GROUPS
// =============================================================================

/// Room-keyed broadcast groups: every connection subscribed to a code
/// receives that room's snapshots.
#[derive(Default)]
pub struct RoomGroups {
    groups: RwLock<BTreeMap<String, BTreeMap<ConnId, mpsc::Sender<ServerMessage>>>>,
}

impl RoomGroups {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to a room's group.
    pub async fn subscribe(&self, code: &str, conn: ConnId, sender: mpsc::Sender<ServerMessage>) {
        let mut groups = self.groups.write().await;
        groups.entry(code.to_string()).or_default().insert(conn, sender);
    }

    /// Remove a connection from a room's group; returns how many members
    /// remain so the caller can mark the room empty.
    pub async fn unsubscribe(&self, code: &str, conn: ConnId) -> usize {
        let mut groups = self.groups.write().await;
        let Some(members) = groups.get_mut(code) else {
            return 0;
        };
        members.remove(&conn);
        let remaining = members.len();
        if remaining == 0 {
            groups.remove(code);
        }
        remaining
    }

    /// Deliver a message to every group member, best-effort.
    pub async fn broadcast(&self, code: &str, message: ServerMessage) {
        let senders: Vec<_> = {
            let groups = self.groups.read().await;
            match groups.get(code) {
                Some(members) => members.values().cloned().collect(),
                None => return,
            }
        };
        for sender in senders {
            let _ = sender.send(message.clone()).await;
        }
    }

    /// Drop a whole group (room retired).
    pub async fn drop_group(&self, code: &str) {
        self.groups.write().await.remove(code);
    }

    /// Current member count for a room.
    pub async fn member_count(&self, code: &str) -> usize {
        self.groups
            .read()
            .await
            .get(code)
            .map_or(0, |members| members.len())
    }
}

// =============================================================================
// GATEWAY
// =============================================================================

/// The realtime gateway.
pub struct Gateway {
    config: GatewayConfig,
    coordinator: Arc<Coordinator>,
    accounts: Arc<dyn AccountStore>,
    groups: Arc<RoomGroups>,
    connections: Arc<RwLock<BTreeMap<ConnId, ConnectionEntry>>>,
    next_conn_id: AtomicU64,
    shutdown_tx: broadcast::Sender<()>,
}

impl Gateway {
    /// Create a new gateway.
    pub fn new(
        config: GatewayConfig,
        coordinator: Arc<Coordinator>,
        accounts: Arc<dyn AccountStore>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            coordinator,
            accounts,
            groups: Arc::new(RoomGroups::new()),
            connections: Arc::new(RwLock::new(BTreeMap::new())),
            next_conn_id: AtomicU64::new(1),
            shutdown_tx,
        }
    }

    /// Run the gateway until shutdown.
    #[instrument(skip(self))]
    pub async fn run(self: Arc<Self>) -> Result<(), GatewayError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!("gateway listening on {}", self.config.bind_addr);

        let sweeper = tokio::spawn(Self::run_cleanup_loop(
            self.coordinator.clone(),
            self.groups.clone(),
            self.config.cleanup.clone(),
            self.shutdown_tx.subscribe(),
        ));

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let open = self.connections.read().await.len();
                            if open >= self.config.max_connections {
                                warn!("connection limit reached, rejecting {}", addr);
                                continue;
                            }
                            debug!("new connection from {}", addr);
                            Self::spawn_connection(Arc::clone(&self), stream, addr);
                        }
                        Err(e) => {
                            error!("accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("shutdown signal received");
                    break;
                }
            }
        }

        sweeper.abort();
        Ok(())
    }

    /// Signal shutdown to the accept loop and every connection.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Active connection count.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Periodic room retirement sweep.
    async fn run_cleanup_loop(
        coordinator: Arc<Coordinator>,
        groups: Arc<RoomGroups>,
        config: CleanupConfig,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        let mut ticker = interval(config.sweep_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed =
                        cleanup::sweep(coordinator.store(), Instant::now(), &config).await;
                    for code in removed {
                        groups.drop_group(&code).await;
                    }
                }
                _ = shutdown_rx.recv() => break,
            }
        }
    }

    /// Spawn the handler task for one accepted TCP connection.
    fn spawn_connection(gateway: Arc<Self>, stream: TcpStream, addr: SocketAddr) {
        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    debug!("websocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(OUTBOUND_QUEUE);

            let conn_id = gateway.next_conn_id.fetch_add(1, Ordering::Relaxed);
            {
                let mut connections = gateway.connections.write().await;
                connections.insert(
                    conn_id,
                    ConnectionEntry {
                        identity: None,
                        room: None,
                        sender: msg_tx.clone(),
                        connected_at: Instant::now(),
                    },
                );
            }

            // Outbound pump: serialize and forward until the queue closes.
            let sender_task = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("failed to serialize message: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
            });

            let mut shutdown_rx = gateway.shutdown_tx.subscribe();
            loop {
                tokio::select! {
                    frame = tokio::time::timeout(
                        gateway.config.idle_timeout,
                        ws_receiver.next(),
                    ) => {
                        match frame {
                            Err(_) => {
                                debug!("conn {} idle, closing", conn_id);
                                break;
                            }
                            Ok(Some(Ok(Message::Text(text)))) => {
                                let msg = match ClientMessage::from_json(&text) {
                                    Ok(m) => m,
                                    Err(e) => {
                                        debug!("invalid message on conn {}: {}", conn_id, e);
                                        let _ = msg_tx
                                            .send(ServerMessage::Error(ServerError {
                                                code: ErrorCode::InvalidMessage,
                                                message: "invalid message format".to_string(),
                                            }))
                                            .await;
                                        continue;
                                    }
                                };
                                gateway.handle_message(conn_id, msg, &msg_tx).await;
                            }
                            Ok(Some(Ok(Message::Close(_)))) | Ok(None) => {
                                debug!("conn {} closed", conn_id);
                                break;
                            }
                            Ok(Some(Err(e))) => {
                                debug!("websocket error on conn {}: {}", conn_id, e);
                                break;
                            }
                            Ok(Some(Ok(_))) => {}
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        let _ = msg_tx
                            .send(ServerMessage::Shutdown {
                                reason: "server shutting down".to_string(),
                            })
                            .await;
                        break;
                    }
                }
            }

            sender_task.abort();
            gateway.disconnect(conn_id).await;
        });
    }

    /// Route one parsed client message.
    async fn handle_message(
        &self,
        conn_id: ConnId,
        msg: ClientMessage,
        sender: &mpsc::Sender<ServerMessage>,
    ) {
        match msg {
            ClientMessage::Auth(auth) => self.handle_auth(conn_id, auth, sender).await,
            ClientMessage::Join(join) => self.handle_join(conn_id, &join.code, sender).await,
            ClientMessage::Move(mv) => {
                self.handle_move(conn_id, &mv.code, mv.cell, sender).await;
            }
            ClientMessage::Leave => self.leave_room(conn_id).await,
            ClientMessage::Ping { timestamp } => {
                let _ = sender
                    .send(ServerMessage::Pong {
                        timestamp,
                        server_time: SystemTime::now()
                            .duration_since(UNIX_EPOCH)
                            .unwrap_or_default()
                            .as_millis() as u64,
                    })
                    .await;
            }
        }
    }

    /// Bind a verified identity to the connection.
    async fn handle_auth(
        &self,
        conn_id: ConnId,
        auth: AuthRequest,
        sender: &mpsc::Sender<ServerMessage>,
    ) {
        if self.connection_identity(conn_id).await.is_some() {
            // The binding is once per connection; reconnect to rebind.
            let _ = sender
                .send(ServerMessage::Error(ServerError {
                    code: ErrorCode::InvalidMessage,
                    message: "connection already authenticated".to_string(),
                }))
                .await;
            return;
        }

        match verify_token(&auth.token, &self.config.auth) {
            Ok(claims) => {
                let identity = claims.player_id();
                self.accounts.upsert_profile(identity, claims.name.clone());
                {
                    let mut connections = self.connections.write().await;
                    if let Some(entry) = connections.get_mut(&conn_id) {
                        entry.identity = Some(identity);
                    }
                }
                debug!(
                    "conn {} authenticated as {} (client {:?})",
                    conn_id,
                    identity.short(),
                    auth.client_version
                );
                let _ = sender
                    .send(ServerMessage::AuthResult(AuthResult {
                        success: true,
                        player_id: Some(identity),
                        error: None,
                        server_version: self.config.version.clone(),
                    }))
                    .await;
            }
            Err(e) => {
                debug!("auth failed on conn {}: {}", conn_id, e);
                let _ = sender
                    .send(ServerMessage::AuthResult(AuthResult {
                        success: false,
                        player_id: None,
                        error: Some(e.to_string()),
                        server_version: self.config.version.clone(),
                    }))
                    .await;
            }
        }
    }

    /// Attach the connection to a room.
    async fn handle_join(
        &self,
        conn_id: ConnId,
        code: &str,
        sender: &mpsc::Sender<ServerMessage>,
    ) {
        let Some(identity) = self.connection_identity(conn_id).await else {
            let _ = sender
                .send(ServerMessage::Error(ServerError {
                    code: ErrorCode::NotAuthenticated,
                    message: "authenticate first".to_string(),
                }))
                .await;
            return;
        };

        // Joining a new room implicitly leaves the old one.
        let previous = self.connection_room(conn_id).await;
        if previous.as_deref().is_some_and(|current| current != code) {
            self.leave_room(conn_id).await;
        }

        match self.coordinator.join(code, identity).await {
            JoinOutcome::Seated { snapshot, broadcast } => {
                self.groups.subscribe(code, conn_id, sender.clone()).await;
                self.coordinator.room_occupied(code).await;
                {
                    let mut connections = self.connections.write().await;
                    if let Some(entry) = connections.get_mut(&conn_id) {
                        entry.room = Some(code.to_string());
                    }
                }
                if broadcast {
                    self.groups
                        .broadcast(code, ServerMessage::State(snapshot))
                        .await;
                } else {
                    // Idempotent re-join: current snapshot to the joiner only.
                    let _ = sender.send(ServerMessage::State(snapshot)).await;
                }
            }
            JoinOutcome::Refused(reason) => {
                let _ = sender
                    .send(ServerMessage::JoinError {
                        reason: reason.to_string(),
                    })
                    .await;
            }
        }
    }

    /// Apply a move under the connection's bound identity.
    async fn handle_move(
        &self,
        conn_id: ConnId,
        code: &str,
        cell: usize,
        sender: &mpsc::Sender<ServerMessage>,
    ) {
        let Some(identity) = self.connection_identity(conn_id).await else {
            let _ = sender
                .send(ServerMessage::Error(ServerError {
                    code: ErrorCode::NotAuthenticated,
                    message: "authenticate first".to_string(),
                }))
                .await;
            return;
        };

        match self.coordinator.make_move(code, identity, cell).await {
            MoveReply::Applied(snapshot) => {
                self.groups
                    .broadcast(code, ServerMessage::State(snapshot))
                    .await;
            }
            MoveReply::Rejected(denial) => {
                let _ = sender
                    .send(ServerMessage::MoveRejected {
                        reason: denial.to_string(),
                    })
                    .await;
            }
            MoveReply::NotFound => {
                let _ = sender
                    .send(ServerMessage::Error(ServerError {
                        code: ErrorCode::RoomNotFound,
                        message: "no live room under that code".to_string(),
                    }))
                    .await;
            }
        }
    }

    /// Detach the connection from its room, firing the departure
    /// transition when this was the identity's last connection there.
    async fn leave_room(&self, conn_id: ConnId) {
        let (identity, room) = {
            let mut connections = self.connections.write().await;
            let Some(entry) = connections.get_mut(&conn_id) else {
                return;
            };
            (entry.identity, entry.room.take())
        };
        let Some(code) = room else {
            return;
        };

        let remaining = self.groups.unsubscribe(&code, conn_id).await;

        if let Some(identity) = identity {
            let still_attached = {
                let connections = self.connections.read().await;
                connections.iter().any(|(id, entry)| {
                    *id != conn_id
                        && entry.identity == Some(identity)
                        && entry.room.as_deref() == Some(code.as_str())
                })
            };
            if !still_attached {
                if let Some(snapshot) = self.coordinator.departure(&code, identity).await {
                    self.groups
                        .broadcast(&code, ServerMessage::State(snapshot))
                        .await;
                }
            }
        }

        if remaining == 0 {
            self.coordinator.room_emptied(&code).await;
        }
    }

    /// Tear down one connection's state after its task ends.
    async fn disconnect(&self, conn_id: ConnId) {
        self.leave_room(conn_id).await;
        let entry = {
            let mut connections = self.connections.write().await;
            connections.remove(&conn_id)
        };
        if let Some(entry) = entry {
            debug!(
                "conn {} cleaned up after {:?}",
                conn_id,
                entry.connected_at.elapsed()
            );
        }
    }

    async fn connection_identity(&self, conn_id: ConnId) -> Option<PlayerId> {
        self.connections
            .read()
            .await
            .get(&conn_id)
            .and_then(|entry| entry.identity)
    }

    async fn connection_room(&self, conn_id: ConnId) -> Option<String> {
        self.connections
            .read()
            .await
            .get(&conn_id)
            .and_then(|entry| entry.room.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::InMemoryAccounts;
    use crate::session::store::{RoomStore, StoreConfig};

    fn gateway() -> Arc<Gateway> {
        let accounts = Arc::new(InMemoryAccounts::new());
        let store = Arc::new(RoomStore::new(StoreConfig::default()));
        let coordinator = Arc::new(Coordinator::new(store, accounts.clone()));
        Arc::new(Gateway::new(
            GatewayConfig {
                bind_addr: "127.0.0.1:0".parse().unwrap(),
                ..Default::default()
            },
            coordinator,
            accounts,
        ))
    }

    #[test]
    fn test_config_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.max_connections, 1000);
        assert_eq!(config.idle_timeout, Duration::from_secs(300));
    }

    #[tokio::test]
    async fn test_gateway_starts_empty() {
        let gateway = gateway();
        assert_eq!(gateway.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_shutdown_signal() {
        let gateway = gateway();
        gateway.shutdown();
        // Should not panic with no subscribers.
    }

    #[tokio::test]
    async fn test_groups_deliver_to_all_members() {
        let groups = RoomGroups::new();
        let (tx1, mut rx1) = mpsc::channel(8);
        let (tx2, mut rx2) = mpsc::channel(8);

        groups.subscribe("ABC123", 1, tx1).await;
        groups.subscribe("ABC123", 2, tx2).await;
        assert_eq!(groups.member_count("ABC123").await, 2);

        groups
            .broadcast(
                "ABC123",
                ServerMessage::Shutdown {
                    reason: "test".into(),
                },
            )
            .await;

        assert!(matches!(
            rx1.recv().await,
            Some(ServerMessage::Shutdown { .. })
        ));
        assert!(matches!(
            rx2.recv().await,
            Some(ServerMessage::Shutdown { .. })
        ));
    }

    #[tokio::test]
    async fn test_groups_unsubscribe_counts_remaining() {
        let groups = RoomGroups::new();
        let (tx1, _rx1) = mpsc::channel(8);
        let (tx2, _rx2) = mpsc::channel(8);

        groups.subscribe("ABC123", 1, tx1).await;
        groups.subscribe("ABC123", 2, tx2).await;

        assert_eq!(groups.unsubscribe("ABC123", 1).await, 1);
        assert_eq!(groups.unsubscribe("ABC123", 2).await, 0);
        assert_eq!(groups.member_count("ABC123").await, 0);
    }

    #[tokio::test]
    async fn test_broadcast_to_missing_group_is_noop() {
        let groups = RoomGroups::new();
        groups
            .broadcast(
                "NOSUCH",
                ServerMessage::Shutdown {
                    reason: "test".into(),
                },
            )
            .await;
    }

    #[tokio::test]
    async fn test_drop_group() {
        let groups = RoomGroups::new();
        let (tx, mut rx) = mpsc::channel(8);
        groups.subscribe("ABC123", 1, tx).await;

        groups.drop_group("ABC123").await;
        assert_eq!(groups.member_count("ABC123").await, 0);

        groups
            .broadcast(
                "ABC123",
                ServerMessage::Shutdown {
                    reason: "test".into(),
                },
            )
            .await;
        assert!(rx.try_recv().is_err());
    }
}
