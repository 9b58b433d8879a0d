//! Connection layer: WebSocket accept loop, per-connection reader/writer
//! tasks, and the connection table the rest of the server sends through.
//!
//! Socket callbacks never mutate game state. Reader tasks only push
//! `NetEvent`s into an unbounded channel; the tick loop drains that channel
//! at the top of each tick, so all session and world mutation happens on one
//! task in a deterministic order. Every send is fire-and-forget: a dead or
//! unknown peer is a silent no-op.

use crate::session::ClientId;
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use shared::protocol::{encode, ServerMessage};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

pub type ConnectionId = u64;

/// Raised by the socket tasks, consumed by the tick loop.
#[derive(Debug)]
pub enum NetEvent {
    Connected {
        connection: ConnectionId,
        peer: SocketAddr,
    },
    Message {
        connection: ConnectionId,
        text: String,
    },
    Disconnected {
        connection: ConnectionId,
    },
}

struct Connection {
    sender: mpsc::UnboundedSender<Message>,
    peer: SocketAddr,
    client: Option<ClientId>,
    last_seen_at: Instant,
}

/// Registry of live connections and their client bindings. Shared between
/// the tick loop and the socket tasks behind a mutex; every lock hold is
/// short and never awaits.
#[derive(Default)]
pub struct ConnectionTable {
    next_id: ConnectionId,
    connections: HashMap<ConnectionId, Connection>,
    by_client: HashMap<ClientId, ConnectionId>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        ConnectionTable::default()
    }

    pub fn register(&mut self, sender: mpsc::UnboundedSender<Message>, peer: SocketAddr) -> ConnectionId {
        self.next_id += 1;
        let id = self.next_id;
        self.connections.insert(
            id,
            Connection {
                sender,
                peer,
                client: None,
                last_seen_at: Instant::now(),
            },
        );
        id
    }

    /// Drops the connection record, closing the writer task through its
    /// channel. Returns the bound client only if this connection still owned
    /// the binding: a socket displaced by a resume-token rejoin tears down
    /// silently, its client now belongs to the newer connection.
    pub fn unregister(&mut self, connection: ConnectionId) -> Option<ClientId> {
        let removed = self.connections.remove(&connection)?;
        let client = removed.client?;
        if self.by_client.get(&client) != Some(&connection) {
            return None;
        }
        self.by_client.remove(&client);
        Some(client)
    }

    /// Binds an identified client to its connection. A client rebinding from
    /// a new connection displaces the old binding.
    pub fn bind_client(&mut self, connection: ConnectionId, client: ClientId) {
        if let Some(conn) = self.connections.get_mut(&connection) {
            conn.client = Some(client);
            self.by_client.insert(client, connection);
        }
    }

    pub fn client_of(&self, connection: ConnectionId) -> Option<ClientId> {
        self.connections.get(&connection).and_then(|c| c.client)
    }

    pub fn connection_of(&self, client: ClientId) -> Option<ConnectionId> {
        self.by_client.get(&client).copied()
    }

    pub fn peer_of(&self, connection: ConnectionId) -> Option<SocketAddr> {
        self.connections.get(&connection).map(|c| c.peer)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Records liveness for the heartbeat monitor.
    pub fn touch(&mut self, connection: ConnectionId) {
        if let Some(conn) = self.connections.get_mut(&connection) {
            conn.last_seen_at = Instant::now();
        }
    }

    /// Connections with no traffic inside `window`.
    pub fn idle_connections(&self, window: Duration) -> Vec<ConnectionId> {
        let mut idle: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|(_, conn)| conn.last_seen_at.elapsed() > window)
            .map(|(&id, _)| id)
            .collect();
        idle.sort_unstable();
        idle
    }

    /// Queues a close frame to the writer task. Callers that cannot wait for
    /// the peer to acknowledge pair this with their own `Disconnected`
    /// notification, as the heartbeat monitor does.
    pub fn force_close(&mut self, connection: ConnectionId) {
        if let Some(conn) = self.connections.get(&connection) {
            let _ = conn.sender.send(Message::Close(None));
        }
    }

    pub fn close_all(&mut self) {
        for conn in self.connections.values() {
            let _ = conn.sender.send(Message::Close(None));
        }
    }

    /// Pings every open connection; pongs come back through the reader task
    /// and refresh liveness.
    pub fn ping_all(&self) {
        for conn in self.connections.values() {
            let _ = conn.sender.send(Message::Ping(Vec::new()));
        }
    }

    pub fn send_to_connection(&self, connection: ConnectionId, msg: &ServerMessage) {
        let Some(conn) = self.connections.get(&connection) else {
            return;
        };
        match encode(msg) {
            Ok(text) => {
                let _ = conn.sender.send(Message::Text(text));
            }
            Err(e) => warn!("failed to encode outbound message: {}", e),
        }
    }

    pub fn send_to_client(&self, client: ClientId, msg: &ServerMessage) {
        if let Some(connection) = self.connection_of(client) {
            self.send_to_connection(connection, msg);
        }
    }

    /// Sends to every bound client.
    pub fn broadcast(&self, msg: &ServerMessage) {
        let text = match encode(msg) {
            Ok(text) => text,
            Err(e) => {
                warn!("failed to encode broadcast: {}", e);
                return;
            }
        };
        for &connection in self.by_client.values() {
            if let Some(conn) = self.connections.get(&connection) {
                let _ = conn.sender.send(Message::Text(text.clone()));
            }
        }
    }

    pub fn broadcast_except(&self, skip: ClientId, msg: &ServerMessage) {
        let text = match encode(msg) {
            Ok(text) => text,
            Err(e) => {
                warn!("failed to encode broadcast: {}", e);
                return;
            }
        };
        for (&client, &connection) in &self.by_client {
            if client == skip {
                continue;
            }
            if let Some(conn) = self.connections.get(&connection) {
                let _ = conn.sender.send(Message::Text(text.clone()));
            }
        }
    }

    /// Sends to a named subset of clients. Absent members are skipped.
    pub fn broadcast_to_group(&self, clients: &[ClientId], msg: &ServerMessage) {
        let text = match encode(msg) {
            Ok(text) => text,
            Err(e) => {
                warn!("failed to encode group broadcast: {}", e);
                return;
            }
        };
        for &client in clients {
            if let Some(conn) = self
                .connection_of(client)
                .and_then(|id| self.connections.get(&id))
            {
                let _ = conn.sender.send(Message::Text(text.clone()));
            }
        }
    }
}

/// Accepts sockets forever, spawning a reader and a writer task per
/// connection. Returns once the listener errors out.
pub async fn run_accept_loop(
    listener: TcpListener,
    table: Arc<Mutex<ConnectionTable>>,
    events: mpsc::UnboundedSender<NetEvent>,
) {
    while let Ok((stream, peer)) = listener.accept().await {
        let table = Arc::clone(&table);
        let events = events.clone();
        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    debug!("websocket handshake with {} failed: {}", peer, e);
                    return;
                }
            };
            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();

            let connection = table.lock().unwrap().register(out_tx, peer);
            info!("connection {} established from {}", connection, peer);
            if events
                .send(NetEvent::Connected { connection, peer })
                .is_err()
            {
                return;
            }

            tokio::spawn(async move {
                while let Some(msg) = out_rx.recv().await {
                    let closing = matches!(msg, Message::Close(_));
                    if ws_sender.send(msg).await.is_err() || closing {
                        break;
                    }
                }
            });

            while let Some(incoming) = ws_receiver.next().await {
                match incoming {
                    Ok(Message::Text(text)) => {
                        if events
                            .send(NetEvent::Message { connection, text })
                            .is_err()
                        {
                            break;
                        }
                    }
                    Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                        table.lock().unwrap().touch(connection);
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => {}
                }
            }

            let _ = events.send(NetEvent::Disconnected { connection });
            debug!("connection {} reader task finished", connection);
        });
    }
}

/// Pings all connections once per liveness window and closes any that
/// stayed silent past a full window. `Disconnected` is raised here rather
/// than by the peer's reader task, so a half-dead peer whose TCP still ACKs
/// is reaped on the server's schedule; the tick loop unregisters the
/// connection when it drains the event.
pub async fn run_heartbeat_monitor(
    table: Arc<Mutex<ConnectionTable>>,
    events: mpsc::UnboundedSender<NetEvent>,
    window: Duration,
) {
    let mut ticker = tokio::time::interval(window);
    loop {
        ticker.tick().await;
        let idle = {
            let table = table.lock().unwrap();
            table.ping_all();
            table.idle_connections(window)
        };
        for connection in idle {
            warn!("connection {} missed heartbeat window, closing", connection);
            table.lock().unwrap().force_close(connection);
            if events.send(NetEvent::Disconnected { connection }).is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::protocol::decode_server;

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    fn table_with_connection() -> (
        ConnectionTable,
        ConnectionId,
        mpsc::UnboundedReceiver<Message>,
    ) {
        let mut table = ConnectionTable::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let id = table.register(tx, peer());
        (table, id, rx)
    }

    fn sent_text(rx: &mut mpsc::UnboundedReceiver<Message>) -> String {
        match rx.try_recv().unwrap() {
            Message::Text(text) => text,
            other => panic!("expected text frame, got {:?}", other),
        }
    }

    #[test]
    fn test_bind_and_lookup() {
        let (mut table, id, _rx) = table_with_connection();
        assert!(table.client_of(id).is_none());

        table.bind_client(id, 7);
        assert_eq!(table.client_of(id), Some(7));
        assert_eq!(table.connection_of(7), Some(id));
    }

    #[test]
    fn test_unregister_returns_bound_client() {
        let (mut table, id, _rx) = table_with_connection();
        table.bind_client(id, 7);

        assert_eq!(table.unregister(id), Some(7));
        assert!(table.connection_of(7).is_none());
        assert!(table.is_empty());
        assert_eq!(table.unregister(id), None);
    }

    #[test]
    fn test_rebinding_displaces_old_connection() {
        let mut table = ConnectionTable::new();
        let (tx_a, _rx_a) = mpsc::unbounded_channel();
        let (tx_b, _rx_b) = mpsc::unbounded_channel();
        let a = table.register(tx_a, peer());
        let b = table.register(tx_b, peer());

        table.bind_client(a, 7);
        table.bind_client(b, 7);
        assert_eq!(table.connection_of(7), Some(b));

        // Tearing down the stale connection must not unbind the new one
        table.unregister(a);
        assert_eq!(table.connection_of(7), Some(b));
    }

    #[test]
    fn test_unregister_of_displaced_connection_disowns_client() {
        let mut table = ConnectionTable::new();
        let (tx_a, _rx_a) = mpsc::unbounded_channel();
        let (tx_b, _rx_b) = mpsc::unbounded_channel();
        let a = table.register(tx_a, peer());
        let b = table.register(tx_b, peer());
        table.bind_client(a, 7);
        table.bind_client(b, 7);

        // The stale socket's close must not report the client as gone while
        // the newer connection still carries it
        assert_eq!(table.unregister(a), None);
        assert_eq!(table.unregister(b), Some(7));
    }

    #[test]
    fn test_send_to_unknown_client_is_silent() {
        let (table, _id, mut rx) = table_with_connection();
        table.send_to_client(
            99,
            &ServerMessage::PlayerLeft { player_id: 1 },
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_send_to_client_encodes_envelope() {
        let (mut table, id, mut rx) = table_with_connection();
        table.bind_client(id, 7);
        table.send_to_client(7, &ServerMessage::PlayerLeft { player_id: 3 });

        let text = sent_text(&mut rx);
        let msg = decode_server(&text).unwrap();
        assert_eq!(msg, ServerMessage::PlayerLeft { player_id: 3 });
    }

    #[test]
    fn test_broadcast_skips_unbound_connections() {
        let mut table = ConnectionTable::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let a = table.register(tx_a, peer());
        let _b = table.register(tx_b, peer());
        table.bind_client(a, 1);

        table.broadcast(&ServerMessage::PlayerLeft { player_id: 9 });
        assert!(rx_a.try_recv().is_ok());
        // The connection that never joined sees nothing
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn test_broadcast_except_skips_sender() {
        let mut table = ConnectionTable::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let a = table.register(tx_a, peer());
        let b = table.register(tx_b, peer());
        table.bind_client(a, 1);
        table.bind_client(b, 2);

        table.broadcast_except(1, &ServerMessage::PlayerLeft { player_id: 1 });
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_ok());
    }

    #[test]
    fn test_group_broadcast_ignores_absent_members() {
        let (mut table, id, mut rx) = table_with_connection();
        table.bind_client(id, 1);

        table.broadcast_to_group(
            &[1, 42],
            &ServerMessage::PlayerReconnected { player_id: 1 },
        );
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_idle_connections_and_force_close() {
        let (mut table, id, mut rx) = table_with_connection();
        table.bind_client(id, 7);
        assert!(table.idle_connections(Duration::from_secs(30)).is_empty());

        // Rewind liveness past the window
        table.connections.get_mut(&id).unwrap().last_seen_at =
            Instant::now() - Duration::from_secs(31);
        assert_eq!(table.idle_connections(Duration::from_secs(30)), vec![id]);

        table.force_close(id);
        assert!(matches!(rx.try_recv().unwrap(), Message::Close(None)));

        // Teardown happens when the Disconnected event is drained
        assert_eq!(table.unregister(id), Some(7));
        assert!(table.is_empty());
        assert!(table.connection_of(7).is_none());
    }
}
