//! Transport Boundary
//!
//! The session layer pushes messages through a [`Transport`]; how they reach
//! a socket is somebody else's business. [`ChannelTransport`] hands them to
//! per-connection tokio channels, [`MemoryTransport`] records them.

use std::collections::BTreeMap;
use std::sync::{Mutex, RwLock};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::game::combatant::PlayerId;
use crate::session::room::RoomCode;
use super::protocol::ServerMessage;

/// Outbound message sink.
pub trait Transport: Send + Sync {
    /// Deliver a message to one player.
    fn send_to_player(&self, player: &PlayerId, message: ServerMessage);

    /// Deliver a message to every member of a room.
    fn broadcast(&self, room: &RoomCode, recipients: &[PlayerId], message: ServerMessage) {
        debug!(room = %room, recipients = recipients.len(), "Broadcast");
        for player in recipients {
            self.send_to_player(player, message.clone());
        }
    }

    /// A room was torn down.
    fn on_session_end(&self, room: &RoomCode);
}

// =============================================================================
// CHANNEL TRANSPORT
// =============================================================================

/// Routes messages to per-connection tokio channels.
#[derive(Debug, Default)]
pub struct ChannelTransport {
    senders: RwLock<BTreeMap<PlayerId, mpsc::UnboundedSender<ServerMessage>>>,
}

impl ChannelTransport {
    /// No connections yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection; returns the receiving end for its writer task.
    pub fn connect(&self, player: PlayerId) -> mpsc::UnboundedReceiver<ServerMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut senders) = self.senders.write() {
            senders.insert(player, tx);
        }
        rx
    }

    /// Drop a connection.
    pub fn disconnect(&self, player: &PlayerId) {
        if let Ok(mut senders) = self.senders.write() {
            senders.remove(player);
        }
    }

    /// Connected players.
    pub fn connection_count(&self) -> usize {
        self.senders.read().map(|s| s.len()).unwrap_or(0)
    }
}

impl Transport for ChannelTransport {
    fn send_to_player(&self, player: &PlayerId, message: ServerMessage) {
        let Ok(senders) = self.senders.read() else {
            return;
        };
        match senders.get(player) {
            Some(tx) => {
                if tx.send(message).is_err() {
                    warn!(player = %player, "Connection closed, message dropped");
                }
            }
            None => debug!(player = %player, "No connection, message dropped"),
        }
    }

    fn on_session_end(&self, room: &RoomCode) {
        debug!(room = %room, "Session ended");
    }
}

// =============================================================================
// MEMORY TRANSPORT
// =============================================================================

/// Records every delivery. Used by tests and the offline demo.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    sent: Mutex<Vec<(PlayerId, ServerMessage)>>,
    ended: Mutex<Vec<RoomCode>>,
}

impl MemoryTransport {
    /// Empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages delivered to `player`, oldest first.
    pub fn messages_for(&self, player: &PlayerId) -> Vec<ServerMessage> {
        self.sent
            .lock()
            .map(|sent| sent.iter().filter(|(p, _)| p == player).map(|(_, m)| m.clone()).collect())
            .unwrap_or_default()
    }

    /// Every delivery, oldest first.
    pub fn all(&self) -> Vec<(PlayerId, ServerMessage)> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }

    /// Rooms reported as ended.
    pub fn ended_sessions(&self) -> Vec<RoomCode> {
        self.ended.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.clear();
        }
    }
}

impl Transport for MemoryTransport {
    fn send_to_player(&self, player: &PlayerId, message: ServerMessage) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push((player.clone(), message));
        }
    }

    fn on_session_end(&self, room: &RoomCode) {
        if let Ok(mut ended) = self.ended.lock() {
            ended.push(room.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::protocol::ErrorCode;

    #[test]
    fn test_broadcast_reaches_each_recipient() {
        let transport = MemoryTransport::new();
        let room = RoomCode::parse("ABCDEF").unwrap();
        let players = [PlayerId::new("a"), PlayerId::new("b")];
        transport.broadcast(&room, &players, ServerMessage::GameStarting { countdown: 3 });

        for p in &players {
            assert_eq!(transport.messages_for(p), vec![ServerMessage::GameStarting { countdown: 3 }]);
        }
        assert!(transport.messages_for(&PlayerId::new("c")).is_empty());
    }

    #[tokio::test]
    async fn test_channel_transport_delivers() {
        let transport = ChannelTransport::new();
        let player = PlayerId::new("a");
        let mut rx = transport.connect(player.clone());
        assert_eq!(transport.connection_count(), 1);

        transport.send_to_player(&player, ServerMessage::error(ErrorCode::NotInRoom, "not in a room"));
        let received = rx.recv().await.unwrap();
        assert!(matches!(received, ServerMessage::Error { code: ErrorCode::NotInRoom, .. }));

        transport.disconnect(&player);
        assert_eq!(transport.connection_count(), 0);
        // Unknown player: silently dropped
        transport.send_to_player(&player, ServerMessage::GameStarting { countdown: 1 });
    }
}
