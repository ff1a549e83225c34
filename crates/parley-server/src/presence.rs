//! Who is online right now.
//!
//! The directory maps each user to the one connection events are routed to.
//! It is advisory: nothing here is persisted, and a restart starts empty.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};

use parley_shared::protocol::ServerEvent;
use parley_shared::{ConnectionId, UserId};

/// Handle to one live client connection.
///
/// Clones share the same outbound queue; the transport task owns the
/// receiving end and writes whatever arrives to the socket.
#[derive(Debug, Clone)]
pub struct Connection {
    pub id: ConnectionId,
    pub user_id: UserId,
    pub opened_at: DateTime<Utc>,
    tx: mpsc::Sender<ServerEvent>,
}

impl Connection {
    pub fn open(user_id: UserId, capacity: usize) -> (Self, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let conn = Self {
            id: ConnectionId::new(),
            user_id,
            opened_at: Utc::now(),
            tx,
        };
        (conn, rx)
    }

    /// Queue an event without waiting. Returns `false` if it was dropped
    /// because the queue is full or the socket is gone.
    pub fn push(&self, event: ServerEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!(
                    user = %self.user_id,
                    conn = %self.id.short(),
                    "Dropping push for slow connection"
                );
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(user = %self.user_id, conn = %self.id.short(), "Connection already closed");
                false
            }
        }
    }

    /// Queue the answer to this connection's own request, waiting for room
    /// if the queue is full. Returns `false` only once the socket is gone.
    pub async fn reply(&self, event: ServerEvent) -> bool {
        if self.tx.send(event).await.is_err() {
            debug!(user = %self.user_id, conn = %self.id.short(), "Reply after close");
            return false;
        }
        true
    }
}

/// Process-wide user -> connection mapping. One connection per user; the
/// latest registration wins.
#[derive(Clone, Default)]
pub struct PresenceDirectory {
    entries: Arc<RwLock<HashMap<UserId, Connection>>>,
}

impl PresenceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `conn` as the user's connection and tell everyone.
    ///
    /// Returns the connection it superseded, if any. The old connection is not
    /// closed; it simply stops receiving routed events.
    pub async fn register(&self, conn: Connection) -> Option<Connection> {
        let mut entries = self.entries.write().await;
        let user = conn.user_id;
        let previous = entries.insert(user, conn);

        info!(
            user = %user,
            replaced = previous.is_some(),
            online = entries.len(),
            "Connection registered"
        );

        broadcast_presence(&entries);
        previous
    }

    /// Remove the user's entry, but only if it still is `conn`. A late
    /// disconnect from a superseded connection leaves the newer one alone.
    pub async fn unregister(&self, conn: &Connection) -> bool {
        let mut entries = self.entries.write().await;
        let current = entries
            .get(&conn.user_id)
            .map_or(false, |existing| existing.id == conn.id);

        if !current {
            debug!(
                user = %conn.user_id,
                conn = %conn.id,
                "Ignoring disconnect of superseded connection"
            );
            return false;
        }

        entries.remove(&conn.user_id);
        info!(user = %conn.user_id, online = entries.len(), "Connection unregistered");

        broadcast_presence(&entries);
        true
    }

    /// `None` means "not reachable right now", not an error.
    pub async fn lookup(&self, user: UserId) -> Option<Connection> {
        self.entries.read().await.get(&user).cloned()
    }

    pub async fn online_users(&self) -> Vec<UserId> {
        let entries = self.entries.read().await;
        sorted_users(&entries)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

fn sorted_users(entries: &HashMap<UserId, Connection>) -> Vec<UserId> {
    let mut users: Vec<UserId> = entries.keys().copied().collect();
    users.sort();
    users
}

fn broadcast_presence(entries: &HashMap<UserId, Connection>) {
    let online = sorted_users(entries);
    for conn in entries.values() {
        conn.push(ServerEvent::PresenceChanged {
            online: online.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut mpsc::Receiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn register_and_lookup() {
        let presence = PresenceDirectory::new();
        let user = UserId::new();
        let (conn, _rx) = Connection::open(user, 8);

        assert!(presence.register(conn.clone()).await.is_none());
        assert_eq!(presence.lookup(user).await.map(|c| c.id), Some(conn.id));
        assert!(presence.lookup(UserId::new()).await.is_none());
    }

    #[tokio::test]
    async fn reconnect_supersedes_and_stale_disconnect_is_ignored() {
        let presence = PresenceDirectory::new();
        let user = UserId::new();
        let (c1, _rx1) = Connection::open(user, 8);
        let (c2, _rx2) = Connection::open(user, 8);

        presence.register(c1.clone()).await;
        let replaced = presence.register(c2.clone()).await;
        assert_eq!(replaced.map(|c| c.id), Some(c1.id));
        assert_eq!(presence.lookup(user).await.map(|c| c.id), Some(c2.id));

        assert!(!presence.unregister(&c1).await);
        assert_eq!(presence.lookup(user).await.map(|c| c.id), Some(c2.id));

        assert!(presence.unregister(&c2).await);
        assert!(presence.lookup(user).await.is_none());
    }

    #[tokio::test]
    async fn presence_changes_are_broadcast() {
        let presence = PresenceDirectory::new();
        let (a, b) = (UserId::new(), UserId::new());
        let (ca, mut rx_a) = Connection::open(a, 8);
        let (cb, mut rx_b) = Connection::open(b, 8);

        presence.register(ca).await;
        presence.register(cb.clone()).await;

        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(
            drain(&mut rx_a).last(),
            Some(&ServerEvent::PresenceChanged { online: expected })
        );
        assert_eq!(drain(&mut rx_b).len(), 1);

        presence.unregister(&cb).await;
        assert_eq!(
            drain(&mut rx_a),
            vec![ServerEvent::PresenceChanged { online: vec![a] }]
        );
        assert_eq!(presence.online_users().await, vec![a]);
    }

    #[tokio::test]
    async fn reply_waits_for_room_instead_of_dropping() {
        let (conn, mut rx) = Connection::open(UserId::new(), 1);
        let presence = ServerEvent::PresenceChanged { online: vec![] };
        let ack = ServerEvent::Ack {
            op: "mark_read".into(),
            message_id: None,
        };
        assert!(conn.push(presence.clone()));

        let pending = tokio::spawn({
            let conn = conn.clone();
            let ack = ack.clone();
            async move { conn.reply(ack).await }
        });

        assert_eq!(rx.recv().await, Some(presence));
        assert!(pending.await.unwrap());
        assert_eq!(rx.recv().await, Some(ack.clone()));

        drop(rx);
        assert!(!conn.reply(ack).await);
    }

    #[tokio::test]
    async fn push_to_full_queue_is_dropped() {
        let (conn, mut rx) = Connection::open(UserId::new(), 1);
        assert!(conn.push(ServerEvent::PresenceChanged { online: vec![] }));
        assert!(!conn.push(ServerEvent::PresenceChanged { online: vec![] }));

        assert_eq!(drain(&mut rx).len(), 1);
        drop(rx);
        assert!(!conn.push(ServerEvent::PresenceChanged { online: vec![] }));
    }
}
