use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::RwLock;

/// Registry of live WebSocket connections keyed by user id.
///
/// Each connection is represented by an unbounded channel sender; the
/// per-connection writer task drains the channel into the socket. Broadcast
/// snapshots the senders under the read lock and sends without holding it,
/// so a slow socket can never stall connect/disconnect or other users.
pub struct WsRegistry {
    connections: RwLock<HashMap<i64, Vec<Connection>>>,
    next_id: AtomicU64,
}

struct Connection {
    id: u64,
    sender: UnboundedSender<String>,
}

impl WsRegistry {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a connection for a user. Returns the connection id (needed
    /// for removal) and the receiving end for the writer task.
    pub async fn add(&self, user_id: i64) -> (u64, UnboundedReceiver<String>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.connections
            .write()
            .await
            .entry(user_id)
            .or_default()
            .push(Connection { id, sender });
        (id, receiver)
    }

    pub async fn remove(&self, user_id: i64, connection_id: u64) {
        let mut map = self.connections.write().await;
        if let Some(connections) = map.get_mut(&user_id) {
            connections.retain(|c| c.id != connection_id);
            if connections.is_empty() {
                map.remove(&user_id);
            }
        }
    }

    /// Send a message to every connection of a user. Returns how many
    /// connections accepted it; closed connections are pruned on the way.
    pub async fn broadcast(&self, user_id: i64, message: &str) -> usize {
        let targets: Vec<(u64, UnboundedSender<String>)> = {
            let map = self.connections.read().await;
            match map.get(&user_id) {
                Some(connections) => connections
                    .iter()
                    .map(|c| (c.id, c.sender.clone()))
                    .collect(),
                None => return 0,
            }
        };

        let mut delivered = 0;
        let mut dead = Vec::new();
        for (id, sender) in targets {
            if sender.send(message.to_string()).is_ok() {
                delivered += 1;
            } else {
                dead.push(id);
            }
        }
        for id in dead {
            self.remove(user_id, id).await;
        }
        delivered
    }

    pub async fn connection_count(&self, user_id: i64) -> usize {
        self.connections
            .read()
            .await
            .get(&user_id)
            .map(|c| c.len())
            .unwrap_or(0)
    }
}

impl Default for WsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_reaches_every_connection_of_the_user() {
        let registry = WsRegistry::new();
        let (_, mut rx_a) = registry.add(7).await;
        let (_, mut rx_b) = registry.add(7).await;
        let (_, mut rx_other) = registry.add(8).await;

        let delivered = registry.broadcast(7, "hello").await;
        assert_eq!(delivered, 2);
        assert_eq!(rx_a.recv().await.unwrap(), "hello");
        assert_eq!(rx_b.recv().await.unwrap(), "hello");
        assert!(rx_other.try_recv().is_err(), "other users get nothing");
    }

    #[tokio::test]
    async fn broadcast_to_unknown_user_is_a_noop() {
        let registry = WsRegistry::new();
        assert_eq!(registry.broadcast(42, "nobody home").await, 0);
    }

    #[tokio::test]
    async fn removed_connections_no_longer_receive() {
        let registry = WsRegistry::new();
        let (id, mut rx) = registry.add(7).await;
        registry.remove(7, id).await;

        assert_eq!(registry.broadcast(7, "gone").await, 0);
        assert!(rx.try_recv().is_err());
        assert_eq!(registry.connection_count(7).await, 0);
    }

    #[tokio::test]
    async fn dead_connections_are_pruned_on_broadcast() {
        let registry = WsRegistry::new();
        let (_, rx) = registry.add(7).await;
        drop(rx);

        assert_eq!(registry.broadcast(7, "anyone?").await, 0);
        assert_eq!(registry.connection_count(7).await, 0);
    }
}
