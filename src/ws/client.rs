use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::models::ServerMessage;

pub type ClientId = String;

/// Frames queued for a socket's writer task
#[derive(Debug)]
pub enum Outbound {
    Message(ServerMessage),
    Ping,
    Close,
}

pub type OutboundSender = mpsc::UnboundedSender<Outbound>;

/// A live socket and what we know about who is behind it
#[derive(Debug, Clone)]
pub struct ConnectedClient {
    pub id: ClientId,
    pub tx: OutboundSender,
    pub authenticated: bool,
    pub user_id: Option<String>,
    pub username: Option<String>,
    pub color: Option<String>,
    pub session_id: Option<String>,
    /// Cleared by every heartbeat, set again by the pong
    pub alive: bool,
    pub connected_at: DateTime<Utc>,
}

impl ConnectedClient {
    /// Queue a message; false when the writer is gone
    pub fn send(&self, msg: ServerMessage) -> bool {
        self.tx.send(Outbound::Message(msg)).is_ok()
    }

    /// Identity of an authenticated client
    pub fn identity(&self) -> Option<(&str, &str)> {
        if !self.authenticated {
            return None;
        }
        match (&self.user_id, &self.username) {
            (Some(user_id), Some(username)) => Some((user_id, username)),
            _ => None,
        }
    }
}

/// Every live socket of the process, keyed by client id
#[derive(Default)]
pub struct ConnectionRegistry {
    clients: RwLock<HashMap<ClientId, ConnectedClient>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, tx: OutboundSender) -> ConnectedClient {
        let client = ConnectedClient {
            id: Uuid::new_v4().simple().to_string(),
            tx,
            authenticated: false,
            user_id: None,
            username: None,
            color: None,
            session_id: None,
            alive: true,
            connected_at: Utc::now(),
        };
        self.clients.write().await.insert(client.id.clone(), client.clone());
        client
    }

    pub async fn get(&self, client_id: &str) -> Option<ConnectedClient> {
        self.clients.read().await.get(client_id).cloned()
    }

    /// Apply `f` to the client record, returning false if it is gone
    pub async fn update<F>(&self, client_id: &str, f: F) -> bool
    where
        F: FnOnce(&mut ConnectedClient),
    {
        match self.clients.write().await.get_mut(client_id) {
            Some(client) => {
                f(client);
                true
            }
            None => false,
        }
    }

    pub async fn remove(&self, client_id: &str) -> Option<ConnectedClient> {
        self.clients.write().await.remove(client_id)
    }

    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn authenticated_count(&self) -> usize {
        self.clients.read().await.values().filter(|c| c.authenticated).count()
    }

    /// One heartbeat round: clients that never answered the previous ping
    /// are returned for eviction, the rest are pinged and marked pending.
    pub async fn heartbeat(&self) -> Vec<ClientId> {
        let mut clients = self.clients.write().await;
        let mut dead = Vec::new();
        for client in clients.values_mut() {
            if !client.alive || client.tx.send(Outbound::Ping).is_err() {
                dead.push(client.id.clone());
                continue;
            }
            client.alive = false;
        }
        dead
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unanswered_ping_marks_client_dead() {
        let registry = ConnectionRegistry::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, _rx_b) = mpsc::unbounded_channel();
        let a = registry.register(tx_a).await;
        let b = registry.register(tx_b).await;

        assert!(registry.heartbeat().await.is_empty());
        assert!(matches!(rx_a.try_recv(), Ok(Outbound::Ping)));

        // Only `a` answers
        registry.update(&a.id, |c| c.alive = true).await;
        let dead = registry.heartbeat().await;
        assert_eq!(dead, vec![b.id.clone()]);
    }

    #[tokio::test]
    async fn closed_writer_counts_as_dead() {
        let registry = ConnectionRegistry::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let client = registry.register(tx).await;
        drop(rx);
        assert_eq!(registry.heartbeat().await, vec![client.id]);
    }

    #[tokio::test]
    async fn identity_requires_authentication() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut client = registry.register(tx).await;
        client.user_id = Some("u1".into());
        client.username = Some("Ada".into());
        assert!(client.identity().is_none());
        client.authenticated = true;
        assert_eq!(client.identity(), Some(("u1", "Ada")));
    }
}
