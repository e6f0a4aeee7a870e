use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::trace;
use uuid::Uuid;

use super::client::{Client, Delivery};

/// Live connections grouped by user.
///
/// A user has an entry exactly while at least one of their connections is
/// registered; empty sets are removed as soon as the last connection goes.
/// Sends take the read lock, so broadcasts from any number of callers run
/// side by side; only register and unregister take the write lock.
#[derive(Debug, Default)]
pub struct Registry {
    users: RwLock<HashMap<Uuid, HashMap<Uuid, Client>>>,
}

impl Registry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection. Returns how many connections the user now has.
    pub async fn register(&self, client: Client) -> usize {
        let mut users = self.users.write().await;
        let connections = users.entry(client.user_id()).or_default();
        if connections.insert(client.id(), client).is_none() {
            metrics::gauge!("ws_connections_active").increment(1.0);
        }
        connections.len()
    }

    /// Remove a connection and close its outbound queue. Returns `false` if
    /// it was not registered.
    pub async fn unregister(&self, client: &Client) -> bool {
        let mut users = self.users.write().await;
        let Some(connections) = users.get_mut(&client.user_id()) else {
            return false;
        };
        let Some(removed) = connections.remove(&client.id()) else {
            return false;
        };
        if connections.is_empty() {
            users.remove(&client.user_id());
        }
        removed.close();
        metrics::gauge!("ws_connections_active").decrement(1.0);
        true
    }

    /// Queue `frame` on every connection of `user_id`. Offline users are a
    /// no-op. Returns the number of connections that accepted the frame.
    pub async fn send_to_user(&self, user_id: Uuid, frame: &str) -> usize {
        let users = self.users.read().await;
        deliver(&users, user_id, frame)
    }

    /// [`Self::send_to_user`] for several users under one read lock.
    pub async fn send_to_users(&self, user_ids: &[Uuid], frame: &str) -> usize {
        let users = self.users.read().await;
        user_ids
            .iter()
            .map(|user_id| deliver(&users, *user_id, frame))
            .sum()
    }

    /// Whether `user_id` has any live connection.
    pub async fn is_online(&self, user_id: Uuid) -> bool {
        self.users.read().await.contains_key(&user_id)
    }

    /// Live connections of `user_id`; zero when offline.
    pub async fn connection_count(&self, user_id: Uuid) -> usize {
        self.users
            .read()
            .await
            .get(&user_id)
            .map_or(0, HashMap::len)
    }

    /// Number of users with at least one live connection.
    pub async fn online_users(&self) -> usize {
        self.users.read().await.len()
    }
}

fn deliver(users: &HashMap<Uuid, HashMap<Uuid, Client>>, user_id: Uuid, frame: &str) -> usize {
    let Some(connections) = users.get(&user_id) else {
        trace!(%user_id, "recipient offline");
        return 0;
    };
    connections
        .values()
        .filter(|client| client.enqueue(frame.to_owned()) == Delivery::Queued)
        .count()
}
