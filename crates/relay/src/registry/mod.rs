// Session registry: which user and role sits behind each live chat connection.
//
// Entries exist only while a connection is joined and are never persisted; a
// restart starts from an empty registry.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use storefront_common::types::{Role, UserId};
use tokio::sync::RwLock;
use uuid::Uuid;

pub type ConnectionId = Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEntry {
    pub user_id: UserId,
    pub role: Role,
    pub display_name: String,
}

/// Lookup table from live connections to the identity using them.
///
/// One user may hold several connections (multiple tabs); each is an
/// independent entry. Implementations backed by a shared store let several
/// relay instances route to each other's connections.
#[async_trait]
pub trait SessionRegistry: Send + Sync {
    /// Inserts or overwrites the entry for `connection_id`.
    async fn register(&self, connection_id: ConnectionId, entry: SessionEntry);

    /// Removes the entry, returning it. No-op when absent.
    async fn unregister(&self, connection_id: ConnectionId) -> Option<SessionEntry>;

    /// Any one live connection of `user_id`. Which one is unspecified when the
    /// user has several.
    async fn find_by_user_id(&self, user_id: UserId) -> Option<ConnectionId>;

    /// Every live connection tagged with `role`.
    async fn all_with_role(&self, role: Role) -> Vec<ConnectionId>;

    async fn entry(&self, connection_id: ConnectionId) -> Option<SessionEntry>;

    async fn len(&self) -> usize;
}

pub type SharedSessionRegistry = Arc<dyn SessionRegistry>;

/// Single-instance registry kept in process memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySessionRegistry {
    sessions: Arc<RwLock<HashMap<ConnectionId, SessionEntry>>>,
}

#[async_trait]
impl SessionRegistry for MemorySessionRegistry {
    async fn register(&self, connection_id: ConnectionId, entry: SessionEntry) {
        self.sessions.write().await.insert(connection_id, entry);
    }

    async fn unregister(&self, connection_id: ConnectionId) -> Option<SessionEntry> {
        self.sessions.write().await.remove(&connection_id)
    }

    async fn find_by_user_id(&self, user_id: UserId) -> Option<ConnectionId> {
        self.sessions
            .read()
            .await
            .iter()
            .find(|(_, entry)| entry.user_id == user_id)
            .map(|(connection_id, _)| *connection_id)
    }

    async fn all_with_role(&self, role: Role) -> Vec<ConnectionId> {
        self.sessions
            .read()
            .await
            .iter()
            .filter(|(_, entry)| entry.role == role)
            .map(|(connection_id, _)| *connection_id)
            .collect()
    }

    async fn entry(&self, connection_id: ConnectionId) -> Option<SessionEntry> {
        self.sessions.read().await.get(&connection_id).cloned()
    }

    async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}
