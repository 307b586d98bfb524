use std::{collections::HashMap, sync::Arc};

use storefront_common::protocol::chat::ServerEvent;
use tokio::sync::{mpsc, RwLock};

use crate::registry::ConnectionId;

/// Outbound channels of the sockets served by this process.
#[derive(Debug, Clone, Default)]
pub struct ConnectionHub {
    outbound: Arc<RwLock<HashMap<ConnectionId, mpsc::UnboundedSender<ServerEvent>>>>,
}

impl ConnectionHub {
    pub async fn attach(
        &self,
        connection_id: ConnectionId,
        sender: mpsc::UnboundedSender<ServerEvent>,
    ) {
        self.outbound.write().await.insert(connection_id, sender);
    }

    pub async fn detach(&self, connection_id: ConnectionId) {
        self.outbound.write().await.remove(&connection_id);
    }

    /// Queues `event` for one connection. Returns false when the connection is
    /// gone; nothing is retained for later delivery.
    pub async fn send_to(&self, connection_id: ConnectionId, event: ServerEvent) -> bool {
        let sender = self.outbound.read().await.get(&connection_id).cloned();
        match sender {
            Some(sender) => sender.send(event).is_ok(),
            None => false,
        }
    }

    /// Sends `event` to each connection, returning how many accepted it.
    pub async fn send_to_many(&self, connection_ids: &[ConnectionId], event: &ServerEvent) -> usize {
        let recipients = {
            let guard = self.outbound.read().await;
            connection_ids
                .iter()
                .filter_map(|connection_id| guard.get(connection_id).cloned())
                .collect::<Vec<_>>()
        };

        let mut sent_count = 0;
        for recipient in recipients {
            if recipient.send(event.clone()).is_ok() {
                sent_count += 1;
            }
        }

        sent_count
    }
}
