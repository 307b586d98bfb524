// Chat event routing.
//
// A connection starts anonymous and becomes addressable once its `join` is
// accepted. Messages are persisted first and then forwarded to whatever live
// connections the registry resolves; nothing is queued for offline users.

use std::{collections::BTreeMap, sync::Arc};

use chrono::Utc;
use storefront_common::{
    protocol::chat::{ChatContact, ChatPayload, ClientEvent, ServerEvent},
    types::{ChatMessage, MessageStatus, Role, UserId},
};
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info};

use crate::{
    auth::middleware::AuthenticatedUser,
    error::ErrorCode,
    registry::{ConnectionId, SessionEntry, SharedSessionRegistry},
    store::{ChatStore, StoreError},
    ws::{hub::ConnectionHub, protocol::error_event},
};

const MAX_DISPLAY_NAME_CHARS: usize = 120;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    #[error("connection must join before sending {0}")]
    NotJoined(&'static str),
    #[error("join identity does not match the access token")]
    IdentityMismatch,
    #[error("{0}")]
    Forbidden(&'static str),
    #[error("{0}")]
    Invalid(String),
}

impl RoutingError {
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::NotJoined(_) | Self::Invalid(_) => ErrorCode::ValidationFailed,
            Self::IdentityMismatch | Self::Forbidden(_) => ErrorCode::AuthForbidden,
        }
    }

    pub fn to_event(&self) -> ServerEvent {
        error_event(self.code(), self.to_string())
    }
}

#[derive(Debug, Clone)]
struct KnownContact {
    name: String,
    role: Role,
}

#[derive(Clone)]
pub struct ChatRouter {
    store: ChatStore,
    registry: SharedSessionRegistry,
    hub: ConnectionHub,
    support_admin_id: UserId,
    // Customers who have written during this process lifetime.
    contacts: Arc<RwLock<BTreeMap<UserId, KnownContact>>>,
}

impl ChatRouter {
    pub fn new(
        store: ChatStore,
        registry: SharedSessionRegistry,
        hub: ConnectionHub,
        support_admin_id: UserId,
    ) -> Self {
        Self { store, registry, hub, support_admin_id, contacts: Arc::default() }
    }

    /// Makes a socket reachable for outbound events. It is not addressable by
    /// user until it joins.
    pub async fn connect(&self, connection_id: ConnectionId, sender: mpsc::UnboundedSender<ServerEvent>) {
        self.hub.attach(connection_id, sender).await;
    }

    pub async fn disconnect(&self, connection_id: ConnectionId) {
        self.hub.detach(connection_id).await;
        let Some(entry) = self.registry.unregister(connection_id).await else {
            return;
        };

        info!(
            connection_id = %connection_id,
            user_id = entry.user_id,
            role = entry.role.as_str(),
            "chat connection left"
        );

        if !entry.role.is_admin() && self.contacts.read().await.contains_key(&entry.user_id) {
            self.broadcast_users_list().await;
        }
    }

    pub async fn handle_event(
        &self,
        connection_id: ConnectionId,
        caller: AuthenticatedUser,
        event: ClientEvent,
    ) -> Result<(), RoutingError> {
        let event_name = event.name();
        if let ClientEvent::Join { user_id, role, name } = event {
            return self.join(connection_id, caller, user_id, role, name).await;
        }

        let Some(session) = self.registry.entry(connection_id).await else {
            return Err(RoutingError::NotJoined(event_name));
        };

        match event {
            ClientEvent::Join { .. } => Ok(()),
            ClientEvent::SendMessage { content, receiver_id } => {
                let receiver_id = receiver_id.unwrap_or(self.support_admin_id);
                self.send_message(connection_id, &session, receiver_id, content).await
            }
            ClientEvent::AdminSendMessage { to_user_id, content } => {
                if !session.role.is_admin() {
                    return Err(RoutingError::Forbidden("only admins may message a chosen user"));
                }
                self.admin_send_message(connection_id, &session, to_user_id, content).await
            }
            ClientEvent::TypingStart { target_user_id } => {
                self.relay_typing(&session, target_user_id, ServerEvent::TypingStart {
                    user_id: session.user_id,
                })
                .await;
                Ok(())
            }
            ClientEvent::TypingStop { target_user_id } => {
                self.relay_typing(&session, target_user_id, ServerEvent::TypingStop {
                    user_id: session.user_id,
                })
                .await;
                Ok(())
            }
        }
    }

    async fn join(
        &self,
        connection_id: ConnectionId,
        caller: AuthenticatedUser,
        user_id: UserId,
        role: Role,
        name: String,
    ) -> Result<(), RoutingError> {
        if user_id != caller.user_id || role != caller.role {
            return Err(RoutingError::IdentityMismatch);
        }

        let display_name = name.trim();
        if display_name.is_empty() || display_name.chars().count() > MAX_DISPLAY_NAME_CHARS {
            return Err(RoutingError::Invalid(format!(
                "name must be between 1 and {MAX_DISPLAY_NAME_CHARS} characters"
            )));
        }

        self.registry
            .register(
                connection_id,
                SessionEntry { user_id, role, display_name: display_name.to_string() },
            )
            .await;
        info!(connection_id = %connection_id, user_id, role = role.as_str(), "chat connection joined");

        self.broadcast_users_list().await;
        Ok(())
    }

    async fn send_message(
        &self,
        connection_id: ConnectionId,
        sender: &SessionEntry,
        receiver_id: UserId,
        content: String,
    ) -> Result<(), RoutingError> {
        let persisted = self.persist(sender.user_id, receiver_id, &content).await?;
        let payload = build_payload(sender, receiver_id, content, persisted.as_ref());

        let mut recipients = self.registry.all_with_role(Role::Admin).await;
        if let Some(receiver_connection) = self.registry.find_by_user_id(receiver_id).await {
            if !recipients.contains(&receiver_connection) {
                recipients.push(receiver_connection);
            }
        }
        recipients.retain(|recipient| *recipient != connection_id);

        self.deliver(connection_id, &recipients, payload).await;

        if !sender.role.is_admin() {
            self.contacts.write().await.insert(
                sender.user_id,
                KnownContact { name: sender.display_name.clone(), role: sender.role },
            );
            self.broadcast_users_list().await;
        }

        Ok(())
    }

    async fn admin_send_message(
        &self,
        connection_id: ConnectionId,
        sender: &SessionEntry,
        to_user_id: UserId,
        content: String,
    ) -> Result<(), RoutingError> {
        let persisted = self.persist(sender.user_id, to_user_id, &content).await?;
        let payload = build_payload(sender, to_user_id, content, persisted.as_ref());

        let recipients = self
            .registry
            .find_by_user_id(to_user_id)
            .await
            .filter(|recipient| *recipient != connection_id)
            .into_iter()
            .collect::<Vec<_>>();

        self.deliver(connection_id, &recipients, payload).await;
        Ok(())
    }

    async fn relay_typing(
        &self,
        typist: &SessionEntry,
        target_user_id: Option<UserId>,
        event: ServerEvent,
    ) {
        let recipients = match (typist.role, target_user_id) {
            (Role::Admin, Some(target_user_id)) => {
                self.registry.find_by_user_id(target_user_id).await.into_iter().collect()
            }
            (Role::Admin, None) => Vec::new(),
            (Role::User, _) => self.registry.all_with_role(Role::Admin).await,
        };

        if recipients.is_empty() {
            debug!(user_id = typist.user_id, "typing signal has no live recipient");
            return;
        }

        self.hub.send_to_many(&recipients, &event).await;
    }

    // Validation failures are reported to the sender; backend failures are
    // logged and the message is still forwarded without ids.
    async fn persist(
        &self,
        sender_id: UserId,
        receiver_id: UserId,
        content: &str,
    ) -> Result<Option<ChatMessage>, RoutingError> {
        match self.store.send_chat_message(sender_id, receiver_id, content).await {
            Ok(sent) => Ok(Some(sent.message)),
            Err(StoreError::Validation(message)) => Err(RoutingError::Invalid(message)),
            Err(error) => {
                error!(error = %error, sender_id, receiver_id, "failed to persist chat message");
                Ok(None)
            }
        }
    }

    // Status stays `sent`; only the receiver advances it.
    async fn deliver(
        &self,
        sender_connection: ConnectionId,
        recipients: &[ConnectionId],
        payload: ChatPayload,
    ) {
        let event = ServerEvent::ReceiveMessage(payload);
        let delivered = self.hub.send_to_many(recipients, &event).await;
        self.hub.send_to(sender_connection, event).await;

        if delivered == 0 {
            debug!(connection_id = %sender_connection, "chat message has no live recipient");
        }
    }

    async fn broadcast_users_list(&self) {
        let admins = self.registry.all_with_role(Role::Admin).await;
        if admins.is_empty() {
            return;
        }

        let users = self.contact_list().await;
        self.hub.send_to_many(&admins, &ServerEvent::UsersList { users }).await;
    }

    async fn contact_list(&self) -> Vec<ChatContact> {
        let contacts = self.contacts.read().await.clone();
        let mut users = Vec::with_capacity(contacts.len());
        for (user_id, contact) in contacts {
            if contact.role.is_admin() {
                continue;
            }
            let connection_id = self.registry.find_by_user_id(user_id).await;
            users.push(ChatContact {
                user_id,
                name: contact.name,
                role: contact.role,
                connection_id,
                online: connection_id.is_some(),
            });
        }
        users
    }
}

fn build_payload(
    sender: &SessionEntry,
    receiver_id: UserId,
    content: String,
    persisted: Option<&ChatMessage>,
) -> ChatPayload {
    ChatPayload {
        message_id: persisted.map(|message| message.id),
        conversation_id: persisted.map(|message| message.conversation_id),
        sender_id: sender.user_id,
        sender_name: sender.display_name.clone(),
        sender_role: sender.role,
        receiver_id,
        content,
        status: persisted.map_or(MessageStatus::Sent, |message| message.status),
        created_at: persisted.map_or_else(Utc::now, |message| message.created_at),
    }
}
