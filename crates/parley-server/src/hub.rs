//! The chat hub: owns the presence directory, unseen counters and fanout
//! router, and turns connection events into store reads, state transitions
//! and pushes.
//!
//! One hub is shared by every connection. Each handler runs to completion
//! on the dispatch thread; store calls are the only suspension points.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use parley_shared::protocol::{ClientEvent, ServerEvent, UnseenCount};
use parley_shared::{Conversation, DeliveryStatus, GroupId, MessageId, Target, UserId};
use parley_store::{ChatStore, Group, Message, NewMessage, User};

use crate::delivery::{self, Transition};
use crate::error::ServerError;
use crate::fanout::FanoutRouter;
use crate::groups::{validate_new_group, GroupMembershipView};
use crate::presence::{Connection, PresenceDirectory};
use crate::unseen::UnseenCounter;

pub struct ChatHub<S> {
    store: Arc<S>,
    presence: PresenceDirectory,
    unseen: UnseenCounter,
    groups: GroupMembershipView<S>,
    router: FanoutRouter<S>,
}

impl<S: ChatStore> ChatHub<S> {
    pub fn new(store: Arc<S>) -> Self {
        let presence = PresenceDirectory::new();
        let unseen = UnseenCounter::new();
        let groups = GroupMembershipView::new(Arc::clone(&store));
        let router = FanoutRouter::new(presence.clone(), unseen.clone(), groups.clone());
        Self {
            store,
            presence,
            unseen,
            groups,
            router,
        }
    }

    pub fn presence(&self) -> &PresenceDirectory {
        &self.presence
    }

    // -----------------------------------------------------------------------
    // Connection lifecycle
    // -----------------------------------------------------------------------

    /// Register a freshly opened connection.
    ///
    /// The user's unseen counters are rebuilt from the store and sent down
    /// the new connection right after the presence broadcast.
    pub async fn on_connect(&self, conn: Connection) -> Result<(), ServerError> {
        let user = conn.user_id;
        if !self.store.user_exists(user).await? {
            return Err(ServerError::NotFound(format!("user {user}")));
        }

        let counts = self.store.find_undelivered_count(user).await?;
        self.unseen.rebuild(user, counts).await;

        self.presence.register(conn.clone()).await;
        conn.push(ServerEvent::UnseenCounts {
            counts: self.unseen.counts_for(user).await,
        });
        Ok(())
    }

    pub async fn on_disconnect(&self, conn: &Connection) {
        if self.presence.unregister(conn).await {
            self.unseen.set_viewing(conn.user_id, None).await;
        }
    }

    /// Handle one inbound frame of `conn` and produce the reply for it.
    pub async fn dispatch(&self, conn: &Connection, event: ClientEvent) -> ServerEvent {
        let op = event.op();
        let user = conn.user_id;
        let result = match event {
            ClientEvent::SendDirect {
                to,
                text,
                image,
                reply_to,
            } => self
                .send_direct(user, to, text, image, reply_to)
                .await
                .map(|message| ServerEvent::MessageSent {
                    message: message.to_payload(),
                }),
            ClientEvent::SendGroup {
                group_id,
                text,
                image,
                reply_to,
            } => self
                .send_group(user, group_id, text, image, reply_to)
                .await
                .map(|message| ServerEvent::MessageSent {
                    message: message.to_payload(),
                }),
            ClientEvent::MarkDelivered { message_id } => self
                .mark_delivered(user, message_id)
                .await
                .map(|_| ack(op, Some(message_id))),
            ClientEvent::MarkRead { message_id } => self
                .mark_read(user, message_id)
                .await
                .map(|_| ack(op, Some(message_id))),
            ClientEvent::MarkConversationRead { conversation } => self
                .mark_conversation_read(user, conversation)
                .await
                .map(|_| ack(op, None)),
            ClientEvent::DeleteForMe { message_id } => self
                .delete_for_me(user, message_id)
                .await
                .map(|_| ack(op, Some(message_id))),
            ClientEvent::DeleteForAll { message_id } => self
                .delete_for_all(user, message_id)
                .await
                .map(|message| ServerEvent::MessageDeletedForAll {
                    message: message.to_payload(),
                }),
            ClientEvent::ViewConversation { conversation } => {
                self.set_active_view(user, conversation).await;
                Ok(ack(op, None))
            }
        };

        result.unwrap_or_else(|e| {
            debug!(user = %user, op, error = %e, "Operation rejected");
            e.to_event()
        })
    }

    // -----------------------------------------------------------------------
    // Sending
    // -----------------------------------------------------------------------

    pub async fn send_direct(
        &self,
        sender: UserId,
        to: UserId,
        text: Option<String>,
        image: Option<String>,
        reply_to: Option<MessageId>,
    ) -> Result<Message, ServerError> {
        let (text, image) = content(text, image)?;
        if to == sender {
            return Err(ServerError::InvalidState(
                "cannot send a direct message to yourself".into(),
            ));
        }
        if !self.store.user_exists(to).await? {
            return Err(ServerError::NotFound(format!("user {to}")));
        }
        self.check_reply(sender, Conversation::Direct(to), reply_to)
            .await?;

        self.create_and_route(NewMessage {
            sender_id: sender,
            target: Target::Direct(to),
            text,
            image,
            reply_to,
        })
        .await
    }

    pub async fn send_group(
        &self,
        sender: UserId,
        group: GroupId,
        text: Option<String>,
        image: Option<String>,
        reply_to: Option<MessageId>,
    ) -> Result<Message, ServerError> {
        let (text, image) = content(text, image)?;
        self.groups.require_member(group, sender).await?;
        self.check_reply(sender, Conversation::Group(group), reply_to)
            .await?;

        self.create_and_route(NewMessage {
            sender_id: sender,
            target: Target::Group(group),
            text,
            image,
            reply_to,
        })
        .await
    }

    /// Once stored, the message is the sender's success. A failed fanout
    /// only costs live pushes; recipients still get it through history.
    async fn create_and_route(&self, new: NewMessage) -> Result<Message, ServerError> {
        let message = self.store.create_message(new).await?;
        debug!(message = %message.id, sender = %message.sender_id, "Message created");
        if let Err(e) = self.router.route_new(&message).await {
            warn!(message = %message.id, error = %e, "Fanout of stored message failed");
        }
        Ok(message)
    }

    /// A reply must point at a message of the same conversation.
    async fn check_reply(
        &self,
        sender: UserId,
        conversation: Conversation,
        reply_to: Option<MessageId>,
    ) -> Result<(), ServerError> {
        let Some(id) = reply_to else {
            return Ok(());
        };
        let original = match self.store.get_message(id).await {
            Ok(message) => message,
            Err(parley_store::StoreError::NotFound(_)) => {
                return Err(ServerError::InvalidState(format!(
                    "reply target {id} does not exist"
                )))
            }
            Err(e) => return Err(e.into()),
        };
        if original.conversation_for(sender) != conversation {
            return Err(ServerError::InvalidState(format!(
                "reply target {id} belongs to another conversation"
            )));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // State transitions
    // -----------------------------------------------------------------------

    /// Recipient acknowledges receipt. Replays are no-ops.
    pub async fn mark_delivered(
        &self,
        caller: UserId,
        id: MessageId,
    ) -> Result<Message, ServerError> {
        let message = self.store.get_message(id).await?;
        let members = self.members_of(&message).await?;
        delivery::ensure_recipient(&message, caller, members.as_ref())?;

        let now = Utc::now();
        match delivery::deliver(&message, now) {
            Transition::NoOp => Ok(message),
            Transition::Apply(patch) => {
                let updated = self.store.update_message(id, &patch).await?;
                self.router
                    .notify_sender(
                        &updated,
                        DeliveryStatus::Delivered,
                        updated.delivered_at.unwrap_or(now),
                    )
                    .await;
                Ok(updated)
            }
        }
    }

    /// Recipient read one message. `read_at` is set once; replays are no-ops.
    pub async fn mark_read(&self, caller: UserId, id: MessageId) -> Result<Message, ServerError> {
        let message = self.store.get_message(id).await?;
        let members = self.members_of(&message).await?;
        delivery::ensure_recipient(&message, caller, members.as_ref())?;

        let now = Utc::now();
        let patch = match delivery::read(&message, caller, now) {
            Transition::NoOp => return Ok(message),
            Transition::Apply(patch) => patch,
        };

        let counted = self.counts_as_unseen(caller, &message).await?;
        let updated = self.store.update_message(id, &patch).await?;
        if counted {
            self.unseen
                .decrement(caller, message.conversation_for(caller))
                .await;
        }
        if patch.status.is_some() {
            self.router
                .notify_sender(&updated, DeliveryStatus::Read, updated.read_at.unwrap_or(now))
                .await;
        }
        Ok(updated)
    }

    /// Read everything `caller` has not read yet in one conversation.
    /// Returns how many messages were swept.
    pub async fn mark_conversation_read(
        &self,
        caller: UserId,
        conversation: Conversation,
    ) -> Result<usize, ServerError> {
        if let Conversation::Group(group) = conversation {
            self.groups.require_member(group, caller).await?;
        }

        let ids = self
            .store
            .unread_message_ids(caller, conversation)
            .await?;
        for id in &ids {
            self.mark_read(caller, *id).await?;
        }
        self.unseen.reset(caller, conversation).await;

        debug!(user = %caller, %conversation, swept = ids.len(), "Conversation marked read");
        Ok(ids.len())
    }

    /// Hide a message from `caller`'s own view. Nobody else is told.
    pub async fn delete_for_me(&self, caller: UserId, id: MessageId) -> Result<Message, ServerError> {
        let message = self.store.get_message(id).await?;
        let members = self.members_of(&message).await?;
        delivery::ensure_participant(&message, caller, members.as_ref())?;

        match delivery::delete_for_me(&message, caller) {
            Transition::NoOp => Ok(message),
            Transition::Apply(patch) => {
                let counted = self.counts_as_unseen(caller, &message).await?;
                let updated = self.store.update_message(id, &patch).await?;
                if counted {
                    self.unseen
                        .decrement(caller, message.conversation_for(caller))
                        .await;
                }
                Ok(updated)
            }
        }
    }

    /// Sender destroys the content for everyone and every present
    /// recipient is told.
    pub async fn delete_for_all(
        &self,
        caller: UserId,
        id: MessageId,
    ) -> Result<Message, ServerError> {
        let message = self.store.get_message(id).await?;
        match delivery::delete_for_all(&message, caller)? {
            Transition::NoOp => Ok(message),
            Transition::Apply(patch) => {
                let updated = self.store.update_message(id, &patch).await?;
                match self.router.route_deleted(&updated).await {
                    Ok(report) => info!(
                        message = %id,
                        notified = report.pushed.len(),
                        "Message deleted for everyone"
                    ),
                    Err(e) => warn!(message = %id, error = %e, "Fanout of deletion failed"),
                }
                Ok(updated)
            }
        }
    }

    pub async fn set_active_view(&self, user: UserId, conversation: Option<Conversation>) {
        self.unseen.set_viewing(user, conversation).await;
    }

    /// Whether `message` is part of `user`'s unseen count: not yet read or
    /// hidden by them, and for a group, sent after they joined.
    async fn counts_as_unseen(&self, user: UserId, message: &Message) -> Result<bool, ServerError> {
        if !message.is_unread_by(user) {
            return Ok(false);
        }
        match message.target {
            Target::Direct(_) => Ok(true),
            Target::Group(group) => Ok(self
                .store
                .member_since(group, user)
                .await?
                .map_or(false, |joined| message.created_at >= joined)),
        }
    }

    async fn members_of(&self, message: &Message) -> Result<Option<BTreeSet<UserId>>, ServerError> {
        match message.target {
            Target::Direct(_) => Ok(None),
            Target::Group(group) => Ok(Some(self.groups.members(group).await?)),
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub async fn history(
        &self,
        viewer: UserId,
        conversation: Conversation,
    ) -> Result<Vec<Message>, ServerError> {
        match conversation {
            Conversation::Group(group) => {
                self.groups.require_member(group, viewer).await?;
            }
            Conversation::Direct(peer) => {
                if !self.store.user_exists(peer).await? {
                    return Err(ServerError::NotFound(format!("user {peer}")));
                }
            }
        }
        Ok(self.store.conversation_history(viewer, conversation).await?)
    }

    pub async fn unseen_counts(&self, user: UserId) -> Vec<UnseenCount> {
        self.unseen.counts_for(user).await
    }

    pub async fn online_users(&self) -> Vec<UserId> {
        self.presence.online_users().await
    }

    // -----------------------------------------------------------------------
    // Users and groups
    // -----------------------------------------------------------------------

    pub async fn create_user(&self, display_name: &str) -> Result<User, ServerError> {
        if display_name.trim().is_empty() {
            return Err(ServerError::BadRequest("display name is required".into()));
        }
        let user = self.store.create_user(display_name).await?;
        info!(user = %user.id, "User created");
        Ok(user)
    }

    pub async fn user_exists(&self, user: UserId) -> Result<bool, ServerError> {
        Ok(self.store.user_exists(user).await?)
    }

    pub async fn create_group(
        &self,
        admin: UserId,
        name: &str,
        description: Option<&str>,
        members: Vec<UserId>,
        avatar: Option<String>,
    ) -> Result<Group, ServerError> {
        let new = validate_new_group(admin, name, description, members, avatar)?;
        for user in std::iter::once(&admin).chain(new.members.iter()) {
            if !self.store.user_exists(*user).await? {
                return Err(ServerError::NotFound(format!("user {user}")));
            }
        }

        let group = self.store.create_group(new).await?;
        info!(group = %group.id, admin = %admin, members = group.members.len(), "Group created");
        Ok(group)
    }

    pub async fn add_member(
        &self,
        caller: UserId,
        group: GroupId,
        user: UserId,
    ) -> Result<Group, ServerError> {
        self.groups.require_admin(group, caller).await?;
        Ok(self.store.add_group_member(group, user).await?)
    }

    pub async fn remove_member(
        &self,
        caller: UserId,
        group: GroupId,
        user: UserId,
    ) -> Result<Group, ServerError> {
        let snapshot = self.groups.require_admin(group, caller).await?;
        if snapshot.is_admin(user) {
            return Err(ServerError::InvalidState(
                "the admin cannot be removed from the group".into(),
            ));
        }
        let updated = self.store.remove_group_member(group, user).await?;
        self.unseen.reset(user, Conversation::Group(group)).await;
        Ok(updated)
    }

    pub async fn groups_for_user(&self, user: UserId) -> Result<Vec<Group>, ServerError> {
        Ok(self.store.groups_for_user(user).await?)
    }
}

fn ack(op: &str, message_id: Option<MessageId>) -> ServerEvent {
    ServerEvent::Ack {
        op: op.to_string(),
        message_id,
    }
}

/// Blank text and blank image references count as absent; at least one of
/// the two must remain.
fn content(
    text: Option<String>,
    image: Option<String>,
) -> Result<(Option<String>, Option<String>), ServerError> {
    let text = text.filter(|t| !t.trim().is_empty());
    let image = image.filter(|i| !i.trim().is_empty());
    if text.is_none() && image.is_none() {
        return Err(ServerError::InvalidState(
            "a message needs text or an image".into(),
        ));
    }
    Ok((text, image))
}
