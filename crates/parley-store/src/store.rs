//! The asynchronous store interface consumed by the delivery core.
//!
//! The core only ever needs atomic single-record reads and updates; nothing
//! here spans more than one message per call.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use parley_shared::{Conversation, GroupId, MessageId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{Group, Message, MessagePatch, NewGroup, NewMessage, User};

#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn create_user(&self, display_name: &str) -> Result<User>;

    async fn user_exists(&self, id: UserId) -> Result<bool>;

    /// Persist a new message. It starts out `sent`.
    async fn create_message(&self, new: NewMessage) -> Result<Message>;

    async fn get_message(&self, id: MessageId) -> Result<Message>;

    /// Apply `patch` atomically to one message and return the result.
    async fn update_message(&self, id: MessageId, patch: &MessagePatch) -> Result<Message>;

    async fn create_group(&self, new: NewGroup) -> Result<Group>;

    async fn get_group(&self, id: GroupId) -> Result<Group>;

    async fn get_group_members(&self, id: GroupId) -> Result<BTreeSet<UserId>> {
        Ok(self.get_group(id).await?.members)
    }

    /// Fails with [`StoreError::Conflict`] if `user` already is a member.
    async fn add_group_member(&self, group: GroupId, user: UserId) -> Result<Group>;

    /// Fails with [`StoreError::Conflict`] if `user` is not a member.
    async fn remove_group_member(&self, group: GroupId, user: UserId) -> Result<Group>;

    /// When `user` joined `group`; `None` if they are not a member.
    async fn member_since(&self, group: GroupId, user: UserId) -> Result<Option<DateTime<Utc>>>;

    async fn groups_for_user(&self, user: UserId) -> Result<Vec<Group>>;

    async fn conversation_history(
        &self,
        viewer: UserId,
        conversation: Conversation,
    ) -> Result<Vec<Message>>;

    async fn unread_message_ids(
        &self,
        recipient: UserId,
        conversation: Conversation,
    ) -> Result<Vec<MessageId>>;

    /// Messages addressed to `recipient` that it has neither read nor hidden,
    /// counted per conversation. Used to rebuild unseen counters.
    async fn find_undelivered_count(&self, recipient: UserId)
        -> Result<HashMap<Conversation, u32>>;
}

/// [`ChatStore`] over a single SQLite connection.
pub struct SqliteStore {
    db: Mutex<Database>,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self { db: Mutex::new(db) }
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(Database::open_in_memory()?))
    }
}

#[async_trait]
impl ChatStore for SqliteStore {
    async fn create_user(&self, display_name: &str) -> Result<User> {
        self.db.lock().await.insert_user(display_name)
    }

    async fn user_exists(&self, id: UserId) -> Result<bool> {
        self.db.lock().await.user_exists(id)
    }

    async fn create_message(&self, new: NewMessage) -> Result<Message> {
        self.db.lock().await.insert_message(new)
    }

    async fn get_message(&self, id: MessageId) -> Result<Message> {
        self.db.lock().await.get_message(id)
    }

    async fn update_message(&self, id: MessageId, patch: &MessagePatch) -> Result<Message> {
        self.db.lock().await.apply_message_patch(id, patch)
    }

    async fn create_group(&self, new: NewGroup) -> Result<Group> {
        self.db.lock().await.insert_group(new)
    }

    async fn get_group(&self, id: GroupId) -> Result<Group> {
        self.db.lock().await.get_group(id)
    }

    async fn get_group_members(&self, id: GroupId) -> Result<BTreeSet<UserId>> {
        let db = self.db.lock().await;
        // Distinguish "no such group" from "group with no members".
        db.get_group(id)?;
        db.get_group_members(id)
    }

    async fn add_group_member(&self, group: GroupId, user: UserId) -> Result<Group> {
        let db = self.db.lock().await;
        if !db.user_exists(user)? {
            return Err(StoreError::NotFound(format!("user {user}")));
        }
        let group = db.get_group(group)?;
        if !db.add_group_member(group.id, user)? {
            return Err(StoreError::Conflict(format!("user {user} is already a member")));
        }
        db.get_group(group.id)
    }

    async fn remove_group_member(&self, group: GroupId, user: UserId) -> Result<Group> {
        let db = self.db.lock().await;
        let group = db.get_group(group)?;
        if !db.remove_group_member(group.id, user)? {
            return Err(StoreError::Conflict(format!("user {user} is not a member")));
        }
        db.get_group(group.id)
    }

    async fn member_since(&self, group: GroupId, user: UserId) -> Result<Option<DateTime<Utc>>> {
        self.db.lock().await.member_since(group, user)
    }

    async fn groups_for_user(&self, user: UserId) -> Result<Vec<Group>> {
        self.db.lock().await.groups_for_user(user)
    }

    async fn conversation_history(
        &self,
        viewer: UserId,
        conversation: Conversation,
    ) -> Result<Vec<Message>> {
        self.db.lock().await.conversation_history(viewer, conversation)
    }

    async fn unread_message_ids(
        &self,
        recipient: UserId,
        conversation: Conversation,
    ) -> Result<Vec<MessageId>> {
        self.db.lock().await.unread_message_ids(recipient, conversation)
    }

    async fn find_undelivered_count(
        &self,
        recipient: UserId,
    ) -> Result<HashMap<Conversation, u32>> {
        self.db.lock().await.unread_counts(recipient)
    }
}
