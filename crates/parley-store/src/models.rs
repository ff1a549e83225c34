//! Domain records persisted in the SQLite database.
//!
//! Every struct derives `Serialize` so it can be handed directly to the HTTP
//! layer.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use parley_shared::protocol::MessagePayload;
use parley_shared::{Conversation, DeliveryStatus, GroupId, MessageId, Target, UserId};

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Group
// ---------------------------------------------------------------------------

/// A group conversation. `members` always contains `admin`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    pub description: Option<String>,
    pub admin: UserId,
    pub members: BTreeSet<UserId>,
    pub avatar: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Group {
    pub fn is_member(&self, user: UserId) -> bool {
        self.members.contains(&user)
    }

    pub fn is_admin(&self, user: UserId) -> bool {
        self.admin == user
    }
}

/// Fields for a group that does not exist yet.
#[derive(Debug, Clone)]
pub struct NewGroup {
    pub name: String,
    pub description: Option<String>,
    pub admin: UserId,
    pub members: BTreeSet<UserId>,
    pub avatar: Option<String>,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A chat message together with its delivery state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub sender_id: UserId,
    #[serde(flatten)]
    pub target: Target,
    pub text: Option<String>,
    /// Blob storage reference of an attached image.
    pub image: Option<String>,
    pub reply_to: Option<MessageId>,
    pub status: DeliveryStatus,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
    /// Users that hid this message from their own view.
    pub deleted_by: BTreeSet<UserId>,
    /// Users that have read this message. For a direct message this is at
    /// most the receiver; group messages collect one receipt per member.
    pub read_by: BTreeSet<UserId>,
    pub deleted_for_all: bool,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// The conversation this message belongs to, from `viewer`'s side.
    pub fn conversation_for(&self, viewer: UserId) -> Conversation {
        match self.target {
            Target::Direct(receiver) if viewer == self.sender_id => Conversation::Direct(receiver),
            other => other.conversation_for(self.sender_id),
        }
    }

    /// `true` if `user` still counts this message as unseen.
    pub fn is_unread_by(&self, user: UserId) -> bool {
        user != self.sender_id && !self.read_by.contains(&user) && !self.deleted_by.contains(&user)
    }

    pub fn is_visible_to(&self, user: UserId) -> bool {
        !self.deleted_by.contains(&user)
    }

    pub fn to_payload(&self) -> MessagePayload {
        MessagePayload {
            id: self.id,
            sender_id: self.sender_id,
            target: self.target,
            text: self.text.clone(),
            image: self.image.clone(),
            reply_to: self.reply_to,
            status: self.status,
            deleted_for_all: self.deleted_for_all,
            created_at: self.created_at,
        }
    }
}

/// Fields supplied by the sender when a message is created.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub sender_id: UserId,
    pub target: Target,
    pub text: Option<String>,
    pub image: Option<String>,
    pub reply_to: Option<MessageId>,
}

/// A partial update of one message record.
///
/// Applying a patch never lowers `status` and never overwrites a timestamp
/// that is already set, so replaying a patch is harmless.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessagePatch {
    pub status: Option<DeliveryStatus>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
    pub text: Option<String>,
    pub clear_image: bool,
    pub deleted_for_all: bool,
    pub deleted_by: Option<UserId>,
    pub read_by: Option<UserId>,
}

impl MessagePatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn apply(&self, message: &mut Message) {
        if let Some(status) = self.status {
            if status > message.status {
                message.status = status;
            }
        }
        if message.delivered_at.is_none() {
            message.delivered_at = self.delivered_at;
        }
        if message.read_at.is_none() {
            message.read_at = self.read_at;
        }
        if let Some(text) = &self.text {
            message.text = Some(text.clone());
        }
        if self.clear_image {
            message.image = None;
        }
        message.deleted_for_all |= self.deleted_for_all;
        if let Some(user) = self.deleted_by {
            message.deleted_by.insert(user);
        }
        if let Some(user) = self.read_by {
            message.read_by.insert(user);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn direct(sender: UserId, receiver: UserId) -> Message {
        Message {
            id: MessageId::new(),
            sender_id: sender,
            target: Target::Direct(receiver),
            text: Some("hi".into()),
            image: Some("blob://1".into()),
            reply_to: None,
            status: DeliveryStatus::Sent,
            delivered_at: None,
            read_at: None,
            deleted_by: BTreeSet::new(),
            read_by: BTreeSet::new(),
            deleted_for_all: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn conversation_depends_on_viewer() {
        let (a, b) = (UserId::new(), UserId::new());
        let msg = direct(a, b);
        assert_eq!(msg.conversation_for(a), Conversation::Direct(b));
        assert_eq!(msg.conversation_for(b), Conversation::Direct(a));
    }

    #[test]
    fn patch_never_lowers_status() {
        let (a, b) = (UserId::new(), UserId::new());
        let mut msg = direct(a, b);
        msg.status = DeliveryStatus::Read;

        MessagePatch {
            status: Some(DeliveryStatus::Delivered),
            ..Default::default()
        }
        .apply(&mut msg);

        assert_eq!(msg.status, DeliveryStatus::Read);
    }

    #[test]
    fn patch_keeps_first_timestamp() {
        let (a, b) = (UserId::new(), UserId::new());
        let mut msg = direct(a, b);
        let first = Utc::now();
        msg.read_at = Some(first);

        MessagePatch {
            read_at: Some(first + chrono::Duration::seconds(5)),
            ..Default::default()
        }
        .apply(&mut msg);

        assert_eq!(msg.read_at, Some(first));
    }

    #[test]
    fn unread_tracks_receipts_and_deletions() {
        let (a, b) = (UserId::new(), UserId::new());
        let mut msg = direct(a, b);
        assert!(msg.is_unread_by(b));
        assert!(!msg.is_unread_by(a));

        msg.deleted_by.insert(b);
        assert!(!msg.is_unread_by(b));
        assert!(!msg.is_visible_to(b));
        assert!(msg.is_visible_to(a));
    }
}
