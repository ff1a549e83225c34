use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::types::{Conversation, DeliveryStatus, GroupId, MessageId, Target, UserId};

/// Frames a client sends over its WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// One-to-one message
    SendDirect {
        to: UserId,
        text: Option<String>,
        image: Option<String>,
        reply_to: Option<MessageId>,
    },

    /// Message to every member of a group
    SendGroup {
        group_id: GroupId,
        text: Option<String>,
        image: Option<String>,
        reply_to: Option<MessageId>,
    },

    /// Receipt acknowledgement from a recipient
    MarkDelivered { message_id: MessageId },

    /// Explicit read of a single message
    MarkRead { message_id: MessageId },

    /// Read everything still unread in one conversation
    MarkConversationRead { conversation: Conversation },

    /// Hide a message from the caller's own view
    DeleteForMe { message_id: MessageId },

    /// Sender-only destruction of a message's content
    DeleteForAll { message_id: MessageId },

    /// Which conversation the client currently has open (`None` = none)
    ViewConversation { conversation: Option<Conversation> },
}

impl ClientEvent {
    pub fn from_json(frame: &str) -> Result<Self, ProtocolError> {
        if frame.trim().is_empty() {
            return Err(ProtocolError::Empty);
        }
        Ok(serde_json::from_str(frame)?)
    }

    /// Short operation name used in acknowledgements and logs.
    pub fn op(&self) -> &'static str {
        match self {
            ClientEvent::SendDirect { .. } => "send_direct",
            ClientEvent::SendGroup { .. } => "send_group",
            ClientEvent::MarkDelivered { .. } => "mark_delivered",
            ClientEvent::MarkRead { .. } => "mark_read",
            ClientEvent::MarkConversationRead { .. } => "mark_conversation_read",
            ClientEvent::DeleteForMe { .. } => "delete_for_me",
            ClientEvent::DeleteForAll { .. } => "delete_for_all",
            ClientEvent::ViewConversation { .. } => "view_conversation",
        }
    }
}

/// Frames the server pushes to a client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// A direct message addressed to this user
    NewMessage { message: MessagePayload },

    /// A message posted to one of this user's groups
    GroupMessage {
        group_id: GroupId,
        message: MessagePayload,
    },

    /// The sender destroyed a message's content; replace the local copy
    MessageDeletedForAll { message: MessagePayload },

    /// Full set of users with a live connection
    PresenceChanged { online: Vec<UserId> },

    /// The caller's own send, as stored
    MessageSent { message: MessagePayload },

    /// Delivery receipt for a message this user sent
    MessageStatus {
        message_id: MessageId,
        status: DeliveryStatus,
        at: DateTime<Utc>,
    },

    /// Unseen counters, sent once after connecting
    UnseenCounts { counts: Vec<UnseenCount> },

    /// Success report for an operation that returns nothing else
    Ack {
        op: String,
        message_id: Option<MessageId>,
    },

    /// Failure report for the operation the client just sent
    Error { code: ErrorCode, message: String },
}

impl ServerEvent {
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Wire view of a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessagePayload {
    pub id: MessageId,
    pub sender_id: UserId,
    /// Serialized as `receiver_id` or `group_id`.
    #[serde(flatten)]
    pub target: Target,
    pub text: Option<String>,
    pub image: Option<String>,
    pub reply_to: Option<MessageId>,
    pub status: DeliveryStatus,
    pub deleted_for_all: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnseenCount {
    pub conversation: Conversation,
    pub count: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    NotFound,
    PermissionDenied,
    InvalidState,
    BadRequest,
    StoreFailure,
}
