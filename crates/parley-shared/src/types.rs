use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn short(&self) -> String {
                self.0.to_string()[..8].to_string()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s.trim()).map(Self)
            }
        }
    };
}

uuid_id!(
    /// Opaque user identity. Issued by the account collaborator.
    UserId
);
uuid_id!(GroupId);
uuid_id!(MessageId);
uuid_id!(
    /// Identifies one live transport connection. A reconnecting user gets a
    /// fresh id, which is what lets a stale disconnect be told apart from the
    /// current one.
    ConnectionId
);

/// Who a message is addressed to.
///
/// Flattened into message records this serializes as either a `receiver_id`
/// or a `group_id` field, never both.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Target {
    #[serde(rename = "receiver_id")]
    Direct(UserId),
    #[serde(rename = "group_id")]
    Group(GroupId),
}

impl Target {
    /// The conversation this message lands in, as seen by `recipient`.
    ///
    /// For a direct message the recipient files it under the sender; group
    /// messages are filed under the group for everyone.
    pub fn conversation_for(&self, sender: UserId) -> Conversation {
        match self {
            Target::Direct(_) => Conversation::Direct(sender),
            Target::Group(group_id) => Conversation::Group(*group_id),
        }
    }
}

/// A conversation from one participant's point of view: either the peer of a
/// one-to-one chat or a group.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Conversation {
    Direct(UserId),
    Group(GroupId),
}

impl fmt::Display for Conversation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Conversation::Direct(peer) => write!(f, "direct:{}", peer),
            Conversation::Group(group) => write!(f, "group:{}", group),
        }
    }
}

/// Delivery lifecycle of a message. Ordered: a status may only move to a
/// greater value.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Sent,
    Delivered,
    Read,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Read => "read",
        }
    }

    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "sent" => Some(Self::Sent),
            "delivered" => Some(Self::Delivered),
            "read" => Some(Self::Read),
            _ => None,
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
