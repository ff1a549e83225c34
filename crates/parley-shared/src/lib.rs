//! # parley-shared
//!
//! Identifiers, delivery states and the WebSocket wire protocol shared by the
//! Parley store and server crates.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::ProtocolError;
pub use types::{ConnectionId, Conversation, DeliveryStatus, GroupId, MessageId, Target, UserId};
