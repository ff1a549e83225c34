/// Protocol identifier reported by the server's health endpoint
pub const PROTOCOL_VERSION: &str = "parley/1";

/// Application name
pub const APP_NAME: &str = "Parley";

/// Text that replaces the content of a message deleted for everyone
pub const DELETED_PLACEHOLDER: &str = "This message was deleted";

/// Maximum group name length in characters
pub const MAX_GROUP_NAME_LEN: usize = 20;

/// Maximum group description length in characters
pub const MAX_GROUP_DESCRIPTION_LEN: usize = 30;

/// Members a new group needs besides its admin
pub const MIN_GROUP_INVITEES: usize = 2;

/// Default HTTP / WebSocket port
pub const DEFAULT_HTTP_PORT: u16 = 5000;

/// Default capacity of a connection's outbound push queue
pub const DEFAULT_OUTBOUND_QUEUE: usize = 256;
