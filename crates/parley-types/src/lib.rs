pub mod api;
pub mod events;
pub mod models;

/// Integer identity of a registered user.
pub type UserId = i64;

/// Integer identity of a chat (private or group).
pub type ChatId = i64;

/// Integer identity of a stored message.
pub type MessageId = i64;
