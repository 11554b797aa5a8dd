/// ContentAPI user id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RemoteUserId(pub i64);

/// ContentAPI message id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RemoteMessageId(pub i64);

/// ContentAPI room (content) id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RoomId(pub i64);

/// Discord channel id (snowflake).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChannelId(pub i64);

/// Discord message id (snowflake). Covers both user messages and the
/// webhook copies the bridge posts when relaying inbound events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LocalMessageId(pub i64);

/// Discord user id (snowflake).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LocalUserId(pub i64);

/// Discord webhook id (snowflake).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WebhookId(pub i64);
