//! Event model shared by the decoder, dispatch and the relay orchestrator.

use crate::domain::{
    ChannelId, LocalMessageId, LocalUserId, RemoteMessageId, RemoteUserId, RoomId,
};

/// A ContentAPI user as seen in a live event. Transient, rebuilt per event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteUser {
    pub id: RemoteUserId,
    pub name: String,
    /// Content hash of the avatar to display for this event, already
    /// resolved through the per-message override / user avatar / fallback
    /// chain.
    pub avatar: String,
}

/// A ContentAPI message as seen in a live event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteMessage {
    pub id: RemoteMessageId,
    pub text: String,
    pub markup: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    Created,
    Updated,
    Deleted,
}

/// One decoded live event, fanned out to listeners by kind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageEvent {
    pub message: RemoteMessage,
    pub kind: EventKind,
    /// Absent for system/anonymous events; those are never relayed.
    pub user: Option<RemoteUser>,
    pub room: RoomId,
}

/// Author of a Discord message, as delivered by the gateway.
#[derive(Clone, Debug)]
pub struct LocalAuthor {
    pub id: LocalUserId,
    /// Display name priority already applied: nick > global name > username.
    pub display_name: String,
    pub avatar_url: String,
    pub is_bot: bool,
}

/// A Discord attachment reference. The bytes stay remote; the attachment
/// cache downloads them only when rehosting.
#[derive(Clone, Debug)]
pub struct LocalAttachment {
    pub url: String,
    pub filename: String,
    pub size: u64,
    pub content_type: Option<String>,
}

impl LocalAttachment {
    pub fn is_spoiler(&self) -> bool {
        self.filename.starts_with("SPOILER_")
    }
}

/// A Discord message created or edited by a user, fed to the outbound relay.
#[derive(Clone, Debug)]
pub struct LocalMessage {
    pub id: LocalMessageId,
    pub channel: ChannelId,
    pub author: LocalAuthor,
    pub text: String,
    pub attachments: Vec<LocalAttachment>,
}
