//! Decoder for ContentAPI live-socket payloads.
//!
//! One raw text frame decodes to zero or more [`MessageEvent`]s. Envelopes
//! of any kind other than `"live"` are valid and yield nothing; a `"live"`
//! envelope whose `message_event` object table is present but structurally
//! incomplete is a [`Error::Format`] fault.

use serde::Deserialize;

use crate::domain::{RemoteMessageId, RemoteUserId, RoomId};
use crate::events::{EventKind, MessageEvent, RemoteMessage, RemoteUser};
use crate::{Error, Result};

/// Avatar hash used when neither the message nor its author carries one.
pub const FALLBACK_AVATAR: &str = "5413";

/// Markup assumed when a message carries no `m` value.
pub const DEFAULT_MARKUP: &str = "plaintext";

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Option<LiveData>,
}

#[derive(Deserialize, Default)]
struct LiveData {
    #[serde(default)]
    events: Vec<EventStub>,
    #[serde(default)]
    objects: ObjectTable,
}

#[derive(Deserialize)]
struct EventStub {
    #[serde(rename = "refId")]
    ref_id: i64,
}

#[derive(Deserialize, Default)]
struct ObjectTable {
    #[serde(default)]
    message_event: Option<MessageEventObjects>,
}

#[derive(Deserialize)]
struct MessageEventObjects {
    #[serde(default)]
    message: Option<Vec<RawMessage>>,
    #[serde(default)]
    user: Option<Vec<RawUser>>,
}

#[derive(Deserialize)]
struct RawMessage {
    id: i64,
    #[serde(default)]
    text: String,
    #[serde(rename = "contentId")]
    content_id: i64,
    #[serde(rename = "createUserId", default)]
    create_user_id: i64,
    #[serde(default)]
    deleted: i64,
    #[serde(default)]
    edited: i64,
    #[serde(default)]
    values: RawValues,
}

/// The `values` side-channel on a raw message. The nickname override (`n`)
/// also lives here but only matters when writing, not when decoding.
#[derive(Deserialize, Default)]
struct RawValues {
    /// Markup language tag.
    #[serde(default)]
    m: Option<String>,
    /// Avatar override.
    #[serde(default)]
    a: Option<String>,
}

#[derive(Deserialize)]
struct RawUser {
    id: i64,
    username: String,
    #[serde(default)]
    avatar: Option<String>,
}

/// Decode one raw frame into its message events, in envelope event order.
pub fn decode(payload: &str) -> Result<Vec<MessageEvent>> {
    let envelope: Envelope = serde_json::from_str(payload)?;

    if envelope.kind != "live" {
        return Ok(Vec::new());
    }

    let Some(data) = envelope.data else {
        return Ok(Vec::new());
    };

    // No message_event key at all: a valid envelope carrying nothing for us.
    let Some(objects) = data.objects.message_event else {
        return Ok(Vec::new());
    };

    // The key exists, so both nested lists must too.
    let messages = objects
        .message
        .ok_or_else(|| Error::Format("message_event.message list missing".into()))?;
    let users = objects
        .user
        .ok_or_else(|| Error::Format("message_event.user list missing".into()))?;

    let mut events = Vec::new();

    for stub in &data.events {
        // The object set may be partial; unresolvable stubs are skipped.
        let Some(raw) = messages.iter().find(|m| m.id == stub.ref_id) else {
            continue;
        };

        let actor = users.iter().find(|u| u.id == raw.create_user_id);

        let avatar = raw
            .values
            .a
            .clone()
            .or_else(|| actor.and_then(|u| u.avatar.clone()))
            .unwrap_or_else(|| FALLBACK_AVATAR.to_string());

        let user = actor.map(|u| RemoteUser {
            id: RemoteUserId(u.id),
            name: u.username.clone(),
            avatar,
        });

        let markup = raw
            .values
            .m
            .clone()
            .unwrap_or_else(|| DEFAULT_MARKUP.to_string());

        // Deleted wins over edited; a frame never reports Updated for a
        // message it also reports deleted.
        let kind = if raw.deleted == 1 {
            EventKind::Deleted
        } else if raw.edited == 1 {
            EventKind::Updated
        } else {
            EventKind::Created
        };

        events.push(MessageEvent {
            message: RemoteMessage {
                id: RemoteMessageId(raw.id),
                text: raw.text.clone(),
                markup,
            },
            kind,
            user,
            room: RoomId(raw.content_id),
        });
    }

    Ok(events)
}
