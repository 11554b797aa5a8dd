//! Hexagonal ports for the external collaborators the relay core depends on.
//!
//! ContentAPI, Discord and the markup service each live behind one of these
//! traits, implemented in the adapter crates. The relay orchestrator and the
//! live link only ever see the traits, which keeps their logic testable with
//! in-memory fakes.

use async_trait::async_trait;

use crate::domain::{ChannelId, LocalMessageId, RemoteMessageId, RemoteUserId, RoomId};
use crate::events::{LocalAttachment, LocalAuthor};
use crate::Result;

/// Reading half of the persistent live connection. `read` blocks until a
/// text frame arrives and returns [`crate::Error::Closed`] when the peer
/// hangs up.
#[async_trait]
pub trait FrameReader: Send {
    async fn read(&mut self) -> Result<String>;
}

/// Writing half of the persistent live connection, owned by the keepalive
/// task. Writes and reads are independent on the underlying socket.
#[async_trait]
pub trait FrameWriter: Send {
    async fn write(&mut self, text: &str) -> Result<()>;
}

/// Factory for live connections, plus the one-time self-identity lookup the
/// link performs before its first connect.
#[async_trait]
pub trait StreamClient: Send + Sync {
    async fn connect(&self) -> Result<(Box<dyn FrameReader>, Box<dyn FrameWriter>)>;

    async fn self_id(&self) -> Result<RemoteUserId>;
}

/// ContentAPI write operations the relay needs.
#[async_trait]
pub trait RemoteWriter: Send + Sync {
    async fn post_message(
        &self,
        room: RoomId,
        text: &str,
        author: &str,
        avatar: &str,
        markup: &str,
    ) -> Result<RemoteMessageId>;

    async fn edit_message(
        &self,
        id: RemoteMessageId,
        room: RoomId,
        text: &str,
        author: &str,
        avatar: &str,
        markup: &str,
    ) -> Result<()>;

    async fn delete_message(&self, id: RemoteMessageId) -> Result<()>;

    async fn upload_file(&self, name: &str, bytes: Vec<u8>, bucket: Option<&str>) -> Result<String>;

    /// Raw file URL for an uploaded content hash.
    fn file_url(&self, hash: &str) -> String;

    /// Cropped avatar variant of [`RemoteWriter::file_url`].
    fn avatar_url(&self, hash: &str) -> String;
}

/// Per-channel relay endpoints on the Discord side. The adapter resolves or
/// creates the underlying webhook once per channel and caches it in the
/// cross-reference store.
#[async_trait]
pub trait RelayPort: Send + Sync {
    async fn post(
        &self,
        channel: ChannelId,
        text: &str,
        author: &str,
        avatar_url: &str,
    ) -> Result<LocalMessageId>;

    async fn edit(&self, channel: ChannelId, message: LocalMessageId, text: &str) -> Result<()>;

    async fn delete(&self, channel: ChannelId, message: LocalMessageId) -> Result<()>;
}

/// Text translation between the two platforms' markup languages. Consumed as
/// an opaque text-to-text transform.
#[async_trait]
pub trait MarkupTranslator: Send + Sync {
    async fn to_remote(&self, text: &str) -> Result<String>;

    async fn to_local(&self, text: &str, lang: &str) -> Result<String>;
}

/// Lookup-or-upload cache mapping a Discord user's current avatar to a
/// ContentAPI content hash.
#[async_trait]
pub trait AvatarResolver: Send + Sync {
    async fn resolve(&self, author: &LocalAuthor) -> Result<String>;
}

/// Lookup-or-upload cache for attachments. Returns the URL to reference in
/// the outbound message body: the rehosted copy for uploadable attachments,
/// the original URL verbatim otherwise.
#[async_trait]
pub trait AttachmentResolver: Send + Sync {
    async fn resolve(&self, attachment: &LocalAttachment) -> Result<String>;
}
