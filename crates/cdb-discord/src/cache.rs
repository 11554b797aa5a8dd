//! Lookup-or-upload caches for Discord media rehosted on ContentAPI.
//!
//! Both caches read and write the store in short transactions of their own,
//! so they must never be called while the caller holds one open.

use std::sync::Arc;

use async_trait::async_trait;

use cdb_core::events::{LocalAttachment, LocalAuthor};
use cdb_core::ports::{AttachmentResolver, AvatarResolver, RemoteWriter};
use cdb_core::store::{AvatarEntry, BridgeStore};
use cdb_core::Result;

use crate::rest::DiscordRest;

const AVATAR_BUCKET: &str = "discord-bridge-avatars";
const ATTACHMENT_BUCKET: &str = "discord-bridge-upload";

/// Image types ContentAPI will accept for rehosting. Anything else is
/// referenced by its original Discord URL.
const ACCEPTED_IMAGE_TYPES: [&str; 8] = [
    "image/bmp",
    "image/gif",
    "image/jpeg",
    "image/png",
    "image/tiff",
    "image/webp",
    "image/x-portable-bitmap",
    "image/tga",
];

/// Maps a Discord user's avatar to a ContentAPI content hash, re-uploading
/// only when the avatar URL changed since the last upload.
pub struct AvatarCache {
    store: BridgeStore,
    remote: Arc<dyn RemoteWriter>,
    rest: Arc<DiscordRest>,
}

impl AvatarCache {
    pub fn new(store: BridgeStore, remote: Arc<dyn RemoteWriter>, rest: Arc<DiscordRest>) -> Self {
        Self { store, remote, rest }
    }
}

#[async_trait]
impl AvatarResolver for AvatarCache {
    async fn resolve(&self, author: &LocalAuthor) -> Result<String> {
        let mut tx = self.store.begin().await?;
        let cached = tx.avatar_entry(author.id).await?;
        drop(tx);
        if let Some(entry) = cached {
            if entry.avatar_url == author.avatar_url {
                return Ok(entry.hash);
            }
        }

        let bytes = self.rest.download(&author.avatar_url).await?;
        let hash = self
            .remote
            .upload_file("avatar.webp", bytes, Some(AVATAR_BUCKET))
            .await?;

        let mut tx = self.store.begin().await?;
        tx.insert_avatar(&AvatarEntry {
            user: author.id,
            avatar_url: author.avatar_url.clone(),
            hash: hash.clone(),
        })
        .await?;
        tx.commit().await?;
        Ok(hash)
    }
}

/// Rehosts image attachments on ContentAPI, once per upstream URL. Oversized
/// or non-image attachments pass through as their original URL.
pub struct AttachmentCache {
    store: BridgeStore,
    remote: Arc<dyn RemoteWriter>,
    rest: Arc<DiscordRest>,
    size_limit: u64,
}

impl AttachmentCache {
    pub fn new(
        store: BridgeStore,
        remote: Arc<dyn RemoteWriter>,
        rest: Arc<DiscordRest>,
        size_limit: u64,
    ) -> Self {
        Self {
            store,
            remote,
            rest,
            size_limit,
        }
    }

    fn rehostable(&self, attachment: &LocalAttachment) -> bool {
        if attachment.size > self.size_limit {
            return false;
        }
        attachment
            .content_type
            .as_deref()
            .is_some_and(|ct| ACCEPTED_IMAGE_TYPES.contains(&ct))
    }
}

/// Attachment URLs carry signed query parameters that rotate; the path alone
/// identifies the content.
fn cache_key(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

#[async_trait]
impl AttachmentResolver for AttachmentCache {
    async fn resolve(&self, attachment: &LocalAttachment) -> Result<String> {
        if !self.rehostable(attachment) {
            return Ok(attachment.url.clone());
        }
        let key = cache_key(&attachment.url).to_string();

        let mut tx = self.store.begin().await?;
        let cached = tx.attachment_hash(&key).await?;
        drop(tx);
        if let Some(hash) = cached {
            return Ok(self.remote.file_url(&hash));
        }

        let bytes = self.rest.download(&attachment.url).await?;
        let hash = self
            .remote
            .upload_file(&attachment.filename, bytes, Some(ATTACHMENT_BUCKET))
            .await?;

        let mut tx = self.store.begin().await?;
        tx.insert_attachment(&key, &hash).await?;
        tx.commit().await?;
        Ok(self.remote.file_url(&hash))
    }
}
