//! Cross-reference store: the durable id mappings between ContentAPI and
//! Discord, plus the relay-endpoint and content caches that ride along.
//!
//! Every mutation that pairs with an external relay call goes through a
//! [`StoreTx`], sequenced as: read what the decision needs, perform the
//! external call, persist, commit. A failed external call therefore never
//! leaves a mapping behind.
//!
//! The pool holds a single connection, so a transaction must be committed or
//! dropped before the next store access; callers never nest them.

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Executor, Row, Sqlite, SqlitePool, Transaction};

use crate::domain::{ChannelId, LocalMessageId, LocalUserId, RemoteMessageId, RoomId, WebhookId};
use crate::Result;

/// A Discord message mirrored out to ContentAPI.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MessagePair {
    pub local: LocalMessageId,
    pub remote: RemoteMessageId,
    pub room: RoomId,
}

/// A webhook copy of a ContentAPI message, posted into one bound channel.
/// One remote message may have many of these, one per channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RelayPair {
    pub local: LocalMessageId,
    pub channel: ChannelId,
    pub remote: RemoteMessageId,
}

/// A cached relay endpoint for one channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WebhookEndpoint {
    pub channel: ChannelId,
    pub id: WebhookId,
    pub token: String,
}

/// A Discord user's avatar as last uploaded to ContentAPI.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AvatarEntry {
    pub user: LocalUserId,
    pub avatar_url: String,
    pub hash: String,
}

#[derive(Clone)]
pub struct BridgeStore {
    pool: SqlitePool,
}

impl BridgeStore {
    /// Open (and if needed create) the store. A single connection keeps all
    /// writes serialized, matching the one-event-at-a-time dispatch model.
    pub async fn open(url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(url)
            .await?;

        for ddl in [
            "CREATE TABLE IF NOT EXISTS channel_store (
                discord_channel_id INTEGER PRIMARY KEY NOT NULL,
                content_api_room_id INTEGER NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS content_api_message_store (
                discord_message_id INTEGER PRIMARY KEY NOT NULL,
                content_api_message_id INTEGER NOT NULL UNIQUE,
                content_api_room_id INTEGER NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS webhook_message_store (
                discord_message_id INTEGER PRIMARY KEY NOT NULL,
                webhook_channel_id INTEGER NOT NULL,
                contentapi_message_id INTEGER NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS webhook_channel_store (
                discord_channel_id INTEGER PRIMARY KEY NOT NULL,
                webhook_id INTEGER NOT NULL,
                webhook_token TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS avatar_store (
                discord_uid INTEGER PRIMARY KEY NOT NULL,
                discord_avatar_url TEXT NOT NULL,
                content_api_hash TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS attachment_store (
                attachment_url TEXT PRIMARY KEY NOT NULL,
                content_api_hash TEXT NOT NULL
            )",
        ] {
            sqlx::query(ddl).execute(&pool).await?;
        }

        Ok(Self { pool })
    }

    pub async fn begin(&self) -> Result<StoreTx<'_>> {
        Ok(StoreTx {
            tx: self.pool.begin().await?,
        })
    }

    /// Bind a channel to a room, replacing any previous binding for the
    /// channel (at most one room per channel, enforced here).
    pub async fn bind_channel(&self, channel: ChannelId, room: RoomId) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO channel_store (discord_channel_id, content_api_room_id)
             VALUES (?, ?)",
        )
        .bind(channel.0)
        .bind(room.0)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Remove a channel's binding. Returns whether one existed.
    pub async fn unbind_channel(&self, channel: ChannelId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM channel_store WHERE discord_channel_id = ?")
            .bind(channel.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn room_for_channel(&self, channel: ChannelId) -> Result<Option<RoomId>> {
        fetch_room_for_channel(&self.pool, channel).await
    }

    /// All channels bound to a room, for inbound fan-out.
    pub async fn channels_for_room(&self, room: RoomId) -> Result<Vec<ChannelId>> {
        let rows = sqlx::query(
            "SELECT discord_channel_id FROM channel_store WHERE content_api_room_id = ?",
        )
        .bind(room.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| ChannelId(r.get(0))).collect())
    }

    pub async fn message_pair(&self, local: LocalMessageId) -> Result<Option<MessagePair>> {
        fetch_message_pair(&self.pool, local).await
    }

    pub async fn relay_pairs_for_remote(
        &self,
        remote: RemoteMessageId,
    ) -> Result<Vec<RelayPair>> {
        fetch_relay_pairs(&self.pool, remote).await
    }
}

/// A scoped transaction over the store. Held open across the paired external
/// call so a write only lands when the call succeeded.
pub struct StoreTx<'a> {
    tx: Transaction<'a, Sqlite>,
}

impl StoreTx<'_> {
    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    pub async fn room_for_channel(&mut self, channel: ChannelId) -> Result<Option<RoomId>> {
        fetch_room_for_channel(&mut *self.tx, channel).await
    }

    pub async fn message_pair(&mut self, local: LocalMessageId) -> Result<Option<MessagePair>> {
        fetch_message_pair(&mut *self.tx, local).await
    }

    pub async fn insert_message_pair(&mut self, pair: MessagePair) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO content_api_message_store
             (discord_message_id, content_api_message_id, content_api_room_id)
             VALUES (?, ?, ?)",
        )
        .bind(pair.local.0)
        .bind(pair.remote.0)
        .bind(pair.room.0)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    pub async fn delete_message_pair(&mut self, local: LocalMessageId) -> Result<()> {
        sqlx::query("DELETE FROM content_api_message_store WHERE discord_message_id = ?")
            .bind(local.0)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    pub async fn relay_pairs_for_remote(
        &mut self,
        remote: RemoteMessageId,
    ) -> Result<Vec<RelayPair>> {
        fetch_relay_pairs(&mut *self.tx, remote).await
    }

    pub async fn insert_relay_pair(&mut self, pair: RelayPair) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO webhook_message_store
             (discord_message_id, webhook_channel_id, contentapi_message_id)
             VALUES (?, ?, ?)",
        )
        .bind(pair.local.0)
        .bind(pair.channel.0)
        .bind(pair.remote.0)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    pub async fn delete_relay_pair(&mut self, local: LocalMessageId) -> Result<()> {
        sqlx::query("DELETE FROM webhook_message_store WHERE discord_message_id = ?")
            .bind(local.0)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    pub async fn webhook_for_channel(
        &mut self,
        channel: ChannelId,
    ) -> Result<Option<WebhookEndpoint>> {
        let row = sqlx::query(
            "SELECT webhook_id, webhook_token
             FROM webhook_channel_store WHERE discord_channel_id = ?",
        )
        .bind(channel.0)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(|r| WebhookEndpoint {
            channel,
            id: WebhookId(r.get(0)),
            token: r.get(1),
        }))
    }

    pub async fn insert_webhook(&mut self, endpoint: &WebhookEndpoint) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO webhook_channel_store
             (discord_channel_id, webhook_id, webhook_token)
             VALUES (?, ?, ?)",
        )
        .bind(endpoint.channel.0)
        .bind(endpoint.id.0)
        .bind(endpoint.token.as_str())
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    pub async fn avatar_entry(&mut self, user: LocalUserId) -> Result<Option<AvatarEntry>> {
        let row = sqlx::query(
            "SELECT discord_avatar_url, content_api_hash
             FROM avatar_store WHERE discord_uid = ?",
        )
        .bind(user.0)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(|r| AvatarEntry {
            user,
            avatar_url: r.get(0),
            hash: r.get(1),
        }))
    }

    pub async fn insert_avatar(&mut self, entry: &AvatarEntry) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO avatar_store
             (discord_uid, discord_avatar_url, content_api_hash)
             VALUES (?, ?, ?)",
        )
        .bind(entry.user.0)
        .bind(entry.avatar_url.as_str())
        .bind(entry.hash.as_str())
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    pub async fn attachment_hash(&mut self, url: &str) -> Result<Option<String>> {
        let row =
            sqlx::query("SELECT content_api_hash FROM attachment_store WHERE attachment_url = ?")
                .bind(url)
                .fetch_optional(&mut *self.tx)
                .await?;
        Ok(row.map(|r| r.get(0)))
    }

    pub async fn insert_attachment(&mut self, url: &str, hash: &str) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO attachment_store (attachment_url, content_api_hash)
             VALUES (?, ?)",
        )
        .bind(url)
        .bind(hash)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }
}

async fn fetch_room_for_channel<'e, E>(executor: E, channel: ChannelId) -> Result<Option<RoomId>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row =
        sqlx::query("SELECT content_api_room_id FROM channel_store WHERE discord_channel_id = ?")
            .bind(channel.0)
            .fetch_optional(executor)
            .await?;
    Ok(row.map(|r| RoomId(r.get(0))))
}

async fn fetch_message_pair<'e, E>(
    executor: E,
    local: LocalMessageId,
) -> Result<Option<MessagePair>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(
        "SELECT content_api_message_id, content_api_room_id
         FROM content_api_message_store WHERE discord_message_id = ?",
    )
    .bind(local.0)
    .fetch_optional(executor)
    .await?;
    Ok(row.map(|r| MessagePair {
        local,
        remote: RemoteMessageId(r.get(0)),
        room: RoomId(r.get(1)),
    }))
}

async fn fetch_relay_pairs<'e, E>(executor: E, remote: RemoteMessageId) -> Result<Vec<RelayPair>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query(
        "SELECT discord_message_id, webhook_channel_id
         FROM webhook_message_store WHERE contentapi_message_id = ?",
    )
    .bind(remote.0)
    .fetch_all(executor)
    .await?;
    Ok(rows
        .into_iter()
        .map(|r| RelayPair {
            local: LocalMessageId(r.get(0)),
            channel: ChannelId(r.get(1)),
            remote,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_store() -> BridgeStore {
        BridgeStore::open("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn bind_replaces_previous_room() {
        let store = memory_store().await;
        store.bind_channel(ChannelId(10), RoomId(1)).await.unwrap();
        store.bind_channel(ChannelId(10), RoomId(2)).await.unwrap();

        assert_eq!(
            store.room_for_channel(ChannelId(10)).await.unwrap(),
            Some(RoomId(2))
        );
        assert!(store.channels_for_room(RoomId(1)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn room_scan_returns_all_bound_channels() {
        let store = memory_store().await;
        store.bind_channel(ChannelId(1), RoomId(7)).await.unwrap();
        store.bind_channel(ChannelId(2), RoomId(7)).await.unwrap();
        store.bind_channel(ChannelId(3), RoomId(8)).await.unwrap();

        let mut channels = store.channels_for_room(RoomId(7)).await.unwrap();
        channels.sort_by_key(|c| c.0);
        assert_eq!(channels, vec![ChannelId(1), ChannelId(2)]);
    }

    #[tokio::test]
    async fn unbind_reports_whether_a_binding_existed() {
        let store = memory_store().await;
        assert!(!store.unbind_channel(ChannelId(5)).await.unwrap());
        store.bind_channel(ChannelId(5), RoomId(1)).await.unwrap();
        assert!(store.unbind_channel(ChannelId(5)).await.unwrap());
        assert_eq!(store.room_for_channel(ChannelId(5)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn message_pair_round_trip_and_delete() {
        let store = memory_store().await;
        let pair = MessagePair {
            local: LocalMessageId(100),
            remote: RemoteMessageId(200),
            room: RoomId(7),
        };

        let mut tx = store.begin().await.unwrap();
        tx.insert_message_pair(pair).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.message_pair(LocalMessageId(100)).await.unwrap(), Some(pair));

        let mut tx = store.begin().await.unwrap();
        tx.delete_message_pair(LocalMessageId(100)).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.message_pair(LocalMessageId(100)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn relay_pairs_scan_by_remote_message() {
        let store = memory_store().await;
        let mut tx = store.begin().await.unwrap();
        for (local, channel) in [(1, 11), (2, 12), (3, 13)] {
            tx.insert_relay_pair(RelayPair {
                local: LocalMessageId(local),
                channel: ChannelId(channel),
                remote: RemoteMessageId(500),
            })
            .await
            .unwrap();
        }
        tx.insert_relay_pair(RelayPair {
            local: LocalMessageId(4),
            channel: ChannelId(14),
            remote: RemoteMessageId(501),
        })
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let pairs = store.relay_pairs_for_remote(RemoteMessageId(500)).await.unwrap();
        assert_eq!(pairs.len(), 3);
        assert!(pairs.iter().all(|p| p.remote == RemoteMessageId(500)));
    }

    #[tokio::test]
    async fn uncommitted_writes_are_rolled_back() {
        let store = memory_store().await;
        {
            let mut tx = store.begin().await.unwrap();
            tx.insert_message_pair(MessagePair {
                local: LocalMessageId(1),
                remote: RemoteMessageId(2),
                room: RoomId(3),
            })
            .await
            .unwrap();
            // dropped without commit
        }

        assert_eq!(store.message_pair(LocalMessageId(1)).await.unwrap(), None);
    }
}
