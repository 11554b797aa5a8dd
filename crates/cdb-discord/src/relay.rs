//! Webhook-backed implementation of the relay port. Webhooks are created
//! lazily, once per channel, and cached in the cross-reference store.

use std::sync::Arc;

use async_trait::async_trait;

use cdb_core::domain::{ChannelId, LocalMessageId};
use cdb_core::ports::RelayPort;
use cdb_core::store::{BridgeStore, WebhookEndpoint};
use cdb_core::Result;

use crate::rest::DiscordRest;

pub struct WebhookRelay {
    rest: Arc<DiscordRest>,
    store: BridgeStore,
}

impl WebhookRelay {
    pub fn new(rest: Arc<DiscordRest>, store: BridgeStore) -> Self {
        Self { rest, store }
    }

    /// Cached webhook for a channel, creating (and recording) one on first
    /// use. The store transaction is released before the REST call.
    async fn endpoint_for(&self, channel: ChannelId) -> Result<WebhookEndpoint> {
        let mut tx = self.store.begin().await?;
        let cached = tx.webhook_for_channel(channel).await?;
        drop(tx);
        if let Some(endpoint) = cached {
            return Ok(endpoint);
        }

        let endpoint = self.rest.create_webhook(channel).await?;
        let mut tx = self.store.begin().await?;
        tx.insert_webhook(&endpoint).await?;
        tx.commit().await?;
        Ok(endpoint)
    }
}

#[async_trait]
impl RelayPort for WebhookRelay {
    async fn post(
        &self,
        channel: ChannelId,
        text: &str,
        author: &str,
        avatar_url: &str,
    ) -> Result<LocalMessageId> {
        let endpoint = self.endpoint_for(channel).await?;
        self.rest
            .execute_webhook(&endpoint, text, author, avatar_url)
            .await
    }

    async fn edit(&self, channel: ChannelId, message: LocalMessageId, text: &str) -> Result<()> {
        let endpoint = self.endpoint_for(channel).await?;
        self.rest.edit_webhook_message(&endpoint, message, text).await
    }

    async fn delete(&self, channel: ChannelId, message: LocalMessageId) -> Result<()> {
        let endpoint = self.endpoint_for(channel).await?;
        self.rest.delete_webhook_message(&endpoint, message).await
    }
}
