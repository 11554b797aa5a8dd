//! Thin Discord REST client. Only the handful of endpoints the bridge
//! touches: webhook management and plain channel messages for command
//! replies.

use serde_json::{json, Value};

use cdb_core::domain::{ChannelId, LocalMessageId, WebhookId};
use cdb_core::store::WebhookEndpoint;
use cdb_core::{Error, Result};

const API_BASE: &str = "https://discord.com/api/v10";

pub struct DiscordRest {
    token: String,
    http: reqwest::Client,
}

impl DiscordRest {
    pub fn new(token: String) -> Self {
        Self {
            token,
            http: reqwest::Client::new(),
        }
    }

    fn auth(&self) -> String {
        format!("Bot {}", self.token)
    }

    /// Create a bridge webhook in a channel, labeled with the channel's
    /// name so it is recognizable in the server's integration list.
    pub async fn create_webhook(&self, channel: ChannelId) -> Result<WebhookEndpoint> {
        let name = self.channel_name(channel).await?;
        let body: Value = self
            .http
            .post(format!("{API_BASE}/channels/{}/webhooks", channel.0))
            .header("Authorization", self.auth())
            .json(&json!({ "name": webhook_name(name.as_deref(), channel) }))
            .send()
            .await
            .map_err(external)?
            .error_for_status()
            .map_err(external)?
            .json()
            .await
            .map_err(external)?;

        parse_webhook(channel, &body)
    }

    /// Channel name, or `None` for channels that don't carry one (DMs).
    async fn channel_name(&self, channel: ChannelId) -> Result<Option<String>> {
        let body: Value = self
            .http
            .get(format!("{API_BASE}/channels/{}", channel.0))
            .header("Authorization", self.auth())
            .send()
            .await
            .map_err(external)?
            .error_for_status()
            .map_err(external)?
            .json()
            .await
            .map_err(external)?;
        Ok(body["name"].as_str().map(str::to_string))
    }

    /// Post through a webhook under a borrowed name and avatar. `wait=true`
    /// makes Discord return the created message so we can record its id.
    pub async fn execute_webhook(
        &self,
        endpoint: &WebhookEndpoint,
        content: &str,
        username: &str,
        avatar_url: &str,
    ) -> Result<LocalMessageId> {
        let body: Value = self
            .http
            .post(format!(
                "{API_BASE}/webhooks/{}/{}?wait=true",
                endpoint.id.0, endpoint.token
            ))
            .json(&json!({
                "content": content,
                "username": username,
                "avatar_url": avatar_url,
            }))
            .send()
            .await
            .map_err(external)?
            .error_for_status()
            .map_err(external)?
            .json()
            .await
            .map_err(external)?;

        parse_message_id(&body)
    }

    pub async fn edit_webhook_message(
        &self,
        endpoint: &WebhookEndpoint,
        message: LocalMessageId,
        content: &str,
    ) -> Result<()> {
        self.http
            .patch(format!(
                "{API_BASE}/webhooks/{}/{}/messages/{}",
                endpoint.id.0, endpoint.token, message.0
            ))
            .json(&json!({ "content": content }))
            .send()
            .await
            .map_err(external)?
            .error_for_status()
            .map_err(external)?;
        Ok(())
    }

    pub async fn delete_webhook_message(
        &self,
        endpoint: &WebhookEndpoint,
        message: LocalMessageId,
    ) -> Result<()> {
        self.http
            .delete(format!(
                "{API_BASE}/webhooks/{}/{}/messages/{}",
                endpoint.id.0, endpoint.token, message.0
            ))
            .send()
            .await
            .map_err(external)?
            .error_for_status()
            .map_err(external)?;
        Ok(())
    }

    /// Plain bot message, used for command replies.
    pub async fn create_message(&self, channel: ChannelId, content: &str) -> Result<()> {
        self.http
            .post(format!("{API_BASE}/channels/{}/messages", channel.0))
            .header("Authorization", self.auth())
            .json(&json!({ "content": content }))
            .send()
            .await
            .map_err(external)?
            .error_for_status()
            .map_err(external)?;
        Ok(())
    }

    /// Fetch raw bytes from a CDN URL (avatars, attachments). No auth.
    pub async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let bytes = self
            .http
            .get(url)
            .send()
            .await
            .map_err(external)?
            .error_for_status()
            .map_err(external)?
            .bytes()
            .await
            .map_err(external)?;
        Ok(bytes.to_vec())
    }
}

/// Discord serializes snowflakes as JSON strings.
pub(crate) fn snowflake(value: &Value) -> Option<i64> {
    value
        .as_str()
        .and_then(|s| s.parse().ok())
        .or_else(|| value.as_i64())
}

fn webhook_name(channel_name: Option<&str>, channel: ChannelId) -> String {
    match channel_name {
        Some(name) => format!("ContentAPI Bridge Webhook for {name}"),
        None => format!("ContentAPI Bridge Webhook for {}", channel.0),
    }
}

/// A response that doesn't carry what the call needs is still an
/// external-service failure, not a decode fault of ours.
fn parse_webhook(channel: ChannelId, body: &Value) -> Result<WebhookEndpoint> {
    let id = snowflake(&body["id"])
        .ok_or_else(|| Error::External("webhook response missing id".into()))?;
    let token = body["token"]
        .as_str()
        .ok_or_else(|| Error::External("webhook response missing token".into()))?
        .to_string();
    Ok(WebhookEndpoint {
        channel,
        id: WebhookId(id),
        token,
    })
}

fn parse_message_id(body: &Value) -> Result<LocalMessageId> {
    snowflake(&body["id"])
        .map(LocalMessageId)
        .ok_or_else(|| Error::External("webhook message response missing id".into()))
}

fn external(err: reqwest::Error) -> Error {
    Error::External(err.to_string())
}
