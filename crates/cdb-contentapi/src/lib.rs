//! ContentAPI adapter.
//!
//! Implements the core's `RemoteWriter` port over the ContentAPI REST
//! surface and its `StreamClient` port over the live websocket.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};

use cdb_core::domain::{RemoteMessageId, RoomId};
use cdb_core::ports::RemoteWriter;
use cdb_core::{Error, Result};

pub mod live;

#[derive(Clone)]
pub struct ContentApiClient {
    domain: String,
    token: String,
    avatar_size: u32,
    http: reqwest::Client,
}

/// Body of `POST /Write/message`. A present `id` makes it an edit.
#[derive(Serialize)]
struct WriteMessage<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<i64>,
    text: &'a str,
    contentid: i64,
    values: WriteValues<'a>,
}

#[derive(Serialize)]
struct WriteValues<'a> {
    /// Nickname.
    n: &'a str,
    /// Markup.
    m: &'a str,
    /// Avatar.
    a: &'a str,
}

impl ContentApiClient {
    pub fn new(domain: impl Into<String>, token: impl Into<String>, avatar_size: u32) -> Self {
        Self {
            domain: domain.into(),
            token: token.into(),
            avatar_size,
            http: reqwest::Client::new(),
        }
    }

    fn api_route(&self) -> String {
        format!("https://{}/api", self.domain)
    }

    fn live_route(&self) -> String {
        format!("wss://{}/api/live/ws?token={}", self.domain, self.token)
    }

    /// Human-readable room name, used by the bind command's confirmation.
    pub async fn room_name(&self, room: RoomId) -> Result<String> {
        let body = json!({
            "values": { "key": room.0 },
            "requests": [{
                "type": "content",
                "fields": "id,name",
                "query": "id = @key"
            }]
        });

        let data: Value = self
            .http
            .post(format!("{}/Request", self.api_route()))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(external)?
            .error_for_status()
            .map_err(external)?
            .json()
            .await
            .map_err(external)?;

        data["objects"]["content"][0]["name"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| Error::External(format!("room {} not found", room.0)))
    }

    async fn write(&self, message: &WriteMessage<'_>) -> Result<RemoteMessageId> {
        let data: Value = self
            .http
            .post(format!("{}/Write/message", self.api_route()))
            .bearer_auth(&self.token)
            .json(message)
            .send()
            .await
            .map_err(external)?
            .error_for_status()
            .map_err(external)?
            .json()
            .await
            .map_err(external)?;

        data["id"]
            .as_i64()
            .map(RemoteMessageId)
            .ok_or_else(|| Error::External("write response carried no message id".into()))
    }
}

#[async_trait]
impl RemoteWriter for ContentApiClient {
    async fn post_message(
        &self,
        room: RoomId,
        text: &str,
        author: &str,
        avatar: &str,
        markup: &str,
    ) -> Result<RemoteMessageId> {
        self.write(&WriteMessage {
            id: None,
            text,
            contentid: room.0,
            values: WriteValues {
                n: author,
                m: markup,
                a: avatar,
            },
        })
        .await
    }

    async fn edit_message(
        &self,
        id: RemoteMessageId,
        room: RoomId,
        text: &str,
        author: &str,
        avatar: &str,
        markup: &str,
    ) -> Result<()> {
        self.write(&WriteMessage {
            id: Some(id.0),
            text,
            contentid: room.0,
            values: WriteValues {
                n: author,
                m: markup,
                a: avatar,
            },
        })
        .await?;
        Ok(())
    }

    async fn delete_message(&self, id: RemoteMessageId) -> Result<()> {
        self.http
            .post(format!("{}/Delete/message/{}", self.api_route(), id.0))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(external)?
            .error_for_status()
            .map_err(external)?;
        Ok(())
    }

    async fn upload_file(&self, name: &str, bytes: Vec<u8>, bucket: Option<&str>) -> Result<String> {
        let part = reqwest::multipart::Part::bytes(bytes).file_name(name.to_string());
        let mut form = reqwest::multipart::Form::new().part("file", part);
        if let Some(bucket) = bucket {
            form = form
                .text("globalPerms", ".")
                .text("values[bucket]", bucket.to_string());
        }

        let data: Value = self
            .http
            .post(format!("{}/File", self.api_route()))
            .bearer_auth(&self.token)
            .multipart(form)
            .send()
            .await
            .map_err(external)?
            .error_for_status()
            .map_err(external)?
            .json()
            .await
            .map_err(external)?;

        data["hash"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| Error::External("upload response carried no hash".into()))
    }

    fn file_url(&self, hash: &str) -> String {
        format!("{}/File/raw/{hash}", self.api_route())
    }

    fn avatar_url(&self, hash: &str) -> String {
        format!("{}?size={}&crop=true", self.file_url(hash), self.avatar_size)
    }
}

fn external(e: reqwest::Error) -> Error {
    Error::External(format!("contentapi request failed: {e}"))
}
