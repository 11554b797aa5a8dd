//! Minimal Discord gateway session. Identifies with message intents, keeps
//! the heartbeat going and feeds message events into the outbound relay.
//! Bind/unbind commands are handled here too since they arrive as ordinary
//! messages.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use cdb_core::domain::{ChannelId, LocalMessageId, LocalUserId, RoomId};
use cdb_core::events::{LocalAttachment, LocalAuthor, LocalMessage};
use cdb_core::relay::OutboundRelay;
use cdb_core::store::BridgeStore;
use cdb_core::{Error, Result};

use crate::rest::{snowflake, DiscordRest};

const GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";

/// GUILDS | GUILD_MESSAGES | MESSAGE_CONTENT.
const INTENTS: u64 = 1 | (1 << 9) | (1 << 15);

#[derive(Clone, Copy, Debug)]
pub struct GatewayConfig {
    pub reconnect_delay: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(15),
        }
    }
}

pub struct DiscordGateway {
    token: String,
    outbound: Arc<OutboundRelay>,
    store: BridgeStore,
    rest: Arc<DiscordRest>,
    cfg: GatewayConfig,
}

impl DiscordGateway {
    pub fn new(
        token: String,
        outbound: Arc<OutboundRelay>,
        store: BridgeStore,
        rest: Arc<DiscordRest>,
        cfg: GatewayConfig,
    ) -> Self {
        Self {
            token,
            outbound,
            store,
            rest,
            cfg,
        }
    }

    /// Run gateway sessions until shutdown, reconnecting with a fixed delay
    /// after each fault.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        loop {
            match self.session(&shutdown).await {
                Ok(()) => return Ok(()),
                Err(err) => warn!(error = %err, "gateway session ended"),
            }
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                _ = tokio::time::sleep(self.cfg.reconnect_delay) => {}
            }
        }
    }

    /// One connect-identify-read cycle. Returns `Ok(())` only on shutdown.
    async fn session(&self, shutdown: &CancellationToken) -> Result<()> {
        let (socket, _) = connect_async(GATEWAY_URL)
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;
        let (mut sink, mut stream) = socket.split();

        let hello = next_payload(&mut stream).await?;
        let interval = hello["d"]["heartbeat_interval"]
            .as_u64()
            .ok_or_else(|| Error::Format("gateway hello missing heartbeat_interval".into()))?;

        sink.send(Message::Text(identify(&self.token).to_string()))
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;
        info!(heartbeat_ms = interval, "gateway session open");

        let mut heartbeat = tokio::time::interval(Duration::from_millis(interval));
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut seq: Option<i64> = None;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                _ = heartbeat.tick() => {
                    sink.send(Message::Text(json!({ "op": 1, "d": seq }).to_string()))
                        .await
                        .map_err(|e| Error::Connection(e.to_string()))?;
                }
                payload = next_payload(&mut stream) => {
                    let payload = payload?;
                    match payload["op"].as_u64() {
                        Some(0) => {
                            seq = payload["s"].as_i64().or(seq);
                            if let Some(name) = payload["t"].as_str() {
                                self.handle_dispatch(name, &payload["d"]).await;
                            }
                        }
                        // Immediate heartbeat request.
                        Some(1) => {
                            sink.send(Message::Text(json!({ "op": 1, "d": seq }).to_string()))
                                .await
                                .map_err(|e| Error::Connection(e.to_string()))?;
                        }
                        // Reconnect / invalid session: drop and start over.
                        Some(7) | Some(9) => {
                            return Err(Error::Connection("gateway requested reconnect".into()));
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    /// Relay faults are logged and swallowed; one bad event must not take
    /// the session down.
    async fn handle_dispatch(&self, name: &str, data: &Value) {
        let result = match name {
            "MESSAGE_CREATE" => match parse_message(data) {
                Some(msg) => self.on_created(msg).await,
                None => Ok(()),
            },
            "MESSAGE_UPDATE" => match parse_message(data) {
                // Embed-only updates arrive without an author; skip them.
                Some(msg) => self.outbound.message_updated(&msg).await,
                None => Ok(()),
            },
            "MESSAGE_DELETE" => match snowflake(&data["id"]) {
                Some(id) => self.outbound.message_deleted(LocalMessageId(id)).await,
                None => Ok(()),
            },
            _ => Ok(()),
        };
        if let Err(err) = result {
            warn!(event = name, error = %err, "failed to relay gateway event");
        }
    }

    async fn on_created(&self, msg: LocalMessage) -> Result<()> {
        if self.handle_command(&msg).await? {
            return Ok(());
        }
        self.outbound.message_created(&msg).await
    }

    /// Bind/unbind commands. Returns whether the message was consumed.
    async fn handle_command(&self, msg: &LocalMessage) -> Result<bool> {
        if msg.author.is_bot {
            return Ok(false);
        }
        if let Some(args) = msg.text.strip_prefix("[bind]") {
            let Ok(room) = args.trim().parse::<i64>() else {
                return Ok(true);
            };
            self.store.bind_channel(msg.channel, RoomId(room)).await?;
            self.rest
                .create_message(msg.channel, &format!("Bound channel to room {room}"))
                .await?;
            return Ok(true);
        }
        if msg.text.trim() == "[unbind]" {
            let existed = self.store.unbind_channel(msg.channel).await?;
            let reply = if existed {
                "Channel unbound"
            } else {
                "No binding found for this channel"
            };
            self.rest.create_message(msg.channel, reply).await?;
            return Ok(true);
        }
        Ok(false)
    }
}

async fn next_payload<S>(stream: &mut S) -> Result<Value>
where
    S: StreamExt<Item = std::result::Result<Message, tokio_tungstenite::tungstenite::Error>>
        + Unpin,
{
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => return Ok(serde_json::from_str(&text)?),
            Some(Ok(Message::Close(_))) | None => return Err(Error::Closed),
            Some(Ok(_)) => continue,
            Some(Err(err)) => return Err(Error::Connection(err.to_string())),
        }
    }
}

fn identify(token: &str) -> Value {
    json!({
        "op": 2,
        "d": {
            "token": token,
            "intents": INTENTS,
            "properties": { "os": "linux", "browser": "cdb", "device": "cdb" },
        }
    })
}

/// Decode a MESSAGE_CREATE / MESSAGE_UPDATE payload. `None` when the payload
/// has no author (partial updates).
fn parse_message(data: &Value) -> Option<LocalMessage> {
    let id = snowflake(&data["id"])?;
    let channel = snowflake(&data["channel_id"])?;
    let author = data.get("author")?;
    let author_id = snowflake(&author["id"])?;

    let username = author["username"].as_str().unwrap_or("unknown");
    let display_name = data["member"]["nick"]
        .as_str()
        .or_else(|| author["global_name"].as_str())
        .unwrap_or(username)
        .to_string();

    let attachments = data["attachments"]
        .as_array()
        .map(|list| list.iter().filter_map(parse_attachment).collect())
        .unwrap_or_default();

    Some(LocalMessage {
        id: LocalMessageId(id),
        channel: ChannelId(channel),
        author: LocalAuthor {
            id: LocalUserId(author_id),
            display_name,
            avatar_url: avatar_url(author_id, author["avatar"].as_str()),
            is_bot: author["bot"].as_bool().unwrap_or(false),
        },
        text: data["content"].as_str().unwrap_or_default().to_string(),
        attachments,
    })
}

fn parse_attachment(data: &Value) -> Option<LocalAttachment> {
    Some(LocalAttachment {
        url: data["url"].as_str()?.to_string(),
        filename: data["filename"].as_str()?.to_string(),
        size: data["size"].as_u64().unwrap_or(0),
        content_type: data["content_type"].as_str().map(str::to_string),
    })
}

fn avatar_url(user: i64, avatar_hash: Option<&str>) -> String {
    match avatar_hash {
        Some(hash) => format!("https://cdn.discordapp.com/avatars/{user}/{hash}.webp"),
        None => format!(
            "https://cdn.discordapp.com/embed/avatars/{}.png",
            (user >> 22) % 6
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_create() -> Value {
        json!({
            "id": "111222333444555666",
            "channel_id": "777888999000111222",
            "content": "hello over there",
            "author": {
                "id": "333444555666777888",
                "username": "someone",
                "global_name": "Someone Nice",
                "avatar": "a1b2c3",
                "bot": false,
            },
            "member": { "nick": "Nick" },
            "attachments": [{
                "url": "https://cdn.discordapp.com/attachments/1/2/pic.png?ex=1",
                "filename": "pic.png",
                "size": 2048,
                "content_type": "image/png",
            }],
        })
    }

    #[test]
    fn parses_a_full_message_create_payload() {
        let msg = parse_message(&sample_create()).unwrap();
        assert_eq!(msg.id, LocalMessageId(111222333444555666));
        assert_eq!(msg.channel, ChannelId(777888999000111222));
        assert_eq!(msg.text, "hello over there");
        assert!(!msg.author.is_bot);
        assert_eq!(msg.attachments.len(), 1);
        assert_eq!(msg.attachments[0].filename, "pic.png");
        assert_eq!(msg.attachments[0].size, 2048);
    }

    #[test]
    fn display_name_prefers_nick_then_global_name_then_username() {
        let mut payload = sample_create();
        assert_eq!(parse_message(&payload).unwrap().author.display_name, "Nick");

        payload["member"] = Value::Null;
        assert_eq!(
            parse_message(&payload).unwrap().author.display_name,
            "Someone Nice"
        );

        payload["author"]["global_name"] = Value::Null;
        assert_eq!(parse_message(&payload).unwrap().author.display_name, "someone");
    }

    #[test]
    fn avatar_url_falls_back_to_a_default_embed_avatar() {
        let with_hash = avatar_url(42, Some("deadbeef"));
        assert_eq!(with_hash, "https://cdn.discordapp.com/avatars/42/deadbeef.webp");

        let without = avatar_url(123 << 22, None);
        assert!(without.starts_with("https://cdn.discordapp.com/embed/avatars/"));
        assert!(without.ends_with(".png"));
    }

    #[test]
    fn authorless_payload_is_skipped() {
        let mut payload = sample_create();
        payload.as_object_mut().unwrap().remove("author");
        assert!(parse_message(&payload).is_none());
    }

    #[test]
    fn identify_payload_carries_message_intents() {
        let payload = identify("tok");
        assert_eq!(payload["op"], 2);
        assert_eq!(payload["d"]["token"], "tok");
        assert_eq!(payload["d"]["intents"], 33281);
    }
}
