//! Relay orchestrator: the two symmetric halves of the bridge.
//!
//! Outbound (Discord → ContentAPI) is driven by gateway callbacks; inbound
//! (ContentAPI → Discord) is a set of listeners on the live dispatch. Both
//! consult the cross-reference store before acting: lookup misses are a
//! defined "nothing to do", and a mapping row is only ever written after the
//! external call it describes has succeeded.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::dispatch::MessageListener;
use crate::domain::{ChannelId, LocalMessageId};
use crate::events::{LocalMessage, MessageEvent, RemoteUser};
use crate::link::SelfId;
use crate::ports::{AttachmentResolver, AvatarResolver, MarkupTranslator, RelayPort, RemoteWriter};
use crate::store::{BridgeStore, MessagePair, RelayPair};
use crate::{Result, BRIDGE_MARKUP};

/// Everything both relay halves need, wired once at startup.
pub struct RelayContext {
    pub store: BridgeStore,
    pub remote: Arc<dyn RemoteWriter>,
    pub relay: Arc<dyn RelayPort>,
    pub markup: Arc<dyn MarkupTranslator>,
    pub avatars: Arc<dyn AvatarResolver>,
    pub attachments: Arc<dyn AttachmentResolver>,
    pub self_id: Arc<SelfId>,
}

/// Discord → ContentAPI.
pub struct OutboundRelay {
    ctx: Arc<RelayContext>,
}

impl OutboundRelay {
    pub fn new(ctx: Arc<RelayContext>) -> Self {
        Self { ctx }
    }

    /// Mirror a newly created Discord message into the bound room, if any.
    pub async fn message_created(&self, msg: &LocalMessage) -> Result<()> {
        if msg.author.is_bot {
            return Ok(());
        }
        // Cheap precheck so unbridged channels never trigger avatar or
        // attachment uploads.
        if self.ctx.store.room_for_channel(msg.channel).await?.is_none() {
            return Ok(());
        }

        let avatar = self.ctx.avatars.resolve(&msg.author).await?;
        let content = self.render_outbound(msg).await?;

        let mut tx = self.ctx.store.begin().await?;
        let Some(room) = tx.room_for_channel(msg.channel).await? else {
            return Ok(());
        };
        let remote = self
            .ctx
            .remote
            .post_message(room, &content, &msg.author.display_name, &avatar, BRIDGE_MARKUP)
            .await?;
        tx.insert_message_pair(MessagePair {
            local: msg.id,
            remote,
            room,
        })
        .await?;
        tx.commit().await?;

        debug!(local = msg.id.0, remote = remote.0, room = room.0, "relayed message out");
        Ok(())
    }

    /// Propagate an edit. A message that was never relayed (it predates the
    /// binding, say) is a no-op.
    pub async fn message_updated(&self, msg: &LocalMessage) -> Result<()> {
        if msg.author.is_bot {
            return Ok(());
        }
        let Some(pair) = self.ctx.store.message_pair(msg.id).await? else {
            return Ok(());
        };

        let avatar = self.ctx.avatars.resolve(&msg.author).await?;
        let content = self.render_outbound(msg).await?;

        self.ctx
            .remote
            .edit_message(
                pair.remote,
                pair.room,
                &content,
                &msg.author.display_name,
                &avatar,
                BRIDGE_MARKUP,
            )
            .await
    }

    /// Propagate a deletion and drop the mapping.
    pub async fn message_deleted(&self, id: LocalMessageId) -> Result<()> {
        let mut tx = self.ctx.store.begin().await?;
        let Some(pair) = tx.message_pair(id).await? else {
            return Ok(());
        };
        self.ctx.remote.delete_message(pair.remote).await?;
        tx.delete_message_pair(id).await?;
        tx.commit().await
    }

    /// Translated text plus one `!<url>` line per attachment.
    async fn render_outbound(&self, msg: &LocalMessage) -> Result<String> {
        let mut content = self.ctx.markup.to_remote(&msg.text).await?;

        for attachment in &msg.attachments {
            let url = self.ctx.attachments.resolve(attachment).await?;
            let line = if attachment.is_spoiler() {
                format!("{{#spoiler !{url}}}")
            } else {
                format!("!{url}")
            };
            // Newline only when there is something before it, so a
            // text-less upload doesn't start with a blank line.
            if !content.is_empty() {
                content.push('\n');
            }
            content.push_str(&line);
        }

        Ok(content)
    }
}

/// ContentAPI → Discord, driven by the live dispatch.
pub struct InboundRelay {
    ctx: Arc<RelayContext>,
}

impl InboundRelay {
    pub fn new(ctx: Arc<RelayContext>) -> Self {
        Self { ctx }
    }

    /// Echo suppression: events without an actor are system noise, and
    /// events from the bridge's own user are our outbound posts coming back.
    fn actor<'a>(&self, event: &'a MessageEvent) -> Option<&'a RemoteUser> {
        let user = event.user.as_ref()?;
        if self.ctx.self_id.get() == Some(user.id) {
            return None;
        }
        Some(user)
    }
}

#[async_trait]
impl MessageListener for InboundRelay {
    async fn on_created(&self, event: &MessageEvent) -> Result<()> {
        let Some(user) = self.actor(event) else {
            return Ok(());
        };

        // Fan-out is best-effort per channel; one failure is logged and the
        // remaining channels still get their copy.
        let channels = self.ctx.store.channels_for_room(event.room).await?;
        let avatar_url = self.ctx.remote.avatar_url(&user.avatar);
        for channel in channels {
            if let Err(e) = self.relay_created(channel, event, user, &avatar_url).await {
                warn!(
                    channel = channel.0,
                    message = event.message.id.0,
                    room = event.room.0,
                    error = %e,
                    "inbound relay failed"
                );
            }
        }
        Ok(())
    }

    async fn on_updated(&self, event: &MessageEvent) -> Result<()> {
        if self.actor(event).is_none() {
            return Ok(());
        }

        for pair in self
            .ctx
            .store
            .relay_pairs_for_remote(event.message.id)
            .await?
        {
            if let Err(e) = self.relay_updated(&pair, event).await {
                warn!(
                    channel = pair.channel.0,
                    message = event.message.id.0,
                    error = %e,
                    "inbound edit failed"
                );
            }
        }
        Ok(())
    }

    async fn on_deleted(&self, event: &MessageEvent) -> Result<()> {
        if self.actor(event).is_none() {
            return Ok(());
        }

        for pair in self
            .ctx
            .store
            .relay_pairs_for_remote(event.message.id)
            .await?
        {
            if let Err(e) = self.relay_deleted(&pair).await {
                warn!(
                    channel = pair.channel.0,
                    message = event.message.id.0,
                    error = %e,
                    "inbound delete failed"
                );
            }
        }
        Ok(())
    }
}

impl InboundRelay {
    async fn relay_created(
        &self,
        channel: ChannelId,
        event: &MessageEvent,
        user: &RemoteUser,
        avatar_url: &str,
    ) -> Result<()> {
        let text = self
            .ctx
            .markup
            .to_local(&event.message.text, &event.message.markup)
            .await?;
        let local = self
            .ctx
            .relay
            .post(channel, &text, &user.name, avatar_url)
            .await?;

        let mut tx = self.ctx.store.begin().await?;
        tx.insert_relay_pair(RelayPair {
            local,
            channel,
            remote: event.message.id,
        })
        .await?;
        tx.commit().await
    }

    async fn relay_updated(&self, pair: &RelayPair, event: &MessageEvent) -> Result<()> {
        let text = self
            .ctx
            .markup
            .to_local(&event.message.text, &event.message.markup)
            .await?;
        self.ctx.relay.edit(pair.channel, pair.local, &text).await
    }

    async fn relay_deleted(&self, pair: &RelayPair) -> Result<()> {
        self.ctx.relay.delete(pair.channel, pair.local).await?;
        let mut tx = self.ctx.store.begin().await?;
        tx.delete_relay_pair(pair.local).await?;
        tx.commit().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{LocalUserId, RemoteMessageId, RemoteUserId, RoomId};
    use crate::events::{EventKind, LocalAttachment, LocalAuthor, RemoteMessage};
    use crate::Error;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeRemote {
        next_id: AtomicI64,
        posts: Mutex<Vec<(RoomId, String, String, String)>>,
        edits: Mutex<Vec<(RemoteMessageId, String)>>,
        deletes: Mutex<Vec<RemoteMessageId>>,
        fail_posts: bool,
    }

    #[async_trait]
    impl RemoteWriter for FakeRemote {
        async fn post_message(
            &self,
            room: RoomId,
            text: &str,
            author: &str,
            avatar: &str,
            _markup: &str,
        ) -> Result<RemoteMessageId> {
            if self.fail_posts {
                return Err(Error::External("post refused".into()));
            }
            self.posts.lock().unwrap().push((
                room,
                text.to_string(),
                author.to_string(),
                avatar.to_string(),
            ));
            Ok(RemoteMessageId(9000 + self.next_id.fetch_add(1, Ordering::SeqCst)))
        }

        async fn edit_message(
            &self,
            id: RemoteMessageId,
            _room: RoomId,
            text: &str,
            _author: &str,
            _avatar: &str,
            _markup: &str,
        ) -> Result<()> {
            self.edits.lock().unwrap().push((id, text.to_string()));
            Ok(())
        }

        async fn delete_message(&self, id: RemoteMessageId) -> Result<()> {
            self.deletes.lock().unwrap().push(id);
            Ok(())
        }

        async fn upload_file(
            &self,
            _name: &str,
            _bytes: Vec<u8>,
            _bucket: Option<&str>,
        ) -> Result<String> {
            Ok("uploaded".into())
        }

        fn file_url(&self, hash: &str) -> String {
            format!("https://capi.test/api/File/raw/{hash}")
        }

        fn avatar_url(&self, hash: &str) -> String {
            format!("https://capi.test/api/File/raw/{hash}?size=100&crop=true")
        }
    }

    #[derive(Default)]
    struct FakeRelayPort {
        next_id: AtomicI64,
        posts: Mutex<Vec<(ChannelId, String, String, String)>>,
        edits: Mutex<Vec<(ChannelId, LocalMessageId, String)>>,
        deletes: Mutex<Vec<(ChannelId, LocalMessageId)>>,
        fail_channels: HashSet<i64>,
    }

    #[async_trait]
    impl RelayPort for FakeRelayPort {
        async fn post(
            &self,
            channel: ChannelId,
            text: &str,
            author: &str,
            avatar_url: &str,
        ) -> Result<LocalMessageId> {
            if self.fail_channels.contains(&channel.0) {
                return Err(Error::External("webhook refused".into()));
            }
            self.posts.lock().unwrap().push((
                channel,
                text.to_string(),
                author.to_string(),
                avatar_url.to_string(),
            ));
            Ok(LocalMessageId(1000 + self.next_id.fetch_add(1, Ordering::SeqCst)))
        }

        async fn edit(
            &self,
            channel: ChannelId,
            message: LocalMessageId,
            text: &str,
        ) -> Result<()> {
            self.edits
                .lock()
                .unwrap()
                .push((channel, message, text.to_string()));
            Ok(())
        }

        async fn delete(&self, channel: ChannelId, message: LocalMessageId) -> Result<()> {
            self.deletes.lock().unwrap().push((channel, message));
            Ok(())
        }
    }

    struct FakeMarkup;

    #[async_trait]
    impl MarkupTranslator for FakeMarkup {
        async fn to_remote(&self, text: &str) -> Result<String> {
            Ok(if text.is_empty() {
                String::new()
            } else {
                format!("R:{text}")
            })
        }

        async fn to_local(&self, text: &str, lang: &str) -> Result<String> {
            Ok(format!("L[{lang}]:{text}"))
        }
    }

    struct FakeAvatars;

    #[async_trait]
    impl AvatarResolver for FakeAvatars {
        async fn resolve(&self, _author: &LocalAuthor) -> Result<String> {
            Ok("avhash".into())
        }
    }

    struct FakeAttachments;

    #[async_trait]
    impl AttachmentResolver for FakeAttachments {
        async fn resolve(&self, attachment: &LocalAttachment) -> Result<String> {
            Ok(attachment.url.clone())
        }
    }

    struct Harness {
        ctx: Arc<RelayContext>,
        remote: Arc<FakeRemote>,
        relay: Arc<FakeRelayPort>,
    }

    async fn harness_with(remote: FakeRemote, relay: FakeRelayPort) -> Harness {
        let store = BridgeStore::open("sqlite::memory:").await.unwrap();
        let remote = Arc::new(remote);
        let relay = Arc::new(relay);
        let ctx = Arc::new(RelayContext {
            store,
            remote: remote.clone(),
            relay: relay.clone(),
            markup: Arc::new(FakeMarkup),
            avatars: Arc::new(FakeAvatars),
            attachments: Arc::new(FakeAttachments),
            self_id: Arc::new(SelfId::default()),
        });
        Harness { ctx, remote, relay }
    }

    async fn harness() -> Harness {
        harness_with(FakeRemote::default(), FakeRelayPort::default()).await
    }

    fn author() -> LocalAuthor {
        LocalAuthor {
            id: LocalUserId(5),
            display_name: "alice".into(),
            avatar_url: "https://cdn.test/a.png".into(),
            is_bot: false,
        }
    }

    fn local_message(id: i64, channel: i64, text: &str) -> LocalMessage {
        LocalMessage {
            id: LocalMessageId(id),
            channel: ChannelId(channel),
            author: author(),
            text: text.into(),
            attachments: Vec::new(),
        }
    }

    fn inbound_event(kind: EventKind, user: Option<RemoteUser>) -> MessageEvent {
        MessageEvent {
            message: RemoteMessage {
                id: RemoteMessageId(500),
                text: "hello".into(),
                markup: "12y".into(),
            },
            kind,
            user,
            room: RoomId(7),
        }
    }

    fn remote_user(id: i64) -> RemoteUser {
        RemoteUser {
            id: RemoteUserId(id),
            name: "remote".into(),
            avatar: "av".into(),
        }
    }

    #[tokio::test]
    async fn outbound_created_posts_and_persists_mapping() {
        let h = harness().await;
        h.ctx.store.bind_channel(ChannelId(10), RoomId(7)).await.unwrap();

        let outbound = OutboundRelay::new(h.ctx.clone());
        outbound
            .message_created(&local_message(1, 10, "hi"))
            .await
            .unwrap();

        let posts = h.remote.posts.lock().unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].0, RoomId(7));
        assert_eq!(posts[0].1, "R:hi");
        assert_eq!(posts[0].2, "alice");
        assert_eq!(posts[0].3, "avhash");
        drop(posts);

        let pair = h.ctx.store.message_pair(LocalMessageId(1)).await.unwrap();
        assert_eq!(pair.unwrap().room, RoomId(7));
    }

    #[tokio::test]
    async fn outbound_created_ignores_unbound_channels_and_bots() {
        let h = harness().await;
        let outbound = OutboundRelay::new(h.ctx.clone());

        outbound
            .message_created(&local_message(1, 99, "hi"))
            .await
            .unwrap();

        h.ctx.store.bind_channel(ChannelId(10), RoomId(7)).await.unwrap();
        let mut msg = local_message(2, 10, "hi");
        msg.author.is_bot = true;
        outbound.message_created(&msg).await.unwrap();

        assert!(h.remote.posts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn outbound_created_failure_leaves_no_mapping() {
        let h = harness_with(
            FakeRemote {
                fail_posts: true,
                ..Default::default()
            },
            FakeRelayPort::default(),
        )
        .await;
        h.ctx.store.bind_channel(ChannelId(10), RoomId(7)).await.unwrap();

        let outbound = OutboundRelay::new(h.ctx.clone());
        let result = outbound.message_created(&local_message(1, 10, "hi")).await;

        assert!(result.is_err());
        assert!(h.ctx.store.message_pair(LocalMessageId(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn outbound_attachments_append_url_lines() {
        let h = harness().await;
        h.ctx.store.bind_channel(ChannelId(10), RoomId(7)).await.unwrap();

        let mut msg = local_message(1, 10, "look");
        msg.attachments = vec![
            LocalAttachment {
                url: "https://cdn.test/cat.png".into(),
                filename: "cat.png".into(),
                size: 100,
                content_type: Some("image/png".into()),
            },
            LocalAttachment {
                url: "https://cdn.test/secret.png".into(),
                filename: "SPOILER_secret.png".into(),
                size: 100,
                content_type: Some("image/png".into()),
            },
        ];

        OutboundRelay::new(h.ctx.clone())
            .message_created(&msg)
            .await
            .unwrap();

        let posts = h.remote.posts.lock().unwrap();
        assert_eq!(
            posts[0].1,
            "R:look\n!https://cdn.test/cat.png\n{#spoiler !https://cdn.test/secret.png}"
        );
    }

    #[tokio::test]
    async fn outbound_attachment_only_message_has_no_leading_newline() {
        let h = harness().await;
        h.ctx.store.bind_channel(ChannelId(10), RoomId(7)).await.unwrap();

        let mut msg = local_message(1, 10, "");
        msg.attachments = vec![LocalAttachment {
            url: "https://cdn.test/cat.png".into(),
            filename: "cat.png".into(),
            size: 100,
            content_type: Some("image/png".into()),
        }];

        OutboundRelay::new(h.ctx.clone())
            .message_created(&msg)
            .await
            .unwrap();

        assert_eq!(h.remote.posts.lock().unwrap()[0].1, "!https://cdn.test/cat.png");
    }

    #[tokio::test]
    async fn outbound_updated_without_mapping_is_a_repeatable_no_op() {
        let h = harness().await;
        let outbound = OutboundRelay::new(h.ctx.clone());
        let msg = local_message(1, 10, "edited");

        outbound.message_updated(&msg).await.unwrap();
        outbound.message_updated(&msg).await.unwrap();

        assert!(h.remote.edits.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn outbound_updated_edits_the_paired_remote_message() {
        let h = harness().await;
        h.ctx.store.bind_channel(ChannelId(10), RoomId(7)).await.unwrap();
        let outbound = OutboundRelay::new(h.ctx.clone());

        outbound.message_created(&local_message(1, 10, "hi")).await.unwrap();
        let pair = h.ctx.store.message_pair(LocalMessageId(1)).await.unwrap().unwrap();

        outbound.message_updated(&local_message(1, 10, "hi again")).await.unwrap();

        let edits = h.remote.edits.lock().unwrap();
        assert_eq!(edits.len(), 1);
        assert_eq!(edits[0].0, pair.remote);
        assert_eq!(edits[0].1, "R:hi again");
    }

    #[tokio::test]
    async fn outbound_deleted_removes_remote_and_mapping() {
        let h = harness().await;
        h.ctx.store.bind_channel(ChannelId(10), RoomId(7)).await.unwrap();
        let outbound = OutboundRelay::new(h.ctx.clone());

        outbound.message_created(&local_message(1, 10, "hi")).await.unwrap();
        let pair = h.ctx.store.message_pair(LocalMessageId(1)).await.unwrap().unwrap();

        outbound.message_deleted(LocalMessageId(1)).await.unwrap();

        assert_eq!(*h.remote.deletes.lock().unwrap(), vec![pair.remote]);
        assert!(h.ctx.store.message_pair(LocalMessageId(1)).await.unwrap().is_none());

        // Deleting again is a no-op, not an error.
        outbound.message_deleted(LocalMessageId(1)).await.unwrap();
        assert_eq!(h.remote.deletes.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn inbound_created_fans_out_to_every_bound_channel() {
        let h = harness().await;
        for channel in [11, 12, 13] {
            h.ctx.store.bind_channel(ChannelId(channel), RoomId(7)).await.unwrap();
        }

        let inbound = InboundRelay::new(h.ctx.clone());
        inbound
            .on_created(&inbound_event(EventKind::Created, Some(remote_user(9))))
            .await
            .unwrap();

        let posts = h.relay.posts.lock().unwrap();
        assert_eq!(posts.len(), 3);
        assert!(posts.iter().all(|p| p.1 == "L[12y]:hello" && p.2 == "remote"));
        drop(posts);

        let pairs = h.ctx.store.relay_pairs_for_remote(RemoteMessageId(500)).await.unwrap();
        assert_eq!(pairs.len(), 3);
        let mut locals: Vec<i64> = pairs.iter().map(|p| p.local.0).collect();
        locals.sort_unstable();
        locals.dedup();
        assert_eq!(locals.len(), 3);
    }

    #[tokio::test]
    async fn inbound_created_suppresses_echoes_of_our_own_posts() {
        let h = harness().await;
        h.ctx.store.bind_channel(ChannelId(11), RoomId(7)).await.unwrap();
        h.ctx.self_id.set(RemoteUserId(9));

        let inbound = InboundRelay::new(h.ctx.clone());
        inbound
            .on_created(&inbound_event(EventKind::Created, Some(remote_user(9))))
            .await
            .unwrap();

        assert!(h.relay.posts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn inbound_created_ignores_actorless_events() {
        let h = harness().await;
        h.ctx.store.bind_channel(ChannelId(11), RoomId(7)).await.unwrap();

        let inbound = InboundRelay::new(h.ctx.clone());
        inbound
            .on_created(&inbound_event(EventKind::Created, None))
            .await
            .unwrap();

        assert!(h.relay.posts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn inbound_one_failing_channel_does_not_block_the_rest() {
        let h = harness_with(
            FakeRemote::default(),
            FakeRelayPort {
                fail_channels: HashSet::from([12]),
                ..Default::default()
            },
        )
        .await;
        for channel in [11, 12, 13] {
            h.ctx.store.bind_channel(ChannelId(channel), RoomId(7)).await.unwrap();
        }

        let inbound = InboundRelay::new(h.ctx.clone());
        inbound
            .on_created(&inbound_event(EventKind::Created, Some(remote_user(9))))
            .await
            .unwrap();

        assert_eq!(h.relay.posts.lock().unwrap().len(), 2);
        let pairs = h.ctx.store.relay_pairs_for_remote(RemoteMessageId(500)).await.unwrap();
        assert_eq!(pairs.len(), 2);
        assert!(pairs.iter().all(|p| p.channel != ChannelId(12)));
    }

    #[tokio::test]
    async fn inbound_updated_edits_every_relay_copy() {
        let h = harness().await;
        for channel in [11, 12] {
            h.ctx.store.bind_channel(ChannelId(channel), RoomId(7)).await.unwrap();
        }
        let inbound = InboundRelay::new(h.ctx.clone());
        inbound
            .on_created(&inbound_event(EventKind::Created, Some(remote_user(9))))
            .await
            .unwrap();

        let mut event = inbound_event(EventKind::Updated, Some(remote_user(9)));
        event.message.text = "hello again".into();
        inbound.on_updated(&event).await.unwrap();

        let edits = h.relay.edits.lock().unwrap();
        assert_eq!(edits.len(), 2);
        assert!(edits.iter().all(|e| e.2 == "L[12y]:hello again"));
    }

    #[tokio::test]
    async fn inbound_updated_with_no_copies_is_a_no_op() {
        let h = harness().await;
        let inbound = InboundRelay::new(h.ctx.clone());

        inbound
            .on_updated(&inbound_event(EventKind::Updated, Some(remote_user(9))))
            .await
            .unwrap();

        assert!(h.relay.edits.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn inbound_deleted_removes_copies_and_rows() {
        let h = harness().await;
        for channel in [11, 12] {
            h.ctx.store.bind_channel(ChannelId(channel), RoomId(7)).await.unwrap();
        }
        let inbound = InboundRelay::new(h.ctx.clone());
        inbound
            .on_created(&inbound_event(EventKind::Created, Some(remote_user(9))))
            .await
            .unwrap();

        inbound
            .on_deleted(&inbound_event(EventKind::Deleted, Some(remote_user(9))))
            .await
            .unwrap();

        assert_eq!(h.relay.deletes.lock().unwrap().len(), 2);
        assert!(h
            .ctx
            .store
            .relay_pairs_for_remote(RemoteMessageId(500))
            .await
            .unwrap()
            .is_empty());
    }
}
