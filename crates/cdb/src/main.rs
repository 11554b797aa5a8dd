use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use cdb_contentapi::ContentApiClient;
use cdb_core::config::Config;
use cdb_core::dispatch::EventDispatch;
use cdb_core::link::{LinkConfig, LiveLink, SelfId};
use cdb_core::relay::{InboundRelay, OutboundRelay, RelayContext};
use cdb_core::store::BridgeStore;
use cdb_discord::{AttachmentCache, AvatarCache, DiscordGateway, DiscordRest, GatewayConfig, WebhookRelay};
use cdb_markup::MarkupClient;

#[tokio::main]
async fn main() -> Result<(), cdb_core::Error> {
    cdb_core::logging::init("cdb")?;

    let cfg = Config::load()?;
    let store = BridgeStore::open(&cfg.db_url()).await?;

    let contentapi = Arc::new(ContentApiClient::new(
        cfg.contentapi_domain.clone(),
        cfg.contentapi_token.clone(),
        cfg.avatar_size,
    ));
    let markup = Arc::new(MarkupClient::new(cfg.markup_service_domain.clone()));
    let rest = Arc::new(DiscordRest::new(cfg.discord_token.clone()));
    let self_id = Arc::new(SelfId::default());

    let ctx = Arc::new(RelayContext {
        store: store.clone(),
        remote: contentapi.clone(),
        relay: Arc::new(WebhookRelay::new(rest.clone(), store.clone())),
        markup,
        avatars: Arc::new(AvatarCache::new(
            store.clone(),
            contentapi.clone(),
            rest.clone(),
        )),
        attachments: Arc::new(AttachmentCache::new(
            store.clone(),
            contentapi.clone(),
            rest.clone(),
            cfg.attachment_size_limit,
        )),
        self_id: self_id.clone(),
    });

    let inbound = Arc::new(InboundRelay::new(ctx.clone()));
    let mut dispatch = EventDispatch::new();
    dispatch.on_created(inbound.clone());
    dispatch.on_updated(inbound.clone());
    dispatch.on_deleted(inbound);

    let link = LiveLink::new(
        contentapi,
        Arc::new(dispatch),
        self_id,
        LinkConfig {
            ping_interval: cfg.ping_interval,
            reconnect_delay: cfg.reconnect_delay,
        },
    );

    let gateway = DiscordGateway::new(
        cfg.discord_token.clone(),
        Arc::new(OutboundRelay::new(ctx)),
        store,
        rest,
        GatewayConfig {
            reconnect_delay: cfg.reconnect_delay,
        },
    );

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            signal_token.cancel();
        }
    });

    info!("bridge starting");
    // Both sides run until shutdown; the first one to fail takes the
    // process down so a supervisor can restart it cleanly.
    let result = tokio::select! {
        r = link.run(shutdown.clone()) => r,
        r = gateway.run(shutdown.clone()) => r,
    };
    shutdown.cancel();

    match result {
        Ok(()) => {
            info!("bridge stopped");
            Ok(())
        }
        Err(err) => {
            error!(error = %err, "bridge task failed");
            Err(err)
        }
    }
}
