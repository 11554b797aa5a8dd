//! Discord adapter: REST client, webhook relay, media caches and the
//! gateway reader that feeds local messages into the outbound relay.

mod cache;
mod gateway;
mod relay;
mod rest;

pub use cache::{AttachmentCache, AvatarCache};
pub use gateway::{DiscordGateway, GatewayConfig};
pub use relay::WebhookRelay;
pub use rest::DiscordRest;
