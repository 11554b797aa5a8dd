//! Live connection manager for the ContentAPI event socket.
//!
//! Owns the persistent streaming session: connect, keepalive pings,
//! fixed-delay reconnect, and feeding decoded events into dispatch. One
//! frame is fully dispatched (all listeners awaited) before the next is
//! read, so a slow handler back-pressures the socket instead of queuing.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::decode;
use crate::dispatch::EventDispatch;
use crate::domain::RemoteUserId;
use crate::ports::{FrameReader, FrameWriter, StreamClient};
use crate::{Error, Result};

const PING_FRAME: &str = r#"{"type":"ping"}"#;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    BackingOff,
}

#[derive(Clone, Copy, Debug)]
pub struct LinkConfig {
    pub ping_interval: Duration,
    pub reconnect_delay: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(15),
        }
    }
}

/// The bridge's own ContentAPI user id, resolved once before the first
/// connect and immutable for the process lifetime. Shared with the inbound
/// relay for echo suppression.
#[derive(Default)]
pub struct SelfId(OnceLock<RemoteUserId>);

impl SelfId {
    pub fn get(&self) -> Option<RemoteUserId> {
        self.0.get().copied()
    }

    pub(crate) fn set(&self, id: RemoteUserId) {
        let _ = self.0.set(id);
    }
}

pub struct LiveLink {
    client: Arc<dyn StreamClient>,
    dispatch: Arc<EventDispatch>,
    self_id: Arc<SelfId>,
    cfg: LinkConfig,
    state: watch::Sender<LinkState>,
}

impl LiveLink {
    pub fn new(
        client: Arc<dyn StreamClient>,
        dispatch: Arc<EventDispatch>,
        self_id: Arc<SelfId>,
        cfg: LinkConfig,
    ) -> Self {
        let (state, _) = watch::channel(LinkState::Disconnected);
        Self {
            client,
            dispatch,
            self_id,
            cfg,
            state,
        }
    }

    /// Observe state transitions (`Disconnected → Connecting → Connected →
    /// BackingOff → Connecting …`).
    pub fn state(&self) -> watch::Receiver<LinkState> {
        self.state.subscribe()
    }

    /// Run until the token fires. Reconnects forever on faults; never
    /// returns an error once the initial identity lookup has succeeded.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let id = self.client.self_id().await?;
        self.self_id.set(id);
        info!(user = id.0, "resolved bridge identity");

        while !shutdown.is_cancelled() {
            self.set_state(LinkState::Connecting);
            match self.client.connect().await {
                Ok((mut reader, writer)) => {
                    self.set_state(LinkState::Connected);
                    info!("live connection established");

                    let keepalive = tokio::spawn(keepalive(writer, self.cfg.ping_interval));
                    let fault = self.read_loop(reader.as_mut(), &shutdown).await;
                    keepalive.abort();

                    match fault {
                        Ok(()) => break, // shutdown requested
                        Err(Error::Closed) => info!("live connection closed"),
                        Err(e) => warn!(error = %e, "live connection fault"),
                    }
                }
                Err(e) => warn!(error = %e, "live connect failed"),
            }

            self.set_state(LinkState::BackingOff);
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.cfg.reconnect_delay) => {}
            }
        }

        self.set_state(LinkState::Disconnected);
        Ok(())
    }

    async fn read_loop(
        &self,
        reader: &mut dyn FrameReader,
        shutdown: &CancellationToken,
    ) -> Result<()> {
        loop {
            let frame = tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                frame = reader.read() => frame?,
            };

            // A decode fault or a listener failure faults the whole
            // connection; the frame is lost and we reconnect.
            for event in decode::decode(&frame)? {
                self.dispatch.dispatch(&event).await?;
            }
        }
    }

    fn set_state(&self, state: LinkState) {
        self.state.send_replace(state);
    }
}

/// Writes a ping frame at a fixed interval; exits quietly once the
/// connection is gone.
async fn keepalive(mut writer: Box<dyn FrameWriter>, interval: Duration) {
    loop {
        tokio::time::sleep(interval).await;
        if writer.write(PING_FRAME).await.is_err() {
            break;
        }
    }
}
