//! Live websocket half of the ContentAPI adapter.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use cdb_core::domain::RemoteUserId;
use cdb_core::ports::{FrameReader, FrameWriter, StreamClient};
use cdb_core::{Error, Result};

use crate::{external, ContentApiClient};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct SocketReader {
    stream: SplitStream<WsStream>,
}

#[async_trait]
impl FrameReader for SocketReader {
    async fn read(&mut self) -> Result<String> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(text),
                // Control frames are handled by the library; anything else
                // non-text on this endpoint is noise.
                Some(Ok(Message::Close(_))) | None => return Err(Error::Closed),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(map_ws_error(e)),
            }
        }
    }
}

struct SocketWriter {
    sink: SplitSink<WsStream, Message>,
}

#[async_trait]
impl FrameWriter for SocketWriter {
    async fn write(&mut self, text: &str) -> Result<()> {
        self.sink
            .send(Message::Text(text.to_string()))
            .await
            .map_err(map_ws_error)
    }
}

#[async_trait]
impl StreamClient for ContentApiClient {
    async fn connect(&self) -> Result<(Box<dyn FrameReader>, Box<dyn FrameWriter>)> {
        let (ws, _response) = connect_async(self.live_route())
            .await
            .map_err(|e| Error::Connection(format!("live connect failed: {e}")))?;

        let (sink, stream) = ws.split();
        Ok((
            Box::new(SocketReader { stream }),
            Box::new(SocketWriter { sink }),
        ))
    }

    async fn self_id(&self) -> Result<RemoteUserId> {
        let data: serde_json::Value = self
            .http
            .get(format!("{}/User/me", self.api_route()))
            .bearer_auth(&self.token)
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
            .map(RemoteUserId)
            .ok_or_else(|| Error::External("User/me response carried no id".into()))
    }
}

fn map_ws_error(e: tungstenite::Error) -> Error {
    match e {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => Error::Closed,
        other => Error::Connection(other.to_string()),
    }
}
