// WebSocket transport for the live channel.
//
// Speaks the Socket.IO handshake directly over tokio-tungstenite: answer the
// Engine.IO open with a namespace connect, hold outbound room commands until
// the namespace is acknowledged, answer pings, decode events.

use std::fmt::Display;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use tourney_core::config::ApiConfig;

use super::codec::{Outbound, Packet};
use super::{ClientCommand, LiveError, LiveEvent, PushConnection, PushConnector};

/// Engine.IO defaults (25s ping interval + 20s ping timeout) until the
/// server's handshake says otherwise.
const DEFAULT_LIVENESS: Duration = Duration::from_millis(45_000);

/// `http://host:3000/` -> `ws://host:3000/socket.io/?EIO=4&transport=websocket`.
pub fn socket_url(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };
    format!("{base}/socket.io/?EIO=4&transport=websocket")
}

pub struct WebSocketConnector {
    url: String,
    bypass_header: String,
}

impl WebSocketConnector {
    pub fn new(config: &ApiConfig) -> Self {
        Self {
            url: socket_url(&config.base_url),
            bypass_header: config.bypass_header.clone(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl PushConnector for WebSocketConnector {
    async fn connect(&self) -> Result<PushConnection, LiveError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| LiveError::Connect(e.to_string()))?;
        let header = HeaderName::from_bytes(self.bypass_header.as_bytes())
            .map_err(|e| LiveError::Connect(e.to_string()))?;
        request
            .headers_mut()
            .insert(header, HeaderValue::from_static("true"));

        let (stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| LiveError::Connect(e.to_string()))?;
        info!("WebSocket connected to {}", self.url);

        let (write, read) = stream.split();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            if let Err(e) = pump(read, write, out_rx, in_tx).await {
                warn!("WebSocket session ended with error: {}", e);
            }
        });

        Ok(PushConnection {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

async fn send_frame<Si, E>(write: &mut Si, frame: Outbound) -> Result<(), LiveError>
where
    Si: Sink<Message, Error = E> + Unpin,
    E: Display,
{
    write
        .send(Message::Text(frame.encode().into()))
        .await
        .map_err(|e| LiveError::Protocol(e.to_string()))
}

fn liveness_from_handshake(open: &serde_json::Value) -> Duration {
    let interval = open.get("pingInterval").and_then(|v| v.as_u64());
    let timeout = open.get("pingTimeout").and_then(|v| v.as_u64());
    match (interval, timeout) {
        (Some(i), Some(t)) => Duration::from_millis(i + t),
        _ => DEFAULT_LIVENESS,
    }
}

/// Drive one Socket.IO session over a split WebSocket.
///
/// Returns `Ok(())` when either side closes cleanly (server close, command
/// sender dropped, event receiver dropped). Generic over the stream and
/// sink so it can be exercised without a socket.
pub async fn pump<St, Si, E>(
    mut read: St,
    mut write: Si,
    mut commands: mpsc::UnboundedReceiver<ClientCommand>,
    events: mpsc::UnboundedSender<LiveEvent>,
) -> Result<(), LiveError>
where
    St: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    Si: Sink<Message, Error = E> + Unpin,
    E: Display,
{
    let mut namespace_ready = false;
    let mut queued: Vec<ClientCommand> = Vec::new();
    let mut liveness = DEFAULT_LIVENESS;
    let mut deadline = Instant::now() + liveness;

    loop {
        tokio::select! {
            biased;

            command = commands.recv() => match command {
                Some(command) if namespace_ready => {
                    send_frame(&mut write, command.to_frame()).await?;
                }
                Some(command) => queued.push(command),
                None => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
            },

            frame = read.next() => {
                deadline = Instant::now() + liveness;
                let text = match frame {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => {
                        info!("WebSocket closed by server");
                        return Ok(());
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return Err(LiveError::Protocol(e.to_string())),
                };

                match Packet::decode(text.as_str()) {
                    Ok(Packet::Open(handshake)) => {
                        liveness = liveness_from_handshake(&handshake);
                        deadline = Instant::now() + liveness;
                        send_frame(&mut write, Outbound::Connect).await?;
                    }
                    Ok(Packet::Ping) => send_frame(&mut write, Outbound::Pong).await?,
                    Ok(Packet::Connect(_)) => {
                        debug!("Socket.IO namespace connected");
                        namespace_ready = true;
                        for command in queued.drain(..) {
                            send_frame(&mut write, command.to_frame()).await?;
                        }
                    }
                    Ok(Packet::Event { name, payload, .. }) => {
                        match LiveEvent::decode(&name, payload) {
                            Ok(Some(event)) => {
                                if events.send(event).is_err() {
                                    return Ok(());
                                }
                            }
                            Ok(None) => debug!("Ignoring push event {}", name),
                            Err(e) => warn!("Dropping push event: {}", e),
                        }
                    }
                    Ok(Packet::ConnectError(reason)) => {
                        return Err(LiveError::Protocol(format!(
                            "namespace connect refused: {reason}"
                        )));
                    }
                    Ok(Packet::Disconnect | Packet::Close) => return Ok(()),
                    Ok(_) => {}
                    Err(e) => warn!("Ignoring undecodable frame: {}", e),
                }
            }

            _ = tokio::time::sleep_until(deadline) => {
                return Err(LiveError::Protocol("ping timeout".into()));
            }
        }
    }
}
