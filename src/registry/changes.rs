//! Registry change feed
//!
//! Keeps the supervisor consistent with externally-edited configuration
//! without polling: a websocket subscription to the registry's realtime
//! channel delivers row inserts (filtered server-side to pulled sources)
//! and row deletes. Decoding happens once here; downstream consumers only
//! ever see `ChangeEvent` values.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{info, trace, warn};

use crate::config::IngestConfig;
use crate::error::Result;

use super::model::{ChangeEvent, RemovedSource, SourceDescriptor};

const TOPIC: &str = "realtime:public:streams";
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Websocket subscription to stream configuration changes.
pub struct ChangeFeed {
    url: String,
}

impl ChangeFeed {
    pub fn new(config: &IngestConfig) -> Self {
        let base = config.registry_url.trim_end_matches('/');
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            base.to_string()
        };

        Self {
            url: format!(
                "{}/realtime/v1/websocket?apikey={}&vsn=1.0.0",
                ws_base, config.registry_key
            ),
        }
    }

    /// Connect in the background and stream decoded events.
    ///
    /// The feed reconnects on failure until the handle is closed or the
    /// receiver is dropped.
    pub fn spawn(self) -> (mpsc::Receiver<ChangeEvent>, ChangeFeedHandle) {
        let (tx, rx) = mpsc::channel(64);

        let task = tokio::spawn(async move {
            loop {
                match self.run(&tx).await {
                    Ok(()) => {
                        info!("change feed consumer gone, closing subscription");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "change feed disconnected, reconnecting");
                    }
                }
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        });

        (rx, ChangeFeedHandle { task })
    }

    async fn run(&self, tx: &mpsc::Sender<ChangeEvent>) -> Result<()> {
        let (ws, _) = connect_async(self.url.as_str()).await?;
        let (mut sink, mut stream) = ws.split();

        sink.send(Message::Text(join_frame())).await?;
        info!("subscribed to registry change feed");

        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut seq: u64 = 2;

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    sink.send(Message::Text(heartbeat_frame(seq))).await?;
                    seq += 1;
                }
                msg = stream.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(event) = decode_frame(&text) {
                            if tx.send(event).await.is_err() {
                                return Ok(());
                            }
                        } else {
                            trace!("ignoring feed frame");
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        sink.send(Message::Pong(payload)).await?;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        return Err(
                            tokio_tungstenite::tungstenite::Error::ConnectionClosed.into(),
                        );
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                },
            }
        }
    }
}

/// Running change feed subscription.
pub struct ChangeFeedHandle {
    task: JoinHandle<()>,
}

impl ChangeFeedHandle {
    /// Release the subscription.
    pub fn close(self) {
        self.task.abort();
    }
}

fn join_frame() -> String {
    serde_json::json!({
        "topic": TOPIC,
        "event": "phx_join",
        "payload": {
            "config": {
                "postgres_changes": [
                    {
                        "event": "INSERT",
                        "schema": "public",
                        "table": "streams",
                        "filter": "input_type=eq.rtsp"
                    },
                    {
                        "event": "DELETE",
                        "schema": "public",
                        "table": "streams"
                    }
                ]
            }
        },
        "ref": "1"
    })
    .to_string()
}

fn heartbeat_frame(seq: u64) -> String {
    serde_json::json!({
        "topic": "phoenix",
        "event": "heartbeat",
        "payload": {},
        "ref": seq.to_string()
    })
    .to_string()
}

#[derive(Debug, Deserialize)]
struct FeedFrame {
    #[serde(default)]
    event: String,
    #[serde(default)]
    payload: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ChangeData {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    record: Option<SourceDescriptor>,
    #[serde(default)]
    old_record: Option<RemovedSource>,
}

/// Decode one feed frame into a change event.
///
/// Anything that is not a row change for us (join replies, heartbeat
/// acks, pushed sources we don't pull) decodes to `None`.
fn decode_frame(text: &str) -> Option<ChangeEvent> {
    let frame: FeedFrame = serde_json::from_str(text).ok()?;
    if frame.event != "postgres_changes" {
        return None;
    }

    let data: ChangeData = serde_json::from_value(frame.payload.get("data")?.clone()).ok()?;

    match data.kind.as_str() {
        "INSERT" => data
            .record
            .filter(|source| source.is_pulled())
            .map(ChangeEvent::SourceAdded),
        "DELETE" => data.old_record.map(ChangeEvent::SourceRemoved),
        _ => None,
    }
}
