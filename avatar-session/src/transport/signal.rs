//! WebSocket signalling transport
//!
//! Joins the room's signalling channel and turns its track notifications into
//! [`RoomEvent`]s. Media negotiation happens elsewhere; this connector only
//! tracks which audio/video units the room has published to us.

use crate::error::SessionError;
use crate::transport::{
    MediaTrack, RemoteTrack, RoomConnection, RoomConnector, RoomEvent, RoomHandle, TrackKind,
    EVENT_BUFFER_SIZE,
};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_URL_LEN: usize = 2048;

/// Connector for the room signalling WebSocket
pub struct SignalConnector {
    connect_timeout: Duration,
}

impl SignalConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

/// Build `<url>/rtc?access_token=<token>` from the room URL
pub fn signal_url(room_url: &str, access_token: &str) -> Result<String, SessionError> {
    if room_url.is_empty() || room_url.len() > MAX_URL_LEN {
        return Err(SessionError::Transport("Invalid room url length".to_string()));
    }
    if !room_url.starts_with("ws://") && !room_url.starts_with("wss://") {
        return Err(SessionError::Transport("Invalid room url protocol".to_string()));
    }
    let parsed = Url::parse(room_url)?;
    if parsed.query().is_some() {
        return Err(SessionError::Transport("Room url must not carry a query".to_string()));
    }

    let base = parsed.as_str().trim_end_matches('/');
    let encoded_token = utf8_percent_encode(access_token, NON_ALPHANUMERIC);
    Ok(format!("{}/rtc?access_token={}", base, encoded_token))
}

#[async_trait]
impl RoomConnector for SignalConnector {
    async fn connect(&self, url: &str, access_token: &str) -> Result<RoomHandle, SessionError> {
        let target = signal_url(url, access_token)?;

        let (ws_stream, _) = tokio::time::timeout(self.connect_timeout, connect_async(target))
            .await
            .map_err(|_| SessionError::Transport("Room connection timed out".to_string()))?
            .map_err(|e| SessionError::Transport(format!("Failed to join room: {}", e)))?;

        let (writer, reader) = ws_stream.split();
        let (sender, events) = broadcast::channel(EVENT_BUFFER_SIZE);
        let closing = Arc::new(AtomicBool::new(false));

        let reader_task = tokio::spawn(read_signals(reader, sender, Arc::clone(&closing)));

        info!("Joined room {}", url);
        let connection = Arc::new(SignalConnection {
            url: url.to_string(),
            writer: Mutex::new(Some(writer)),
            reader_task: parking_lot::Mutex::new(Some(reader_task)),
            closing,
        });

        Ok(RoomHandle {
            connection,
            events,
        })
    }
}

/// Track notification frame sent by the room
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum SignalFrame {
    TrackSubscribed { sid: String, kind: TrackKind },
    TrackUnsubscribed { sid: String, kind: TrackKind },
    #[serde(other)]
    Other,
}

async fn read_signals(
    mut reader: SplitStream<WsStream>,
    sender: broadcast::Sender<RoomEvent>,
    closing: Arc<AtomicBool>,
) {
    // Media units stay keyed by sid so an unsubscribe hands back the same unit
    let mut published: HashMap<String, MediaTrack> = HashMap::new();

    let reason = loop {
        match reader.next().await {
            Some(Ok(Message::Text(text))) => match serde_json::from_str::<SignalFrame>(&text) {
                Ok(SignalFrame::TrackSubscribed { sid, kind }) => {
                    let media = published
                        .entry(sid.clone())
                        .or_insert_with(|| MediaTrack::new(sid.clone(), kind))
                        .clone();
                    let _ = sender.send(RoomEvent::TrackSubscribed(RemoteTrack {
                        sid,
                        kind,
                        media: Some(media),
                    }));
                }
                Ok(SignalFrame::TrackUnsubscribed { sid, kind }) => {
                    let media = published.remove(&sid);
                    let _ = sender.send(RoomEvent::TrackUnsubscribed(RemoteTrack { sid, kind, media }));
                }
                Ok(SignalFrame::Other) => {}
                Err(e) => debug!("Ignoring malformed signal frame: {}", e),
            },
            Some(Ok(Message::Close(frame))) => {
                break frame
                    .map(|f| f.reason.to_string())
                    .filter(|r| !r.is_empty())
                    .unwrap_or_else(|| "room closed".to_string());
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => break format!("signal read failed: {}", e),
            None => break "signal stream ended".to_string(),
        }
    };

    if !closing.load(Ordering::SeqCst) {
        warn!("Room connection lost: {}", reason);
        let _ = sender.send(RoomEvent::Disconnected { reason });
    }
}

/// Live signalling connection
pub struct SignalConnection {
    url: String,
    writer: Mutex<Option<SplitSink<WsStream, Message>>>,
    reader_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
    closing: Arc<AtomicBool>,
}

#[async_trait]
impl RoomConnection for SignalConnection {
    fn room_url(&self) -> &str {
        &self.url
    }

    fn is_connected(&self) -> bool {
        if self.closing.load(Ordering::SeqCst) {
            return false;
        }
        self.reader_task
            .lock()
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }

    async fn disconnect(&self) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }

        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            match tokio::time::timeout(CLOSE_TIMEOUT, writer.close()).await {
                Ok(Ok(())) => debug!("Room signalling closed"),
                Ok(Err(e)) => warn!("Room close error: {}", e),
                Err(_) => warn!("Room close timed out"),
            }
        }

        if let Some(task) = self.reader_task.lock().take() {
            task.abort();
        }
        info!("Left room {}", self.url);
    }
}
