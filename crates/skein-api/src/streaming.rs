//! Streaming timeline updates over WebSocket.
//!
//! Each connected [`Timeline`] runs its own reconnecting client. Incoming
//! events are written straight into the [`EntityCache`]: new statuses are
//! imported and prepended to the timeline's list, edits replace the cached
//! status, and deletions remove it everywhere.

use std::time::Duration;

use dashmap::DashMap;
use futures_util::StreamExt;
use reqwest::Url;
use serde::Deserialize;
use serde_json::Value;
use skein_entities::{Entity, EntityCache, EntityError, EntityType, ListPath, ListPosition};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, trace, warn};

use crate::features::Timeline;
use crate::schemas::Status;

/// Longest wait between reconnection attempts.
const MAX_BACKOFF_SECS: u64 = 60;

/// A connection with no traffic for this long is considered dead.
const READ_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("websocket error: {0}")]
    WebSocket(String),

    #[error("invalid streaming url: {0}")]
    InvalidUrl(String),

    #[error("timeline {0:?} has no streaming channel")]
    NotStreamable(Timeline),

    #[error("invalid event: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Entity(#[from] EntityError),
}

/// One message from the streaming API.
#[derive(Debug, Deserialize)]
struct StreamMessage {
    event: String,
    /// Either a JSON document encoded as a string or a bare id.
    #[serde(default)]
    payload: Option<String>,
}

/// What a message did to the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A new status was added to the top of the timeline.
    Created(String),
    /// A cached status was replaced by its edited version.
    Edited(String),
    /// A status was removed.
    Deleted(String),
    /// An event kind this client doesn't handle.
    Ignored(String),
}

/// Apply one streaming message to `cache`.
pub fn handle_message(cache: &EntityCache, timeline: &ListPath, text: &str) -> Result<StreamEvent, StreamError> {
    let message: StreamMessage = serde_json::from_str(text)?;
    let payload = message.payload.unwrap_or_default();

    match message.event.as_str() {
        "update" => {
            let status = Status::parse(serde_json::from_str::<Value>(&payload)?)?;
            let id = status.id.clone();
            cache.import(vec![status], Some((timeline, ListPosition::Start)));
            Ok(StreamEvent::Created(id))
        }
        "status.update" => {
            let status = Status::parse(serde_json::from_str::<Value>(&payload)?)?;
            let id = status.id.clone();
            cache.import(vec![status], None);
            Ok(StreamEvent::Edited(id))
        }
        "delete" => {
            cache.delete(EntityType::Statuses, std::slice::from_ref(&payload), false);
            Ok(StreamEvent::Deleted(payload))
        }
        other => {
            trace!(event = %other, "ignoring stream event");
            Ok(StreamEvent::Ignored(other.to_string()))
        }
    }
}

/// Reconnecting client for a single timeline stream.
struct StreamClient {
    cache: EntityCache,
    url: String,
    timeline: Timeline,
}

impl StreamClient {
    /// Connect and apply events until shutdown, reconnecting with
    /// exponential backoff.
    async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut backoff_secs = 1u64;
        let path = self.timeline.list_path();

        loop {
            if *shutdown_rx.borrow() {
                info!(timeline = ?self.timeline, "stream shutting down");
                return;
            }

            info!(timeline = ?self.timeline, "connecting to stream");

            match self.connect_and_process(&path, &mut shutdown_rx, &mut backoff_secs).await {
                Ok(()) => return,
                Err(e) => {
                    error!(timeline = ?self.timeline, error = %e, "stream connection error, reconnecting");

                    let wait = Duration::from_secs(backoff_secs);
                    tokio::select! {
                        changed = shutdown_rx.changed() => {
                            if changed.is_err() || *shutdown_rx.borrow() {
                                return;
                            }
                        }
                        _ = tokio::time::sleep(wait) => {}
                    }

                    backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
                }
            }
        }
    }

    async fn connect_and_process(
        &self,
        path: &ListPath,
        shutdown_rx: &mut watch::Receiver<bool>,
        backoff_secs: &mut u64,
    ) -> Result<(), StreamError> {
        let (ws_stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| StreamError::WebSocket(format!("connection failed: {}", e)))?;
        let (_, mut read) = ws_stream.split();

        info!(timeline = ?self.timeline, "stream connected");
        *backoff_secs = 1;

        loop {
            tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        return Ok(());
                    }
                }

                result = tokio::time::timeout(READ_TIMEOUT, read.next()) => {
                    match result {
                        Ok(Some(Ok(Message::Text(text)))) => {
                            match handle_message(&self.cache, path, &text) {
                                Ok(event) => debug!(?event, "applied stream event"),
                                Err(e) => warn!(error = %e, "failed to handle stream message"),
                            }
                        }
                        Ok(Some(Ok(Message::Close(_)))) => {
                            return Err(StreamError::WebSocket("connection closed".to_string()));
                        }
                        Ok(Some(Ok(_))) => {}
                        Ok(Some(Err(e))) => {
                            return Err(StreamError::WebSocket(format!("read error: {}", e)));
                        }
                        Ok(None) => {
                            return Err(StreamError::WebSocket("stream ended".to_string()));
                        }
                        Err(_) => {
                            warn!("stream read timeout after {}s", READ_TIMEOUT.as_secs());
                            return Err(StreamError::WebSocket("read timeout".to_string()));
                        }
                    }
                }
            }
        }
    }
}

/// A running stream. The task stops when the handle is disconnected or
/// dropped.
pub struct StreamHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl StreamHandle {
    /// Signal the task to stop and wait for it.
    pub async fn disconnect(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "stream task panicked");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Owns the open streams for one cache, at most one per timeline.
pub struct StreamManager {
    cache: EntityCache,
    base_url: String,
    access_token: Option<String>,
    handles: DashMap<Timeline, StreamHandle>,
}

impl StreamManager {
    /// `base_url` is the streaming server, e.g. `wss://example.social`.
    pub fn new(cache: EntityCache, base_url: impl Into<String>) -> Self {
        Self {
            cache,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token: None,
            handles: DashMap::new(),
        }
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Full WebSocket URL for `timeline`.
    pub fn stream_url(&self, timeline: &Timeline) -> Result<String, StreamError> {
        let mut params = timeline
            .stream_params()
            .ok_or_else(|| StreamError::NotStreamable(timeline.clone()))?;
        if let Some(token) = &self.access_token {
            params.push(("access_token", token.clone()));
        }
        let url = Url::parse_with_params(&format!("{}/api/v1/streaming", self.base_url), &params)
            .map_err(|e| StreamError::InvalidUrl(e.to_string()))?;
        Ok(url.to_string())
    }

    /// Start streaming `timeline` into the cache. An existing stream for
    /// the same timeline is disconnected first.
    ///
    /// Must be called within a tokio runtime.
    pub async fn connect(&self, timeline: Timeline) -> Result<(), StreamError> {
        let url = self.stream_url(&timeline)?;
        self.disconnect(&timeline).await;

        let (shutdown, shutdown_rx) = watch::channel(false);
        let client = StreamClient {
            cache: self.cache.clone(),
            url,
            timeline: timeline.clone(),
        };
        let task = tokio::spawn(async move { client.run(shutdown_rx).await });

        self.handles.insert(timeline, StreamHandle { shutdown, task });
        Ok(())
    }

    /// Stop streaming `timeline`. Does nothing if it isn't connected.
    pub async fn disconnect(&self, timeline: &Timeline) {
        if let Some((_, handle)) = self.handles.remove(timeline) {
            handle.disconnect().await;
        }
    }

    pub async fn disconnect_all(&self) {
        let timelines: Vec<Timeline> = self.handles.iter().map(|e| e.key().clone()).collect();
        for timeline in timelines {
            self.disconnect(&timeline).await;
        }
    }

    pub fn is_connected(&self, timeline: &Timeline) -> bool {
        self.handles.get(timeline).is_some_and(|h| !h.is_finished())
    }
}
