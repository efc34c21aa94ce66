//! Server-sent event stream with auto-reconnect.
//!
//! Opens the vendor's live-update stream through a [`PushSource`], decodes
//! SSE frames, classifies each JSON payload as an incremental or bulk
//! update, and fans them out through a [`tokio::sync::broadcast`] channel.
//! Reconnection uses exponential backoff with jitter.
//!
//! # Example
//!
//! ```rust,ignore
//! use applisync_api::push::{PushHandle, ReconnectConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! let handle = PushHandle::start(source, ids, ReconnectConfig::default(), CancellationToken::new());
//! let mut rx = handle.subscribe();
//!
//! while let Ok(event) = rx.recv().await {
//!     println!("{}", event.appliance_id());
//! }
//!
//! handle.shutdown().await;
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use serde_json::{Map, Value};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::Error;

// ── Broadcast channel capacity ───────────────────────────────────────

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Envelope keys that never belong to appliance state.
const ENVELOPE_KEYS: &[&str] = &["applianceId", "appliance_id", "userId", "timestamp"];

// ── Source seam ──────────────────────────────────────────────────────

/// Raw body chunks of an open event stream.
pub type ByteStream = BoxStream<'static, Result<Bytes, Error>>;

/// Opens the live-update stream for a set of appliances.
#[async_trait]
pub trait PushSource: Send + Sync {
    async fn open(&self, appliance_ids: &[String]) -> Result<ByteStream, Error>;
}

// ── PushEvent ────────────────────────────────────────────────────────

/// A decoded live update.
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    /// A single property changed: `{applianceId, property, value}`.
    Incremental {
        appliance_id: String,
        property: String,
        value: Value,
    },
    /// A partial or full reported-state object.
    Bulk {
        appliance_id: String,
        state: Map<String, Value>,
    },
}

impl PushEvent {
    pub fn appliance_id(&self) -> &str {
        match self {
            Self::Incremental { appliance_id, .. } | Self::Bulk { appliance_id, .. } => {
                appliance_id
            }
        }
    }

    /// Classify one JSON payload. Returns `None` for payloads without an
    /// appliance id or without any state.
    pub fn from_payload(payload: &Value) -> Option<Self> {
        let object = payload.as_object()?;
        let appliance_id = object
            .get("applianceId")
            .or_else(|| object.get("appliance_id"))
            .and_then(Value::as_str)?
            .to_owned();

        if let (Some(property), Some(value)) = (
            object.get("property").and_then(Value::as_str),
            object.get("value"),
        ) {
            return Some(Self::Incremental {
                appliance_id,
                property: property.to_owned(),
                value: value.clone(),
            });
        }

        let state = match object
            .get("data")
            .or_else(|| object.get("state"))
            .and_then(Value::as_object)
        {
            Some(nested) => nested.clone(),
            None => object
                .iter()
                .filter(|(k, _)| !ENVELOPE_KEYS.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        };

        if state.is_empty() {
            return None;
        }
        Some(Self::Bulk {
            appliance_id,
            state,
        })
    }
}

// ── SSE framing ──────────────────────────────────────────────────────

/// Incremental `text/event-stream` decoder.
///
/// Chunks may split lines (or UTF-8 sequences) anywhere; complete events
/// are returned once their terminating blank line arrives.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    data_lines: Vec<String>,
}

impl SseDecoder {
    /// Feed a chunk, returning the `data` payload of every completed event.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if !self.data_lines.is_empty() {
                    events.push(self.data_lines.join("\n"));
                    self.data_lines.clear();
                }
            } else if let Some(value) = line.strip_prefix("data:") {
                self.data_lines.push(value.trim_start().to_owned());
            }
            // `event:`, `id:`, `retry:` and `:` comments carry nothing we use.
        }

        events
    }
}

// ── ReconnectConfig ──────────────────────────────────────────────────

/// Exponential backoff configuration for stream reconnection.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,

    /// Maximum reconnection attempts before giving up.
    /// `None` means retry forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_retries: None,
        }
    }
}

// ── StreamStatus ─────────────────────────────────────────────────────

/// Lifecycle of the background listener, observable via `watch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    /// The vendor refused our credentials; the listener has stopped.
    AuthFailed,
    Stopped,
}

// ── PushHandle ───────────────────────────────────────────────────────

/// Handle to a running event-stream listener.
///
/// [`shutdown`](Self::shutdown) cancels the task and waits for it to exit,
/// so a replacement listener never overlaps the old one.
pub struct PushHandle {
    event_tx: broadcast::Sender<Arc<PushEvent>>,
    status_rx: watch::Receiver<StreamStatus>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl PushHandle {
    /// Spawn the listener. The first connection attempt happens in the
    /// background; subscribe to start consuming events.
    pub fn start(
        source: Arc<dyn PushSource>,
        appliance_ids: Vec<String>,
        reconnect: ReconnectConfig,
        cancel: CancellationToken,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (status_tx, status_rx) = watch::channel(StreamStatus::Connecting);

        let task = tokio::spawn(stream_loop(
            source,
            appliance_ids,
            event_tx.clone(),
            status_tx,
            reconnect,
            cancel.clone(),
        ));

        Self {
            event_tx,
            status_rx,
            cancel,
            task,
        }
    }

    /// Get a new broadcast receiver for decoded events.
    ///
    /// A consumer that falls behind receives
    /// [`broadcast::error::RecvError::Lagged`].
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<PushEvent>> {
        self.event_tx.subscribe()
    }

    pub fn status(&self) -> watch::Receiver<StreamStatus> {
        self.status_rx.clone()
    }

    /// Cancel the listener and wait for its task to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "event stream task ended abnormally");
        }
    }
}

// ── Background reconnection loop ─────────────────────────────────────

/// Main loop: open → read → on error, backoff → reopen.
async fn stream_loop(
    source: Arc<dyn PushSource>,
    appliance_ids: Vec<String>,
    event_tx: broadcast::Sender<Arc<PushEvent>>,
    status_tx: watch::Sender<StreamStatus>,
    reconnect: ReconnectConfig,
    cancel: CancellationToken,
) {
    let mut attempt: u32 = 0;

    loop {
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = connect_and_read(source.as_ref(), &appliance_ids, &event_tx, &status_tx, &cancel) => result,
        };

        let delay = match result {
            // Server closed the stream. Reset the counter and reopen.
            Ok(()) => {
                if cancel.is_cancelled() {
                    break;
                }
                tracing::info!("event stream ended cleanly, reconnecting");
                attempt = 0;
                reconnect.initial_delay
            }
            Err(e) if e.is_auth_failure() => {
                tracing::error!(error = %e, "event stream rejected credentials, stopping");
                status_tx.send_replace(StreamStatus::AuthFailed);
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, attempt, "event stream error");

                if let Some(max) = reconnect.max_retries {
                    if attempt >= max {
                        tracing::error!(
                            max_retries = max,
                            "event stream reconnection limit reached, giving up"
                        );
                        break;
                    }
                }

                let delay = calculate_backoff(attempt, &reconnect);
                attempt += 1;
                delay
            }
        };

        status_tx.send_replace(StreamStatus::Reconnecting { attempt });
        tracing::info!(
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            attempt,
            "Waiting before reconnect"
        );

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }
    }

    status_tx.send_replace(StreamStatus::Stopped);
    tracing::debug!("event stream loop exiting");
}

// ── Single connection lifecycle ──────────────────────────────────────

async fn connect_and_read(
    source: &dyn PushSource,
    appliance_ids: &[String],
    event_tx: &broadcast::Sender<Arc<PushEvent>>,
    status_tx: &watch::Sender<StreamStatus>,
    cancel: &CancellationToken,
) -> Result<(), Error> {
    status_tx.send_replace(StreamStatus::Connecting);
    tracing::info!(appliances = appliance_ids.len(), "Opening event stream");

    let mut stream = source.open(appliance_ids).await?;
    status_tx.send_replace(StreamStatus::Connected);
    tracing::info!("Event stream connected");

    let mut decoder = SseDecoder::default();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(()),
            chunk = stream.next() => match chunk {
                Some(Ok(bytes)) => {
                    for payload in decoder.feed(&bytes) {
                        parse_and_broadcast(&payload, event_tx);
                    }
                }
                Some(Err(e)) => return Err(e),
                None => {
                    tracing::info!("Event stream ended");
                    return Ok(());
                }
            },
        }
    }
}

// ── Message parsing ──────────────────────────────────────────────────

/// Parse one SSE `data` payload and broadcast every event inside it.
/// The vendor sends either a single object or an array of them.
fn parse_and_broadcast(payload: &str, event_tx: &broadcast::Sender<Arc<PushEvent>>) {
    let value: Value = match serde_json::from_str(payload) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!(error = %e, "Failed to parse event payload");
            return;
        }
    };

    let items = match value {
        Value::Array(items) => items,
        other => vec![other],
    };

    for item in &items {
        match PushEvent::from_payload(item) {
            // No subscribers right now is fine.
            Some(event) => {
                let _ = event_tx.send(Arc::new(event));
            }
            None => tracing::debug!("Ignoring event payload without appliance state"),
        }
    }
}

// ── Backoff calculation ──────────────────────────────────────────────

/// Exponential backoff with jitter.
///
/// `delay = min(initial * 2^attempt, max) * (1 +- 0.25)`
///
/// The jitter is deterministic, seeded from the attempt number.
pub fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let base = config.initial_delay.as_secs_f64() * 2.0_f64.powi(exponent);
    let capped = base.min(config.max_delay.as_secs_f64());

    let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
    let with_jitter = (capped * jitter_factor).max(0.0);

    Duration::from_secs_f64(with_jitter)
}

// ── Tests ────────────────────────────────────────────────────────────
