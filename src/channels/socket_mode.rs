//! Socket Mode event stream adapter.
//!
//! Holds one logical subscription to Slack's event stream for the life of
//! the process. Each websocket frame is decoded into a [`SocketEnvelope`],
//! acked (when it carries an `envelope_id`) before anything else happens,
//! then narrowed to a [`SocketEvent`]. Only message events reach the
//! subscribed handler; everything else is logged.
//!
//! The receive loop is sequential so acks go out in arrival order. The
//! handler must not block: the processor's dispatcher spawns a task per
//! message and returns immediately.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::time::{Instant, Interval, interval_at};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::channels::slack::SlackClient;
use crate::error::ChannelError;
use crate::pipeline::types::InboundMessage;

/// Liveness log interval.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);

/// Consecutive failed connection attempts before giving up.
pub const MAX_CONNECT_ATTEMPTS: u32 = 5;

/// Pause between failed connection attempts.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Callback invoked once per normalized message, in arrival order.
pub type MessageHandler = Arc<dyn Fn(InboundMessage) + Send + Sync>;

// ── Wire types ──────────────────────────────────────────────────────

/// Raw Socket Mode envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct SocketEnvelope {
    /// Present on every envelope Slack expects an ack for.
    #[serde(default)]
    pub envelope_id: Option<String>,
    #[serde(rename = "type")]
    pub envelope_type: String,
    #[serde(default)]
    pub payload: Value,
    /// Set on `disconnect` envelopes.
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EventCallback {
    #[serde(rename = "type")]
    callback_type: String,
    #[serde(default)]
    event: Option<MessagePayload>,
}

#[derive(Debug, Default, Deserialize)]
struct MessagePayload {
    #[serde(rename = "type", default)]
    event_type: String,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    ts: Option<String>,
    #[serde(default)]
    thread_ts: Option<String>,
    #[serde(default)]
    bot_id: Option<String>,
    #[serde(default)]
    subtype: Option<String>,
}

// ── Classified events ───────────────────────────────────────────────

/// Connection control envelopes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEvent {
    /// Connection fully established.
    Hello,
    /// Slack is about to drop this connection and wants a new one.
    Disconnect { reason: String },
}

/// An envelope narrowed to what the bot cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    Control(ControlEvent),
    Message(InboundMessage),
    /// Anything else: other event types, slash commands, interactivity.
    Other { kind: String },
}

/// Decode one websocket frame. Non-data frames yield `None`.
pub fn decode_frame(message: WsMessage) -> Result<Option<SocketEnvelope>, ChannelError> {
    let text = match message {
        WsMessage::Text(text) => text.as_str().to_owned(),
        WsMessage::Binary(bytes) => {
            String::from_utf8(bytes.to_vec()).map_err(|e| ChannelError::Decode {
                method: "socket_mode".into(),
                reason: format!("invalid utf-8 payload: {e}"),
            })?
        }
        WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Close(_) | WsMessage::Frame(_) => {
            return Ok(None);
        }
    };
    serde_json::from_str(&text)
        .map(Some)
        .map_err(|e| ChannelError::Decode {
            method: "socket_mode".into(),
            reason: e.to_string(),
        })
}

/// Narrow an envelope to a [`SocketEvent`].
pub fn classify(envelope: &SocketEnvelope) -> SocketEvent {
    match envelope.envelope_type.as_str() {
        "hello" => SocketEvent::Control(ControlEvent::Hello),
        "disconnect" => SocketEvent::Control(ControlEvent::Disconnect {
            reason: envelope.reason.clone().unwrap_or_default(),
        }),
        "events_api" => classify_events_api(&envelope.payload),
        other => SocketEvent::Other {
            kind: other.to_string(),
        },
    }
}

fn classify_events_api(payload: &Value) -> SocketEvent {
    let callback = match EventCallback::deserialize(payload) {
        Ok(callback) => callback,
        Err(e) => {
            return SocketEvent::Other {
                kind: format!("events_api (undecodable: {e})"),
            };
        }
    };
    if callback.callback_type != "event_callback" {
        return SocketEvent::Other {
            kind: callback.callback_type,
        };
    }
    let event = callback.event.unwrap_or_default();
    if event.event_type != "message" {
        return SocketEvent::Other {
            kind: event.event_type,
        };
    }
    match normalize_message(event) {
        Some(msg) => SocketEvent::Message(msg),
        None => SocketEvent::Other {
            kind: "message (unaddressable)".into(),
        },
    }
}

/// Build an [`InboundMessage`] from a message payload.
///
/// Returns `None` when the event cannot be attributed or replied to: no
/// channel, no timestamp, or no author and no bot marker (edits and
/// deletions look like this).
fn normalize_message(event: MessagePayload) -> Option<InboundMessage> {
    let non_empty = |v: Option<String>| v.filter(|s| !s.trim().is_empty());

    let channel_id = non_empty(event.channel)?;
    let timestamp = non_empty(event.ts)?;
    let bot_marker = non_empty(event.bot_id);
    let subtype = event.subtype.unwrap_or_default();
    let author_id = match non_empty(event.user) {
        Some(user) => user,
        None if bot_marker.is_some() || subtype == "bot_message" => String::new(),
        None => return None,
    };

    Some(InboundMessage {
        channel_id,
        author_id,
        text: event.text.unwrap_or_default(),
        timestamp,
        thread_parent_timestamp: non_empty(event.thread_ts),
        bot_marker,
        subtype,
    })
}

// ── Adapter ─────────────────────────────────────────────────────────

/// How a single websocket session ended.
#[derive(Debug)]
enum SessionEnd {
    Cancelled,
    /// Socket closed, failed, or Slack asked us to reconnect. A session
    /// that reached `hello` resets the failure count.
    Dropped { saw_hello: bool },
    /// Socket Mode is turned off for the app; reconnecting cannot help.
    LinkDisabled,
}

/// Socket Mode subscription.
pub struct SocketModeAdapter {
    client: SlackClient,
    handler: Option<MessageHandler>,
    heartbeat_interval: Duration,
    max_connect_attempts: u32,
    reconnect_delay: Duration,
}

impl SocketModeAdapter {
    pub fn new(client: SlackClient) -> Self {
        Self {
            client,
            handler: None,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            max_connect_attempts: MAX_CONNECT_ATTEMPTS,
            reconnect_delay: RECONNECT_DELAY,
        }
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_reconnect_policy(mut self, max_attempts: u32, delay: Duration) -> Self {
        self.max_connect_attempts = max_attempts.max(1);
        self.reconnect_delay = delay;
        self
    }

    /// Register the message callback. Replaces any previous one.
    pub fn subscribe_messages<F>(&mut self, handler: F)
    where
        F: Fn(InboundMessage) + Send + Sync + 'static,
    {
        self.handler = Some(Arc::new(handler));
    }

    /// Run the subscription until `cancel` fires.
    ///
    /// Returns `Ok(())` on cancellation. Transient drops are reconnected
    /// here; an error means the connection could not be re-established and
    /// the caller should treat it as fatal.
    pub async fn start(&self, cancel: CancellationToken) -> Result<(), ChannelError> {
        let mut heartbeat = interval_at(
            Instant::now() + self.heartbeat_interval,
            self.heartbeat_interval,
        );
        let mut failures: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            info!("Connecting to Slack with Socket Mode...");
            let opened = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                opened = self.client.open_socket_connection() => opened,
            };
            let outcome = match opened {
                Ok(url) => self.run_session(&url, &cancel, &mut heartbeat).await,
                Err(e) => Err(e),
            };

            match outcome {
                Ok(SessionEnd::Cancelled) => {
                    info!("Socket Mode subscription closed");
                    return Ok(());
                }
                Ok(SessionEnd::LinkDisabled) => {
                    return Err(ChannelError::SocketFailed {
                        reason: "Socket Mode is disabled for this app (link_disabled)".into(),
                    });
                }
                Ok(SessionEnd::Dropped { saw_hello: true }) => {
                    warn!("Disconnected from Slack, reconnecting");
                    failures = 0;
                    continue;
                }
                Ok(SessionEnd::Dropped { saw_hello: false }) => {
                    failures += 1;
                    warn!(attempt = failures, "Socket closed before hello");
                }
                Err(e) => {
                    failures += 1;
                    error!(attempt = failures, error = %e, "Connection failed. Retrying later...");
                }
            }

            if failures >= self.max_connect_attempts {
                return Err(ChannelError::ReconnectExhausted { attempts: failures });
            }

            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }
    }

    async fn run_session(
        &self,
        url: &str,
        cancel: &CancellationToken,
        heartbeat: &mut Interval,
    ) -> Result<SessionEnd, ChannelError> {
        let connected = tokio::select! {
            _ = cancel.cancelled() => return Ok(SessionEnd::Cancelled),
            connected = connect_async(url) => connected,
        };
        let (stream, _response) = connected.map_err(|e| ChannelError::SocketFailed {
            reason: e.to_string(),
        })?;
        info!("Connected to Slack with Socket Mode.");
        let (mut sink, mut source) = stream.split();
        let mut saw_hello = false;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    if let Err(e) = sink.send(WsMessage::Close(None)).await {
                        debug!(error = %e, "Close frame not delivered");
                    }
                    return Ok(SessionEnd::Cancelled);
                }
                _ = heartbeat.tick() => {
                    info!("Bot is still alive and listening for events...");
                }
                next = source.next() => {
                    let Some(frame) = next else {
                        return Ok(SessionEnd::Dropped { saw_hello });
                    };
                    let frame = match frame {
                        Ok(frame) => frame,
                        Err(e) => {
                            warn!(error = %e, saw_hello, "Socket Mode read failed");
                            return Ok(SessionEnd::Dropped { saw_hello });
                        }
                    };
                    if matches!(frame, WsMessage::Close(_)) {
                        return Ok(SessionEnd::Dropped { saw_hello });
                    }

                    let envelope = match decode_frame(frame) {
                        Ok(Some(envelope)) => envelope,
                        Ok(None) => continue,
                        Err(e) => {
                            warn!(error = %e, "Skipping undecodable Socket Mode frame");
                            continue;
                        }
                    };

                    if let Some(envelope_id) = envelope.envelope_id.as_deref() {
                        let ack = json!({ "envelope_id": envelope_id }).to_string();
                        if let Err(e) = sink.send(WsMessage::Text(ack.into())).await {
                            warn!(%envelope_id, error = %e, saw_hello, "Socket Mode ack failed");
                            return Ok(SessionEnd::Dropped { saw_hello });
                        }
                    }

                    match classify(&envelope) {
                        SocketEvent::Control(ControlEvent::Hello) => {
                            saw_hello = true;
                            info!("Received hello from Slack, connection fully established");
                        }
                        SocketEvent::Control(ControlEvent::Disconnect { reason }) => {
                            info!(%reason, "Slack requested disconnect");
                            if reason == "link_disabled" {
                                return Ok(SessionEnd::LinkDisabled);
                            }
                            if let Err(e) = sink.send(WsMessage::Close(None)).await {
                                debug!(error = %e, "Close frame not delivered");
                            }
                            return Ok(SessionEnd::Dropped { saw_hello });
                        }
                        SocketEvent::Message(msg) => {
                            debug!(
                                channel = %msg.channel_id,
                                user = %msg.author_id,
                                ts = %msg.timestamp,
                                "Message event received"
                            );
                            if let Some(handler) = &self.handler {
                                handler(msg);
                            }
                        }
                        SocketEvent::Other { kind } => {
                            debug!(%kind, "Ignoring non-message event");
                        }
                    }
                }
            }
        }
    }
}
