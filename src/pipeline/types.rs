//! Shared types for the message pipeline.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ChannelError;

// ── Inbound message ─────────────────────────────────────────────────

/// A Slack message event normalized by the Socket Mode adapter.
///
/// Built once per delivered event and dropped after one pass through the
/// processor. `timestamp` is unique per channel and doubles as the
/// idempotency key for a delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub channel_id: String,
    pub author_id: String,
    pub text: String,
    pub timestamp: String,
    pub thread_parent_timestamp: Option<String>,
    /// Set when the message came from an automated sender (`bot_id`).
    pub bot_marker: Option<String>,
    /// Slack message subtype (`bot_message`, `thread_broadcast`, …). Empty for
    /// plain user messages.
    pub subtype: String,
}

impl InboundMessage {
    /// True when the message was produced by a bot or integration.
    pub fn is_automated(&self) -> bool {
        self.bot_marker.as_deref().is_some_and(|b| !b.is_empty()) || self.subtype == "bot_message"
    }
}

// ── Author profile ──────────────────────────────────────────────────

/// Display information for a message author, fetched per message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorProfile {
    pub id: String,
    pub username: String,
    pub real_name: String,
    pub display_name: Option<String>,
}

impl AuthorProfile {
    /// First non-empty of display name, username, real name.
    ///
    /// This is the speaker label sent to the transformer and shown in the
    /// published header, so the order matters.
    pub fn effective_display_name(&self) -> &str {
        match self.display_name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ if !self.username.is_empty() => self.username.as_str(),
            _ => self.real_name.as_str(),
        }
    }
}

// ── Publishing ──────────────────────────────────────────────────────

/// Where a transformed message is posted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PublishMode {
    /// Top-level message in the originating channel.
    #[default]
    Channel,
    /// Threaded reply under the original message.
    Thread,
}

impl PublishMode {
    /// Thread timestamp to reply under for `msg`, if any.
    pub fn thread_for<'a>(&self, msg: &'a InboundMessage) -> Option<&'a str> {
        match self {
            Self::Channel => None,
            Self::Thread => Some(
                msg.thread_parent_timestamp
                    .as_deref()
                    .unwrap_or(&msg.timestamp),
            ),
        }
    }
}

/// A message successfully posted to Slack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostedMessage {
    pub channel: String,
    pub ts: String,
}

// ── Collaborator traits ─────────────────────────────────────────────

/// Resolves Slack user IDs to profiles.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_user_info(&self, user_id: &str) -> Result<AuthorProfile, ChannelError>;
}

/// Posts text into a Slack channel. No dedup: two calls post twice.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(
        &self,
        channel_id: &str,
        text: &str,
        thread_ts: Option<&str>,
    ) -> Result<PostedMessage, ChannelError>;
}
