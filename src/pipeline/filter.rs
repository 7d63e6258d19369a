//! Channel/user filter.
//!
//! Decides whether a message is eligible for transformation. Rules run in
//! order and the first failing rule rejects:
//! 1. Channel not in the allow-list (unless monitoring all channels)
//! 2. Neither the author's username nor their ID is a target user
//! 3. Message came from a bot (anti-loopback)

use std::collections::HashSet;

use crate::pipeline::types::{AuthorProfile, InboundMessage};

/// Which channels are monitored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelScope {
    /// Every channel the bot has joined. The event stream only delivers
    /// those, so no membership check happens here.
    All,
    /// Only these channel IDs.
    Only(HashSet<String>),
}

/// Why a message was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    ChannelNotMonitored,
    UserNotTargeted,
    Automated,
}

impl Rejection {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::ChannelNotMonitored => "channel_not_monitored",
            Self::UserNotTargeted => "user_not_targeted",
            Self::Automated => "automated_sender",
        }
    }
}

/// Immutable allow-sets built once at startup.
#[derive(Debug, Clone)]
pub struct FilterConfig {
    channels: ChannelScope,
    users: HashSet<String>,
}

impl FilterConfig {
    /// Build from configured lists. An empty channel list means all channels.
    pub fn new<C, U>(channel_ids: C, target_users: U) -> Self
    where
        C: IntoIterator,
        C::Item: Into<String>,
        U: IntoIterator,
        U::Item: Into<String>,
    {
        let channels: HashSet<String> = channel_ids.into_iter().map(Into::into).collect();
        let channels = if channels.is_empty() {
            ChannelScope::All
        } else {
            ChannelScope::Only(channels)
        };
        Self {
            channels,
            users: target_users.into_iter().map(Into::into).collect(),
        }
    }

    pub fn channels(&self) -> &ChannelScope {
        &self.channels
    }

    pub fn users(&self) -> &HashSet<String> {
        &self.users
    }

    pub fn is_channel_monitored(&self, channel_id: &str) -> bool {
        match &self.channels {
            ChannelScope::All => true,
            ChannelScope::Only(ids) => ids.contains(channel_id),
        }
    }

    /// Case-sensitive exact match against usernames and IDs.
    pub fn is_user_targeted(&self, username: &str, user_id: &str) -> bool {
        self.users.contains(username) || self.users.contains(user_id)
    }

    /// Full decision with the rejecting rule, if any.
    pub fn evaluate(&self, msg: &InboundMessage, author: &AuthorProfile) -> Result<(), Rejection> {
        if !self.is_channel_monitored(&msg.channel_id) {
            return Err(Rejection::ChannelNotMonitored);
        }
        if !self.is_user_targeted(&author.username, &msg.author_id) {
            return Err(Rejection::UserNotTargeted);
        }
        if msg.is_automated() {
            return Err(Rejection::Automated);
        }
        Ok(())
    }

    /// True when the message is admitted.
    pub fn admit(&self, msg: &InboundMessage, author: &AuthorProfile) -> bool {
        self.evaluate(msg, author).is_ok()
    }

    /// Rules that need no author profile (1 and 3).
    ///
    /// A message rejected here is rejected by [`Self::evaluate`] too, so the
    /// processor uses it to skip the user lookup.
    pub fn prescreen(&self, msg: &InboundMessage) -> Result<(), Rejection> {
        if !self.is_channel_monitored(&msg.channel_id) {
            return Err(Rejection::ChannelNotMonitored);
        }
        if msg.is_automated() {
            return Err(Rejection::Automated);
        }
        Ok(())
    }
}
