//! Slack Web API client.
//!
//! Thin wrappers over the handful of methods the bot calls. Every Slack
//! response carries `ok`; `ok: false` becomes [`ChannelError::Api`].

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::config::SlackConfig;
use crate::error::ChannelError;
use crate::pipeline::types::{AuthorProfile, PostedMessage, Publisher, UserDirectory};

/// Per-request timeout for Web API calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Page size for `users.list`.
const USERS_PAGE_LIMIT: u32 = 200;

/// Upper bound on `users.list` pages followed in one listing.
const MAX_USER_PAGES: usize = 100;

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(flatten)]
    body: Option<T>,
}

#[derive(Debug, Deserialize)]
struct AuthTestBody {
    user_id: String,
    #[serde(default)]
    user: String,
    #[serde(default)]
    team: String,
}

#[derive(Debug, Deserialize)]
struct OpenSocketBody {
    url: String,
}

#[derive(Debug, Deserialize)]
struct PostMessageBody {
    #[serde(default)]
    channel: Option<String>,
    ts: String,
}

#[derive(Debug, Deserialize)]
struct UserInfoBody {
    user: SlackUser,
}

#[derive(Debug, Deserialize)]
struct UsersListBody {
    #[serde(default)]
    members: Vec<SlackUser>,
    #[serde(default)]
    response_metadata: Option<ResponseMetadata>,
}

#[derive(Debug, Deserialize)]
struct ConversationInfoBody {
    channel: Conversation,
}

#[derive(Debug, Deserialize)]
struct ConversationsListBody {
    #[serde(default)]
    channels: Vec<Conversation>,
    #[serde(default)]
    response_metadata: Option<ResponseMetadata>,
}

#[derive(Debug, Deserialize)]
struct MembersBody {
    #[serde(default)]
    members: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMetadata {
    #[serde(default)]
    next_cursor: String,
}

#[derive(Debug, Deserialize)]
struct SlackUser {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    real_name: String,
    #[serde(default)]
    profile: SlackUserProfile,
}

#[derive(Debug, Default, Deserialize)]
struct SlackUserProfile {
    #[serde(default)]
    display_name: String,
    #[serde(default)]
    real_name: String,
}

impl From<SlackUser> for AuthorProfile {
    fn from(user: SlackUser) -> Self {
        let real_name = if user.real_name.is_empty() {
            user.profile.real_name
        } else {
            user.real_name
        };
        Self {
            id: user.id,
            username: user.name,
            real_name,
            display_name: Some(user.profile.display_name).filter(|d| !d.is_empty()),
        }
    }
}

/// Identity of the bot as reported by `auth.test`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotIdentity {
    pub user_id: String,
    pub user: String,
    pub team: String,
}

/// A channel or conversation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Conversation {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub is_private: bool,
}

/// One page of `users.conversations`.
#[derive(Debug, Clone)]
pub struct ConversationPage {
    pub channels: Vec<Conversation>,
    /// True when Slack reported more pages.
    pub has_more: bool,
}

/// Slack Web API client. Cheap to clone.
#[derive(Clone)]
pub struct SlackClient {
    http: reqwest::Client,
    api_base: String,
    bot_token: SecretString,
    app_token: SecretString,
}

impl SlackClient {
    pub fn new(config: &SlackConfig) -> Result<Self, ChannelError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ChannelError::Http {
                method: "client".into(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            bot_token: config.bot_token.clone(),
            app_token: config.app_token.clone(),
        })
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/{method}", self.api_base)
    }

    /// Send a prepared request and unwrap Slack's `ok` envelope.
    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<T, ChannelError> {
        let response = request.send().await.map_err(|e| ChannelError::Http {
            method: method.into(),
            reason: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChannelError::Http {
                method: method.into(),
                reason: format!("status {status}: {body}"),
            });
        }

        let envelope: Envelope<T> = response.json().await.map_err(|e| ChannelError::Decode {
            method: method.into(),
            reason: e.to_string(),
        })?;

        if !envelope.ok {
            return Err(ChannelError::Api {
                method: method.into(),
                error: envelope.error.unwrap_or_else(|| "unknown_error".into()),
            });
        }

        envelope.body.ok_or_else(|| ChannelError::Decode {
            method: method.into(),
            reason: "response missing expected fields".into(),
        })
    }

    fn get(&self, method: &str) -> reqwest::RequestBuilder {
        self.http
            .get(self.api_url(method))
            .bearer_auth(self.bot_token.expose_secret())
    }

    /// `auth.test`: who the bot token belongs to.
    pub async fn auth_test(&self) -> Result<BotIdentity, ChannelError> {
        let request = self
            .http
            .post(self.api_url("auth.test"))
            .bearer_auth(self.bot_token.expose_secret());
        let body: AuthTestBody = self.call("auth.test", request).await?;
        Ok(BotIdentity {
            user_id: body.user_id,
            user: body.user,
            team: body.team,
        })
    }

    /// `apps.connections.open`: a fresh Socket Mode websocket URL.
    pub async fn open_socket_connection(&self) -> Result<String, ChannelError> {
        let request = self
            .http
            .post(self.api_url("apps.connections.open"))
            .bearer_auth(self.app_token.expose_secret());
        let body: OpenSocketBody = self.call("apps.connections.open", request).await?;
        if body.url.trim().is_empty() {
            return Err(ChannelError::Decode {
                method: "apps.connections.open".into(),
                reason: "empty url".into(),
            });
        }
        Ok(body.url)
    }

    /// `users.info`.
    pub async fn user_info(&self, user_id: &str) -> Result<AuthorProfile, ChannelError> {
        let request = self.get("users.info").query(&[("user", user_id)]);
        let body: UserInfoBody = self.call("users.info", request).await?;
        Ok(body.user.into())
    }

    /// `users.list`: every workspace member, following `next_cursor`.
    pub async fn list_users(&self) -> Result<Vec<AuthorProfile>, ChannelError> {
        let mut users = Vec::new();
        let mut cursor = String::new();
        for _ in 0..MAX_USER_PAGES {
            let mut request = self
                .get("users.list")
                .query(&[("limit", USERS_PAGE_LIMIT.to_string())]);
            if !cursor.is_empty() {
                request = request.query(&[("cursor", cursor.as_str())]);
            }
            let body: UsersListBody = self.call("users.list", request).await?;
            users.extend(body.members.into_iter().map(AuthorProfile::from));

            cursor = body
                .response_metadata
                .map(|m| m.next_cursor)
                .unwrap_or_default();
            if cursor.is_empty() {
                return Ok(users);
            }
        }
        tracing::warn!(pages = MAX_USER_PAGES, "users.list page limit reached");
        Ok(users)
    }

    /// `chat.postMessage`, optionally as a threaded reply.
    pub async fn post_message(
        &self,
        channel: &str,
        text: &str,
        thread_ts: Option<&str>,
    ) -> Result<PostedMessage, ChannelError> {
        let mut payload = json!({
            "channel": channel,
            "text": text,
        });
        if let Some(ts) = thread_ts {
            payload["thread_ts"] = Value::String(ts.to_string());
        }
        let request = self
            .http
            .post(self.api_url("chat.postMessage"))
            .bearer_auth(self.bot_token.expose_secret())
            .json(&payload);
        let body: PostMessageBody = self.call("chat.postMessage", request).await?;
        Ok(PostedMessage {
            channel: body.channel.unwrap_or_else(|| channel.to_string()),
            ts: body.ts,
        })
    }

    /// `conversations.info`.
    pub async fn conversation_info(&self, channel_id: &str) -> Result<Conversation, ChannelError> {
        let request = self
            .get("conversations.info")
            .query(&[("channel", channel_id)]);
        let body: ConversationInfoBody = self.call("conversations.info", request).await?;
        Ok(body.channel)
    }

    /// `conversations.members`: first page of member IDs.
    pub async fn conversation_members(&self, channel_id: &str) -> Result<Vec<String>, ChannelError> {
        let request = self
            .get("conversations.members")
            .query(&[("channel", channel_id)]);
        let body: MembersBody = self.call("conversations.members", request).await?;
        Ok(body.members)
    }

    /// `users.conversations`: channels the bot belongs to.
    pub async fn bot_conversations(&self, limit: u32) -> Result<ConversationPage, ChannelError> {
        let request = self.get("users.conversations").query(&[
            ("types", "public_channel,private_channel".to_string()),
            ("limit", limit.to_string()),
        ]);
        let body: ConversationsListBody = self.call("users.conversations", request).await?;
        let has_more = body
            .response_metadata
            .is_some_and(|m| !m.next_cursor.is_empty());
        Ok(ConversationPage {
            channels: body.channels,
            has_more,
        })
    }
}

#[async_trait]
impl UserDirectory for SlackClient {
    async fn get_user_info(&self, user_id: &str) -> Result<AuthorProfile, ChannelError> {
        self.user_info(user_id).await
    }
}

#[async_trait]
impl Publisher for SlackClient {
    async fn publish(
        &self,
        channel_id: &str,
        text: &str,
        thread_ts: Option<&str>,
    ) -> Result<PostedMessage, ChannelError> {
        self.post_message(channel_id, text, thread_ts).await
    }
}
