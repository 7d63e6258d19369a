//! Startup verification of the Slack setup.
//!
//! Diagnostic only. Every check logs and records an issue on failure; none of
//! them stop the bot.

use chrono::Utc;
use tracing::{info, warn};

use crate::channels::slack::SlackClient;
use crate::config::SlackConfig;

/// Page size when listing the bot's channels.
const CHANNEL_LIST_LIMIT: u32 = 100;

/// Problems found during verification.
#[derive(Debug, Default)]
pub struct SetupReport {
    pub issues: Vec<String>,
}

impl SetupReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    fn issue(&mut self, message: String) {
        warn!("{message}");
        self.issues.push(message);
    }
}

/// Entries that look like Slack user IDs rather than usernames.
fn looks_like_user_id(entry: &str) -> bool {
    entry.starts_with('U') && entry.len() > 8
}

/// Check tokens, channel access and target users. Posts a self-test message
/// when `self_test` is set: to the first configured channel, or in
/// all-channels mode to the first channel the bot has joined.
pub async fn verify_setup(client: &SlackClient, config: &SlackConfig, self_test: bool) -> SetupReport {
    let mut report = SetupReport::default();
    info!("Verifying Slack setup...");

    let bot_user_id = match client.auth_test().await {
        Ok(identity) => {
            info!(user = %identity.user, user_id = %identity.user_id, team = %identity.team, "Bot authenticated");
            Some(identity.user_id)
        }
        Err(e) => {
            report.issue(format!("Bot token check failed: {e}"));
            None
        }
    };

    let mut first_joined = None;
    if config.channel_ids.is_empty() {
        match client.bot_conversations(CHANNEL_LIST_LIMIT).await {
            Ok(page) => {
                first_joined = page.channels.first().map(|c| c.id.clone());
                let names: Vec<&str> = page.channels.iter().map(|c| c.name.as_str()).collect();
                info!(count = page.channels.len(), more = page.has_more, channels = ?names, "Monitoring all joined channels");
                if page.channels.is_empty() {
                    report.issue("Bot is not a member of any channel".into());
                }
            }
            Err(e) => report.issue(format!("Could not list bot channels: {e}")),
        }
    } else {
        for channel_id in &config.channel_ids {
            match client.conversation_info(channel_id).await {
                Ok(channel) => {
                    info!(channel = %channel_id, name = %channel.name, private = channel.is_private, "Channel found");
                }
                Err(e) => {
                    report.issue(format!("Cannot access channel {channel_id}: {e}"));
                    continue;
                }
            }
            let Some(bot_id) = bot_user_id.as_deref() else {
                continue;
            };
            match client.conversation_members(channel_id).await {
                Ok(members) if members.iter().any(|m| m == bot_id) => {
                    info!(channel = %channel_id, "Bot is a member of channel");
                }
                Ok(_) => report.issue(format!(
                    "Bot is not a member of channel {channel_id}; invite it with /invite"
                )),
                Err(e) => report.issue(format!("Could not check members of {channel_id}: {e}")),
            }
        }
    }

    let mut directory = None;
    for target in &config.target_users {
        if looks_like_user_id(target) {
            match client.user_info(target).await {
                Ok(profile) => info!(target = %target, username = %profile.username, "Target user found"),
                Err(e) => report.issue(format!("Target user {target} not found: {e}")),
            }
            continue;
        }

        if directory.is_none() {
            match client.list_users().await {
                Ok(users) => directory = Some(users),
                Err(e) => {
                    report.issue(format!("Could not list workspace users: {e}"));
                    directory = Some(Vec::new());
                }
            }
        }
        let found = directory
            .as_deref()
            .unwrap_or_default()
            .iter()
            .find(|u| u.username == *target);
        match found {
            Some(profile) => info!(target = %target, user_id = %profile.id, "Target user found"),
            None => report.issue(format!("Target username {target} not found in workspace")),
        }
    }

    if self_test {
        match config.channel_ids.first().or(first_joined.as_ref()) {
            Some(channel) => {
                let text = format!(
                    "Gen Alpha bot self-test at {}",
                    Utc::now().to_rfc3339()
                );
                match client.post_message(channel, &text, None).await {
                    Ok(posted) => info!(channel = %posted.channel, ts = %posted.ts, "Self-test message posted"),
                    Err(e) => report.issue(format!("Self-test post to {channel} failed: {e}")),
                }
            }
            None => info!("Skipping self-test post: no channel to post to"),
        }
    }

    if report.is_clean() {
        info!("Slack setup verified");
    } else {
        warn!(issues = report.issues.len(), "Slack setup has issues");
    }
    report
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use axum::Router;
    use axum::extract::Query;
    use axum::routing::{get, post};
    use secrecy::SecretString;
    use serde_json::{Value, json};
    use tokio::net::TcpListener;

    use super::*;
    use crate::pipeline::types::PublishMode;

    fn config(api_base: String, channels: &[&str], users: &[&str]) -> SlackConfig {
        SlackConfig {
            bot_token: SecretString::from("xoxb-test"),
            app_token: SecretString::from("xapp-test"),
            api_base,
            channel_ids: channels.iter().map(|s| s.to_string()).collect(),
            target_users: users.iter().map(|s| s.to_string()).collect(),
            publish_mode: PublishMode::Channel,
        }
    }

    type Posts = Arc<Mutex<Vec<Value>>>;

    /// Fake workspace: bot UBOT is in C1 only; users alice (U12345678A) and bob,
    /// listed on separate `users.list` pages.
    async fn fake_slack() -> (String, Posts) {
        let posts: Posts = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&posts);
        let app = Router::new()
            .route(
                "/api/auth.test",
                post(|| async {
                    axum::Json(json!({"ok": true, "user_id": "UBOT", "user": "genalpha", "team": "T"}))
                }),
            )
            .route(
                "/api/conversations.info",
                get(|Query(q): Query<HashMap<String, String>>| async move {
                    let id = q.get("channel").cloned().unwrap_or_default();
                    if id.starts_with('C') {
                        axum::Json(json!({"ok": true, "channel": {"id": id, "name": "general"}}))
                    } else {
                        axum::Json(json!({"ok": false, "error": "channel_not_found"}))
                    }
                }),
            )
            .route(
                "/api/conversations.members",
                get(|Query(q): Query<HashMap<String, String>>| async move {
                    let members = if q.get("channel").map(String::as_str) == Some("C1") {
                        vec!["UBOT", "U12345678A"]
                    } else {
                        vec!["U12345678A"]
                    };
                    axum::Json(json!({"ok": true, "members": members}))
                }),
            )
            .route(
                "/api/users.conversations",
                get(|| async {
                    axum::Json(json!({
                        "ok": true,
                        "channels": [{"id": "C1", "name": "general"}],
                        "response_metadata": {"next_cursor": ""}
                    }))
                }),
            )
            .route(
                "/api/users.info",
                get(|Query(q): Query<HashMap<String, String>>| async move {
                    match q.get("user").map(String::as_str) {
                        Some("U12345678A") => axum::Json(json!({
                            "ok": true,
                            "user": {"id": "U12345678A", "name": "alice"}
                        })),
                        _ => axum::Json(json!({"ok": false, "error": "user_not_found"})),
                    }
                }),
            )
            .route(
                "/api/users.list",
                get(|Query(q): Query<HashMap<String, String>>| async move {
                    if q.get("cursor").map(String::as_str) == Some("next") {
                        axum::Json(json!({
                            "ok": true,
                            "members": [{"id": "U87654321B", "name": "bob"}]
                        }))
                    } else {
                        axum::Json(json!({
                            "ok": true,
                            "members": [{"id": "U12345678A", "name": "alice"}],
                            "response_metadata": {"next_cursor": "next"}
                        }))
                    }
                }),
            )
            .route(
                "/api/chat.postMessage",
                post(move |axum::Json(body): axum::Json<Value>| {
                    let sink = Arc::clone(&sink);
                    async move {
                        sink.lock().unwrap().push(body);
                        axum::Json(json!({"ok": true, "channel": "C1", "ts": "5.0"}))
                    }
                }),
            );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://127.0.0.1:{port}/api"), posts)
    }

    #[test]
    fn user_id_shape() {
        assert!(looks_like_user_id("U12345678A"));
        assert!(!looks_like_user_id("U1234"));
        assert!(!looks_like_user_id("alice"));
    }

    #[tokio::test]
    async fn healthy_setup_has_no_issues() {
        let (base, posts) = fake_slack().await;
        let cfg = config(base, &["C1"], &["U12345678A", "bob"]);
        let client = SlackClient::new(&cfg).unwrap();

        let report = verify_setup(&client, &cfg, false).await;
        assert!(report.is_clean(), "unexpected issues: {:?}", report.issues);
        assert!(posts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn reports_missing_membership_and_unknown_users() {
        let (base, _) = fake_slack().await;
        let cfg = config(base, &["C2", "X9"], &["U00000000Z", "carol"]);
        let client = SlackClient::new(&cfg).unwrap();

        let report = verify_setup(&client, &cfg, false).await;
        assert_eq!(report.issues.len(), 4, "{:?}", report.issues);
        assert!(report.issues[0].contains("not a member of channel C2"));
        assert!(report.issues[1].contains("Cannot access channel X9"));
        assert!(report.issues[2].contains("U00000000Z"));
        assert!(report.issues[3].contains("carol"));
    }

    #[tokio::test]
    async fn all_channels_mode_lists_memberships() {
        let (base, _) = fake_slack().await;
        let cfg = config(base, &[], &["alice"]);
        let client = SlackClient::new(&cfg).unwrap();

        let report = verify_setup(&client, &cfg, false).await;
        assert!(report.is_clean(), "unexpected issues: {:?}", report.issues);
    }

    #[tokio::test]
    async fn self_test_in_all_channels_mode_posts_to_first_joined_channel() {
        let (base, posts) = fake_slack().await;
        let cfg = config(base, &[], &["alice"]);
        let client = SlackClient::new(&cfg).unwrap();

        let report = verify_setup(&client, &cfg, true).await;
        assert!(report.is_clean(), "unexpected issues: {:?}", report.issues);

        let posts = posts.lock().unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0]["channel"], "C1");
    }

    #[tokio::test]
    async fn self_test_posts_to_first_channel() {
        let (base, posts) = fake_slack().await;
        let cfg = config(base, &["C1"], &["alice"]);
        let client = SlackClient::new(&cfg).unwrap();

        let report = verify_setup(&client, &cfg, true).await;
        assert!(report.is_clean(), "unexpected issues: {:?}", report.issues);

        let posts = posts.lock().unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0]["channel"], "C1");
        assert!(posts[0]["text"].as_str().unwrap().contains("self-test"));
    }
}
