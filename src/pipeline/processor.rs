//! Message processor: filters, transforms and republishes Slack messages.
//!
//! Flow per message:
//! 1. Prescreen (channel + automated sender, no I/O)
//! 2. Author lookup
//! 3. Full filter decision
//! 4. Transformation
//! 5. Publish the formatted reply
//!
//! Any failure ends processing for that message only. Nothing is retried.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

use crate::error::PipelineError;
use crate::llm::Transformer;
use crate::pipeline::filter::{FilterConfig, Rejection};
use crate::pipeline::types::{InboundMessage, PostedMessage, PublishMode, Publisher, UserDirectory};

/// Build the published text for a transformed message.
pub fn format_reply(speaker: &str, transformed: &str) -> String {
    format!("*{speaker}'s message in Gen Alpha:*\n{transformed}")
}

/// What happened to a message that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Rejected(Rejection),
    Published(PostedMessage),
}

/// Processes one inbound message end to end.
pub struct MessageProcessor {
    filter: FilterConfig,
    users: Arc<dyn UserDirectory>,
    transformer: Arc<dyn Transformer>,
    publisher: Arc<dyn Publisher>,
    publish_mode: PublishMode,
}

impl MessageProcessor {
    pub fn new(
        filter: FilterConfig,
        users: Arc<dyn UserDirectory>,
        transformer: Arc<dyn Transformer>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            filter,
            users,
            transformer,
            publisher,
            publish_mode: PublishMode::default(),
        }
    }

    pub fn with_publish_mode(mut self, mode: PublishMode) -> Self {
        self.publish_mode = mode;
        self
    }

    /// Run one message through the pipeline.
    ///
    /// A rejection is not an error. At most one publish happens per call.
    pub async fn handle(&self, msg: &InboundMessage) -> Result<Outcome, PipelineError> {
        if let Err(rejection) = self.filter.prescreen(msg) {
            return Ok(Outcome::Rejected(rejection));
        }

        let author = self
            .users
            .get_user_info(&msg.author_id)
            .await
            .map_err(PipelineError::AuthorLookup)?;

        if let Err(rejection) = self.filter.evaluate(msg, &author) {
            return Ok(Outcome::Rejected(rejection));
        }

        let speaker = author.effective_display_name();
        info!(
            channel = %msg.channel_id,
            user = %author.username,
            ts = %msg.timestamp,
            "Transforming message"
        );
        let transformed = self.transformer.transform(&msg.text, speaker).await?;

        let reply = format_reply(speaker, &transformed);
        let posted = self
            .publisher
            .publish(&msg.channel_id, &reply, self.publish_mode.thread_for(msg))
            .await
            .map_err(PipelineError::Publish)?;

        Ok(Outcome::Published(posted))
    }
}

/// Runs [`MessageProcessor::handle`] on its own task per message.
///
/// `dispatch` never waits on the pipeline, so the event stream keeps
/// acking while earlier messages are still being transformed.
#[derive(Clone)]
pub struct Dispatcher {
    processor: Arc<MessageProcessor>,
    tracker: TaskTracker,
}

impl Dispatcher {
    pub fn new(processor: Arc<MessageProcessor>) -> Self {
        Self {
            processor,
            tracker: TaskTracker::new(),
        }
    }

    /// Start processing `msg` in the background.
    pub fn dispatch(&self, msg: InboundMessage) -> JoinHandle<()> {
        let processor = Arc::clone(&self.processor);
        self.tracker.spawn(async move {
            match processor.handle(&msg).await {
                Ok(Outcome::Published(posted)) => {
                    info!(
                        channel = %posted.channel,
                        ts = %posted.ts,
                        source_ts = %msg.timestamp,
                        "Published transformed message"
                    );
                }
                Ok(Outcome::Rejected(rejection)) => {
                    debug!(
                        channel = %msg.channel_id,
                        user = %msg.author_id,
                        ts = %msg.timestamp,
                        reason = rejection.label(),
                        "Message filtered out"
                    );
                }
                Err(e) => {
                    error!(
                        channel = %msg.channel_id,
                        user = %msg.author_id,
                        ts = %msg.timestamp,
                        error = %e,
                        "Error processing message"
                    );
                }
            }
        })
    }

    /// Stop accepting work and wait for in-flight messages to finish.
    pub async fn shutdown(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use super::*;
    use crate::error::{ChannelError, TransformError};
    use crate::pipeline::types::AuthorProfile;

    // ── Mocks ───────────────────────────────────────────────────────

    #[derive(Default)]
    struct MockDirectory {
        users: HashMap<String, AuthorProfile>,
        calls: AtomicUsize,
    }

    impl MockDirectory {
        fn with(users: &[(&str, &str, Option<&str>)]) -> Self {
            let users = users
                .iter()
                .map(|(id, name, display)| {
                    (
                        id.to_string(),
                        AuthorProfile {
                            id: id.to_string(),
                            username: name.to_string(),
                            real_name: format!("{name} Real"),
                            display_name: display.map(String::from),
                        },
                    )
                })
                .collect();
            Self {
                users,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl UserDirectory for MockDirectory {
        async fn get_user_info(&self, user_id: &str) -> Result<AuthorProfile, ChannelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.users
                .get(user_id)
                .cloned()
                .ok_or_else(|| ChannelError::Api {
                    method: "users.info".into(),
                    error: "user_not_found".into(),
                })
        }
    }

    /// Transformer that appends "no cap", fails on "boom", and blocks on
    /// "hang" until released.
    #[derive(Default)]
    struct MockTransformer {
        calls: Mutex<Vec<(String, String)>>,
        release: Notify,
    }

    #[async_trait]
    impl Transformer for MockTransformer {
        async fn transform(&self, text: &str, speaker: &str) -> Result<String, TransformError> {
            self.calls
                .lock()
                .unwrap()
                .push((text.to_string(), speaker.to_string()));
            match text {
                "boom" => Err(TransformError::Status {
                    status: 500,
                    body: "upstream exploded".into(),
                }),
                "hang" => {
                    self.release.notified().await;
                    Ok("released".into())
                }
                _ => Ok(format!("{text} no cap")),
            }
        }
    }

    #[derive(Default)]
    struct MockPublisher {
        posts: Mutex<Vec<(String, String, Option<String>)>>,
        fail: bool,
    }

    #[async_trait]
    impl Publisher for MockPublisher {
        async fn publish(
            &self,
            channel_id: &str,
            text: &str,
            thread_ts: Option<&str>,
        ) -> Result<PostedMessage, ChannelError> {
            if self.fail {
                return Err(ChannelError::Api {
                    method: "chat.postMessage".into(),
                    error: "not_in_channel".into(),
                });
            }
            let mut posts = self.posts.lock().unwrap();
            posts.push((
                channel_id.to_string(),
                text.to_string(),
                thread_ts.map(String::from),
            ));
            Ok(PostedMessage {
                channel: channel_id.to_string(),
                ts: format!("9.{}", posts.len()),
            })
        }
    }

    struct Harness {
        directory: Arc<MockDirectory>,
        transformer: Arc<MockTransformer>,
        publisher: Arc<MockPublisher>,
        processor: MessageProcessor,
    }

    fn harness(publisher: MockPublisher) -> Harness {
        let directory = Arc::new(MockDirectory::with(&[
            ("U999", "bob", None),
            ("U123", "alice", Some("Alice A")),
            ("U555", "mallory", None),
        ]));
        let transformer = Arc::new(MockTransformer::default());
        let publisher = Arc::new(publisher);
        let processor = MessageProcessor::new(
            FilterConfig::new(["C1"], ["alice", "U999"]),
            directory.clone(),
            transformer.clone(),
            publisher.clone(),
        );
        Harness {
            directory,
            transformer,
            publisher,
            processor,
        }
    }

    fn message(channel: &str, user: &str, text: &str, ts: &str) -> InboundMessage {
        InboundMessage {
            channel_id: channel.into(),
            author_id: user.into(),
            text: text.into(),
            timestamp: ts.into(),
            thread_parent_timestamp: None,
            bot_marker: None,
            subtype: String::new(),
        }
    }

    // ── handle ──────────────────────────────────────────────────────

    #[test]
    fn reply_format() {
        assert_eq!(
            format_reply("bob", "henlo fr fr"),
            "*bob's message in Gen Alpha:*\nhenlo fr fr"
        );
    }

    #[tokio::test]
    async fn targeted_message_is_transformed_and_published() {
        let h = harness(MockPublisher::default());
        let out = h
            .processor
            .handle(&message("C1", "U999", "hello world", "1.0"))
            .await
            .unwrap();

        assert!(matches!(out, Outcome::Published(ref p) if p.channel == "C1"));
        assert_eq!(
            *h.transformer.calls.lock().unwrap(),
            vec![("hello world".to_string(), "bob".to_string())]
        );
        let posts = h.publisher.posts.lock().unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].0, "C1");
        assert_eq!(posts[0].1, "*bob's message in Gen Alpha:*\nhello world no cap");
        assert_eq!(posts[0].2, None);
    }

    #[tokio::test]
    async fn matches_by_username_and_uses_display_name() {
        let h = harness(MockPublisher::default());
        h.processor
            .handle(&message("C1", "U123", "hi", "1.0"))
            .await
            .unwrap();
        let posts = h.publisher.posts.lock().unwrap();
        assert_eq!(posts[0].1, "*Alice A's message in Gen Alpha:*\nhi no cap");
    }

    #[tokio::test]
    async fn unmonitored_channel_skips_all_calls() {
        let h = harness(MockPublisher::default());
        let out = h
            .processor
            .handle(&message("C2", "U999", "hi", "1.0"))
            .await
            .unwrap();
        assert_eq!(out, Outcome::Rejected(Rejection::ChannelNotMonitored));
        assert_eq!(h.directory.calls.load(Ordering::SeqCst), 0);
        assert!(h.transformer.calls.lock().unwrap().is_empty());
        assert!(h.publisher.posts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn untargeted_user_is_rejected_without_transform() {
        let h = harness(MockPublisher::default());
        let out = h
            .processor
            .handle(&message("C1", "U555", "hi", "1.0"))
            .await
            .unwrap();
        assert_eq!(out, Outcome::Rejected(Rejection::UserNotTargeted));
        assert!(h.transformer.calls.lock().unwrap().is_empty());
        assert!(h.publisher.posts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn bot_messages_never_loop() {
        let h = harness(MockPublisher::default());
        let mut msg = message("C1", "U999", "*bob's message in Gen Alpha:*\nx", "2.0");
        msg.bot_marker = Some("B1".into());
        let out = h.processor.handle(&msg).await.unwrap();
        assert_eq!(out, Outcome::Rejected(Rejection::Automated));
        assert_eq!(h.directory.calls.load(Ordering::SeqCst), 0);
        assert!(h.publisher.posts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn author_lookup_failure_aborts() {
        let h = harness(MockPublisher::default());
        let err = h
            .processor
            .handle(&message("C1", "U000", "hi", "1.0"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::AuthorLookup(_)));
        assert!(h.transformer.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn transform_failure_publishes_nothing() {
        let h = harness(MockPublisher::default());
        let err = h
            .processor
            .handle(&message("C1", "U999", "boom", "1.0"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Transform(_)));
        assert!(h.publisher.posts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn publish_failure_is_reported() {
        let h = harness(MockPublisher {
            fail: true,
            ..Default::default()
        });
        let err = h
            .processor
            .handle(&message("C1", "U999", "hi", "1.0"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Publish(_)));
        assert_eq!(h.transformer.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn thread_mode_replies_under_parent() {
        let h = harness(MockPublisher::default());
        let processor = h.processor.with_publish_mode(PublishMode::Thread);

        processor
            .handle(&message("C1", "U999", "top", "1.0"))
            .await
            .unwrap();
        let mut reply = message("C1", "U999", "in thread", "3.0");
        reply.thread_parent_timestamp = Some("2.0".into());
        processor.handle(&reply).await.unwrap();

        let posts = h.publisher.posts.lock().unwrap();
        assert_eq!(posts[0].2.as_deref(), Some("1.0"));
        assert_eq!(posts[1].2.as_deref(), Some("2.0"));
    }

    // ── Dispatcher ──────────────────────────────────────────────────

    #[tokio::test]
    async fn failure_in_one_message_does_not_affect_the_next() {
        let h = harness(MockPublisher::default());
        let publisher = h.publisher.clone();
        let dispatcher = Dispatcher::new(Arc::new(h.processor));

        dispatcher.dispatch(message("C1", "U999", "boom", "1.0"));
        dispatcher.dispatch(message("C1", "U999", "fine", "2.0"));
        dispatcher.shutdown().await;

        let posts = publisher.posts.lock().unwrap();
        assert_eq!(posts.len(), 1);
        assert!(posts[0].1.ends_with("fine no cap"));
    }

    #[tokio::test]
    async fn slow_transform_does_not_block_dispatch() {
        let h = harness(MockPublisher::default());
        let transformer = h.transformer.clone();
        let publisher = h.publisher.clone();
        let dispatcher = Dispatcher::new(Arc::new(h.processor));

        dispatcher.dispatch(message("C1", "U999", "hang", "1.0"));
        let quick = dispatcher.dispatch(message("C1", "U999", "quick", "2.0"));

        tokio::time::timeout(Duration::from_secs(5), quick)
            .await
            .expect("second message should finish while the first hangs")
            .unwrap();
        assert_eq!(publisher.posts.lock().unwrap().len(), 1);

        transformer.release.notify_one();
        dispatcher.shutdown().await;
        assert_eq!(publisher.posts.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn one_publish_per_dispatched_message() {
        let h = harness(MockPublisher::default());
        let publisher = h.publisher.clone();
        let dispatcher = Dispatcher::new(Arc::new(h.processor));

        for i in 0..5 {
            dispatcher.dispatch(message("C1", "U999", "hi", &format!("{i}.0")));
        }
        dispatcher.shutdown().await;
        assert_eq!(publisher.posts.lock().unwrap().len(), 5);
    }
}
