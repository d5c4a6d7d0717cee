//! Integration tests for telegram_autoplus library
//!
//! These tests drive the session controller against an in-memory client.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;

use telegram_autoplus::{
    config::YamlConfig, parse_id_list, Config, Conversation, Error, IncomingMessage, Matcher,
    MessagingClient, Profile, ReplyTarget, Result, RunOutcome, SessionController, SessionState,
    Subscription, SubscriptionFilter, REPLY_DELAY, REPLY_TEXT,
};

// ============================================================================
// In-memory client
// ============================================================================

#[derive(Default)]
struct MemoryClient {
    inbox: Mutex<Option<mpsc::UnboundedSender<IncomingMessage>>>,
    filter: Mutex<SubscriptionFilter>,
    replies: Arc<Mutex<Vec<(i32, String, Instant)>>>,
    /// Message ids whose replies are rejected by the platform.
    rejected: Mutex<BTreeSet<i32>>,
    disconnects: AtomicUsize,
}

struct MemoryReply {
    message_id: i32,
    rejected: bool,
    sent: Arc<Mutex<Vec<(i32, String, Instant)>>>,
}

#[async_trait]
impl ReplyTarget for MemoryReply {
    async fn send_reply(&self, text: &str) -> Result<()> {
        if self.rejected {
            return Err(Error::ReplyDelivery("chat write forbidden".into()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((self.message_id, text.to_string(), Instant::now()));
        Ok(())
    }
}

impl MemoryClient {
    /// Deliver a message the way the transport would: only if it passes the
    /// subscription filter.
    fn deliver(&self, id: i32, conversation_id: i64, sender_id: i64, text: &str) {
        if !self.filter.lock().unwrap().allows(conversation_id, sender_id) {
            return;
        }
        let message = IncomingMessage {
            id,
            text: text.to_string(),
            sender_id,
            sender_name: Some("Player".into()),
            conversation_id,
            reply_to: Arc::new(MemoryReply {
                message_id: id,
                rejected: self.rejected.lock().unwrap().contains(&id),
                sent: Arc::clone(&self.replies),
            }),
        };
        if let Some(inbox) = self.inbox.lock().unwrap().as_ref() {
            let _ = inbox.send(message);
        }
    }

    fn reject_replies_to(&self, id: i32) {
        self.rejected.lock().unwrap().insert(id);
    }

    fn replies(&self) -> Vec<(i32, String, Instant)> {
        self.replies.lock().unwrap().clone()
    }

    fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessagingClient for MemoryClient {
    async fn profile(&self) -> Result<Profile> {
        Ok(Profile {
            id: 5,
            full_name: "Ivan Petrov".into(),
            username: None,
            phone: Some("+10000000000".into()),
            bot: false,
        })
    }

    async fn conversations(&self) -> Result<Vec<Conversation>> {
        Ok(vec![Conversation {
            id: -100200,
            name: "Volleyball Club".into(),
        }])
    }

    async fn subscribe(&self, filter: SubscriptionFilter) -> Result<Subscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.inbox.lock().unwrap() = Some(tx);
        *self.filter.lock().unwrap() = filter;
        Ok(Subscription::new(rx))
    }

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.inbox.lock().unwrap().take();
    }
}

fn setup(pattern: &str) -> (SessionController, Arc<MemoryClient>) {
    let client = Arc::new(MemoryClient::default());
    let controller = SessionController::new(client.clone(), Matcher::compile(pattern).unwrap());
    (controller, client)
}

// ============================================================================
// Auto-reply scenarios
// ============================================================================

#[tokio::test(start_paused = true)]
async fn training_announcement_gets_plus_after_delay() {
    let (controller, client) = setup(".*training.*");
    let mut delivered_at = None;

    let feed = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        delivered_at = Some(Instant::now());
        client.deliver(1, 100, 7, "Training today at 7pm");
    };
    let (result, (), ()) = tokio::join!(
        controller.run(SubscriptionFilter::default()),
        controller.schedule_disconnect(10),
        feed
    );
    result.unwrap();

    let replies = client.replies();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].0, 1);
    assert_eq!(replies[0].1, REPLY_TEXT);
    assert!(replies[0].2 - delivered_at.unwrap() >= REPLY_DELAY);
}

#[tokio::test(start_paused = true)]
async fn coffee_question_is_skipped() {
    let (controller, client) = setup(".*training.*");

    let feed = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        client.deliver(1, 100, 7, "Anyone up for coffee?");
    };
    let (result, (), ()) = tokio::join!(
        controller.run(SubscriptionFilter::default()),
        controller.schedule_disconnect(10),
        feed
    );
    result.unwrap();

    assert!(client.replies().is_empty());
}

#[tokio::test(start_paused = true)]
async fn burst_of_messages_each_get_exactly_one_reply() {
    let (controller, client) = setup(".*training.*");

    let feed = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        client.deliver(1, 100, 7, "training at 7");
        client.deliver(2, 100, 8, "no thanks");
        client.deliver(3, 100, 9, "TRAINING\nmoved to 8");
    };
    let (result, (), ()) = tokio::join!(
        controller.run(SubscriptionFilter::default()),
        controller.schedule_disconnect(10),
        feed
    );
    result.unwrap();

    let mut ids: Vec<i32> = client.replies().iter().map(|r| r.0).collect();
    ids.sort();
    assert_eq!(ids, vec![1, 3]);
}

#[tokio::test(start_paused = true)]
async fn only_tracked_chats_and_senders_are_answered() {
    let (controller, client) = setup(".*");
    let filter = SubscriptionFilter {
        conversation_ids: parse_id_list("100,200,", "CHAT_IDS").unwrap(),
        sender_ids: parse_id_list("7,", "USER_IDS").unwrap(),
    };

    let feed = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        client.deliver(1, 100, 7, "tracked");
        client.deliver(2, 300, 7, "other chat");
        client.deliver(3, 200, 8, "other sender");
        client.deliver(4, 200, 7, "tracked too");
    };
    let (result, (), ()) = tokio::join!(
        controller.run(filter),
        controller.schedule_disconnect(10),
        feed
    );
    result.unwrap();

    let mut ids: Vec<i32> = client.replies().iter().map(|r| r.0).collect();
    ids.sort();
    assert_eq!(ids, vec![1, 4]);
}

#[tokio::test(start_paused = true)]
async fn failed_reply_does_not_stop_later_replies() {
    let (controller, client) = setup(".*training.*");
    client.reject_replies_to(1);

    let feed = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        client.deliver(1, 100, 7, "training at 7");
        // Arrives after the first reply attempt has already failed.
        tokio::time::sleep(Duration::from_secs(2)).await;
        client.deliver(2, 100, 7, "training moved to 8");
    };
    let (result, (), ()) = tokio::join!(
        controller.run(SubscriptionFilter::default()),
        controller.schedule_disconnect(10),
        feed
    );
    result.unwrap();

    let ids: Vec<i32> = client.replies().iter().map(|r| r.0).collect();
    assert_eq!(ids, vec![2]);
    assert_eq!(client.disconnects(), 1);
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test(start_paused = true)]
async fn timer_disconnects_once_after_requested_seconds() {
    let (controller, client) = setup(".*");
    let started = Instant::now();

    let (result, ()) = tokio::join!(
        controller.run(SubscriptionFilter::default()),
        controller.schedule_disconnect(15)
    );
    result.unwrap();

    assert!(started.elapsed() >= Duration::from_secs(15));
    assert_eq!(client.disconnects(), 1);
    assert_eq!(controller.state(), SessionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn zero_timer_runs_until_interrupt_then_disconnects_once() {
    let (controller, client) = setup(".*");
    let started = Instant::now();

    let work = async {
        let (result, ()) = tokio::join!(
            controller.run(SubscriptionFilter::default()),
            controller.schedule_disconnect(0)
        );
        result.unwrap();
    };
    let interrupt = tokio::time::sleep(Duration::from_secs(600));

    let outcome = controller.supervise(work, interrupt).await;

    assert_eq!(outcome, RunOutcome::Interrupted);
    assert!(started.elapsed() >= Duration::from_secs(600));
    assert_eq!(client.disconnects(), 1);

    // A late second disconnect is a no-op.
    assert!(!controller.disconnect().await);
    assert_eq!(client.disconnects(), 1);
}

#[tokio::test(start_paused = true)]
async fn diagnostics_run_alongside_listener() {
    let (controller, client) = setup(".*");

    let diagnostics = async {
        let profile = controller.show_profile().await.unwrap();
        let chats = controller.list_conversations(None).await.unwrap();
        (profile, chats)
    };
    let (result, (), (profile, chats)) = tokio::join!(
        controller.run(SubscriptionFilter::default()),
        controller.schedule_disconnect(1),
        diagnostics
    );
    result.unwrap();

    assert_eq!(profile.full_name, "Ivan Petrov");
    assert_eq!(chats.len(), 1);
    assert_eq!(client.disconnects(), 1);
}

#[tokio::test(start_paused = true)]
async fn pattern_replaced_between_runs_applies_to_next_run() {
    let client = Arc::new(MemoryClient::default());
    let mut controller =
        SessionController::new(client.clone(), Matcher::compile(".*training.*").unwrap());

    controller.replace_pattern(Matcher::compile(".*game.*").unwrap());

    let feed = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        client.deliver(1, 100, 7, "training");
        client.deliver(2, 100, 7, "game tonight");
    };
    let (result, (), ()) = tokio::join!(
        controller.run(SubscriptionFilter::default()),
        controller.schedule_disconnect(5),
        feed
    );
    result.unwrap();

    let ids: Vec<i32> = client.replies().iter().map(|r| r.0).collect();
    assert_eq!(ids, vec![2]);
}

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn chat_ids_with_trailing_comma() {
    let ids = parse_id_list("100,200,", "CHAT_IDS").unwrap();
    assert_eq!(ids, BTreeSet::from([100, 200]));
}

#[test]
fn invalid_pattern_fails_before_connecting() {
    let lookup = |key: &str| match key {
        "API_ID" => Some("1".to_string()),
        "API_HASH" => Some("hash".to_string()),
        "PATTERN" => Some("([unclosed".to_string()),
        _ => None,
    };
    let config = Config::from_lookup(lookup, YamlConfig::default()).unwrap();

    assert!(matches!(config.tracking.matcher(), Err(Error::Configuration(_))));
}

#[test]
fn error_variants_display() {
    let errors = vec![
        Error::Configuration("bad".into()),
        Error::Connection("down".into()),
        Error::ReplyDelivery("forbidden".into()),
        Error::Interrupted,
        Error::SessionLocked,
        Error::LockError("lock".into()),
        Error::Telegram("api".into()),
        Error::Serialization("json".into()),
    ];

    for err in errors {
        assert!(!err.to_string().is_empty());
    }
}
