//! Messaging client abstraction
//!
//! The session controller talks to Telegram only through [`MessagingClient`],
//! so the event loop can run against the real grammers session or an
//! in-memory fake.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{LocalBoxStream, Stream, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::error::Result;

/// Something an incoming message can be answered through.
#[async_trait]
pub trait ReplyTarget: Send + Sync {
    async fn send_reply(&self, text: &str) -> Result<()>;
}

/// A message delivered by a subscription.
#[derive(Clone)]
pub struct IncomingMessage {
    pub id: i32,
    /// Empty when the message has no text body.
    pub text: String,
    pub sender_id: i64,
    pub sender_name: Option<String>,
    pub conversation_id: i64,
    pub reply_to: Arc<dyn ReplyTarget>,
}

impl IncomingMessage {
    pub async fn reply(&self, text: &str) -> Result<()> {
        self.reply_to.send_reply(text).await
    }

    /// Human-readable sender for log lines.
    pub fn sender_label(&self) -> String {
        match &self.sender_name {
            Some(name) => format!("{} ({})", name, self.sender_id),
            None => self.sender_id.to_string(),
        }
    }
}

impl fmt::Debug for IncomingMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IncomingMessage")
            .field("id", &self.id)
            .field("text", &self.text)
            .field("sender_id", &self.sender_id)
            .field("sender_name", &self.sender_name)
            .field("conversation_id", &self.conversation_id)
            .finish()
    }
}

/// Which conversations and senders a subscription delivers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionFilter {
    pub conversation_ids: BTreeSet<i64>,
    pub sender_ids: BTreeSet<i64>,
}

impl SubscriptionFilter {
    /// Empty id sets place no restriction.
    pub fn allows(&self, conversation_id: i64, sender_id: i64) -> bool {
        (self.conversation_ids.is_empty() || self.conversation_ids.contains(&conversation_id))
            && (self.sender_ids.is_empty() || self.sender_ids.contains(&sender_id))
    }
}

/// Stream of filtered incoming messages.
///
/// Yields `None` once the underlying session has disconnected.
pub struct Subscription {
    stream: LocalBoxStream<'static, IncomingMessage>,
}

impl Subscription {
    /// Subscription fed through a channel; ends when every sender is dropped.
    pub fn new(receiver: mpsc::UnboundedReceiver<IncomingMessage>) -> Self {
        Self::from_stream(futures::stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|message| (message, receiver))
        }))
    }

    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = IncomingMessage> + 'static,
    {
        Self {
            stream: stream.boxed_local(),
        }
    }

    pub async fn next(&mut self) -> Option<IncomingMessage> {
        self.stream.next().await
    }
}

/// Profile of the logged-in account.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Profile {
    pub id: i64,
    pub full_name: String,
    pub username: Option<String>,
    pub phone: Option<String>,
    pub bot: bool,
}

/// A dialog visible to the account.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Conversation {
    pub id: i64,
    pub name: String,
}

impl Conversation {
    /// Bot chats are left out of listings.
    pub fn is_bot(&self) -> bool {
        self.name.to_lowercase().ends_with("bot")
    }
}

/// Connected session to the messaging platform.
#[async_trait]
pub trait MessagingClient: Send + Sync {
    async fn profile(&self) -> Result<Profile>;

    async fn conversations(&self) -> Result<Vec<Conversation>>;

    /// Start delivering incoming messages that pass `filter`.
    async fn subscribe(&self, filter: SubscriptionFilter) -> Result<Subscription>;

    /// Close the connection. Ends every open subscription.
    async fn disconnect(&self);
}
