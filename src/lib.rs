//! Telegram Auto-responder Library
//!
//! Listens to selected Telegram chats and answers messages matching a
//! regular expression with a `+`. Also provides:
//! - Account profile and dialog listing for diagnostics
//! - `.env` / `config.yml` configuration
//! - Prometheus metrics for handled messages

pub mod client;
pub mod config;
pub mod controller;
pub mod error;
pub mod handler;
pub mod metrics;
pub mod pattern;
pub mod session;

// Re-export common types
pub use client::{
    Conversation, IncomingMessage, MessagingClient, Profile, ReplyTarget, Subscription,
    SubscriptionFilter,
};
pub use config::{parse_id_list, Config, TrackingConfig};
pub use controller::{RunOutcome, SessionController, SessionState};
pub use error::{Error, Result};
pub use handler::{AutoReplyHandler, ReplyOutcome, REPLY_DELAY, REPLY_TEXT};
pub use pattern::{Matcher, DEFAULT_GAME_PATTERN, DEFAULT_TRAINING_PATTERN};
pub use session::{SessionLock, TelegramSession};
