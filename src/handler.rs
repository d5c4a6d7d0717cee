//! Auto-reply handler
//!
//! Invoked once per message delivered by the subscription. A matching
//! message is answered with [`REPLY_TEXT`] after [`REPLY_DELAY`]; anything
//! else is logged as skipped. Failures never leave the handler.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::client::IncomingMessage;
use crate::controller::SessionState;
use crate::error::Error;
use crate::metrics;
use crate::pattern::Matcher;

pub const REPLY_TEXT: &str = "+";
pub const REPLY_DELAY: Duration = Duration::from_secs(1);

/// What the handler did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyOutcome {
    Replied,
    Skipped,
    /// Matched, but the session started disconnecting before the reply went out.
    Suppressed,
    Failed,
}

impl ReplyOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplyOutcome::Replied => "replied",
            ReplyOutcome::Skipped => "skipped",
            ReplyOutcome::Suppressed => "suppressed",
            ReplyOutcome::Failed => "failed",
        }
    }
}

pub struct AutoReplyHandler {
    matcher: Arc<Matcher>,
    state: watch::Receiver<SessionState>,
    delay: Duration,
    reply_text: String,
}

impl AutoReplyHandler {
    /// `matcher` is a snapshot; replacing the controller's pattern later
    /// does not affect this handler.
    pub fn new(matcher: Arc<Matcher>, state: watch::Receiver<SessionState>) -> Self {
        Self {
            matcher,
            state,
            delay: REPLY_DELAY,
            reply_text: REPLY_TEXT.to_string(),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub async fn handle(&self, message: IncomingMessage) -> ReplyOutcome {
        let outcome = self.process(&message).await;
        metrics::record_outcome(outcome);
        outcome
    }

    async fn process(&self, message: &IncomingMessage) -> ReplyOutcome {
        if !self.matcher.matches(&message.text) {
            debug!(
                sender = %message.sender_label(),
                chat = message.conversation_id,
                "Skipped message: {:?}",
                message.text
            );
            return ReplyOutcome::Skipped;
        }

        let mut state = self.state.clone();
        tokio::select! {
            _ = tokio::time::sleep(self.delay) => {}
            _ = wait_for_shutdown(&mut state) => {
                info!(sender = %message.sender_label(), "Session closing, reply suppressed");
                return ReplyOutcome::Suppressed;
            }
        }

        if state.borrow().is_shutting_down() {
            info!(sender = %message.sender_label(), "Session closing, reply suppressed");
            return ReplyOutcome::Suppressed;
        }

        match message.reply(&self.reply_text).await {
            Ok(()) => {
                info!(
                    sender = %message.sender_label(),
                    chat = message.conversation_id,
                    message_id = message.id,
                    "Bot replied to: {:?}",
                    message.text
                );
                ReplyOutcome::Replied
            }
            Err(err) => {
                let err = Error::ReplyDelivery(err.to_string());
                error!(
                    sender = %message.sender_label(),
                    chat = message.conversation_id,
                    "{}",
                    err
                );
                ReplyOutcome::Failed
            }
        }
    }
}

/// Resolves once the session leaves the listening states.
pub(crate) async fn wait_for_shutdown(state: &mut watch::Receiver<SessionState>) {
    // A dropped sender means the controller is gone.
    let _ = state.wait_for(SessionState::is_shutting_down).await;
}
