//! Session controller
//!
//! Owns the connection lifecycle:
//! `Connected -> Listening -> Disconnecting -> Disconnected`.
//! All tasks (listener, disconnect timer, diagnostics) borrow the controller
//! and interleave on one runtime thread; disconnecting the shared session is
//! the only way to stop the listener.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::client::{Conversation, MessagingClient, Profile, SubscriptionFilter};
use crate::error::{Error, Result};
use crate::handler::{wait_for_shutdown, AutoReplyHandler};
use crate::metrics;
use crate::pattern::Matcher;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Listening,
    Disconnecting,
    Disconnected,
}

impl SessionState {
    pub fn is_shutting_down(&self) -> bool {
        matches!(self, SessionState::Disconnecting | SessionState::Disconnected)
    }
}

/// How a supervised run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Interrupted,
}

pub struct SessionController {
    client: Arc<dyn MessagingClient>,
    matcher: Arc<Matcher>,
    state: watch::Sender<SessionState>,
}

impl SessionController {
    /// Wrap an already connected client.
    pub fn new(client: Arc<dyn MessagingClient>, matcher: Matcher) -> Self {
        let (state, _) = watch::channel(SessionState::Connected);
        Self {
            client,
            matcher: Arc::new(matcher),
            state,
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn matcher(&self) -> &Matcher {
        &self.matcher
    }

    /// Swap the active pattern. Requires exclusive access, so it can only
    /// happen while no listener is borrowing the controller.
    pub fn replace_pattern(&mut self, matcher: Matcher) {
        info!(pattern = matcher.as_str(), "Pattern replaced");
        self.matcher = Arc::new(matcher);
    }

    /// Listen for messages passing `filter` until the session disconnects.
    pub async fn run(&self, filter: SubscriptionFilter) -> Result<()> {
        if self.state().is_shutting_down() {
            return Err(Error::Connection("session is not connected".to_string()));
        }

        println!("Starting bot...");
        let mut subscription = self.client.subscribe(filter).await?;

        let listening = self.state.send_if_modified(|state| {
            if *state == SessionState::Connected {
                *state = SessionState::Listening;
                true
            } else {
                false
            }
        });
        if !listening && self.state().is_shutting_down() {
            debug!("Session closed before listening started");
            return Ok(());
        }

        println!("Bot started:");
        info!(pattern = self.matcher.as_str(), "Listening for messages");
        metrics::set_listening(true);

        let handler = AutoReplyHandler::new(Arc::clone(&self.matcher), self.state.subscribe());
        let mut shutdown = self.state.subscribe();
        let mut in_flight = FuturesUnordered::new();

        loop {
            tokio::select! {
                message = subscription.next() => match message {
                    Some(message) => in_flight.push(handler.handle(message)),
                    None => {
                        info!("Subscription closed by transport");
                        break;
                    }
                },
                Some(_) = in_flight.next(), if !in_flight.is_empty() => {}
                _ = wait_for_shutdown(&mut shutdown) => break,
            }
        }

        // Handlers still waiting out their delay observe the shutdown and stand down.
        while in_flight.next().await.is_some() {}
        metrics::set_listening(false);

        self.disconnect().await;
        Ok(())
    }

    /// Disconnect the shared session. Only the first call has an effect.
    pub async fn disconnect(&self) -> bool {
        let initiated = self.state.send_if_modified(|state| {
            if state.is_shutting_down() {
                false
            } else {
                *state = SessionState::Disconnecting;
                true
            }
        });

        if !initiated {
            debug!("Disconnect already performed");
            return false;
        }

        info!("Disconnecting");
        self.client.disconnect().await;
        self.state.send_replace(SessionState::Disconnected);
        true
    }

    /// Disconnect after `after_seconds`. Values `<= 0` schedule nothing.
    /// Returns early if the session closes for another reason.
    pub async fn schedule_disconnect(&self, after_seconds: i64) {
        if after_seconds <= 0 {
            return;
        }

        let mut state = self.state.subscribe();
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(after_seconds as u64)) => {
                println!("Finishing bot...");
                info!(after_seconds, "Timer elapsed");
                self.disconnect().await;
            }
            _ = wait_for_shutdown(&mut state) => {}
        }
    }

    /// Print the account profile.
    pub async fn show_profile(&self) -> Result<Profile> {
        let profile = self.client.profile().await?;
        println!("{}", serde_json::to_string_pretty(&profile)?);
        Ok(profile)
    }

    /// Print non-bot conversations, optionally only those in `filter_ids`.
    pub async fn list_conversations(
        &self,
        filter_ids: Option<&BTreeSet<i64>>,
    ) -> Result<Vec<Conversation>> {
        let conversations: Vec<Conversation> = self
            .client
            .conversations()
            .await?
            .into_iter()
            .filter(|c| !c.is_bot())
            .filter(|c| filter_ids.map_or(true, |ids| ids.contains(&c.id)))
            .collect();

        for conversation in &conversations {
            println!("chat '{}' -> ID: {}", conversation.name, conversation.id);
        }

        Ok(conversations)
    }

    /// Drive `work` until it finishes or `interrupt` fires, then disconnect.
    pub async fn supervise<W, I>(&self, work: W, interrupt: I) -> RunOutcome
    where
        W: Future<Output = ()>,
        I: Future<Output = ()>,
    {
        let outcome = tokio::select! {
            _ = work => RunOutcome::Completed,
            _ = interrupt => {
                warn!("Interrupted, disconnecting");
                RunOutcome::Interrupted
            }
        };

        self.disconnect().await;
        outcome
    }
}
