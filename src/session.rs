//! Telegram session backed by grammers
//!
//! Provides:
//! - File-based session locking to prevent two instances sharing a session
//! - Session file loading and interactive authorization
//! - The grammers implementation of [`MessagingClient`]

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use fs2::FileExt;
use grammers_client::client::updates::UpdatesLike;
use grammers_client::client::UpdatesConfiguration;
use grammers_client::types::update::{Message as UpdateMessage, Update};
use grammers_client::types::Message;
use grammers_client::{Client, SignInError};
use grammers_mtsender::{SenderPool, SenderPoolHandle};
use grammers_session::defs::PeerId;
use grammers_session::storages::SqliteSession;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::client::{
    Conversation, IncomingMessage, MessagingClient, Profile, ReplyTarget, Subscription,
    SubscriptionFilter,
};
use crate::config::Config;
use crate::error::{Error, Result};

const RUNNER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Path of the session database for a session name.
pub fn session_path(session_name: &str) -> PathBuf {
    PathBuf::from(format!("{}.session", session_name))
}

/// Path of the lock file guarding a session.
pub fn lock_path(session_name: &str) -> PathBuf {
    PathBuf::from(format!("{}.lock", session_name))
}

/// Session lock guard that ensures exclusive access to the Telegram session.
pub struct SessionLock {
    path: PathBuf,
    lock_file: Option<File>,
}

impl SessionLock {
    /// Acquire an exclusive lock on the session.
    pub fn acquire<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let lock_file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| Error::LockError(format!("Failed to open lock file: {}", e)))?;

        match lock_file.try_lock_exclusive() {
            Ok(()) => Ok(Self {
                path,
                lock_file: Some(lock_file),
            }),
            Err(_) => {
                eprintln!(
                    r#"
⚠️  ERROR: the Telegram session is already used by another process!

Running two clients on one session leads to conflicts and logouts.
Wait until the other process exits, or pick another SESSION_NAME.
"#
                );
                Err(Error::SessionLocked)
            }
        }
    }

    /// Release the lock manually
    pub fn release(&mut self) {
        if let Some(file) = self.lock_file.take() {
            let _ = file.unlock();
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        self.release();
    }
}

/// Open (or create) the session database.
pub fn open_session<P: AsRef<Path>>(path: P) -> Result<Arc<SqliteSession>> {
    let path = path.as_ref();
    if !path.exists() {
        info!("Session file {} not found, a new login will be required", path.display());
    }
    let session = SqliteSession::open(path)
        .map_err(|e| Error::Connection(format!("Failed to open session: {}", e)))?;
    Ok(Arc::new(session))
}

/// Read one trimmed line off the runtime thread.
async fn read_line<R>(mut reader: R) -> Result<String>
where
    R: BufRead + Send + 'static,
{
    let input = tokio::task::spawn_blocking(move || {
        let mut input = String::new();
        reader.read_line(&mut input).map(|_| input)
    })
    .await
    .map_err(|e| Error::Connection(format!("Failed to read input: {}", e)))??;
    Ok(input.trim().to_string())
}

async fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;

    read_line(BufReader::new(io::stdin())).await
}

/// Log in interactively: phone, login code, then 2FA password if required.
async fn authorize(client: &Client, config: &Config) -> Result<()> {
    let phone = match &config.phone {
        Some(phone) => phone.clone(),
        None => prompt("Enter your phone number (international format): ").await?,
    };

    println!("\n🔄 Requesting login code for {}...", phone);
    let token = client
        .request_login_code(&phone, &config.api_hash)
        .await
        .map_err(|e| Error::Connection(format!("Failed to request code: {}", e)))?;

    let code = prompt("Enter the code from Telegram: ").await?;

    let user = match client.sign_in(&token, &code).await {
        Ok(user) => user,
        Err(SignInError::PasswordRequired(password_token)) => {
            let password = prompt("Enter your 2FA password: ").await?;
            client
                .check_password(password_token, password.as_bytes())
                .await
                .map_err(|e| Error::Connection(format!("Failed to check password: {}", e)))?
        }
        Err(e) => return Err(Error::Connection(format!("Failed to sign in: {}", e))),
    };

    info!("Signed in as {}", user.full_name());
    Ok(())
}

/// Marked dialog id (negative for groups and channels).
fn dialog_id(peer_id: PeerId) -> i64 {
    peer_id.bot_api_dialog_id()
}

async fn wait_closed(closed: &mut watch::Receiver<bool>) {
    let _ = closed.wait_for(|closed| *closed).await;
}

struct TelegramReply(Message);

#[async_trait]
impl ReplyTarget for TelegramReply {
    async fn send_reply(&self, text: &str) -> Result<()> {
        self.0.reply(text.to_string()).await?;
        Ok(())
    }
}

/// New-message updates wrap the message; the reply target keeps a plain copy.
fn incoming_from(update: &UpdateMessage) -> IncomingMessage {
    let msg = Message::clone(update);
    let (sender_id, sender_name) = msg
        .sender()
        .map(|peer| (dialog_id(peer.id()), peer.name().map(str::to_string)))
        .unwrap_or((0, None));

    IncomingMessage {
        id: msg.id(),
        text: msg.text().to_string(),
        sender_id,
        sender_name,
        conversation_id: dialog_id(msg.peer_id()),
        reply_to: Arc::new(TelegramReply(msg)),
    }
}

/// Connected grammers client.
pub struct TelegramSession {
    client: Client,
    handle: SenderPoolHandle,
    updates: Mutex<Option<mpsc::UnboundedReceiver<UpdatesLike>>>,
    runner: Mutex<Option<JoinHandle<()>>>,
    closed: watch::Sender<bool>,
    _session: Arc<SqliteSession>,
    _lock: SessionLock,
}

impl TelegramSession {
    /// Lock and open the configured session, connect, and log in if needed.
    pub async fn connect(config: &Config) -> Result<Self> {
        let session_name = &config.tracking.session_name;
        let lock = SessionLock::acquire(lock_path(session_name))?;
        let session = open_session(session_path(session_name))?;

        let pool = SenderPool::new(Arc::clone(&session), config.api_id);
        let client = Client::new(&pool);
        let SenderPool {
            runner,
            updates,
            handle,
        } = pool;

        let runner_handle = tokio::spawn(async move {
            runner.run().await;
        });

        let (closed, _) = watch::channel(false);
        let telegram = Self {
            client,
            handle,
            updates: Mutex::new(Some(updates)),
            runner: Mutex::new(Some(runner_handle)),
            closed,
            _session: session,
            _lock: lock,
        };

        let authorized = match telegram.client.is_authorized().await {
            Ok(authorized) => authorized,
            Err(e) => {
                telegram.disconnect().await;
                return Err(Error::Connection(e.to_string()));
            }
        };
        if !authorized {
            if let Err(e) = authorize(&telegram.client, config).await {
                telegram.disconnect().await;
                return Err(e);
            }
        }

        info!(session = %session_name, "Connected to Telegram");
        Ok(telegram)
    }

    fn take_updates(&self) -> Option<mpsc::UnboundedReceiver<UpdatesLike>> {
        self.updates.lock().ok().and_then(|mut updates| updates.take())
    }
}

#[async_trait]
impl MessagingClient for TelegramSession {
    async fn profile(&self) -> Result<Profile> {
        let me = self.client.get_me().await?;
        Ok(Profile {
            id: me.raw.id(),
            full_name: me.full_name(),
            username: me.username().map(str::to_string),
            phone: me.phone().map(str::to_string),
            bot: me.is_bot(),
        })
    }

    async fn conversations(&self) -> Result<Vec<Conversation>> {
        let mut conversations = Vec::new();
        let mut dialogs = self.client.iter_dialogs();

        while let Some(dialog) = dialogs.next().await? {
            let peer = &dialog.peer;
            conversations.push(Conversation {
                id: dialog_id(peer.id()),
                name: peer.name().unwrap_or("Unknown").to_string(),
            });
        }

        Ok(conversations)
    }

    async fn subscribe(&self, filter: SubscriptionFilter) -> Result<Subscription> {
        let updates_rx = self.take_updates().ok_or_else(|| {
            Error::Connection("updates stream already taken by another subscription".into())
        })?;

        let updates = self.client.stream_updates(
            updates_rx,
            UpdatesConfiguration {
                catch_up: false,
                ..Default::default()
            },
        );

        let stream = futures::stream::unfold(
            (updates, self.closed.subscribe(), filter),
            |(mut updates, mut closed, filter)| async move {
                loop {
                    tokio::select! {
                        _ = wait_closed(&mut closed) => {
                            updates.sync_update_state();
                            return None;
                        }
                        update = updates.next() => match update {
                            Ok(Update::NewMessage(msg)) if !msg.outgoing() => {
                                let incoming = incoming_from(&msg);
                                if filter.allows(incoming.conversation_id, incoming.sender_id) {
                                    return Some((incoming, (updates, closed, filter)));
                                }
                            }
                            Ok(_) => {}
                            Err(err) => {
                                error!("Failed to receive updates: {}", err);
                                updates.sync_update_state();
                                return None;
                            }
                        }
                    }
                }
            },
        );

        Ok(Subscription::from_stream(stream))
    }

    async fn disconnect(&self) {
        self.closed.send_replace(true);
        let _ = self.handle.quit();

        let runner = self.runner.lock().ok().and_then(|mut runner| runner.take());
        if let Some(runner) = runner {
            if tokio::time::timeout(RUNNER_SHUTDOWN_TIMEOUT, runner)
                .await
                .is_err()
            {
                warn!("Sender pool did not stop in time");
            }
        }
    }
}
