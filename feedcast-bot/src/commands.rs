//! Chat self-registration through `/start` and `/stop`.

use std::sync::Arc;
use std::time::Duration;

use feedcast_core::{
    escape_text, ChatMetadata, ChatRegistry, DeliveryError, JsonChatRegistry, MessageUnit,
    StorageError, Strings, Transport,
};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::telegram::{TelegramTransport, Update};

const LONG_POLL_SECONDS: u64 = 30;
const ERROR_PAUSE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotCommand {
    Start,
    Stop,
}

impl BotCommand {
    /// Recognises `/start` and `/stop`, with or without a `@botname` suffix.
    pub fn parse(text: &str) -> Option<Self> {
        let word = text.split_whitespace().next()?;
        let name = word.strip_prefix('/')?;
        let name = name.split_once('@').map_or(name, |(name, _)| name);
        match name {
            "start" => Some(Self::Start),
            "stop" => Some(Self::Stop),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replies {
    pub subscribed: String,
    pub unsubscribed: String,
}

impl Replies {
    pub fn new(strings: &Strings, language: &str) -> Self {
        let get = |name| strings.get(language, name).unwrap_or_default();
        Self {
            subscribed: get("subscribed"),
            unsubscribed: get("unsubscribed"),
        }
    }
}

/// Applies the command carried by `update`, if any, and acknowledges it.
///
/// A failed acknowledgement is logged; only registry failures are returned.
pub async fn handle_update(
    update: &Update,
    registry: &JsonChatRegistry,
    transport: &dyn Transport,
    replies: &Replies,
) -> Result<Option<BotCommand>, StorageError> {
    let Some(message) = &update.message else {
        return Ok(None);
    };
    let Some(command) = message.text.as_deref().and_then(BotCommand::parse) else {
        return Ok(None);
    };
    let chat = &message.chat;

    let reply = match command {
        BotCommand::Start => {
            let mut metadata = ChatMetadata::new(chat.display_name());
            metadata.kind = Some(chat.kind.clone());
            if registry.add(chat.id, metadata).await? {
                info!(chat_id = chat.id, kind = %chat.kind, "chat subscribed");
            }
            &replies.subscribed
        }
        BotCommand::Stop => {
            if registry.remove(chat.id).await? {
                info!(chat_id = chat.id, "chat unsubscribed");
            }
            &replies.unsubscribed
        }
    };

    if !reply.is_empty() {
        let unit = MessageUnit::text(escape_text(reply));
        if let Err(err) = transport.send(chat.id, &unit).await {
            warn!(chat_id = chat.id, error = %err, "failed to acknowledge command");
        }
    }
    Ok(Some(command))
}

pub struct ListenerHandle {
    cancel_tx: broadcast::Sender<()>,
    join: JoinHandle<()>,
}

impl ListenerHandle {
    /// Stops listening; an in-flight long poll is abandoned.
    pub async fn stop(self) -> Result<(), tokio::task::JoinError> {
        let _ = self.cancel_tx.send(());
        self.join.await
    }
}

/// Long-polls for updates and applies registration commands until stopped.
pub fn spawn_listener(
    transport: Arc<TelegramTransport>,
    registry: JsonChatRegistry,
    replies: Replies,
) -> ListenerHandle {
    let (cancel_tx, mut cancel_rx) = broadcast::channel(1);
    let join = tokio::spawn(async move {
        let mut offset = 0;
        loop {
            let updates = tokio::select! {
                biased;
                _ = cancel_rx.recv() => break,
                updates = transport.get_updates(offset, LONG_POLL_SECONDS) => updates,
            };
            match updates {
                Ok(updates) => {
                    for update in &updates {
                        offset = offset.max(update.update_id + 1);
                        if let Err(err) =
                            handle_update(update, &registry, transport.as_ref(), &replies).await
                        {
                            error!(error = %err, "failed to update chat registry");
                        }
                    }
                }
                Err(DeliveryError::Token(reason)) => {
                    error!(%reason, "bot token rejected, no longer listening for commands");
                    break;
                }
                Err(err) => {
                    warn!(error = %err, "failed to fetch updates");
                    tokio::select! {
                        biased;
                        _ = cancel_rx.recv() => break,
                        _ = tokio::time::sleep(ERROR_PAUSE) => {}
                    }
                }
            }
        }
        debug!("command listener stopped");
    });

    ListenerHandle { cancel_tx, join }
}
