use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::error::{DeliveryError, FanOutError};
use crate::models::MessageUnit;
use crate::storage::{ChatId, ChatRegistry};

/// Sends one message unit to one recipient.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, chat_id: ChatId, unit: &MessageUnit) -> Result<(), DeliveryError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: usize,
    /// Chats deregistered because they revoked access.
    pub removed: Vec<ChatId>,
}

/// Delivers `units` in order to every registered chat, one chat at a time.
///
/// A chat that revoked access is deregistered and receives nothing more.
/// A rejected bot token stops the whole fan-out; the chat that saw it is
/// not deregistered and no further chat is contacted. Any other failure abandons the remaining units for that chat only.
pub async fn fan_out(
    units: &[MessageUnit],
    transport: &dyn Transport,
    registry: &dyn ChatRegistry,
) -> Result<DeliveryReport, FanOutError> {
    let mut report = DeliveryReport::default();
    let mut pending_removal = Vec::new();

    for (chat_id, _) in registry.chats().await? {
        match send_all(units, chat_id, transport).await {
            Ok(()) => report.delivered += 1,
            Err(DeliveryError::Unauthorized(reason)) => {
                info!(chat_id, %reason, "chat revoked access, deregistering");
                report.failed += 1;
                match registry.remove(chat_id).await {
                    Ok(_) => report.removed.push(chat_id),
                    Err(err) => {
                        warn!(chat_id, error = %err, "failed to deregister chat");
                        pending_removal.push(chat_id);
                    }
                }
            }
            Err(DeliveryError::Token(reason)) => {
                error!(chat_id, %reason, "bot token rejected, aborting fan-out");
                return Err(FanOutError::Token(reason));
            }
            Err(err) => {
                warn!(chat_id, error = %err, "delivery failed");
                report.failed += 1;
            }
        }
    }

    for chat_id in pending_removal {
        registry.remove(chat_id).await?;
        report.removed.push(chat_id);
    }

    info!(
        delivered = report.delivered,
        failed = report.failed,
        removed = report.removed.len(),
        "fan-out finished"
    );
    Ok(report)
}

async fn send_all(
    units: &[MessageUnit],
    chat_id: ChatId,
    transport: &dyn Transport,
) -> Result<(), DeliveryError> {
    for unit in units {
        transport.send(chat_id, unit).await?;
    }
    Ok(())
}
