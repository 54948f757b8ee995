use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use feedcast_core::{
    fan_out, ChatId, ChatMetadata, ChatRegistry, DeliveryError, FanOutError, MessageUnit,
    StorageError, Transport,
};

#[derive(Default)]
struct Recorder {
    sent: Mutex<Vec<(ChatId, String)>>,
}

#[async_trait]
impl Transport for Recorder {
    async fn send(&self, chat_id: ChatId, unit: &MessageUnit) -> Result<(), DeliveryError> {
        match chat_id {
            401 => Err(DeliveryError::Token("Unauthorized".into())),
            403 => Err(DeliveryError::Unauthorized("bot was kicked".into())),
            500 if unit.text == "second" => Err(DeliveryError::Failed("timeout".into())),
            _ => {
                self.sent.lock().unwrap().push((chat_id, unit.text.clone()));
                Ok(())
            }
        }
    }
}

struct Registry {
    chats: Mutex<BTreeMap<ChatId, ChatMetadata>>,
    /// Number of removals to fail before succeeding.
    fail_removals: Mutex<u32>,
}

impl Registry {
    fn with(ids: &[ChatId], fail_removals: u32) -> Self {
        let meta = ChatMetadata {
            title: None,
            kind: None,
            added_at: Utc::now(),
        };
        Self {
            chats: Mutex::new(ids.iter().map(|id| (*id, meta.clone())).collect()),
            fail_removals: Mutex::new(fail_removals),
        }
    }
}

#[async_trait]
impl ChatRegistry for Registry {
    async fn chats(&self) -> Result<Vec<(ChatId, ChatMetadata)>, StorageError> {
        Ok(self
            .chats
            .lock()
            .unwrap()
            .iter()
            .map(|(id, meta)| (*id, meta.clone()))
            .collect())
    }

    async fn remove(&self, chat_id: ChatId) -> Result<bool, StorageError> {
        {
            let mut failures = self.fail_removals.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(StorageError::Io(std::io::Error::other("disk full")));
            }
        }
        Ok(self.chats.lock().unwrap().remove(&chat_id).is_some())
    }
}

fn units() -> Vec<MessageUnit> {
    vec![
        MessageUnit::text("first"),
        MessageUnit::text("second"),
        MessageUnit::text("third"),
    ]
}

#[tokio::test]
async fn delivers_in_order_and_isolates_failures() {
    let transport = Recorder::default();
    let registry = Registry::with(&[1, 403, 500, 7], 0);

    let report = fan_out(&units(), &transport, &registry).await.unwrap();

    assert_eq!(report.delivered, 2);
    assert_eq!(report.failed, 2);
    assert_eq!(report.removed, vec![403]);

    let sent = transport.sent.lock().unwrap().clone();
    let texts = |chat: ChatId| -> Vec<String> {
        sent.iter()
            .filter(|(id, _)| *id == chat)
            .map(|(_, text)| text.clone())
            .collect()
    };
    assert_eq!(texts(1), ["first", "second", "third"]);
    assert_eq!(texts(500), ["first"]);
    assert_eq!(texts(7), ["first", "second", "third"]);

    let remaining: Vec<ChatId> = registry.chats().await.unwrap().into_iter().map(|(id, _)| id).collect();
    assert_eq!(remaining, vec![1, 7, 500]);
}

#[tokio::test]
async fn failed_removal_is_retried_after_the_loop() {
    let transport = Recorder::default();
    let registry = Registry::with(&[403, 8], 1);

    let report = fan_out(&units(), &transport, &registry).await.unwrap();

    assert_eq!(report.removed, vec![403]);
    assert_eq!(report.delivered, 1);
    assert!(registry.chats().await.unwrap().iter().all(|(id, _)| *id != 403));
}

#[tokio::test]
async fn no_chats_means_nothing_sent() {
    let transport = Recorder::default();
    let registry = Registry::with(&[], 0);
    let report = fan_out(&units(), &transport, &registry).await.unwrap();
    assert_eq!(report.delivered, 0);
    assert!(transport.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn rejected_token_aborts_without_deregistering() {
    let transport = Recorder::default();
    let registry = Registry::with(&[1, 401, 403, 500], 0);

    let err = fan_out(&units(), &transport, &registry).await.unwrap_err();
    assert!(matches!(err, FanOutError::Token(_)));

    let remaining: Vec<ChatId> = registry.chats().await.unwrap().into_iter().map(|(id, _)| id).collect();
    assert_eq!(remaining, vec![1, 401, 403, 500]);

    let sent = transport.sent.lock().unwrap().clone();
    assert!(sent.iter().all(|(id, _)| *id == 1));
    assert_eq!(sent.len(), 3);
}
