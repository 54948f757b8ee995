//! Telegram Bot API transport.

use std::time::Duration;

use async_trait::async_trait;
use feedcast_core::{ChatId, Control, DeliveryError, MessageUnit, UnitKind};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};
use tracing::debug;

const PARSE_MODE: &str = "HTML";
/// Slack on top of the long-poll timeout before the request itself gives up.
const LONG_POLL_GRACE: Duration = Duration::from_secs(10);

pub struct TelegramTransport {
    client: Client,
    base: String,
}

#[derive(Debug, Serialize)]
struct Button<'a> {
    text: &'a str,
    url: &'a str,
}

#[derive(Debug, Serialize)]
struct InlineKeyboard<'a> {
    inline_keyboard: Vec<Vec<Button<'a>>>,
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: ChatId,
    text: &'a str,
    parse_mode: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<InlineKeyboard<'a>>,
}

#[derive(Debug, Serialize)]
struct SendPhoto<'a> {
    chat_id: ChatId,
    photo: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    caption: Option<&'a str>,
    parse_mode: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<InlineKeyboard<'a>>,
}

#[derive(Debug, Serialize)]
struct GetUpdates {
    offset: i64,
    timeout: u64,
    allowed_updates: [&'static str; 1],
}

#[derive(Debug, Deserialize)]
struct ApiResponse<R> {
    ok: bool,
    result: Option<R>,
    #[serde(default)]
    error_code: Option<u16>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<IncomingMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IncomingMessage {
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: ChatId,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
}

impl Chat {
    /// Group title, else the user name, else the first name.
    pub fn display_name(&self) -> Option<String> {
        self.title
            .clone()
            .or_else(|| self.username.as_ref().map(|u| format!("@{u}")))
            .or_else(|| self.first_name.clone())
    }
}

impl TelegramTransport {
    pub fn new(client: Client, api_url: &str, token: &str) -> Self {
        Self {
            client,
            base: format!("{}/bot{}", api_url.trim_end_matches('/'), token),
        }
    }

    fn post<T: Serialize + ?Sized>(&self, method: &str, body: &T) -> RequestBuilder {
        self.client.post(format!("{}/{method}", self.base)).json(body)
    }

    /// Pending updates after `offset`, waiting up to `timeout` seconds for one.
    pub async fn get_updates(&self, offset: i64, timeout: u64) -> Result<Vec<Update>, DeliveryError> {
        let body = GetUpdates {
            offset,
            timeout,
            allowed_updates: ["message"],
        };
        let request = self
            .post("getUpdates", &body)
            .timeout(Duration::from_secs(timeout) + LONG_POLL_GRACE);
        Ok(self.call("getUpdates", request).await?.unwrap_or_default())
    }

    async fn call<R: DeserializeOwned>(
        &self,
        method: &str,
        request: RequestBuilder,
    ) -> Result<Option<R>, DeliveryError> {
        let response = request
            .send()
            .await
            .map_err(|e| DeliveryError::Failed(e.without_url().to_string()))?;
        let status = response.status();
        let api: Option<ApiResponse<R>> = response.json().await.ok();

        let code = api
            .as_ref()
            .and_then(|r| r.error_code)
            .and_then(|c| StatusCode::from_u16(c).ok())
            .unwrap_or(status);
        let description = api
            .as_ref()
            .and_then(|r| r.description.clone())
            .unwrap_or_else(|| status.to_string());

        match api {
            Some(ApiResponse {
                ok: true, result, ..
            }) if status.is_success() => {
                debug!(method, "telegram call succeeded");
                Ok(result)
            }
            _ if status == StatusCode::UNAUTHORIZED || code == StatusCode::UNAUTHORIZED => {
                Err(DeliveryError::Token(description))
            }
            _ if status == StatusCode::FORBIDDEN || code == StatusCode::FORBIDDEN => {
                Err(DeliveryError::Unauthorized(description))
            }
            _ => Err(DeliveryError::Failed(format!("{method}: {description}"))),
        }
    }
}

fn keyboard(controls: &[Vec<Control>]) -> Option<InlineKeyboard<'_>> {
    if controls.is_empty() {
        return None;
    }
    let inline_keyboard = controls
        .iter()
        .map(|row| {
            row.iter()
                .map(|c| Button {
                    text: &c.label,
                    url: &c.url,
                })
                .collect()
        })
        .collect();
    Some(InlineKeyboard { inline_keyboard })
}

#[async_trait]
impl feedcast_core::Transport for TelegramTransport {
    async fn send(&self, chat_id: ChatId, unit: &MessageUnit) -> Result<(), DeliveryError> {
        let reply_markup = keyboard(&unit.controls);
        match (unit.kind, unit.image.as_deref()) {
            (UnitKind::Image, Some(photo)) => {
                let caption = unit.text.trim();
                let body = SendPhoto {
                    chat_id,
                    photo,
                    caption: (!caption.is_empty()).then_some(caption),
                    parse_mode: PARSE_MODE,
                    reply_markup,
                };
                let request = self.post("sendPhoto", &body);
                self.call::<IgnoredAny>("sendPhoto", request).await.map(drop)
            }
            _ => {
                let body = SendMessage {
                    chat_id,
                    text: &unit.text,
                    parse_mode: PARSE_MODE,
                    reply_markup,
                };
                let request = self.post("sendMessage", &body);
                self.call::<IgnoredAny>("sendMessage", request).await.map(drop)
            }
        }
    }
}
