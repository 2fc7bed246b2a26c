//! Telegram Bot API adapter.
//!
//! Long-polls `getUpdates` for messages and button presses and implements
//! [`ChatTransport`] on top of `sendMessage`, `editMessageText`,
//! `sendPhoto` and `sendVideo`.

use super::{ChatMessage, ChatTransport, Content, Inbound, Keyboard, OutgoingMessage};
use crate::config::TelegramConfig;
use crate::error::{RelayError, Result};
use async_trait::async_trait;
use log::{debug, error, info, warn};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    #[serde(default)]
    message: Option<Message>,
    #[serde(default)]
    callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Deserialize)]
struct Message {
    message_id: i64,
    chat: Chat,
    #[serde(default)]
    from: Option<User>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct User {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    id: String,
    from: User,
    #[serde(default)]
    message: Option<Message>,
    #[serde(default)]
    data: Option<String>,
}

impl Update {
    /// Convert to a chat message; returns the callback query id to
    /// acknowledge alongside it.
    fn into_chat_message(self) -> Option<(ChatMessage, Option<String>)> {
        if let Some(query) = self.callback_query {
            let message = query.message?;
            let chat = ChatMessage {
                sender: query.from.id,
                chat: message.chat.id,
                text: query.data?,
                message_id: Some(message.message_id),
                from_button: true,
            };
            return Some((chat, Some(query.id)));
        }

        let message = self.message?;
        let chat = ChatMessage {
            sender: message.from.map_or(message.chat.id, |user| user.id),
            chat: message.chat.id,
            text: message.text?,
            message_id: Some(message.message_id),
            from_button: false,
        };
        Some((chat, None))
    }
}

fn reply_markup(keyboard: &Option<Keyboard>) -> Option<serde_json::Value> {
    keyboard
        .as_ref()
        .map(|rows| json!({ "inline_keyboard": rows }))
}

/// Hand one update to the relay loop.
///
/// Button presses are acknowledged through `answer` only after the relay
/// reports that a command consumed them, so presses from unauthorized
/// senders get no response at all. Returns false once the relay is gone.
async fn forward<F, Fut>(
    tx: &mpsc::Sender<Inbound>,
    message: ChatMessage,
    callback_id: Option<String>,
    answer: F,
) -> bool
where
    F: FnOnce(String) -> Fut,
    Fut: Future<Output = ()>,
{
    let Some(id) = callback_id else {
        return tx.send(Inbound::new(message)).await.is_ok();
    };

    let (inbound, handled) = Inbound::with_ack(message);
    if tx.send(inbound).await.is_err() {
        return false;
    }
    match handled.await {
        Ok(true) => answer(id).await,
        Ok(false) => debug!("[Chat] Leaving callback {} unanswered", id),
        Err(_) => return false,
    }
    true
}

/// Telegram Bot API client.
pub struct TelegramClient {
    http: reqwest::Client,
    base_url: String,
    poll_timeout_secs: u64,
}

impl TelegramClient {
    pub fn new(config: &TelegramConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.poll_timeout_secs + 30))
            .build()?;
        Ok(Self {
            http,
            base_url: format!("{}/bot{}", config.api_url.trim_end_matches('/'), config.token),
            poll_timeout_secs: config.poll_timeout_secs,
        })
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{}", self.base_url, method)
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, body: &serde_json::Value) -> Result<T> {
        let response: ApiResponse<T> = self
            .http
            .post(self.url(method))
            .json(body)
            .send()
            .await?
            .json()
            .await?;
        Self::unwrap_response(method, response)
    }

    async fn upload(&self, method: &str, form: Form) -> Result<()> {
        let response: ApiResponse<serde_json::Value> = self
            .http
            .post(self.url(method))
            .multipart(form)
            .send()
            .await?
            .json()
            .await?;
        Self::unwrap_response(method, response).map(|_| ())
    }

    fn unwrap_response<T>(method: &str, response: ApiResponse<T>) -> Result<T> {
        match response {
            ApiResponse {
                ok: true,
                result: Some(result),
                ..
            } => Ok(result),
            ApiResponse { description, .. } => Err(RelayError::Chat(format!(
                "{} failed: {}",
                method,
                description.unwrap_or_else(|| "no description".to_string())
            ))),
        }
    }

    async fn send_media(
        &self,
        message: &OutgoingMessage,
        field: &str,
        part: Part,
        caption: &Option<String>,
    ) -> Result<()> {
        let mut form = Form::new()
            .text("chat_id", message.recipient.to_string())
            .part(field.to_string(), part);
        if let Some(caption) = caption {
            form = form.text("caption", caption.clone());
        }
        if let Some(markup) = reply_markup(&message.keyboard) {
            form = form.text("reply_markup", markup.to_string());
        }
        let method = if field == "photo" { "sendPhoto" } else { "sendVideo" };
        self.upload(method, form).await
    }

    async fn answer_callback(&self, query_id: &str) {
        let result: Result<bool> = self
            .call("answerCallbackQuery", &json!({ "callback_query_id": query_id }))
            .await;
        if let Err(e) = result {
            debug!("[Chat] Failed to answer callback {}: {}", query_id, e);
        }
    }

    /// Long-poll for updates and forward them to the relay loop.
    ///
    /// Runs until the receiving side of `tx` is dropped.
    pub async fn run(&self, tx: mpsc::Sender<Inbound>) {
        info!("[Chat] Starting Telegram update loop");
        let mut offset: i64 = 0;

        loop {
            let body = json!({
                "offset": offset,
                "timeout": self.poll_timeout_secs,
                "allowed_updates": ["message", "callback_query"],
            });
            let updates: Vec<Update> = match self.call("getUpdates", &body).await {
                Ok(updates) => updates,
                Err(e) => {
                    error!("[Chat] getUpdates failed: {}", e);
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    continue;
                }
            };

            for update in updates {
                offset = offset.max(update.update_id + 1);
                let Some((message, callback_id)) = update.into_chat_message() else {
                    continue;
                };
                debug!("[Chat] {} in chat {}: {}", message.sender, message.chat, message.text);
                let delivered = forward(&tx, message, callback_id, |id| async move {
                    self.answer_callback(&id).await
                })
                .await;
                if !delivered {
                    warn!("[Chat] Relay loop gone, stopping update loop");
                    return;
                }
            }
        }
    }
}

#[async_trait]
impl ChatTransport for TelegramClient {
    async fn send(&self, message: &OutgoingMessage) -> Result<()> {
        match &message.content {
            Content::Text(text) => {
                let mut body = json!({ "chat_id": message.recipient, "text": text });
                if let Some(markup) = reply_markup(&message.keyboard) {
                    body["reply_markup"] = markup;
                }
                let method = match message.edit_message_id {
                    Some(id) => {
                        body["message_id"] = json!(id);
                        "editMessageText"
                    }
                    None => "sendMessage",
                };
                self.call::<serde_json::Value>(method, &body).await.map(|_| ())
            }
            Content::Photo { data, caption } => {
                let part = Part::bytes(data.to_vec())
                    .file_name("image.jpg")
                    .mime_str("image/jpeg")?;
                self.send_media(message, "photo", part, caption).await
            }
            Content::Video { data, caption } => {
                let part = Part::bytes(data.to_vec())
                    .file_name("video.mp4")
                    .mime_str("video/mp4")?;
                self.send_media(message, "video", part, caption).await
            }
            Content::VideoFile { path, caption } => {
                let data = tokio::fs::read(path).await?;
                let part = Part::bytes(data).file_name("video.mp4").mime_str("video/mp4")?;
                self.send_media(message, "video", part, caption).await
            }
        }
    }
}
