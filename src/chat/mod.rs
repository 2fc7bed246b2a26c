//! Chat transport seam.
//!
//! The relay core only talks to the chat service through [`ChatTransport`]
//! and the message types in this module. [`telegram`] provides the Bot API
//! implementation used by the binary.

pub mod telegram;

use crate::error::Result;
use crate::sensors::RecipientId;
use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::oneshot;

pub use telegram::TelegramClient;

/// Inline button; pressing it sends `callback` back as a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Button {
    #[serde(rename = "text")]
    pub label: String,
    #[serde(rename = "callback_data")]
    pub callback: String,
}

impl Button {
    pub fn new(label: impl Into<String>, callback: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            callback: callback.into(),
        }
    }
}

/// Two-dimensional button grid, rows first.
pub type Keyboard = Vec<Vec<Button>>;

/// Lay `buttons` out in rows of at most `per_row`.
pub fn keyboard_rows(buttons: Vec<Button>, per_row: usize) -> Keyboard {
    let mut rows = Vec::new();
    let mut row = Vec::with_capacity(per_row);
    for button in buttons {
        row.push(button);
        if row.len() == per_row {
            rows.push(std::mem::replace(&mut row, Vec::with_capacity(per_row)));
        }
    }
    if !row.is_empty() {
        rows.push(row);
    }
    rows
}

/// Message body. Media is forwarded as-is.
#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    Text(String),
    Photo {
        data: Arc<[u8]>,
        caption: Option<String>,
    },
    Video {
        data: Arc<[u8]>,
        caption: Option<String>,
    },
    /// Video read from disk by the transport at send time.
    VideoFile {
        path: PathBuf,
        caption: Option<String>,
    },
}

/// A message addressed to one recipient.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMessage {
    pub recipient: RecipientId,
    pub content: Content,
    pub keyboard: Option<Keyboard>,
    /// Replace the content of this earlier message instead of sending a
    /// new one. Only honoured for text.
    pub edit_message_id: Option<i64>,
}

impl OutgoingMessage {
    pub fn new(recipient: RecipientId, content: Content) -> Self {
        Self {
            recipient,
            content,
            keyboard: None,
            edit_message_id: None,
        }
    }

    pub fn text(recipient: RecipientId, text: impl Into<String>) -> Self {
        Self::new(recipient, Content::Text(text.into()))
    }

    pub fn with_keyboard(mut self, keyboard: Keyboard) -> Self {
        self.keyboard = Some(keyboard);
        self
    }

    pub fn editing(mut self, message_id: Option<i64>) -> Self {
        self.edit_message_id = message_id;
        self
    }

    /// Text body, if this is a text message.
    pub fn as_text(&self) -> Option<&str> {
        match &self.content {
            Content::Text(text) => Some(text.as_str()),
            _ => None,
        }
    }
}

/// An inbound chat message or button press.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    /// User who sent the message; used for authorization.
    pub sender: i64,
    /// Chat the message came from; replies and subscriptions use it.
    pub chat: RecipientId,
    pub text: String,
    /// Id of the message carrying the pressed button, for in-place edits.
    pub message_id: Option<i64>,
    pub from_button: bool,
}

impl ChatMessage {
    /// A plain text message from a user in their private chat.
    pub fn direct(user: i64, text: impl Into<String>) -> Self {
        Self {
            sender: user,
            chat: user,
            text: text.into(),
            message_id: None,
            from_button: false,
        }
    }
}

/// A chat message on its way to the relay loop.
///
/// When `handled` is set, the relay reports back whether a command
/// consumed the message, so the transport can decide how to acknowledge it.
#[derive(Debug)]
pub struct Inbound {
    pub message: ChatMessage,
    pub handled: Option<oneshot::Sender<bool>>,
}

impl Inbound {
    pub fn new(message: ChatMessage) -> Self {
        Self {
            message,
            handled: None,
        }
    }

    /// Pair `message` with a receiver for the handled flag.
    pub fn with_ack(message: ChatMessage) -> (Self, oneshot::Receiver<bool>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                message,
                handled: Some(tx),
            },
            rx,
        )
    }

    /// Report the outcome; a transport that stopped waiting is ignored.
    pub fn complete(self, handled: bool) {
        if let Some(tx) = self.handled {
            let _ = tx.send(handled);
        }
    }
}

/// Outbound side of the chat service.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send(&self, message: &OutgoingMessage) -> Result<()>;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::error::RelayError;
    use parking_lot::Mutex;
    use std::collections::HashSet;

    /// Transport that records every message and fails for chosen recipients.
    #[derive(Default)]
    pub struct RecordingTransport {
        pub sent: Mutex<Vec<OutgoingMessage>>,
        pub failing: Mutex<HashSet<RecipientId>>,
    }

    impl RecordingTransport {
        pub fn fail_for(&self, recipient: RecipientId) {
            self.failing.lock().insert(recipient);
        }

        pub fn sent(&self) -> Vec<OutgoingMessage> {
            self.sent.lock().clone()
        }
    }

    #[async_trait]
    impl ChatTransport for RecordingTransport {
        async fn send(&self, message: &OutgoingMessage) -> Result<()> {
            if self.failing.lock().contains(&message.recipient) {
                return Err(RelayError::Chat(format!(
                    "chat {} unreachable",
                    message.recipient
                )));
            }
            self.sent.lock().push(message.clone());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyboard_rows() {
        let buttons: Vec<_> = (0..9).map(|i| Button::new(i.to_string(), "/x")).collect();
        let rows = keyboard_rows(buttons, 7);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].len(), 7);
        assert_eq!(rows[1].len(), 2);
        assert!(keyboard_rows(Vec::new(), 7).is_empty());
    }

    #[test]
    fn test_button_serializes_to_inline_keyboard_shape() {
        let json = serde_json::to_value(Button::new("Subscribe", "/sensor door 1")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"text": "Subscribe", "callback_data": "/sensor door 1"})
        );
    }
}
