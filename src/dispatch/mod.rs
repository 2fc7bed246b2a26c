//! Notification dispatcher.
//!
//! Turns [`SensorEvent`]s into chat messages and delivers them without
//! holding up the relay loop. Each recipient is delivered independently so
//! one unreachable chat never blocks the rest of a fan-out.

pub mod render;

use crate::chat::{Button, ChatTransport, Content, OutgoingMessage};
use crate::sensors::{EventKind, RecipientId, SensorEvent};
use futures_util::future::join_all;
use log::{debug, warn};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Outcome of one delivery batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Send every message, isolating per-message failures.
pub async fn deliver_all(
    transport: &dyn ChatTransport,
    messages: &[OutgoingMessage],
) -> DeliveryReport {
    let results = join_all(messages.iter().map(|m| transport.send(m))).await;

    let mut report = DeliveryReport::default();
    for (message, result) in messages.iter().zip(results) {
        match result {
            Ok(()) => report.delivered += 1,
            Err(e) => {
                warn!("[Chat] Delivery to {} failed: {}", message.recipient, e);
                report.failed += 1;
            }
        }
    }
    report
}

#[derive(Clone)]
pub struct Dispatcher {
    transport: Arc<dyn ChatTransport>,
    /// Recipients sensor notifications may be addressed to.
    allowed: BTreeSet<RecipientId>,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn ChatTransport>, allowed: BTreeSet<RecipientId>) -> Self {
        Self {
            transport,
            allowed,
        }
    }

    pub fn allowed(&self) -> &BTreeSet<RecipientId> {
        &self.allowed
    }

    /// Allow notifications to `recipient`, e.g. a group chat an admin
    /// subscribed from. Returns false if it was already allowed.
    pub fn allow(&mut self, recipient: RecipientId) -> bool {
        self.allowed.insert(recipient)
    }

    /// Build one message per distinct allowed recipient of `event`.
    pub fn render(&self, event: &SensorEvent) -> Vec<OutgoingMessage> {
        let mut seen = BTreeSet::new();
        event
            .recipients
            .iter()
            .copied()
            .filter(|r| seen.insert(*r))
            .filter(|r| {
                let allowed = self.allowed.contains(r);
                if !allowed {
                    debug!("[Chat] Skipping {} for {}: not an allowed recipient", r, event.sensor);
                }
                allowed
            })
            .map(|recipient| render_for(event, recipient))
            .collect()
    }

    /// Render `event` and deliver it in the background.
    pub fn notify(&self, event: &SensorEvent) {
        self.dispatch(self.render(event));
    }

    /// Deliver messages in the background.
    pub fn dispatch(&self, messages: Vec<OutgoingMessage>) {
        if messages.is_empty() {
            return;
        }
        let transport = self.transport.clone();
        tokio::spawn(async move {
            let report = deliver_all(transport.as_ref(), &messages).await;
            debug!(
                "[Chat] Delivered {} message(s), {} failed",
                report.delivered, report.failed
            );
        });
    }

    /// Deliver messages and wait for the result.
    pub async fn deliver(&self, messages: &[OutgoingMessage]) -> DeliveryReport {
        deliver_all(self.transport.as_ref(), messages).await
    }
}

fn render_for(event: &SensorEvent, recipient: RecipientId) -> OutgoingMessage {
    match &event.kind {
        EventKind::Triggered => {
            OutgoingMessage::text(recipient, render::alert_text(&event.sensor, event.at))
        }
        EventKind::Text(text) => OutgoingMessage::text(recipient, text.clone()),
        EventKind::Photo {
            data,
            offer_next_video,
        } => {
            let message = OutgoingMessage::new(
                recipient,
                Content::Photo {
                    data: data.clone(),
                    caption: Some(render::camera_caption(&event.sensor, event.at, false)),
                },
            );
            if offer_next_video.contains(&recipient) {
                message.with_keyboard(vec![vec![Button::new(
                    "Send next video",
                    format!("/camera {}", event.sensor),
                )]])
            } else {
                message
            }
        }
        EventKind::Video { data, motion } => OutgoingMessage::new(
            recipient,
            Content::Video {
                data: data.clone(),
                caption: Some(render::camera_caption(&event.sensor, event.at, *motion)),
            },
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::testing::RecordingTransport;
    use chrono::Utc;

    fn dispatcher(transport: Arc<RecordingTransport>, allowed: &[RecipientId]) -> Dispatcher {
        Dispatcher::new(transport, allowed.iter().copied().collect())
    }

    fn event(kind: EventKind, recipients: Vec<RecipientId>) -> SensorEvent {
        SensorEvent {
            sensor: "cam1".to_string(),
            kind,
            recipients,
            at: Utc::now(),
        }
    }

    #[test]
    fn test_render_filters_and_deduplicates() {
        let d = dispatcher(Arc::new(RecordingTransport::default()), &[1, 2]);
        let messages = d.render(&event(EventKind::Text("hi".into()), vec![1, 1, 2, 3]));
        let recipients: Vec<_> = messages.iter().map(|m| m.recipient).collect();
        assert_eq!(recipients, vec![1, 2]);
        assert!(messages.iter().all(|m| m.as_text() == Some("hi")));
    }

    #[test]
    fn test_photo_button_only_for_offered_recipients() {
        let d = dispatcher(Arc::new(RecordingTransport::default()), &[1, 2]);
        let data: Arc<[u8]> = Arc::from(&b"jpeg"[..]);
        let messages = d.render(&event(
            EventKind::Photo {
                data: data.clone(),
                offer_next_video: vec![2],
            },
            vec![1, 2],
        ));

        assert!(messages[0].keyboard.is_none());
        let keyboard = messages[1].keyboard.as_ref().unwrap();
        assert_eq!(keyboard[0][0].callback, "/camera cam1");
        match &messages[1].content {
            Content::Photo { data: sent, caption } => {
                assert_eq!(sent, &data);
                assert!(caption.as_deref().unwrap().starts_with("camera#cam1"));
            }
            other => panic!("unexpected content {:?}", other),
        }
    }

    #[test]
    fn test_triggered_renders_alert() {
        let d = dispatcher(Arc::new(RecordingTransport::default()), &[5]);
        let mut e = event(EventKind::Triggered, vec![5]);
        e.sensor = "door".to_string();
        let messages = d.render(&e);
        assert!(messages[0].as_text().unwrap().starts_with("door: alert "));
    }

    #[test]
    fn test_allowed_recipient_receives_notifications() {
        let mut d = dispatcher(Arc::new(RecordingTransport::default()), &[1]);
        let e = event(EventKind::Text("hi".into()), vec![1, -100]);
        assert_eq!(d.render(&e).len(), 1);

        assert!(d.allow(-100));
        assert!(!d.allow(-100));
        let recipients: Vec<_> = d.render(&e).iter().map(|m| m.recipient).collect();
        assert_eq!(recipients, vec![1, -100]);
    }

    #[tokio::test]
    async fn test_failed_recipient_does_not_block_others() {
        let transport = Arc::new(RecordingTransport::default());
        transport.fail_for(2);
        let d = dispatcher(transport.clone(), &[1, 2, 3]);

        let messages = d.render(&event(EventKind::Text("alarm".into()), vec![1, 2, 3]));
        let report = d.deliver(&messages).await;

        assert_eq!(report, DeliveryReport { delivered: 2, failed: 1 });
        let delivered: Vec<_> = transport.sent().iter().map(|m| m.recipient).collect();
        assert_eq!(delivered, vec![1, 3]);
    }
}
