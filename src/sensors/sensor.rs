//! Sensor entity state machine.
//!
//! Every update follows `Idle -> Updated -> (NotificationSent | Suppressed)`:
//! the payload is decoded for the sensor's kind, `state` and `changed` are
//! updated, then the kind's policy decides whether a [`SensorEvent`] is
//! emitted. Decode failures leave the previous state untouched.

use super::event::{CameraEvent, EventKind, SensorEvent};
use super::{RecipientId, SensorDefinition, SensorKind};
use crate::error::{RelayError, Result};
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Last decoded payload of a sensor.
#[derive(Debug, Clone, PartialEq)]
pub enum SensorState {
    Binary(bool),
    Numeric(f64),
    Text(String),
    /// Last camera event; the media itself is not retained.
    Media { event: CameraEvent, size: usize },
}

impl SensorState {
    /// Whether this value counts as an alert for debounced kinds.
    pub fn is_active(&self) -> bool {
        match self {
            SensorState::Binary(value) => *value,
            SensorState::Numeric(value) => *value > 0.0,
            SensorState::Text(_) | SensorState::Media { .. } => false,
        }
    }
}

impl fmt::Display for SensorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorState::Binary(true) => write!(f, "open"),
            SensorState::Binary(false) => write!(f, "closed"),
            SensorState::Numeric(value) => write!(f, "{}", value),
            SensorState::Text(text) => write!(f, "{}", text),
            SensorState::Media { event, size } => write!(f, "{} ({} bytes)", event, size),
        }
    }
}

/// A configured sensor and its mutable state.
#[derive(Debug, Clone)]
pub struct Sensor {
    name: String,
    kind: SensorKind,
    topic: String,
    hidden: bool,
    trigger_gap: Duration,
    state: Option<SensorState>,
    changed: Option<DateTime<Utc>>,
    triggered: Option<DateTime<Utc>>,
    subscriptions: BTreeSet<RecipientId>,
    one_time_sub: BTreeSet<RecipientId>,
}

impl Sensor {
    /// Create a sensor from its parsed URL, falling back to
    /// `default_gap_secs` when the URL sets no trigger gap.
    pub fn new(definition: SensorDefinition, default_gap_secs: u64) -> Self {
        let gap_secs = definition.trigger_gap_secs.unwrap_or(default_gap_secs);
        Self {
            name: definition.name,
            kind: definition.kind,
            topic: definition.topic,
            hidden: definition.hidden,
            trigger_gap: Duration::seconds(gap_secs.min(u64::from(u32::MAX)) as i64),
            state: None,
            changed: None,
            triggered: None,
            subscriptions: BTreeSet::new(),
            one_time_sub: BTreeSet::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> SensorKind {
        self.kind
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn state(&self) -> Option<&SensorState> {
        self.state.as_ref()
    }

    /// Time of the last accepted update.
    pub fn changed(&self) -> Option<DateTime<Utc>> {
        self.changed
    }

    /// Time of the last update that produced a debounced alert.
    pub fn triggered(&self) -> Option<DateTime<Utc>> {
        self.triggered
    }

    /// Whether the sensor shows up in status listings and menus.
    pub fn is_listed(&self) -> bool {
        !self.hidden && self.kind != SensorKind::Dummy
    }

    pub fn subscriptions(&self) -> &BTreeSet<RecipientId> {
        &self.subscriptions
    }

    pub fn one_time_subscriptions(&self) -> &BTreeSet<RecipientId> {
        &self.one_time_sub
    }

    pub fn is_subscribed(&self, recipient: RecipientId) -> bool {
        self.subscriptions.contains(&recipient)
    }

    /// Add a standing subscriber. Returns false if already subscribed.
    pub fn add_subscription(&mut self, recipient: RecipientId) -> bool {
        self.subscriptions.insert(recipient)
    }

    /// Remove a standing subscriber. Returns false if not subscribed.
    pub fn remove_subscription(&mut self, recipient: RecipientId) -> bool {
        self.subscriptions.remove(&recipient)
    }

    /// Register `recipient` for exactly the next qualifying media event.
    pub fn request_next(&mut self, recipient: RecipientId) -> bool {
        self.one_time_sub.insert(recipient)
    }

    /// Apply one bus message to the sensor.
    ///
    /// `suffix` holds the topic levels matched by the pattern's `#`.
    /// Returns `Ok(None)` when the update was stored silently.
    pub fn process(
        &mut self,
        suffix: &[&str],
        payload: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Option<SensorEvent>> {
        let state = self.decode(suffix, payload)?;
        let camera_event = match &state {
            SensorState::Media { event, .. } => Some(*event),
            _ => None,
        };
        let active = state.is_active();

        self.state = Some(state);
        self.changed = Some(now);

        if !self.is_listed() {
            return Ok(None);
        }

        let kind = match self.kind {
            SensorKind::Binary | SensorKind::Numeric => {
                let outside_gap = self
                    .triggered
                    .is_none_or(|last| now - last > self.trigger_gap);
                if !(active && outside_gap) {
                    return Ok(None);
                }
                self.triggered = Some(now);
                EventKind::Triggered
            }
            SensorKind::Notify => EventKind::Text(String::from_utf8_lossy(payload).into_owned()),
            SensorKind::Camera => return Ok(self.camera_event(camera_event, payload, now)),
            SensorKind::Dummy => return Ok(None),
        };

        Ok(Some(self.event(kind, self.subscriptions.iter().copied().collect(), now)))
    }

    fn camera_event(
        &mut self,
        event: Option<CameraEvent>,
        payload: &[u8],
        now: DateTime<Utc>,
    ) -> Option<SensorEvent> {
        let data: Arc<[u8]> = Arc::from(payload);
        match event? {
            CameraEvent::Photo => {
                let offer_next_video = self
                    .subscriptions
                    .difference(&self.one_time_sub)
                    .copied()
                    .collect();
                let recipients = self.subscriptions.iter().copied().collect();
                Some(self.event(
                    EventKind::Photo {
                        data,
                        offer_next_video,
                    },
                    recipients,
                    now,
                ))
            }
            CameraEvent::MotionVideo => {
                let recipients = self.subscriptions.iter().copied().collect();
                Some(self.event(EventKind::Video { data, motion: true }, recipients, now))
            }
            CameraEvent::Video => {
                if self.one_time_sub.is_empty() {
                    return None;
                }
                let recipients = std::mem::take(&mut self.one_time_sub).into_iter().collect();
                Some(self.event(EventKind::Video { data, motion: false }, recipients, now))
            }
        }
    }

    fn event(&self, kind: EventKind, recipients: Vec<RecipientId>, at: DateTime<Utc>) -> SensorEvent {
        SensorEvent {
            sensor: self.name.clone(),
            kind,
            recipients,
            at,
        }
    }

    fn decode(&self, suffix: &[&str], payload: &[u8]) -> Result<SensorState> {
        let fail = |reason: String| RelayError::Decode {
            sensor: self.name.clone(),
            reason,
        };
        let text = || {
            std::str::from_utf8(payload)
                .map(str::trim)
                .map_err(|e| fail(format!("payload is not UTF-8: {}", e)))
        };

        match self.kind {
            SensorKind::Binary => {
                let text = text()?;
                match text.to_ascii_lowercase().as_str() {
                    "1" | "true" | "on" | "open" => Ok(SensorState::Binary(true)),
                    "0" | "false" | "off" | "closed" => Ok(SensorState::Binary(false)),
                    other => other
                        .parse::<i64>()
                        .map(|value| SensorState::Binary(value > 0))
                        .map_err(|_| fail(format!("'{}' is not a binary value", text))),
                }
            }
            SensorKind::Numeric => {
                let text = text()?;
                match text.parse::<f64>() {
                    Ok(value) if value.is_finite() => Ok(SensorState::Numeric(value)),
                    _ => Err(fail(format!("'{}' is not a number", text))),
                }
            }
            SensorKind::Notify | SensorKind::Dummy => Ok(SensorState::Text(text()?.to_string())),
            SensorKind::Camera => {
                let discriminator = suffix
                    .first()
                    .ok_or_else(|| fail("missing camera event in topic".to_string()))?;
                let event = CameraEvent::from_str(discriminator)
                    .map_err(|_| fail(format!("unknown camera event '{}'", discriminator)))?;
                Ok(SensorState::Media {
                    event,
                    size: payload.len(),
                })
            }
        }
    }
}
