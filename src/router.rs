//! Event routing from bus messages to sensors.
//!
//! ```text
//! bus message (topic, payload, retain)
//!        ↓ retained? → dropped
//! Registry::resolve(topic)   first matching pattern wins
//!        ↓ no match → dropped
//! Sensor::process(suffix, payload)
//!        ↓
//! Option<SensorEvent> → dispatcher
//! ```

use crate::sensors::{Registry, SensorEvent};
use chrono::{DateTime, Utc};
use log::{debug, info, trace, warn};

/// Payload text safe to log.
fn loggable(payload: &[u8]) -> String {
    if payload.len() > 10 {
        "[binary]".to_string()
    } else {
        String::from_utf8_lossy(payload).into_owned()
    }
}

/// Route one bus message into the registry.
///
/// Retained messages replay last-known state and are ignored. Unmatched
/// topics and undecodable payloads are dropped; the latter leave the
/// sensor's previous state in place.
pub fn route(
    registry: &mut Registry,
    topic: &str,
    payload: &[u8],
    retain: bool,
    now: DateTime<Utc>,
) -> Option<SensorEvent> {
    if retain {
        trace!("[Router] Ignoring retained message on {}", topic);
        return None;
    }

    info!("[Router] topic {}, payload: {}", topic, loggable(payload));

    let Some((sensor, suffix)) = registry.resolve(topic) else {
        trace!("[Router] No sensor for topic {}", topic);
        return None;
    };

    match sensor.process(&suffix, payload, now) {
        Ok(Some(event)) => {
            debug!(
                "[Router] {} emitted {} notification(s)",
                event.sensor,
                event.recipients.len()
            );
            Some(event)
        }
        Ok(None) => {
            debug!("[Router] {} updated silently", sensor.name());
            None
        }
        Err(e) => {
            warn!("[Router] {}", e);
            None
        }
    }
}
