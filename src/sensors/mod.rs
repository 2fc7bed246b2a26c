//! Sensor entities and the registry that owns them.
//!
//! Sensors are built once at startup from sensor URLs, live for the whole
//! process and only ever have their internal state mutated by the relay
//! loop.

pub mod definition;
pub mod event;
pub mod registry;
pub mod sensor;

pub use definition::SensorDefinition;
pub use event::{CameraEvent, EventKind, SensorEvent};
pub use registry::Registry;
pub use sensor::{Sensor, SensorState};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Chat identifier used as a notification recipient.
pub type RecipientId = i64;

/// Trigger gap applied when a sensor URL does not set its own.
pub const DEFAULT_TRIGGER_GAP_SECS: u64 = 300;

/// Sensor kind, selecting how payloads are decoded and which events fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    /// On/off contact or motion sensor, debounced.
    Binary,
    /// Numeric reading, active when above zero, debounced.
    Numeric,
    /// Camera publishing photo and video clips under event sub-topics.
    Camera,
    /// Free-text notifications forwarded verbatim.
    Notify,
    /// State is tracked but never reported.
    Dummy,
}

impl SensorKind {
    /// Topic used when a sensor URL omits `@topic`.
    pub fn default_topic(self, name: &str) -> String {
        match self {
            SensorKind::Binary | SensorKind::Numeric | SensorKind::Dummy => {
                format!("home/sensor/{}", name)
            }
            SensorKind::Camera => format!("home/camera/{}/#", name),
            SensorKind::Notify => "home/notify".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_kind_parsing_is_case_insensitive() {
        assert_eq!(SensorKind::from_str("binary").unwrap(), SensorKind::Binary);
        assert_eq!(SensorKind::from_str("Camera").unwrap(), SensorKind::Camera);
        assert!(SensorKind::from_str("thermostat").is_err());
    }

    #[test]
    fn test_default_topics() {
        assert_eq!(SensorKind::Binary.default_topic("door"), "home/sensor/door");
        assert_eq!(SensorKind::Camera.default_topic("cam1"), "home/camera/cam1/#");
        assert_eq!(SensorKind::Notify.default_topic("alerts"), "home/notify");
    }
}
