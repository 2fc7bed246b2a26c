//! Sensor URL parsing.
//!
//! Sensors are configured as `kind://name[!][@topic][?gap=SECONDS]`:
//!
//! ```text
//! binary://door                      -> home/sensor/door
//! numeric://co2@home/air/+/co2       -> explicit pattern
//! camera://cam1                      -> home/camera/cam1/#
//! binary://hallway!?gap=60           -> hidden, 60s trigger gap
//! ```

use super::SensorKind;
use crate::error::{RelayError, Result};
use std::str::FromStr;

/// Parsed form of a sensor URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorDefinition {
    pub kind: SensorKind,
    pub name: String,
    /// Tracked but never listed or notified.
    pub hidden: bool,
    pub topic: String,
    pub trigger_gap_secs: Option<u64>,
}

impl FromStr for SensorDefinition {
    type Err = RelayError;

    fn from_str(url: &str) -> Result<Self> {
        let invalid = || RelayError::InvalidSensorUrl(url.to_string());

        let (kind, rest) = url.trim().split_once("://").ok_or_else(invalid)?;
        let kind = SensorKind::from_str(kind)
            .map_err(|_| RelayError::UnknownSensorKind(kind.to_string()))?;

        let (rest, query) = match rest.split_once('?') {
            Some((rest, query)) => (rest, Some(query)),
            None => (rest, None),
        };

        let (name, topic) = match rest.split_once('@') {
            Some((name, topic)) if !topic.is_empty() => (name, Some(topic)),
            Some(_) => return Err(invalid()),
            None => (rest, None),
        };

        let (name, hidden) = match name.strip_suffix('!') {
            Some(name) => (name, true),
            None => (name, false),
        };
        if name.is_empty() || name.contains(['/', '+', '#', ' ']) {
            return Err(invalid());
        }

        let mut trigger_gap_secs = None;
        for pair in query.into_iter().flat_map(|q| q.split('&')) {
            match pair.split_once('=') {
                Some(("gap", value)) => {
                    trigger_gap_secs = Some(value.parse().map_err(|_| invalid())?);
                }
                _ => return Err(invalid()),
            }
        }

        Ok(Self {
            kind,
            name: name.to_string(),
            hidden,
            topic: topic.map_or_else(|| kind.default_topic(name), str::to_string),
            trigger_gap_secs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_default_topic() {
        let def: SensorDefinition = "binary://door".parse().unwrap();
        assert_eq!(def.kind, SensorKind::Binary);
        assert_eq!(def.name, "door");
        assert!(!def.hidden);
        assert_eq!(def.topic, "home/sensor/door");
        assert_eq!(def.trigger_gap_secs, None);
    }

    #[test]
    fn test_parse_explicit_topic() {
        let def: SensorDefinition = "camera://cam1@home/camera/cam1/#".parse().unwrap();
        assert_eq!(def.kind, SensorKind::Camera);
        assert_eq!(def.topic, "home/camera/cam1/#");
    }

    #[test]
    fn test_parse_hidden_flag_and_gap() {
        let def: SensorDefinition = "numeric://boiler!@home/boiler/temp?gap=60".parse().unwrap();
        assert_eq!(def.name, "boiler");
        assert!(def.hidden);
        assert_eq!(def.topic, "home/boiler/temp");
        assert_eq!(def.trigger_gap_secs, Some(60));
    }

    #[test]
    fn test_parse_rejects_malformed_urls() {
        assert!(matches!(
            "door".parse::<SensorDefinition>(),
            Err(RelayError::InvalidSensorUrl(_))
        ));
        assert!(matches!(
            "lamp://door".parse::<SensorDefinition>(),
            Err(RelayError::UnknownSensorKind(_))
        ));
        assert!("binary://@home/x".parse::<SensorDefinition>().is_err());
        assert!("binary://door@".parse::<SensorDefinition>().is_err());
        assert!("binary://door?gap=soon".parse::<SensorDefinition>().is_err());
        assert!("binary://door?delay=5".parse::<SensorDefinition>().is_err());
    }
}
