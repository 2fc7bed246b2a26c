use super::{Sensor, SensorDefinition};
use crate::error::{RelayError, Result};
use crate::topic::match_topic;
use std::collections::HashSet;

/// Ordered, name-unique set of sensors.
///
/// Membership is fixed at construction; only sensor state mutates.
#[derive(Debug, Default)]
pub struct Registry {
    sensors: Vec<Sensor>,
}

impl Registry {
    pub fn new(sensors: Vec<Sensor>) -> Result<Self> {
        let mut seen = HashSet::new();
        for sensor in &sensors {
            if !seen.insert(sensor.name()) {
                return Err(RelayError::DuplicateSensor(sensor.name().to_string()));
            }
        }
        Ok(Self { sensors })
    }

    /// Build a registry from sensor URLs.
    pub fn from_urls<S: AsRef<str>>(urls: &[S], default_gap_secs: u64) -> Result<Self> {
        let sensors = urls
            .iter()
            .map(|url| {
                let definition: SensorDefinition = url.as_ref().parse()?;
                Ok(Sensor::new(definition, default_gap_secs))
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(sensors)
    }

    /// Find the first sensor, in registry order, whose pattern matches
    /// `topic`. Also returns the topic levels matched by `#`.
    pub fn resolve<'t>(&mut self, topic: &'t str) -> Option<(&mut Sensor, Vec<&'t str>)> {
        self.sensors.iter_mut().find_map(|sensor| {
            let suffix = match_topic(sensor.topic(), topic)?;
            Some((sensor, suffix))
        })
    }

    pub fn get(&self, name: &str) -> Option<&Sensor> {
        self.sensors.iter().find(|s| s.name() == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Sensor> {
        self.sensors.iter_mut().find(|s| s.name() == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sensor> {
        self.sensors.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Sensor> {
        self.sensors.iter_mut()
    }

    /// Sensors shown in status listings and menus.
    pub fn listed(&self) -> impl Iterator<Item = &Sensor> {
        self.sensors.iter().filter(|s| s.is_listed())
    }

    /// Distinct topic patterns to subscribe to on connect.
    pub fn topics(&self) -> Vec<&str> {
        let mut topics: Vec<&str> = Vec::with_capacity(self.sensors.len());
        for sensor in &self.sensors {
            if !topics.contains(&sensor.topic()) {
                topics.push(sensor.topic());
            }
        }
        topics
    }

    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }
}
