//! Subscription persistence across restarts.
//!
//! Standing subscriptions are written as JSON after every change and read
//! back at startup. One-time subscriptions only live in memory.

use crate::sensors::{RecipientId, Registry};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

/// Persisted subscriptions, keyed by sensor name
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedSubscriptions {
    pub sensors: BTreeMap<String, BTreeSet<RecipientId>>,
}

impl PersistedSubscriptions {
    /// Load from file; a missing or unreadable file yields an empty set
    pub fn load(path: &Path) -> Self {
        match fs::read(path) {
            Ok(bytes) => match serde_json::from_slice::<PersistedSubscriptions>(&bytes) {
                Ok(state) => {
                    info!(
                        "[Store] Loaded subscriptions for {} sensor(s) from {:?}",
                        state.sensors.len(),
                        path
                    );
                    state
                }
                Err(e) => {
                    warn!("[Store] Failed to parse subscriptions file: {}", e);
                    Self::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("[Store] No persisted subscriptions found (first run)");
                Self::default()
            }
            Err(e) => {
                error!("[Store] Failed to read subscriptions file: {}", e);
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), std::io::Error> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_vec_pretty(self)?;
        fs::write(path, data)
    }

    /// Snapshot the standing subscriptions of every sensor.
    pub fn from_registry(registry: &Registry) -> Self {
        Self {
            sensors: registry
                .iter()
                .map(|s| (s.name().to_string(), s.subscriptions().clone()))
                .collect(),
        }
    }

    /// Restore subscriptions into `registry`. Sensors without an entry get
    /// `defaults` so new sensors reach every admin until they opt out.
    pub fn apply(&self, registry: &mut Registry, defaults: &BTreeSet<RecipientId>) {
        for sensor in registry.iter_mut() {
            let recipients = self.sensors.get(sensor.name()).unwrap_or(defaults);
            for recipient in recipients {
                sensor.add_subscription(*recipient);
            }
        }
    }
}

/// File-backed store for standing subscriptions
pub struct SubscriptionStore {
    path: PathBuf,
}

impl SubscriptionStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn restore(&self, registry: &mut Registry, defaults: &BTreeSet<RecipientId>) {
        PersistedSubscriptions::load(&self.path).apply(registry, defaults);
    }

    /// Persist the registry's current subscriptions, logging failures.
    pub fn save(&self, registry: &Registry) {
        let state = PersistedSubscriptions::from_registry(registry);
        match state.save(&self.path) {
            Ok(()) => info!("[Store] Saved subscriptions to {:?}", self.path),
            Err(e) => error!("[Store] Failed to save subscriptions: {}", e),
        }
    }
}
