//! # Loader Context
//!
//! The mutable state one coordinator owns: per-application activation flags,
//! published configuration slots, registered entry points and completion
//! markers. Downstream applications read their configuration from here.

use dashmap::{DashMap, DashSet};
use serde_json::Value;

use crate::host::EntryPointRegistrar;

/// Per-key "active" flags.
#[derive(Debug, Default)]
pub struct ActivationRecords {
    flags: DashMap<String, bool>,
}

impl ActivationRecords {
    pub fn is_active(&self, key: &str) -> bool {
        self.flags.get(key).is_some_and(|flag| *flag)
    }

    pub fn mark_active(&self, key: &str) {
        self.flags.insert(key.to_string(), true);
    }

    pub fn clear(&self, key: &str) -> bool {
        self.flags
            .get_mut(key)
            .map(|mut flag| std::mem::replace(&mut *flag, false))
            .unwrap_or(false)
    }

    /// Clears every flag except `keep`'s. Returns the keys that were active.
    pub fn reset_except(&self, keep: Option<&str>) -> Vec<String> {
        let mut cleared: Vec<String> = self
            .flags
            .iter_mut()
            .filter(|entry| Some(entry.key().as_str()) != keep)
            .filter_map(|mut entry| {
                std::mem::replace(entry.value_mut(), false).then(|| entry.key().clone())
            })
            .collect();
        cleared.sort();
        cleared
    }

    pub fn active_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .flags
            .iter()
            .filter(|entry| *entry.value())
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        keys
    }
}

/// Named slots holding the configuration published for each application.
#[derive(Debug, Default)]
pub struct ConfigSlots {
    slots: DashMap<String, Value>,
}

impl ConfigSlots {
    pub fn publish(&self, slot: &str, config: Value) {
        self.slots.insert(slot.to_string(), config);
    }

    pub fn clear(&self, slot: &str) -> Option<Value> {
        self.slots.remove(slot).map(|(_, value)| value)
    }

    pub fn get(&self, slot: &str) -> Option<Value> {
        self.slots.get(slot).map(|value| value.clone())
    }

    pub fn contains(&self, slot: &str) -> bool {
        self.slots.contains_key(slot)
    }
}

#[derive(Debug, Default)]
pub struct LoaderContext {
    records: ActivationRecords,
    slots: ConfigSlots,
    entry_points: EntryPointRegistrar,
    markers: DashSet<String>,
}

impl LoaderContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &ActivationRecords {
        &self.records
    }

    pub fn slots(&self) -> &ConfigSlots {
        &self.slots
    }

    pub fn entry_points(&self) -> &EntryPointRegistrar {
        &self.entry_points
    }

    /// Configuration currently published under `slot`.
    pub fn published_config(&self, slot: &str) -> Option<Value> {
        self.slots.get(slot)
    }

    pub fn set_marker(&self, marker: &str) {
        self.markers.insert(marker.to_string());
    }

    pub fn has_marker(&self, marker: &str) -> bool {
        self.markers.contains(marker)
    }
}
