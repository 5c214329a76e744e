use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Capacity used for modes without a participant limit.
pub const UNLIMITED_CAPACITY: u32 = i32::MAX as u32;

/// Static description of one selection mode.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeDescriptor {
    pub name: String,
    pub capacity: u32,
    /// Completion is signaled by the client instead of the effect.
    #[serde(default)]
    pub client_paced: bool,
}

impl ModeDescriptor {
    pub fn new(name: impl Into<String>, capacity: u32) -> Self {
        Self {
            name: name.into(),
            capacity: capacity.max(1),
            client_paced: false,
        }
    }

    pub fn unlimited(name: impl Into<String>) -> Self {
        Self::new(name, UNLIMITED_CAPACITY)
    }

    pub fn client_paced(mut self) -> Self {
        self.client_paced = true;
        self
    }

    pub fn is_unlimited(&self) -> bool {
        self.capacity >= UNLIMITED_CAPACITY
    }
}

/// Process-wide set of modes, fixed after startup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModeCatalog {
    modes: BTreeMap<String, ModeDescriptor>,
}

impl ModeCatalog {
    pub fn new(modes: impl IntoIterator<Item = ModeDescriptor>) -> Self {
        Self {
            modes: modes.into_iter().map(|m| (m.name.clone(), m)).collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ModeDescriptor> {
        self.modes.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modes.contains_key(name)
    }

    pub fn is_client_paced(&self, name: &str) -> bool {
        self.get(name).is_some_and(|m| m.client_paced)
    }

    /// Mode names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.modes.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModeDescriptor> {
        self.modes.values()
    }

    /// Replace the capacity of a known mode.
    pub fn set_capacity(&mut self, name: &str, capacity: u32) -> Result<(), String> {
        match self.modes.get_mut(name) {
            Some(mode) => {
                mode.capacity = capacity.max(1);
                Ok(())
            }
            None => Err(format!("unknown mode: {name}")),
        }
    }

    /// Apply a `name=N` override (N may be `unlimited`).
    pub fn apply_override(&mut self, entry: &str) -> Result<(), String> {
        let (name, value) = entry
            .split_once('=')
            .ok_or_else(|| format!("expected name=capacity, got {entry:?}"))?;
        let capacity = match value.trim() {
            "unlimited" => UNLIMITED_CAPACITY,
            v => v
                .parse::<u32>()
                .map_err(|e| format!("invalid capacity {v:?}: {e}"))?,
        };
        if capacity == 0 {
            return Err(format!("capacity for {name} must be positive"));
        }
        self.set_capacity(name.trim(), capacity)
    }
}

impl Default for ModeCatalog {
    fn default() -> Self {
        Self::new([
            ModeDescriptor::unlimited("slot"),
            ModeDescriptor::unlimited("roulette").client_paced(),
            ModeDescriptor::unlimited("race"),
            ModeDescriptor::unlimited("curtain"),
            ModeDescriptor::unlimited("scanner"),
            ModeDescriptor::new("handpick", 1),
        ])
    }
}
