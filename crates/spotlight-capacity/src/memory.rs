use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::CapacityError;
use crate::store::{CapacityStore, ReserveOutcome};

#[derive(Default)]
struct Inner {
    members: HashMap<String, HashSet<String>>,
    client_mode: HashMap<String, String>,
}

/// Process-local store. All bookkeeping sits behind one lock, which gives
/// the same test-and-set atomicity as the Redis scripts.
#[derive(Default)]
pub struct MemoryCapacityStore {
    inner: Mutex<Inner>,
}

impl MemoryCapacityStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CapacityStore for MemoryCapacityStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn reserve(
        &self,
        mode: &str,
        client: &str,
        capacity: u32,
    ) -> Result<ReserveOutcome, CapacityError> {
        let mut inner = self.inner.lock();
        let current = inner.client_mode.get(client).cloned();
        if current.as_deref() == Some(mode) {
            return Ok(ReserveOutcome::AlreadyHeld);
        }

        let size = inner.members.get(mode).map_or(0, HashSet::len);
        if size >= capacity as usize {
            return Ok(ReserveOutcome::Full);
        }

        if let Some(old) = current {
            if let Some(set) = inner.members.get_mut(&old) {
                set.remove(client);
                if set.is_empty() {
                    inner.members.remove(&old);
                }
            }
        }
        inner
            .members
            .entry(mode.to_string())
            .or_default()
            .insert(client.to_string());
        inner
            .client_mode
            .insert(client.to_string(), mode.to_string());
        Ok(ReserveOutcome::Reserved)
    }

    async fn release(&self, client: &str) -> Result<Option<String>, CapacityError> {
        let mut inner = self.inner.lock();
        let Some(mode) = inner.client_mode.remove(client) else {
            return Ok(None);
        };
        if let Some(set) = inner.members.get_mut(&mode) {
            set.remove(client);
            if set.is_empty() {
                inner.members.remove(&mode);
            }
        }
        Ok(Some(mode))
    }

    async fn count(&self, mode: &str) -> Result<u64, CapacityError> {
        Ok(self.inner.lock().members.get(mode).map_or(0, |s| s.len() as u64))
    }

    async fn mode_of(&self, client: &str) -> Result<Option<String>, CapacityError> {
        Ok(self.inner.lock().client_mode.get(client).cloned())
    }
}
