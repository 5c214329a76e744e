
use std::sync::Arc;

use spotlight_core::{ClientId, ModeCatalog};
use tracing::{debug, info};

use crate::error::CapacityError;
use crate::store::{CapacityStore, ReserveOutcome};

/// Answer to a reserve request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    Granted,
    LimitReached,
    UnknownMode,
}

impl Admission {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Granted => "granted",
            Self::LimitReached => "limit_reached",
            Self::UnknownMode => "unknown_mode",
        }
    }
}

/// Applies the mode catalog's capacities to a shared [`CapacityStore`].
#[derive(Clone)]
pub struct CapacityRegistry {
    store: Arc<dyn CapacityStore>,
    catalog: Arc<ModeCatalog>,
}

impl CapacityRegistry {
    pub fn new(store: Arc<dyn CapacityStore>, catalog: Arc<ModeCatalog>) -> Self {
        Self { store, catalog }
    }

    pub fn catalog(&self) -> &ModeCatalog {
        &self.catalog
    }

    pub fn store_name(&self) -> &str {
        self.store.name()
    }

    pub async fn try_reserve(
        &self,
        mode: &str,
        client: &ClientId,
    ) -> Result<Admission, CapacityError> {
        let Some(descriptor) = self.catalog.get(mode) else {
            debug!(client_id = %client, mode, "reserve for unknown mode");
            return Ok(Admission::UnknownMode);
        };
        let outcome = self
            .store
            .reserve(mode, client.as_str(), descriptor.capacity)
            .await?;
        match outcome {
            ReserveOutcome::Reserved => {
                info!(client_id = %client, mode, "mode reserved");
                Ok(Admission::Granted)
            }
            ReserveOutcome::AlreadyHeld => Ok(Admission::Granted),
            ReserveOutcome::Full => {
                info!(client_id = %client, mode, capacity = descriptor.capacity, "mode full");
                Ok(Admission::LimitReached)
            }
        }
    }

    /// Drop whatever the client holds. Safe to call repeatedly.
    pub async fn release(&self, client: &ClientId) -> Result<Option<String>, CapacityError> {
        let released = self.store.release(client.as_str()).await?;
        if let Some(mode) = &released {
            info!(client_id = %client, mode = %mode, "mode released");
        }
        Ok(released)
    }

    pub async fn count(&self, mode: &str) -> Result<u64, CapacityError> {
        self.store.count(mode).await
    }

    pub async fn mode_of(&self, client: &ClientId) -> Result<Option<String>, CapacityError> {
        self.store.mode_of(client.as_str()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryCapacityStore;

    fn registry(store: Arc<dyn CapacityStore>) -> CapacityRegistry {
        CapacityRegistry::new(store, Arc::new(ModeCatalog::default()))
    }

    #[tokio::test]
    async fn handpick_admits_one() {
        let reg = registry(Arc::new(MemoryCapacityStore::new()));
        let a = ClientId::new();
        let b = ClientId::new();
        assert_eq!(reg.try_reserve("handpick", &a).await.unwrap(), Admission::Granted);
        assert_eq!(reg.try_reserve("handpick", &b).await.unwrap(), Admission::LimitReached);
        assert_eq!(reg.count("handpick").await.unwrap(), 1);

        reg.release(&a).await.unwrap();
        assert_eq!(reg.try_reserve("handpick", &b).await.unwrap(), Admission::Granted);
    }

    #[tokio::test]
    async fn unknown_mode_is_not_reserved() {
        let reg = registry(Arc::new(MemoryCapacityStore::new()));
        let a = ClientId::new();
        assert_eq!(reg.try_reserve("bingo", &a).await.unwrap(), Admission::UnknownMode);
        assert_eq!(reg.mode_of(&a).await.unwrap(), None);
    }

    #[tokio::test]
    async fn re_reserving_same_mode_keeps_count() {
        let reg = registry(Arc::new(MemoryCapacityStore::new()));
        let a = ClientId::new();
        reg.try_reserve("handpick", &a).await.unwrap();
        assert_eq!(reg.try_reserve("handpick", &a).await.unwrap(), Admission::Granted);
        assert_eq!(reg.count("handpick").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn release_without_reservation_is_noop() {
        let reg = registry(Arc::new(MemoryCapacityStore::new()));
        let a = ClientId::new();
        assert_eq!(reg.release(&a).await.unwrap(), None);
        assert_eq!(reg.release(&a).await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_processes_never_exceed_capacity() {
        let store: Arc<dyn CapacityStore> = Arc::new(MemoryCapacityStore::new());
        let mut catalog = ModeCatalog::default();
        catalog.set_capacity("race", 4).unwrap();
        let catalog = Arc::new(catalog);

        // One registry per simulated process, all sharing the store.
        let registries: Vec<_> = (0..8)
            .map(|_| CapacityRegistry::new(Arc::clone(&store), Arc::clone(&catalog)))
            .collect();

        let mut handles = Vec::new();
        for (i, reg) in registries.iter().enumerate() {
            for _ in 0..10 {
                let reg = reg.clone();
                handles.push(tokio::spawn(async move {
                    let client = ClientId::new();
                    let admitted = reg.try_reserve("race", &client).await.unwrap();
                    assert!(reg.count("race").await.unwrap() <= 4);
                    if admitted == Admission::Granted && i % 2 == 0 {
                        tokio::task::yield_now().await;
                        reg.release(&client).await.unwrap();
                    }
                    admitted
                }));
            }
        }
        for result in futures::future::join_all(handles).await {
            result.unwrap();
            assert!(store.count("race").await.unwrap() <= 4);
        }
        assert!(store.count("race").await.unwrap() <= 4);
    }
}
