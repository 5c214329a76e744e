use async_trait::async_trait;

use crate::error::CapacityError;

/// Result of one atomic reserve attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// The client was added (and moved out of any previous mode).
    Reserved,
    /// The client already held this mode; nothing changed.
    AlreadyHeld,
    /// The mode is at capacity; nothing changed.
    Full,
}

/// Shared membership storage.
///
/// Every method is a single atomic operation against the backing store, so
/// several processes may share one store without extra coordination.
#[async_trait]
pub trait CapacityStore: Send + Sync {
    fn name(&self) -> &str;

    /// Add `client` to `mode` if the mode holds fewer than `capacity`
    /// members. A client belongs to at most one mode: a successful reserve
    /// removes it from whatever mode it held before.
    async fn reserve(
        &self,
        mode: &str,
        client: &str,
        capacity: u32,
    ) -> Result<ReserveOutcome, CapacityError>;

    /// Drop the client's membership. Returns the mode it held, if any.
    async fn release(&self, client: &str) -> Result<Option<String>, CapacityError>;

    async fn count(&self, mode: &str) -> Result<u64, CapacityError>;

    async fn mode_of(&self, client: &str) -> Result<Option<String>, CapacityError>;
}
