pub mod error;
pub mod memory;
pub mod redis_store;
pub mod registry;
pub mod store;

pub use error::CapacityError;
pub use memory::MemoryCapacityStore;
pub use redis_store::RedisCapacityStore;
pub use registry::{Admission, CapacityRegistry};
pub use store::{CapacityStore, ReserveOutcome};
