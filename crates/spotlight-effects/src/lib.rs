pub mod context;
pub mod effect;
pub mod effects;
pub mod error;
pub mod registry;

pub use context::{EffectContext, EffectSeed};
pub use effect::Effect;
pub use error::EffectError;
pub use registry::EffectRegistry;

#[cfg(test)]
pub(crate) mod testing;
