use async_trait::async_trait;
use spotlight_core::FaceBox;

use crate::context::EffectContext;
use crate::error::EffectError;

/// One mode's selection sequence.
///
/// `run` streams mode-specific events through the context and returns the
/// chosen face, or `None` when the sequence ends without a winner (the
/// client-paced roulette picks on the client side). The supervisor sends
/// `animation_start` before calling `run` and handles completion after it.
#[async_trait]
pub trait Effect: Send + Sync {
    fn mode(&self) -> &str;

    async fn run(&self, ctx: &EffectContext) -> Result<Option<FaceBox>, EffectError>;
}
