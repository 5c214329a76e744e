use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use spotlight_core::FaceBox;

use super::require_faces;
use crate::context::EffectContext;
use crate::effect::Effect;
use crate::error::EffectError;

/// Hands the wheel parameters to the client, which spins it and reports
/// back with `animation_complete_client`. Returns immediately.
#[derive(Clone, Debug)]
pub struct RouletteEffect {
    pub max_slices: usize,
}

impl Default for RouletteEffect {
    fn default() -> Self {
        Self { max_slices: 7 }
    }
}

#[async_trait]
impl Effect for RouletteEffect {
    fn mode(&self) -> &str {
        "roulette"
    }

    async fn run(&self, ctx: &EffectContext) -> Result<Option<FaceBox>, EffectError> {
        let faces = require_faces(ctx)?;
        let mut rng = StdRng::from_entropy();

        let amount = faces.len().min(self.max_slices.max(1));
        let indices = rand::seq::index::sample(&mut rng, faces.len(), amount).into_vec();
        let chosen: Vec<FaceBox> = indices.iter().map(|&i| faces[i]).collect();

        let initial_speed: f64 = rng.gen_range(10.0..13.0);
        let direction = if rng.gen_bool(0.5) { 1.0 } else { -1.0 };
        let deceleration: f64 = rng.gen_range(0.20..0.30);

        ctx.emit(&json!({
            "type": "init_roulette",
            "faces": chosen,
            "face_indices": indices,
            "frame": ctx.raw_frame(),
            "animation_params": {
                "initial_speed": initial_speed * direction,
                "deceleration_constant": deceleration,
                "speed_threshold": 0.01,
                "use_linear_deceleration": true,
            },
        }))
        .await?;
        Ok(None)
    }
}
