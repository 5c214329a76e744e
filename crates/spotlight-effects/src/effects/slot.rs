use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::json;
use spotlight_core::{FaceBox, ServerEvent};

use super::{pick, require_faces};
use crate::context::EffectContext;
use crate::effect::Effect;
use crate::error::EffectError;

/// Three reels spin through random faces, slow down, and land on one winner.
#[derive(Clone, Debug)]
pub struct SlotEffect {
    pub spin_steps: usize,
    pub base_delay: Duration,
    /// Added per step so the reels visibly slow down.
    pub delay_growth: Duration,
    pub reel_stop_delay: Duration,
}

impl Default for SlotEffect {
    fn default() -> Self {
        Self {
            spin_steps: 15,
            base_delay: Duration::from_millis(100),
            delay_growth: Duration::from_millis(20),
            reel_stop_delay: Duration::from_secs(1),
        }
    }
}

const REELS: usize = 3;

#[async_trait]
impl Effect for SlotEffect {
    fn mode(&self) -> &str {
        "slot"
    }

    async fn run(&self, ctx: &EffectContext) -> Result<Option<FaceBox>, EffectError> {
        let faces = require_faces(ctx)?;
        let mut rng = StdRng::from_entropy();

        ctx.emit(&json!({"type": "init_slot_machine", "frame": ctx.raw_frame()}))
            .await?;
        ctx.loop_sound("slot_machine/slot_spin").await?;

        for step in 0..self.spin_steps {
            let mut shown = Vec::with_capacity(REELS);
            for _ in 0..REELS {
                shown.push(pick(&mut rng, &faces)?);
            }
            ctx.emit(&json!({"type": "animation_step", "step": step, "faces": shown}))
                .await?;
            ctx.pause(self.base_delay + self.delay_growth * step as u32)
                .await?;
        }
        ctx.stop_sound("slot_machine/slot_spin").await?;

        let winner = pick(&mut rng, &faces)?;
        ctx.emit(&json!({"type": "animation_result", "face": winner}))
            .await?;

        for slot_idx in 0..REELS {
            ctx.play_sound("slot_machine/slot_stop").await?;
            ctx.emit(&json!({"type": "show_slot", "slot_idx": slot_idx, "face": winner}))
                .await?;
            ctx.pause(self.reel_stop_delay).await?;
        }

        ctx.play_sound("slot_machine/winner").await?;
        let height = ctx.initial_frame().height() as i64;
        ctx.emit(&json!({
            "type": "show_text",
            "text": "Lucky 777",
            "position": {"x": 50, "y": (height - 50).max(0)},
            "style": {"fontSize": 30, "color": "#00ff00"},
        }))
        .await?;
        ctx.emit_event(&ServerEvent::SelectionComplete {
            mode: ctx.mode().to_string(),
        })
        .await?;
        Ok(Some(winner))
    }
}
