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

/// A stage curtain closes and reopens on a new face several times; the last
/// face revealed wins. Each round re-detects faces on the latest frame.
#[derive(Clone, Debug)]
pub struct CurtainEffect {
    pub countdown: u32,
    pub countdown_delay: Duration,
    pub min_rounds: usize,
    pub max_rounds: usize,
    /// Curtain positions per close or open sweep.
    pub sweep_steps: u32,
    pub sweep_delay: Duration,
    pub closed_hold: Duration,
    pub spotlight_hold: Duration,
}

impl Default for CurtainEffect {
    fn default() -> Self {
        Self {
            countdown: 5,
            countdown_delay: Duration::from_secs(1),
            min_rounds: 3,
            max_rounds: 5,
            sweep_steps: 12,
            sweep_delay: Duration::from_millis(25),
            closed_hold: Duration::from_millis(300),
            spotlight_hold: Duration::from_secs(3),
        }
    }
}

impl CurtainEffect {
    fn rounds(&self, faces: usize) -> usize {
        faces.clamp(self.min_rounds, self.max_rounds.max(self.min_rounds))
    }

    async fn sweep(&self, ctx: &EffectContext, closing: bool) -> Result<(), EffectError> {
        let steps = self.sweep_steps.max(1);
        let state = if closing { "closing" } else { "opening" };
        for i in 0..=steps {
            let open = if closing { steps - i } else { i };
            ctx.emit(&json!({
                "type": "curtain_update",
                "position": open as f64 / steps as f64,
                "state": state,
            }))
            .await?;
            ctx.pause(self.sweep_delay).await?;
        }
        Ok(())
    }
}

/// Bigger zoom for smaller faces, capped per size band.
fn curtain_zoom(face: &FaceBox, frame_width: u32) -> f64 {
    let ratio = face.width as f64 / frame_width.max(1) as f64;
    if ratio < 0.1 {
        (1.0 / ratio.max(0.05)).min(4.0)
    } else if ratio < 0.2 {
        (1.0 / ratio.max(0.08)).min(2.5)
    } else {
        (1.0 / ratio.max(0.1)).min(1.8)
    }
}

#[async_trait]
impl Effect for CurtainEffect {
    fn mode(&self) -> &str {
        "curtain"
    }

    async fn run(&self, ctx: &EffectContext) -> Result<Option<FaceBox>, EffectError> {
        let faces = require_faces(ctx)?;
        let mut rng = StdRng::from_entropy();
        let frame_width = ctx.initial_frame().width();

        ctx.emit(&json!({
            "type": "curtain_intro",
            "duration": self.countdown,
            "text": "Curtain call!",
        }))
        .await?;
        ctx.play_sound("curtain/tada").await?;
        for count in (1..=self.countdown).rev() {
            ctx.emit(&json!({"type": "curtain_countdown", "count": count}))
                .await?;
            ctx.pause(self.countdown_delay).await?;
        }
        ctx.loop_sound("curtain/drumroll").await?;
        ctx.emit(&json!({"type": "curtain_intro_end"})).await?;

        let mut selected = pick(&mut rng, &faces)?;
        let mut zoom = curtain_zoom(&selected, frame_width);
        let rounds = self.rounds(faces.len());
        for round in 0..rounds {
            ctx.play_sound("curtain/curtain_close").await?;
            self.sweep(ctx, true).await?;
            ctx.pause(self.closed_hold).await?;

            let current = ctx.refresh_faces().await;
            selected = pick(&mut rng, &current)?;
            zoom = curtain_zoom(&selected, frame_width);
            ctx.emit(&json!({
                "type": "curtain_selection",
                "round": round,
                "face": selected,
                "zoom_params": {"scale": zoom, "duration": 0.8},
            }))
            .await?;

            ctx.play_sound("curtain/curtain_open").await?;
            ctx.play_sound("curtain/spotlight").await?;
            self.sweep(ctx, false).await?;
            ctx.pause(self.spotlight_hold).await?;
        }

        ctx.stop_sound("curtain/drumroll").await?;
        ctx.play_sound("curtain/tada").await?;
        ctx.play_sound("curtain/applause").await?;
        ctx.emit(&json!({
            "type": "curtain_result",
            "face": selected,
            "text": "Today's star!",
            "zoom_params": {"scale": zoom, "duration": 0.8},
        }))
        .await?;
        ctx.emit_event(&ServerEvent::SelectionComplete {
            mode: ctx.mode().to_string(),
        })
        .await?;
        Ok(Some(selected))
    }
}
