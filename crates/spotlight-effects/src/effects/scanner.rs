use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use spotlight_core::{FaceBox, ServerEvent};

use super::{require_faces, zoom_to_ratio};
use crate::context::EffectContext;
use crate::effect::Effect;
use crate::error::EffectError;

/// A targeting reticle sweeps random points, then hops between real faces
/// (re-detected every hop) and locks on, pans and zooms into the winner.
#[derive(Clone, Debug)]
pub struct ScannerEffect {
    pub decoy_targets: usize,
    pub decoy_delay: Duration,
    pub lock_hops: usize,
    /// The final hops stay on the chosen face.
    pub locked_hops: usize,
    pub zoom_delay: Duration,
    pub transition_delay: Duration,
}

impl Default for ScannerEffect {
    fn default() -> Self {
        Self {
            decoy_targets: 10,
            decoy_delay: Duration::from_millis(200),
            lock_hops: 15,
            locked_hops: 3,
            zoom_delay: Duration::from_millis(200),
            transition_delay: Duration::from_millis(500),
        }
    }
}

// Camera pan path relative to the face, as fractions of the frame.
const PAN_PATH: [(f64, f64); 13] = [
    (-0.15, -0.15),
    (0.2, -0.1),
    (-0.05, -0.25),
    (0.15, 0.2),
    (-0.22, 0.05),
    (0.25, -0.15),
    (-0.1, 0.18),
    (0.0, -0.22),
    (0.18, 0.12),
    (-0.23, -0.08),
    (0.1, 0.25),
    (-0.15, 0.2),
    (0.22, -0.12),
];

fn hop_delay(hop: usize) -> Duration {
    match hop {
        0..=4 => Duration::from_millis(200),
        5..=7 => Duration::from_millis(250),
        8..=9 => Duration::from_millis(400),
        10..=11 => Duration::from_millis(600),
        _ => Duration::from_millis(800),
    }
}

impl ScannerEffect {
    async fn decoys(&self, ctx: &EffectContext, rng: &mut StdRng) -> Result<(), EffectError> {
        let (w, h) = (ctx.initial_frame().width(), ctx.initial_frame().height());
        let total = self.decoy_targets.max(1);
        for i in 0..self.decoy_targets {
            let x = rng.gen_range(w / 10..=(w - w / 10).max(w / 10));
            let y = rng.gen_range(h / 10..=(h - h / 10).max(h / 10));
            ctx.emit(&json!({
                "type": "scanner_target",
                "target_point": [x, y],
                "progress": (i + 1) * 100 / total,
                "stage": "fake_targeting",
            }))
            .await?;
            ctx.pause(self.decoy_delay).await?;
        }
        Ok(())
    }

    /// Hop between faces and return the one the reticle settles on.
    async fn lock_on(&self, ctx: &EffectContext, faces: Vec<FaceBox>) -> Result<FaceBox, EffectError> {
        let mut candidates = faces;
        let settle_at = self.lock_hops.saturating_sub(self.locked_hops + 1);
        let mut chosen = 0usize;
        for hop in 0..self.lock_hops {
            ctx.play_sound("scanner_zoom/processing").await?;
            if let Ok(current) = ctx.detect_latest().await {
                if !current.is_empty() {
                    candidates = current;
                }
            }
            let locked = hop > settle_at;
            let idx = if locked {
                chosen.min(candidates.len() - 1)
            } else {
                hop % candidates.len()
            };
            if hop == settle_at {
                chosen = idx;
            }
            ctx.emit(&json!({
                "type": "scanner_face_target",
                "face": candidates[idx],
                "is_final": locked,
                "stage": "face_targeting",
            }))
            .await?;
            ctx.pause(hop_delay(hop)).await?;
        }
        Ok(candidates[chosen.min(candidates.len() - 1)])
    }
}

#[async_trait]
impl Effect for ScannerEffect {
    fn mode(&self) -> &str {
        "scanner"
    }

    async fn run(&self, ctx: &EffectContext) -> Result<Option<FaceBox>, EffectError> {
        let faces = require_faces(ctx)?;
        let mut rng = StdRng::from_entropy();
        let (width, height) = (ctx.initial_frame().width(), ctx.initial_frame().height());

        ctx.play_sound("scanner_zoom/scanner_start").await?;
        ctx.emit(&json!({"type": "show_overlay", "name": "eye_of_sauron", "duration": 1.0}))
            .await?;
        ctx.loop_sound("scanner_zoom/scan_sweep").await?;
        self.decoys(ctx, &mut rng).await?;
        ctx.stop_sound("scanner_zoom/scan_sweep").await?;
        ctx.pause(self.transition_delay).await?;

        let face = self.lock_on(ctx, faces).await?;

        let first_zoom = zoom_to_ratio(&face, width, 0.07, 3.0);
        for step in 1..=4u32 {
            ctx.emit(&json!({
                "type": "scanner_zoom",
                "face": face,
                "zoom_scale": 1.0 + (first_zoom - 1.0) * step as f64 / 4.0,
                "stage": "first_zoom",
                "progress": step * 25,
            }))
            .await?;
            ctx.pause(self.zoom_delay).await?;
        }

        ctx.play_sound("scanner_zoom/processing").await?;
        let (cx, cy) = face.center();
        let (half_w, half_h) = (width.max(1) as f64 / 2.0, height.max(1) as f64 / 2.0);
        let final_offset = (
            (half_w - cx as f64) / half_w * 0.5,
            (half_h - cy as f64) / half_h * 0.5,
        );
        let path: Vec<(f64, f64)> = PAN_PATH.iter().copied().chain([final_offset]).collect();
        for (i, (offset_x, offset_y)) in path.iter().enumerate() {
            if i > 0 && i % 4 == 0 {
                ctx.play_sound("scanner_zoom/target_locked").await?;
            }
            ctx.emit(&json!({
                "type": "scanner_camera_pan",
                "face": face,
                "offset_x": offset_x,
                "offset_y": offset_y,
                "stage": "camera_panning",
                "progress": (i + 1) * 100 / path.len(),
            }))
            .await?;
            let delay = if i + 1 == path.len() {
                Duration::from_millis(750)
            } else {
                Duration::from_millis(rng.gen_range(400..=600))
            };
            ctx.pause(delay).await?;
        }

        ctx.play_sound("scanner_zoom/beep").await?;
        ctx.pause(self.transition_delay).await?;

        let final_zoom = zoom_to_ratio(&face, width, 0.27, 5.0);
        for step in 1..=5u32 {
            ctx.emit(&json!({
                "type": "scanner_zoom",
                "face": face,
                "zoom_scale": first_zoom + (final_zoom - first_zoom) * step as f64 / 5.0,
                "stage": "final_zoom",
                "progress": step * 20,
                "show_border": step == 5,
            }))
            .await?;
            ctx.pause(self.zoom_delay).await?;
        }

        ctx.play_sound("scanner_zoom/whistle").await?;
        ctx.emit(&json!({
            "type": "scanner_result",
            "face": face,
            "message": "Only one remains.",
        }))
        .await?;
        ctx.emit_event(&ServerEvent::SelectionComplete {
            mode: ctx.mode().to_string(),
        })
        .await?;
        Ok(Some(face))
    }
}
