use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde_json::json;
use spotlight_core::{FaceBox, ServerEvent};

use super::{pick, require_faces};
use crate::context::EffectContext;
use crate::effect::Effect;
use crate::error::EffectError;

const EXPRESSIONS: [&str; 4] = ["open_mouth", "big_smile", "surprise", "ugly_face"];

/// Participants are asked to pull a face during a detection window; faces are
/// tracked live and the winner is drawn from whoever is still in frame when
/// the window closes.
#[derive(Clone, Debug)]
pub struct HandpickEffect {
    pub intro_delay: Duration,
    pub countdown: u32,
    pub countdown_delay: Duration,
    pub window: Duration,
    pub tick: Duration,
}

impl Default for HandpickEffect {
    fn default() -> Self {
        Self {
            intro_delay: Duration::from_secs(1),
            countdown: 5,
            countdown_delay: Duration::from_secs(1),
            window: Duration::from_secs(10),
            tick: Duration::from_millis(100),
        }
    }
}

impl HandpickEffect {
    fn ticks(&self) -> u32 {
        let tick = self.tick.as_millis().max(1);
        (self.window.as_millis() / tick).max(1) as u32
    }
}

#[async_trait]
impl Effect for HandpickEffect {
    fn mode(&self) -> &str {
        "handpick"
    }

    async fn run(&self, ctx: &EffectContext) -> Result<Option<FaceBox>, EffectError> {
        require_faces(ctx)?;
        let mut rng = StdRng::from_entropy();
        let expression = EXPRESSIONS.choose(&mut rng).copied().unwrap_or("big_smile");

        ctx.pause(self.intro_delay).await?;
        ctx.emit(&json!({"type": "handpick_start"})).await?;
        ctx.play_sound("handpick/start").await?;

        for count in (1..=self.countdown).rev() {
            ctx.emit(&json!({
                "type": "handpick_progress",
                "faces": [],
                "stage": "start",
                "progress": (self.countdown - count) as f64 / self.countdown as f64,
                "countdown": count,
                "expression_mode": expression,
            }))
            .await?;
            ctx.pause(self.countdown_delay).await?;
        }

        ctx.play_sound("handpick/main").await?;
        let mut tracked = ctx.refresh_faces().await;
        ctx.emit(&json!({
            "type": "handpick_calibration_complete",
            "expression_mode": expression,
            "measurement_time": self.window.as_secs(),
        }))
        .await?;

        let ticks = self.ticks();
        let mut last_notice = None;
        for t in 0..ticks {
            let elapsed = self.tick * t;
            let remaining = self.window.saturating_sub(elapsed).as_secs();
            if remaining <= 3 && remaining > 0 && last_notice != Some(remaining) {
                last_notice = Some(remaining);
                ctx.play_sound("handpick/countdown").await?;
            }

            let progress = (t as f64 / ticks as f64).min(1.0);
            match ctx.detect_latest().await {
                Ok(current) if !current.is_empty() => {
                    let faces: Vec<_> = current
                        .iter()
                        .map(|f| json!({"face": f, "expression_score": 0, "is_candidate": false}))
                        .collect();
                    tracked = current;
                    ctx.emit(&json!({
                        "type": "handpick_progress",
                        "faces": faces,
                        "stage": "detecting",
                        "progress": progress,
                    }))
                    .await?;
                }
                _ => {
                    ctx.emit(&json!({
                        "type": "handpick_progress",
                        "faces": [],
                        "stage": "waiting",
                        "progress": progress,
                    }))
                    .await?;
                }
            }
            ctx.pause(self.tick).await?;
        }

        let winner = pick(&mut rng, &tracked)?;
        let result_frame = STANDARD.encode(ctx.latest_frame().encoded());

        ctx.stop_sound("handpick/main").await?;
        ctx.play_sound("handpick/result").await?;
        ctx.emit(&json!({
            "type": "handpick_result",
            "face": winner,
            "expression_name": "lucky draw",
            "message": "Lucky pick!",
            "ranking": [{"face": winner, "rank": 1, "score": 0}],
            "result_frame": result_frame,
        }))
        .await?;
        ctx.emit_event(&ServerEvent::SelectionComplete {
            mode: ctx.mode().to_string(),
        })
        .await?;
        Ok(Some(winner))
    }
}
