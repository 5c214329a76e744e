
mod curtain;
mod handpick;
mod race;
mod roulette;
mod scanner;
mod slot;

pub use curtain::CurtainEffect;
pub use handpick::HandpickEffect;
pub use race::RaceEffect;
pub use roulette::RouletteEffect;
pub use scanner::ScannerEffect;
pub use slot::SlotEffect;

use rand::rngs::StdRng;
use rand::Rng;
use spotlight_core::FaceBox;

use crate::context::EffectContext;
use crate::error::EffectError;

fn require_faces(ctx: &EffectContext) -> Result<Vec<FaceBox>, EffectError> {
    if ctx.initial_faces().is_empty() {
        return Err(EffectError::Failed(format!(
            "{} needs at least one face",
            ctx.mode()
        )));
    }
    Ok(ctx.initial_faces().to_vec())
}

fn pick(rng: &mut StdRng, faces: &[FaceBox]) -> Result<FaceBox, EffectError> {
    if faces.is_empty() {
        return Err(EffectError::Failed("no faces to choose from".into()));
    }
    Ok(faces[rng.gen_range(0..faces.len())])
}

/// Zoom factor that makes `face` fill `target_ratio` of the frame width.
fn zoom_to_ratio(face: &FaceBox, frame_width: u32, target_ratio: f64, max: f64) -> f64 {
    let ratio = face.width as f64 / frame_width.max(1) as f64;
    (target_ratio / ratio.max(0.01)).clamp(1.0, max)
}
