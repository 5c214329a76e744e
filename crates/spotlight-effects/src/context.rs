
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use spotlight_core::{DetectError, FaceBox, FaceDetector, Frame, FrameSource, ServerEvent};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::EffectError;

/// Inputs fixed when an invocation is admitted.
#[derive(Clone, Debug)]
pub struct EffectSeed {
    pub mode: String,
    pub frame: Frame,
    pub faces: Vec<FaceBox>,
    /// The client's own payload, echoed back so it can render the still.
    pub raw_frame: Arc<str>,
}

/// Everything one effect invocation may touch.
///
/// The cancellation token belongs to this invocation alone. Superseding
/// cancels it, after which `emit` and `pause` return
/// [`EffectError::Cancelled`] and nothing more reaches the client.
pub struct EffectContext {
    seed: EffectSeed,
    sink: mpsc::Sender<String>,
    token: CancellationToken,
    frames: Arc<dyn FrameSource>,
    detector: Arc<dyn FaceDetector>,
    time_scale: f64,
}

impl EffectContext {
    pub fn new(
        seed: EffectSeed,
        sink: mpsc::Sender<String>,
        token: CancellationToken,
        frames: Arc<dyn FrameSource>,
        detector: Arc<dyn FaceDetector>,
    ) -> Self {
        Self {
            seed,
            sink,
            token,
            frames,
            detector,
            time_scale: 1.0,
        }
    }

    /// Multiply every pause by `scale` (0 disables pacing).
    pub fn with_time_scale(mut self, scale: f64) -> Self {
        self.time_scale = scale.max(0.0);
        self
    }

    pub fn mode(&self) -> &str {
        &self.seed.mode
    }

    pub fn initial_frame(&self) -> &Frame {
        &self.seed.frame
    }

    pub fn initial_faces(&self) -> &[FaceBox] {
        &self.seed.faces
    }

    pub fn raw_frame(&self) -> &str {
        &self.seed.raw_frame
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_running(&self) -> bool {
        !self.token.is_cancelled()
    }

    pub fn checkpoint(&self) -> Result<(), EffectError> {
        if self.token.is_cancelled() {
            Err(EffectError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Send one JSON event. Waits for queue space, but gives up as soon as
    /// the invocation is cancelled.
    pub async fn emit<T: Serialize + ?Sized>(&self, event: &T) -> Result<(), EffectError> {
        self.checkpoint()?;
        let text = serde_json::to_string(event)?;
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(EffectError::Cancelled),
            sent = self.sink.send(text) => sent.map_err(|_| EffectError::Disconnected),
        }
    }

    pub async fn emit_event(&self, event: &ServerEvent) -> Result<(), EffectError> {
        self.emit(event).await
    }

    pub async fn play_sound(&self, sound: &str) -> Result<(), EffectError> {
        self.emit(&serde_json::json!({"type": "play_sound", "sound": sound}))
            .await
    }

    pub async fn loop_sound(&self, sound: &str) -> Result<(), EffectError> {
        self.emit(&serde_json::json!({
            "type": "play_sound",
            "sound": sound,
            "options": {"loop": true},
        }))
        .await
    }

    pub async fn stop_sound(&self, sound: &str) -> Result<(), EffectError> {
        self.emit(&serde_json::json!({"type": "stop_sound", "sound": sound}))
            .await
    }

    /// Sleep for a pacing delay. Returns early with `Cancelled`.
    pub async fn pause(&self, delay: Duration) -> Result<(), EffectError> {
        self.checkpoint()?;
        let delay = delay.mul_f64(self.time_scale);
        if delay.is_zero() {
            tokio::task::yield_now().await;
            return self.checkpoint();
        }
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(EffectError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    /// The session's most recent frame, or the admitted one if none newer.
    pub fn latest_frame(&self) -> Frame {
        self.frames
            .latest_frame()
            .unwrap_or_else(|| self.seed.frame.clone())
    }

    /// Run the detector on the latest frame and return its raw answer.
    pub async fn detect_latest(&self) -> Result<Vec<FaceBox>, DetectError> {
        let frame = self.latest_frame();
        self.detector.detect(&frame).await
    }

    /// Faces in the latest frame, falling back to the admitted faces when
    /// detection finds nothing or fails.
    pub async fn refresh_faces(&self) -> Vec<FaceBox> {
        match self.detect_latest().await {
            Ok(faces) if !faces.is_empty() => faces,
            Ok(_) => self.seed.faces.clone(),
            Err(e) => {
                debug!(mode = %self.seed.mode, error = %e, "face refresh failed");
                self.seed.faces.clone()
            }
        }
    }
}
