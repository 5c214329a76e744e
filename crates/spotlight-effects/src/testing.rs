use std::sync::Arc;

use image::RgbImage;
use spotlight_core::{FaceBox, FaceDetector, Frame, FrameSource, ScriptedDetector};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::context::{EffectContext, EffectSeed};
use crate::effect::Effect;
use crate::error::EffectError;

pub(crate) struct StaticFrames(Option<Frame>);

impl StaticFrames {
    pub(crate) fn empty() -> Self {
        Self(None)
    }
}

impl FrameSource for StaticFrames {
    fn latest_frame(&self) -> Option<Frame> {
        self.0.clone()
    }
}

pub(crate) fn frame() -> Frame {
    Frame::from_image(RgbImage::new(640, 480)).unwrap()
}

pub(crate) fn seed(mode: &str, faces: usize) -> EffectSeed {
    EffectSeed {
        mode: mode.to_string(),
        frame: frame(),
        faces: (0..faces)
            .map(|i| FaceBox::new(i as i32 * 100, 40, 80, 80))
            .collect(),
        raw_frame: Arc::from("cGl4ZWxz"),
    }
}

pub(crate) fn context(mode: &str, faces: usize) -> (EffectContext, mpsc::Receiver<String>) {
    let (tx, rx) = mpsc::channel(64);
    let ctx = EffectContext::new(
        seed(mode, faces),
        tx,
        CancellationToken::new(),
        Arc::new(StaticFrames::empty()),
        Arc::new(ScriptedDetector::with_faces(faces)),
    );
    (ctx, rx)
}

/// Run an effect to the end while draining its events.
pub(crate) async fn run_collect(
    effect: &dyn Effect,
    faces: usize,
    detector: Arc<dyn FaceDetector>,
) -> (Result<Option<FaceBox>, EffectError>, Vec<serde_json::Value>) {
    let (tx, mut rx) = mpsc::channel::<String>(16);
    let collector = tokio::spawn(async move {
        let mut events = Vec::new();
        while let Some(raw) = rx.recv().await {
            events.push(serde_json::from_str::<serde_json::Value>(&raw).unwrap());
        }
        events
    });
    let ctx = EffectContext::new(
        seed(effect.mode(), faces),
        tx,
        CancellationToken::new(),
        Arc::new(StaticFrames::empty()),
        detector,
    );
    let result = effect.run(&ctx).await;
    drop(ctx);
    (result, collector.await.unwrap())
}

pub(crate) fn types(events: &[serde_json::Value]) -> Vec<&str> {
    events.iter().filter_map(|e| e["type"].as_str()).collect()
}
