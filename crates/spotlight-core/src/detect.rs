use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use image::RgbImage;

use crate::errors::DetectError;
use crate::face::FaceBox;
use crate::frame::Frame;

/// Locates faces in a frame. An empty result is a valid answer, not an error.
#[async_trait]
pub trait FaceDetector: Send + Sync {
    fn name(&self) -> &str;

    async fn detect(&self, frame: &Frame) -> Result<Vec<FaceBox>, DetectError>;
}

/// Adapter for synchronous, CPU-bound models.
///
/// Inference runs on tokio's blocking pool so a slow model never stalls the
/// tasks that are reading other clients' messages.
pub struct BlockingDetector<F> {
    name: String,
    model: Arc<F>,
}

impl<F> BlockingDetector<F>
where
    F: Fn(&RgbImage) -> Vec<FaceBox> + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, model: F) -> Self {
        Self {
            name: name.into(),
            model: Arc::new(model),
        }
    }
}

#[async_trait]
impl<F> FaceDetector for BlockingDetector<F>
where
    F: Fn(&RgbImage) -> Vec<FaceBox> + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn detect(&self, frame: &Frame) -> Result<Vec<FaceBox>, DetectError> {
        let model = Arc::clone(&self.model);
        let image = frame.image_arc();
        tokio::task::spawn_blocking(move || model(&image))
            .await
            .map_err(|e| {
                if e.is_cancelled() {
                    DetectError::Aborted
                } else {
                    DetectError::Backend(format!("detector panicked: {e}"))
                }
            })
    }
}

/// Pre-programmed detector results for deterministic testing.
pub enum ScriptedResponse {
    Faces(Vec<FaceBox>),
    Error(DetectError),
    /// Wait a duration, then yield the inner response.
    Delay(Duration, Box<ScriptedResponse>),
}

/// Detector that replays scripted responses in order, repeating the last one
/// once the script is exhausted.
pub struct ScriptedDetector {
    responses: Vec<ScriptedResponse>,
    call_count: AtomicUsize,
}

impl ScriptedDetector {
    pub fn new(responses: Vec<ScriptedResponse>) -> Self {
        Self {
            responses,
            call_count: AtomicUsize::new(0),
        }
    }

    /// Always report the same faces.
    pub fn fixed(faces: Vec<FaceBox>) -> Self {
        Self::new(vec![ScriptedResponse::Faces(faces)])
    }

    /// Always report `n` evenly spaced faces.
    pub fn with_faces(n: usize) -> Self {
        let faces = (0..n)
            .map(|i| FaceBox::new(i as i32 * 100, 40, 80, 80))
            .collect();
        Self::fixed(faces)
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl FaceDetector for ScriptedDetector {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn detect(&self, _frame: &Frame) -> Result<Vec<FaceBox>, DetectError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        let Some(last) = self.responses.len().checked_sub(1) else {
            return Ok(Vec::new());
        };
        let mut response = &self.responses[idx.min(last)];
        loop {
            match response {
                ScriptedResponse::Faces(faces) => return Ok(faces.clone()),
                ScriptedResponse::Error(e) => return Err(e.clone()),
                ScriptedResponse::Delay(d, inner) => {
                    tokio::time::sleep(*d).await;
                    response = inner;
                }
            }
        }
    }
}
