
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use spotlight_core::{DetectError, FaceBox, FaceDetector, Frame};
use tracing::debug;

#[derive(Serialize)]
struct DetectRequest {
    image: String,
    width: u32,
    height: u32,
}

#[derive(Deserialize)]
struct DetectResponse {
    #[serde(default)]
    faces: Vec<FaceBox>,
}

/// POSTs `{"image": <base64>, "width", "height"}` to `endpoint` and expects
/// `{"faces": [[x, y, w, h], ...]}` back.
pub struct HttpDetector {
    client: Client,
    endpoint: String,
}

impl HttpDetector {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, DetectError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DetectError::Backend(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl FaceDetector for HttpDetector {
    fn name(&self) -> &str {
        "http"
    }

    async fn detect(&self, frame: &Frame) -> Result<Vec<FaceBox>, DetectError> {
        let body = DetectRequest {
            image: STANDARD.encode(frame.encoded()),
            width: frame.width(),
            height: frame.height(),
        };
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| DetectError::Backend(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            return Err(DetectError::Backend(format!("status {status}: {text}")));
        }

        let parsed: DetectResponse = resp
            .json()
            .await
            .map_err(|e| DetectError::Backend(format!("bad detector response: {e}")))?;
        debug!(faces = parsed.faces.len(), "detector answered");
        Ok(parsed.faces)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use image::RgbImage;
    use serde_json::{json, Value};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, router).await.ok();
        });
        format!("http://127.0.0.1:{port}/detect")
    }

    fn frame() -> Frame {
        Frame::from_image(RgbImage::new(16, 12)).unwrap()
    }

    #[tokio::test]
    async fn parses_face_boxes() {
        let router = Router::new().route(
            "/detect",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["width"], 16);
                assert!(!body["image"].as_str().unwrap().is_empty());
                Json(json!({"faces": [[1, 2, 3, 4], [10, 20, 30, 40]]}))
            }),
        );
        let detector = HttpDetector::new(serve(router).await, Duration::from_secs(5)).unwrap();
        let faces = detector.detect(&frame()).await.unwrap();
        assert_eq!(faces, vec![FaceBox::new(1, 2, 3, 4), FaceBox::new(10, 20, 30, 40)]);
    }

    #[tokio::test]
    async fn missing_faces_field_means_none() {
        let router = Router::new().route("/detect", post(|| async { Json(json!({})) }));
        let detector = HttpDetector::new(serve(router).await, Duration::from_secs(5)).unwrap();
        assert!(detector.detect(&frame()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn server_error_is_backend_failure() {
        let router = Router::new().route(
            "/detect",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "model not loaded") }),
        );
        let detector = HttpDetector::new(serve(router).await, Duration::from_secs(5)).unwrap();
        let err = detector.detect(&frame()).await.unwrap_err();
        assert!(err.to_string().contains("model not loaded"));
    }
}
