
use std::sync::Arc;
use std::time::Duration;

use spotlight_capacity::{Admission, CapacityRegistry};
use spotlight_core::{
    ClientId, DecodeError, DenyReason, FaceDetector, Frame, FrameDecoder, InboundMessage,
    ServerEvent, SessionError,
};
use spotlight_effects::EffectSeed;
use spotlight_telemetry::MetricsRecorder;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::session::{ClientSession, SessionTable};
use crate::supervisor::TaskSupervisor;

pub struct MessageRouter {
    sessions: Arc<SessionTable>,
    capacity: CapacityRegistry,
    supervisor: Arc<TaskSupervisor>,
    decoder: Arc<dyn FrameDecoder>,
    detector: Arc<dyn FaceDetector>,
    metrics: Arc<MetricsRecorder>,
}

impl MessageRouter {
    pub fn new(
        sessions: Arc<SessionTable>,
        capacity: CapacityRegistry,
        supervisor: Arc<TaskSupervisor>,
        decoder: Arc<dyn FrameDecoder>,
        detector: Arc<dyn FaceDetector>,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        Self {
            sessions,
            capacity,
            supervisor,
            decoder,
            detector,
            metrics,
        }
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    pub fn capacity(&self) -> &CapacityRegistry {
        &self.capacity
    }

    pub fn supervisor(&self) -> &TaskSupervisor {
        &self.supervisor
    }

    pub fn metrics(&self) -> &MetricsRecorder {
        &self.metrics
    }

    /// Register a new client. The receiver is the client's outbound queue.
    pub fn connect(&self) -> (Arc<ClientSession>, mpsc::Receiver<String>) {
        let (session, rx) = self.sessions.open();
        self.metrics.gauge_add("sessions_active", &[], 1);
        info!(client_id = %session.id(), "client connected");
        (session, rx)
    }

    /// Stop the client's effect, release its mode and forget it. Safe to
    /// call more than once, and while a request from the same client is
    /// still in flight: the session is closed before anything is released,
    /// so that request cannot reserve or start anything afterwards.
    pub async fn disconnect(&self, id: &ClientId) {
        let Ok(session) = self.sessions.get(id) else {
            return;
        };
        session.close();
        self.supervisor.stop(&session);
        if let Err(e) = self.capacity.release(id).await {
            warn!(client_id = %id, error = %e, kind = e.error_kind(), "release on disconnect failed");
        }
        session.set_reserved_mode(None);
        if self.sessions.remove(id).is_some() {
            self.metrics.gauge_add("sessions_active", &[], -1);
            info!(client_id = %id, "client disconnected");
        }
    }

    /// Disconnect every client. Used at shutdown.
    pub async fn disconnect_all(&self) {
        for id in self.sessions.ids() {
            self.disconnect(&id).await;
        }
    }

    /// Handle one raw message from `id`. Messages from one client must be
    /// handled in arrival order; different clients may run concurrently.
    pub async fn handle(&self, id: &ClientId, raw: &str) {
        let session = match self.sessions.get(id) {
            Ok(session) => session,
            Err(e) => {
                debug!(client_id = %id, error = %e, "message for unknown session");
                return;
            }
        };

        let message = match InboundMessage::parse(raw) {
            Ok(message) => message,
            Err(e) => {
                self.reject(&session, &e).await;
                return;
            }
        };
        self.metrics.counter_inc(
            "messages_received_total",
            &[("type", message.message_type())],
            1,
        );

        match message {
            InboundMessage::CheckAvailability { mode } => {
                self.check_availability(&session, &mode).await;
            }
            InboundMessage::StartAnimation {
                frame,
                start_animation,
                mode,
            } => {
                match self
                    .start_animation(&session, frame, start_animation, mode)
                    .await
                {
                    Ok(()) => {}
                    Err(SessionError::NotFound(_)) => {
                        debug!(client_id = %id, "client left before its effect started");
                    }
                    Err(e) => {
                        if !e.preserves_reservation() {
                            self.drop_reservation(&session).await;
                        }
                        self.reject(&session, &e).await;
                    }
                }
            }
            InboundMessage::AnimationCompleteClient { mode, winner_index } => {
                self.client_completed(&session, &mode, winner_index).await;
            }
            InboundMessage::LeaveMode => self.leave_mode(&session).await,
        }
    }

    async fn reject(&self, session: &ClientSession, err: &SessionError) {
        debug!(client_id = %session.id(), kind = err.error_kind(), error = %err, "request rejected");
        self.metrics
            .counter_inc("session_errors_total", &[("kind", err.error_kind())], 1);
        session.send(&ServerEvent::from(err)).await;
    }

    async fn check_availability(&self, session: &ClientSession, mode: &str) {
        let response = match self.capacity.try_reserve(mode, session.id()).await {
            Ok(admission) => {
                self.count_admission(admission.as_str());
                match admission {
                    Admission::Granted => {
                        session.set_reserved_mode(Some(mode.to_string()));
                        ServerEvent::allowed(mode)
                    }
                    Admission::LimitReached => ServerEvent::denied(mode, DenyReason::LimitReached),
                    Admission::UnknownMode => ServerEvent::denied(mode, DenyReason::InvalidMode),
                }
            }
            Err(e) => {
                warn!(client_id = %session.id(), mode, error = %e, "capacity store failed");
                self.count_admission("store_unavailable");
                ServerEvent::denied(mode, DenyReason::StoreUnavailable)
            }
        };
        session.send(&response).await;
    }

    fn count_admission(&self, result: &str) {
        self.metrics
            .counter_inc("admissions_total", &[("result", result)], 1);
    }

    async fn start_animation(
        &self,
        session: &Arc<ClientSession>,
        payload: Option<String>,
        start: bool,
        mode: Option<String>,
    ) -> Result<(), SessionError> {
        let payload = payload
            .filter(|p| !p.is_empty())
            .ok_or(SessionError::MissingFrame)?;
        let (frame, payload) = self.decode(payload).await?;
        session.cache_frame(frame.clone());
        if !start {
            return Ok(());
        }

        let mode = mode
            .or_else(|| session.reserved_mode())
            .ok_or_else(|| SessionError::Protocol("start_animation needs a mode".into()))?;
        if !self.capacity.catalog().contains(&mode) || !self.supervisor.has_effect(&mode) {
            return Err(SessionError::UnknownMode(mode));
        }

        let faces = self.detector.detect(&frame).await?;
        if session.is_closed() {
            return Err(SessionError::NotFound(session.id().clone()));
        }
        self.metrics
            .histogram_observe("faces_detected", &[("mode", &mode)], faces.len() as f64);
        session
            .send(&ServerEvent::Faces {
                faces: faces.clone(),
            })
            .await;
        if faces.is_empty() {
            return Err(SessionError::DetectionEmpty);
        }

        self.ensure_reservation(session, &mode).await?;
        if session.is_closed() {
            // disconnect may have released before our reserve landed.
            if let Err(e) = self.capacity.release(session.id()).await {
                warn!(client_id = %session.id(), error = %e, "release after disconnect failed");
            }
            return Err(SessionError::NotFound(session.id().clone()));
        }
        self.supervisor.start_or_replace(
            session,
            EffectSeed {
                mode,
                frame,
                faces,
                raw_frame: Arc::from(payload),
            },
        )?;
        Ok(())
    }

    /// Image decoding is CPU bound, so it runs on the blocking pool. The
    /// payload comes back alongside the frame for reuse.
    async fn decode(&self, payload: String) -> Result<(Frame, String), SessionError> {
        let decoder = Arc::clone(&self.decoder);
        let (decoded, payload) = tokio::task::spawn_blocking(move || {
            let decoded = decoder.decode(&payload);
            (decoded, payload)
        })
        .await
        .map_err(|e| DecodeError::Image(format!("decoder task failed: {e}")))?;
        Ok((decoded?, payload))
    }

    async fn ensure_reservation(&self, session: &ClientSession, mode: &str) -> Result<(), SessionError> {
        if session.reserved_mode().as_deref() == Some(mode) {
            return Ok(());
        }
        match self.capacity.try_reserve(mode, session.id()).await {
            Ok(Admission::Granted) => {
                session.set_reserved_mode(Some(mode.to_string()));
                Ok(())
            }
            Ok(Admission::LimitReached) => Err(SessionError::LimitReached(mode.to_string())),
            Ok(Admission::UnknownMode) => Err(SessionError::UnknownMode(mode.to_string())),
            Err(e) => Err(SessionError::StoreUnavailable(e.to_string())),
        }
    }

    async fn drop_reservation(&self, session: &ClientSession) -> Option<String> {
        let held = session.reserved_mode();
        session.set_reserved_mode(None);
        match self.capacity.release(session.id()).await {
            Ok(released) => released.or(held),
            Err(e) => {
                warn!(client_id = %session.id(), error = %e, "release failed");
                held
            }
        }
    }

    async fn client_completed(&self, session: &ClientSession, mode: &str, winner_index: Option<i64>) {
        if !self.capacity.catalog().is_client_paced(mode) {
            debug!(client_id = %session.id(), mode, "ignoring client completion for server-paced mode");
            return;
        }
        session.clear_active();
        session
            .send(&ServerEvent::SelectionComplete {
                mode: mode.to_string(),
            })
            .await;
        session
            .send(&ServerEvent::AnimationComplete {
                mode: mode.to_string(),
            })
            .await;
        self.metrics
            .counter_inc("effects_completed_total", &[("mode", mode)], 1);
        info!(client_id = %session.id(), mode, winner_index = ?winner_index, "client finished effect");
    }

    async fn leave_mode(&self, session: &ClientSession) {
        self.supervisor.stop(session);
        let released = self.drop_reservation(session).await;
        session.send(&ServerEvent::ModeLeft { mode: released }).await;
    }

    /// Stop every effect and release every client's mode.
    pub async fn shutdown(&self, grace: Duration) {
        let drained = self.supervisor.stop_all(grace).await;
        self.disconnect_all().await;
        info!(drained, "router shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use spotlight_capacity::MemoryCapacityStore;
    use spotlight_core::{encode_payload, Base64FrameDecoder, FrameSource, ModeCatalog, ScriptedDetector};
    use spotlight_effects::EffectRegistry;

    fn router(detector: ScriptedDetector) -> (MessageRouter, Arc<ScriptedDetector>) {
        let detector = Arc::new(detector);
        let catalog = Arc::new(ModeCatalog::default());
        let metrics = Arc::new(MetricsRecorder::new());
        let supervisor = TaskSupervisor::new(
            Arc::new(EffectRegistry::builtin()),
            Arc::clone(&catalog),
            detector.clone(),
            Arc::clone(&metrics),
        )
        .with_time_scale(0.0);
        let router = MessageRouter::new(
            Arc::new(SessionTable::new(512)),
            CapacityRegistry::new(Arc::new(MemoryCapacityStore::new()), catalog),
            Arc::new(supervisor),
            Arc::new(Base64FrameDecoder),
            detector.clone(),
            metrics,
        );
        (router, detector)
    }

    fn payload() -> String {
        encode_payload(&RgbImage::new(32, 24)).unwrap()
    }

    fn next(rx: &mut mpsc::Receiver<String>) -> serde_json::Value {
        serde_json::from_str(&rx.try_recv().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn malformed_message_gets_error() {
        let (router, _) = router(ScriptedDetector::with_faces(1));
        let (session, mut rx) = router.connect();
        router.handle(session.id(), "{not json").await;
        assert_eq!(next(&mut rx)["type"], "error");
    }

    #[tokio::test]
    async fn availability_records_reserved_mode() {
        let (router, _) = router(ScriptedDetector::with_faces(1));
        let (session, mut rx) = router.connect();
        router
            .handle(session.id(), r#"{"type":"check_availability","mode":"slot"}"#)
            .await;
        let reply = next(&mut rx);
        assert_eq!(reply["allowed"], true);
        assert_eq!(session.reserved_mode().as_deref(), Some("slot"));
        assert_eq!(
            router
                .metrics()
                .counter_get("admissions_total", &[("result", "granted")]),
            1
        );
    }

    #[tokio::test]
    async fn unknown_mode_is_denied() {
        let (router, _) = router(ScriptedDetector::with_faces(1));
        let (session, mut rx) = router.connect();
        router
            .handle(session.id(), r#"{"type":"check_availability","mode":"bingo"}"#)
            .await;
        let reply = next(&mut rx);
        assert_eq!(reply["allowed"], false);
        assert_eq!(reply["reason"], "invalid_mode");
    }

    #[tokio::test]
    async fn missing_frame_is_rejected_before_anything_else() {
        let (router, detector) = router(ScriptedDetector::with_faces(1));
        let (session, mut rx) = router.connect();
        router
            .handle(session.id(), r#"{"type":"start_animation","startAnimation":true,"mode":"slot"}"#)
            .await;
        assert_eq!(next(&mut rx)["message"], "frame data is required");
        assert_eq!(detector.call_count(), 0);
    }

    #[tokio::test]
    async fn undecodable_frame_is_rejected() {
        let (router, detector) = router(ScriptedDetector::with_faces(1));
        let (session, mut rx) = router.connect();
        router
            .handle(
                session.id(),
                r#"{"type":"start_animation","frame":"%%%","startAnimation":true,"mode":"slot"}"#,
            )
            .await;
        assert_eq!(next(&mut rx)["type"], "error");
        assert!(session.latest_frame().is_none());
        assert_eq!(detector.call_count(), 0);
    }

    #[tokio::test]
    async fn preview_frame_is_cached_silently() {
        let (router, detector) = router(ScriptedDetector::with_faces(1));
        let (session, mut rx) = router.connect();
        let msg = serde_json::json!({"type": "start_animation", "frame": payload()}).to_string();
        router.handle(session.id(), &msg).await;
        assert!(rx.try_recv().is_err());
        assert!(session.latest_frame().is_some());
        assert_eq!(detector.call_count(), 0);
    }

    #[tokio::test]
    async fn completion_for_server_paced_mode_is_ignored() {
        let (router, _) = router(ScriptedDetector::with_faces(1));
        let (session, mut rx) = router.connect();
        router
            .handle(session.id(), r#"{"type":"animation_complete_client","mode":"slot"}"#)
            .await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let (router, _) = router(ScriptedDetector::with_faces(1));
        let (session, _rx) = router.connect();
        let id = session.id().clone();
        router
            .handle(&id, r#"{"type":"check_availability","mode":"handpick"}"#)
            .await;
        router.disconnect(&id).await;
        router.disconnect(&id).await;
        assert!(router.sessions().is_empty());
        assert_eq!(router.capacity().count("handpick").await.unwrap(), 0);
        assert_eq!(router.metrics().gauge_get("sessions_active", &[]), 0);
    }
}
