use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use image::RgbImage;
use serde_json::{json, Value};
use spotlight_capacity::MemoryCapacityStore;
use spotlight_core::{
    encode_payload, DetectError, FaceBox, ModeCatalog, ScriptedDetector, ScriptedResponse,
};
use spotlight_effects::{Effect, EffectContext, EffectError, EffectRegistry};
use spotlight_server::{build_message_router, MessageRouter, ServerConfig};
use spotlight_telemetry::MetricsRecorder;
use tokio::sync::mpsc;

fn router_with(detector: ScriptedDetector, time_scale: f64) -> Arc<MessageRouter> {
    let config = ServerConfig {
        effect_time_scale: time_scale,
        max_send_queue: 1024,
        ..ServerConfig::default()
    };
    build_message_router(
        &config,
        Arc::new(MemoryCapacityStore::new()),
        ModeCatalog::default(),
        EffectRegistry::builtin(),
        Arc::new(detector),
        Arc::new(MetricsRecorder::new()),
    )
}

fn start(mode: &str) -> String {
    let frame = encode_payload(&RgbImage::new(64, 48)).unwrap();
    json!({"type": "start_animation", "frame": frame, "startAnimation": true, "mode": mode}).to_string()
}

fn check(mode: &str) -> String {
    json!({"type": "check_availability", "mode": mode}).to_string()
}

/// Collect events until the client's queue stays quiet.
async fn settle(rx: &mut mpsc::Receiver<String>) -> Vec<Value> {
    let mut events = Vec::new();
    while let Ok(Some(raw)) = tokio::time::timeout(Duration::from_secs(60), rx.recv()).await {
        events.push(serde_json::from_str(&raw).unwrap());
    }
    events
}

fn types(events: &[Value]) -> Vec<&str> {
    events.iter().filter_map(|e| e["type"].as_str()).collect()
}

fn count(events: &[Value], kind: &str) -> usize {
    events.iter().filter(|e| e["type"] == kind).count()
}

#[tokio::test]
async fn handpick_admits_one_client_until_it_leaves() {
    let router = router_with(ScriptedDetector::with_faces(1), 0.0);
    let (a, mut rx_a) = router.connect();
    let (b, mut rx_b) = router.connect();

    router.handle(a.id(), &check("handpick")).await;
    router.handle(b.id(), &check("handpick")).await;

    let reply_a: Value = serde_json::from_str(&rx_a.recv().await.unwrap()).unwrap();
    let reply_b: Value = serde_json::from_str(&rx_b.recv().await.unwrap()).unwrap();
    assert_eq!(reply_a["allowed"], true);
    assert_eq!(reply_b["allowed"], false);
    assert_eq!(reply_b["reason"], "limit_reached");

    router.disconnect(a.id()).await;
    router.handle(b.id(), &check("handpick")).await;
    let retry: Value = serde_json::from_str(&rx_b.recv().await.unwrap()).unwrap();
    assert_eq!(retry["allowed"], true);
    assert_eq!(router.capacity().count("handpick").await.unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn slot_run_streams_in_order() {
    let router = router_with(ScriptedDetector::with_faces(3), 0.0);
    let (session, mut rx) = router.connect();

    router.handle(session.id(), &check("slot")).await;
    router.handle(session.id(), &start("slot")).await;
    let events = settle(&mut rx).await;
    let kinds = types(&events);

    assert_eq!(&kinds[..3], &["availability_response", "faces", "animation_start"]);
    let first_step = kinds.iter().position(|k| *k == "animation_step").unwrap();
    assert!(first_step > 2);
    assert_eq!(&kinds[kinds.len() - 2..], &["selection_complete", "animation_complete"]);
    assert_eq!(events[1]["faces"].as_array().unwrap().len(), 3);
    assert_eq!(events.last().unwrap()["mode"], "slot");
    assert!(!session.is_running());
    assert!(!session.is_active());
}

#[tokio::test(start_paused = true)]
async fn restart_supersedes_running_effect() {
    let router = router_with(ScriptedDetector::with_faces(2), 1.0);
    let (session, mut rx) = router.connect();

    router.handle(session.id(), &start("slot")).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    router.handle(session.id(), &start("slot")).await;
    let events = settle(&mut rx).await;

    assert_eq!(count(&events, "faces"), 2);
    assert_eq!(count(&events, "animation_start"), 2);
    assert_eq!(count(&events, "animation_complete"), 1);
    assert_eq!(count(&events, "selection_complete"), 1);
    assert_eq!(types(&events).last(), Some(&"animation_complete"));
}

#[tokio::test(start_paused = true)]
async fn restart_can_switch_modes() {
    let router = router_with(ScriptedDetector::with_faces(2), 1.0);
    let (session, mut rx) = router.connect();

    router.handle(session.id(), &start("curtain")).await;
    tokio::time::sleep(Duration::from_millis(500)).await;
    router.handle(session.id(), &start("slot")).await;
    let events = settle(&mut rx).await;

    let completes: Vec<_> = events
        .iter()
        .filter(|e| e["type"] == "animation_complete")
        .collect();
    assert_eq!(completes.len(), 1);
    assert_eq!(completes[0]["mode"], "slot");
    assert_eq!(count(&events, "curtain_result"), 0);
    assert_eq!(router.capacity().mode_of(session.id()).await.unwrap().as_deref(), Some("slot"));
}

#[tokio::test(start_paused = true)]
async fn zero_faces_keeps_reservation() {
    let router = router_with(ScriptedDetector::with_faces(0), 0.0);
    let (session, mut rx) = router.connect();

    router.handle(session.id(), &check("handpick")).await;
    router.handle(session.id(), &start("handpick")).await;
    let events = settle(&mut rx).await;

    assert_eq!(types(&events), vec!["availability_response", "faces", "error"]);
    assert_eq!(events[1]["faces"], json!([]));
    assert_eq!(events[2]["message"], "no faces detected");
    assert_eq!(router.capacity().count("handpick").await.unwrap(), 1);
    assert!(!session.is_running());
}

#[tokio::test(start_paused = true)]
async fn detector_failure_keeps_reservation() {
    let detector = ScriptedDetector::new(vec![ScriptedResponse::Error(DetectError::Backend(
        "model offline".into(),
    ))]);
    let router = router_with(detector, 0.0);
    let (session, mut rx) = router.connect();

    router.handle(session.id(), &check("scanner")).await;
    router.handle(session.id(), &start("scanner")).await;
    let events = settle(&mut rx).await;

    assert_eq!(types(&events), vec!["availability_response", "error"]);
    assert!(events[1]["message"].as_str().unwrap().contains("model offline"));
    assert_eq!(router.capacity().count("scanner").await.unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn preview_frames_do_not_start_anything() {
    let detector = ScriptedDetector::with_faces(2);
    let router = router_with(detector, 0.0);
    let (session, mut rx) = router.connect();

    let frame = encode_payload(&RgbImage::new(64, 48)).unwrap();
    for _ in 0..3 {
        let msg = json!({"type": "start_animation", "frame": frame, "mode": "slot"}).to_string();
        router.handle(session.id(), &msg).await;
    }

    assert!(settle(&mut rx).await.is_empty());
    assert!(!session.is_running());
    assert_eq!(router.capacity().count("slot").await.unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn roulette_waits_for_client_completion() {
    let router = router_with(ScriptedDetector::with_faces(4), 1.0);
    let (session, mut rx) = router.connect();

    router.handle(session.id(), &check("roulette")).await;
    router.handle(session.id(), &start("roulette")).await;
    let events = settle(&mut rx).await;
    assert_eq!(count(&events, "init_roulette"), 1);
    assert_eq!(count(&events, "animation_complete"), 0);

    router
        .handle(
            session.id(),
            r#"{"type":"animation_complete_client","mode":"roulette","winnerIndex":1}"#,
        )
        .await;
    let events = settle(&mut rx).await;
    assert_eq!(types(&events), vec!["selection_complete", "animation_complete"]);
    assert!(!session.is_active());
}

#[tokio::test(start_paused = true)]
async fn leave_mode_stops_effect_and_releases() {
    let router = router_with(ScriptedDetector::with_faces(2), 1.0);
    let (session, mut rx) = router.connect();

    router.handle(session.id(), &check("race")).await;
    router.handle(session.id(), &start("race")).await;
    tokio::time::sleep(Duration::from_millis(500)).await;
    router.handle(session.id(), r#"{"type":"leave_mode"}"#).await;
    let events = settle(&mut rx).await;

    let left = events.iter().find(|e| e["type"] == "mode_left").unwrap();
    assert_eq!(left["mode"], "race");
    assert_eq!(count(&events, "animation_complete"), 0);
    assert_eq!(router.capacity().count("race").await.unwrap(), 0);
    assert!(!session.is_running());
    assert!(session.reserved_mode().is_none());
}

#[tokio::test(start_paused = true)]
async fn unknown_mode_releases_reservation() {
    let router = router_with(ScriptedDetector::with_faces(2), 0.0);
    let (session, mut rx) = router.connect();

    router.handle(session.id(), &check("slot")).await;
    router.handle(session.id(), &start("bingo")).await;
    let events = settle(&mut rx).await;

    assert_eq!(types(&events), vec!["availability_response", "error"]);
    assert_eq!(events[1]["message"], "unknown mode: bingo");
    assert_eq!(router.capacity().count("slot").await.unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn start_without_check_still_respects_capacity() {
    let router = router_with(ScriptedDetector::with_faces(1), 0.0);
    let (holder, _rx_holder) = router.connect();
    let (late, mut rx_late) = router.connect();

    router.handle(holder.id(), &check("handpick")).await;
    router.handle(late.id(), &start("handpick")).await;
    let events = settle(&mut rx_late).await;

    assert_eq!(types(&events), vec!["faces", "error"]);
    assert!(events[1]["message"].as_str().unwrap().contains("participant limit"));
    assert!(!late.is_running());
}

#[tokio::test(start_paused = true)]
async fn disconnect_mid_effect_cleans_up() {
    let router = router_with(ScriptedDetector::with_faces(3), 1.0);
    let (session, rx) = router.connect();

    router.handle(session.id(), &check("scanner")).await;
    router.handle(session.id(), &start("scanner")).await;
    tokio::time::sleep(Duration::from_millis(700)).await;
    assert!(session.is_running());

    drop(rx);
    router.disconnect(session.id()).await;
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert!(!session.is_running());
    assert!(!session.is_active());
    assert_eq!(router.supervisor().running_count(), 0);
    assert_eq!(router.capacity().count("scanner").await.unwrap(), 0);
    assert!(router.sessions().is_empty());
}

#[tokio::test]
async fn malformed_messages_get_protocol_errors() {
    let router = router_with(ScriptedDetector::with_faces(1), 0.0);
    let (session, mut rx) = router.connect();

    router.handle(session.id(), "definitely not json").await;
    router.handle(session.id(), r#"{"type":"dance"}"#).await;
    for _ in 0..2 {
        let reply: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(reply["type"], "error");
        assert!(reply["message"].as_str().unwrap().starts_with("invalid message"));
    }
    assert_eq!(
        router
            .metrics()
            .counter_get("session_errors_total", &[("kind", "protocol_error")]),
        2
    );
}

#[tokio::test(start_paused = true)]
async fn disconnect_during_detection_leaves_nothing_behind() {
    for reserve_first in [false, true] {
        let detector = ScriptedDetector::new(vec![ScriptedResponse::Delay(
            Duration::from_millis(200),
            Box::new(ScriptedResponse::Faces(vec![FaceBox::new(0, 0, 50, 50)])),
        )]);
        let router = router_with(detector, 0.0);
        let (session, _rx) = router.connect();
        let id = session.id().clone();
        if reserve_first {
            router.handle(&id, &check("handpick")).await;
        }

        let in_flight = tokio::spawn({
            let router = Arc::clone(&router);
            let id = id.clone();
            async move { router.handle(&id, &start("handpick")).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        router.disconnect(&id).await;
        in_flight.await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(router.sessions().is_empty());
        assert_eq!(router.capacity().count("handpick").await.unwrap(), 0);
        assert!(!session.is_running());
        assert_eq!(router.supervisor().running_count(), 0);

        let (next, mut rx_next) = router.connect();
        router.handle(next.id(), &check("handpick")).await;
        let reply: Value = serde_json::from_str(&rx_next.recv().await.unwrap()).unwrap();
        assert_eq!(reply["allowed"], true, "reserve_first={reserve_first}");
    }
}

/// Picks the first detected face without animating anything.
struct QuickPick;

#[async_trait]
impl Effect for QuickPick {
    fn mode(&self) -> &str {
        "slot"
    }

    async fn run(&self, ctx: &EffectContext) -> Result<Option<FaceBox>, EffectError> {
        Ok(ctx.initial_faces().first().copied())
    }
}

#[tokio::test(start_paused = true)]
async fn disconnect_while_completion_is_queued() {
    let mut effects = EffectRegistry::new();
    effects.register(Arc::new(QuickPick));
    // faces and animation_start fill the queue, so animation_complete waits.
    let config = ServerConfig {
        effect_time_scale: 0.0,
        max_send_queue: 2,
        ..ServerConfig::default()
    };
    let router = build_message_router(
        &config,
        Arc::new(MemoryCapacityStore::new()),
        ModeCatalog::default(),
        effects,
        Arc::new(ScriptedDetector::with_faces(2)),
        Arc::new(MetricsRecorder::new()),
    );
    let (session, mut rx) = router.connect();

    router.handle(session.id(), &check("slot")).await;
    let reply: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
    assert_eq!(reply["allowed"], true);
    router.handle(session.id(), &start("slot")).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(router.supervisor().running_count(), 1);

    router.disconnect(session.id()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(router.supervisor().running_count(), 0);
    assert_eq!(router.capacity().count("slot").await.unwrap(), 0);
    assert!(router.sessions().is_empty());
    let events = settle(&mut rx).await;
    assert_eq!(types(&events), vec!["faces", "animation_start"]);
}
