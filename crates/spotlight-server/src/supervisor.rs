//! Runs at most one effect per client.
//!
//! Every invocation gets its own cancellation token (a child of the
//! supervisor's root token) and a generation number. Starting a new effect
//! cancels the previous token, so a superseded effect stops at its next
//! emit or pause and can never clear flags that belong to its successor.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use spotlight_core::{FaceDetector, FrameSource, ModeCatalog, ServerEvent, SessionError};
use spotlight_effects::{Effect, EffectContext, EffectError, EffectRegistry, EffectSeed};
use spotlight_telemetry::MetricsRecorder;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::session::{ClientSession, TaskSlot};

pub struct TaskSupervisor {
    effects: Arc<EffectRegistry>,
    catalog: Arc<ModeCatalog>,
    detector: Arc<dyn FaceDetector>,
    metrics: Arc<MetricsRecorder>,
    root: CancellationToken,
    tracker: TaskTracker,
    next_generation: AtomicU64,
    time_scale: f64,
}

impl TaskSupervisor {
    pub fn new(
        effects: Arc<EffectRegistry>,
        catalog: Arc<ModeCatalog>,
        detector: Arc<dyn FaceDetector>,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        Self {
            effects,
            catalog,
            detector,
            metrics,
            root: CancellationToken::new(),
            tracker: TaskTracker::new(),
            next_generation: AtomicU64::new(0),
            time_scale: 1.0,
        }
    }

    pub fn with_time_scale(mut self, scale: f64) -> Self {
        self.time_scale = scale.max(0.0);
        self
    }

    pub fn has_effect(&self, mode: &str) -> bool {
        self.effects.contains(mode)
    }

    /// Start `seed.mode`'s effect for `session`, cancelling whatever it was
    /// running. Returns the new invocation's generation, or `NotFound` once
    /// the session has been closed.
    pub fn start_or_replace(
        &self,
        session: &Arc<ClientSession>,
        seed: EffectSeed,
    ) -> Result<u64, SessionError> {
        let effect = self
            .effects
            .get(&seed.mode)
            .ok_or_else(|| SessionError::UnknownMode(seed.mode.clone()))?;
        let mode = seed.mode.clone();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let token = self.root.child_token();

        let previous = session.replace_task(TaskSlot {
            generation,
            token: token.clone(),
            mode: mode.clone(),
        })?;
        if let Some(previous) = previous {
            previous.token.cancel();
            self.metrics
                .counter_inc("effects_superseded_total", &[("mode", &previous.mode)], 1);
            info!(
                client_id = %session.id(),
                previous = %previous.mode,
                mode = %mode,
                "superseding running effect"
            );
        }

        let frames: Arc<dyn FrameSource> = Arc::clone(session) as Arc<dyn FrameSource>;
        let ctx = EffectContext::new(
            seed,
            session.outbound(),
            token.clone(),
            frames,
            Arc::clone(&self.detector),
        )
        .with_time_scale(self.time_scale);

        let invocation = Invocation {
            session: Arc::clone(session),
            effect,
            mode: mode.clone(),
            generation,
            token,
            client_paced: self.catalog.is_client_paced(&mode),
            metrics: Arc::clone(&self.metrics),
        };
        self.tracker.spawn(invocation.watch(ctx));
        self.metrics
            .counter_inc("effects_started_total", &[("mode", &mode)], 1);
        debug!(client_id = %session.id(), mode = %mode, generation, "effect started");
        Ok(generation)
    }

    /// Cancel the session's invocation, if any. Returns whether one existed.
    pub fn stop(&self, session: &ClientSession) -> bool {
        session.clear_active();
        match session.take_task() {
            Some(slot) => {
                slot.token.cancel();
                debug!(client_id = %session.id(), mode = %slot.mode, "effect stopped");
                true
            }
            None => false,
        }
    }

    /// Watchers that have not finished yet.
    pub fn running_count(&self) -> usize {
        self.tracker.len()
    }

    /// Cancel every invocation and wait up to `grace` for them to unwind.
    /// Returns false if some were still running when the grace ran out.
    pub async fn stop_all(&self, grace: Duration) -> bool {
        self.root.cancel();
        self.tracker.close();
        let drained = tokio::time::timeout(grace, self.tracker.wait())
            .await
            .is_ok();
        if !drained {
            warn!(remaining = self.tracker.len(), "effects still running after shutdown grace");
        }
        drained
    }
}

/// One admitted effect run and everything its watcher needs.
struct Invocation {
    session: Arc<ClientSession>,
    effect: Arc<dyn Effect>,
    mode: String,
    generation: u64,
    token: CancellationToken,
    client_paced: bool,
    metrics: Arc<MetricsRecorder>,
}

impl Invocation {
    async fn watch(self, ctx: EffectContext) {
        let started = Instant::now();
        let guard = ActiveGuard::enter(
            Arc::clone(&self.session),
            self.generation,
            Arc::clone(&self.metrics),
        );
        let effect = Arc::clone(&self.effect);
        let handle = tokio::spawn(async move {
            let _guard = guard;
            ctx.emit_event(&ServerEvent::AnimationStart {
                mode: ctx.mode().to_string(),
            })
            .await?;
            effect.run(&ctx).await
        });

        match handle.await {
            Ok(Ok(winner)) => {
                self.metrics.histogram_observe(
                    "effect_duration_seconds",
                    &[("mode", &self.mode)],
                    started.elapsed().as_secs_f64(),
                );
                self.completed(winner.is_some()).await;
            }
            Ok(Err(EffectError::Cancelled)) => {
                debug!(client_id = %self.session.id(), mode = %self.mode, "effect cancelled");
            }
            Ok(Err(EffectError::Disconnected)) => {
                debug!(client_id = %self.session.id(), mode = %self.mode, "client left mid-effect");
            }
            Ok(Err(e)) => self.failed(&e.to_string()).await,
            Err(e) if e.is_panic() => self.failed("effect panicked").await,
            Err(_) => {
                debug!(client_id = %self.session.id(), mode = %self.mode, "effect task aborted");
            }
        }

        self.session.finish_task(self.generation);
    }

    async fn completed(&self, has_winner: bool) {
        if self.token.is_cancelled() {
            debug!(client_id = %self.session.id(), mode = %self.mode, "effect finished after cancel");
            return;
        }
        if self.client_paced {
            debug!(client_id = %self.session.id(), mode = %self.mode, "waiting for client to finish");
            return;
        }
        let event = ServerEvent::AnimationComplete {
            mode: self.mode.clone(),
        };
        tokio::select! {
            biased;
            _ = self.token.cancelled() => {
                debug!(client_id = %self.session.id(), mode = %self.mode, "stopped while sending completion");
                return;
            }
            _ = self.session.send(&event) => {}
        }
        self.metrics
            .counter_inc("effects_completed_total", &[("mode", &self.mode)], 1);
        info!(client_id = %self.session.id(), mode = %self.mode, has_winner, "effect complete");
    }

    async fn failed(&self, reason: &str) {
        warn!(client_id = %self.session.id(), mode = %self.mode, error = reason, "effect failed");
        self.metrics
            .counter_inc("effects_failed_total", &[("mode", &self.mode)], 1);
        let event = ServerEvent::error(format!("{} effect failed: {reason}", self.mode));
        tokio::select! {
            biased;
            _ = self.token.cancelled() => {}
            _ = self.session.send(&event) => {}
        }
        self.token.cancel();
        self.session.clear_active_if(self.generation);
    }
}

/// Holds the session's active flag for one generation.
struct ActiveGuard {
    session: Arc<ClientSession>,
    generation: u64,
    metrics: Arc<MetricsRecorder>,
}

impl ActiveGuard {
    fn enter(session: Arc<ClientSession>, generation: u64, metrics: Arc<MetricsRecorder>) -> Self {
        session.mark_active(generation);
        metrics.gauge_add("effects_active", &[], 1);
        Self {
            session,
            generation,
            metrics,
        }
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.session.clear_active_if(self.generation);
        self.metrics.gauge_add("effects_active", &[], -1);
    }
}
