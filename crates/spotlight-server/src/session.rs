use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use spotlight_core::{ClientId, Frame, FrameSource, ServerEvent, SessionError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// The effect invocation a session is currently running.
#[derive(Clone, Debug)]
pub(crate) struct TaskSlot {
    pub(crate) generation: u64,
    pub(crate) token: CancellationToken,
    pub(crate) mode: String,
}

/// A connected client: its outbound queue, last frame, held mode and the
/// effect invocation currently running for it.
pub struct ClientSession {
    id: ClientId,
    tx: mpsc::Sender<String>,
    last_frame: RwLock<Option<Frame>>,
    reserved_mode: Mutex<Option<String>>,
    task: Mutex<Option<TaskSlot>>,
    /// Set under the `task` lock once the client is being disconnected.
    closed: AtomicBool,
    /// Generation of the invocation whose effect body is executing, 0 if none.
    active_generation: AtomicU64,
    last_pong: AtomicU64,
}

impl ClientSession {
    fn new(id: ClientId, tx: mpsc::Sender<String>) -> Self {
        Self {
            id,
            tx,
            last_frame: RwLock::new(None),
            reserved_mode: Mutex::new(None),
            task: Mutex::new(None),
            closed: AtomicBool::new(false),
            active_generation: AtomicU64::new(0),
            last_pong: AtomicU64::new(now_secs()),
        }
    }

    pub fn id(&self) -> &ClientId {
        &self.id
    }

    pub(crate) fn outbound(&self) -> mpsc::Sender<String> {
        self.tx.clone()
    }

    /// Queue an event, waiting for space. Returns false once the
    /// connection is gone.
    pub async fn send(&self, event: &ServerEvent) -> bool {
        match self.tx.send(event.to_json()).await {
            Ok(()) => true,
            Err(_) => {
                debug!(client_id = %self.id, event = event.event_type(), "client gone, event dropped");
                false
            }
        }
    }

    pub fn cache_frame(&self, frame: Frame) {
        *self.last_frame.write() = Some(frame);
    }

    pub fn reserved_mode(&self) -> Option<String> {
        self.reserved_mode.lock().clone()
    }

    pub(crate) fn set_reserved_mode(&self, mode: Option<String>) {
        *self.reserved_mode.lock() = mode;
    }

    /// True while an invocation is registered and not cancelled.
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|slot| !slot.token.is_cancelled())
    }

    /// True while an effect body is executing.
    pub fn is_active(&self) -> bool {
        self.active_generation.load(Ordering::Acquire) != 0
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Refuse any further invocations. Whatever is running now is left for
    /// the caller to stop.
    pub(crate) fn close(&self) {
        let _task = self.task.lock();
        self.closed.store(true, Ordering::Release);
    }

    /// Install a new invocation, handing back the one it displaces. Fails
    /// once the session is closed.
    pub(crate) fn replace_task(&self, slot: TaskSlot) -> Result<Option<TaskSlot>, SessionError> {
        let mut task = self.task.lock();
        if self.closed.load(Ordering::Acquire) {
            return Err(SessionError::NotFound(self.id.clone()));
        }
        let previous = task.replace(slot);
        self.active_generation.store(0, Ordering::Release);
        Ok(previous)
    }

    pub(crate) fn take_task(&self) -> Option<TaskSlot> {
        self.task.lock().take()
    }

    /// Forget the invocation, but only if it is still the current one.
    pub(crate) fn finish_task(&self, generation: u64) {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|slot| slot.generation == generation) {
            *task = None;
        }
    }

    /// Generations only grow, so a stale invocation can never take the
    /// flag back from a newer one.
    pub(crate) fn mark_active(&self, generation: u64) {
        self.active_generation.fetch_max(generation, Ordering::AcqRel);
    }

    /// Clear the active flag if `generation` still owns it.
    pub(crate) fn clear_active_if(&self, generation: u64) -> bool {
        self.active_generation
            .compare_exchange(generation, 0, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn clear_active(&self) {
        self.active_generation.store(0, Ordering::Release);
    }

    pub fn record_pong(&self) {
        self.last_pong.store(now_secs(), Ordering::Relaxed);
    }

    pub fn is_alive(&self, timeout: Duration) -> bool {
        let last = self.last_pong.load(Ordering::Relaxed);
        now_secs().saturating_sub(last) < timeout.as_secs()
    }
}

impl FrameSource for ClientSession {
    fn latest_frame(&self) -> Option<Frame> {
        self.last_frame.read().clone()
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// All connected clients, keyed by id.
pub struct SessionTable {
    sessions: DashMap<ClientId, Arc<ClientSession>>,
    max_send_queue: usize,
}

impl SessionTable {
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            max_send_queue: max_send_queue.max(1),
        }
    }

    /// Register a fresh client and return its session and outbound queue.
    pub fn open(&self) -> (Arc<ClientSession>, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        (self.register(ClientId::new(), tx), rx)
    }

    /// Register a client with an existing outbound sender. Replaces any
    /// session already stored under `id`.
    pub fn register(&self, id: ClientId, tx: mpsc::Sender<String>) -> Arc<ClientSession> {
        let session = Arc::new(ClientSession::new(id.clone(), tx));
        self.sessions.insert(id, Arc::clone(&session));
        session
    }

    pub fn get(&self, id: &ClientId) -> Result<Arc<ClientSession>, SessionError> {
        self.sessions
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| SessionError::NotFound(id.clone()))
    }

    pub fn cache_frame(&self, id: &ClientId, frame: Frame) -> Result<(), SessionError> {
        self.get(id)?.cache_frame(frame);
        Ok(())
    }

    /// Remove a client. Removing an unknown id is a no-op.
    pub fn remove(&self, id: &ClientId) -> Option<Arc<ClientSession>> {
        self.sessions.remove(id).map(|(_, session)| session)
    }

    pub fn ids(&self) -> Vec<ClientId> {
        self.sessions.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
