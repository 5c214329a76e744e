pub mod config;
pub mod connection;
pub mod detector;
pub mod router;
pub mod server;
pub mod session;
pub mod supervisor;

pub use config::ServerConfig;
pub use detector::HttpDetector;
pub use router::MessageRouter;
pub use server::{build_router, start, AppState, ServerHandle};
pub use session::{ClientSession, SessionTable};
pub use supervisor::TaskSupervisor;

use std::sync::Arc;

use spotlight_capacity::{CapacityRegistry, CapacityStore};
use spotlight_core::{Base64FrameDecoder, FaceDetector, ModeCatalog};
use spotlight_effects::EffectRegistry;
use spotlight_telemetry::MetricsRecorder;

/// Wire a [`MessageRouter`] from its collaborators.
pub fn build_message_router(
    config: &ServerConfig,
    store: Arc<dyn CapacityStore>,
    catalog: ModeCatalog,
    effects: EffectRegistry,
    detector: Arc<dyn FaceDetector>,
    metrics: Arc<MetricsRecorder>,
) -> Arc<MessageRouter> {
    let catalog = Arc::new(catalog);
    let supervisor = TaskSupervisor::new(
        Arc::new(effects),
        Arc::clone(&catalog),
        Arc::clone(&detector),
        Arc::clone(&metrics),
    )
    .with_time_scale(config.effect_time_scale);

    Arc::new(MessageRouter::new(
        Arc::new(SessionTable::new(config.max_send_queue)),
        CapacityRegistry::new(store, catalog),
        Arc::new(supervisor),
        Arc::new(Base64FrameDecoder),
        detector,
        metrics,
    ))
}
