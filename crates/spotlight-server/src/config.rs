use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Server configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Outbound messages buffered per client before senders wait.
    pub max_send_queue: usize,
    pub heartbeat_interval_secs: u64,
    /// A client that has not answered a ping for this long is dropped.
    pub client_timeout_secs: u64,
    /// Multiplier applied to every effect pause. 1.0 is real time.
    pub effect_time_scale: f64,
    /// How long shutdown waits for running effects to wind down.
    pub shutdown_grace_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8000,
            max_send_queue: 256,
            heartbeat_interval_secs: 30,
            client_timeout_secs: 90,
            effect_time_scale: 1.0,
            shutdown_grace_secs: 5,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.client_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}
