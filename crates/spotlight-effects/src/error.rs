#[derive(Debug, thiserror::Error)]
pub enum EffectError {
    /// The invocation was superseded or stopped. Not a failure.
    #[error("effect cancelled")]
    Cancelled,

    #[error("client connection closed")]
    Disconnected,

    #[error("event serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("{0}")]
    Failed(String),
}

impl EffectError {
    /// Whether this outcome should be reported to the client as an error.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Serialize(_) | Self::Failed(_))
    }
}
