#[derive(Debug, thiserror::Error)]
pub enum CapacityError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("unexpected store reply: {0}")]
    UnexpectedReply(String),
}

impl CapacityError {
    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Redis(e) if e.is_connection_dropped() || e.is_io_error() => "store_unreachable",
            Self::Redis(_) => "store_error",
            Self::UnexpectedReply(_) => "unexpected_reply",
        }
    }
}
