use crate::ids::ClientId;

/// A frame payload that could not be turned into an image.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("frame payload is empty")]
    Empty,
    #[error("frame payload is not valid base64: {0}")]
    Base64(String),
    #[error("frame payload is not a supported image: {0}")]
    Image(String),
}

/// The detector backend failed (as opposed to returning no faces).
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DetectError {
    #[error("detector backend failed: {0}")]
    Backend(String),
    #[error("detector task aborted")]
    Aborted,
}

/// Per-session failures. None of these are fatal to the process; each is
/// reported to the one client it concerns.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("frame data is required")]
    MissingFrame,
    #[error("could not decode frame: {0}")]
    Decode(#[from] DecodeError),
    #[error("no faces detected")]
    DetectionEmpty,
    #[error("face detection failed: {0}")]
    Detect(#[from] DetectError),
    #[error("unknown mode: {0}")]
    UnknownMode(String),
    #[error("mode {0} has reached its participant limit")]
    LimitReached(String),
    #[error("capacity store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("invalid message: {0}")]
    Protocol(String),
    #[error("session not found: {0}")]
    NotFound(ClientId),
}

impl SessionError {
    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::MissingFrame => "missing_frame",
            Self::Decode(_) => "decode_error",
            Self::DetectionEmpty => "detection_empty",
            Self::Detect(_) => "detect_error",
            Self::UnknownMode(_) => "unknown_mode",
            Self::LimitReached(_) => "limit_reached",
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::Protocol(_) => "protocol_error",
            Self::NotFound(_) => "session_not_found",
        }
    }

    /// Whether a reservation the client holds survives this error.
    pub fn preserves_reservation(&self) -> bool {
        !matches!(self, Self::UnknownMode(_))
    }
}
