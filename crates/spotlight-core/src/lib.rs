pub mod detect;
pub mod errors;
pub mod face;
pub mod frame;
pub mod ids;
pub mod modes;
pub mod protocol;

pub use detect::{BlockingDetector, FaceDetector, ScriptedDetector, ScriptedResponse};
pub use errors::{DecodeError, DetectError, SessionError};
pub use face::FaceBox;
pub use frame::{encode_payload, Base64FrameDecoder, Frame, FrameDecoder, FrameSource};
pub use ids::ClientId;
pub use modes::{ModeCatalog, ModeDescriptor, UNLIMITED_CAPACITY};
pub use protocol::{DenyReason, InboundMessage, ServerEvent};
