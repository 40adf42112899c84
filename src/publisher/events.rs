use crate::Error;
use std::sync::Arc;

/// Why a stream failed, as reported to the embedding layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailReason {
    Tls,
    HandshakeBad,
    AuthRejected,
    PublishRejected,
    NetworkLost,
    EncoderFailed,
    PermissionRevoked,
}

/// Rolling stream health snapshot, emitted about once per second
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Metrics {
    pub bitrate_kbps: u32,
    pub fps: u32,
    pub elapsed_ms: u64,
    pub dropped_frames: u64,
}

/// Everything the publisher reports outward. The embedding layer routes
/// these to its UI, overlay, and notifications.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Metrics(Metrics),
    ReconnectAttempt { attempt: u32, delay_ms: u64 },
    StreamStopped { manual: bool },
    StreamFailed(FailReason),
}

pub type EventSink = Arc<dyn Fn(StreamEvent) + Send + Sync>;

/// Map an internal error onto the externally visible failure reason
pub fn fail_reason_for(error: &Error) -> FailReason {
    match error {
        Error::Tls(_) => FailReason::Tls,
        Error::HandshakeBad(_) => FailReason::HandshakeBad,
        Error::AuthError(_) => FailReason::AuthRejected,
        Error::PublishRejected(_) => FailReason::PublishRejected,
        Error::EncoderFailed(_) => FailReason::EncoderFailed,
        Error::PermissionDenied(_) => FailReason::PermissionRevoked,
        _ => FailReason::NetworkLost,
    }
}
