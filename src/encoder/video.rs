use crate::Result;
use crate::encoder::VideoEncoderSettings;
use std::time::Duration;

/// Opaque handle to the encoder's input surface. The platform layer wires
/// it to the screen-capture source; the core never touches its contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceHandle(pub u64);

/// One encoded H.264 output buffer in Annex-B form
#[derive(Debug, Clone)]
pub struct EncodedVideoFrame {
    /// Annex-B NAL bytes
    pub data: Vec<u8>,
    /// Presentation timestamp in microseconds
    pub pts_us: i64,
    pub is_keyframe: bool,
    /// Carries SPS+PPS instead of picture data
    pub is_config: bool,
}

/// Narrow surface over the platform's hardware H.264 encoder.
///
/// The core configures it once per stream session, drains its output on a
/// single thread, and may adjust the dynamic bitrate parameter while
/// running. Opening the hardware twice in one session is a platform error,
/// which is why the coordinator guards the drain loop with a start-once
/// latch.
pub trait VideoEncoder: Send {
    /// Configure and open the codec
    fn configure(&mut self, settings: &VideoEncoderSettings) -> Result<()>;

    /// Input surface for the platform capture source to render into
    fn input_surface(&self) -> SurfaceHandle;

    /// Dequeue the next encoded buffer, waiting up to `timeout`
    fn poll_output(&mut self, timeout: Duration) -> Result<Option<EncodedVideoFrame>>;

    /// Update the dynamic bitrate parameter
    fn set_bitrate(&mut self, kbps: u32) -> Result<()>;

    /// Release the codec
    fn stop(&mut self);
}
