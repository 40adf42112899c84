use crate::Result;

/// Narrow surface over a platform PCM capture handle (microphone or system
/// audio). Implementations deliver interleaved stereo 16-bit samples at
/// 48 kHz and block for at most their internal read timeout.
///
/// The microphone source is expected to use the raw voice-recognition
/// capture path with echo cancellation, noise suppression, and gain
/// control disabled; system-audio capture is scoped to media, game, and
/// unattributed playback.
pub trait AudioCaptureSource: Send {
    /// Read up to `buf.len()` interleaved samples, returning how many were
    /// written. A short read means the capture buffer ran dry within the
    /// timeout; the caller fills the rest with silence.
    fn read_stereo_pcm16(&mut self, buf: &mut [i16]) -> Result<usize>;
}

/// One encoded AAC output buffer
#[derive(Debug, Clone)]
pub struct EncodedAudioFrame {
    /// Raw AAC access unit, or the AudioSpecificConfig when `is_config`
    pub data: Vec<u8>,
    /// Presentation timestamp in microseconds
    pub pts_us: i64,
    /// Carries the AudioSpecificConfig; produced exactly once, first
    pub is_config: bool,
}

/// Narrow surface over the platform AAC-LC encoder. Consumes one
/// 1024-sample interleaved stereo frame per call.
pub trait AudioEncoder: Send {
    fn encode(&mut self, pcm: &[i16], pts_us: i64) -> Result<Vec<EncodedAudioFrame>>;
}
