/// Immutable per-stream encoding parameters, fixed at stream start
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamProfile {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub video_bitrate_kbps: u32,
    pub audio_sample_rate: u32,
    pub audio_channels: u8,
    pub audio_bitrate_kbps: u32,
    /// AVC level indication (x10: 40 = 4.0, 42 = 4.2, 50 = 5.0)
    pub avc_level: u8,
}

/// Audio is fixed for the standard ingest profile
pub const AUDIO_SAMPLE_RATE: u32 = 48_000;
pub const AUDIO_CHANNELS: u8 = 2;
pub const AUDIO_BITRATE_KBPS: u32 = 128;

/// Samples per AAC frame
pub const AAC_FRAME_SAMPLES: usize = 1024;

impl StreamProfile {
    /// Derive the stream profile from the device screen dimensions.
    ///
    /// The short edge is capped at 1080 (downscaling both dimensions
    /// proportionally), dimensions are aligned to multiples of 2, and the
    /// video bitrate comes from the short-edge/fps lookup table.
    pub fn from_screen(screen_width: u32, screen_height: u32, fps: u32) -> Self {
        let short = screen_width.min(screen_height).max(2);
        let (mut width, mut height) = if short > 1080 {
            let scale = 1080.0 / short as f64;
            (
                (screen_width as f64 * scale) as u32,
                (screen_height as f64 * scale) as u32,
            )
        } else {
            (screen_width, screen_height)
        };
        width &= !1;
        height &= !1;

        StreamProfile {
            width,
            height,
            fps,
            video_bitrate_kbps: bitrate_for(width.min(height), fps),
            audio_sample_rate: AUDIO_SAMPLE_RATE,
            audio_channels: AUDIO_CHANNELS,
            audio_bitrate_kbps: AUDIO_BITRATE_KBPS,
            avc_level: avc_level_for(width, height, fps),
        }
    }

    /// True for a stereo audio layout
    pub fn stereo(&self) -> bool {
        self.audio_channels >= 2
    }
}

/// Video bitrate lookup, keyed on resolution short edge and framerate
pub fn bitrate_for(short_edge: u32, fps: u32) -> u32 {
    let high_fps = fps > 30;
    match short_edge {
        e if e >= 1440 => {
            if high_fps {
                20_000
            } else {
                16_000
            }
        }
        e if e >= 1080 => {
            if high_fps {
                12_000
            } else {
                9_000
            }
        }
        e if e >= 720 => {
            if high_fps {
                6_000
            } else {
                4_500
            }
        }
        _ => {
            if high_fps {
                3_000
            } else {
                2_000
            }
        }
    }
}

/// AVC level from the pixel-rate table
pub fn avc_level_for(width: u32, height: u32, fps: u32) -> u8 {
    let pixels = width as u64 * height as u64;
    let px_per_sec = pixels * fps as u64;
    if px_per_sec > 118_800_000 {
        50
    } else if pixels > 2_000_000 && fps >= 60 {
        42
    } else {
        40
    }
}

/// Video encoder knobs derived from the profile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoEncoderSettings {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub bitrate_kbps: u32,
    pub profile: H264Profile,
    pub avc_level: u8,
    /// Keyframe cadence in seconds
    pub keyframe_interval_s: u32,
    /// Frames per second the codec should be prepared to accept; headroom
    /// above the nominal rate absorbs bursty sources
    pub operating_rate: u32,
    pub rate_control: RateControl,
    /// Priority for the codec's worker threads
    pub thread_priority: ThreadPriority,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum H264Profile {
    Baseline,
    Main,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateControl {
    Cbr,
    Vbr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadPriority {
    Normal,
    /// Highest priority short of realtime scheduling
    HighestNonRealtime,
}

impl VideoEncoderSettings {
    /// Settings the publisher uses for every stream session
    pub fn from_profile(profile: &StreamProfile) -> Self {
        VideoEncoderSettings {
            width: profile.width,
            height: profile.height,
            fps: profile.fps,
            bitrate_kbps: profile.video_bitrate_kbps,
            profile: H264Profile::High,
            avc_level: profile.avc_level,
            keyframe_interval_s: 2,
            operating_rate: profile.fps * 2,
            rate_control: RateControl::Cbr,
            thread_priority: ThreadPriority::HighestNonRealtime,
        }
    }
}
