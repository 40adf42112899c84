use crate::audio::{AudioCaptureSource, AudioEncoder, StereoHighPass};
use crate::encoder::{AAC_FRAME_SAMPLES, AUDIO_SAMPLE_RATE};
use crate::flv::{audio_frame, audio_sequence_header};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// High-pass cutoff that strips DC and subsonic rumble
const HIGHPASS_CUTOFF_HZ: f64 = 30.0;

/// Drift beyond this is fed into the integral controller
const DRIFT_DEADBAND_US: i64 = 1000;

/// FLV audio payloads leaving the mixer
#[derive(Debug, Clone)]
pub enum AudioOutput {
    /// One-time AudioSpecificConfig tag payload
    SequenceHeader { payload: Vec<u8> },
    /// One encoded access-unit tag payload
    Frame { payload: Vec<u8>, ts_ms: u32 },
    /// The AAC encoder died; the stream cannot continue
    Failed { reason: String },
}

pub type AudioSink = Arc<dyn Fn(AudioOutput) + Send + Sync>;

/// Capture sources handed to the mixer at stream start. Either may be
/// absent (no permission, no hardware); the mixer produces a continuous
/// frame cadence regardless.
pub struct MixerSources {
    pub mic: Option<Box<dyn AudioCaptureSource>>,
    pub system: Option<Box<dyn AudioCaptureSource>>,
}

/// Mixes microphone and system-audio capture into 1024-sample stereo
/// frames, conditions them, and feeds the AAC encoder on a dedicated
/// thread. Lives across RTMP reconnects; only `stop` ends it.
pub struct AudioMixer {
    mic_enabled: Arc<AtomicBool>,
    system_enabled: Arc<AtomicBool>,
    stop_flag: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl AudioMixer {
    pub fn new() -> Self {
        AudioMixer {
            mic_enabled: Arc::new(AtomicBool::new(true)),
            system_enabled: Arc::new(AtomicBool::new(true)),
            stop_flag: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    /// Spawn the mixer thread. Called once per stream session.
    pub fn start(
        &mut self,
        sources: MixerSources,
        encoder: Box<dyn AudioEncoder>,
        sink: AudioSink,
    ) {
        let mic_enabled = self.mic_enabled.clone();
        let system_enabled = self.system_enabled.clone();
        let stop_flag = self.stop_flag.clone();

        let handle = std::thread::Builder::new()
            .name("audio-mixer".into())
            .spawn(move || {
                run_mixer_loop(sources, encoder, sink, mic_enabled, system_enabled, stop_flag);
            })
            .expect("spawn audio mixer thread");
        self.handle = Some(handle);
    }

    /// Stop and join the mixer thread
    pub fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    /// Release everything the mixer owns. Idempotent.
    pub fn cleanup(&mut self) {
        self.stop();
    }

    pub fn toggle_mic(&self) -> bool {
        let now = !self.mic_enabled.load(Ordering::SeqCst);
        self.mic_enabled.store(now, Ordering::SeqCst);
        log::info!("Microphone {}", if now { "enabled" } else { "muted" });
        now
    }

    pub fn toggle_system_audio(&self) -> bool {
        let now = !self.system_enabled.load(Ordering::SeqCst);
        self.system_enabled.store(now, Ordering::SeqCst);
        log::info!("System audio {}", if now { "enabled" } else { "muted" });
        now
    }

    pub fn mic_enabled(&self) -> bool {
        self.mic_enabled.load(Ordering::SeqCst)
    }

    pub fn system_audio_enabled(&self) -> bool {
        self.system_enabled.load(Ordering::SeqCst)
    }
}

impl Default for AudioMixer {
    fn default() -> Self {
        AudioMixer::new()
    }
}

impl Drop for AudioMixer {
    fn drop(&mut self) {
        self.cleanup();
    }
}

fn run_mixer_loop(
    mut sources: MixerSources,
    mut encoder: Box<dyn AudioEncoder>,
    sink: AudioSink,
    mic_enabled: Arc<AtomicBool>,
    system_enabled: Arc<AtomicBool>,
    stop_flag: Arc<AtomicBool>,
) {
    let frame_len = AAC_FRAME_SAMPLES * 2; // interleaved stereo
    let mut mic_pcm = vec![0i16; frame_len];
    let mut system_pcm = vec![0i16; frame_len];
    let mut mixed = vec![0f64; frame_len];
    let mut out_pcm = vec![0i16; frame_len];
    let mut filter = StereoHighPass::new(HIGHPASS_CUTOFF_HZ, AUDIO_SAMPLE_RATE as f64);

    let start = Instant::now();
    let mut pts_samples: i64 = 0;
    let mut drift_accum_us: i64 = 0;
    let mut sent_config = false;

    log::info!(
        "Audio mixer running: mic={}, system={}",
        sources.mic.is_some(),
        sources.system.is_some()
    );

    while !stop_flag.load(Ordering::SeqCst) {
        let mic_ref: Option<&mut dyn AudioCaptureSource> = match &mut sources.mic {
            Some(b) => Some(b.as_mut()),
            None => None,
        };
        let mic_ok = pull_frame(
            mic_ref,
            &mut mic_pcm,
            mic_enabled.load(Ordering::SeqCst),
        );
        let system_ref: Option<&mut dyn AudioCaptureSource> = match &mut sources.system {
            Some(b) => Some(b.as_mut()),
            None => None,
        };
        let system_ok = pull_frame(
            system_ref,
            &mut system_pcm,
            system_enabled.load(Ordering::SeqCst),
        );
        if !mic_ok && !system_ok {
            log::trace!("No live capture source this frame, emitting silence");
        }

        mix_frame(&mic_pcm, &system_pcm, &mut mixed);
        for sample in mixed.iter_mut() {
            *sample = soft_clip(*sample);
        }
        filter.process_frame(&mut mixed);
        for (dst, src) in out_pcm.iter_mut().zip(&mixed) {
            *dst = quantize(*src);
        }

        // Wall-locked PTS with an integral drift controller
        let target_us = pts_samples * 1_000_000 / AUDIO_SAMPLE_RATE as i64;
        let now_us = start.elapsed().as_micros() as i64;
        drift_accum_us = drift_step(target_us, now_us, drift_accum_us);
        let pts_us = target_us + drift_accum_us;
        pts_samples += AAC_FRAME_SAMPLES as i64;

        // Keep cadence when capture reads return early or sources are absent
        if now_us < target_us {
            std::thread::sleep(Duration::from_micros((target_us - now_us) as u64));
        }

        match encoder.encode(&out_pcm, pts_us) {
            Ok(frames) => {
                for frame in frames {
                    if frame.is_config {
                        if sent_config {
                            log::warn!("AAC encoder produced a second config frame, ignoring");
                            continue;
                        }
                        sent_config = true;
                        sink(AudioOutput::SequenceHeader {
                            payload: audio_sequence_header(&frame.data, true),
                        });
                    } else {
                        sink(AudioOutput::Frame {
                            payload: audio_frame(&frame.data, true),
                            ts_ms: (frame.pts_us / 1000).max(0) as u32,
                        });
                    }
                }
            }
            Err(e) => {
                log::error!("AAC encode failed: {}", e);
                sink(AudioOutput::Failed {
                    reason: e.to_string(),
                });
                break;
            }
        }
    }

    log::debug!("Audio mixer thread exiting");
}

/// Read one frame from a source. Disabled sources are still drained so the
/// platform buffer cannot overflow, but their samples are replaced with
/// silence. Returns false when the source is absent or errored.
fn pull_frame(source: Option<&mut dyn AudioCaptureSource>, pcm: &mut [i16], enabled: bool) -> bool {
    let Some(source) = source else {
        pcm.fill(0);
        return false;
    };

    let mut filled = 0;
    while filled < pcm.len() {
        match source.read_stereo_pcm16(&mut pcm[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) => {
                log::warn!("Audio capture read failed: {}", e);
                break;
            }
        }
    }
    if filled < pcm.len() {
        pcm[filled..].fill(0);
    }
    if !enabled {
        pcm.fill(0);
    }
    true
}

/// Mix with −6 dB headroom per source
fn mix_frame(mic: &[i16], system: &[i16], out: &mut [f64]) {
    for i in 0..out.len() {
        let m = mic[i] as f64 / 32768.0;
        let s = system[i] as f64 / 32768.0;
        out[i] = 0.5 * m + 0.5 * s;
    }
}

/// Smooth limiter: linear inside [-1, 1], asymptotic above. Hard clipping
/// crackles audibly, so the knee must stay differentiable.
pub fn soft_clip(x: f64) -> f64 {
    if x > 1.0 {
        1.0 - 1.0 / (1.0 + 10.0 * (x - 1.0))
    } else if x < -1.0 {
        -(1.0 - 1.0 / (1.0 + 10.0 * (-x - 1.0)))
    } else {
        x
    }
}

fn quantize(x: f64) -> i16 {
    (x * 32767.0).clamp(-32768.0, 32767.0) as i16
}

/// One step of the integral drift controller. The /8 acts as a one-pole
/// low-pass so momentary scheduling jitter does not yank the clock.
pub fn drift_step(target_us: i64, now_us: i64, drift_accum_us: i64) -> i64 {
    let error = target_us - now_us;
    if error.abs() > DRIFT_DEADBAND_US {
        drift_accum_us + error / 8
    } else {
        drift_accum_us
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_soft_clip_is_linear_in_range() {
        assert_eq!(soft_clip(0.0), 0.0);
        assert_eq!(soft_clip(0.5), 0.5);
        assert_eq!(soft_clip(-0.99), -0.99);
    }

    #[test]
    fn test_soft_clip_bounds_overshoot() {
        // 1 - 1/(1 + 10(x-1)) for the overshoot region
        assert!((soft_clip(1.1) - 0.5).abs() < 1e-9);
        assert!((soft_clip(1.5) - (1.0 - 1.0 / 6.0)).abs() < 1e-9);
        assert_eq!(soft_clip(-1.5), -soft_clip(1.5));
        // Monotonic above the knee, asymptotic below full scale
        assert!(soft_clip(2.0) > soft_clip(1.5));
        assert!(soft_clip(100.0) < 1.0);
    }

    #[test]
    fn test_mix_is_minus_6db_per_source() {
        let mic = vec![16384i16; 4];
        let system = vec![-16384i16; 4];
        let mut out = vec![0f64; 4];
        mix_frame(&mic, &system, &mut out);
        for v in out {
            assert!(v.abs() < 1e-9);
        }

        let silence = vec![0i16; 4];
        let mut out = vec![0f64; 4];
        mix_frame(&mic, &silence, &mut out);
        for v in out {
            assert!((v - 0.25).abs() < 1e-3);
        }
    }

    #[test]
    fn test_drift_step_deadband() {
        // Inside the 1 ms deadband nothing accumulates
        assert_eq!(drift_step(1000, 500, 0), 0);
        assert_eq!(drift_step(1000, 1999, 7), 7);
    }

    #[test]
    fn test_drift_step_integrates_toward_wall_clock() {
        // Audio clock 8 ms ahead of wall time: pull back by 1 ms per frame
        assert_eq!(drift_step(10_000, 2_000, 0), 1_000);
        // Behind wall time: push forward
        assert_eq!(drift_step(2_000, 10_000, 0), -1_000);
    }

    #[test]
    fn test_pts_spacing_with_bounded_drift() {
        // Simulated wall clock within the deadband: PTS advances by exactly
        // the frame duration and stays strictly monotonic
        let mut pts_samples: i64 = 0;
        let mut drift: i64 = 0;
        let mut last_pts = -1i64;
        for _ in 0..500 {
            let target = pts_samples * 1_000_000 / 48_000;
            let now = target + 200; // scheduler jitter below the deadband
            drift = drift_step(target, now, drift);
            let pts = target + drift;
            assert!(pts > last_pts);
            if last_pts >= 0 {
                let delta = pts - last_pts;
                assert!((21_333..=21_334).contains(&delta), "delta {}", delta);
            }
            last_pts = pts;
            pts_samples += 1024;
        }
        assert_eq!(drift, 0);
    }

    #[test]
    fn test_quantize_clamps() {
        assert_eq!(quantize(2.0), 32767);
        assert_eq!(quantize(-2.0), -32768);
        assert_eq!(quantize(0.0), 0);
    }

    struct ToneSource {
        value: i16,
    }
    impl AudioCaptureSource for ToneSource {
        fn read_stereo_pcm16(&mut self, buf: &mut [i16]) -> crate::Result<usize> {
            buf.fill(self.value);
            Ok(buf.len())
        }
    }

    #[test]
    fn test_pull_frame_soft_mute_drains_source() {
        let mut source: Box<dyn AudioCaptureSource> = Box::new(ToneSource { value: 1000 });
        let mut pcm = vec![0i16; 64];

        assert!(pull_frame(Some(source.as_mut()), &mut pcm, true));
        assert!(pcm.iter().all(|&s| s == 1000));

        // Disabled: the read still happens but samples become silence
        assert!(pull_frame(Some(source.as_mut()), &mut pcm, false));
        assert!(pcm.iter().all(|&s| s == 0));
    }

    #[test]
    fn test_pull_frame_absent_source_is_silence() {
        let mut pcm = vec![77i16; 64];
        assert!(!pull_frame(None, &mut pcm, true));
        assert!(pcm.iter().all(|&s| s == 0));
    }

    struct ScriptedAacEncoder {
        sent_config: bool,
    }

    impl crate::audio::AudioEncoder for ScriptedAacEncoder {
        fn encode(
            &mut self,
            _pcm: &[i16],
            pts_us: i64,
        ) -> crate::Result<Vec<crate::audio::EncodedAudioFrame>> {
            let mut out = Vec::new();
            if !self.sent_config {
                self.sent_config = true;
                out.push(crate::audio::EncodedAudioFrame {
                    data: vec![0x11, 0x90],
                    pts_us,
                    is_config: true,
                });
            }
            out.push(crate::audio::EncodedAudioFrame {
                data: vec![0x21, 0x19],
                pts_us,
                is_config: false,
            });
            Ok(out)
        }
    }

    #[test]
    fn test_mixer_thread_emits_config_once_then_frames() {
        use std::sync::Mutex;
        use std::sync::mpsc;

        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let sink: AudioSink = Arc::new(move |out| {
            let _ = tx.lock().unwrap().send(out);
        });

        let mut mixer = AudioMixer::new();
        mixer.start(
            MixerSources {
                mic: None,
                system: None,
            },
            Box::new(ScriptedAacEncoder { sent_config: false }),
            sink,
        );

        let first = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(matches!(first, AudioOutput::SequenceHeader { .. }));

        let mut last_ts = None;
        for _ in 0..3 {
            match rx.recv_timeout(Duration::from_secs(2)).unwrap() {
                AudioOutput::Frame { payload, ts_ms } => {
                    assert_eq!(payload[1], 0x01);
                    if let Some(last) = last_ts {
                        assert!(ts_ms >= last);
                    }
                    last_ts = Some(ts_ms);
                }
                other => panic!("expected frame, got {:?}", other),
            }
        }

        mixer.stop();
    }
}
