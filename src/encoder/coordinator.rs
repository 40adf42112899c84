use crate::encoder::{VideoEncoder, VideoEncoderSettings};
use crate::flv::{extract_sps_pps, video_frame, video_sequence_header};
use crate::{Error, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

/// How long one dequeue attempt may block
const DRAIN_POLL_TIMEOUT: Duration = Duration::from_millis(10);

/// FLV video payloads leaving the drain loop
#[derive(Debug, Clone)]
pub enum VideoOutput {
    /// One-time AVCDecoderConfigurationRecord tag payload
    SequenceHeader { payload: Vec<u8> },
    /// One encoded frame tag payload
    Frame {
        payload: Vec<u8>,
        ts_ms: u32,
        is_keyframe: bool,
    },
    /// The hardware encoder died; the stream cannot continue
    Failed { reason: String },
}

pub type VideoSink = Arc<dyn Fn(VideoOutput) + Send + Sync>;

/// Owns the hardware H.264 encoder for one stream session.
///
/// The drain loop is started exactly once and keeps pulling across RTMP
/// reconnects: a second concurrent dequeue on the same codec handle is a
/// platform crash, so reconnect logic only gates where the output goes,
/// never the loop itself.
pub struct VideoCoordinator {
    is_encoding: Arc<AtomicBool>,
    stop_flag: Arc<AtomicBool>,
    bitrate_request: Arc<AtomicU32>,
    drain_starts: Arc<AtomicU32>,
    handle: Option<JoinHandle<()>>,
}

impl VideoCoordinator {
    pub fn new() -> Self {
        VideoCoordinator {
            is_encoding: Arc::new(AtomicBool::new(false)),
            stop_flag: Arc::new(AtomicBool::new(false)),
            bitrate_request: Arc::new(AtomicU32::new(0)),
            drain_starts: Arc::new(AtomicU32::new(0)),
            handle: None,
        }
    }

    /// Configure the encoder and spawn the drain thread.
    ///
    /// Returns `InvalidState` if a drain loop already ran this session;
    /// callers never restart it, not even after reconnect.
    pub fn start(
        &mut self,
        mut encoder: Box<dyn VideoEncoder>,
        settings: &VideoEncoderSettings,
        sink: VideoSink,
    ) -> Result<()> {
        if self
            .is_encoding
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            log::error!("Video drain loop already started for this session");
            return Err(Error::invalid_state("Video drain loop already started"));
        }

        if let Err(e) = encoder.configure(settings) {
            // The hardware never opened; leave the latch open for a retry
            self.is_encoding.store(false, Ordering::SeqCst);
            return Err(Error::encoder(format!("Encoder configure failed: {}", e)));
        }

        self.drain_starts.fetch_add(1, Ordering::SeqCst);
        let stop_flag = self.stop_flag.clone();
        let bitrate_request = self.bitrate_request.clone();

        let handle = std::thread::Builder::new()
            .name("video-drain".into())
            .spawn(move || {
                run_drain_loop(encoder, sink, stop_flag, bitrate_request);
            })
            .expect("spawn video drain thread");
        self.handle = Some(handle);

        Ok(())
    }

    /// True once the drain loop has been started this session
    pub fn is_encoding(&self) -> bool {
        self.is_encoding.load(Ordering::SeqCst)
    }

    /// How many drain threads were ever spawned; stays at one for the whole
    /// session no matter how many reconnects happen
    pub fn drain_start_count(&self) -> u32 {
        self.drain_starts.load(Ordering::SeqCst)
    }

    /// Request a dynamic bitrate change; applied by the drain thread, which
    /// is the only thread allowed to touch the codec handle
    pub fn set_bitrate(&self, kbps: u32) {
        self.bitrate_request.store(kbps.max(1), Ordering::SeqCst);
    }

    /// Stop and join the drain thread, releasing the encoder
    pub fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        self.is_encoding.store(false, Ordering::SeqCst);
    }
}

impl Default for VideoCoordinator {
    fn default() -> Self {
        VideoCoordinator::new()
    }
}

impl Drop for VideoCoordinator {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_drain_loop(
    mut encoder: Box<dyn VideoEncoder>,
    sink: VideoSink,
    stop_flag: Arc<AtomicBool>,
    bitrate_request: Arc<AtomicU32>,
) {
    let mut epoch_us: Option<i64> = None;

    while !stop_flag.load(Ordering::SeqCst) {
        let requested = bitrate_request.swap(0, Ordering::SeqCst);
        if requested != 0 {
            if let Err(e) = encoder.set_bitrate(requested) {
                log::warn!("Bitrate update to {} kbps failed: {}", requested, e);
            } else {
                log::info!("Video bitrate updated to {} kbps", requested);
            }
        }

        let frame = match encoder.poll_output(DRAIN_POLL_TIMEOUT) {
            Ok(Some(frame)) => frame,
            Ok(None) => continue,
            Err(e) => {
                log::error!("Video encoder dequeue failed: {}", e);
                sink(VideoOutput::Failed {
                    reason: e.to_string(),
                });
                break;
            }
        };

        if frame.is_config {
            match extract_sps_pps(&frame.data) {
                Ok((sps, pps)) => match video_sequence_header(&sps, &pps) {
                    Ok(payload) => {
                        log::info!(
                            "Video sequence header ready: SPS {} bytes, PPS {} bytes",
                            sps.len(),
                            pps.len()
                        );
                        sink(VideoOutput::SequenceHeader { payload });
                    }
                    Err(e) => log::error!("Sequence header build failed: {}", e),
                },
                Err(e) => log::error!("Codec config parse failed: {}", e),
            }
            continue;
        }

        let epoch = *epoch_us.get_or_insert(frame.pts_us);
        let ts_ms = ((frame.pts_us - epoch) / 1000).max(0) as u32;
        sink(VideoOutput::Frame {
            payload: video_frame(&frame.data, frame.is_keyframe),
            ts_ms,
            is_keyframe: frame.is_keyframe,
        });
    }

    encoder.stop();
    log::debug!("Video drain thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{EncodedVideoFrame, StreamProfile, SurfaceHandle};
    use std::sync::Mutex;
    use std::sync::mpsc;

    struct ScriptedEncoder {
        frames: Vec<EncodedVideoFrame>,
        configured: bool,
        bitrates: Arc<Mutex<Vec<u32>>>,
    }

    impl VideoEncoder for ScriptedEncoder {
        fn configure(&mut self, _settings: &VideoEncoderSettings) -> crate::Result<()> {
            self.configured = true;
            Ok(())
        }

        fn input_surface(&self) -> SurfaceHandle {
            SurfaceHandle(7)
        }

        fn poll_output(
            &mut self,
            timeout: Duration,
        ) -> crate::Result<Option<EncodedVideoFrame>> {
            if self.frames.is_empty() {
                std::thread::sleep(timeout);
                return Ok(None);
            }
            Ok(Some(self.frames.remove(0)))
        }

        fn set_bitrate(&mut self, kbps: u32) -> crate::Result<()> {
            self.bitrates.lock().unwrap().push(kbps);
            Ok(())
        }

        fn stop(&mut self) {}
    }

    fn config_frame() -> EncodedVideoFrame {
        let mut data = vec![0, 0, 0, 1, 0x67, 0x64, 0x00, 0x28];
        data.extend_from_slice(&[0, 0, 0, 1, 0x68, 0xEB, 0xE3]);
        EncodedVideoFrame {
            data,
            pts_us: 0,
            is_keyframe: true,
            is_config: true,
        }
    }

    fn data_frame(pts_us: i64, key: bool) -> EncodedVideoFrame {
        EncodedVideoFrame {
            data: vec![0, 0, 0, 1, if key { 0x65 } else { 0x41 }, 0xAA, 0xBB],
            pts_us,
            is_keyframe: key,
            is_config: false,
        }
    }

    #[test]
    fn test_drain_emits_header_then_frames_with_relative_ts() {
        let (tx, rx) = mpsc::channel();
        let sink: VideoSink = Arc::new(move |out| {
            let _ = tx.send(out);
        });

        let encoder = Box::new(ScriptedEncoder {
            frames: vec![
                config_frame(),
                data_frame(1_000_000, true),
                data_frame(1_033_000, false),
            ],
            configured: false,
            bitrates: Arc::new(Mutex::new(Vec::new())),
        });

        let profile = StreamProfile::from_screen(1080, 1920, 30);
        let settings = VideoEncoderSettings::from_profile(&profile);
        let mut coordinator = VideoCoordinator::new();
        coordinator.start(encoder, &settings, sink).unwrap();

        let first = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(matches!(first, VideoOutput::SequenceHeader { .. }));

        let second = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        match second {
            VideoOutput::Frame {
                ts_ms, is_keyframe, ..
            } => {
                assert_eq!(ts_ms, 0);
                assert!(is_keyframe);
            }
            other => panic!("expected frame, got {:?}", other),
        }

        let third = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        match third {
            VideoOutput::Frame { ts_ms, .. } => assert_eq!(ts_ms, 33),
            other => panic!("expected frame, got {:?}", other),
        }

        coordinator.stop();
    }

    #[test]
    fn test_start_twice_is_rejected() {
        let profile = StreamProfile::from_screen(1080, 1920, 30);
        let settings = VideoEncoderSettings::from_profile(&profile);
        let sink: VideoSink = Arc::new(|_| {});

        let mut coordinator = VideoCoordinator::new();
        coordinator
            .start(
                Box::new(ScriptedEncoder {
                    frames: vec![],
                    configured: false,
                    bitrates: Arc::new(Mutex::new(Vec::new())),
                }),
                &settings,
                sink.clone(),
            )
            .unwrap();

        let again = coordinator.start(
            Box::new(ScriptedEncoder {
                frames: vec![],
                configured: false,
                bitrates: Arc::new(Mutex::new(Vec::new())),
            }),
            &settings,
            sink,
        );
        assert!(matches!(again, Err(Error::InvalidState(_))));
        assert_eq!(coordinator.drain_start_count(), 1);

        coordinator.stop();
    }

    #[test]
    fn test_bitrate_applied_on_drain_thread() {
        let bitrates = Arc::new(Mutex::new(Vec::new()));
        let profile = StreamProfile::from_screen(1080, 1920, 30);
        let settings = VideoEncoderSettings::from_profile(&profile);
        let sink: VideoSink = Arc::new(|_| {});

        let mut coordinator = VideoCoordinator::new();
        coordinator
            .start(
                Box::new(ScriptedEncoder {
                    frames: vec![],
                    configured: false,
                    bitrates: bitrates.clone(),
                }),
                &settings,
                sink,
            )
            .unwrap();

        coordinator.set_bitrate(4_500);
        std::thread::sleep(Duration::from_millis(100));
        coordinator.stop();

        assert_eq!(bitrates.lock().unwrap().as_slice(), &[4_500]);
    }
}
