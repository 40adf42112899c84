// End-to-end publisher tests against the in-process mock ingest

mod common;

use common::{MockIngest, MockOptions, wait_until};
use livecast::{
    AudioEncoder, ClientConfig, EncodedAudioFrame, EncodedVideoFrame, Endpoint, Error, FlagStore,
    MSG_TYPE_AUDIO, MSG_TYPE_DATA_AMF0, MSG_TYPE_VIDEO, MemoryFlagStore, PayloadKind, Publisher,
    PublisherConfig, PublisherState, RtmpClient, SessionHardware, StartRequest, StreamEvent,
    StreamProfile, SurfaceHandle, VideoEncoder, VideoEncoderSettings, audio_frame,
    audio_sequence_header, audio_specific_config, metadata_payload, should_auto_restart,
    video_frame, video_sequence_header,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const SPS: &[u8] = &[0x67, 0x64, 0x00, 0x28, 0xAC, 0xD9, 0x40, 0x44];
const PPS: &[u8] = &[0x68, 0xEB, 0xE3, 0xCB, 0x22, 0xC0];

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn test_client(mock: &MockIngest) -> RtmpClient {
    let endpoint = Endpoint::parse(&mock.url(), "K-TEST").unwrap();
    RtmpClient::new(endpoint, ClientConfig::default())
}

fn keyframe_annexb(n: u32) -> Vec<u8> {
    let mut data = vec![0, 0, 0, 1, 0x65];
    data.extend_from_slice(&n.to_be_bytes());
    data.extend_from_slice(&[0x11; 40]);
    data
}

fn interframe_annexb(n: u32) -> Vec<u8> {
    let mut data = vec![0, 0, 0, 1, 0x41];
    data.extend_from_slice(&n.to_be_bytes());
    data.extend_from_slice(&[0x22; 24]);
    data
}

#[test]
fn test_happy_path_publish() {
    init_logging();
    let mock = MockIngest::start(MockOptions::default());
    let client = test_client(&mock);

    let publish_started = Arc::new(AtomicBool::new(false));
    {
        let flag = publish_started.clone();
        client.set_on_publish_started(move || {
            flag.store(true, Ordering::SeqCst);
        });
    }

    client.connect_blocking(Duration::from_secs(5)).unwrap();
    assert!(publish_started.load(Ordering::SeqCst));

    // Metadata, then the two sequence headers, then 3 s of media
    let profile = StreamProfile::from_screen(1080, 1920, 60);
    client
        .send_flv_payload(PayloadKind::Script, metadata_payload(&profile).unwrap(), 0)
        .unwrap();
    client
        .send_flv_payload(
            PayloadKind::Video,
            video_sequence_header(SPS, PPS).unwrap(),
            0,
        )
        .unwrap();
    client
        .send_flv_payload(
            PayloadKind::Audio,
            audio_sequence_header(&audio_specific_config(48_000, 2), true),
            0,
        )
        .unwrap();

    for n in 0..180u32 {
        let keyframe = n % 60 == 0;
        let annexb = if keyframe {
            keyframe_annexb(n)
        } else {
            interframe_annexb(n)
        };
        client
            .send_flv_payload(
                PayloadKind::Video,
                video_frame(&annexb, keyframe),
                n * 1000 / 60,
            )
            .unwrap();
    }
    for n in 0..144u32 {
        client
            .send_flv_payload(
                PayloadKind::Audio,
                audio_frame(&[0x21, 0x19, (n & 0xFF) as u8], true),
                n * 1024 * 1000 / 48_000,
            )
            .unwrap();
    }

    assert!(wait_until(Duration::from_secs(5), || {
        mock.media_messages().len() >= 3 + 180 + 144
    }));
    client.shutdown();

    let media = mock.media_messages();

    // Metadata first, then video sequence header, then audio sequence header
    assert_eq!(media[0].message_type(), MSG_TYPE_DATA_AMF0);
    assert_eq!(media[1].message_type(), MSG_TYPE_VIDEO);
    assert_eq!(media[1].payload[0], 0x17);
    assert_eq!(media[1].payload[1], 0x00);
    assert_eq!(media[2].message_type(), MSG_TYPE_AUDIO);
    assert_eq!(media[2].payload[1], 0x00);

    // Per-type monotonic timestamps and correct packet types throughout
    let mut last_video = 0;
    let mut last_audio = 0;
    let mut video_frames = 0;
    let mut audio_frames = 0;
    for message in &media[3..] {
        match message.message_type() {
            MSG_TYPE_VIDEO => {
                assert_eq!(message.payload[1], 0x01);
                assert!(message.timestamp() >= last_video);
                last_video = message.timestamp();
                video_frames += 1;
            }
            MSG_TYPE_AUDIO => {
                assert_eq!(message.payload[1], 0x01);
                assert!(message.timestamp() >= last_audio);
                last_audio = message.timestamp();
                audio_frames += 1;
            }
            other => panic!("unexpected message type {}", other),
        }
    }
    assert_eq!(video_frames, 180);
    assert_eq!(audio_frames, 144);

    // Length-prefixed NAL units on the wire, not start codes
    let first_frame = &media[3].payload;
    let nal_len = u32::from_be_bytes([
        first_frame[5],
        first_frame[6],
        first_frame[7],
        first_frame[8],
    ]) as usize;
    assert_eq!(nal_len, first_frame.len() - 9);
    assert_eq!(first_frame[9], 0x65);
}

#[test]
fn test_publish_rejected_surfaces_typed_error() {
    init_logging();
    let mock = MockIngest::start(MockOptions {
        reject_publish: true,
        ..Default::default()
    });
    let client = test_client(&mock);

    let result = client.connect_blocking(Duration::from_secs(5));
    assert!(matches!(result, Err(Error::PublishRejected(_))));
    client.shutdown();
}

#[test]
fn test_window_ack_cadence() {
    init_logging();
    let mock = MockIngest::start(MockOptions {
        flood_bytes: Some(5_200_000),
        ..Default::default()
    });
    let client = test_client(&mock);
    client.connect_blocking(Duration::from_secs(5)).unwrap();

    assert!(wait_until(Duration::from_secs(10), || {
        mock.acks().len() >= 2
    }));
    client.shutdown();

    let acks = mock.acks();
    // First acknowledgement lands just past the 2,500,000-byte window, the
    // second one window later; values are cumulative and strictly increase
    assert!(
        acks[0] >= 2_500_000 && acks[0] < 2_600_000,
        "first ack {}",
        acks[0]
    );
    assert!(
        acks[1] >= 5_000_000 && acks[1] < 5_200_000,
        "second ack {}",
        acks[1]
    );
    assert!(acks[1] > acks[0]);
}

// Scripted hardware for publisher-level tests

struct PacedVideoEncoder {
    sent_config: bool,
    frame_index: u64,
}

impl PacedVideoEncoder {
    fn new() -> Self {
        PacedVideoEncoder {
            sent_config: false,
            frame_index: 0,
        }
    }
}

impl VideoEncoder for PacedVideoEncoder {
    fn configure(&mut self, _settings: &VideoEncoderSettings) -> livecast::Result<()> {
        Ok(())
    }

    fn input_surface(&self) -> SurfaceHandle {
        SurfaceHandle(1)
    }

    fn poll_output(
        &mut self,
        _timeout: Duration,
    ) -> livecast::Result<Option<EncodedVideoFrame>> {
        if !self.sent_config {
            self.sent_config = true;
            let mut data = Vec::new();
            data.extend_from_slice(&[0, 0, 0, 1]);
            data.extend_from_slice(SPS);
            data.extend_from_slice(&[0, 0, 0, 1]);
            data.extend_from_slice(PPS);
            return Ok(Some(EncodedVideoFrame {
                data,
                pts_us: 0,
                is_keyframe: true,
                is_config: true,
            }));
        }

        std::thread::sleep(Duration::from_millis(2));
        let n = self.frame_index;
        self.frame_index += 1;
        let keyframe = n % 30 == 0;
        Ok(Some(EncodedVideoFrame {
            data: if keyframe {
                keyframe_annexb(n as u32)
            } else {
                interframe_annexb(n as u32)
            },
            pts_us: (n as i64) * 16_667,
            is_keyframe: keyframe,
            is_config: false,
        }))
    }

    fn set_bitrate(&mut self, _kbps: u32) -> livecast::Result<()> {
        Ok(())
    }

    fn stop(&mut self) {}
}

struct SilentAudioEncoder;

impl AudioEncoder for SilentAudioEncoder {
    fn encode(&mut self, _pcm: &[i16], _pts_us: i64) -> livecast::Result<Vec<EncodedAudioFrame>> {
        Ok(Vec::new())
    }
}

fn scripted_hardware() -> SessionHardware {
    SessionHardware {
        video_encoder: Box::new(PacedVideoEncoder::new()),
        audio_encoder: Box::new(SilentAudioEncoder),
        mic: None,
        system_audio: None,
    }
}

fn fast_reconnect_config() -> PublisherConfig {
    PublisherConfig {
        screen_width: 1080,
        screen_height: 1920,
        fps: 60,
        reconnect_base_delay: Duration::from_millis(50),
        reconnect_max_delay: Duration::from_secs(1),
        ..Default::default()
    }
}

fn collecting_sink() -> (Arc<Mutex<Vec<StreamEvent>>>, livecast::EventSink) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink_events = events.clone();
    let sink: livecast::EventSink = Arc::new(move |event| {
        sink_events.lock().unwrap().push(event);
    });
    (events, sink)
}

fn count_video_data(mock: &MockIngest) -> usize {
    mock.media_messages()
        .iter()
        .filter(|m| m.message_type() == MSG_TYPE_VIDEO && m.payload[1] == 0x01)
        .count()
}

#[test]
fn test_reconnect_preserves_encoder() {
    init_logging();
    let mock = MockIngest::start(MockOptions::default());
    let flags = Arc::new(MemoryFlagStore::new());
    let (events, sink) = collecting_sink();

    let publisher = Publisher::new(fast_reconnect_config(), flags, sink);
    publisher
        .start(
            StartRequest {
                url: mock.url(),
                key: "K-TEST".into(),
            },
            scripted_hardware(),
        )
        .unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        publisher.state() == PublisherState::Publishing
    }));
    assert!(wait_until(Duration::from_secs(10), || {
        count_video_data(&mock) >= 100
    }));

    mock.kill_current_connection();

    assert!(wait_until(Duration::from_secs(10), || {
        mock.connection_count() == 2
    }));
    assert!(wait_until(Duration::from_secs(10), || {
        publisher.state() == PublisherState::Publishing
    }));

    // The new publish session re-sent metadata and the cached sequence
    // header before any frame
    assert!(wait_until(Duration::from_secs(5), || {
        let media = mock.media_messages();
        media
            .iter()
            .filter(|m| m.message_type() == MSG_TYPE_DATA_AMF0)
            .count()
            >= 2
            && media
                .iter()
                .filter(|m| m.message_type() == MSG_TYPE_VIDEO && m.payload[1] == 0x00)
                .count()
                >= 2
    }));

    let media = mock.media_messages();
    let second_meta = media
        .iter()
        .enumerate()
        .filter(|(_, m)| m.message_type() == MSG_TYPE_DATA_AMF0)
        .nth(1)
        .map(|(i, _)| i)
        .unwrap();
    let first_video_after = media[second_meta..]
        .iter()
        .find(|m| m.message_type() == MSG_TYPE_VIDEO)
        .unwrap();
    assert_eq!(first_video_after.payload[1], 0x00, "sequence header first");

    // One drain thread for the whole session, reconnect included
    assert_eq!(publisher.video_drain_starts(), 1);
    assert!(
        events
            .lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, StreamEvent::ReconnectAttempt { attempt: 1, .. }))
    );

    publisher.stop();
    assert_eq!(publisher.state(), PublisherState::Terminated);
    assert!(
        events
            .lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, StreamEvent::StreamStopped { manual: true }))
    );
}

#[test]
fn test_sticky_manual_stop() {
    init_logging();
    let mock = MockIngest::start(MockOptions::default());
    let flags = Arc::new(MemoryFlagStore::new());
    let (events, sink) = collecting_sink();

    let publisher = Publisher::new(fast_reconnect_config(), flags.clone(), sink);
    publisher
        .start(
            StartRequest {
                url: mock.url(),
                key: "K-TEST".into(),
            },
            scripted_hardware(),
        )
        .unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        publisher.state() == PublisherState::Publishing
    }));
    assert!(flags.was_streaming());
    assert!(!flags.manual_stop());

    publisher.stop();
    publisher.stop(); // idempotent
    assert_eq!(publisher.state(), PublisherState::Terminated);

    assert!(flags.manual_stop());
    assert!(!flags.was_streaming());
    assert!(!should_auto_restart(flags.as_ref()));

    // A disconnect after stop must never trigger a reconnect
    std::thread::sleep(Duration::from_millis(400));
    assert_eq!(mock.connection_count(), 1);

    let events = events.lock().unwrap();
    let stops: Vec<_> = events
        .iter()
        .filter(|e| matches!(e, StreamEvent::StreamStopped { .. }))
        .collect();
    assert_eq!(stops.len(), 1);
    assert!(matches!(
        stops[0],
        StreamEvent::StreamStopped { manual: true }
    ));
    assert!(
        !events
            .iter()
            .any(|e| matches!(e, StreamEvent::ReconnectAttempt { .. }))
    );
}

#[test]
fn test_connect_failure_reports_reason() {
    init_logging();
    // Grab a port nothing listens on
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let flags = Arc::new(MemoryFlagStore::new());
    let (events, sink) = collecting_sink();
    let publisher = Publisher::new(fast_reconnect_config(), flags, sink);
    publisher
        .start(
            StartRequest {
                url: format!("rtmp://127.0.0.1:{}/live2", port),
                key: "K-TEST".into(),
            },
            scripted_hardware(),
        )
        .unwrap();

    assert!(wait_until(Duration::from_secs(10), || {
        publisher.state() == PublisherState::Terminated
    }));

    let events = events.lock().unwrap();
    assert!(
        events
            .iter()
            .any(|e| matches!(e, StreamEvent::StreamFailed(_)))
    );
    assert!(
        events
            .iter()
            .any(|e| matches!(e, StreamEvent::StreamStopped { manual: false }))
    );
}
