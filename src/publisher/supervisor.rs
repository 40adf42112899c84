use crate::audio::{AudioCaptureSource, AudioEncoder, AudioMixer, AudioOutput, MixerSources};
use crate::client::{ClientConfig, Endpoint, PayloadKind, RtmpClient};
use crate::encoder::{
    StreamProfile, VideoCoordinator, VideoEncoder, VideoEncoderSettings, VideoOutput,
};
use crate::flv::metadata_payload;
use crate::publisher::{
    EventSink, FailReason, FlagStore, Metrics, PublisherState, StreamEvent, fail_reason_for,
};
use crate::{Error, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Cadence of the metrics event stream
const METRICS_TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub screen_width: u32,
    pub screen_height: u32,
    pub fps: u32,
    pub client: ClientConfig,
    pub max_reconnect_attempts: u32,
    pub reconnect_base_delay: Duration,
    pub reconnect_backoff_factor: f64,
    pub reconnect_max_delay: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        PublisherConfig {
            screen_width: 1080,
            screen_height: 2400,
            fps: 60,
            client: ClientConfig::default(),
            max_reconnect_attempts: 5,
            reconnect_base_delay: Duration::from_millis(500),
            reconnect_backoff_factor: 1.7,
            reconnect_max_delay: Duration::from_secs(10),
        }
    }
}

impl PublisherConfig {
    /// Backoff delay before reconnect attempt `attempt` (1-based)
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        let mut delay = self.reconnect_base_delay.as_millis() as f64;
        for _ in 1..attempt {
            delay = (delay * self.reconnect_backoff_factor).round();
        }
        Duration::from_millis((delay as u64).min(self.reconnect_max_delay.as_millis() as u64))
    }
}

/// User intent to go live
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub url: String,
    pub key: String,
}

/// Platform handles opened for this stream session. The hardware encoders
/// and capture sources live behind narrow traits; the core never opens
/// them itself.
pub struct SessionHardware {
    pub video_encoder: Box<dyn VideoEncoder>,
    pub audio_encoder: Box<dyn AudioEncoder>,
    pub mic: Option<Box<dyn AudioCaptureSource>>,
    pub system_audio: Option<Box<dyn AudioCaptureSource>>,
}

enum Command {
    Disconnected,
    EncoderFailed(String),
    Stop,
}

enum LoopExit {
    Resumed,
    ManualStop,
    Fatal(FailReason),
}

/// Session state shared between the supervisor thread and the media sinks
struct SessionShared {
    /// Gate between the always-running encoder drains and the network.
    /// Closed while disconnected or reconnecting; frames are dropped at
    /// this boundary instead of stopping the hardware.
    transport_up: AtomicBool,
    video_seq_sent: AtomicBool,
    audio_seq_sent: AtomicBool,
    cache: Mutex<SequenceCache>,
    manual_stop: AtomicBool,
    dropped_frames: AtomicU64,
    video_frames_sent: AtomicU64,
}

/// Last seen sequence headers, re-sent at the start of every publish
/// session because ingest servers expect them after each publish
#[derive(Default)]
struct SequenceCache {
    video: Option<Vec<u8>>,
    audio: Option<Vec<u8>>,
}

/// Orchestrates the RTMP client, FLV muxing, encoder coordination, and the
/// audio mixer for one stream session, including reconnect policy and
/// manual-stop semantics.
pub struct Publisher {
    config: PublisherConfig,
    flags: Arc<dyn FlagStore>,
    events: EventSink,
    state: Arc<Mutex<PublisherState>>,
    shared: Arc<SessionShared>,
    coordinator: Arc<Mutex<VideoCoordinator>>,
    mixer: Arc<Mutex<AudioMixer>>,
    client: Mutex<Option<RtmpClient>>,
    control_tx: Mutex<Option<Sender<Command>>>,
    control_handle: Mutex<Option<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl Publisher {
    pub fn new(config: PublisherConfig, flags: Arc<dyn FlagStore>, events: EventSink) -> Self {
        Publisher {
            config,
            flags,
            events,
            state: Arc::new(Mutex::new(PublisherState::Idle)),
            shared: Arc::new(SessionShared {
                transport_up: AtomicBool::new(false),
                video_seq_sent: AtomicBool::new(false),
                audio_seq_sent: AtomicBool::new(false),
                cache: Mutex::new(SequenceCache::default()),
                manual_stop: AtomicBool::new(false),
                dropped_frames: AtomicU64::new(0),
                video_frames_sent: AtomicU64::new(0),
            }),
            coordinator: Arc::new(Mutex::new(VideoCoordinator::new())),
            mixer: Arc::new(Mutex::new(AudioMixer::new())),
            client: Mutex::new(None),
            control_tx: Mutex::new(None),
            control_handle: Mutex::new(None),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> PublisherState {
        *self.state.lock().unwrap()
    }

    /// The profile this publisher derives for its configured screen
    pub fn profile(&self) -> StreamProfile {
        StreamProfile::from_screen(
            self.config.screen_width,
            self.config.screen_height,
            self.config.fps,
        )
    }

    /// Validate the request, persist the streaming flags, start the
    /// encoders, and kick off the supervisor thread. Connection progress
    /// and failures are reported through the event sink.
    pub fn start(&self, request: StartRequest, hardware: SessionHardware) -> Result<()> {
        {
            let state = self.state.lock().unwrap();
            if *state != PublisherState::Idle {
                return Err(Error::invalid_state(format!(
                    "Cannot start from {:?}",
                    *state
                )));
            }
        }

        let endpoint = Endpoint::parse(&request.url, &request.key)?;
        let profile = self.profile();

        self.flags.set_manual_stop(false);
        self.flags.set_was_streaming(true);
        self.shared.manual_stop.store(false, Ordering::SeqCst);

        let client = RtmpClient::new(endpoint, self.config.client.clone());
        let (tx, rx) = mpsc::channel();

        {
            let tx = tx.clone();
            client.set_on_disconnected(move |error| {
                log::warn!("Transport lost: {}", error);
                let _ = tx.send(Command::Disconnected);
            });
        }

        // Encoders start now and live until stop(); reconnects only touch
        // the transport gate.
        let settings = VideoEncoderSettings::from_profile(&profile);
        self.coordinator.lock().unwrap().start(
            hardware.video_encoder,
            &settings,
            self.video_sink(client.clone(), tx.clone()),
        )?;
        self.mixer.lock().unwrap().start(
            MixerSources {
                mic: hardware.mic,
                system: hardware.system_audio,
            },
            hardware.audio_encoder,
            self.audio_sink(client.clone(), tx.clone()),
        );

        *self.client.lock().unwrap() = Some(client.clone());
        *self.control_tx.lock().unwrap() = Some(tx);
        *self.state.lock().unwrap() = PublisherState::Connecting;

        let ctx = ControlCtx {
            client,
            rx,
            events: self.events.clone(),
            state: self.state.clone(),
            shared: self.shared.clone(),
            config: self.config.clone(),
            profile,
            coordinator: self.coordinator.clone(),
            mixer: self.mixer.clone(),
        };
        let handle = std::thread::Builder::new()
            .name("publish-supervisor".into())
            .spawn(move || run_control(ctx))
            .expect("spawn supervisor thread");
        *self.control_handle.lock().unwrap() = Some(handle);

        Ok(())
    }

    /// Stop the stream. Idempotent; a disconnect arriving after this never
    /// triggers a reconnect.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        log::info!("Manual stop requested");
        self.flags.set_manual_stop(true);
        self.flags.set_was_streaming(false);
        self.shared.manual_stop.store(true, Ordering::SeqCst);
        self.shared.transport_up.store(false, Ordering::SeqCst);

        if let Some(tx) = self.control_tx.lock().unwrap().as_ref() {
            let _ = tx.send(Command::Stop);
        }
        // Unblock any in-flight connect or read
        if let Some(client) = self.client.lock().unwrap().as_ref() {
            client.close_quiet();
        }
        let handle = self.control_handle.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }

        self.teardown_session();
        *self.state.lock().unwrap() = PublisherState::Terminated;
    }

    pub fn toggle_mic(&self) -> bool {
        self.mixer.lock().unwrap().toggle_mic()
    }

    pub fn toggle_system_audio(&self) -> bool {
        self.mixer.lock().unwrap().toggle_system_audio()
    }

    pub fn mic_enabled(&self) -> bool {
        self.mixer.lock().unwrap().mic_enabled()
    }

    pub fn system_audio_enabled(&self) -> bool {
        self.mixer.lock().unwrap().system_audio_enabled()
    }

    /// Forward a bitrate change to the encoder. Policy lives with the
    /// caller; the encoder only obeys.
    pub fn set_video_bitrate(&self, kbps: u32) {
        self.coordinator.lock().unwrap().set_bitrate(kbps);
    }

    /// Video drain thread starts this session; stays at one across
    /// reconnects
    pub fn video_drain_starts(&self) -> u32 {
        self.coordinator.lock().unwrap().drain_start_count()
    }

    fn teardown_session(&self) {
        self.coordinator.lock().unwrap().stop();
        self.mixer.lock().unwrap().cleanup();
        if let Some(client) = self.client.lock().unwrap().as_ref() {
            client.shutdown();
        }
    }

    /// Routes encoder output to the wire. Config payloads are cached for
    /// re-publish; data frames are dropped while the gate is closed or the
    /// session's sequence header has not gone out yet.
    fn video_sink(
        &self,
        client: RtmpClient,
        tx: Sender<Command>,
    ) -> Arc<dyn Fn(VideoOutput) + Send + Sync> {
        let shared = self.shared.clone();
        Arc::new(move |output| match output {
            VideoOutput::SequenceHeader { payload } => {
                shared.cache.lock().unwrap().video = Some(payload.clone());
                if shared.transport_up.load(Ordering::SeqCst)
                    && client
                        .send_flv_payload(PayloadKind::Video, payload, 0)
                        .is_ok()
                {
                    shared.video_seq_sent.store(true, Ordering::SeqCst);
                }
            }
            VideoOutput::Frame { payload, ts_ms, .. } => {
                let gate_open = shared.transport_up.load(Ordering::SeqCst)
                    && shared.video_seq_sent.load(Ordering::SeqCst);
                if gate_open
                    && client
                        .send_flv_payload(PayloadKind::Video, payload, ts_ms)
                        .is_ok()
                {
                    shared.video_frames_sent.fetch_add(1, Ordering::SeqCst);
                } else {
                    shared.dropped_frames.fetch_add(1, Ordering::SeqCst);
                }
            }
            VideoOutput::Failed { reason } => {
                let _ = tx.send(Command::EncoderFailed(reason));
            }
        })
    }

    fn audio_sink(
        &self,
        client: RtmpClient,
        tx: Sender<Command>,
    ) -> Arc<dyn Fn(AudioOutput) + Send + Sync> {
        let shared = self.shared.clone();
        Arc::new(move |output| match output {
            AudioOutput::SequenceHeader { payload } => {
                shared.cache.lock().unwrap().audio = Some(payload.clone());
                if shared.transport_up.load(Ordering::SeqCst)
                    && client
                        .send_flv_payload(PayloadKind::Audio, payload, 0)
                        .is_ok()
                {
                    shared.audio_seq_sent.store(true, Ordering::SeqCst);
                }
            }
            AudioOutput::Frame { payload, ts_ms } => {
                let gate_open = shared.transport_up.load(Ordering::SeqCst)
                    && shared.audio_seq_sent.load(Ordering::SeqCst);
                if gate_open {
                    let _ = client.send_flv_payload(PayloadKind::Audio, payload, ts_ms);
                }
            }
            AudioOutput::Failed { reason } => {
                let _ = tx.send(Command::EncoderFailed(reason));
            }
        })
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        if !self.stopped.load(Ordering::SeqCst) {
            self.stop();
        }
    }
}

struct ControlCtx {
    client: RtmpClient,
    rx: Receiver<Command>,
    events: EventSink,
    state: Arc<Mutex<PublisherState>>,
    shared: Arc<SessionShared>,
    config: PublisherConfig,
    profile: StreamProfile,
    coordinator: Arc<Mutex<VideoCoordinator>>,
    mixer: Arc<Mutex<AudioMixer>>,
}

/// Release session resources from the supervisor thread so failed streams
/// reach Terminated without a user-driven stop
fn release_session(ctx_state: &Arc<Mutex<PublisherState>>, ctx: &ControlCtxResources) {
    ctx.shared.transport_up.store(false, Ordering::SeqCst);
    ctx.coordinator.lock().unwrap().stop();
    ctx.mixer.lock().unwrap().cleanup();
    ctx.client.shutdown();
    *ctx_state.lock().unwrap() = PublisherState::Terminated;
}

struct ControlCtxResources {
    client: RtmpClient,
    shared: Arc<SessionShared>,
    coordinator: Arc<Mutex<VideoCoordinator>>,
    mixer: Arc<Mutex<AudioMixer>>,
}

/// The supervisor thread: connect, then pump commands and metric ticks
/// until the stream ends
fn run_control(ctx: ControlCtx) {
    let ControlCtx {
        client,
        rx,
        events,
        state,
        shared,
        config,
        profile,
        coordinator,
        mixer,
    } = ctx;

    let resources = ControlCtxResources {
        client: client.clone(),
        shared: shared.clone(),
        coordinator,
        mixer,
    };

    if let Err(error) = client.connect_blocking(config.client.connect_timeout) {
        if shared.manual_stop.load(Ordering::SeqCst) {
            *state.lock().unwrap() = PublisherState::StoppingManual;
            events(StreamEvent::StreamStopped { manual: true });
            release_session(&state, &resources);
            return;
        }
        log::error!("Stream start failed: {}", error);
        events(StreamEvent::StreamFailed(fail_reason_for(&error)));
        events(StreamEvent::StreamStopped { manual: false });
        *state.lock().unwrap() = PublisherState::StoppingFailed;
        release_session(&state, &resources);
        return;
    }

    if let Err(error) = open_session(&client, &shared, &profile) {
        log::error!("Session bring-up failed: {}", error);
        events(StreamEvent::StreamFailed(fail_reason_for(&error)));
        events(StreamEvent::StreamStopped { manual: false });
        *state.lock().unwrap() = PublisherState::StoppingFailed;
        release_session(&state, &resources);
        return;
    }
    *state.lock().unwrap() = PublisherState::Publishing;

    let stream_start = Instant::now();
    let mut window = MetricsWindow::new(&client, stream_start);

    loop {
        match rx.recv_timeout(METRICS_TICK) {
            Ok(Command::Stop) => {
                *state.lock().unwrap() = PublisherState::StoppingManual;
                events(StreamEvent::StreamStopped { manual: true });
                break;
            }
            Ok(Command::EncoderFailed(reason)) => {
                log::error!("Encoder failed: {}", reason);
                shared.transport_up.store(false, Ordering::SeqCst);
                events(StreamEvent::StreamFailed(FailReason::EncoderFailed));
                events(StreamEvent::StreamStopped { manual: false });
                *state.lock().unwrap() = PublisherState::StoppingFailed;
                break;
            }
            Ok(Command::Disconnected) => {
                if shared.manual_stop.load(Ordering::SeqCst) {
                    // stop() is already in flight; its Stop command ends the loop
                    continue;
                }
                shared.transport_up.store(false, Ordering::SeqCst);
                *state.lock().unwrap() = PublisherState::Reconnecting;

                match run_reconnect_loop(&client, &rx, &events, &state, &shared, &config, &profile)
                {
                    LoopExit::Resumed => {
                        *state.lock().unwrap() = PublisherState::Publishing;
                    }
                    LoopExit::ManualStop => {
                        *state.lock().unwrap() = PublisherState::StoppingManual;
                        events(StreamEvent::StreamStopped { manual: true });
                        break;
                    }
                    LoopExit::Fatal(reason) => {
                        events(StreamEvent::StreamFailed(reason));
                        events(StreamEvent::StreamStopped { manual: false });
                        *state.lock().unwrap() = PublisherState::StoppingFailed;
                        break;
                    }
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                if state.lock().unwrap().is_live() {
                    events(StreamEvent::Metrics(window.tick(&client, &shared)));
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    release_session(&state, &resources);
    log::info!("Supervisor thread exiting");
}

/// Bring a fresh publish session up to media flow: metadata first, then
/// the cached sequence headers, then open the transport gate
fn open_session(client: &RtmpClient, shared: &SessionShared, profile: &StreamProfile) -> Result<()> {
    shared.video_seq_sent.store(false, Ordering::SeqCst);
    shared.audio_seq_sent.store(false, Ordering::SeqCst);

    client.send_flv_payload(PayloadKind::Script, metadata_payload(profile)?, 0)?;

    let cache = shared.cache.lock().unwrap();
    if let Some(video) = cache.video.clone() {
        client.send_flv_payload(PayloadKind::Video, video, 0)?;
        shared.video_seq_sent.store(true, Ordering::SeqCst);
    }
    if let Some(audio) = cache.audio.clone() {
        client.send_flv_payload(PayloadKind::Audio, audio, 0)?;
        shared.audio_seq_sent.store(true, Ordering::SeqCst);
    }
    drop(cache);

    shared.transport_up.store(true, Ordering::SeqCst);
    Ok(())
}

fn run_reconnect_loop(
    client: &RtmpClient,
    rx: &Receiver<Command>,
    events: &EventSink,
    state: &Arc<Mutex<PublisherState>>,
    shared: &SessionShared,
    config: &PublisherConfig,
    profile: &StreamProfile,
) -> LoopExit {
    for attempt in 1..=config.max_reconnect_attempts {
        let delay = config.reconnect_delay(attempt);
        log::info!(
            "Reconnect attempt {}/{} in {} ms",
            attempt,
            config.max_reconnect_attempts,
            delay.as_millis()
        );
        events(StreamEvent::ReconnectAttempt {
            attempt,
            delay_ms: delay.as_millis() as u64,
        });

        // Backoff wait, cancellable by stop or a fatal encoder error.
        // Stale disconnect commands are drained and ignored: only one
        // reconnect flight exists at a time.
        let deadline = Instant::now() + delay;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match rx.recv_timeout(remaining) {
                Ok(Command::Stop) => return LoopExit::ManualStop,
                Ok(Command::EncoderFailed(reason)) => {
                    log::error!("Encoder failed during reconnect: {}", reason);
                    return LoopExit::Fatal(FailReason::EncoderFailed);
                }
                Ok(Command::Disconnected) => continue,
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => return LoopExit::ManualStop,
            }
        }

        if shared.manual_stop.load(Ordering::SeqCst) {
            return LoopExit::ManualStop;
        }
        if !state.lock().unwrap().is_live() {
            return LoopExit::ManualStop;
        }

        match client.reconnect() {
            Ok(()) => match open_session(client, shared, profile) {
                Ok(()) => {
                    log::info!("Reconnected on attempt {}", attempt);
                    return LoopExit::Resumed;
                }
                Err(e) => {
                    log::warn!("Session bring-up after reconnect failed: {}", e);
                    client.close_quiet();
                }
            },
            Err(e) => {
                log::warn!("Reconnect attempt {} failed: {}", attempt, e);
            }
        }
    }

    LoopExit::Fatal(FailReason::NetworkLost)
}

/// Deltas for the once-per-second metrics event
struct MetricsWindow {
    stream_start: Instant,
    last_tick: Instant,
    last_bytes: u64,
    last_frames: u64,
}

impl MetricsWindow {
    fn new(client: &RtmpClient, stream_start: Instant) -> Self {
        MetricsWindow {
            stream_start,
            last_tick: Instant::now(),
            last_bytes: client.bytes_sent(),
            last_frames: 0,
        }
    }

    fn tick(&mut self, client: &RtmpClient, shared: &SessionShared) -> Metrics {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_tick).as_secs_f64().max(0.001);

        let bytes = client.bytes_sent();
        let frames = shared.video_frames_sent.load(Ordering::SeqCst);

        let bitrate_kbps = (((bytes - self.last_bytes) as f64 * 8.0 / 1000.0) / elapsed) as u32;
        let fps = ((frames - self.last_frames) as f64 / elapsed).round() as u32;

        self.last_tick = now;
        self.last_bytes = bytes;
        self.last_frames = frames;

        Metrics {
            bitrate_kbps,
            fps,
            elapsed_ms: self.stream_start.elapsed().as_millis() as u64,
            dropped_frames: shared.dropped_frames.load(Ordering::SeqCst),
        }
    }
}
