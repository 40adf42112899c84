use crate::chunk::{ChunkAssembler, ChunkWriter};
use crate::client::ack::AckTracker;
use crate::client::config::{ClientConfig, Endpoint};
use crate::client::state::ClientState;
use crate::client::transport::{ReadHalf, ReadOutcome, Transport, WriteHalf, shutdown_socket};
use crate::protocol::{
    self, BandwidthLimit, MSG_TYPE_ABORT, MSG_TYPE_ACK, MSG_TYPE_AUDIO, MSG_TYPE_COMMAND_AMF0,
    MSG_TYPE_DATA_AMF0, MSG_TYPE_SET_CHUNK_SIZE, MSG_TYPE_SET_PEER_BW, MSG_TYPE_USER_CONTROL,
    MSG_TYPE_VIDEO, MSG_TYPE_WINDOW_ACK, RtmpCommand, RtmpHeader, RtmpMessage,
    USER_CONTROL_PING_REQUEST, USER_CONTROL_PING_RESPONSE, parse_u32_payload, parse_user_control,
};
use crate::utils::mask_stream_key;
use crate::{Error, Result, perform_client_handshake};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Bound on waiting for the previous reader to vacate its slot
const READER_SLOT_WAIT: Duration = Duration::from_millis(500);

/// What a payload becomes on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Video,
    Audio,
    Script,
}

/// Write path of a live connection, guarded by one mutex so exactly one
/// writer touches the socket at a time
struct WriterConn {
    write: WriteHalf,
    writer: ChunkWriter,
    shutdown: TcpStream,
    teardown: Arc<AtomicBool>,
}

struct Inner {
    endpoint: Endpoint,
    config: ClientConfig,
    conn: Mutex<Option<WriterConn>>,
    ack: Mutex<AckTracker>,
    state: Mutex<ClientState>,
    /// Identity of the live reader thread; zero when vacant. A new reader
    /// can only be spawned into a vacant slot.
    reader_slot: AtomicU64,
    reader_token: AtomicU64,
    stream_id: AtomicU32,
    bytes_sent: AtomicU64,
    peer_acked: AtomicU64,
    created: Instant,
    last_inbound_ms: AtomicU64,
    /// Milliseconds since `created` at first publish, plus one (zero =
    /// never published)
    stream_epoch_ms: AtomicU64,
    disconnect_notified: AtomicBool,
    on_publish_started: Mutex<Option<Box<dyn Fn() + Send + Sync>>>,
    on_disconnected: Mutex<Option<Arc<dyn Fn(&Error) + Send + Sync>>>,
    keepalive: Mutex<Option<JoinHandle<()>>>,
    keepalive_stop: Arc<(Mutex<bool>, Condvar)>,
}

/// RTMP/RTMPS publishing client.
///
/// Cheap to clone; all clones share one connection. Reconnecting replaces
/// the connection without disturbing anything upstream of
/// `send_flv_payload`.
#[derive(Clone)]
pub struct RtmpClient {
    inner: Arc<Inner>,
}

enum DialogStage {
    Connect,
    CreateStream,
    Publish,
}

impl RtmpClient {
    /// Create a client for one ingest endpoint. Construction performs no
    /// I/O.
    pub fn new(endpoint: Endpoint, config: ClientConfig) -> Self {
        let window = config.window_ack_size;
        RtmpClient {
            inner: Arc::new(Inner {
                endpoint,
                config,
                conn: Mutex::new(None),
                ack: Mutex::new(AckTracker::new(window)),
                state: Mutex::new(ClientState::Disconnected),
                reader_slot: AtomicU64::new(0),
                reader_token: AtomicU64::new(0),
                stream_id: AtomicU32::new(0),
                bytes_sent: AtomicU64::new(0),
                peer_acked: AtomicU64::new(0),
                created: Instant::now(),
                last_inbound_ms: AtomicU64::new(0),
                stream_epoch_ms: AtomicU64::new(0),
                disconnect_notified: AtomicBool::new(false),
                on_publish_started: Mutex::new(None),
                on_disconnected: Mutex::new(None),
                keepalive: Mutex::new(None),
                keepalive_stop: Arc::new((Mutex::new(false), Condvar::new())),
            }),
        }
    }

    /// Register the callback fired once per successful publish dialog
    pub fn set_on_publish_started(&self, callback: impl Fn() + Send + Sync + 'static) {
        *self.inner.on_publish_started.lock().unwrap() = Some(Box::new(callback));
    }

    /// Register the callback fired when the connection drops unexpectedly.
    /// Deduplicated: fires at most once per connection.
    pub fn set_on_disconnected(&self, callback: impl Fn(&Error) + Send + Sync + 'static) {
        *self.inner.on_disconnected.lock().unwrap() = Some(Arc::new(callback));
    }

    pub fn state(&self) -> ClientState {
        *self.inner.state.lock().unwrap()
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.inner.endpoint
    }

    /// Cumulative bytes written to the socket, for the metrics surface
    pub fn bytes_sent(&self) -> u64 {
        self.inner.bytes_sent.load(Ordering::SeqCst)
    }

    /// Milliseconds since the first successful publish, zero before that
    pub fn stream_time_ms(&self) -> u32 {
        let epoch = self.inner.stream_epoch_ms.load(Ordering::SeqCst);
        if epoch == 0 {
            return 0;
        }
        (self.now_ms().saturating_sub(epoch - 1)) as u32
    }

    /// Connect, handshake, and run the command dialog through
    /// `NetStream.Publish.Start`. Blocks the calling thread.
    pub fn connect_blocking(&self, timeout: Duration) -> Result<()> {
        self.teardown_connection();
        *self.inner.state.lock().unwrap() = ClientState::Connecting;

        log::info!(
            "Connecting to {}:{} app={} key={} tls={}",
            self.inner.endpoint.host,
            self.inner.endpoint.port,
            self.inner.endpoint.app,
            mask_stream_key(&self.inner.endpoint.stream_key),
            self.inner.endpoint.secure
        );

        match self.connect_inner(timeout) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.teardown_connection();
                Err(e)
            }
        }
    }

    fn connect_inner(&self, timeout: Duration) -> Result<()> {
        let config = &self.inner.config;

        let mut transport = Transport::connect(&self.inner.endpoint, timeout)?;
        transport.set_read_timeout(config.handshake_timeout)?;
        perform_client_handshake(&mut transport)?;
        log::debug!("RTMP handshake complete");

        let shutdown = transport.shutdown_handle()?;
        let teardown = Arc::new(AtomicBool::new(false));
        let (mut read_half, write_half) = transport.split()?;

        {
            let mut conn = self.inner.conn.lock().unwrap();
            *conn = Some(WriterConn {
                write: write_half,
                writer: ChunkWriter::new(),
                shutdown,
                teardown: teardown.clone(),
            });
        }

        // Raise the outgoing chunk size, then the connect dialog. Window
        // size and peer bandwidth go out right after connect.
        self.send_message(&protocol::set_chunk_size(config.chunk_size))?;
        if let Some(conn) = self.inner.conn.lock().unwrap().as_mut() {
            conn.writer.set_chunk_size(config.chunk_size as usize);
        }

        let connect_cmd = RtmpCommand::connect(
            &self.inner.endpoint.app,
            &self.inner.endpoint.tc_url(),
            &config.flash_version,
        );
        self.send_command(&connect_cmd, RtmpHeader::command(0, 0, 0))?;
        self.send_message(&protocol::window_ack_size(config.window_ack_size))?;
        self.send_message(&protocol::set_peer_bandwidth(
            config.window_ack_size,
            BandwidthLimit::Dynamic,
        ))?;

        let mut assembler = ChunkAssembler::new();
        let deadline = Instant::now() + config.dialog_timeout;

        self.await_dialog(
            &mut read_half,
            &mut assembler,
            deadline,
            DialogStage::Connect,
            1.0,
        )?;
        *self.inner.state.lock().unwrap() = ClientState::Connected;
        log::debug!("NetConnection established");

        self.send_command(&RtmpCommand::create_stream(2.0), RtmpHeader::command(0, 0, 0))?;
        let result = self.await_dialog(
            &mut read_half,
            &mut assembler,
            deadline,
            DialogStage::CreateStream,
            2.0,
        )?;
        let stream_id = result
            .result_stream_id()
            .ok_or_else(|| Error::handshake_bad("createStream result carried no stream id"))?;
        self.inner.stream_id.store(stream_id, Ordering::SeqCst);

        let publish_cmd = RtmpCommand::publish(3.0, &self.inner.endpoint.stream_key);
        self.send_command(&publish_cmd, RtmpHeader::stream_command(0, 0, stream_id))?;
        self.await_dialog(
            &mut read_half,
            &mut assembler,
            deadline,
            DialogStage::Publish,
            3.0,
        )?;

        *self.inner.state.lock().unwrap() = ClientState::Publishing;
        self.inner
            .stream_epoch_ms
            .compare_exchange(0, self.now_ms() + 1, Ordering::SeqCst, Ordering::SeqCst)
            .ok();
        self.inner.disconnect_notified.store(false, Ordering::SeqCst);

        // The dialog is done; hand the read side to the dedicated reader
        self.spawn_reader(read_half, assembler, teardown)?;
        self.ensure_keepalive();

        log::info!(
            "Publishing to {} (stream id {})",
            self.inner.endpoint.app,
            stream_id
        );
        if let Some(callback) = self.inner.on_publish_started.lock().unwrap().as_ref() {
            callback();
        }
        Ok(())
    }

    /// Rebuild the connection after a failure. Never called by the client
    /// itself; the supervisor owns retry policy.
    pub fn reconnect(&self) -> Result<()> {
        log::info!("Reconnecting to {}", self.inner.endpoint.host);
        self.teardown_connection();

        let waited = Instant::now();
        while self.inner.reader_slot.load(Ordering::SeqCst) != 0 {
            if waited.elapsed() > READER_SLOT_WAIT {
                log::warn!("Previous reader did not exit within 500 ms, force-clearing slot");
                self.inner.reader_slot.store(0, Ordering::SeqCst);
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }

        self.connect_blocking(self.inner.config.connect_timeout)
    }

    /// Release the socket without raising
    pub fn close_quiet(&self) {
        self.teardown_connection();
    }

    /// Full stop: connection plus keepalive timer. Idempotent.
    pub fn shutdown(&self) {
        self.teardown_connection();

        let handle = self.inner.keepalive.lock().unwrap().take();
        if let Some(handle) = handle {
            let (lock, cvar) = &*self.inner.keepalive_stop;
            *lock.lock().unwrap() = true;
            cvar.notify_all();
            let _ = handle.join();
        }
    }

    /// Enqueue one FLV tag payload as an RTMP message
    pub fn send_flv_payload(&self, kind: PayloadKind, payload: Vec<u8>, ts_ms: u32) -> Result<()> {
        let stream_id = self.inner.stream_id.load(Ordering::SeqCst);
        let len = payload.len() as u32;
        let header = match kind {
            PayloadKind::Video => RtmpHeader::video(ts_ms, len, stream_id),
            PayloadKind::Audio => RtmpHeader::audio(ts_ms, len, stream_id),
            PayloadKind::Script => RtmpHeader::data(ts_ms, len, stream_id),
        };
        self.send_message(&RtmpMessage::new(header, payload))
    }

    fn send_command(&self, command: &RtmpCommand, header_template: RtmpHeader) -> Result<()> {
        let payload = command.encode()?;
        let mut header = header_template;
        header.message_length = payload.len() as u32;
        self.send_message(&RtmpMessage::new(header, payload))
    }

    /// Serialize and write one message. The connection mutex is held for
    /// the whole chunked write.
    fn send_message(&self, message: &RtmpMessage) -> Result<()> {
        let mut guard = self.inner.conn.lock().unwrap();
        let conn = guard
            .as_mut()
            .ok_or_else(|| Error::io("not alive"))?;
        if conn.teardown.load(Ordering::SeqCst) {
            return Err(Error::io("not alive"));
        }

        let bytes = conn.writer.encode_message(message);
        conn.write.write_all(&bytes)?;
        self.inner
            .bytes_sent
            .fetch_add(bytes.len() as u64, Ordering::SeqCst);
        Ok(())
    }

    /// Record inbound socket bytes: refresh the idle clock and emit a
    /// window acknowledgement when one is due
    fn register_inbound(&self, n: usize) -> Result<()> {
        self.inner
            .last_inbound_ms
            .store(self.now_ms(), Ordering::SeqCst);

        let due = self.inner.ack.lock().unwrap().on_bytes(n);
        if let Some(sequence) = due {
            log::debug!("Window acknowledgement at {} bytes", sequence);
            self.send_message(&protocol::acknowledgement(sequence))?;
        }
        Ok(())
    }

    /// Dispatch one assembled message. Returns the decoded command for
    /// command messages so dialog waits can inspect it.
    fn handle_message(
        &self,
        message: &RtmpMessage,
        assembler: &mut ChunkAssembler,
    ) -> Result<Option<RtmpCommand>> {
        match message.message_type() {
            MSG_TYPE_SET_CHUNK_SIZE => {
                let size = parse_u32_payload(&message.payload)? & 0x7FFF_FFFF;
                log::debug!("Peer chunk size {}", size);
                assembler.set_incoming_chunk_size(size);
            }
            MSG_TYPE_ABORT => {
                let cs_id = parse_u32_payload(&message.payload)?;
                assembler.abort(cs_id);
            }
            MSG_TYPE_ACK => {
                let acked = parse_u32_payload(&message.payload)?;
                self.inner.peer_acked.store(acked as u64, Ordering::SeqCst);
                log::trace!("Peer acknowledged {} bytes", acked);
            }
            MSG_TYPE_USER_CONTROL => {
                let event = parse_user_control(&message.payload)?;
                match event.event_type {
                    USER_CONTROL_PING_REQUEST => {
                        log::debug!("Ping request, echoing {}", event.payload);
                        self.send_message(&protocol::ping_response(event.payload))?;
                    }
                    USER_CONTROL_PING_RESPONSE => {
                        log::trace!("Ping response {}", event.payload);
                    }
                    other => {
                        log::debug!("Ignoring user control event {}", other);
                    }
                }
            }
            MSG_TYPE_WINDOW_ACK => {
                let window = parse_u32_payload(&message.payload)?;
                log::debug!("Peer window acknowledgement size {}", window);
                self.inner.ack.lock().unwrap().set_window(window);
            }
            MSG_TYPE_SET_PEER_BW => {
                // Acknowledge by echoing our own window size
                self.send_message(&protocol::window_ack_size(
                    self.inner.config.window_ack_size,
                ))?;
            }
            MSG_TYPE_COMMAND_AMF0 => match RtmpCommand::decode(&message.payload) {
                Ok(command) => return Ok(Some(command)),
                Err(e) => {
                    // Fatal to this message only
                    log::warn!("Dropping undecodable command message: {}", e);
                }
            },
            MSG_TYPE_AUDIO | MSG_TYPE_VIDEO | MSG_TYPE_DATA_AMF0 => {
                log::debug!(
                    "Ignoring inbound media message type {} on publish session",
                    message.message_type()
                );
            }
            other => {
                log::debug!("Ignoring message type {}", other);
            }
        }
        Ok(None)
    }

    /// Block until the command that completes one dialog stage arrives
    fn await_dialog(
        &self,
        read: &mut ReadHalf,
        assembler: &mut ChunkAssembler,
        deadline: Instant,
        stage: DialogStage,
        transaction_id: f64,
    ) -> Result<RtmpCommand> {
        let mut buf = [0u8; 4096];

        loop {
            if Instant::now() > deadline {
                return Err(Error::timeout("Publish dialog timed out"));
            }

            let n = match read.read_some(&mut buf)? {
                ReadOutcome::Data(n) => n,
                ReadOutcome::Idle => continue,
                ReadOutcome::Eof => {
                    return Err(Error::io("connection closed during dialog"));
                }
            };
            self.register_inbound(n)?;

            for message in assembler.feed(&buf[..n])? {
                let Some(command) = self.handle_message(&message, assembler)? else {
                    continue;
                };

                if command.is_error() {
                    return Err(self.classify_dialog_error(&stage, &command));
                }

                match stage {
                    DialogStage::Connect | DialogStage::CreateStream => {
                        if command.is_result() && command.transaction_id == transaction_id {
                            return Ok(command);
                        }
                    }
                    DialogStage::Publish => {
                        if command.is_status() {
                            let code = command.status_code().unwrap_or("");
                            if code == "NetStream.Publish.Start" {
                                return Ok(command);
                            }
                            if code.starts_with("NetStream.Publish")
                                || code.starts_with("NetStream.Failed")
                            {
                                return Err(Error::publish_rejected(
                                    command.status_description().unwrap_or(code).to_string(),
                                ));
                            }
                        }
                    }
                }
                log::debug!("Ignoring command '{}' while waiting", command.name);
            }
        }
    }

    fn classify_dialog_error(&self, stage: &DialogStage, command: &RtmpCommand) -> Error {
        let code = command.status_code().unwrap_or("");
        let description = command.status_description().unwrap_or(code);

        match stage {
            DialogStage::Publish => Error::publish_rejected(description.to_string()),
            _ => {
                if description.to_lowercase().contains("auth")
                    || code == "NetConnection.Connect.Rejected"
                {
                    Error::auth(description.to_string())
                } else {
                    Error::handshake_bad(description.to_string())
                }
            }
        }
    }

    /// Start the reader thread for a fresh connection. The slot must be
    /// vacant; a second concurrent reader is a programming error.
    fn spawn_reader(
        &self,
        read: ReadHalf,
        assembler: ChunkAssembler,
        teardown: Arc<AtomicBool>,
    ) -> Result<()> {
        let token = self.inner.reader_token.fetch_add(1, Ordering::SeqCst) + 1;
        if self
            .inner
            .reader_slot
            .compare_exchange(0, token, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            log::error!("Reader slot occupied; refusing to start a second reader");
            return Err(Error::invalid_state("A reader thread is already active"));
        }

        let client = self.clone();
        std::thread::Builder::new()
            .name(format!("rtmp-reader-{}", token))
            .spawn(move || {
                client.reader_loop(read, assembler, teardown);
                client.inner.reader_slot.store(0, Ordering::SeqCst);
            })
            .map_err(|e| {
                self.inner.reader_slot.store(0, Ordering::SeqCst);
                Error::io(format!("spawn reader thread: {}", e))
            })?;
        Ok(())
    }

    fn reader_loop(&self, mut read: ReadHalf, mut assembler: ChunkAssembler, teardown: Arc<AtomicBool>) {
        let mut buf = [0u8; 4096];

        let error = loop {
            if teardown.load(Ordering::SeqCst) {
                break None;
            }

            match read.read_some(&mut buf) {
                Ok(ReadOutcome::Data(n)) => {
                    if let Err(e) = self.register_inbound(n) {
                        break Some(e);
                    }
                    let messages = match assembler.feed(&buf[..n]) {
                        Ok(messages) => messages,
                        Err(e) => break Some(e),
                    };
                    for message in messages {
                        match self.handle_message(&message, &mut assembler) {
                            Ok(Some(command)) => {
                                if command.is_status() {
                                    log::info!(
                                        "Stream status: {}",
                                        command.status_code().unwrap_or("?")
                                    );
                                } else {
                                    log::debug!("Ignoring command '{}'", command.name);
                                }
                            }
                            Ok(None) => {}
                            Err(e) => log::warn!("Message handling failed: {}", e),
                        }
                    }
                }
                Ok(ReadOutcome::Idle) => {
                    if read.wants_yield() {
                        std::thread::sleep(Duration::from_millis(3));
                    }
                }
                Ok(ReadOutcome::Eof) => break Some(Error::io("connection closed by peer")),
                Err(e) => break Some(e),
            }
        };

        if teardown.load(Ordering::SeqCst) {
            log::debug!("Reader exiting on teardown");
            return;
        }

        if let Some(error) = error {
            log::warn!("Reader thread lost connection: {}", error);
            *self.inner.state.lock().unwrap() = ClientState::Disconnected;
            if !self.inner.disconnect_notified.swap(true, Ordering::SeqCst) {
                let callback = self.inner.on_disconnected.lock().unwrap().clone();
                if let Some(callback) = callback {
                    callback(&error);
                }
            }
        }
    }

    /// While publishing, ping the peer when nothing has arrived for a
    /// while. Inbound pings are answered by the reader regardless.
    fn ensure_keepalive(&self) {
        let mut guard = self.inner.keepalive.lock().unwrap();
        if guard.is_some() {
            return;
        }

        let client = self.clone();
        let stop = self.inner.keepalive_stop.clone();
        let interval = self.inner.config.keepalive_interval;
        let idle_threshold = self.inner.config.idle_ping_threshold;

        let handle = std::thread::Builder::new()
            .name("rtmp-keepalive".into())
            .spawn(move || {
                let (lock, cvar) = &*stop;
                loop {
                    let stopped = lock.lock().unwrap();
                    let (stopped, _) = cvar
                        .wait_timeout(stopped, interval)
                        .expect("keepalive lock poisoned");
                    if *stopped {
                        break;
                    }
                    drop(stopped);

                    if !client.state().is_publishing() {
                        continue;
                    }
                    let idle_ms = client
                        .now_ms()
                        .saturating_sub(client.inner.last_inbound_ms.load(Ordering::SeqCst));
                    if idle_ms > idle_threshold.as_millis() as u64 {
                        log::debug!("No inbound bytes for {} ms, pinging", idle_ms);
                        if let Err(e) =
                            client.send_message(&protocol::ping_request(client.stream_time_ms()))
                        {
                            log::debug!("Keepalive ping failed: {}", e);
                        }
                    }
                }
                log::debug!("Keepalive thread exiting");
            })
            .expect("spawn keepalive thread");
        *guard = Some(handle);
    }

    fn teardown_connection(&self) {
        let conn = self.inner.conn.lock().unwrap().take();
        if let Some(conn) = conn {
            conn.teardown.store(true, Ordering::SeqCst);
            shutdown_socket(&conn.shutdown);
            log::debug!("Connection torn down");
        }
        *self.inner.state.lock().unwrap() = ClientState::Disconnected;
    }

    fn now_ms(&self) -> u64 {
        self.inner.created.elapsed().as_millis() as u64
    }
}
