// In-process mock ingest server: accepts RTMP publishers, answers the
// command dialog, and records everything it is sent.

use livecast::{
    Amf0Value, ChunkAssembler, ChunkWriter, MSG_TYPE_ACK, MSG_TYPE_AUDIO, MSG_TYPE_COMMAND_AMF0,
    MSG_TYPE_DATA_AMF0, MSG_TYPE_SET_CHUNK_SIZE, MSG_TYPE_VIDEO, RtmpCommand, RtmpHeader,
    RtmpMessage, parse_u32_payload, perform_server_handshake, set_chunk_size,
};
use std::collections::HashMap;
use std::io::{ErrorKind, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Default)]
pub struct MockOptions {
    /// Reply to publish with an _error instead of Publish.Start
    pub reject_publish: bool,
    /// After a successful publish reply, push roughly this many bytes of
    /// script messages at the client
    pub flood_bytes: Option<usize>,
}

pub struct MockState {
    /// Media and script messages in arrival order
    pub media: Mutex<Vec<RtmpMessage>>,
    /// Acknowledgement sequence numbers received from the client
    pub acks: Mutex<Vec<u32>>,
    pub connections: AtomicU32,
    current: Mutex<Option<TcpStream>>,
    options: MockOptions,
}

pub struct MockIngest {
    pub port: u16,
    pub state: Arc<MockState>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl MockIngest {
    pub fn start(options: MockOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock ingest");
        let port = listener.local_addr().unwrap().port();
        listener.set_nonblocking(true).unwrap();

        let state = Arc::new(MockState {
            media: Mutex::new(Vec::new()),
            acks: Mutex::new(Vec::new()),
            connections: AtomicU32::new(0),
            current: Mutex::new(None),
            options,
        });
        let stop = Arc::new(AtomicBool::new(false));

        let accept_state = state.clone();
        let accept_stop = stop.clone();
        let handle = std::thread::spawn(move || {
            while !accept_stop.load(Ordering::SeqCst) {
                match listener.accept() {
                    Ok((stream, _)) => {
                        let state = accept_state.clone();
                        let stop = accept_stop.clone();
                        std::thread::spawn(move || {
                            if let Err(e) = handle_connection(stream, state, stop) {
                                // Publishers dropping the socket is normal
                                eprintln!("mock ingest connection ended: {}", e);
                            }
                        });
                    }
                    Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
                        std::thread::sleep(Duration::from_millis(10));
                    }
                    Err(_) => break,
                }
            }
        });

        MockIngest {
            port,
            state,
            stop,
            handle: Some(handle),
        }
    }

    pub fn url(&self) -> String {
        format!("rtmp://127.0.0.1:{}/live2", self.port)
    }

    /// Forcibly close the live publisher connection
    pub fn kill_current_connection(&self) {
        if let Some(stream) = self.state.current.lock().unwrap().as_ref() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
    }

    pub fn connection_count(&self) -> u32 {
        self.state.connections.load(Ordering::SeqCst)
    }

    pub fn media_messages(&self) -> Vec<RtmpMessage> {
        self.state.media.lock().unwrap().clone()
    }

    pub fn acks(&self) -> Vec<u32> {
        self.state.acks.lock().unwrap().clone()
    }
}

impl Drop for MockIngest {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        self.kill_current_connection();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn handle_connection(
    mut stream: TcpStream,
    state: Arc<MockState>,
    stop: Arc<AtomicBool>,
) -> std::io::Result<()> {
    stream.set_nodelay(true)?;
    state.connections.fetch_add(1, Ordering::SeqCst);
    *state.current.lock().unwrap() = Some(stream.try_clone()?);

    perform_server_handshake(&mut stream).map_err(std::io::Error::other)?;
    stream.set_read_timeout(Some(Duration::from_millis(100)))?;

    let mut assembler = ChunkAssembler::new();
    let mut writer = ChunkWriter::new();
    let mut buf = [0u8; 8192];

    while !stop.load(Ordering::SeqCst) {
        let n = match stream.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(ref e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                continue;
            }
            Err(e) => return Err(e),
        };

        let messages = assembler
            .feed(&buf[..n])
            .map_err(std::io::Error::other)?;
        for message in messages {
            match message.message_type() {
                MSG_TYPE_SET_CHUNK_SIZE => {
                    let size = parse_u32_payload(&message.payload).unwrap_or(128);
                    assembler.set_incoming_chunk_size(size);
                }
                MSG_TYPE_ACK => {
                    if let Ok(value) = parse_u32_payload(&message.payload) {
                        state.acks.lock().unwrap().push(value);
                    }
                }
                MSG_TYPE_COMMAND_AMF0 => {
                    let command = match RtmpCommand::decode(&message.payload) {
                        Ok(command) => command,
                        Err(_) => continue,
                    };
                    answer_command(&mut stream, &mut writer, &command, &state)?;
                }
                MSG_TYPE_AUDIO | MSG_TYPE_VIDEO | MSG_TYPE_DATA_AMF0 => {
                    state.media.lock().unwrap().push(message);
                }
                _ => {}
            }
        }
    }
    Ok(())
}

fn answer_command(
    stream: &mut TcpStream,
    writer: &mut ChunkWriter,
    command: &RtmpCommand,
    state: &MockState,
) -> std::io::Result<()> {
    match command.name.as_str() {
        "connect" => {
            let mut info = HashMap::new();
            info.insert("level".to_string(), Amf0Value::String("status".into()));
            info.insert(
                "code".to_string(),
                Amf0Value::String("NetConnection.Connect.Success".into()),
            );
            info.insert(
                "description".to_string(),
                Amf0Value::String("Connection succeeded.".into()),
            );
            let mut reply = RtmpCommand::new("_result".to_string(), command.transaction_id);
            reply.command_object = Some(Amf0Value::Null);
            reply.arguments.push(Amf0Value::Object(info));
            send_command(stream, writer, &reply)
        }
        "createStream" => {
            let mut reply = RtmpCommand::new("_result".to_string(), command.transaction_id);
            reply.command_object = Some(Amf0Value::Null);
            reply.arguments.push(Amf0Value::Number(1.0));
            send_command(stream, writer, &reply)
        }
        "publish" => {
            if state.options.reject_publish {
                let mut info = HashMap::new();
                info.insert("level".to_string(), Amf0Value::String("error".into()));
                info.insert(
                    "code".to_string(),
                    Amf0Value::String("NetStream.Publish.BadName".into()),
                );
                info.insert(
                    "description".to_string(),
                    Amf0Value::String("Stream key invalid".into()),
                );
                let mut reply = RtmpCommand::new("_error".to_string(), command.transaction_id);
                reply.command_object = Some(Amf0Value::Null);
                reply.arguments.push(Amf0Value::Object(info));
                return send_command(stream, writer, &reply);
            }

            let mut info = HashMap::new();
            info.insert("level".to_string(), Amf0Value::String("status".into()));
            info.insert(
                "code".to_string(),
                Amf0Value::String("NetStream.Publish.Start".into()),
            );
            info.insert(
                "description".to_string(),
                Amf0Value::String("Publishing started".into()),
            );
            let mut reply = RtmpCommand::new("onStatus".to_string(), 0.0);
            reply.command_object = Some(Amf0Value::Null);
            reply.arguments.push(Amf0Value::Object(info));
            send_command(stream, writer, &reply)?;

            if let Some(total) = state.options.flood_bytes {
                flood(stream, writer, total)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn send_command(
    stream: &mut TcpStream,
    writer: &mut ChunkWriter,
    command: &RtmpCommand,
) -> std::io::Result<()> {
    let payload = command.encode().map_err(std::io::Error::other)?;
    let header = RtmpHeader::command(0, payload.len() as u32, 0);
    let bytes = writer.encode_message(&RtmpMessage::new(header, payload));
    stream.write_all(&bytes)
}

/// Push `total` bytes of large script messages at the client to exercise
/// its window acknowledgement path
fn flood(stream: &mut TcpStream, writer: &mut ChunkWriter, total: usize) -> std::io::Result<()> {
    let raise = set_chunk_size(65_536);
    stream.write_all(&writer.encode_message(&raise))?;
    writer.set_chunk_size(65_536);

    let payload = vec![0u8; 65_000];
    let mut sent = 0;
    let mut ts = 0u32;
    while sent < total {
        let header = RtmpHeader::data(ts, payload.len() as u32, 1);
        let bytes = writer.encode_message(&RtmpMessage::new(header, payload.clone()));
        stream.write_all(&bytes)?;
        sent += bytes.len();
        ts += 1;
    }
    Ok(())
}

/// Poll until `pred` holds or the timeout elapses; true when it held
pub fn wait_until(timeout: Duration, mut pred: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if pred() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    pred()
}
