use crate::protocol::{
    DEFAULT_CHUNK_SIZE, MAX_PEER_CHUNK_SIZE, MIN_PEER_CHUNK_SIZE, RtmpHeader, RtmpMessage,
};
use crate::{Error, Result};
use std::collections::HashMap;

/// Upper bound on bytes skipped while searching for a plausible header
const MAX_RESYNC_SKIP: usize = 1024;

/// Per-CSID assembly state. Header inheritance is scoped to one chunk
/// stream id; the struct outlives message completion so later format-1/2/3
/// chunks can inherit from it.
#[derive(Debug, Clone)]
struct CsidState {
    timestamp: u32,
    delta: u32,
    message_length: u32,
    message_type: u8,
    message_stream_id: u32,
    /// The raw value the 24-bit field escaped to the extended field, used to
    /// recognize the optional echo on format-3 continuations
    extended: Option<u32>,
    buffer: Vec<u8>,
}

impl CsidState {
    fn remaining(&self) -> usize {
        (self.message_length as usize).saturating_sub(self.buffer.len())
    }

    fn mid_message(&self) -> bool {
        !self.buffer.is_empty() && self.remaining() > 0
    }
}

enum Step {
    /// A chunk was consumed and completed a message
    Message(RtmpMessage),
    /// A chunk was consumed, message still assembling
    Partial,
    /// Not enough buffered bytes to parse the next chunk
    NeedMore,
}

/// Stateful RTMP chunk stream decoder.
///
/// Incremental: `feed` accepts arbitrary byte slices (down to single bytes)
/// and emits every message completed by them. Decode errors trigger a soft
/// resync that skips forward byte by byte looking for a plausible header;
/// exhausting the skip budget surfaces `ProtocolDesync` so the caller can
/// tear the connection down.
pub struct ChunkAssembler {
    streams: HashMap<u32, CsidState>,
    chunk_size_in: usize,
    buf: Vec<u8>,
    pos: usize,
    resync_skipped: Option<usize>,
}

impl ChunkAssembler {
    /// Create new assembler
    pub fn new() -> Self {
        ChunkAssembler {
            streams: HashMap::new(),
            chunk_size_in: DEFAULT_CHUNK_SIZE as usize,
            buf: Vec::with_capacity(4096),
            pos: 0,
            resync_skipped: None,
        }
    }

    /// Update the incoming chunk size announced by the peer, clamped to a
    /// sane range
    pub fn set_incoming_chunk_size(&mut self, size: u32) {
        let clamped = size.clamp(MIN_PEER_CHUNK_SIZE, MAX_PEER_CHUNK_SIZE);
        if clamped != size {
            log::warn!("Peer chunk size {} clamped to {}", size, clamped);
        }
        self.chunk_size_in = clamped as usize;
    }

    /// Get the current incoming chunk size
    pub fn incoming_chunk_size(&self) -> usize {
        self.chunk_size_in
    }

    /// Discard the partially assembled message on a chunk stream (Abort)
    pub fn abort(&mut self, cs_id: u32) {
        if let Some(state) = self.streams.get_mut(&cs_id) {
            if !state.buffer.is_empty() {
                log::debug!(
                    "Abort on csid {}: discarding {} buffered bytes",
                    cs_id,
                    state.buffer.len()
                );
                state.buffer.clear();
            }
        }
    }

    /// Feed raw bytes, returning every message they complete, in
    /// completion order
    pub fn feed(&mut self, data: &[u8]) -> Result<Vec<RtmpMessage>> {
        self.buf.extend_from_slice(data);
        let mut out = Vec::new();

        loop {
            if self.resync_skipped.is_some() {
                if !self.try_resync()? {
                    break;
                }
            }

            match self.parse_chunk() {
                Ok(Step::Message(msg)) => out.push(msg),
                Ok(Step::Partial) => {}
                Ok(Step::NeedMore) => break,
                Err(e) => {
                    log::warn!("Chunk decode error, entering resync: {}", e);
                    self.resync_skipped = Some(0);
                }
            }
        }

        self.compact();
        Ok(out)
    }

    /// Skip forward until a plausible chunk header parses. Returns true when
    /// re-anchored, false when more bytes are needed.
    fn try_resync(&mut self) -> Result<bool> {
        loop {
            let skipped = self.resync_skipped.unwrap_or(0);
            if skipped >= MAX_RESYNC_SKIP {
                return Err(Error::desync(format!(
                    "Resync abandoned after skipping {} bytes",
                    skipped
                )));
            }
            if self.pos >= self.buf.len() {
                return Ok(false);
            }

            // A lone format-3 byte is too weak a signature to re-anchor on
            let fmt = self.buf[self.pos] >> 6;
            if fmt != 3 {
                let saved = self.pos;
                match self.parse_chunk_probe() {
                    Ok(Some(_)) => {
                        self.pos = saved;
                        log::warn!("Chunk stream resynced after skipping {} bytes", skipped);
                        self.resync_skipped = None;
                        return Ok(true);
                    }
                    Ok(None) => {
                        self.pos = saved;
                        return Ok(false);
                    }
                    Err(_) => {
                        self.pos = saved;
                    }
                }
            }

            self.pos += 1;
            self.resync_skipped = Some(skipped + 1);
        }
    }

    /// Non-committing parse used while resyncing: validates that a whole
    /// chunk header (not necessarily its payload) decodes cleanly
    fn parse_chunk_probe(&mut self) -> Result<Option<()>> {
        let saved_streams = self.streams.clone();
        let saved = self.pos;
        let result = self.parse_chunk();
        self.streams = saved_streams;
        self.pos = saved;
        match result {
            Ok(Step::NeedMore) => Ok(None),
            Ok(_) => Ok(Some(())),
            Err(e) => Err(e),
        }
    }

    fn parse_chunk(&mut self) -> Result<Step> {
        let data = &self.buf[self.pos..];
        if data.is_empty() {
            return Ok(Step::NeedMore);
        }

        // Basic header
        let b0 = data[0];
        let fmt = b0 >> 6;
        let (cs_id, mut offset) = match b0 & 0x3F {
            0 => {
                if data.len() < 2 {
                    return Ok(Step::NeedMore);
                }
                (64 + data[1] as u32, 2usize)
            }
            1 => {
                if data.len() < 3 {
                    return Ok(Step::NeedMore);
                }
                // Add after shifting: csid = 64 + b1 + (b2 << 8)
                (64 + data[1] as u32 + ((data[2] as u32) << 8), 3usize)
            }
            n => (n as u32, 1usize),
        };

        if cs_id < 2 {
            return Err(Error::chunk(format!("Reserved chunk stream id {}", cs_id)));
        }

        let prior = self.streams.get(&cs_id);

        // Message header per format
        let header_len = match fmt {
            0 => 11,
            1 => 7,
            2 => 3,
            _ => 0,
        };
        if data.len() < offset + header_len {
            return Ok(Step::NeedMore);
        }
        let hdr = &data[offset..offset + header_len];
        offset += header_len;

        let mut state = match fmt {
            0 => {
                let field = read_u24(&hdr[0..3]);
                let message_length = read_u24(&hdr[3..6]);
                let message_type = hdr[6];
                let message_stream_id =
                    u32::from_le_bytes([hdr[7], hdr[8], hdr[9], hdr[10]]);

                let (timestamp, extended) = if field == 0xFFFFFF {
                    if data.len() < offset + 4 {
                        return Ok(Step::NeedMore);
                    }
                    let ext = u32::from_be_bytes([
                        data[offset],
                        data[offset + 1],
                        data[offset + 2],
                        data[offset + 3],
                    ]);
                    offset += 4;
                    (ext, Some(ext))
                } else {
                    (field, None)
                };

                CsidState {
                    timestamp,
                    delta: 0,
                    message_length,
                    message_type,
                    message_stream_id,
                    extended,
                    buffer: Vec::new(),
                }
            }
            1 | 2 => {
                let prev = prior.ok_or_else(|| {
                    Error::chunk(format!(
                        "Format {} chunk on csid {} with no prior header",
                        fmt, cs_id
                    ))
                })?;
                if prev.mid_message() {
                    return Err(Error::chunk(format!(
                        "Format {} header interrupts unfinished message on csid {}",
                        fmt, cs_id
                    )));
                }
                let field = read_u24(&hdr[0..3]);
                let (message_length, message_type) = if fmt == 1 {
                    (read_u24(&hdr[3..6]), hdr[6])
                } else {
                    (prev.message_length, prev.message_type)
                };

                let (delta, extended) = if field == 0xFFFFFF {
                    if data.len() < offset + 4 {
                        return Ok(Step::NeedMore);
                    }
                    let ext = u32::from_be_bytes([
                        data[offset],
                        data[offset + 1],
                        data[offset + 2],
                        data[offset + 3],
                    ]);
                    offset += 4;
                    (ext, Some(ext))
                } else {
                    (field, None)
                };

                CsidState {
                    timestamp: prev.timestamp.wrapping_add(delta),
                    delta,
                    message_length,
                    message_type,
                    message_stream_id: prev.message_stream_id,
                    extended,
                    buffer: Vec::new(),
                }
            }
            _ => {
                // Format 3 inherits everything
                let prev = prior.ok_or_else(|| {
                    Error::chunk(format!(
                        "Format 3 chunk on csid {} with no prior header",
                        cs_id
                    ))
                })?;
                let mut state = prev.clone();

                if let Some(echo) = state.extended {
                    // Some CDNs echo the extended timestamp on every
                    // continuation, some never do; accept both by matching
                    // the 4 bytes against the expected echo.
                    if data.len() < offset + 4 {
                        return Ok(Step::NeedMore);
                    }
                    let peeked = u32::from_be_bytes([
                        data[offset],
                        data[offset + 1],
                        data[offset + 2],
                        data[offset + 3],
                    ]);
                    if peeked == echo {
                        offset += 4;
                    }
                }

                if !state.mid_message() {
                    // New message: previous delta applies implicitly
                    state.timestamp = state.timestamp.wrapping_add(state.delta);
                    state.buffer = Vec::new();
                }
                state
            }
        };

        // Payload piece
        let to_read = state.remaining().min(self.chunk_size_in);
        if data.len() < offset + to_read {
            return Ok(Step::NeedMore);
        }
        state
            .buffer
            .extend_from_slice(&data[offset..offset + to_read]);
        offset += to_read;

        self.pos += offset;

        let step = if state.remaining() == 0 {
            let header = RtmpHeader::new(
                state.timestamp,
                state.message_length,
                state.message_type,
                state.message_stream_id,
                cs_id,
            );
            let payload = std::mem::take(&mut state.buffer);
            Step::Message(RtmpMessage::new(header, payload))
        } else {
            Step::Partial
        };

        self.streams.insert(cs_id, state);
        Ok(step)
    }

    /// Drop consumed bytes once they pile up
    fn compact(&mut self) {
        if self.pos > 4096 {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }
    }
}

impl Default for ChunkAssembler {
    fn default() -> Self {
        ChunkAssembler::new()
    }
}

fn read_u24(b: &[u8]) -> u32 {
    u32::from_be_bytes([0, b[0], b[1], b[2]])
}
