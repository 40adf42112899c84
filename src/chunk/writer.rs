use crate::protocol::{DEFAULT_CHUNK_SIZE, RtmpMessage};

/// Serializes RTMP messages into chunk streams.
///
/// Every message starts with a format-0 header; payloads longer than the
/// outgoing chunk size continue under format-3 basic headers on the same
/// chunk stream id. Messages whose timestamp escapes to the extended field
/// repeat the 4-byte extended timestamp after every continuation header.
pub struct ChunkWriter {
    chunk_size_out: usize,
}

impl ChunkWriter {
    /// Create new chunk writer
    pub fn new() -> Self {
        ChunkWriter {
            chunk_size_out: DEFAULT_CHUNK_SIZE as usize,
        }
    }

    /// Set outgoing chunk size
    pub fn set_chunk_size(&mut self, size: usize) {
        self.chunk_size_out = size;
    }

    /// Get outgoing chunk size
    pub fn chunk_size(&self) -> usize {
        self.chunk_size_out
    }

    /// Serialize one message into wire chunks
    pub fn encode_message(&self, message: &RtmpMessage) -> Vec<u8> {
        let header = &message.header;
        let payload = &message.payload;
        let extended = header.has_extended_timestamp();

        let mut result =
            Vec::with_capacity(payload.len() + 16 + (payload.len() / self.chunk_size_out) * 8);

        // Format-0 header for the first chunk of the message
        encode_basic_header(&mut result, 0, header.chunk_stream_id);
        push_u24(&mut result, header.wire_timestamp());
        push_u24(&mut result, payload.len() as u32);
        result.push(header.message_type);
        result.extend_from_slice(&header.message_stream_id.to_le_bytes());
        if extended {
            result.extend_from_slice(&header.timestamp.to_be_bytes());
        }

        let first = payload.len().min(self.chunk_size_out);
        result.extend_from_slice(&payload[..first]);

        // Format-3 continuations
        let mut offset = first;
        while offset < payload.len() {
            encode_basic_header(&mut result, 3, header.chunk_stream_id);
            if extended {
                result.extend_from_slice(&header.timestamp.to_be_bytes());
            }
            let end = (offset + self.chunk_size_out).min(payload.len());
            result.extend_from_slice(&payload[offset..end]);
            offset = end;
        }

        result
    }
}

impl Default for ChunkWriter {
    fn default() -> Self {
        ChunkWriter::new()
    }
}

/// Encode a basic header for the given format and chunk stream id
pub fn encode_basic_header(out: &mut Vec<u8>, fmt: u8, cs_id: u32) {
    if cs_id <= 63 {
        // 1-byte form
        out.push((fmt << 6) | (cs_id as u8));
    } else if cs_id <= 319 {
        // 2-byte form
        out.push(fmt << 6);
        out.push((cs_id - 64) as u8);
    } else {
        // 3-byte form, CSID-64 little endian
        out.push((fmt << 6) | 1);
        let id = cs_id - 64;
        out.push((id & 0xFF) as u8);
        out.push((id >> 8) as u8);
    }
}

fn push_u24(out: &mut Vec<u8>, value: u32) {
    out.push((value >> 16) as u8);
    out.push((value >> 8) as u8);
    out.push(value as u8);
}
