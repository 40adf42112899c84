use crate::utils::{current_timestamp, generate_random_bytes};
use crate::{Error, Result};
use std::io::{Read, Write};

/// RTMP version
pub const RTMP_VERSION: u8 = 3;

/// Handshake packet size (C1/S1/C2/S2)
pub const HANDSHAKE_SIZE: usize = 1536;

/// Client handshake (C0 + C1)
#[derive(Debug, Clone)]
pub struct C0C1 {
    /// RTMP version (C0)
    pub version: u8,

    /// Timestamp (C1)
    pub timestamp: u32,

    /// Zero (C1) - should be 0
    pub zero: u32,

    /// Random data (C1)
    pub random_data: Vec<u8>,
}

impl C0C1 {
    /// Create C0+C1 for client
    pub fn create_client() -> Self {
        C0C1 {
            version: RTMP_VERSION,
            timestamp: current_timestamp(),
            zero: 0,
            random_data: generate_random_bytes(HANDSHAKE_SIZE - 8),
        }
    }

    /// Encode to bytes
    pub fn encode(&self) -> Vec<u8> {
        let mut result = Vec::with_capacity(1 + HANDSHAKE_SIZE);

        // C0
        result.push(self.version);

        // C1
        result.extend_from_slice(&self.timestamp.to_be_bytes());
        result.extend_from_slice(&self.zero.to_be_bytes());
        result.extend_from_slice(&self.random_data);

        result
    }
}

/// Perform the simple (un-digested) client handshake over a blocking stream.
///
/// Sends C0+C1, reads S0+S1+S2, replies with C2 echoing S1. After this
/// returns the stream carries RTMP chunks.
pub fn perform_client_handshake<S: Read + Write>(stream: &mut S) -> Result<()> {
    let c0c1 = C0C1::create_client();
    stream.write_all(&c0c1.encode())?;
    stream.flush()?;

    let mut s0 = [0u8; 1];
    stream
        .read_exact(&mut s0)
        .map_err(|e| Error::handshake_bad(format!("Failed to read S0: {}", e)))?;
    if s0[0] != RTMP_VERSION {
        return Err(Error::handshake_bad(format!(
            "Unsupported RTMP version in S0: {}, expected {}",
            s0[0], RTMP_VERSION
        )));
    }

    let mut s1 = vec![0u8; HANDSHAKE_SIZE];
    stream
        .read_exact(&mut s1)
        .map_err(|e| Error::handshake_bad(format!("Failed to read S1: {}", e)))?;

    let mut s2 = vec![0u8; HANDSHAKE_SIZE];
    stream
        .read_exact(&mut s2)
        .map_err(|e| Error::handshake_bad(format!("Failed to read S2: {}", e)))?;

    // C2 echoes S1
    stream.write_all(&s1)?;
    stream.flush()?;

    Ok(())
}

/// Perform the server side of the simple handshake. Test support for the
/// in-process mock ingest; a real ingest is always the remote peer.
pub fn perform_server_handshake<S: Read + Write>(stream: &mut S) -> Result<()> {
    let mut c0 = [0u8; 1];
    stream.read_exact(&mut c0)?;
    if c0[0] != RTMP_VERSION {
        return Err(Error::handshake_bad(format!(
            "Unsupported RTMP version in C0: {}",
            c0[0]
        )));
    }

    let mut c1 = vec![0u8; HANDSHAKE_SIZE];
    stream.read_exact(&mut c1)?;

    // S0 + S1 + S2 (S2 echoes C1)
    let mut s1 = Vec::with_capacity(HANDSHAKE_SIZE);
    s1.extend_from_slice(&current_timestamp().to_be_bytes());
    s1.extend_from_slice(&[0u8; 4]);
    s1.extend_from_slice(&generate_random_bytes(HANDSHAKE_SIZE - 8));

    stream.write_all(&[RTMP_VERSION])?;
    stream.write_all(&s1)?;
    stream.write_all(&c1)?;
    stream.flush()?;

    let mut c2 = vec![0u8; HANDSHAKE_SIZE];
    stream.read_exact(&mut c2)?;

    Ok(())
}
