use crate::protocol::constants::*;
use crate::protocol::message::{RtmpHeader, RtmpMessage};
use crate::{Error, Result};

/// Build a SetChunkSize protocol message
pub fn set_chunk_size(size: u32) -> RtmpMessage {
    control_message(
        MSG_TYPE_SET_CHUNK_SIZE,
        (size & 0x7FFF_FFFF).to_be_bytes().to_vec(),
    )
}

/// Build an Acknowledgement carrying the cumulative bytes received
pub fn acknowledgement(sequence_number: u32) -> RtmpMessage {
    control_message(MSG_TYPE_ACK, sequence_number.to_be_bytes().to_vec())
}

/// Build a WindowAcknowledgementSize message
pub fn window_ack_size(size: u32) -> RtmpMessage {
    control_message(MSG_TYPE_WINDOW_ACK, size.to_be_bytes().to_vec())
}

/// Limit type for SetPeerBandwidth
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BandwidthLimit {
    Hard = 0,
    Soft = 1,
    Dynamic = 2,
}

/// Build a SetPeerBandwidth message
pub fn set_peer_bandwidth(size: u32, limit: BandwidthLimit) -> RtmpMessage {
    let mut payload = size.to_be_bytes().to_vec();
    payload.push(limit as u8);
    control_message(MSG_TYPE_SET_PEER_BW, payload)
}

/// Build a UserControl PingRequest with the given timestamp payload
pub fn ping_request(timestamp: u32) -> RtmpMessage {
    user_control(USER_CONTROL_PING_REQUEST, timestamp)
}

/// Build a UserControl PingResponse echoing the request timestamp
pub fn ping_response(timestamp: u32) -> RtmpMessage {
    user_control(USER_CONTROL_PING_RESPONSE, timestamp)
}

fn user_control(event_type: u16, payload: u32) -> RtmpMessage {
    let mut bytes = event_type.to_be_bytes().to_vec();
    bytes.extend_from_slice(&payload.to_be_bytes());
    control_message(MSG_TYPE_USER_CONTROL, bytes)
}

fn control_message(message_type: u8, payload: Vec<u8>) -> RtmpMessage {
    let header = RtmpHeader::protocol_control(message_type, payload.len() as u32);
    RtmpMessage::new(header, payload)
}

/// Parsed UserControl event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserControlEvent {
    pub event_type: u16,
    pub payload: u32,
}

/// Parse a UserControl payload (event type + 4-byte event data)
pub fn parse_user_control(payload: &[u8]) -> Result<UserControlEvent> {
    if payload.len() < 6 {
        return Err(Error::chunk("UserControl payload too short"));
    }
    let event_type = u16::from_be_bytes([payload[0], payload[1]]);
    let data = u32::from_be_bytes([payload[2], payload[3], payload[4], payload[5]]);
    Ok(UserControlEvent {
        event_type,
        payload: data,
    })
}

/// Parse a 4-byte big-endian control payload (SetChunkSize, WindowAckSize, Ack)
pub fn parse_u32_payload(payload: &[u8]) -> Result<u32> {
    if payload.len() < 4 {
        return Err(Error::chunk("Control payload too short"));
    }
    Ok(u32::from_be_bytes([
        payload[0], payload[1], payload[2], payload[3],
    ]))
}
